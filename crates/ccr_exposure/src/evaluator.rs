//! Forward-value evaluator over the valuation graph.
//!
//! [`PvEvaluator::new`] flattens one trade's cash flows into graph nodes and
//! precomputes, for every exposure date before the trade's effective end,
//! where the alive payments start and the node holding their forward value
//! (alive payments over the discount factor at the date).
//! [`PvEvaluator::fast_pv`] then only reads cached node values.

use chrono::NaiveDate;

use crate::error::SimulationError;
use crate::graph::{NodeId, ValuationGraph};
use crate::market::MarketView;
use crate::pricer::{CashflowKind, Pricer};
use crate::types::year_fraction;

/// Precomputed valuation inputs for one exposure date.
#[derive(Debug, Clone, PartialEq)]
pub struct PvParameter {
    /// Exposure date
    pub date: NaiveDate,
    /// First payment with pay date after `date`, if any
    pub start_index: Option<usize>,
    /// Discount factor node at `date`
    pub discount: NodeId,
    /// Forward value node of the alive payments, present with `start_index`
    pub forward: Option<NodeId>,
    /// Coupon node and accrued fraction removed from the value
    pub accrued: Option<(NodeId, f64)>,
}

/// Graph-backed forward valuation of one trade.
#[derive(Debug, Clone)]
pub struct PvEvaluator {
    params: Vec<PvParameter>,
    fx: NodeId,
    notional: f64,
    netting_set: usize,
}

impl PvEvaluator {
    /// Builds the payment nodes of `pricer` into `graph` and precomputes the
    /// parameters for its exposure dates.
    pub fn new(pricer: &dyn Pricer, base_date: NaiveDate, graph: &mut ValuationGraph) -> Self {
        let curve = pricer.discount_curve();
        let cashflows = pricer.cashflows();

        let mut coupons = Vec::with_capacity(cashflows.len());
        let mut payments = Vec::with_capacity(cashflows.len());
        for cf in cashflows {
            let coupon = match &cf.kind {
                CashflowKind::Fixed { amount } => graph.constant(*amount),
                CashflowKind::Floating {
                    curve: fwd_curve,
                    spread,
                    year_fraction: yf,
                } => {
                    let fwd = graph.forward_rate(
                        fwd_curve,
                        year_fraction(base_date, cf.accrual_start),
                        year_fraction(base_date, cf.accrual_end),
                    );
                    let spread = graph.constant(*spread);
                    let rate = graph.sum(vec![fwd, spread]);
                    let yf = graph.constant(*yf);
                    graph.product(rate, yf)
                }
            };
            let df = graph.discount_factor(curve, year_fraction(base_date, cf.pay_date));
            coupons.push(coupon);
            payments.push(graph.product(coupon, df));
        }

        let end = pricer.effective_end();
        let keep_accrued = pricer.discount_accrued();
        let mut params = Vec::new();
        let mut cursor = 0;
        for &date in pricer.exposure_dates() {
            if date >= end {
                break;
            }
            while cursor < cashflows.len() && cashflows[cursor].pay_date <= date {
                cursor += 1;
            }
            let start_index = (cursor < cashflows.len()).then_some(cursor);
            let accrued = match start_index {
                Some(i) if !keep_accrued => {
                    let frac = cashflows[i].accrued_fraction(date);
                    (frac > 0.0).then_some((coupons[i], frac))
                }
                _ => None,
            };
            let discount = graph.discount_factor(curve, year_fraction(base_date, date));
            let forward = start_index.map(|i| {
                let alive = graph.sum(payments[i..].to_vec());
                graph.ratio(alive, discount)
            });
            params.push(PvParameter {
                date,
                start_index,
                discount,
                forward,
                accrued,
            });
        }

        Self {
            params,
            fx: graph.fx_rate(pricer.currency()),
            notional: pricer.notional(),
            netting_set: pricer.netting_set(),
        }
    }

    /// Number of exposure dates with a precomputed parameter.
    #[inline]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Returns `true` if the trade is dead on every exposure date.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Precomputed parameters, one per live exposure date.
    pub fn params(&self) -> &[PvParameter] {
        &self.params
    }

    /// Netting set of the trade.
    #[inline]
    pub fn netting_set(&self) -> usize {
        self.netting_set
    }

    /// Forward value at exposure date `index` in the base currency.
    ///
    /// Returns zero past the last precomputed date or when no payment is
    /// left. Within the precomputed dates, `date` must be the exposure date
    /// the evaluator was built with at `index`.
    pub fn fast_pv(
        &self,
        graph: &ValuationGraph,
        market: &dyn MarketView,
        index: usize,
        date: NaiveDate,
    ) -> Result<f64, SimulationError> {
        let Some(param) = self.params.get(index) else {
            return Ok(0.0);
        };
        if param.date != date {
            return Err(SimulationError::ExposureDateMismatch {
                index,
                expected: param.date,
                actual: date,
            });
        }
        let Some(forward) = param.forward else {
            return Ok(0.0);
        };

        let mut pv = graph.evaluate(forward, market)?;

        if let Some((coupon, frac)) = param.accrued {
            pv -= graph.evaluate(coupon, market)? * frac;
        }

        Ok(pv * graph.evaluate(self.fx, market)? * self.notional)
    }
}
