//! Pricer interface and a reference cash-flow schedule trade.
//!
//! A [`Pricer`] describes one trade to the exposure engine: its cash flows,
//! currency, notional, netting set and the market objects it needs. The
//! engine flattens the cash flows into valuation graph nodes once per worker
//! (see [`PvEvaluator`](crate::PvEvaluator)); [`Pricer::fast_pv`] is the
//! direct, graph-free valuation of the same trade.

use std::collections::BTreeSet;

use chrono::{Months, NaiveDate};

use crate::error::{ExposureError, SimulationError};
use crate::market::{MarketObject, MarketView};
use crate::types::{year_fraction, Currency};

/// Cash flow amount per unit notional.
#[derive(Debug, Clone, PartialEq)]
pub enum CashflowKind {
    /// Known amount
    Fixed {
        /// Amount per unit notional
        amount: f64,
    },
    /// Floating coupon `(F(start, end) + spread) × year_fraction`
    Floating {
        /// Projection curve
        curve: String,
        /// Spread over the forward rate
        spread: f64,
        /// Accrual year fraction
        year_fraction: f64,
    },
}

/// One scheduled payment.
#[derive(Debug, Clone, PartialEq)]
pub struct Cashflow {
    /// Payment date
    pub pay_date: NaiveDate,
    /// Start of the accrual period
    pub accrual_start: NaiveDate,
    /// End of the accrual period
    pub accrual_end: NaiveDate,
    /// Amount definition
    pub kind: CashflowKind,
}

impl Cashflow {
    /// Fixed amount paid at the end of its accrual period.
    pub fn fixed(accrual_start: NaiveDate, accrual_end: NaiveDate, amount: f64) -> Self {
        Self {
            pay_date: accrual_end,
            accrual_start,
            accrual_end,
            kind: CashflowKind::Fixed { amount },
        }
    }

    /// Floating coupon paid at the end of its accrual period.
    pub fn floating(
        accrual_start: NaiveDate,
        accrual_end: NaiveDate,
        curve: impl Into<String>,
        spread: f64,
    ) -> Self {
        Self {
            pay_date: accrual_end,
            accrual_start,
            accrual_end,
            kind: CashflowKind::Floating {
                curve: curve.into(),
                spread,
                year_fraction: year_fraction(accrual_start, accrual_end),
            },
        }
    }

    /// Elapsed share of the accrual period at `date`, in `[0, 1]`.
    pub fn accrued_fraction(&self, date: NaiveDate) -> f64 {
        let period = year_fraction(self.accrual_start, self.accrual_end);
        if period <= 0.0 || date <= self.accrual_start {
            return 0.0;
        }
        (year_fraction(self.accrual_start, date) / period).min(1.0)
    }

    /// Amount per unit notional under `market`, before discounting.
    pub fn amount(&self, base_date: NaiveDate, market: &dyn MarketView) -> Result<f64, SimulationError> {
        match &self.kind {
            CashflowKind::Fixed { amount } => Ok(*amount),
            CashflowKind::Floating {
                curve,
                spread,
                year_fraction: yf,
            } => {
                let start = year_fraction(base_date, self.accrual_start);
                let end = year_fraction(base_date, self.accrual_end);
                Ok((market.forward_rate(curve, start, end)? + spread) * yf)
            }
        }
    }
}

/// A trade as seen by the exposure engine.
pub trait Pricer: Send + Sync {
    /// Trade identifier.
    fn id(&self) -> &str;

    /// Settlement currency.
    fn currency(&self) -> Currency;

    /// Signed notional; negative for the paying side.
    fn notional(&self) -> f64;

    /// Index of the netting set the trade belongs to.
    fn netting_set(&self) -> usize;

    /// Maturity.
    fn end_date(&self) -> NaiveDate;

    /// Mutual break date, if any.
    fn break_date(&self) -> Option<NaiveDate> {
        None
    }

    /// Earlier of maturity and break date.
    fn effective_end(&self) -> NaiveDate {
        match self.break_date() {
            Some(brk) => brk.min(self.end_date()),
            None => self.end_date(),
        }
    }

    /// Curve the cash flows are discounted on.
    fn discount_curve(&self) -> &str;

    /// Whether the forward value keeps the accrued interest of the coupon in
    /// progress. When `false` the accrued part is removed (clean value).
    fn discount_accrued(&self) -> bool {
        true
    }

    /// Cash flows ordered by payment date.
    fn cashflows(&self) -> &[Cashflow];

    /// Exposure dates the trade is valued on.
    fn exposure_dates(&self) -> &[NaiveDate];

    /// Replaces the exposure dates.
    fn set_exposure_dates(&mut self, dates: &[NaiveDate]);

    /// Market objects the trade reads.
    fn required_objects(&self) -> Vec<MarketObject> {
        let mut forward_curves = BTreeSet::new();
        for cf in self.cashflows() {
            if let CashflowKind::Floating { curve, .. } = &cf.kind {
                forward_curves.insert(curve.clone());
            }
        }

        let mut objects = vec![
            MarketObject::DiscountCurve(self.discount_curve().to_string()),
            MarketObject::FxRate(self.currency()),
        ];
        objects.extend(forward_curves.into_iter().map(MarketObject::ForwardCurve));
        objects
    }

    /// Returns `true` if the trade reads `object`.
    fn depends_on(&self, object: &MarketObject) -> bool {
        self.required_objects().contains(object)
    }

    /// Forward value at `date` in the base currency, scaled by notional.
    ///
    /// Zero on or after the effective end date.
    fn fast_pv(&self, date: NaiveDate, market: &dyn MarketView) -> Result<f64, SimulationError> {
        if date >= self.effective_end() {
            return Ok(0.0);
        }
        let base = market.base_date();
        let curve = self.discount_curve();
        let cashflows = self.cashflows();
        let Some(start) = cashflows.iter().position(|cf| cf.pay_date > date) else {
            return Ok(0.0);
        };

        let mut pv = 0.0;
        for cf in &cashflows[start..] {
            let df = market.discount_factor(curve, year_fraction(base, cf.pay_date))?;
            pv += cf.amount(base, market)? * df;
        }
        pv /= market.discount_factor(curve, year_fraction(base, date))?;

        if !self.discount_accrued() {
            let frac = cashflows[start].accrued_fraction(date);
            if frac > 0.0 {
                pv -= cashflows[start].amount(base, market)? * frac;
            }
        }

        Ok(pv * market.fx_rate(self.currency())? * self.notional())
    }
}

/// Regular accrual periods from `start` to `end` every `months` months.
///
/// Dates roll from `start`; the last period is cut short at `end`.
pub fn regular_periods(start: NaiveDate, end: NaiveDate, months: u32) -> Vec<(NaiveDate, NaiveDate)> {
    let mut periods = Vec::new();
    if months == 0 {
        return periods;
    }
    let mut prev = start;
    for k in 1.. {
        let next = match start.checked_add_months(Months::new(months * k)) {
            Some(d) if d < end => d,
            _ => end,
        };
        if next <= prev {
            break;
        }
        periods.push((prev, next));
        if next == end {
            break;
        }
        prev = next;
    }
    periods
}

/// Trade defined by an explicit cash-flow schedule.
#[derive(Debug, Clone)]
pub struct ScheduledTrade {
    id: String,
    currency: Currency,
    notional: f64,
    netting_set: usize,
    discount_curve: String,
    cashflows: Vec<Cashflow>,
    break_date: Option<NaiveDate>,
    discount_accrued: bool,
    exposure_dates: Vec<NaiveDate>,
}

impl ScheduledTrade {
    /// Starts building a trade.
    pub fn builder(id: impl Into<String>) -> TradeBuilder {
        TradeBuilder::new(id)
    }
}

impl Pricer for ScheduledTrade {
    fn id(&self) -> &str {
        &self.id
    }

    fn currency(&self) -> Currency {
        self.currency
    }

    fn notional(&self) -> f64 {
        self.notional
    }

    fn netting_set(&self) -> usize {
        self.netting_set
    }

    fn end_date(&self) -> NaiveDate {
        // Validated non-empty by the builder.
        self.cashflows.last().map_or(NaiveDate::MIN, |cf| cf.pay_date)
    }

    fn break_date(&self) -> Option<NaiveDate> {
        self.break_date
    }

    fn discount_curve(&self) -> &str {
        &self.discount_curve
    }

    fn discount_accrued(&self) -> bool {
        self.discount_accrued
    }

    fn cashflows(&self) -> &[Cashflow] {
        &self.cashflows
    }

    fn exposure_dates(&self) -> &[NaiveDate] {
        &self.exposure_dates
    }

    fn set_exposure_dates(&mut self, dates: &[NaiveDate]) {
        self.exposure_dates = dates.to_vec();
    }
}

/// Builder for [`ScheduledTrade`].
///
/// # Examples
///
/// ```
/// use ccr_exposure::pricer::{regular_periods, Cashflow, Pricer, ScheduledTrade};
/// use ccr_exposure::types::Currency;
/// use chrono::NaiveDate;
///
/// let start = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
/// let end = NaiveDate::from_ymd_opt(2030, 1, 2).unwrap();
/// let fixed: Vec<Cashflow> = regular_periods(start, end, 12)
///     .into_iter()
///     .map(|(s, e)| Cashflow::fixed(s, e, 0.03))
///     .collect();
///
/// let trade = ScheduledTrade::builder("BOND-1")
///     .currency(Currency::USD)
///     .notional(1_000_000.0)
///     .discount_curve("USD-OIS")
///     .cashflows(fixed)
///     .build()
///     .unwrap();
///
/// assert_eq!(trade.cashflows().len(), 5);
/// assert_eq!(trade.end_date(), end);
/// ```
#[derive(Debug, Clone)]
pub struct TradeBuilder {
    id: String,
    currency: Currency,
    notional: f64,
    netting_set: usize,
    discount_curve: Option<String>,
    cashflows: Vec<Cashflow>,
    break_date: Option<NaiveDate>,
    discount_accrued: bool,
}

impl TradeBuilder {
    /// Creates a builder with unit notional in USD, netting set zero.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            currency: Currency::USD,
            notional: 1.0,
            netting_set: 0,
            discount_curve: None,
            cashflows: Vec::new(),
            break_date: None,
            discount_accrued: true,
        }
    }

    /// Sets the currency.
    pub fn currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    /// Sets the signed notional.
    pub fn notional(mut self, notional: f64) -> Self {
        self.notional = notional;
        self
    }

    /// Sets the netting set index.
    pub fn netting_set(mut self, netting_set: usize) -> Self {
        self.netting_set = netting_set;
        self
    }

    /// Sets the discount curve.
    pub fn discount_curve(mut self, curve: impl Into<String>) -> Self {
        self.discount_curve = Some(curve.into());
        self
    }

    /// Appends cash flows.
    pub fn cashflows(mut self, cashflows: impl IntoIterator<Item = Cashflow>) -> Self {
        self.cashflows.extend(cashflows);
        self
    }

    /// Sets a mutual break date.
    pub fn break_date(mut self, date: NaiveDate) -> Self {
        self.break_date = Some(date);
        self
    }

    /// Sets whether accrued interest stays in the forward value.
    pub fn discount_accrued(mut self, keep: bool) -> Self {
        self.discount_accrued = keep;
        self
    }

    /// Validates and builds the trade.
    pub fn build(mut self) -> Result<ScheduledTrade, ExposureError> {
        let invalid = |reason: String| ExposureError::InvalidInput(format!("trade {}: {}", self.id, reason));

        if !self.notional.is_finite() {
            return Err(invalid(format!("notional {} is not finite", self.notional)));
        }
        let Some(discount_curve) = self.discount_curve.take() else {
            return Err(invalid("no discount curve".to_string()));
        };
        if self.cashflows.is_empty() {
            return Err(invalid("no cash flows".to_string()));
        }
        if let Some(cf) = self.cashflows.iter().find(|cf| cf.accrual_start > cf.accrual_end) {
            return Err(invalid(format!(
                "accrual period {} to {} is reversed",
                cf.accrual_start, cf.accrual_end
            )));
        }
        self.cashflows.sort_by_key(|cf| cf.pay_date);

        Ok(ScheduledTrade {
            id: self.id,
            currency: self.currency,
            notional: self.notional,
            netting_set: self.netting_set,
            discount_curve,
            cashflows: self.cashflows,
            break_date: self.break_date,
            discount_accrued: self.discount_accrued,
            exposure_dates: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{CreditCurve, MarketData, SimulatedMarket};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn market(rate: f64) -> SimulatedMarket {
        let data = MarketData::builder(date(2025, 1, 1), Currency::USD)
            .discount_curve("OIS", rate)
            .forward_curve("SOFR", 0.04)
            .credit_curve("CPTY", CreditCurve::new(0.01, 0.4).unwrap())
            .counterparty("CPTY")
            .own("CPTY")
            .numeraire_curve("OIS")
            .fx_spot(Currency::EUR, 1.1)
            .build()
            .unwrap();
        SimulatedMarket::new(Arc::new(data))
    }

    fn unit_flows() -> ScheduledTrade {
        let flows = (1..=4).map(|y| Cashflow::fixed(date(2024 + y, 1, 1), date(2025 + y, 1, 1), 1.0));
        ScheduledTrade::builder("UNIT")
            .discount_curve("OIS")
            .cashflows(flows)
            .build()
            .unwrap()
    }

    #[test]
    fn test_regular_periods() {
        let periods = regular_periods(date(2025, 1, 31), date(2025, 7, 15), 2);
        assert_eq!(
            periods,
            vec![
                (date(2025, 1, 31), date(2025, 3, 31)),
                (date(2025, 3, 31), date(2025, 5, 31)),
                (date(2025, 5, 31), date(2025, 7, 15)),
            ]
        );
        assert!(regular_periods(date(2025, 1, 1), date(2025, 1, 1), 3).is_empty());
        assert!(regular_periods(date(2025, 1, 1), date(2026, 1, 1), 0).is_empty());
    }

    #[test]
    fn test_accrued_fraction() {
        let cf = Cashflow::fixed(date(2025, 1, 1), date(2026, 1, 1), 1.0);
        assert_eq!(cf.accrued_fraction(date(2024, 6, 1)), 0.0);
        assert_relative_eq!(cf.accrued_fraction(date(2025, 7, 2)), 182.0 / 365.0);
        assert_eq!(cf.accrued_fraction(date(2027, 1, 1)), 1.0);
    }

    #[test]
    fn test_unit_flows_direct_fast_pv() {
        let trade = unit_flows();
        let mkt = market(0.0);
        assert_relative_eq!(trade.fast_pv(date(2025, 1, 1), &mkt).unwrap(), 4.0);
        assert_relative_eq!(trade.fast_pv(date(2026, 6, 1), &mkt).unwrap(), 3.0);
        assert_eq!(trade.fast_pv(date(2029, 1, 1), &mkt).unwrap(), 0.0);
        assert_eq!(trade.fast_pv(date(2030, 1, 1), &mkt).unwrap(), 0.0);
    }

    #[test]
    fn test_break_date_truncates() {
        let flows = (1..=4).map(|y| Cashflow::fixed(date(2024 + y, 1, 1), date(2025 + y, 1, 1), 1.0));
        let trade = ScheduledTrade::builder("BRK")
            .discount_curve("OIS")
            .cashflows(flows)
            .break_date(date(2027, 1, 1))
            .build()
            .unwrap();
        assert_eq!(trade.effective_end(), date(2027, 1, 1));
        assert_eq!(trade.fast_pv(date(2027, 6, 1), &market(0.0)).unwrap(), 0.0);
        assert!(trade.fast_pv(date(2026, 6, 1), &market(0.0)).unwrap() > 0.0);
    }

    #[test]
    fn test_clean_value_removes_accrued() {
        let build = |keep: bool| {
            ScheduledTrade::builder("FIX")
                .discount_curve("OIS")
                .cashflows([Cashflow::fixed(date(2025, 1, 1), date(2026, 1, 1), 0.05)])
                .discount_accrued(keep)
                .build()
                .unwrap()
        };
        let mkt = market(0.0);
        let mid = date(2025, 7, 2);
        let dirty = build(true).fast_pv(mid, &mkt).unwrap();
        let clean = build(false).fast_pv(mid, &mkt).unwrap();
        assert_relative_eq!(dirty - clean, 0.05 * 182.0 / 365.0, epsilon = 1e-14);
    }

    #[test]
    fn test_floating_coupon_and_fx() {
        let trade = ScheduledTrade::builder("FLT")
            .currency(Currency::EUR)
            .notional(-100.0)
            .discount_curve("OIS")
            .cashflows([Cashflow::floating(date(2025, 1, 1), date(2026, 1, 1), "SOFR", 0.01)])
            .build()
            .unwrap();
        let mkt = market(0.0);
        let yf = 1.0;
        let fwd = ((0.04_f64 * yf).exp() - 1.0) / yf;
        assert_relative_eq!(
            trade.fast_pv(date(2025, 1, 1), &mkt).unwrap(),
            (fwd + 0.01) * yf * 1.1 * -100.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_required_objects() {
        let trade = ScheduledTrade::builder("MIX")
            .currency(Currency::EUR)
            .discount_curve("OIS")
            .cashflows([
                Cashflow::floating(date(2025, 1, 1), date(2026, 1, 1), "SOFR", 0.0),
                Cashflow::floating(date(2026, 1, 1), date(2027, 1, 1), "SOFR", 0.0),
                Cashflow::fixed(date(2025, 1, 1), date(2027, 1, 1), 0.02),
            ])
            .build()
            .unwrap();

        assert_eq!(trade.required_objects().len(), 3);
        assert!(trade.depends_on(&MarketObject::ForwardCurve("SOFR".into())));
        assert!(trade.depends_on(&MarketObject::FxRate(Currency::EUR)));
        assert!(!trade.depends_on(&MarketObject::FxRate(Currency::USD)));
    }

    #[test]
    fn test_builder_validation() {
        assert!(ScheduledTrade::builder("A").discount_curve("OIS").build().is_err());
        assert!(ScheduledTrade::builder("B")
            .cashflows([Cashflow::fixed(date(2025, 1, 1), date(2026, 1, 1), 1.0)])
            .build()
            .is_err());
        let reversed = Cashflow {
            pay_date: date(2026, 1, 1),
            accrual_start: date(2026, 1, 1),
            accrual_end: date(2025, 1, 1),
            kind: CashflowKind::Fixed { amount: 1.0 },
        };
        assert!(ScheduledTrade::builder("C")
            .discount_curve("OIS")
            .cashflows([reversed])
            .build()
            .is_err());
    }

    #[test]
    fn test_set_exposure_dates() {
        let mut trade = unit_flows();
        assert!(trade.exposure_dates().is_empty());
        trade.set_exposure_dates(&[date(2025, 1, 1), date(2026, 1, 1)]);
        assert_eq!(trade.exposure_dates().len(), 2);
    }
}
