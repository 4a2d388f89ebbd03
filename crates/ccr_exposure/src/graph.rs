//! Per-worker valuation graph.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Building a node
//! that already exists returns the existing id, so sub-expressions shared by
//! several trades (the same discount factor, the same FX rate) are stored and
//! evaluated once.
//!
//! Every node caches its value. Between two [`Resettable::reset`] calls
//! repeated evaluation returns the cached value; after a reset the next
//! evaluation recomputes from the current market state.
//!
//! # Examples
//!
//! ```
//! use ccr_exposure::graph::{Resettable, ValuationGraph};
//!
//! let mut graph = ValuationGraph::new();
//! let a = graph.constant(2.0);
//! let b = graph.constant(3.0);
//! let product = graph.product(a, b);
//!
//! // Interned: same structure, same node.
//! assert_eq!(graph.constant(2.0), a);
//! assert_eq!(graph.len(), 3);
//!
//! graph.reset();
//! assert!(!graph.is_cached(product));
//! ```

use std::cell::Cell;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::error::SimulationError;
use crate::market::MarketView;
use crate::types::Currency;

/// Index of a node in a [`ValuationGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Arena index.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A valuation graph node.
///
/// Times are in years from the market base date. Floating-point fields are
/// compared bitwise for interning.
#[derive(Debug, Clone)]
pub enum Node {
    /// Fixed value
    Constant(f64),
    /// Deflated discount factor of a curve
    DiscountFactor {
        /// Discount curve name
        curve: String,
        /// Maturity
        time: f64,
    },
    /// Simple forward rate of a curve over `[start, end]`
    ForwardRate {
        /// Forward curve name
        curve: String,
        /// Accrual start
        start: f64,
        /// Accrual end
        end: f64,
    },
    /// FX rate into the base currency
    FxRate(Currency),
    /// Sum of the operands
    Sum(Vec<NodeId>),
    /// `lhs × rhs`
    Product(NodeId, NodeId),
    /// `lhs / rhs`
    Ratio(NodeId, NodeId),
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        use Node::*;
        match (self, other) {
            (Constant(a), Constant(b)) => a.to_bits() == b.to_bits(),
            (
                DiscountFactor { curve: c1, time: t1 },
                DiscountFactor { curve: c2, time: t2 },
            ) => c1 == c2 && t1.to_bits() == t2.to_bits(),
            (
                ForwardRate {
                    curve: c1,
                    start: s1,
                    end: e1,
                },
                ForwardRate {
                    curve: c2,
                    start: s2,
                    end: e2,
                },
            ) => c1 == c2 && s1.to_bits() == s2.to_bits() && e1.to_bits() == e2.to_bits(),
            (FxRate(a), FxRate(b)) => a == b,
            (Sum(a), Sum(b)) => a == b,
            (Product(a1, b1), Product(a2, b2)) | (Ratio(a1, b1), Ratio(a2, b2)) => {
                a1 == a2 && b1 == b2
            }
            _ => false,
        }
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Node::Constant(v) => v.to_bits().hash(state),
            Node::DiscountFactor { curve, time } => {
                curve.hash(state);
                time.to_bits().hash(state);
            }
            Node::ForwardRate { curve, start, end } => {
                curve.hash(state);
                start.to_bits().hash(state);
                end.to_bits().hash(state);
            }
            Node::FxRate(ccy) => ccy.hash(state),
            Node::Sum(ids) => ids.hash(state),
            Node::Product(a, b) | Node::Ratio(a, b) => {
                a.hash(state);
                b.hash(state);
            }
        }
    }
}

/// Objects holding per-path cached state.
pub trait Resettable {
    /// Invalidates every cached value.
    fn reset(&mut self);
}

/// Arena of interned, memoised valuation nodes.
#[derive(Debug, Default)]
pub struct ValuationGraph {
    nodes: Vec<Node>,
    cache: Vec<Cell<Option<f64>>>,
    index: HashMap<Node, NodeId>,
}

impl ValuationGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the graph holds no node.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the node behind `id`.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Adds `node`, or returns the id of an identical existing node.
    pub fn intern(&mut self, node: Node) -> NodeId {
        if let Some(id) = self.index.get(&node) {
            return *id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(node.clone());
        self.cache.push(Cell::new(None));
        self.index.insert(node, id);
        id
    }

    /// Interns a constant.
    pub fn constant(&mut self, value: f64) -> NodeId {
        self.intern(Node::Constant(value))
    }

    /// Interns a discount factor node.
    pub fn discount_factor(&mut self, curve: &str, time: f64) -> NodeId {
        self.intern(Node::DiscountFactor {
            curve: curve.to_string(),
            time,
        })
    }

    /// Interns a forward rate node.
    pub fn forward_rate(&mut self, curve: &str, start: f64, end: f64) -> NodeId {
        self.intern(Node::ForwardRate {
            curve: curve.to_string(),
            start,
            end,
        })
    }

    /// Interns an FX rate node.
    pub fn fx_rate(&mut self, currency: Currency) -> NodeId {
        self.intern(Node::FxRate(currency))
    }

    /// Interns a sum node.
    pub fn sum(&mut self, operands: Vec<NodeId>) -> NodeId {
        self.intern(Node::Sum(operands))
    }

    /// Interns a product node.
    pub fn product(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.intern(Node::Product(lhs, rhs))
    }

    /// Interns a ratio node.
    pub fn ratio(&mut self, numerator: NodeId, denominator: NodeId) -> NodeId {
        self.intern(Node::Ratio(numerator, denominator))
    }

    /// Returns `true` if the value of `id` is cached.
    #[inline]
    pub fn is_cached(&self, id: NodeId) -> bool {
        self.cache[id.0].get().is_some()
    }

    /// Evaluates `id`, computing it from `market` unless cached.
    pub fn evaluate(&self, id: NodeId, market: &dyn MarketView) -> Result<f64, SimulationError> {
        if let Some(value) = self.cache[id.0].get() {
            return Ok(value);
        }

        let value = match &self.nodes[id.0] {
            Node::Constant(v) => *v,
            Node::DiscountFactor { curve, time } => market.discount_factor(curve, *time)?,
            Node::ForwardRate { curve, start, end } => market.forward_rate(curve, *start, *end)?,
            Node::FxRate(ccy) => market.fx_rate(*ccy)?,
            Node::Sum(ids) => {
                let mut total = 0.0;
                for id in ids {
                    total += self.evaluate(*id, market)?;
                }
                total
            }
            Node::Product(a, b) => self.evaluate(*a, market)? * self.evaluate(*b, market)?,
            Node::Ratio(a, b) => self.evaluate(*a, market)? / self.evaluate(*b, market)?,
        };

        self.cache[id.0].set(Some(value));
        Ok(value)
    }
}

impl Resettable for ValuationGraph {
    fn reset(&mut self) {
        for slot in &mut self.cache {
            *slot.get_mut() = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{CreditCurve, MarketData, MarketEnvironment, MarketState, SimulatedMarket};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn market() -> SimulatedMarket {
        let data = MarketData::builder(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(), Currency::USD)
            .discount_curve("OIS", 0.02)
            .forward_curve("SOFR", 0.025)
            .credit_curve("CPTY", CreditCurve::new(0.02, 0.4).unwrap())
            .counterparty("CPTY")
            .own("CPTY")
            .numeraire_curve("OIS")
            .fx_spot(Currency::GBP, 1.25)
            .build()
            .unwrap();
        SimulatedMarket::new(Arc::new(data))
    }

    #[test]
    fn test_common_subexpressions_interned_once() {
        let mut graph = ValuationGraph::new();
        let df1 = graph.discount_factor("OIS", 1.0);
        let df2 = graph.discount_factor("OIS", 1.0);
        let df3 = graph.discount_factor("OIS", 2.0);
        assert_eq!(df1, df2);
        assert_ne!(df1, df3);

        let s1 = graph.sum(vec![df1, df3]);
        let s2 = graph.sum(vec![df2, df3]);
        assert_eq!(s1, s2);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_constants_compare_bitwise() {
        let mut graph = ValuationGraph::new();
        let pos = graph.constant(0.0);
        let neg = graph.constant(-0.0);
        assert_ne!(pos, neg);
        assert_eq!(graph.constant(f64::NAN), graph.constant(f64::NAN));
    }

    #[test]
    fn test_evaluate_expression() {
        let mut graph = ValuationGraph::new();
        let mkt = market();

        let amount = graph.constant(100.0);
        let df = graph.discount_factor("OIS", 2.0);
        let pv = graph.product(amount, df);
        let fx = graph.fx_rate(Currency::GBP);
        let pv_base = graph.product(pv, fx);
        let fwd = graph.forward_rate("SOFR", 1.0, 1.5);
        let two = graph.constant(2.0);
        let half = graph.ratio(fwd, two);

        assert_relative_eq!(
            graph.evaluate(pv_base, &mkt).unwrap(),
            100.0 * (-0.04_f64).exp() * 1.25,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            graph.evaluate(half, &mkt).unwrap(),
            ((0.025_f64 * 0.5).exp() - 1.0) / 0.5 / 2.0,
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_cached_until_reset() {
        let mut graph = ValuationGraph::new();
        let mut mkt = market();
        let df = graph.discount_factor("OIS", 3.0);

        let before = graph.evaluate(df, &mkt).unwrap();
        assert!(graph.is_cached(df));

        mkt.set_state(MarketState {
            time: 1.0,
            short_rate_shift: 0.01,
            integrated_shift: 0.005,
        });
        // Stale by contract until reset.
        assert_eq!(graph.evaluate(df, &mkt).unwrap(), before);

        graph.reset();
        assert!(!graph.is_cached(df));
        let after = graph.evaluate(df, &mkt).unwrap();
        assert_ne!(after, before);
        assert_relative_eq!(after, (-0.06_f64 - 0.005 - 0.02).exp(), epsilon = 1e-14);

        mkt.conform();
        graph.reset();
        assert_eq!(graph.evaluate(df, &mkt).unwrap(), before);
    }

    #[test]
    fn test_missing_market_object_is_error() {
        let mut graph = ValuationGraph::new();
        let df = graph.discount_factor("EUR-ESTR", 1.0);
        let err = graph.evaluate(df, &market()).unwrap_err();
        assert!(matches!(err, SimulationError::MissingMarketObject(_)));
        assert!(!graph.is_cached(df));
    }
}
