//! Market environment used as the source of valuation graph nodes.
//!
//! The market is split in two:
//!
//! - [`MarketData`]: immutable curves, credit curves, FX spots and funding
//!   spreads, shared between workers through an `Arc`
//! - [`MarketState`]: the small mutable simulation state (time and short-rate
//!   shift) each worker owns after cloning the environment
//!
//! Curves are flat continuously compounded rates. Under simulation a
//! Gaussian short-rate shift `x(t)` is added to every discount and forward
//! curve, so the deflated discount factor from the base date to `T ≥ τ` is
//!
//! ```text
//! D(T) = exp(-r T - ∫₀^τ x(s) ds - x(τ) (T - τ))
//! ```
//!
//! and forward values at `τ` follow from `D(T) / D(τ)`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{MarketError, SimulationError};
use crate::types::Currency;

/// Market objects a pricer may depend on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarketObject {
    /// Discount curve by name
    DiscountCurve(String),
    /// Forward (projection) curve by name
    ForwardCurve(String),
    /// Credit curve by name
    CreditCurve(String),
    /// FX rate from the currency into the base currency
    FxRate(Currency),
}

impl fmt::Display for MarketObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketObject::DiscountCurve(name) => write!(f, "discount curve '{}'", name),
            MarketObject::ForwardCurve(name) => write!(f, "forward curve '{}'", name),
            MarketObject::CreditCurve(name) => write!(f, "credit curve '{}'", name),
            MarketObject::FxRate(ccy) => write!(f, "{} fx rate", ccy),
        }
    }
}

/// Flat hazard-rate credit curve.
///
/// # Examples
///
/// ```
/// use ccr_exposure::market::CreditCurve;
///
/// let curve = CreditCurve::new(0.02, 0.4).unwrap();
/// assert!((curve.lgd() - 0.6).abs() < 1e-12);
/// assert!(curve.survival_probability(2.0) < curve.survival_probability(1.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CreditCurve {
    /// Annualised default intensity
    pub hazard_rate: f64,
    /// Recovery rate in `[0, 1)`
    pub recovery_rate: f64,
}

impl CreditCurve {
    /// Creates a validated credit curve.
    pub fn new(hazard_rate: f64, recovery_rate: f64) -> Result<Self, MarketError> {
        let curve = Self {
            hazard_rate,
            recovery_rate,
        };
        curve.validate("credit")?;
        Ok(curve)
    }

    fn validate(&self, name: &str) -> Result<(), MarketError> {
        let reason = if !self.hazard_rate.is_finite() || self.hazard_rate < 0.0 {
            Some(format!("hazard rate {} must be finite and non-negative", self.hazard_rate))
        } else if !(0.0..1.0).contains(&self.recovery_rate) {
            Some(format!("recovery rate {} must be in [0, 1)", self.recovery_rate))
        } else {
            None
        };
        match reason {
            Some(reason) => Err(MarketError::InvalidCreditCurve {
                name: name.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Survival probability to time `t` (years); one for `t ≤ 0`.
    #[inline]
    pub fn survival_probability(&self, t: f64) -> f64 {
        (-self.hazard_rate * t.max(0.0)).exp()
    }

    /// Loss given default.
    #[inline]
    pub fn lgd(&self) -> f64 {
        1.0 - self.recovery_rate
    }

    /// Credit spread `h × LGD`.
    #[inline]
    pub fn spread(&self) -> f64 {
        self.hazard_rate * self.lgd()
    }
}

/// Immutable market data shared by all workers.
#[derive(Debug, Clone)]
pub struct MarketData {
    base_date: NaiveDate,
    base_currency: Currency,
    numeraire_curve: String,
    discount_curves: HashMap<String, f64>,
    forward_curves: HashMap<String, f64>,
    credit_curves: HashMap<String, CreditCurve>,
    fx_spots: HashMap<Currency, f64>,
    counterparty_curve: String,
    own_curve: String,
    lend_spread: f64,
    borrow_spread: f64,
}

impl MarketData {
    /// Returns a builder anchored at `base_date`.
    pub fn builder(base_date: NaiveDate, base_currency: Currency) -> MarketDataBuilder {
        MarketDataBuilder::new(base_date, base_currency)
    }

    /// Valuation date.
    #[inline]
    pub fn base_date(&self) -> NaiveDate {
        self.base_date
    }

    /// Reporting currency.
    #[inline]
    pub fn base_currency(&self) -> Currency {
        self.base_currency
    }

    /// Discount curve defining the numeraire.
    #[inline]
    pub fn numeraire_curve(&self) -> &str {
        &self.numeraire_curve
    }

    /// Credit curve by name.
    pub fn credit_curve(&self, name: &str) -> Option<&CreditCurve> {
        self.credit_curves.get(name)
    }

    /// Counterparty credit curve.
    pub fn counterparty(&self) -> &CreditCurve {
        // Presence checked when the market was built.
        &self.credit_curves[&self.counterparty_curve]
    }

    /// Own (bank) credit curve.
    pub fn own(&self) -> &CreditCurve {
        &self.credit_curves[&self.own_curve]
    }

    /// Funding spread earned on cash lent.
    #[inline]
    pub fn lend_spread(&self) -> f64 {
        self.lend_spread
    }

    /// Funding spread paid on cash borrowed.
    #[inline]
    pub fn borrow_spread(&self) -> f64 {
        self.borrow_spread
    }

    /// Returns `true` if the market can serve `object`.
    pub fn contains(&self, object: &MarketObject) -> bool {
        match object {
            MarketObject::DiscountCurve(name) => self.discount_curves.contains_key(name),
            MarketObject::ForwardCurve(name) => self.forward_curves.contains_key(name),
            MarketObject::CreditCurve(name) => self.credit_curves.contains_key(name),
            MarketObject::FxRate(ccy) => {
                *ccy == self.base_currency || self.fx_spots.contains_key(ccy)
            }
        }
    }
}

/// Builder for [`MarketData`].
///
/// # Examples
///
/// ```
/// use ccr_exposure::market::{CreditCurve, MarketData};
/// use ccr_exposure::types::Currency;
/// use chrono::NaiveDate;
///
/// let market = MarketData::builder(NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(), Currency::USD)
///     .discount_curve("USD-OIS", 0.03)
///     .numeraire_curve("USD-OIS")
///     .credit_curve("CPTY", CreditCurve::new(0.02, 0.4).unwrap())
///     .credit_curve("BANK", CreditCurve::new(0.01, 0.4).unwrap())
///     .counterparty("CPTY")
///     .own("BANK")
///     .build()
///     .unwrap();
///
/// assert_eq!(market.numeraire_curve(), "USD-OIS");
/// ```
#[derive(Debug, Clone)]
pub struct MarketDataBuilder {
    base_date: NaiveDate,
    base_currency: Currency,
    numeraire_curve: Option<String>,
    discount_curves: Vec<(String, f64)>,
    forward_curves: Vec<(String, f64)>,
    credit_curves: Vec<(String, CreditCurve)>,
    fx_spots: Vec<(Currency, f64)>,
    counterparty_curve: Option<String>,
    own_curve: Option<String>,
    lend_spread: f64,
    borrow_spread: f64,
}

impl MarketDataBuilder {
    /// Creates an empty builder.
    pub fn new(base_date: NaiveDate, base_currency: Currency) -> Self {
        Self {
            base_date,
            base_currency,
            numeraire_curve: None,
            discount_curves: Vec::new(),
            forward_curves: Vec::new(),
            credit_curves: Vec::new(),
            fx_spots: Vec::new(),
            counterparty_curve: None,
            own_curve: None,
            lend_spread: 0.0,
            borrow_spread: 0.0,
        }
    }

    /// Adds a flat discount curve.
    pub fn discount_curve(mut self, name: impl Into<String>, rate: f64) -> Self {
        self.discount_curves.push((name.into(), rate));
        self
    }

    /// Adds a flat forward curve.
    pub fn forward_curve(mut self, name: impl Into<String>, rate: f64) -> Self {
        self.forward_curves.push((name.into(), rate));
        self
    }

    /// Adds a credit curve.
    pub fn credit_curve(mut self, name: impl Into<String>, curve: CreditCurve) -> Self {
        self.credit_curves.push((name.into(), curve));
        self
    }

    /// Adds an FX spot: units of base currency per unit of `currency`.
    pub fn fx_spot(mut self, currency: Currency, rate: f64) -> Self {
        self.fx_spots.push((currency, rate));
        self
    }

    /// Selects the discount curve defining the numeraire.
    pub fn numeraire_curve(mut self, name: impl Into<String>) -> Self {
        self.numeraire_curve = Some(name.into());
        self
    }

    /// Selects the counterparty credit curve.
    pub fn counterparty(mut self, name: impl Into<String>) -> Self {
        self.counterparty_curve = Some(name.into());
        self
    }

    /// Selects the own credit curve.
    pub fn own(mut self, name: impl Into<String>) -> Self {
        self.own_curve = Some(name.into());
        self
    }

    /// Sets the funding spreads.
    pub fn funding_spreads(mut self, lend: f64, borrow: f64) -> Self {
        self.lend_spread = lend;
        self.borrow_spread = borrow;
        self
    }

    /// Validates and builds the market.
    pub fn build(self) -> Result<MarketData, MarketError> {
        let discount_curves = collect_rates("discount", self.discount_curves)?;
        let forward_curves = collect_rates("forward", self.forward_curves)?;

        let mut credit_curves = HashMap::with_capacity(self.credit_curves.len());
        for (name, curve) in self.credit_curves {
            curve.validate(&name)?;
            if credit_curves.insert(name.clone(), curve).is_some() {
                return Err(MarketError::DuplicateCurve { kind: "credit", name });
            }
        }

        let mut fx_spots = HashMap::with_capacity(self.fx_spots.len());
        for (currency, rate) in self.fx_spots {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(MarketError::InvalidFxSpot {
                    currency: currency.to_string(),
                    rate,
                });
            }
            fx_spots.insert(currency, rate);
        }

        for (what, value) in [
            ("lend spread", self.lend_spread),
            ("borrow spread", self.borrow_spread),
        ] {
            if !value.is_finite() {
                return Err(MarketError::NonFinite {
                    what: what.to_string(),
                    value,
                });
            }
        }

        let numeraire_curve = require(self.numeraire_curve, "numeraire", |name| {
            discount_curves.contains_key(name)
        })?;
        let counterparty_curve = require(self.counterparty_curve, "counterparty credit", |name| {
            credit_curves.contains_key(name)
        })?;
        let own_curve = require(self.own_curve, "own credit", |name| {
            credit_curves.contains_key(name)
        })?;

        Ok(MarketData {
            base_date: self.base_date,
            base_currency: self.base_currency,
            numeraire_curve,
            discount_curves,
            forward_curves,
            credit_curves,
            fx_spots,
            counterparty_curve,
            own_curve,
            lend_spread: self.lend_spread,
            borrow_spread: self.borrow_spread,
        })
    }
}

fn collect_rates(
    kind: &'static str,
    curves: Vec<(String, f64)>,
) -> Result<HashMap<String, f64>, MarketError> {
    let mut out = HashMap::with_capacity(curves.len());
    for (name, rate) in curves {
        if !rate.is_finite() {
            return Err(MarketError::NonFinite {
                what: format!("{} curve '{}' rate", kind, name),
                value: rate,
            });
        }
        if out.insert(name.clone(), rate).is_some() {
            return Err(MarketError::DuplicateCurve { kind, name });
        }
    }
    Ok(out)
}

fn require(
    name: Option<String>,
    kind: &'static str,
    exists: impl Fn(&str) -> bool,
) -> Result<String, MarketError> {
    match name {
        Some(name) if exists(&name) => Ok(name),
        Some(name) => Err(MarketError::MissingCurve { kind, name }),
        None => Err(MarketError::MissingCurve {
            kind,
            name: String::new(),
        }),
    }
}

/// Per-worker simulation state of a market.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MarketState {
    /// Current simulation time τ in years from the base date
    pub time: f64,
    /// Short-rate shift x(τ)
    pub short_rate_shift: f64,
    /// ∫₀^τ x(s) ds
    pub integrated_shift: f64,
}

/// Read access used by valuation graph nodes and pricers.
pub trait MarketView {
    /// Valuation date.
    fn base_date(&self) -> NaiveDate;

    /// Reporting currency.
    fn base_currency(&self) -> Currency;

    /// Returns `true` if `object` can be served.
    fn contains(&self, object: &MarketObject) -> bool;

    /// Deflated discount factor from the base date to `time`.
    fn discount_factor(&self, curve: &str, time: f64) -> Result<f64, SimulationError>;

    /// Simple forward rate over `[start, end]`.
    fn forward_rate(&self, curve: &str, start: f64, end: f64) -> Result<f64, SimulationError>;

    /// Units of base currency per unit of `currency`.
    fn fx_rate(&self, currency: Currency) -> Result<f64, SimulationError>;
}

/// A market environment shared by reference and cloned into each worker.
pub trait MarketEnvironment: MarketView + Clone + Send + Sync {
    /// Returns the environment to its unsimulated state.
    fn conform(&mut self);
}

/// Flat-curve market with a simulated short-rate shift.
#[derive(Debug, Clone)]
pub struct SimulatedMarket {
    data: Arc<MarketData>,
    state: MarketState,
}

impl SimulatedMarket {
    /// Wraps shared market data in its unsimulated state.
    pub fn new(data: Arc<MarketData>) -> Self {
        Self {
            data,
            state: MarketState::default(),
        }
    }

    /// Shared market data.
    #[inline]
    pub fn data(&self) -> &MarketData {
        &self.data
    }

    /// Current simulation state.
    #[inline]
    pub fn state(&self) -> MarketState {
        self.state
    }

    /// Moves the market to a simulated state.
    #[inline]
    pub fn set_state(&mut self, state: MarketState) {
        self.state = state;
    }

    fn shifted_log_discount(&self, rate: f64, time: f64) -> f64 {
        let s = &self.state;
        if time >= s.time {
            -rate * time - s.integrated_shift - s.short_rate_shift * (time - s.time)
        } else if s.time > 0.0 {
            -rate * time - s.integrated_shift * time / s.time
        } else {
            -rate * time
        }
    }
}

impl MarketView for SimulatedMarket {
    fn base_date(&self) -> NaiveDate {
        self.data.base_date
    }

    fn base_currency(&self) -> Currency {
        self.data.base_currency
    }

    fn contains(&self, object: &MarketObject) -> bool {
        self.data.contains(object)
    }

    fn discount_factor(&self, curve: &str, time: f64) -> Result<f64, SimulationError> {
        let rate = self
            .data
            .discount_curves
            .get(curve)
            .ok_or_else(|| missing(MarketObject::DiscountCurve(curve.to_string())))?;
        Ok(self.shifted_log_discount(*rate, time).exp())
    }

    fn forward_rate(&self, curve: &str, start: f64, end: f64) -> Result<f64, SimulationError> {
        let rate = self
            .data
            .forward_curves
            .get(curve)
            .ok_or_else(|| missing(MarketObject::ForwardCurve(curve.to_string())))?;
        let instantaneous = rate + self.state.short_rate_shift;
        let tau = end - start;
        if tau <= 0.0 {
            return Ok(instantaneous);
        }
        Ok(((instantaneous * tau).exp() - 1.0) / tau)
    }

    fn fx_rate(&self, currency: Currency) -> Result<f64, SimulationError> {
        if currency == self.data.base_currency {
            return Ok(1.0);
        }
        self.data
            .fx_spots
            .get(&currency)
            .copied()
            .ok_or_else(|| missing(MarketObject::FxRate(currency)))
    }
}

impl MarketEnvironment for SimulatedMarket {
    fn conform(&mut self) {
        self.state = MarketState::default();
    }
}

fn missing(object: MarketObject) -> SimulationError {
    SimulationError::MissingMarketObject(object.to_string())
}
