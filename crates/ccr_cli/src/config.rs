//! Run configuration.
//!
//! A run is described by one TOML file:
//!
//! ```toml
//! log_level = "info"
//!
//! [parallel]
//! workers = "automatic"
//!
//! [simulation]
//! paths = 10000
//! seed = 42
//! horizon_months = 60
//! step_months = 3
//!
//! [market]
//! base_date = "2025-01-02"
//! base_currency = "USD"
//! numeraire = "USD-OIS"
//! counterparty = "CPTY"
//! own = "BANK"
//! discount_curves = [{ name = "USD-OIS", rate = 0.03 }]
//! credit_curves = [{ name = "CPTY", hazard_rate = 0.02, recovery_rate = 0.4 }]
//!
//! [[trades]]
//! id = "SWP-1"
//! discount_curve = "USD-OIS"
//! start = "2025-01-02"
//! end = "2030-01-02"
//! legs = [{ type = "fixed", rate = 0.03, frequency_months = 12, pay = true }]
//! ```
//!
//! Environment variables prefixed with `CCR_` override file values; see
//! [`RunConfig::with_env_override`].

use std::path::Path;
use std::sync::Arc;

use ccr_exposure::market::{CreditCurve, MarketData};
use ccr_exposure::pricer::{regular_periods, Cashflow, CashflowKind, Pricer, ScheduledTrade};
use ccr_exposure::simulator::ShortRateParams;
use ccr_exposure::types::{year_fraction, Currency};
use ccr_exposure::{ExposureError, MarketError, ProfileSettings};
use ccr_parallel::ParallelConfig;
use chrono::{Months, NaiveDate};
use serde::Deserialize;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Cannot read {path}: {reason}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        reason: String,
    },

    /// TOML could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// A value failed validation
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Parallel section invalid
    #[error(transparent)]
    Parallel(#[from] ccr_parallel::ConfigError),
}

/// Complete run configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Log filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Executor settings
    #[serde(default)]
    pub parallel: ParallelConfig,
    /// Path simulation settings
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Short-rate model parameters
    #[serde(default)]
    pub model: ShortRateParams,
    /// Profile statistics settings
    #[serde(default)]
    pub profile: ProfileSettings,
    /// Market definition
    pub market: MarketConfig,
    /// Portfolio
    #[serde(default)]
    pub trades: Vec<TradeConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Path simulation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of Monte-Carlo paths
    pub paths: usize,
    /// Root random seed
    pub seed: u64,
    /// Ignore own default
    pub unilateral: bool,
    /// Exposure grid length in months
    pub horizon_months: u32,
    /// Exposure grid step in months
    pub step_months: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            paths: 10_000,
            seed: 42,
            unilateral: false,
            horizon_months: 60,
            step_months: 3,
        }
    }
}

/// Named flat curve.
#[derive(Debug, Clone, Deserialize)]
pub struct CurveConfig {
    /// Curve name
    pub name: String,
    /// Continuously compounded rate
    pub rate: f64,
}

/// Named flat hazard-rate curve.
#[derive(Debug, Clone, Deserialize)]
pub struct CreditConfig {
    /// Curve name
    pub name: String,
    /// Hazard rate
    pub hazard_rate: f64,
    /// Recovery rate
    pub recovery_rate: f64,
}

/// FX spot into the base currency.
#[derive(Debug, Clone, Deserialize)]
pub struct FxConfig {
    /// Foreign currency
    pub currency: Currency,
    /// Units of base currency per unit of `currency`
    pub rate: f64,
}

/// Market definition.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    /// Valuation date
    pub base_date: NaiveDate,
    /// Reporting currency
    pub base_currency: Currency,
    /// Numeraire discount curve
    pub numeraire: String,
    /// Counterparty credit curve
    pub counterparty: String,
    /// Own credit curve
    pub own: String,
    /// Discount curves
    #[serde(default)]
    pub discount_curves: Vec<CurveConfig>,
    /// Projection curves
    #[serde(default)]
    pub forward_curves: Vec<CurveConfig>,
    /// Credit curves
    #[serde(default)]
    pub credit_curves: Vec<CreditConfig>,
    /// FX spots
    #[serde(default)]
    pub fx_spots: Vec<FxConfig>,
    /// Funding spread on cash lent
    #[serde(default)]
    pub lend_spread: f64,
    /// Funding spread on cash borrowed
    #[serde(default)]
    pub borrow_spread: f64,
}

/// Coupon definition of a leg.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LegKind {
    /// Fixed rate
    Fixed {
        /// Annual rate
        rate: f64,
    },
    /// Floating rate
    Floating {
        /// Projection curve
        curve: String,
        /// Spread over the forward rate
        #[serde(default)]
        spread: f64,
    },
}

/// One leg of a trade.
#[derive(Debug, Clone, Deserialize)]
pub struct LegConfig {
    /// Coupon definition
    #[serde(flatten)]
    pub kind: LegKind,
    /// Payment frequency in months
    #[serde(default = "default_frequency")]
    pub frequency_months: u32,
    /// Whether the leg is paid
    #[serde(default)]
    pub pay: bool,
}

fn default_frequency() -> u32 {
    12
}

/// Trade definition.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeConfig {
    /// Identifier
    pub id: String,
    /// Settlement currency
    #[serde(default = "default_currency")]
    pub currency: Currency,
    /// Notional
    #[serde(default = "default_notional")]
    pub notional: f64,
    /// Netting set index
    #[serde(default)]
    pub netting_set: usize,
    /// Discount curve
    pub discount_curve: String,
    /// Start of the first accrual period
    pub start: NaiveDate,
    /// Maturity
    pub end: NaiveDate,
    /// Mutual break date
    #[serde(default)]
    pub break_date: Option<NaiveDate>,
    /// Keep accrued interest in the forward value
    #[serde(default = "default_true")]
    pub discount_accrued: bool,
    /// Legs
    pub legs: Vec<LegConfig>,
}

fn default_currency() -> Currency {
    Currency::USD
}

fn default_notional() -> f64 {
    1_000_000.0
}

fn default_true() -> bool {
    true
}

impl TradeConfig {
    fn cashflows(&self) -> Vec<Cashflow> {
        let mut flows = Vec::new();
        for leg in &self.legs {
            let sign = if leg.pay { -1.0 } else { 1.0 };
            for (s, e) in regular_periods(self.start, self.end, leg.frequency_months) {
                let cf = match &leg.kind {
                    LegKind::Fixed { rate } => Cashflow::fixed(s, e, sign * rate * year_fraction(s, e)),
                    LegKind::Floating { curve, spread } => Cashflow {
                        pay_date: e,
                        accrual_start: s,
                        accrual_end: e,
                        kind: CashflowKind::Floating {
                            curve: curve.clone(),
                            spread: *spread,
                            year_fraction: sign * year_fraction(s, e),
                        },
                    },
                };
                flows.push(cf);
            }
        }
        flows
    }

    /// Builds the trade.
    pub fn build(&self) -> Result<ScheduledTrade, ExposureError> {
        let mut builder = ScheduledTrade::builder(self.id.as_str())
            .currency(self.currency)
            .notional(self.notional)
            .netting_set(self.netting_set)
            .discount_curve(self.discount_curve.as_str())
            .discount_accrued(self.discount_accrued)
            .cashflows(self.cashflows());
        if let Some(brk) = self.break_date {
            builder = builder.break_date(brk);
        }
        builder.build()
    }
}

impl RunConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Loads a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Applies `CCR_*` environment overrides.
    ///
    /// Recognised: `CCR_LOG_LEVEL`, `CCR_PATHS`, `CCR_SEED`, plus the
    /// `CCR_PARALLEL_*` variables of [`ParallelConfig::with_env_override`].
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        if let Ok(level) = std::env::var("CCR_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Ok(paths) = std::env::var("CCR_PATHS") {
            self.simulation.paths = parse_env("CCR_PATHS", &paths)?;
        }
        if let Ok(seed) = std::env::var("CCR_SEED") {
            self.simulation.seed = parse_env("CCR_SEED", &seed)?;
        }
        self.parallel = self.parallel.with_env_override()?;
        Ok(self)
    }

    /// Checks everything that can be checked before building the run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parallel.validate()?;

        let sim = &self.simulation;
        if sim.paths == 0 {
            return Err(ConfigError::Invalid("simulation.paths must be positive".to_string()));
        }
        if sim.step_months == 0 || sim.horizon_months < sim.step_months {
            return Err(ConfigError::Invalid(format!(
                "exposure grid step {} months does not fit horizon {} months",
                sim.step_months, sim.horizon_months
            )));
        }
        let q = self.profile.pfe_quantile;
        if !(0.0..=1.0).contains(&q) {
            return Err(ConfigError::Invalid(format!("profile.pfe_quantile {} outside [0, 1]", q)));
        }
        if self.trades.is_empty() {
            return Err(ConfigError::Invalid("no trades".to_string()));
        }
        for trade in &self.trades {
            if trade.end <= trade.start {
                return Err(ConfigError::Invalid(format!("trade {} ends before it starts", trade.id)));
            }
            if trade.legs.is_empty() {
                return Err(ConfigError::Invalid(format!("trade {} has no legs", trade.id)));
            }
            if trade.legs.iter().any(|leg| leg.frequency_months == 0) {
                return Err(ConfigError::Invalid(format!("trade {} has a zero frequency leg", trade.id)));
            }
        }
        Ok(())
    }

    /// Builds the shared market data.
    pub fn market_data(&self) -> Result<Arc<MarketData>, MarketError> {
        let m = &self.market;
        let mut builder = MarketData::builder(m.base_date, m.base_currency)
            .numeraire_curve(m.numeraire.as_str())
            .counterparty(m.counterparty.as_str())
            .own(m.own.as_str())
            .funding_spreads(m.lend_spread, m.borrow_spread);
        for curve in &m.discount_curves {
            builder = builder.discount_curve(curve.name.as_str(), curve.rate);
        }
        for curve in &m.forward_curves {
            builder = builder.forward_curve(curve.name.as_str(), curve.rate);
        }
        for credit in &m.credit_curves {
            builder = builder.credit_curve(
                credit.name.as_str(),
                CreditCurve::new(credit.hazard_rate, credit.recovery_rate)?,
            );
        }
        for fx in &m.fx_spots {
            builder = builder.fx_spot(fx.currency, fx.rate);
        }
        Ok(Arc::new(builder.build()?))
    }

    /// Exposure dates from the base date every `step_months` to the horizon.
    pub fn exposure_dates(&self) -> Vec<NaiveDate> {
        let sim = &self.simulation;
        let base = self.market.base_date;
        (0..=sim.horizon_months / sim.step_months.max(1))
            .filter_map(|k| base.checked_add_months(Months::new(k * sim.step_months)))
            .collect()
    }

    /// Builds the portfolio.
    pub fn portfolio(&self) -> Result<Vec<Box<dyn Pricer>>, ExposureError> {
        self.trades
            .iter()
            .map(|t| t.build().map(|trade| Box::new(trade) as Box<dyn Pricer>))
            .collect()
    }

    /// Number of netting sets referenced by the portfolio.
    pub fn netting_count(&self) -> usize {
        self.trades.iter().map(|t| t.netting_set + 1).max().unwrap_or(1)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{}='{}'", name, value)))
}
