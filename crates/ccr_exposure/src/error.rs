//! Error types for exposure simulation.
//!
//! - [`MarketError`]: invalid market definitions, raised while building
//!   [`MarketData`](crate::market::MarketData)
//! - [`SimulationError`]: failures inside one worker while simulating a path
//! - [`ExposureError`]: what [`ExposureCalculator`](crate::ExposureCalculator)
//!   returns; either rejected input or the aggregate of worker failures

use ccr_parallel::AggregateFailure;
use chrono::NaiveDate;
use thiserror::Error;

/// Market definition errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarketError {
    /// Currency code not recognised.
    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),

    /// A curve was registered twice under the same name.
    #[error("Duplicate {kind} curve '{name}'")]
    DuplicateCurve {
        /// Curve family
        kind: &'static str,
        /// Curve name
        name: String,
    },

    /// A referenced curve does not exist.
    #[error("Missing {kind} curve '{name}'")]
    MissingCurve {
        /// Curve family
        kind: &'static str,
        /// Curve name
        name: String,
    },

    /// Credit curve parameters out of range.
    #[error("Invalid credit curve '{name}': {reason}")]
    InvalidCreditCurve {
        /// Curve name
        name: String,
        /// What is wrong
        reason: String,
    },

    /// FX spot must be finite and positive.
    #[error("Invalid FX spot for {currency}: {rate}")]
    InvalidFxSpot {
        /// Currency code
        currency: String,
        /// Offending rate
        rate: f64,
    },

    /// Rate or spread is not finite.
    #[error("Non-finite {what}: {value}")]
    NonFinite {
        /// Field description
        what: String,
        /// Offending value
        value: f64,
    },
}

/// Failure while simulating one path inside a worker.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimulationError {
    /// A node or pricer referenced a market object the environment lacks.
    #[error("Market object not found: {0}")]
    MissingMarketObject(String),

    /// Risk-factor evolution failed.
    #[error("Path {path}: evolution to {date} failed: {reason}")]
    Evolution {
        /// Path index
        path: usize,
        /// Target exposure date
        date: NaiveDate,
        /// What went wrong
        reason: String,
    },

    /// An evaluator was asked for a date other than the one precomputed at
    /// that exposure index.
    #[error("Exposure index {index} is {expected}, not {actual}")]
    ExposureDateMismatch {
        /// Exposure index
        index: usize,
        /// Date precomputed for the index
        expected: NaiveDate,
        /// Date passed by the caller
        actual: NaiveDate,
    },

    /// A valuation produced a NaN or infinite value.
    #[error("Path {path}: non-finite value for netting set {netting_set} at {date}")]
    NonFiniteValue {
        /// Path index
        path: usize,
        /// Exposure date
        date: NaiveDate,
        /// Netting set index
        netting_set: usize,
    },
}

/// Errors returned by the exposure calculation.
#[derive(Debug, Error)]
pub enum ExposureError {
    /// Input rejected before any worker started.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// One or more workers failed.
    #[error("Exposure simulation failed: {0}")]
    Simulation(#[from] AggregateFailure<SimulationError>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccr_parallel::WorkerFailure;

    #[test]
    fn test_market_error_display() {
        let err = MarketError::MissingCurve {
            kind: "discount",
            name: "USD-SOFR".to_string(),
        };
        assert_eq!(err.to_string(), "Missing discount curve 'USD-SOFR'");
    }

    #[test]
    fn test_exposure_error_from_aggregate() {
        let aggregate = AggregateFailure::new(vec![WorkerFailure::Action {
            worker: 1,
            source: SimulationError::MissingMarketObject("EUR fx".to_string()),
        }]);
        let err: ExposureError = aggregate.into();
        let text = err.to_string();
        assert!(text.contains("1 parallel worker(s) failed"));
        assert!(text.contains("Market object not found: EUR fx"));
    }
}
