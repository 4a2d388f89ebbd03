//! # CCR Exposure
//!
//! Monte-Carlo counterparty exposure simulation built on
//! [`ccr_parallel`].
//!
//! For every simulated path each worker evolves its own copy of the market
//! environment through the exposure dates, values the portfolio through a
//! cached valuation graph and records the deflated value of every netting
//! set. The records feed EE, PFE, EPE and CVA/DVA aggregation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ ExposureCalculator (calculator)              │
//! │   └─ ParallelExecutor::for_range over paths  │
//! │        └─ SimulationContext (context)        │
//! │             ├─ SimulatedMarket (market)      │
//! │             ├─ Simulator / path (simulator)  │
//! │             ├─ ValuationGraph (graph)        │
//! │             └─ PvEvaluator (evaluator)       │
//! │ SimulatedPathValues (path_values)            │
//! │ ProfileAggregator (profile)                  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use ccr_exposure::market::{CreditCurve, MarketData, SimulatedMarket};
//! use ccr_exposure::pricer::{Cashflow, Pricer, ScheduledTrade};
//! use ccr_exposure::simulator::{ShortRateParams, ShortRateSimulator};
//! use ccr_exposure::types::Currency;
//! use ccr_exposure::{ExposureCalculator, ProfileAggregator, ProfileSettings};
//! use ccr_parallel::{ParallelConfig, ParallelExecutor, WorkerAllocation};
//! use chrono::NaiveDate;
//!
//! let base = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
//! let data = Arc::new(
//!     MarketData::builder(base, Currency::USD)
//!         .discount_curve("USD-OIS", 0.03)
//!         .credit_curve("CPTY", CreditCurve::new(0.02, 0.4).unwrap())
//!         .credit_curve("BANK", CreditCurve::new(0.01, 0.4).unwrap())
//!         .numeraire_curve("USD-OIS")
//!         .counterparty("CPTY")
//!         .own("BANK")
//!         .build()
//!         .unwrap(),
//! );
//! let market = SimulatedMarket::new(Arc::clone(&data));
//!
//! let dates: Vec<NaiveDate> = (0..=3)
//!     .map(|y| NaiveDate::from_ymd_opt(2025 + y, 1, 1).unwrap())
//!     .collect();
//! let simulator =
//!     ShortRateSimulator::new(base, dates.clone(), ShortRateParams::default()).unwrap();
//!
//! let bond = ScheduledTrade::builder("BOND")
//!     .discount_curve("USD-OIS")
//!     .cashflows([Cashflow::fixed(dates[0], dates[3], 1.0)])
//!     .build()
//!     .unwrap();
//! let mut portfolio: Vec<Box<dyn Pricer>> = vec![Box::new(bond)];
//!
//! let executor = Arc::new(
//!     ParallelExecutor::new(ParallelConfig::with_workers(WorkerAllocation::Fixed(2))).unwrap(),
//! );
//! let calculator = ExposureCalculator::new(Arc::clone(&executor), 64);
//! let paths = calculator
//!     .calculate_exposures(&dates, &simulator, 42, &market, 1, &mut portfolio, false)
//!     .unwrap();
//! assert_eq!(paths.len(), 64);
//!
//! let aggregator = ProfileAggregator::from_market(ProfileSettings::default(), &data);
//! let profile = aggregator
//!     .aggregate(&executor, &paths, simulator.times(), 0)
//!     .unwrap();
//! assert!(profile.cva > 0.0);
//! ```

#![warn(missing_docs)]

pub mod calculator;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod market;
pub mod path_values;
pub mod pricer;
pub mod profile;
pub mod simulator;
pub mod types;

pub use calculator::ExposureCalculator;
pub use context::SimulationContext;
pub use error::{ExposureError, MarketError, SimulationError};
pub use evaluator::{PvEvaluator, PvParameter};
pub use graph::{Node, NodeId, Resettable, ValuationGraph};
pub use market::{MarketEnvironment, MarketObject, MarketView, SimulatedMarket};
pub use path_values::{PathValuesBuilder, SimulatedPathValues};
pub use pricer::{Cashflow, CashflowKind, Pricer, ScheduledTrade};
pub use profile::{ExposureProfile, ProfileAggregator, ProfileSettings};
pub use simulator::{RandomStream, RiskFactors, SimulatedPath, Simulator};
pub use types::Currency;
