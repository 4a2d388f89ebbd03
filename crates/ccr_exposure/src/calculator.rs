//! Monte-Carlo exposure simulation driver.
//!
//! [`ExposureCalculator::calculate_exposures`] validates its inputs, stamps
//! the exposure dates onto every trade, then distributes the paths over the
//! parallel executor. Each worker builds one
//! [`SimulationContext`](crate::SimulationContext) and simulates the paths it
//! claims; the contexts' records are concatenated at the end. Any worker
//! failure fails the whole call.

use std::sync::Arc;
use std::time::Instant;

use ccr_parallel::ParallelExecutor;
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::context::SimulationContext;
use crate::error::ExposureError;
use crate::market::MarketView;
use crate::path_values::SimulatedPathValues;
use crate::pricer::Pricer;
use crate::simulator::{RandomStream, Simulator};

/// Exposure simulation driver.
#[derive(Debug, Clone)]
pub struct ExposureCalculator {
    executor: Arc<ParallelExecutor>,
    path_count: usize,
}

impl ExposureCalculator {
    /// Creates a driver simulating `path_count` paths on `executor`.
    pub fn new(executor: Arc<ParallelExecutor>, path_count: usize) -> Self {
        Self {
            executor,
            path_count,
        }
    }

    /// Executor the paths run on.
    #[inline]
    pub fn executor(&self) -> &Arc<ParallelExecutor> {
        &self.executor
    }

    /// Number of paths simulated per call.
    #[inline]
    pub fn path_count(&self) -> usize {
        self.path_count
    }

    /// Simulates every path and returns one record per accepted path.
    ///
    /// Records come back in no particular order. Each holds
    /// `exposure_dates.len() × netting_count` values deflated to the base
    /// date.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the path or netting count is zero, the exposure
    ///   dates are empty, not strictly increasing, precede the base date or
    ///   differ from the simulator's dates, a trade's netting set is out of
    ///   range, or a trade depends on a market object the market lacks
    /// - `Simulation` if one or more workers failed
    #[allow(clippy::too_many_arguments)]
    pub fn calculate_exposures<S: Simulator>(
        &self,
        exposure_dates: &[NaiveDate],
        simulator: &S,
        rng_seed: u64,
        market: &S::Market,
        netting_count: usize,
        portfolio: &mut [Box<dyn Pricer>],
        unilateral: bool,
    ) -> Result<Vec<SimulatedPathValues>, ExposureError> {
        self.validate(exposure_dates, simulator, market, netting_count, portfolio)?;

        for pricer in portfolio.iter_mut() {
            pricer.set_exposure_dates(exposure_dates);
        }
        let portfolio: &[Box<dyn Pricer>] = portfolio;
        let stream = RandomStream::new(rng_seed);

        debug!(
            paths = self.path_count,
            dates = exposure_dates.len(),
            trades = portfolio.len(),
            netting_count,
            "Starting exposure simulation"
        );
        let started = Instant::now();

        let mut results = Vec::with_capacity(self.path_count);
        let mut skipped = 0;
        self.executor.for_range(
            0..self.path_count,
            || SimulationContext::new(market, &stream, portfolio, netting_count),
            |path, ctx: &mut SimulationContext<S::Market>| {
                ctx.simulate_path(simulator, path, exposure_dates, unilateral)
            },
            |ctx| {
                let (records, rejected) = ctx.into_results();
                results.extend(records);
                skipped += rejected;
            },
        )?;

        info!(
            paths = self.path_count,
            skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Exposure simulation finished"
        );
        Ok(results)
    }

    fn validate<S: Simulator>(
        &self,
        exposure_dates: &[NaiveDate],
        simulator: &S,
        market: &S::Market,
        netting_count: usize,
        portfolio: &[Box<dyn Pricer>],
    ) -> Result<(), ExposureError> {
        let invalid = |msg: String| Err(ExposureError::InvalidInput(msg));

        if self.path_count == 0 {
            return invalid("path count must be at least 1".to_string());
        }
        if netting_count == 0 {
            return invalid("netting count must be at least 1".to_string());
        }
        let Some(first) = exposure_dates.first() else {
            return invalid("no exposure dates".to_string());
        };
        if *first < market.base_date() {
            return invalid(format!(
                "exposure date {} precedes base date {}",
                first,
                market.base_date()
            ));
        }
        if exposure_dates.windows(2).any(|w| w[0] >= w[1]) {
            return invalid("exposure dates must be strictly increasing".to_string());
        }
        if simulator.simulation_dates() != exposure_dates {
            return invalid("simulator dates differ from exposure dates".to_string());
        }

        for pricer in portfolio {
            if pricer.netting_set() >= netting_count {
                return invalid(format!(
                    "trade {} in netting set {} but only {} netting sets",
                    pricer.id(),
                    pricer.netting_set(),
                    netting_count
                ));
            }
            if let Some(object) = pricer
                .required_objects()
                .into_iter()
                .find(|object| !market.contains(object))
            {
                return invalid(format!("trade {} depends on missing {}", pricer.id(), object));
            }
        }
        Ok(())
    }
}
