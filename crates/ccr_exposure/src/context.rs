//! Per-worker simulation context.
//!
//! One context lives for one worker's share of an
//! [`ExposureCalculator`](crate::ExposureCalculator) call. It owns a clone of
//! the market environment and of the random stream, the worker's valuation
//! graph with one [`PvEvaluator`] per trade, and the finished path records.
//! Nothing in it is shared with other workers.

use chrono::NaiveDate;
use tracing::trace;

use crate::error::SimulationError;
use crate::evaluator::PvEvaluator;
use crate::graph::{Resettable, ValuationGraph};
use crate::market::MarketEnvironment;
use crate::path_values::{PathValuesBuilder, SimulatedPathValues};
use crate::pricer::Pricer;
use crate::simulator::{RandomStream, SimulatedPath, Simulator};

/// Worker-private simulation state.
#[derive(Debug)]
pub struct SimulationContext<M> {
    market: M,
    stream: RandomStream,
    graph: ValuationGraph,
    evaluators: Vec<PvEvaluator>,
    netting_count: usize,
    netted: Vec<f64>,
    results: Vec<SimulatedPathValues>,
    skipped: usize,
}

impl<M: MarketEnvironment> SimulationContext<M> {
    /// Clones `market` and `stream` and builds the evaluators of `portfolio`.
    pub fn new(
        market: &M,
        stream: &RandomStream,
        portfolio: &[Box<dyn Pricer>],
        netting_count: usize,
    ) -> Self {
        let mut market = market.clone();
        market.conform();

        let base_date = market.base_date();
        let mut graph = ValuationGraph::new();
        let evaluators = portfolio
            .iter()
            .map(|pricer| PvEvaluator::new(pricer.as_ref(), base_date, &mut graph))
            .collect();
        trace!(trades = portfolio.len(), nodes = graph.len(), "Simulation context built");

        Self {
            market,
            stream: stream.clone(),
            graph,
            evaluators,
            netting_count,
            netted: vec![0.0; netting_count],
            results: Vec::new(),
            skipped: 0,
        }
    }

    /// Valuation graph shared by this worker's evaluators.
    pub fn graph(&self) -> &ValuationGraph {
        &self.graph
    }

    /// Simulates path `path` over `dates` and records its values.
    ///
    /// A path the simulator rejects is counted as skipped and leaves no
    /// record.
    pub fn simulate_path<S>(
        &mut self,
        simulator: &S,
        path: usize,
        dates: &[NaiveDate],
        unilateral: bool,
    ) -> Result<(), SimulationError>
    where
        S: Simulator<Market = M>,
    {
        self.market.conform();
        let Some(simulated) = simulator.simulated_path(path, &mut self.stream) else {
            self.skipped += 1;
            trace!(path, "Path rejected by simulator");
            return Ok(());
        };

        let mut record = PathValuesBuilder::new(path, self.netting_count, dates.len());
        for (i, &date) in dates.iter().enumerate() {
            self.graph.reset();
            let factors = simulated.evolve(i, date, &mut self.market, unilateral)?;

            self.netted.fill(0.0);
            for eval in &self.evaluators {
                let pv = eval.fast_pv(&self.graph, &self.market, i, date)?;
                self.netted[eval.netting_set()] += pv * factors.discount_factor;
            }
            if let Some(netting_set) = self.netted.iter().position(|v| !v.is_finite()) {
                return Err(SimulationError::NonFiniteValue {
                    path,
                    date,
                    netting_set,
                });
            }
            record.push_date(factors, &self.netted);
        }

        self.results.push(record.build());
        Ok(())
    }

    /// Consumes the context, returning its path records and skipped count.
    pub fn into_results(self) -> (Vec<SimulatedPathValues>, usize) {
        (self.results, self.skipped)
    }
}
