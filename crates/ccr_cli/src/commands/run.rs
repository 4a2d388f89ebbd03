//! Run command implementation
//!
//! Simulates the configured portfolio and prints one exposure profile per
//! netting set.

use std::sync::Arc;

use anyhow::Result;
use ccr_exposure::simulator::ShortRateSimulator;
use ccr_exposure::{ExposureCalculator, ExposureProfile, ProfileAggregator, SimulatedMarket};
use ccr_parallel::ParallelExecutor;
use chrono::NaiveDate;
use tracing::info;

use crate::config::RunConfig;

/// Run the simulation
pub fn run(config: &RunConfig) -> Result<()> {
    config.validate()?;

    let data = config.market_data()?;
    let mut portfolio = config.portfolio()?;
    let dates = config.exposure_dates();
    let simulator = ShortRateSimulator::new(data.base_date(), dates.clone(), config.model)?;
    let market = SimulatedMarket::new(Arc::clone(&data));
    let netting_count = config.netting_count();

    let executor = Arc::new(ParallelExecutor::new(config.parallel.clone())?);
    info!(
        workers = config.parallel.resolved_workers(),
        paths = config.simulation.paths,
        dates = dates.len(),
        trades = portfolio.len(),
        netting_count,
        "Starting run"
    );

    let calculator = ExposureCalculator::new(Arc::clone(&executor), config.simulation.paths);
    let paths = calculator.calculate_exposures(
        &dates,
        &simulator,
        config.simulation.seed,
        &market,
        netting_count,
        &mut portfolio,
        config.simulation.unilateral,
    )?;

    let aggregator = ProfileAggregator::from_market(config.profile, &data);
    let profiles = aggregator.aggregate_all(&executor, &paths, simulator.times(), netting_count)?;

    for profile in &profiles {
        print_profile(profile, &dates, config.profile.pfe_quantile);
    }
    info!(accepted = paths.len(), "Run complete");
    Ok(())
}

fn print_profile(profile: &ExposureProfile, dates: &[NaiveDate], quantile: f64) {
    println!();
    println!(
        "Netting set {} ({} paths)",
        profile.netting_set, profile.path_count
    );
    println!("┌────────────┬────────┬────────────────┬────────────────┬────────────────┐");
    println!(
        "│ Date       │ Time   │ EE             │ ENE            │ PFE {:>3.0}%       │",
        quantile * 100.0
    );
    println!("├────────────┼────────┼────────────────┼────────────────┼────────────────┤");
    for (i, date) in dates.iter().enumerate() {
        println!(
            "│ {} │ {:>6.3} │ {:>14.2} │ {:>14.2} │ {:>14.2} │",
            date, profile.times[i], profile.ee[i], profile.ene[i], profile.pfe[i]
        );
    }
    println!("└────────────┴────────┴────────────────┴────────────────┴────────────────┘");
    println!("  EPE:           {:>14.2}", profile.epe);
    println!("  Effective EPE: {:>14.2}", profile.effective_epe);
    println!("  Peak PFE:      {:>14.2}", profile.peak_pfe);
    println!("  CVA:           {:>14.2}", profile.cva);
    println!("  DVA:           {:>14.2}", profile.dva);
}
