//! Check command implementation
//!
//! Validates the configuration and builds the market, portfolio and
//! simulator without simulating anything.

use anyhow::Result;
use ccr_exposure::simulator::ShortRateSimulator;
use ccr_exposure::{MarketView, SimulatedMarket};

use crate::config::RunConfig;

/// Run the check command
pub fn run(config: &RunConfig) -> Result<()> {
    config.validate()?;
    let data = config.market_data()?;
    let portfolio = config.portfolio()?;
    let dates = config.exposure_dates();
    ShortRateSimulator::new(data.base_date(), dates.clone(), config.model)?;

    let market = SimulatedMarket::new(data);
    let mut missing = Vec::new();
    for trade in &portfolio {
        for object in trade.required_objects() {
            if !market.contains(&object) {
                missing.push(format!("{}: {}", trade.id(), object));
            }
        }
    }

    println!("Configuration OK");
    println!("  Workers:       {} ({} resolved)", config.parallel.workers, config.parallel.resolved_workers());
    println!("  Paths:         {}", config.simulation.paths);
    println!("  Seed:          {}", config.simulation.seed);
    println!("  Base date:     {}", market.base_date());
    println!("  Exposure dates: {} ({} to {})", dates.len(), dates[0], dates[dates.len() - 1]);
    println!("  Trades:        {}", portfolio.len());
    println!("  Netting sets:  {}", config.netting_count());

    if !missing.is_empty() {
        anyhow::bail!("missing market objects:\n  {}", missing.join("\n  "));
    }
    Ok(())
}
