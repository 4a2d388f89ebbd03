//! Exposure profile aggregation.
//!
//! Turns the unordered set of [`SimulatedPathValues`] into per-netting-set
//! statistics. Values are deflated to the base date, so every figure here is
//! in base-date terms.
//!
//! - EE(t) = E[max(V(t), 0)], ENE(t) = E[max(-V(t), 0)]
//! - PFE(t) = quantile of max(V(t), 0)
//! - EPE = time average of EE (trapezoidal)
//! - Effective EPE = time average of the running maximum of EE up to a horizon
//! - CVA = LGD_c × E[Σ_t max(V(t), 0) × ΔPD_c(t) × S_own(t)]
//! - DVA = LGD_o × E[Σ_t max(-V(t), 0) × ΔPD_own(t)]
//!
//! Path statistics are order independent and computed with the parallel
//! executor's `reduce`.

use std::convert::Infallible;

use ccr_parallel::{AggregateFailure, ParallelExecutor};
use serde::Deserialize;

use crate::error::{ExposureError, SimulationError};
use crate::market::MarketData;
use crate::path_values::SimulatedPathValues;

/// Profile aggregation settings.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProfileSettings {
    /// PFE confidence level
    pub pfe_quantile: f64,
    /// Horizon of the effective EPE in years
    pub effective_epe_horizon: f64,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            pfe_quantile: 0.95,
            effective_epe_horizon: 1.0,
        }
    }
}

/// Exposure statistics of one netting set.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureProfile {
    /// Netting set index
    pub netting_set: usize,
    /// Number of paths aggregated
    pub path_count: usize,
    /// Exposure times in years from the base date
    pub times: Vec<f64>,
    /// Expected exposure per date
    pub ee: Vec<f64>,
    /// Expected negative exposure per date
    pub ene: Vec<f64>,
    /// Potential future exposure per date
    pub pfe: Vec<f64>,
    /// Time-averaged EE
    pub epe: f64,
    /// Time-averaged non-decreasing EE up to the horizon
    pub effective_epe: f64,
    /// Maximum PFE
    pub peak_pfe: f64,
    /// Credit valuation adjustment
    pub cva: f64,
    /// Debit valuation adjustment
    pub dva: f64,
}

/// Per-worker accumulator.
#[derive(Debug, Clone)]
struct Moments {
    weight: f64,
    ee: Vec<f64>,
    ene: Vec<f64>,
    cva: f64,
    dva: f64,
}

impl Moments {
    fn new(dates: usize) -> Self {
        Self {
            weight: 0.0,
            ee: vec![0.0; dates],
            ene: vec![0.0; dates],
            cva: 0.0,
            dva: 0.0,
        }
    }

    fn add_path(&mut self, path: &SimulatedPathValues, netting_set: usize) {
        let w = path.weight();
        self.weight += w;
        for (d, value) in path.netting_values(netting_set).enumerate() {
            let factors = path.risk_factors(d);
            let positive = value.max(0.0);
            let negative = (-value).max(0.0);
            self.ee[d] += w * positive;
            self.ene[d] += w * negative;
            self.cva += w * positive * factors.cpty_default_factor * factors.survival_factor;
            self.dva += w * negative * factors.own_default_factor;
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.weight += other.weight;
        for (a, b) in self.ee.iter_mut().zip(&other.ee) {
            *a += b;
        }
        for (a, b) in self.ene.iter_mut().zip(&other.ene) {
            *a += b;
        }
        self.cva += other.cva;
        self.dva += other.dva;
        self
    }
}

/// Aggregates simulated paths into exposure profiles.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileAggregator {
    settings: ProfileSettings,
    cpty_lgd: f64,
    own_lgd: f64,
}

impl ProfileAggregator {
    /// Creates an aggregator with explicit loss-given-default rates.
    pub fn new(settings: ProfileSettings, cpty_lgd: f64, own_lgd: f64) -> Self {
        Self {
            settings,
            cpty_lgd,
            own_lgd,
        }
    }

    /// Takes the LGDs from the market's counterparty and own credit curves.
    pub fn from_market(settings: ProfileSettings, market: &MarketData) -> Self {
        Self::new(settings, market.counterparty().lgd(), market.own().lgd())
    }

    /// Settings in use.
    pub fn settings(&self) -> &ProfileSettings {
        &self.settings
    }

    /// Profile of `netting_set` over `paths`.
    ///
    /// `times` holds the exposure times in years, one per date of every
    /// path. An empty path set yields an all-zero profile.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if a path's shape disagrees with `times` or the
    /// netting set index; `Simulation` if a worker panicked.
    pub fn aggregate(
        &self,
        executor: &ParallelExecutor,
        paths: &[SimulatedPathValues],
        times: &[f64],
        netting_set: usize,
    ) -> Result<ExposureProfile, ExposureError> {
        let dates = times.len();
        if let Some(bad) = paths
            .iter()
            .find(|p| p.date_count() != dates || netting_set >= p.netting_count())
        {
            return Err(ExposureError::InvalidInput(format!(
                "path {} has {} dates and {} netting sets; expected {} dates and netting set {}",
                bad.path_index(),
                bad.date_count(),
                bad.netting_count(),
                dates,
                netting_set
            )));
        }

        let moments = executor
            .reduce(
                0..paths.len(),
                || Moments::new(dates),
                |i, acc: &mut Moments| {
                    acc.add_path(&paths[i], netting_set);
                    Ok::<_, Infallible>(())
                },
                Moments::merge,
            )
            .map_err(absurd)?;

        let mean = |v: f64| if moments.weight > 0.0 { v / moments.weight } else { 0.0 };
        let ee: Vec<f64> = moments.ee.iter().map(|&v| mean(v)).collect();
        let ene: Vec<f64> = moments.ene.iter().map(|&v| mean(v)).collect();
        let pfe = self.pfe(executor, paths, dates, netting_set)?;

        Ok(ExposureProfile {
            netting_set,
            path_count: paths.len(),
            epe: time_average(&ee, times),
            effective_epe: effective_epe(&ee, times, self.settings.effective_epe_horizon),
            peak_pfe: pfe.iter().copied().fold(0.0_f64, f64::max),
            cva: self.cpty_lgd * mean(moments.cva),
            dva: self.own_lgd * mean(moments.dva),
            times: times.to_vec(),
            ee,
            ene,
            pfe,
        })
    }

    /// Profiles of netting sets `0..netting_count`.
    pub fn aggregate_all(
        &self,
        executor: &ParallelExecutor,
        paths: &[SimulatedPathValues],
        times: &[f64],
        netting_count: usize,
    ) -> Result<Vec<ExposureProfile>, ExposureError> {
        (0..netting_count)
            .map(|g| self.aggregate(executor, paths, times, g))
            .collect()
    }

    fn pfe(
        &self,
        executor: &ParallelExecutor,
        paths: &[SimulatedPathValues],
        dates: usize,
        netting_set: usize,
    ) -> Result<Vec<f64>, ExposureError> {
        let mut pfe = vec![0.0; dates];
        if paths.is_empty() {
            return Ok(pfe);
        }

        let n = paths.len();
        let q = self.settings.pfe_quantile.clamp(0.0, 1.0);
        let idx = (((n as f64 - 1.0) * q).round() as usize).min(n - 1);

        executor
            .for_range(
                0..dates,
                Vec::new,
                |d, local: &mut Vec<(usize, f64)>| {
                    let mut exposures: Vec<f64> = paths.iter().map(|p| p.value(d, netting_set).max(0.0)).collect();
                    exposures.sort_by(f64::total_cmp);
                    local.push((d, exposures[idx]));
                    Ok::<_, Infallible>(())
                },
                |local| {
                    for (d, v) in local {
                        pfe[d] = v;
                    }
                },
            )
            .map_err(absurd)?;
        Ok(pfe)
    }
}

fn absurd(failure: AggregateFailure) -> ExposureError {
    ExposureError::Simulation(failure.map_action_errors(|never| -> SimulationError { match never {} }))
}

/// Trapezoidal time average of `values` over `times`.
pub fn time_average(values: &[f64], times: &[f64]) -> f64 {
    if times.len() < 2 || values.len() != times.len() {
        return values.first().copied().unwrap_or(0.0);
    }

    let mut integral = 0.0;
    for i in 0..times.len() - 1 {
        integral += 0.5 * (values[i] + values[i + 1]) * (times[i + 1] - times[i]);
    }

    let span = times[times.len() - 1] - times[0];
    if span > 0.0 {
        integral / span
    } else {
        values[0]
    }
}

/// Time average of the running maximum of `ee` up to `horizon`.
pub fn effective_epe(ee: &[f64], times: &[f64], horizon: f64) -> f64 {
    if times.is_empty() || ee.len() != times.len() {
        return 0.0;
    }

    let mut running = 0.0_f64;
    let effective: Vec<f64> = ee
        .iter()
        .map(|&v| {
            running = running.max(v);
            running
        })
        .collect();

    let mut integral = 0.0;
    let mut t_end = times[0];
    for i in 0..times.len() - 1 {
        let t0 = times[i];
        if t0 >= horizon {
            break;
        }
        let t1 = times[i + 1].min(horizon);
        let dt = t1 - t0;
        if dt > 0.0 {
            integral += 0.5 * (effective[i] + effective[i + 1]) * dt;
            t_end = t1;
        }
    }

    let span = t_end - times[0];
    if span > 0.0 {
        integral / span
    } else {
        effective[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_values::PathValuesBuilder;
    use crate::simulator::RiskFactors;
    use approx::assert_relative_eq;
    use ccr_parallel::{ParallelConfig, WorkerAllocation};

    fn path(index: usize, values: &[f64]) -> SimulatedPathValues {
        let mut builder = PathValuesBuilder::new(index, 1, values.len());
        for &v in values {
            let factors = RiskFactors {
                cpty_default_factor: 0.1,
                own_default_factor: 0.05,
                survival_factor: 1.0,
                ..RiskFactors::default()
            };
            builder.push_date(factors, &[v]);
        }
        builder.build()
    }

    fn sample_paths() -> Vec<SimulatedPathValues> {
        vec![
            path(0, &[10.0, 20.0, 15.0]),
            path(1, &[5.0, -10.0, 25.0]),
            path(2, &[-5.0, 15.0, 10.0]),
        ]
    }

    fn executor(workers: usize) -> ParallelExecutor {
        ParallelExecutor::new(ParallelConfig::with_workers(WorkerAllocation::Fixed(workers))).unwrap()
    }

    #[test]
    fn test_ee_ene_pfe() {
        let aggregator = ProfileAggregator::new(ProfileSettings::default(), 0.6, 0.6);
        let profile = aggregator
            .aggregate(&executor(2), &sample_paths(), &[0.0, 0.5, 1.0], 0)
            .unwrap();

        assert_eq!(profile.path_count, 3);
        assert_relative_eq!(profile.ee[0], 5.0);
        assert_relative_eq!(profile.ee[1], 35.0 / 3.0);
        assert_relative_eq!(profile.ene[0], 5.0 / 3.0);
        assert_relative_eq!(profile.ene[1], 10.0 / 3.0);
        assert_eq!(profile.ene[2], 0.0);
        // 95% of 3 paths: index round(2 × 0.95) = 2, the maximum.
        assert_eq!(profile.pfe, vec![10.0, 20.0, 25.0]);
        assert_eq!(profile.peak_pfe, 25.0);
    }

    #[test]
    fn test_cva_dva() {
        let aggregator = ProfileAggregator::new(ProfileSettings::default(), 0.6, 0.4);
        let profile = aggregator
            .aggregate(&executor(1), &sample_paths(), &[0.0, 0.5, 1.0], 0)
            .unwrap();

        let positive: f64 = 10.0 + 20.0 + 15.0 + 5.0 + 25.0 + 15.0 + 10.0;
        let negative: f64 = 10.0 + 5.0;
        assert_relative_eq!(profile.cva, 0.6 * positive * 0.1 / 3.0, max_relative = 1e-12);
        assert_relative_eq!(profile.dva, 0.4 * negative * 0.05 / 3.0, max_relative = 1e-12);
    }

    #[test]
    fn test_same_profile_for_any_worker_count() {
        let paths: Vec<_> = (0..50).map(|i| path(i, &[i as f64 - 20.0, (i % 7) as f64])).collect();
        let aggregator = ProfileAggregator::new(ProfileSettings::default(), 0.6, 0.6);
        let one = aggregator.aggregate(&executor(1), &paths, &[0.0, 1.0], 0).unwrap();
        let four = aggregator.aggregate(&executor(4), &paths, &[0.0, 1.0], 0).unwrap();

        assert_eq!(one.pfe, four.pfe);
        for (a, b) in one.ee.iter().zip(&four.ee) {
            assert_relative_eq!(a, b, max_relative = 1e-12);
        }
        assert_relative_eq!(one.cva, four.cva, max_relative = 1e-12);
    }

    #[test]
    fn test_empty_and_mismatched_paths() {
        let aggregator = ProfileAggregator::new(ProfileSettings::default(), 0.6, 0.6);
        let empty = aggregator.aggregate(&executor(2), &[], &[0.0, 1.0], 0).unwrap();
        assert_eq!(empty.ee, vec![0.0, 0.0]);
        assert_eq!(empty.cva, 0.0);

        let err = aggregator.aggregate(&executor(2), &sample_paths(), &[0.0, 1.0], 0);
        assert!(matches!(err, Err(ExposureError::InvalidInput(_))));
        let err = aggregator.aggregate(&executor(2), &sample_paths(), &[0.0, 0.5, 1.0], 1);
        assert!(matches!(err, Err(ExposureError::InvalidInput(_))));
    }

    #[test]
    fn test_time_average() {
        let ee = vec![0.0, 10.0, 20.0, 15.0, 5.0];
        let times = vec![0.0, 0.25, 0.5, 0.75, 1.0];
        // (1.25 + 3.75 + 4.375 + 2.5) / 1.0
        assert_relative_eq!(time_average(&ee, &times), 11.875);
        assert_eq!(time_average(&[7.0], &[0.0]), 7.0);
    }

    #[test]
    fn test_effective_epe_non_decreasing() {
        let ee = vec![0.0, 10.0, 5.0, 5.0];
        let times = vec![0.0, 0.5, 1.0, 2.0];
        // Running max 0, 10, 10, 10 integrated to 1.0: (2.5 + 5.0) / 1.0
        assert_relative_eq!(effective_epe(&ee, &times, 1.0), 7.5);
        assert!(effective_epe(&ee, &times, 2.0) > time_average(&ee, &times));
    }
}
