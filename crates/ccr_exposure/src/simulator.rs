//! Path simulation.
//!
//! A [`Simulator`] produces one [`SimulatedPath`] per path index; the path
//! moves a worker's market to each exposure date and returns the
//! [`RiskFactors`] observed there.
//!
//! [`ShortRateSimulator`] is the reference implementation: a one-factor
//! Gaussian (Ornstein-Uhlenbeck) shift of all curves,
//!
//! ```text
//! dx = -a x dt + σ dW,   x(0) = 0
//! ```
//!
//! sampled exactly on the simulation dates.

use std::sync::Arc;

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::Deserialize;

use crate::error::{ExposureError, SimulationError};
use crate::market::{MarketEnvironment, MarketState, MarketView, SimulatedMarket};
use crate::types::year_fraction;

/// Risk factors observed on one path at one exposure date.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RiskFactors {
    /// Numeraire value `1 / D(t)`
    pub numeraire: f64,
    /// Deflated discount factor `D(t)` from the base date
    pub discount_factor: f64,
    /// Counterparty default probability over the preceding interval
    pub cpty_default_factor: f64,
    /// Own default probability over the preceding interval (zero if unilateral)
    pub own_default_factor: f64,
    /// Own survival probability to the date (one if unilateral)
    pub survival_factor: f64,
    /// Counterparty credit spread
    pub cpty_spread: f64,
    /// Own credit spread
    pub own_spread: f64,
    /// Funding spread on cash lent
    pub lend_spread: f64,
    /// Funding spread on cash borrowed
    pub borrow_spread: f64,
}

/// Seeded random stream with one independent substream per path.
///
/// Selecting path `p` reseeds the generator from `(seed, p)`, so a path's
/// draws do not depend on which worker simulates it or on how many paths
/// that worker simulated before.
///
/// # Examples
///
/// ```
/// use ccr_exposure::simulator::RandomStream;
///
/// let mut a = RandomStream::new(42);
/// let mut b = RandomStream::new(42);
///
/// a.select_path(7);
/// b.select_path(3);
/// b.gen_normal();
/// b.select_path(7);
/// assert_eq!(a.gen_normal(), b.gen_normal());
/// ```
#[derive(Debug, Clone)]
pub struct RandomStream {
    seed: u64,
    inner: StdRng,
}

impl RandomStream {
    /// Creates a stream positioned on path zero.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            inner: StdRng::seed_from_u64(path_seed(seed, 0)),
        }
    }

    /// Returns the root seed.
    #[inline]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Positions the stream at the start of the substream of `path`.
    pub fn select_path(&mut self, path: usize) {
        self.inner = StdRng::seed_from_u64(path_seed(self.seed, path));
    }

    /// Draws a standard normal variate.
    #[inline]
    pub fn gen_normal(&mut self) -> f64 {
        StandardNormal.sample(&mut self.inner)
    }
}

/// SplitMix64 finaliser.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn path_seed(seed: u64, path: usize) -> u64 {
    mix(seed ^ mix(path as u64))
}

/// One simulated realisation of the risk factors.
pub trait SimulatedPath {
    /// Market environment this path evolves.
    type Market: MarketEnvironment;

    /// Moves `market` to exposure date `time_index` and returns the risk
    /// factors observed there.
    fn evolve(
        &self,
        time_index: usize,
        date: NaiveDate,
        market: &mut Self::Market,
        unilateral: bool,
    ) -> Result<RiskFactors, SimulationError>;
}

/// Source of simulated paths.
pub trait Simulator: Sync {
    /// Market environment the paths evolve.
    type Market: MarketEnvironment;
    /// Path type.
    type Path: SimulatedPath<Market = Self::Market>;

    /// Dates at which paths are sampled.
    fn simulation_dates(&self) -> &[NaiveDate];

    /// Generates path `index`, or `None` if the simulator rejects it.
    fn simulated_path(&self, index: usize, stream: &mut RandomStream) -> Option<Self::Path>;
}

/// Parameters of the Gaussian short-rate shift.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ShortRateParams {
    /// Mean reversion speed `a`
    pub mean_reversion: f64,
    /// Volatility `σ`
    pub volatility: f64,
    /// Paths whose shift ever exceeds this magnitude are rejected
    pub max_abs_shift: Option<f64>,
}

impl Default for ShortRateParams {
    fn default() -> Self {
        Self {
            mean_reversion: 0.03,
            volatility: 0.01,
            max_abs_shift: None,
        }
    }
}

/// Reference simulator of a Gaussian short-rate shift.
#[derive(Debug, Clone)]
pub struct ShortRateSimulator {
    dates: Vec<NaiveDate>,
    times: Arc<[f64]>,
    params: ShortRateParams,
}

impl ShortRateSimulator {
    /// Creates a simulator sampling on `dates`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the dates are not strictly increasing, precede
    /// `base_date`, or the parameters are negative or non-finite.
    pub fn new(
        base_date: NaiveDate,
        dates: Vec<NaiveDate>,
        params: ShortRateParams,
    ) -> Result<Self, ExposureError> {
        if dates.first().is_some_and(|d| *d < base_date) {
            return Err(ExposureError::InvalidInput(format!(
                "simulation dates start before base date {}",
                base_date
            )));
        }
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ExposureError::InvalidInput(
                "simulation dates must be strictly increasing".to_string(),
            ));
        }
        let valid = |v: f64| v.is_finite() && v >= 0.0;
        if !valid(params.mean_reversion) || !valid(params.volatility) {
            return Err(ExposureError::InvalidInput(format!(
                "short-rate parameters must be finite and non-negative: a = {}, sigma = {}",
                params.mean_reversion, params.volatility
            )));
        }
        if params.max_abs_shift.is_some_and(|cap| !(cap > 0.0)) {
            return Err(ExposureError::InvalidInput(
                "max_abs_shift must be positive".to_string(),
            ));
        }

        let times = dates.iter().map(|d| year_fraction(base_date, *d)).collect();
        Ok(Self {
            dates,
            times,
            params,
        })
    }

    /// Model parameters.
    #[inline]
    pub fn params(&self) -> &ShortRateParams {
        &self.params
    }

    /// Sampling times in years from the base date.
    #[inline]
    pub fn times(&self) -> &[f64] {
        &self.times
    }
}

impl Simulator for ShortRateSimulator {
    type Market = SimulatedMarket;
    type Path = ShortRatePath;

    fn simulation_dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    fn simulated_path(&self, index: usize, stream: &mut RandomStream) -> Option<ShortRatePath> {
        stream.select_path(index);

        let a = self.params.mean_reversion;
        let sigma = self.params.volatility;
        let mut shifts = Vec::with_capacity(self.times.len());
        let mut integrals = Vec::with_capacity(self.times.len());

        let mut x = 0.0_f64;
        let mut integral = 0.0_f64;
        let mut prev_t = 0.0_f64;
        for &t in self.times.iter() {
            let dt = t - prev_t;
            if dt > 0.0 {
                let (decay, variance) = if a > 1e-12 {
                    let decay = (-a * dt).exp();
                    (decay, (1.0 - decay * decay) / (2.0 * a))
                } else {
                    (1.0, dt)
                };
                let next = x * decay + sigma * variance.sqrt() * stream.gen_normal();
                integral += 0.5 * (x + next) * dt;
                x = next;
            }
            if let Some(cap) = self.params.max_abs_shift {
                if x.abs() > cap {
                    return None;
                }
            }
            shifts.push(x);
            integrals.push(integral);
            prev_t = t;
        }

        Some(ShortRatePath {
            index,
            times: Arc::clone(&self.times),
            shifts,
            integrals,
        })
    }
}

/// One path of the short-rate shift.
#[derive(Debug, Clone)]
pub struct ShortRatePath {
    index: usize,
    times: Arc<[f64]>,
    shifts: Vec<f64>,
    integrals: Vec<f64>,
}

impl ShortRatePath {
    /// Path index.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Shift `x(t)` at each simulation date.
    #[inline]
    pub fn shifts(&self) -> &[f64] {
        &self.shifts
    }
}

impl SimulatedPath for ShortRatePath {
    type Market = SimulatedMarket;

    fn evolve(
        &self,
        time_index: usize,
        date: NaiveDate,
        market: &mut SimulatedMarket,
        unilateral: bool,
    ) -> Result<RiskFactors, SimulationError> {
        let t = *self.times.get(time_index).ok_or_else(|| SimulationError::Evolution {
            path: self.index,
            date,
            reason: format!(
                "time index {} outside {} simulation dates",
                time_index,
                self.times.len()
            ),
        })?;

        market.set_state(MarketState {
            time: t,
            short_rate_shift: self.shifts[time_index],
            integrated_shift: self.integrals[time_index],
        });

        let data = market.data();
        let discount_factor = market.discount_factor(data.numeraire_curve(), t)?;
        let prev = if time_index == 0 {
            0.0
        } else {
            self.times[time_index - 1]
        };

        let cpty = data.counterparty();
        let own = data.own();
        let cpty_default_factor = cpty.survival_probability(prev) - cpty.survival_probability(t);
        let (own_default_factor, survival_factor) = if unilateral {
            (0.0, 1.0)
        } else {
            (
                own.survival_probability(prev) - own.survival_probability(t),
                own.survival_probability(t),
            )
        };

        Ok(RiskFactors {
            numeraire: 1.0 / discount_factor,
            discount_factor,
            cpty_default_factor,
            own_default_factor,
            survival_factor,
            cpty_spread: cpty.spread(),
            own_spread: own.spread(),
            lend_spread: data.lend_spread(),
            borrow_spread: data.borrow_spread(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{CreditCurve, MarketData};
    use crate::types::Currency;
    use approx::assert_relative_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn base() -> NaiveDate {
        date(2025, 1, 1)
    }

    fn annual_dates(n: i32) -> Vec<NaiveDate> {
        (0..n).map(|y| date(2025 + y, 1, 1)).collect()
    }

    fn market() -> SimulatedMarket {
        let data = MarketData::builder(base(), Currency::USD)
            .discount_curve("OIS", 0.02)
            .numeraire_curve("OIS")
            .credit_curve("CPTY", CreditCurve::new(0.03, 0.4).unwrap())
            .credit_curve("BANK", CreditCurve::new(0.01, 0.4).unwrap())
            .counterparty("CPTY")
            .own("BANK")
            .funding_spreads(0.001, 0.005)
            .build()
            .unwrap();
        SimulatedMarket::new(Arc::new(data))
    }

    fn simulator(params: ShortRateParams) -> ShortRateSimulator {
        ShortRateSimulator::new(base(), annual_dates(6), params).unwrap()
    }

    #[test]
    fn test_path_reproducible_per_index() {
        let sim = simulator(ShortRateParams::default());
        let mut s1 = RandomStream::new(7);
        let mut s2 = RandomStream::new(7);

        let _ = sim.simulated_path(0, &mut s2);
        let p1 = sim.simulated_path(5, &mut s1).unwrap();
        let p2 = sim.simulated_path(5, &mut s2).unwrap();
        assert_eq!(p1.shifts(), p2.shifts());

        let other = sim.simulated_path(6, &mut s1).unwrap();
        assert_ne!(p1.shifts(), other.shifts());
    }

    #[test]
    fn test_zero_volatility_has_no_shift() {
        let sim = simulator(ShortRateParams {
            volatility: 0.0,
            ..ShortRateParams::default()
        });
        let path = sim.simulated_path(3, &mut RandomStream::new(1)).unwrap();
        assert!(path.shifts().iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_shift_cap_rejects_paths() {
        let sim = simulator(ShortRateParams {
            volatility: 0.05,
            max_abs_shift: Some(1e-6),
            ..ShortRateParams::default()
        });
        let mut stream = RandomStream::new(11);
        assert!((0..20).all(|p| sim.simulated_path(p, &mut stream).is_none()));
    }

    #[test]
    fn test_shift_variance_matches_ou() {
        let params = ShortRateParams {
            mean_reversion: 0.1,
            volatility: 0.01,
            max_abs_shift: None,
        };
        let sim = simulator(params);
        let mut stream = RandomStream::new(2024);
        let n = 20_000;
        let last = sim.times().len() - 1;

        let (mut sum, mut sum_sq) = (0.0, 0.0);
        for p in 0..n {
            let x = sim.simulated_path(p, &mut stream).unwrap().shifts()[last];
            sum += x;
            sum_sq += x * x;
        }
        let mean = sum / n as f64;
        let var = sum_sq / n as f64 - mean * mean;

        let t = sim.times()[last];
        let expected = 0.01_f64.powi(2) * (1.0 - (-0.2 * t).exp()) / 0.2;
        assert!(mean.abs() < 5e-4);
        assert_relative_eq!(var, expected, max_relative = 0.05);
    }

    #[test]
    fn test_evolve_risk_factors() {
        let sim = simulator(ShortRateParams {
            volatility: 0.0,
            ..ShortRateParams::default()
        });
        let path = sim.simulated_path(0, &mut RandomStream::new(3)).unwrap();
        let mut mkt = market();
        let dates = sim.simulation_dates().to_vec();

        let rf0 = path.evolve(0, dates[0], &mut mkt, false).unwrap();
        assert_eq!(rf0.discount_factor, 1.0);
        assert_eq!(rf0.cpty_default_factor, 0.0);

        let mut total_default = 0.0;
        for (i, d) in dates.iter().enumerate() {
            let rf = path.evolve(i, *d, &mut mkt, false).unwrap();
            assert_relative_eq!(rf.numeraire * rf.discount_factor, 1.0, epsilon = 1e-14);
            assert_relative_eq!(rf.cpty_spread, 0.018, epsilon = 1e-15);
            total_default += rf.cpty_default_factor;
        }
        let t_last = sim.times()[dates.len() - 1];
        assert_relative_eq!(total_default, 1.0 - (-0.03 * t_last).exp(), epsilon = 1e-12);
        assert_relative_eq!(mkt.state().time, t_last);
    }

    #[test]
    fn test_evolve_unilateral() {
        let sim = simulator(ShortRateParams::default());
        let path = sim.simulated_path(1, &mut RandomStream::new(3)).unwrap();
        let mut mkt = market();
        let dates = sim.simulation_dates();

        let rf = path.evolve(3, dates[3], &mut mkt, true).unwrap();
        assert_eq!(rf.own_default_factor, 0.0);
        assert_eq!(rf.survival_factor, 1.0);

        let rf = path.evolve(3, dates[3], &mut mkt, false).unwrap();
        assert!(rf.own_default_factor > 0.0);
        assert!(rf.survival_factor < 1.0);
    }

    #[test]
    fn test_evolve_out_of_range() {
        let sim = simulator(ShortRateParams::default());
        let path = sim.simulated_path(0, &mut RandomStream::new(3)).unwrap();
        let err = path.evolve(99, base(), &mut market(), false).unwrap_err();
        assert!(matches!(err, SimulationError::Evolution { path: 0, .. }));
    }

    #[test]
    fn test_invalid_construction() {
        let mut dates = annual_dates(3);
        dates.swap(1, 2);
        assert!(ShortRateSimulator::new(base(), dates, ShortRateParams::default()).is_err());

        assert!(ShortRateSimulator::new(
            date(2026, 1, 1),
            annual_dates(3),
            ShortRateParams::default()
        )
        .is_err());

        let params = ShortRateParams {
            volatility: -0.01,
            ..ShortRateParams::default()
        };
        assert!(ShortRateSimulator::new(base(), annual_dates(3), params).is_err());
    }
}
