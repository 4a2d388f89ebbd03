//! Simulated values of one path.

use crate::simulator::RiskFactors;

/// Discounted netting-set values and risk factors along one path.
///
/// Values are stored date-major: `values[date * netting_count + set]`.
/// Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedPathValues {
    path_index: usize,
    weight: f64,
    netting_count: usize,
    values: Vec<f64>,
    factors: Vec<RiskFactors>,
}

impl SimulatedPathValues {
    /// Index of the originating path.
    #[inline]
    pub fn path_index(&self) -> usize {
        self.path_index
    }

    /// Path weight.
    #[inline]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Number of exposure dates.
    #[inline]
    pub fn date_count(&self) -> usize {
        self.factors.len()
    }

    /// Number of netting sets.
    #[inline]
    pub fn netting_count(&self) -> usize {
        self.netting_count
    }

    /// Discounted value of `netting_set` at exposure date `date`.
    #[inline]
    pub fn value(&self, date: usize, netting_set: usize) -> f64 {
        self.values[date * self.netting_count + netting_set]
    }

    /// All netting-set values at exposure date `date`.
    pub fn values_at(&self, date: usize) -> &[f64] {
        let start = date * self.netting_count;
        &self.values[start..start + self.netting_count]
    }

    /// Values of `netting_set` across all dates.
    pub fn netting_values(&self, netting_set: usize) -> impl Iterator<Item = f64> + '_ {
        self.values
            .chunks_exact(self.netting_count)
            .map(move |row| row[netting_set])
    }

    /// Risk factors at exposure date `date`.
    #[inline]
    pub fn risk_factors(&self, date: usize) -> &RiskFactors {
        &self.factors[date]
    }
}

/// Incremental builder used while a path is simulated.
#[derive(Debug, Clone)]
pub struct PathValuesBuilder {
    path_index: usize,
    weight: f64,
    netting_count: usize,
    values: Vec<f64>,
    factors: Vec<RiskFactors>,
}

impl PathValuesBuilder {
    /// Starts a record for `path_index` with room for `date_count` dates.
    pub fn new(path_index: usize, netting_count: usize, date_count: usize) -> Self {
        Self {
            path_index,
            weight: 1.0,
            netting_count,
            values: Vec::with_capacity(date_count * netting_count),
            factors: Vec::with_capacity(date_count),
        }
    }

    /// Overrides the unit path weight.
    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Appends one exposure date.
    ///
    /// # Panics
    ///
    /// If `values.len()` differs from the netting count.
    pub fn push_date(&mut self, factors: RiskFactors, values: &[f64]) {
        assert_eq!(
            values.len(),
            self.netting_count,
            "expected {} netting-set values",
            self.netting_count
        );
        self.factors.push(factors);
        self.values.extend_from_slice(values);
    }

    /// Finishes the record.
    pub fn build(self) -> SimulatedPathValues {
        SimulatedPathValues {
            path_index: self.path_index,
            weight: self.weight,
            netting_count: self.netting_count,
            values: self.values,
            factors: self.factors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SimulatedPathValues {
        let mut builder = PathValuesBuilder::new(7, 2, 3);
        for d in 0..3 {
            let factors = RiskFactors {
                discount_factor: 1.0 / (1.0 + d as f64),
                ..RiskFactors::default()
            };
            builder.push_date(factors, &[d as f64, -(d as f64)]);
        }
        builder.build()
    }

    #[test]
    fn test_layout() {
        let values = sample();
        assert_eq!(values.path_index(), 7);
        assert_eq!(values.weight(), 1.0);
        assert_eq!(values.date_count(), 3);
        assert_eq!(values.netting_count(), 2);
        assert_eq!(values.value(2, 1), -2.0);
        assert_eq!(values.values_at(1), &[1.0, -1.0]);
        assert_eq!(values.netting_values(0).collect::<Vec<_>>(), vec![0.0, 1.0, 2.0]);
        assert_eq!(values.risk_factors(2).discount_factor, 1.0 / 3.0);
    }

    #[test]
    fn test_weight_override() {
        let values = PathValuesBuilder::new(0, 1, 0).weight(0.5).build();
        assert_eq!(values.weight(), 0.5);
        assert_eq!(values.date_count(), 0);
    }

    #[test]
    #[should_panic(expected = "netting-set values")]
    fn test_push_date_checks_width() {
        let mut builder = PathValuesBuilder::new(0, 2, 1);
        builder.push_date(RiskFactors::default(), &[1.0]);
    }
}
