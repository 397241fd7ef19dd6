//! Append-only scalar statistics
//!
//! Min, max and sum are maintained on every append. The values are kept
//! so mean absolute deviation can be computed against any mean.

use serde::Serialize;

use crate::error::{Result, TapToToneError};

/// Accumulated observations of one quantity (a latency or an amplitude)
///
/// # Example
/// ```
/// use taptone_core::RunningStatistic;
///
/// let mut stat = RunningStatistic::new();
/// for v in [1.0, 2.0, 3.0] {
///     stat.add(v);
/// }
/// let mean = stat.mean().unwrap();
/// assert_eq!(mean, 2.0);
/// assert!((stat.mean_absolute_deviation(mean).unwrap() - 2.0 / 3.0).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunningStatistic {
    values: Vec<f64>,
    min: f64,
    max: f64,
    sum: f64,
}

impl RunningStatistic {
    /// Create an empty statistic
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one observation
    pub fn add(&mut self, value: f64) {
        if self.values.is_empty() {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.sum += value;
        self.values.push(value);
    }

    /// Number of observations
    pub fn count(&self) -> usize {
        self.values.len()
    }

    /// True before the first append
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Smallest observation, `None` when empty
    pub fn min(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.min)
    }

    /// Largest observation, `None` when empty
    pub fn max(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.max)
    }

    /// Sum of all observations (0.0 when empty)
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Arithmetic mean
    ///
    /// # Errors
    /// `EmptyStatisticsQuery` when empty
    pub fn mean(&self) -> Result<f64> {
        if self.is_empty() {
            return Err(TapToToneError::EmptyStatisticsQuery);
        }
        Ok(self.sum / self.values.len() as f64)
    }

    /// Mean of `|v - mean|` over all observations
    ///
    /// # Errors
    /// `EmptyStatisticsQuery` when empty
    pub fn mean_absolute_deviation(&self, mean: f64) -> Result<f64> {
        if self.is_empty() {
            return Err(TapToToneError::EmptyStatisticsQuery);
        }
        let total: f64 = self.values.iter().map(|v| (v - mean).abs()).sum();
        Ok(total / self.values.len() as f64)
    }

    /// Most recent observation
    ///
    /// # Errors
    /// `EmptyStatisticsQuery` when empty
    pub fn last(&self) -> Result<f64> {
        self.values
            .last()
            .copied()
            .ok_or(TapToToneError::EmptyStatisticsQuery)
    }

    /// All observations in append order
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_empty_queries_fail() {
        let stat = RunningStatistic::new();
        assert_eq!(stat.count(), 0);
        assert_eq!(stat.min(), None);
        assert_eq!(stat.max(), None);
        assert_eq!(stat.sum(), 0.0);
        assert!(matches!(
            stat.mean(),
            Err(TapToToneError::EmptyStatisticsQuery)
        ));
        assert!(matches!(
            stat.last(),
            Err(TapToToneError::EmptyStatisticsQuery)
        ));
        assert!(stat.mean_absolute_deviation(0.0).is_err());
    }

    #[test]
    fn test_mean_and_deviation() {
        let mut stat = RunningStatistic::new();
        for v in [1.0, 2.0, 3.0] {
            stat.add(v);
        }
        let mean = stat.mean().unwrap();
        assert_relative_eq!(mean, 2.0);
        assert_relative_eq!(stat.mean_absolute_deviation(mean).unwrap(), 2.0 / 3.0);
        assert_relative_eq!(stat.last().unwrap(), 3.0);
    }

    #[test]
    fn test_bounds_hold_for_every_value() {
        let values = [5.5, -2.0, 17.25, 0.0, 3.0, -2.5, 100.0, 42.0];
        let mut stat = RunningStatistic::new();
        for (n, &v) in values.iter().enumerate() {
            stat.add(v);
            assert_eq!(stat.count(), n + 1);
            let min = stat.min().unwrap();
            let max = stat.max().unwrap();
            assert!(values[..=n].iter().all(|&x| min <= x && x <= max));
            assert_relative_eq!(stat.sum(), values[..=n].iter().sum::<f64>());
        }
        assert_eq!(stat.min(), Some(-2.5));
        assert_eq!(stat.max(), Some(100.0));
    }

    #[test]
    fn test_single_value() {
        let mut stat = RunningStatistic::new();
        stat.add(-7.0);
        assert_eq!(stat.min(), Some(-7.0));
        assert_eq!(stat.max(), Some(-7.0));
        assert_relative_eq!(stat.mean_absolute_deviation(-7.0).unwrap(), 0.0);
    }
}
