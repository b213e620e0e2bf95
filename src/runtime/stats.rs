//! Bandwidth and iteration-sample statistics.

use serde::{Deserialize, Serialize};

/// GB/s from a byte count and a duration in milliseconds.
pub fn bandwidth_gbs(bytes: usize, ms: f64) -> f64 {
    if ms <= 0.0 {
        return 0.0;
    }
    (bytes as f64 / 1.0e9) / ms * 1000.0
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SampleStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

impl SampleStats {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut var_sum = 0.0;
        for &s in samples {
            min = min.min(s);
            max = max.max(s);
            let d = s - mean;
            var_sum += d * d;
        }
        Self {
            mean,
            min,
            max,
            std_dev: (var_sum / n).sqrt(),
        }
    }
}

/// Per-iteration spread of elapsed time and the bandwidth derived from each
/// sample. The aggregate bandwidth a run reports is bytes / mean(elapsed),
/// which is not the same as the mean of these per-iteration bandwidths.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IterationSpread {
    pub time_ms: SampleStats,
    pub bandwidth: SampleStats,
}

pub fn iteration_spread(bytes: usize, per_iteration_ms: &[f64]) -> IterationSpread {
    let bw: Vec<f64> = per_iteration_ms
        .iter()
        .map(|&ms| bandwidth_gbs(bytes, ms))
        .collect();
    IterationSpread {
        time_ms: SampleStats::from_samples(per_iteration_ms),
        bandwidth: SampleStats::from_samples(&bw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bandwidth_units() {
        // 1 GB in 1 second is 1 GB/s.
        assert!((bandwidth_gbs(1_000_000_000, 1000.0) - 1.0).abs() < 1e-12);
        assert_eq!(bandwidth_gbs(1024, 0.0), 0.0);
    }

    #[test]
    fn test_sample_stats() {
        let s = SampleStats::from_samples(&[1.0, 2.0, 3.0, 4.0]);
        assert!((s.mean - 2.5).abs() < 1e-12);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 4.0);
        assert!((s.std_dev - (1.25f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_aggregate_uses_mean_time_not_mean_bandwidth() {
        // Two iterations: 1 ms and 3 ms over 1 MB. Mean-time bandwidth is
        // 0.5 GB/s; mean of per-iteration bandwidths is larger.
        let bytes = 1_000_000;
        let samples = [1.0, 3.0];
        let spread = iteration_spread(bytes, &samples);
        let aggregate = bandwidth_gbs(bytes, spread.time_ms.mean);
        assert!((aggregate - 0.5).abs() < 1e-9);
        assert!(spread.bandwidth.mean > aggregate);
    }
}
