//! Latency rollups.
//!
//! A rollup reduces the valid latencies of a window to one number. The
//! summary uses the arithmetic mean unless another rollup is injected;
//! trend buckets use [`Max`] so spikes stay visible.

use super::EngineError;

use std::fmt;
use std::str::FromStr;
use tdigests::TDigest;

/// Above this many values, percentiles are estimated with a t-digest
/// instead of sorting a copy of the input.
const EXACT_PERCENTILE_LIMIT: usize = 10_000;

/// Centroid budget for the t-digest estimator.
const DIGEST_COMPRESSION: usize = 100;

/// Reduces a set of latencies to a single value.
///
/// Implementations receive only finite, non-negative values and must return
/// `None` for an empty slice.
pub trait LatencyRollup: Send + Sync {
    fn rollup(&self, values: &[f64]) -> Option<f64>;
}

/// Arithmetic mean.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mean;

impl LatencyRollup for Mean {
    fn rollup(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Worst case.
#[derive(Debug, Clone, Copy, Default)]
pub struct Max;

impl LatencyRollup for Max {
    fn rollup(&self, values: &[f64]) -> Option<f64> {
        values.iter().copied().reduce(f64::max)
    }
}

/// Nearest-rank percentile, `q` in `[0, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct Percentile {
    q: f64,
}

impl Percentile {
    pub fn new(q: f64) -> Result<Self, EngineError> {
        if !(0.0..=1.0).contains(&q) {
            return Err(EngineError::InvalidRollup(format!("percentile {} out of range", q)));
        }
        Ok(Self { q })
    }

    pub fn p50() -> Self {
        Self { q: 0.50 }
    }

    pub fn p95() -> Self {
        Self { q: 0.95 }
    }
}

impl LatencyRollup for Percentile {
    fn rollup(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        if values.len() > EXACT_PERCENTILE_LIMIT {
            return Some(estimate_quantile(values, self.q));
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let rank = (self.q * sorted.len() as f64).ceil() as usize;
        Some(sorted[rank.clamp(1, sorted.len()) - 1])
    }
}

/// Estimate a quantile through a compressed t-digest.
fn estimate_quantile(values: &[f64], q: f64) -> f64 {
    let mut td = TDigest::from_values(values.to_vec());
    td.compress(DIGEST_COMPRESSION);
    sanitize_float(td.estimate_quantile(q))
}

fn sanitize_float(f: f64) -> f64 {
    if f.is_nan() || f.is_infinite() {
        0.0
    } else {
        f
    }
}

/// The rollups selectable by name, e.g. from a query string.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RollupKind {
    #[default]
    Avg,
    P50,
    P95,
    Max,
}

impl RollupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RollupKind::Avg => "avg",
            RollupKind::P50 => "p50",
            RollupKind::P95 => "p95",
            RollupKind::Max => "max",
        }
    }
}

impl LatencyRollup for RollupKind {
    fn rollup(&self, values: &[f64]) -> Option<f64> {
        match self {
            RollupKind::Avg => Mean.rollup(values),
            RollupKind::P50 => Percentile::p50().rollup(values),
            RollupKind::P95 => Percentile::p95().rollup(values),
            RollupKind::Max => Max.rollup(values),
        }
    }
}

impl FromStr for RollupKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avg" | "mean" => Ok(RollupKind::Avg),
            "p50" => Ok(RollupKind::P50),
            "p95" => Ok(RollupKind::P95),
            "max" => Ok(RollupKind::Max),
            other => Err(EngineError::InvalidRollup(format!("unknown rollup: {}", other))),
        }
    }
}

impl fmt::Display for RollupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(Mean.rollup(&[]), None);
        assert_eq!(Mean.rollup(&[10.0, 20.0, 30.0]), Some(20.0));
    }

    #[test]
    fn test_max() {
        assert_eq!(Max.rollup(&[]), None);
        assert_eq!(Max.rollup(&[3.0, 120.0, 7.5]), Some(120.0));
    }

    #[test]
    fn test_nearest_rank_percentile() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        assert_eq!(Percentile::p50().rollup(&values), Some(50.0));
        assert_eq!(Percentile::p95().rollup(&values), Some(95.0));
        assert_eq!(Percentile::new(0.0).unwrap().rollup(&values), Some(1.0));
        assert_eq!(Percentile::new(1.0).unwrap().rollup(&values), Some(100.0));

        // Input order does not matter
        assert_eq!(Percentile::p50().rollup(&[40.0, 10.0, 30.0, 20.0]), Some(20.0));
        assert_eq!(Percentile::p95().rollup(&[]), None);
    }

    #[test]
    fn test_percentile_range_validation() {
        assert!(Percentile::new(-0.1).is_err());
        assert!(Percentile::new(1.5).is_err());
        assert!(Percentile::new(0.99).is_ok());
    }

    #[test]
    fn test_large_percentile_uses_estimate() {
        let values: Vec<f64> = (0..20_000).map(|v| v as f64).collect();
        let p50 = Percentile::p50().rollup(&values).unwrap();
        assert!((p50 - 10_000.0).abs() < 200.0, "p50 estimate was {}", p50);

        let p95 = Percentile::p95().rollup(&values).unwrap();
        assert!((p95 - 19_000.0).abs() < 200.0, "p95 estimate was {}", p95);
    }

    #[test]
    fn test_rollup_kind_parse() {
        assert_eq!("avg".parse::<RollupKind>().unwrap(), RollupKind::Avg);
        assert_eq!("mean".parse::<RollupKind>().unwrap(), RollupKind::Avg);
        assert_eq!("p95".parse::<RollupKind>().unwrap(), RollupKind::P95);
        assert!("p42".parse::<RollupKind>().is_err());
        assert_eq!(RollupKind::Max.rollup(&[1.0, 9.0]), Some(9.0));
    }
}
