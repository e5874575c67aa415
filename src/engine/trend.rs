//! Reduced-resolution trend buckets for sparkline-style rendering.

use super::models::{usable_latency, Sample};
use super::rollup::{LatencyRollup, Max};
use super::EngineError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One `(timestamp, latency, success)` observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub latency_ms: Option<f64>,
    pub success: bool,
}

impl From<&Sample> for TrendPoint {
    fn from(sample: &Sample) -> Self {
        Self {
            timestamp: sample.timestamp,
            latency_ms: sample.latency_ms,
            success: sample.success,
        }
    }
}

/// What an empty bucket reports.
///
/// `AssumeOk` renders gaps in monitoring coverage as healthy, which can hide
/// them. `Unknown` reports `ok: null` for those buckets instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyBucketPolicy {
    #[default]
    AssumeOk,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendBucket {
    /// `false` if any sample in the bucket failed. `None` only for an empty
    /// bucket under [`EmptyBucketPolicy::Unknown`].
    pub ok: Option<bool>,
    /// Worst valid latency in the bucket, 0 when there is none.
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub buckets: Vec<TrendBucket>,
}

#[derive(Default)]
struct BucketAcc {
    samples: usize,
    failures: usize,
    latencies: Vec<f64>,
}

impl BucketAcc {
    fn finish(&self, policy: EmptyBucketPolicy) -> TrendBucket {
        if self.samples == 0 {
            let ok = match policy {
                EmptyBucketPolicy::AssumeOk => Some(true),
                EmptyBucketPolicy::Unknown => None,
            };
            return TrendBucket { ok, value: 0.0 };
        }
        TrendBucket {
            ok: Some(self.failures == 0),
            value: Max.rollup(&self.latencies).unwrap_or(0.0),
        }
    }
}

/// Split the time range spanned by `points` into `bucket_count` equal-width
/// buckets.
///
/// The last point falls into the last bucket. When every point shares one
/// timestamp they all land in the first bucket. Points need not be sorted.
pub fn derive_trend(
    points: &[TrendPoint],
    bucket_count: usize,
    policy: EmptyBucketPolicy,
) -> Result<Trend, EngineError> {
    if bucket_count == 0 {
        return Err(EngineError::InvalidBucketCount(bucket_count));
    }

    let mut accs: Vec<BucketAcc> = (0..bucket_count).map(|_| BucketAcc::default()).collect();

    let first = points.iter().map(|p| p.timestamp).min();
    let last = points.iter().map(|p| p.timestamp).max();

    if let (Some(start), Some(end)) = (first, last) {
        let span_ms = (end - start).num_milliseconds() as i128;
        let buckets = bucket_count as i128;

        for point in points {
            let idx = if span_ms == 0 {
                0
            } else {
                let offset_ms = (point.timestamp - start).num_milliseconds() as i128;
                ((offset_ms * buckets) / span_ms).min(buckets - 1) as usize
            };

            let acc = &mut accs[idx];
            acc.samples += 1;
            if !point.success {
                acc.failures += 1;
            }
            if let Some(latency) = usable_latency(point.latency_ms) {
                acc.latencies.push(latency);
            }
        }
    }

    Ok(Trend {
        buckets: accs.iter().map(|acc| acc.finish(policy)).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn point(secs: i64, latency: f64, success: bool) -> TrendPoint {
        TrendPoint {
            timestamp: t0() + ChronoDuration::seconds(secs),
            latency_ms: Some(latency),
            success,
        }
    }

    #[test]
    fn test_one_failure_taints_bucket() {
        let points = vec![
            point(0, 10.0, true),
            point(5, 70.0, false),
            point(10, 20.0, true),
            point(25, 30.0, true),
            point(30, 35.0, true),
            point(45, 40.0, true),
            point(50, 45.0, true),
            point(65, 50.0, true),
            point(85, 55.0, true),
            point(100, 60.0, true),
        ];

        let trend = derive_trend(&points, 5, EmptyBucketPolicy::AssumeOk).unwrap();
        assert_eq!(trend.buckets.len(), 5);
        assert_eq!(trend.buckets[0], TrendBucket { ok: Some(false), value: 70.0 });
        assert_eq!(trend.buckets[1], TrendBucket { ok: Some(true), value: 35.0 });
        assert_eq!(trend.buckets[2], TrendBucket { ok: Some(true), value: 45.0 });
        assert_eq!(trend.buckets[3], TrendBucket { ok: Some(true), value: 50.0 });
        // The last point is clamped into the last bucket
        assert_eq!(trend.buckets[4], TrendBucket { ok: Some(true), value: 60.0 });
    }

    #[test]
    fn test_unsorted_input() {
        let mut points = vec![point(0, 1.0, true), point(100, 2.0, true), point(50, 9.0, false)];
        let sorted = derive_trend(&points, 2, EmptyBucketPolicy::AssumeOk).unwrap();
        points.reverse();
        let reversed = derive_trend(&points, 2, EmptyBucketPolicy::AssumeOk).unwrap();
        assert_eq!(sorted, reversed);
        assert_eq!(sorted.buckets[1], TrendBucket { ok: Some(false), value: 9.0 });
    }

    #[test]
    fn test_empty_bucket_policies() {
        let points = vec![point(0, 5.0, true), point(90, 6.0, true)];

        let lenient = derive_trend(&points, 3, EmptyBucketPolicy::AssumeOk).unwrap();
        assert_eq!(lenient.buckets[1], TrendBucket { ok: Some(true), value: 0.0 });

        let strict = derive_trend(&points, 3, EmptyBucketPolicy::Unknown).unwrap();
        assert_eq!(strict.buckets[1], TrendBucket { ok: None, value: 0.0 });
        assert_eq!(strict.buckets[0], TrendBucket { ok: Some(true), value: 5.0 });
    }

    #[test]
    fn test_no_points() {
        let trend = derive_trend(&[], 4, EmptyBucketPolicy::AssumeOk).unwrap();
        assert_eq!(trend.buckets.len(), 4);
        assert!(trend.buckets.iter().all(|b| b.ok == Some(true) && b.value == 0.0));
    }

    #[test]
    fn test_single_instant_lands_in_first_bucket() {
        let points = vec![point(0, 3.0, true), point(0, 8.0, true)];
        let trend = derive_trend(&points, 3, EmptyBucketPolicy::Unknown).unwrap();
        assert_eq!(trend.buckets[0], TrendBucket { ok: Some(true), value: 8.0 });
        assert_eq!(trend.buckets[2].ok, None);
    }

    #[test]
    fn test_missing_latency_counts_toward_ok_only() {
        let mut failed = point(0, 0.0, false);
        failed.latency_ms = None;
        let trend = derive_trend(&[failed], 1, EmptyBucketPolicy::AssumeOk).unwrap();
        assert_eq!(trend.buckets[0], TrendBucket { ok: Some(false), value: 0.0 });
    }

    #[test]
    fn test_malformed_latency_is_left_out_of_value() {
        let points = vec![point(0, f64::NAN, true), point(1, -5.0, true), point(2, 7.0, true)];
        let trend = derive_trend(&points, 1, EmptyBucketPolicy::AssumeOk).unwrap();
        assert_eq!(trend.buckets[0], TrendBucket { ok: Some(true), value: 7.0 });
    }

    #[test]
    fn test_zero_buckets_is_an_error() {
        let result = derive_trend(&[point(0, 1.0, true)], 0, EmptyBucketPolicy::AssumeOk);
        assert!(matches!(result, Err(EngineError::InvalidBucketCount(0))));
    }

    #[test]
    fn test_json_shape() {
        let trend = Trend {
            buckets: vec![TrendBucket { ok: Some(true), value: 12.0 }],
        };
        assert_eq!(
            serde_json::to_value(&trend).unwrap(),
            serde_json::json!({ "buckets": [{ "ok": true, "value": 12.0 }] })
        );
    }
}
