//! Summary aggregation and status derivation.

use super::models::{DiagnosticKind, Monitor, Sample, SampleDiagnostic, Status, Summary};
use super::rollup::{LatencyRollup, Mean};
use super::window::Window;
use super::EngineError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Uptime thresholds that map a percentage onto `Up` / `Degraded` / `Down`.
///
/// Both bounds are inclusive: `uptime >= up` is `Up`, `uptime >= degraded`
/// is `Degraded`, anything lower is `Down`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusThresholds {
    pub up: f64,
    pub degraded: f64,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            up: 99.0,
            degraded: 95.0,
        }
    }
}

impl StatusThresholds {
    /// Create thresholds, requiring `0 <= degraded <= up <= 100`.
    pub fn new(up: f64, degraded: f64) -> Result<Self, EngineError> {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !in_range(up) || !in_range(degraded) || degraded > up {
            return Err(EngineError::InvalidThresholds { up, degraded });
        }
        Ok(Self { up, degraded })
    }

    pub fn classify(&self, uptime_percent: f64) -> Status {
        if uptime_percent >= self.up {
            Status::Up
        } else if uptime_percent >= self.degraded {
            Status::Degraded
        } else {
            Status::Down
        }
    }
}

/// The in-window samples of one monitor, sorted by timestamp.
#[derive(Debug, Default)]
pub struct Selection<'a> {
    /// Each sample with its position in the caller's input.
    pub samples: Vec<(usize, &'a Sample)>,
    pub diagnostics: Vec<SampleDiagnostic>,
}

/// Keep the samples owned by `monitor_id` whose timestamp falls in
/// `[now - window, now)`, sorted ascending.
///
/// Input order is not trusted and input may contain other monitors' samples.
/// Samples without a monitor or with a pre-epoch timestamp are dropped with a
/// diagnostic.
pub fn select_samples<'a>(
    monitor_id: i64,
    samples: &'a [Sample],
    window: Window,
    now: DateTime<Utc>,
) -> Selection<'a> {
    let mut selection = Selection::default();

    for (index, sample) in samples.iter().enumerate() {
        let Some(owner) = sample.monitor_id else {
            selection.diagnostics.push(SampleDiagnostic {
                index,
                kind: DiagnosticKind::MissingMonitorId,
            });
            continue;
        };
        if owner != monitor_id {
            continue;
        }
        if sample.timestamp.timestamp_millis() < 0 {
            selection.diagnostics.push(SampleDiagnostic {
                index,
                kind: DiagnosticKind::NegativeTimestamp,
            });
            continue;
        }
        if window.contains(now, sample.timestamp) {
            selection.samples.push((index, sample));
        }
    }

    selection.samples.sort_by_key(|(_, s)| s.timestamp);
    selection
}

/// Computes summaries with injected thresholds and latency rollup.
#[derive(Debug, Clone)]
pub struct Aggregator<R = Mean> {
    thresholds: StatusThresholds,
    rollup: R,
}

impl Default for Aggregator<Mean> {
    fn default() -> Self {
        Self::new(StatusThresholds::default())
    }
}

impl Aggregator<Mean> {
    pub fn new(thresholds: StatusThresholds) -> Self {
        Self {
            thresholds,
            rollup: Mean,
        }
    }
}

impl<R: LatencyRollup> Aggregator<R> {
    /// Use `rollup` for `avg_latency_ms` instead of the arithmetic mean.
    pub fn with_rollup(thresholds: StatusThresholds, rollup: R) -> Self {
        Self { thresholds, rollup }
    }

    /// Summarize `monitor` over the trailing `window` ending at `now`.
    ///
    /// Fails only on an unsupported window token. Everything else that is
    /// wrong with the input ends up in `Summary::diagnostics`.
    pub fn compute_summary(
        &self,
        monitor: &Monitor,
        samples: &[Sample],
        window: &str,
        now: DateTime<Utc>,
    ) -> Result<Summary, EngineError> {
        let window: Window = window.parse()?;
        let Selection {
            samples: selected,
            mut diagnostics,
        } = select_samples(monitor.id, samples, window, now);

        let sample_count = selected.len();
        let successes = selected.iter().filter(|(_, s)| s.success).count();

        let mut latencies = Vec::with_capacity(sample_count);
        for (index, sample) in &selected {
            match (sample.latency_ms, sample.valid_latency()) {
                (_, Some(latency)) => latencies.push(latency),
                // Counted for uptime, left out of the latency rollup
                (Some(_), None) => diagnostics.push(SampleDiagnostic {
                    index: *index,
                    kind: DiagnosticKind::MalformedLatency,
                }),
                (None, None) => {}
            }
        }
        diagnostics.sort_by_key(|d| d.index);

        let uptime_percent = if sample_count == 0 {
            None
        } else {
            Some(100.0 * successes as f64 / sample_count as f64)
        };

        Ok(Summary {
            uptime_percent,
            avg_latency_ms: self.rollup.rollup(&latencies),
            window: window.as_str().to_string(),
            sample_count,
            status: self.derive_status(monitor, uptime_percent),
            diagnostics,
        })
    }

    fn derive_status(&self, monitor: &Monitor, uptime_percent: Option<f64>) -> Status {
        if !monitor.is_enabled {
            return Status::Paused;
        }
        match uptime_percent {
            None => Status::Unknown,
            Some(uptime) => self.thresholds.classify(uptime),
        }
    }
}

/// Summarize with the default thresholds (99 / 95) and mean latency.
pub fn compute_summary(
    monitor: &Monitor,
    samples: &[Sample],
    window: &str,
    now: DateTime<Utc>,
) -> Result<Summary, EngineError> {
    Aggregator::default().compute_summary(monitor, samples, window, now)
}

/// Roll per-monitor statuses up into one dashboard-wide status.
///
/// No monitors at all is `Unknown`: there is nothing to assert. Paused
/// monitors are ignored unless every monitor is paused. Otherwise the worst
/// status wins, with `Unknown` ranked between `Degraded` and `Up`.
pub fn overall_status<I>(statuses: I) -> Status
where
    I: IntoIterator<Item = Status>,
{
    let mut seen_any = false;
    let mut worst: Option<Status> = None;

    for status in statuses {
        seen_any = true;
        if status == Status::Paused {
            continue;
        }
        worst = Some(match worst {
            Some(current) if severity(current) >= severity(status) => current,
            _ => status,
        });
    }

    match (seen_any, worst) {
        (false, _) => Status::Unknown,
        (true, None) => Status::Paused,
        (true, Some(status)) => status,
    }
}

fn severity(status: Status) -> u8 {
    match status {
        Status::Up => 0,
        Status::Paused => 0,
        Status::Unknown => 1,
        Status::Degraded => 2,
        Status::Down => 3,
    }
}
