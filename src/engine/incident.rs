//! Incident derivation from consecutive check outcomes.
//!
//! An incident opens once `fail_threshold` checks in a row have failed and
//! resolves once `recover_threshold` checks in a row have passed. Replaying
//! a monitor's history through this rule yields its incidents without any
//! state outside the samples themselves.

use super::models::Sample;
use super::EngineError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentPolicy {
    pub fail_threshold: u32,
    pub recover_threshold: u32,
}

impl Default for IncidentPolicy {
    fn default() -> Self {
        Self {
            fail_threshold: 3,
            recover_threshold: 2,
        }
    }
}

impl IncidentPolicy {
    pub fn new(fail_threshold: u32, recover_threshold: u32) -> Result<Self, EngineError> {
        if fail_threshold == 0 || recover_threshold == 0 {
            return Err(EngineError::InvalidIncidentPolicy {
                fail_threshold,
                recover_threshold,
            });
        }
        Ok(Self {
            fail_threshold,
            recover_threshold,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentState {
    Open,
    Resolved,
}

impl IncidentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentState::Open => "open",
            IncidentState::Resolved => "resolved",
        }
    }
}

impl FromStr for IncidentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(IncidentState::Open),
            "resolved" => Ok(IncidentState::Resolved),
            other => Err(format!("unknown incident state: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Set once the incident has been recorded by the notifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub monitor_id: i64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub reason: String,
    pub state: IncidentState,
}

/// Why a failed check failed: its error text, else its HTTP code, else a network error.
fn failure_reason(sample: &Sample) -> String {
    match (&sample.error_reason, sample.status_code) {
        (Some(reason), _) if !reason.is_empty() => reason.clone(),
        (_, Some(code)) if code != 0 => format!("HTTP {}", code),
        _ => "network error".to_string(),
    }
}

/// Replay the samples of `monitor_id` in timestamp order and return every
/// incident they produce, oldest first.
pub fn derive_incidents(monitor_id: i64, samples: &[Sample], policy: IncidentPolicy) -> Vec<Incident> {
    let mut ordered: Vec<&Sample> = samples
        .iter()
        .filter(|s| s.monitor_id == Some(monitor_id))
        .collect();
    ordered.sort_by_key(|s| s.timestamp);

    let mut incidents = Vec::new();
    let mut open: Option<Incident> = None;
    let mut fails = 0u32;
    let mut passes = 0u32;

    for sample in ordered {
        if sample.success {
            fails = 0;
            passes = passes.saturating_add(1);
            if passes >= policy.recover_threshold {
                if let Some(mut incident) = open.take() {
                    incident.state = IncidentState::Resolved;
                    incident.closed_at = Some(sample.timestamp);
                    incidents.push(incident);
                }
            }
        } else {
            passes = 0;
            fails = fails.saturating_add(1);
            if fails >= policy.fail_threshold && open.is_none() {
                open = Some(Incident {
                    id: None,
                    monitor_id,
                    opened_at: sample.timestamp,
                    closed_at: None,
                    reason: failure_reason(sample),
                    state: IncidentState::Open,
                });
            }
        }
    }

    incidents.extend(open);
    incidents
}

/// The incidents still open at the end of the history.
pub fn active_incidents(monitor_id: i64, samples: &[Sample], policy: IncidentPolicy) -> Vec<Incident> {
    derive_incidents(monitor_id, samples, policy)
        .into_iter()
        .filter(|i| i.state == IncidentState::Open)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn history(outcomes: &str) -> Vec<Sample> {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        outcomes
            .chars()
            .enumerate()
            .map(|(i, c)| {
                let mut s = Sample::new(1, t0 + ChronoDuration::minutes(i as i64), Some(25.0), c == '+');
                if c == '-' {
                    s.status_code = Some(503);
                }
                s
            })
            .collect()
    }

    #[test]
    fn test_opens_on_third_failure_and_resolves_on_second_pass() {
        let samples = history("+---+-++");
        let incidents = derive_incidents(1, &samples, IncidentPolicy::default());

        assert_eq!(incidents.len(), 1);
        let incident = &incidents[0];
        assert_eq!(incident.opened_at, samples[3].timestamp);
        assert_eq!(incident.closed_at, Some(samples[7].timestamp));
        assert_eq!(incident.state, IncidentState::Resolved);
        assert_eq!(incident.reason, "HTTP 503");
    }

    #[test]
    fn test_short_failure_bursts_do_not_open() {
        let incidents = derive_incidents(1, &history("--+--+--+"), IncidentPolicy::default());
        assert!(incidents.is_empty());
    }

    #[test]
    fn test_still_open_at_end() {
        let samples = history("++----+");
        let active = active_incidents(1, &samples, IncidentPolicy::default());
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].closed_at, None);
        assert_eq!(active[0].opened_at, samples[4].timestamp);
    }

    #[test]
    fn test_reopens_after_recovery() {
        let incidents = derive_incidents(1, &history("---++---"), IncidentPolicy::default());
        assert_eq!(incidents.len(), 2);
        assert_eq!(incidents[0].state, IncidentState::Resolved);
        assert_eq!(incidents[1].state, IncidentState::Open);
    }

    #[test]
    fn test_order_and_ownership() {
        let mut samples = history("---");
        samples.reverse();
        let mut other = Sample::new(2, samples[0].timestamp, None, false);
        other.error_reason = Some("connection refused".to_string());
        samples.push(other);

        let incidents = derive_incidents(1, &samples, IncidentPolicy::default());
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].monitor_id, 1);
    }

    #[test]
    fn test_failure_reasons() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut s = Sample::new(1, t, None, false);
        assert_eq!(failure_reason(&s), "network error");
        s.status_code = Some(500);
        assert_eq!(failure_reason(&s), "HTTP 500");
        s.error_reason = Some("timed out".to_string());
        assert_eq!(failure_reason(&s), "timed out");
    }

    #[test]
    fn test_zero_status_code_is_network_error() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut s = Sample::new(1, t, None, false);
        s.status_code = Some(0);
        assert_eq!(failure_reason(&s), "network error");

        s.error_reason = Some(String::new());
        assert_eq!(failure_reason(&s), "network error");
    }

    #[test]
    fn test_policy_validation() {
        assert!(IncidentPolicy::new(0, 2).is_err());
        assert!(IncidentPolicy::new(3, 0).is_err());
        let single = IncidentPolicy::new(1, 1).unwrap();
        let incidents = derive_incidents(1, &history("-+"), single);
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].state, IncidentState::Resolved);
    }
}
