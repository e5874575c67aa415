//! Core data types: monitors, samples and the summary projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a monitor checks its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CheckMethod {
    /// An HTTP request with the given verb (GET, HEAD, POST, ...).
    Http(String),
    Ping,
    Port,
}

const HTTP_VERBS: &[&str] = &["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"];

impl Default for CheckMethod {
    fn default() -> Self {
        CheckMethod::Http("GET".to_string())
    }
}

impl FromStr for CheckMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "PING" => Ok(CheckMethod::Ping),
            "PORT" => Ok(CheckMethod::Port),
            verb if HTTP_VERBS.contains(&verb) => Ok(CheckMethod::Http(verb.to_string())),
            _ => Err(format!("unknown check method: {}", s)),
        }
    }
}

impl TryFrom<String> for CheckMethod {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CheckMethod> for String {
    fn from(method: CheckMethod) -> Self {
        method.to_string()
    }
}

impl fmt::Display for CheckMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckMethod::Http(verb) => f.write_str(verb),
            CheckMethod::Ping => f.write_str("PING"),
            CheckMethod::Port => f.write_str("PORT"),
        }
    }
}

/// A monitor configuration as edited by an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub check_method: CheckMethod,
    pub interval_sec: u32,
    pub timeout_ms: u32,
    pub expected_statuses: Vec<i32>,
    pub is_enabled: bool,
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            url: String::new(),
            check_method: CheckMethod::default(),
            interval_sec: 60,
            timeout_ms: 5000,
            expected_statuses: vec![200],
            is_enabled: true,
        }
    }
}

impl Monitor {
    /// Whether a raw result code satisfies this monitor's pass criteria.
    ///
    /// A check that never produced a code (connection refused, timeout)
    /// never passes. An empty `expected_statuses` list falls back to `[200]`.
    pub fn accepts(&self, status_code: Option<i32>) -> bool {
        let Some(code) = status_code else {
            return false;
        };
        if self.expected_statuses.is_empty() {
            return code == 200;
        }
        self.expected_statuses.contains(&code)
    }
}

/// One health-check result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Owning monitor. `None` only for malformed input.
    #[serde(default)]
    pub monitor_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    /// Response time, or `None` if the check never completed a connection.
    #[serde(default)]
    pub latency_ms: Option<f64>,
    pub success: bool,
    #[serde(default)]
    pub status_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl Sample {
    pub fn new(monitor_id: i64, timestamp: DateTime<Utc>, latency_ms: Option<f64>, success: bool) -> Self {
        Self {
            monitor_id: Some(monitor_id),
            timestamp,
            latency_ms,
            success,
            status_code: None,
            error_reason: None,
        }
    }

    /// The latency if it is usable for aggregation.
    pub fn valid_latency(&self) -> Option<f64> {
        usable_latency(self.latency_ms)
    }
}

/// Keeps a latency only if it is finite and non-negative.
pub fn usable_latency(latency_ms: Option<f64>) -> Option<f64> {
    latency_ms.filter(|l| l.is_finite() && *l >= 0.0)
}

/// Derived health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Up,
    Degraded,
    Down,
    Paused,
    Unknown,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Up => "up",
            Status::Degraded => "degraded",
            Status::Down => "down",
            Status::Paused => "paused",
            Status::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Aggregated view of one monitor over one window.
///
/// Serializes to exactly the presentation contract; `None` becomes `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub uptime_percent: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub window: String,
    pub sample_count: usize,
    pub status: Status,
    /// Per-sample problems found while aggregating. Not part of the JSON shape.
    #[serde(skip)]
    pub diagnostics: Vec<SampleDiagnostic>,
}

/// Why a sample was excluded from (part of) an aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// No owning monitor; the sample was dropped.
    MissingMonitorId,
    /// Timestamp before the Unix epoch; the sample was dropped.
    NegativeTimestamp,
    /// NaN, infinite or negative latency; counted for uptime, left out of latency.
    MalformedLatency,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleDiagnostic {
    /// Position of the offending sample in the caller's input.
    pub index: usize,
    pub kind: DiagnosticKind,
}

impl fmt::Display for SampleDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            DiagnosticKind::MissingMonitorId => "missing monitor_id, excluded",
            DiagnosticKind::NegativeTimestamp => "negative timestamp, excluded",
            DiagnosticKind::MalformedLatency => "malformed latency, excluded from latency rollup",
        };
        write!(f, "sample #{}: {}", self.index, what)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_check_method_parse() {
        assert_eq!("get".parse::<CheckMethod>().unwrap(), CheckMethod::Http("GET".to_string()));
        assert_eq!("PING".parse::<CheckMethod>().unwrap(), CheckMethod::Ping);
        assert_eq!(" port ".parse::<CheckMethod>().unwrap(), CheckMethod::Port);
        assert!("TELNET".parse::<CheckMethod>().is_err());
    }

    #[test]
    fn test_monitor_accepts() {
        let monitor = Monitor {
            expected_statuses: vec![200, 204],
            ..Default::default()
        };
        assert!(monitor.accepts(Some(204)));
        assert!(!monitor.accepts(Some(500)));
        assert!(!monitor.accepts(None));

        let fallback = Monitor {
            expected_statuses: vec![],
            ..Default::default()
        };
        assert!(fallback.accepts(Some(200)));
        assert!(!fallback.accepts(Some(301)));
    }

    #[test]
    fn test_valid_latency() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(Sample::new(1, ts, Some(12.5), true).valid_latency(), Some(12.5));
        assert_eq!(Sample::new(1, ts, Some(-1.0), true).valid_latency(), None);
        assert_eq!(Sample::new(1, ts, Some(f64::NAN), true).valid_latency(), None);
        assert_eq!(Sample::new(1, ts, None, false).valid_latency(), None);
    }

    #[test]
    fn test_summary_json_shape() {
        let summary = Summary {
            uptime_percent: None,
            avg_latency_ms: None,
            window: "24h".to_string(),
            sample_count: 0,
            status: Status::Unknown,
            diagnostics: vec![SampleDiagnostic { index: 0, kind: DiagnosticKind::MissingMonitorId }],
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "uptime_percent": null,
                "avg_latency_ms": null,
                "window": "24h",
                "sample_count": 0,
                "status": "unknown",
            })
        );
    }

    #[test]
    fn test_monitor_json_method() {
        let monitor = Monitor {
            check_method: CheckMethod::Ping,
            ..Default::default()
        };
        let json = serde_json::to_value(&monitor).unwrap();
        assert_eq!(json["check_method"], "PING");

        let back: Monitor = serde_json::from_value(json).unwrap();
        assert_eq!(back.check_method, CheckMethod::Ping);
    }
}
