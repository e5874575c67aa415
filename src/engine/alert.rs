//! Alert events raised by incident transitions, and the record of their delivery.

use super::incident::{Incident, IncidentState};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Incident,
    Recovered,
}

/// One incident transition to tell operators about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub monitor_id: i64,
    pub incident_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the transition happened, taken from the sample that caused it.
    pub at: DateTime<Utc>,
}

impl AlertEvent {
    /// Human-readable text in Telegram Markdown.
    pub fn message(&self) -> String {
        match self.kind {
            AlertKind::Incident => format!(
                "*Incident* monitor #{}\nReason: {}",
                self.monitor_id,
                self.reason.as_deref().unwrap_or("unknown")
            ),
            AlertKind::Recovered => format!("*Recovered* monitor #{}", self.monitor_id),
        }
    }
}

/// Events owed for `incident` given the state stored for it before this replay.
///
/// A never-seen incident raises `Incident`, and also `Recovered` if it has
/// already resolved. A stored open incident that has now resolved raises
/// `Recovered`. Anything else raises nothing.
pub fn alert_events(incident: &Incident, incident_id: i64, previous: Option<IncidentState>) -> Vec<AlertEvent> {
    let mut events = Vec::new();

    if previous.is_none() {
        events.push(AlertEvent {
            kind: AlertKind::Incident,
            monitor_id: incident.monitor_id,
            incident_id,
            reason: Some(incident.reason.clone()),
            at: incident.opened_at,
        });
    }

    if incident.state == IncidentState::Resolved && previous != Some(IncidentState::Resolved) {
        if let Some(closed_at) = incident.closed_at {
            events.push(AlertEvent {
                kind: AlertKind::Recovered,
                monitor_id: incident.monitor_id,
                incident_id,
                reason: None,
                at: closed_at,
            });
        }
    }

    events
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status: {}", other)),
        }
    }
}

/// A delivery attempt for one alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub incident_id: Option<i64>,
    /// `telegram`, `webhook` or `noop`.
    pub channel: String,
    pub sent_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub detail: String,
}
