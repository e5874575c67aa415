//! Storage for monitors and raw check samples.
//!
//! The engine never talks to storage itself; handlers fetch through these
//! traits and pass plain data in.

mod store;

pub use store::*;

use crate::engine::{Incident, Monitor, Notification, Sample};
use chrono::{DateTime, Utc};

/// Source of monitor configuration.
pub trait MonitorStore: Send + Sync {
    /// Insert `monitor`, assigning and returning its id.
    fn add_monitor(&self, monitor: &mut Monitor) -> Result<i64, DbError>;
    fn update_monitor(&self, monitor: &Monitor) -> Result<(), DbError>;
    fn get_monitor(&self, id: i64) -> Result<Monitor, DbError>;
    /// All monitors, newest first.
    fn list_monitors(&self) -> Result<Vec<Monitor>, DbError>;
    /// Delete a monitor with its samples, incidents and notifications.
    fn delete_monitor(&self, id: i64) -> Result<(), DbError>;
}

/// Source of raw check samples.
///
/// Range queries are coarse: callers re-filter against the exact window.
pub trait SampleStore: Send + Sync {
    fn add_samples(&self, samples: &[Sample]) -> Result<(), DbError>;
    /// Samples of `monitor_id` with `start <= timestamp < end`, oldest first.
    fn get_samples(
        &self,
        monitor_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Sample>, DbError>;
    fn delete_samples_before(&self, monitor_id: i64, cutoff: DateTime<Utc>) -> Result<usize, DbError>;
}

/// Recorded incidents and alert deliveries.
///
/// Incidents are keyed by monitor and opening time; a monitor has at most
/// one open incident.
pub trait IncidentStore: Send + Sync {
    /// Record a new incident, returning its id.
    fn add_incident(&self, incident: &Incident) -> Result<i64, DbError>;
    fn find_incident(&self, monitor_id: i64, opened_at: DateTime<Utc>) -> Result<Option<Incident>, DbError>;
    /// The monitor's open incident, if any.
    fn open_incident(&self, monitor_id: i64) -> Result<Option<Incident>, DbError>;
    fn resolve_incident(&self, id: i64, closed_at: DateTime<Utc>) -> Result<(), DbError>;
    /// Record a delivery attempt, returning its id.
    fn add_notification(&self, notification: &Notification) -> Result<i64, DbError>;
    /// Delivery attempts for an incident, oldest first.
    fn list_notifications(&self, incident_id: i64) -> Result<Vec<Notification>, DbError>;
}
