//! SQLite store implementation.

use super::{IncidentStore, MonitorStore, SampleStore};
use crate::engine::{CheckMethod, DeliveryStatus, Incident, IncidentState, Monitor, Notification, Sample};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const MONITOR_COLUMNS: &str =
    "id, name, url, check_method, interval_sec, timeout_ms, expected_statuses, is_enabled";

const INCIDENT_COLUMNS: &str = "id, monitor_id, opened_at, closed_at, reason, state";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("Invalid record: {0}")]
    Invalid(String),
    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Create a store backed by a private in-memory database.
    pub fn in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        conn.execute_batch(include_str!("../../migrations/000002_incidents.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 2 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    #[cfg(test)]
    pub fn sample_count(&self) -> Result<i64, DbError> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM checks", [], |r| r.get(0))?)
    }
}

fn conversion_error(column: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, ty, msg.into())
}

fn monitor_from_row(row: &Row<'_>) -> SqlResult<Monitor> {
    let method: String = row.get(3)?;
    let check_method = method
        .parse::<CheckMethod>()
        .map_err(|e| conversion_error(3, Type::Text, e))?;

    let statuses: String = row.get(6)?;
    let expected_statuses = serde_json::from_str(&statuses)
        .map_err(|e| conversion_error(6, Type::Text, format!("expected_statuses: {}", e)))?;

    Ok(Monitor {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        check_method,
        interval_sec: row.get(4)?,
        timeout_ms: row.get(5)?,
        expected_statuses,
        is_enabled: row.get(7)?,
    })
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_db_time(&raw).ok_or_else(|| conversion_error(idx, Type::Text, format!("bad timestamp {:?}", raw)))
}

fn incident_from_row(row: &Row<'_>) -> SqlResult<Incident> {
    let closed_at: Option<String> = row.get(3)?;
    let closed_at = match closed_at {
        Some(raw) => Some(
            parse_db_time(&raw).ok_or_else(|| conversion_error(3, Type::Text, format!("bad timestamp {:?}", raw)))?,
        ),
        None => None,
    };
    let state: String = row.get(5)?;
    let state = state
        .parse::<IncidentState>()
        .map_err(|e| conversion_error(5, Type::Text, e))?;

    Ok(Incident {
        id: Some(row.get(0)?),
        monitor_id: row.get(1)?,
        opened_at: time_column(row, 2)?,
        closed_at,
        reason: row.get(4)?,
        state,
    })
}

fn notification_from_row(row: &Row<'_>) -> SqlResult<Notification> {
    let status: String = row.get(4)?;
    let status = status
        .parse::<DeliveryStatus>()
        .map_err(|e| conversion_error(4, Type::Text, e))?;

    Ok(Notification {
        id: row.get(0)?,
        incident_id: row.get(1)?,
        channel: row.get(2)?,
        sent_at: time_column(row, 3)?,
        status,
        detail: row.get(5)?,
    })
}

fn encode_statuses(statuses: &[i32]) -> Result<String, DbError> {
    serde_json::to_string(statuses).map_err(|e| DbError::Invalid(e.to_string()))
}

impl MonitorStore for Store {
    fn add_monitor(&self, monitor: &mut Monitor) -> Result<i64, DbError> {
        let statuses = encode_statuses(&monitor.expected_statuses)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO monitors (name, url, check_method, interval_sec, timeout_ms, expected_statuses, is_enabled) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                monitor.name,
                monitor.url,
                monitor.check_method.to_string(),
                monitor.interval_sec,
                monitor.timeout_ms,
                statuses,
                monitor.is_enabled,
            ],
        )?;
        let id = conn.last_insert_rowid();
        monitor.id = id;
        Ok(id)
    }

    fn update_monitor(&self, monitor: &Monitor) -> Result<(), DbError> {
        let statuses = encode_statuses(&monitor.expected_statuses)?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE monitors SET name=?1, url=?2, check_method=?3, interval_sec=?4, timeout_ms=?5, expected_statuses=?6, is_enabled=?7 WHERE id=?8",
            params![
                monitor.name,
                monitor.url,
                monitor.check_method.to_string(),
                monitor.interval_sec,
                monitor.timeout_ms,
                statuses,
                monitor.is_enabled,
                monitor.id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    fn get_monitor(&self, id: i64) -> Result<Monitor, DbError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM monitors WHERE id = ?1", MONITOR_COLUMNS);
        match conn.query_row(&sql, params![id], monitor_from_row) {
            Ok(monitor) => Ok(monitor),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(DbError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    fn list_monitors(&self) -> Result<Vec<Monitor>, DbError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM monitors ORDER BY id DESC", MONITOR_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let monitors = stmt
            .query_map([], monitor_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(monitors)
    }

    fn delete_monitor(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM notifications WHERE incident_id IN (SELECT id FROM incidents WHERE monitor_id = ?1)",
            params![id],
        )?;
        tx.execute("DELETE FROM incidents WHERE monitor_id = ?1", params![id])?;
        tx.execute("DELETE FROM checks WHERE monitor_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM monitors WHERE id = ?1", params![id])?;
        tx.commit()?;
        if deleted == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}

impl SampleStore for Store {
    fn add_samples(&self, samples: &[Sample]) -> Result<(), DbError> {
        if samples.is_empty() {
            return Ok(());
        }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO checks (monitor_id, ts, status_code, latency_ms, ok, error_reason) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;

            for s in samples {
                let monitor_id = s
                    .monitor_id
                    .ok_or_else(|| DbError::Invalid("sample without monitor_id".to_string()))?;
                stmt.execute(params![
                    monitor_id,
                    s.timestamp.format(TIME_FORMAT).to_string(),
                    s.status_code,
                    s.latency_ms,
                    s.success,
                    s.error_reason,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn get_samples(
        &self,
        monitor_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Sample>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT monitor_id, ts, latency_ms, ok, status_code, error_reason FROM checks
             WHERE monitor_id = ?1 AND ts >= ?2 AND ts < ?3 ORDER BY ts ASC",
        )?;

        let samples = stmt
            .query_map(
                params![
                    monitor_id,
                    start.format(TIME_FORMAT).to_string(),
                    end.format(TIME_FORMAT).to_string(),
                ],
                |row| {
                    Ok(Sample {
                        monitor_id: Some(row.get(0)?),
                        timestamp: time_column(row, 1)?,
                        latency_ms: row.get(2)?,
                        success: row.get(3)?,
                        status_code: row.get(4)?,
                        error_reason: row.get(5)?,
                    })
                },
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(samples)
    }

    fn delete_samples_before(&self, monitor_id: i64, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM checks WHERE monitor_id = ?1 AND ts < ?2",
            params![monitor_id, cutoff.format(TIME_FORMAT).to_string()],
        )?;
        Ok(deleted)
    }
}

impl IncidentStore for Store {
    fn add_incident(&self, incident: &Incident) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO incidents (monitor_id, opened_at, closed_at, reason, state) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                incident.monitor_id,
                incident.opened_at.format(TIME_FORMAT).to_string(),
                incident.closed_at.map(|t| t.format(TIME_FORMAT).to_string()),
                incident.reason,
                incident.state.as_str(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn find_incident(&self, monitor_id: i64, opened_at: DateTime<Utc>) -> Result<Option<Incident>, DbError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM incidents WHERE monitor_id = ?1 AND opened_at = ?2",
            INCIDENT_COLUMNS
        );
        let incident = conn
            .query_row(
                &sql,
                params![monitor_id, opened_at.format(TIME_FORMAT).to_string()],
                incident_from_row,
            )
            .optional()?;
        Ok(incident)
    }

    fn open_incident(&self, monitor_id: i64) -> Result<Option<Incident>, DbError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM incidents WHERE monitor_id = ?1 AND state = 'open' ORDER BY opened_at DESC LIMIT 1",
            INCIDENT_COLUMNS
        );
        let incident = conn
            .query_row(&sql, params![monitor_id], incident_from_row)
            .optional()?;
        Ok(incident)
    }

    fn resolve_incident(&self, id: i64, closed_at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE incidents SET state = ?1, closed_at = ?2 WHERE id = ?3",
            params![
                IncidentState::Resolved.as_str(),
                closed_at.format(TIME_FORMAT).to_string(),
                id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    fn add_notification(&self, notification: &Notification) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO notifications (incident_id, channel, sent_at, status, detail) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                notification.incident_id,
                notification.channel,
                notification.sent_at.format(TIME_FORMAT).to_string(),
                notification.status.as_str(),
                notification.detail,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list_notifications(&self, incident_id: i64) -> Result<Vec<Notification>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, incident_id, channel, sent_at, status, detail FROM notifications
             WHERE incident_id = ?1 ORDER BY id ASC",
        )?;
        let notifications = stmt
            .query_map(params![incident_id], notification_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(notifications)
    }
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tempfile::NamedTempFile;

    fn sample_monitor() -> Monitor {
        Monitor {
            name: "API".to_string(),
            url: "https://api.example.com/health".to_string(),
            check_method: CheckMethod::Http("HEAD".to_string()),
            expected_statuses: vec![200, 204],
            ..Default::default()
        }
    }

    #[test]
    fn test_monitor_crud() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        // Create
        let mut monitor = sample_monitor();
        let id = store.add_monitor(&mut monitor).unwrap();
        assert!(id > 0);
        assert_eq!(monitor.id, id);

        // Read
        let fetched = store.get_monitor(id).unwrap();
        assert_eq!(fetched, monitor);

        // Update
        let mut updated = fetched;
        updated.is_enabled = false;
        updated.check_method = CheckMethod::Port;
        store.update_monitor(&updated).unwrap();
        assert_eq!(store.get_monitor(id).unwrap(), updated);

        // Delete
        store.delete_monitor(id).unwrap();
        assert!(matches!(store.get_monitor(id), Err(DbError::NotFound)));
        assert!(matches!(store.delete_monitor(id), Err(DbError::NotFound)));
    }

    #[test]
    fn test_list_newest_first() {
        let store = Store::in_memory().unwrap();
        let first = store.add_monitor(&mut sample_monitor()).unwrap();
        let second = store.add_monitor(&mut sample_monitor()).unwrap();

        let ids: Vec<i64> = store.list_monitors().unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[test]
    fn test_update_missing_monitor() {
        let store = Store::in_memory().unwrap();
        let ghost = Monitor {
            id: 42,
            ..sample_monitor()
        };
        assert!(matches!(store.update_monitor(&ghost), Err(DbError::NotFound)));
    }

    #[test]
    fn test_sample_range_is_half_open() {
        let store = Store::in_memory().unwrap();
        let id = store.add_monitor(&mut sample_monitor()).unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        let mut failed = Sample::new(id, t0 + ChronoDuration::minutes(1), None, false);
        failed.status_code = Some(502);
        failed.error_reason = Some("bad gateway".to_string());
        let samples = vec![
            Sample::new(id, t0, Some(12.5), true),
            failed.clone(),
            Sample::new(id, t0 + ChronoDuration::minutes(2), Some(14.0), true),
        ];
        store.add_samples(&samples).unwrap();
        assert_eq!(store.sample_count().unwrap(), 3);

        let fetched = store
            .get_samples(id, t0, t0 + ChronoDuration::minutes(2))
            .unwrap();
        assert_eq!(fetched, vec![samples[0].clone(), failed]);
    }

    #[test]
    fn test_delete_samples() {
        let store = Store::in_memory().unwrap();
        let id = store.add_monitor(&mut sample_monitor()).unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let samples: Vec<Sample> = (0..5)
            .map(|i| Sample::new(id, t0 + ChronoDuration::minutes(i), Some(1.0), true))
            .collect();
        store.add_samples(&samples).unwrap();

        let deleted = store
            .delete_samples_before(id, t0 + ChronoDuration::minutes(3))
            .unwrap();
        assert_eq!(deleted, 3);

        // Deleting the monitor removes its remaining samples
        store.delete_monitor(id).unwrap();
        assert_eq!(store.sample_count().unwrap(), 0);
    }

    #[test]
    fn test_orphan_sample_rejected() {
        let store = Store::in_memory().unwrap();
        let mut orphan = Sample::new(1, Utc::now(), None, true);
        orphan.monitor_id = None;
        assert!(matches!(store.add_samples(&[orphan]), Err(DbError::Invalid(_))));
    }

    fn sample_incident(monitor_id: i64, opened_at: DateTime<Utc>) -> Incident {
        Incident {
            id: None,
            monitor_id,
            opened_at,
            closed_at: None,
            reason: "HTTP 503".to_string(),
            state: IncidentState::Open,
        }
    }

    #[test]
    fn test_incident_lifecycle() {
        let store = Store::in_memory().unwrap();
        let monitor_id = store.add_monitor(&mut sample_monitor()).unwrap();
        let opened_at = Utc.with_ymd_and_hms(2024, 2, 1, 8, 30, 0).unwrap();

        assert_eq!(store.open_incident(monitor_id).unwrap(), None);
        let id = store.add_incident(&sample_incident(monitor_id, opened_at)).unwrap();

        let open = store.open_incident(monitor_id).unwrap().unwrap();
        assert_eq!(open.id, Some(id));
        assert_eq!(open.opened_at, opened_at);
        assert_eq!(store.find_incident(monitor_id, opened_at).unwrap(), Some(open));
        assert_eq!(
            store
                .find_incident(monitor_id, opened_at + ChronoDuration::seconds(1))
                .unwrap(),
            None
        );

        let closed_at = opened_at + ChronoDuration::minutes(5);
        store.resolve_incident(id, closed_at).unwrap();
        assert_eq!(store.open_incident(monitor_id).unwrap(), None);
        let resolved = store.find_incident(monitor_id, opened_at).unwrap().unwrap();
        assert_eq!(resolved.state, IncidentState::Resolved);
        assert_eq!(resolved.closed_at, Some(closed_at));

        assert!(matches!(store.resolve_incident(id + 10, closed_at), Err(DbError::NotFound)));
    }

    #[test]
    fn test_duplicate_incident_rejected() {
        let store = Store::in_memory().unwrap();
        let monitor_id = store.add_monitor(&mut sample_monitor()).unwrap();
        let opened_at = Utc.with_ymd_and_hms(2024, 2, 1, 8, 30, 0).unwrap();
        store.add_incident(&sample_incident(monitor_id, opened_at)).unwrap();
        assert!(matches!(
            store.add_incident(&sample_incident(monitor_id, opened_at)),
            Err(DbError::Sqlite(_))
        ));
    }

    #[test]
    fn test_notifications_removed_with_monitor() {
        let store = Store::in_memory().unwrap();
        let monitor_id = store.add_monitor(&mut sample_monitor()).unwrap();
        let opened_at = Utc.with_ymd_and_hms(2024, 2, 1, 8, 30, 0).unwrap();
        let incident_id = store.add_incident(&sample_incident(monitor_id, opened_at)).unwrap();

        let notification = Notification {
            id: 0,
            incident_id: Some(incident_id),
            channel: "webhook".to_string(),
            sent_at: opened_at,
            status: DeliveryStatus::Failed,
            detail: "*Incident* monitor #1".to_string(),
        };
        let notification_id = store.add_notification(&notification).unwrap();

        let listed = store.list_notifications(incident_id).unwrap();
        assert_eq!(
            listed,
            vec![Notification {
                id: notification_id,
                ..notification
            }]
        );

        store.delete_monitor(monitor_id).unwrap();
        assert!(store.list_notifications(incident_id).unwrap().is_empty());
        assert_eq!(store.find_incident(monitor_id, opened_at).unwrap(), None);
    }

    #[test]
    fn test_parse_db_time() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_db_time("2024-01-01 12:00:00.000000000"), Some(expected));
        assert_eq!(parse_db_time("2024-01-01 12:00:00"), Some(expected));
        assert_eq!(parse_db_time("2024-01-01T12:00:00Z"), Some(expected));
        assert_eq!(parse_db_time("yesterday"), None);
    }
}
