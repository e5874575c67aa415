//! HTTP request handlers.
//!
//! Handlers fetch from the stores, resolve `now`, and hand plain data to the
//! engine. None of them aggregate anything themselves.

use super::AppState;
use crate::db::DbError;
use crate::engine::{
    active_incidents, derive_trend, overall_status, select_samples, Aggregator, CheckMethod, Incident, Monitor,
    RollupKind, Sample, Status, Summary, TrendPoint, Window,
};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Window used when a request does not name one.
const DEFAULT_WINDOW: &str = "24h";

/// Upper bound on requested trend resolution.
const MAX_TREND_BUCKETS: usize = 1440;

// ============================================================================
// Helpers
// ============================================================================

fn bad_request(e: impl Display) -> Response {
    (StatusCode::BAD_REQUEST, e.to_string()).into_response()
}

fn store_error(what: &str, e: DbError) -> Response {
    match e {
        DbError::NotFound => (StatusCode::NOT_FOUND, format!("{} not found", what)).into_response(),
        e => {
            tracing::error!("Store error while loading {}: {}", what, e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn parse_window(token: Option<String>) -> Result<Window, Response> {
    token
        .as_deref()
        .unwrap_or(DEFAULT_WINDOW)
        .parse::<Window>()
        .map_err(bad_request)
}

/// Fetch the samples of `monitor_id` that could fall inside `window`.
fn load_window_samples(
    state: &AppState,
    monitor_id: i64,
    window: Window,
    now: DateTime<Utc>,
) -> Result<Vec<Sample>, DbError> {
    let (start, end) = window.bounds(now);
    state.samples.get_samples(monitor_id, start, end)
}

fn summarize(
    state: &AppState,
    monitor: &Monitor,
    window: Window,
    rollup: RollupKind,
    now: DateTime<Utc>,
) -> Result<Summary, Response> {
    let samples = load_window_samples(state, monitor.id, window, now).map_err(|e| store_error("samples", e))?;
    let summary = Aggregator::with_rollup(state.config.thresholds, rollup)
        .compute_summary(monitor, &samples, window.as_str(), now)
        .map_err(bad_request)?;

    for diagnostic in &summary.diagnostics {
        tracing::debug!("Monitor {}: {}", monitor.id, diagnostic);
    }

    Ok(summary)
}

// ============================================================================
// Health
// ============================================================================

pub async fn handle_healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

// ============================================================================
// API: Monitors
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MonitorRequest {
    pub name: String,
    pub url: String,
    #[serde(default, alias = "method")]
    pub check_method: Option<String>,
    #[serde(default)]
    pub interval_sec: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u32>,
    #[serde(default)]
    pub expected_statuses: Option<Vec<i32>>,
    #[serde(default)]
    pub is_enabled: Option<bool>,
}

impl MonitorRequest {
    /// Validate the request and build the monitor it describes.
    pub fn into_monitor(self, id: i64) -> Result<Monitor, String> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err("name must not be empty".to_string());
        }

        let check_method = match self.check_method {
            Some(method) => method.parse::<CheckMethod>()?,
            None => CheckMethod::default(),
        };

        let url = self.url.trim().to_string();
        match check_method {
            CheckMethod::Http(_) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                return Err(format!("invalid url for HTTP check: {}", url));
            }
            _ if url.is_empty() => return Err("url must not be empty".to_string()),
            _ => {}
        }

        let interval_sec = self.interval_sec.unwrap_or(60);
        let timeout_ms = self.timeout_ms.unwrap_or(5000);
        if interval_sec == 0 || timeout_ms == 0 {
            return Err("interval_sec and timeout_ms must be positive".to_string());
        }

        let expected_statuses = self.expected_statuses.unwrap_or_else(|| vec![200]);
        if let CheckMethod::Http(_) = check_method {
            if let Some(code) = expected_statuses.iter().find(|c| !(100..=599).contains(*c)) {
                return Err(format!("invalid HTTP status code: {}", code));
            }
        }

        Ok(Monitor {
            id,
            name,
            url,
            check_method,
            interval_sec,
            timeout_ms,
            expected_statuses,
            is_enabled: self.is_enabled.unwrap_or(true),
        })
    }
}

pub async fn handle_list_monitors(State(state): State<AppState>) -> impl IntoResponse {
    match state.monitors.list_monitors() {
        Ok(monitors) => Json(monitors).into_response(),
        Err(e) => store_error("monitors", e),
    }
}

pub async fn handle_create_monitor(
    State(state): State<AppState>,
    Json(req): Json<MonitorRequest>,
) -> impl IntoResponse {
    let mut monitor = match req.into_monitor(0) {
        Ok(m) => m,
        Err(e) => return bad_request(e),
    };

    match state.monitors.add_monitor(&mut monitor) {
        Ok(_) => {
            tracing::info!("Created monitor {} ({})", monitor.id, monitor.name);
            (StatusCode::CREATED, Json(monitor)).into_response()
        }
        Err(e) => store_error("monitor", e),
    }
}

pub async fn handle_update_monitor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<MonitorRequest>,
) -> impl IntoResponse {
    if let Err(e) = state.monitors.get_monitor(id) {
        return store_error("monitor", e);
    }

    let updated = match req.into_monitor(id) {
        Ok(m) => m,
        Err(e) => return bad_request(e),
    };

    match state.monitors.update_monitor(&updated) {
        Ok(_) => Json(updated).into_response(),
        Err(e) => store_error("monitor", e),
    }
}

pub async fn handle_delete_monitor(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.monitors.delete_monitor(id) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => store_error("monitor", e),
    }
}

// ============================================================================
// API: Sample ingest
// ============================================================================

/// One check result as reported by a collector.
#[derive(Debug, Deserialize)]
pub struct IngestSample {
    /// Defaults to the time of receipt.
    pub timestamp: Option<DateTime<Utc>>,
    pub latency_ms: Option<f64>,
    pub status_code: Option<i32>,
    /// Defaults to whether `status_code` is one of the monitor's expected statuses.
    pub success: Option<bool>,
    pub error_reason: Option<String>,
}

pub async fn handle_ingest_samples(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(batch): Json<Vec<IngestSample>>,
) -> impl IntoResponse {
    let monitor = match state.monitors.get_monitor(id) {
        Ok(m) => m,
        Err(e) => return store_error("monitor", e),
    };

    let received = Utc::now();
    let samples: Vec<Sample> = batch
        .into_iter()
        .map(|s| Sample {
            monitor_id: Some(monitor.id),
            timestamp: s.timestamp.unwrap_or(received),
            latency_ms: s.latency_ms,
            success: s.success.unwrap_or_else(|| monitor.accepts(s.status_code)),
            status_code: s.status_code,
            error_reason: s.error_reason,
        })
        .collect();

    match state.samples.add_samples(&samples) {
        Ok(_) => {
            tracing::debug!("Stored {} samples for monitor {}", samples.len(), id);
            (StatusCode::CREATED, Json(serde_json::json!({ "accepted": samples.len() }))).into_response()
        }
        Err(e) => store_error("samples", e),
    }
}

// ============================================================================
// API: Summaries and trends
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    #[serde(default)]
    pub window: Option<String>,
    /// Latency rollup for `avg_latency_ms`: avg (default), p50, p95 or max.
    #[serde(default)]
    pub rollup: Option<String>,
}

pub async fn handle_summary(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<SummaryQuery>,
) -> impl IntoResponse {
    let window = match parse_window(query.window) {
        Ok(w) => w,
        Err(resp) => return resp,
    };
    let rollup = match query.rollup.as_deref().map(|r| r.parse::<RollupKind>()).transpose() {
        Ok(r) => r.unwrap_or_default(),
        Err(e) => return bad_request(e),
    };

    let monitor = match state.monitors.get_monitor(id) {
        Ok(m) => m,
        Err(e) => return store_error("monitor", e),
    };

    match summarize(&state, &monitor, window, rollup, Utc::now()) {
        Ok(summary) => Json(summary).into_response(),
        Err(resp) => resp,
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TrendQuery {
    #[serde(default)]
    pub window: Option<String>,
    #[serde(default)]
    pub buckets: Option<usize>,
}

pub async fn handle_trend(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<TrendQuery>,
) -> impl IntoResponse {
    let window = match parse_window(query.window) {
        Ok(w) => w,
        Err(resp) => return resp,
    };
    let bucket_count = query.buckets.unwrap_or(state.config.trend_buckets);
    if bucket_count > MAX_TREND_BUCKETS {
        return bad_request(format!("at most {} buckets are supported", MAX_TREND_BUCKETS));
    }

    let monitor = match state.monitors.get_monitor(id) {
        Ok(m) => m,
        Err(e) => return store_error("monitor", e),
    };

    let now = Utc::now();
    let samples = match load_window_samples(&state, monitor.id, window, now) {
        Ok(s) => s,
        Err(e) => return store_error("samples", e),
    };

    let selection = select_samples(monitor.id, &samples, window, now);
    for diagnostic in &selection.diagnostics {
        tracing::debug!("Monitor {}: {}", monitor.id, diagnostic);
    }
    let points: Vec<TrendPoint> = selection.samples.iter().map(|(_, s)| TrendPoint::from(*s)).collect();

    match derive_trend(&points, bucket_count, state.config.empty_bucket_policy) {
        Ok(trend) => Json(trend).into_response(),
        Err(e) => bad_request(e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub window: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MonitorStatus {
    pub id: i64,
    pub name: String,
    #[serde(flatten)]
    pub summary: Summary,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub window: String,
    pub overall: Status,
    pub monitors: Vec<MonitorStatus>,
}

/// Summaries for every monitor plus the dashboard-wide status.
pub async fn handle_status(State(state): State<AppState>, Query(query): Query<StatusQuery>) -> impl IntoResponse {
    let window = match parse_window(query.window) {
        Ok(w) => w,
        Err(resp) => return resp,
    };

    let monitors = match state.monitors.list_monitors() {
        Ok(m) => m,
        Err(e) => return store_error("monitors", e),
    };

    let now = Utc::now();
    let mut statuses = Vec::with_capacity(monitors.len());
    for monitor in monitors {
        let summary = match summarize(&state, &monitor, window, RollupKind::Avg, now) {
            Ok(s) => s,
            Err(resp) => return resp,
        };
        statuses.push(MonitorStatus {
            id: monitor.id,
            name: monitor.name,
            summary,
        });
    }

    let overall = overall_status(statuses.iter().map(|s| s.summary.status));
    Json(StatusResponse {
        window: window.as_str().to_string(),
        overall,
        monitors: statuses,
    })
    .into_response()
}

// ============================================================================
// API: Incidents
// ============================================================================

/// Incidents still open, replayed from the last 30 days of samples.
///
/// An incident carries the id the notifier recorded it under, once it has.
pub async fn handle_active_incidents(State(state): State<AppState>) -> impl IntoResponse {
    let monitors = match state.monitors.list_monitors() {
        Ok(m) => m,
        Err(e) => return store_error("monitors", e),
    };

    let now = Utc::now();
    let mut incidents: Vec<Incident> = Vec::new();
    for monitor in &monitors {
        let samples = match load_window_samples(&state, monitor.id, Window::Month, now) {
            Ok(s) => s,
            Err(e) => return store_error("samples", e),
        };
        let mut active = active_incidents(monitor.id, &samples, state.config.incident_policy);
        if !active.is_empty() {
            match state.incidents.open_incident(monitor.id) {
                Ok(Some(recorded)) => {
                    for incident in &mut active {
                        incident.id = recorded.id;
                    }
                }
                Ok(None) => {}
                Err(e) => return store_error("incidents", e),
            }
        }
        incidents.extend(active);
    }

    incidents.sort_by_key(|i| i.opened_at);
    Json(incidents).into_response()
}

/// Delivery attempts recorded for one incident.
pub async fn handle_list_notifications(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.incidents.list_notifications(id) {
        Ok(notifications) => Json(notifications).into_response(),
        Err(e) => store_error("notifications", e),
    }
}
