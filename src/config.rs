//! Configuration module.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::engine::{EmptyBucketPolicy, IncidentPolicy, StatusThresholds};
use crate::notifier::AlertChannel;
use crate::retention::{MAX_RETENTION_DAYS, MIN_RETENTION_DAYS};

use std::env;
use std::str::FromStr;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "uptime.db")
    pub db_path: String,
    /// Uptime thresholds for Up / Degraded / Down (default: 99 / 95)
    pub thresholds: StatusThresholds,
    /// Default number of trend buckets (default: 36)
    pub trend_buckets: usize,
    /// How empty trend buckets are reported (default: assume ok)
    pub empty_bucket_policy: EmptyBucketPolicy,
    /// Consecutive failures / passes that open / resolve an incident (default: 3 / 2)
    pub incident_policy: IncidentPolicy,
    /// Days of raw samples to keep, 30 to 36500 (default: 90)
    pub retention_days: i64,
    /// Where incident alerts are sent (default: log only)
    pub alert_channel: AlertChannel,
    /// Seconds between notifier passes (default: 30)
    pub alert_interval_sec: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "uptime.db".to_string(),
            thresholds: StatusThresholds::default(),
            trend_buckets: 36,
            empty_bucket_policy: EmptyBucketPolicy::default(),
            incident_policy: IncidentPolicy::default(),
            retention_days: 90,
            alert_channel: AlertChannel::Log,
            alert_interval_sec: 30,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `UPTIME_HTTP_PORT`: HTTP port (default: 8080)
    /// - `UPTIME_DB_PATH`: Database file path (default: "uptime.db")
    /// - `UPTIME_UP_THRESHOLD`, `UPTIME_DEGRADED_THRESHOLD`: uptime percentages (default: 99, 95)
    /// - `UPTIME_TREND_BUCKETS`: default trend resolution (default: 36)
    /// - `UPTIME_STRICT_EMPTY_BUCKETS`: report empty buckets as unknown (default: false)
    /// - `UPTIME_FAIL_THRESHOLD`, `UPTIME_RECOVER_THRESHOLD`: incident streaks (default: 3, 2)
    /// - `UPTIME_RETENTION_DAYS`: raw sample retention (default: 90)
    /// - `UPTIME_TELEGRAM_BOT_TOKEN`, `UPTIME_TELEGRAM_CHAT_ID`: send alerts to Telegram
    /// - `UPTIME_ALERT_WEBHOOK_URL`: POST alerts as JSON, used when Telegram is not set
    /// - `UPTIME_ALERT_INTERVAL_SEC`: notifier pass interval (default: 30)
    ///
    /// Values that fail to parse or validate keep their default and log a warning.
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = parse_var(&lookup, "UPTIME_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("UPTIME_DB_PATH") {
            cfg.db_path = db_path;
        }

        let up = parse_var(&lookup, "UPTIME_UP_THRESHOLD").unwrap_or(cfg.thresholds.up);
        let degraded = parse_var(&lookup, "UPTIME_DEGRADED_THRESHOLD").unwrap_or(cfg.thresholds.degraded);
        match StatusThresholds::new(up, degraded) {
            Ok(thresholds) => cfg.thresholds = thresholds,
            Err(e) => tracing::warn!("Ignoring status thresholds: {}", e),
        }

        match parse_var::<usize, _>(&lookup, "UPTIME_TREND_BUCKETS") {
            Some(0) => tracing::warn!("Ignoring UPTIME_TREND_BUCKETS=0"),
            Some(buckets) => cfg.trend_buckets = buckets,
            None => {}
        }

        if let Some(strict) = parse_var::<bool, _>(&lookup, "UPTIME_STRICT_EMPTY_BUCKETS") {
            cfg.empty_bucket_policy = if strict {
                EmptyBucketPolicy::Unknown
            } else {
                EmptyBucketPolicy::AssumeOk
            };
        }

        let fail = parse_var(&lookup, "UPTIME_FAIL_THRESHOLD").unwrap_or(cfg.incident_policy.fail_threshold);
        let recover =
            parse_var(&lookup, "UPTIME_RECOVER_THRESHOLD").unwrap_or(cfg.incident_policy.recover_threshold);
        match IncidentPolicy::new(fail, recover) {
            Ok(policy) => cfg.incident_policy = policy,
            Err(e) => tracing::warn!("Ignoring incident policy: {}", e),
        }

        match parse_var::<i64, _>(&lookup, "UPTIME_RETENTION_DAYS") {
            Some(days) if (MIN_RETENTION_DAYS..=MAX_RETENTION_DAYS).contains(&days) => cfg.retention_days = days,
            Some(days) => tracing::warn!(
                "Ignoring UPTIME_RETENTION_DAYS={}, expected {}..={}",
                days,
                MIN_RETENTION_DAYS,
                MAX_RETENTION_DAYS
            ),
            None => {}
        }

        cfg.alert_channel = alert_channel(&lookup);

        match parse_var::<u64, _>(&lookup, "UPTIME_ALERT_INTERVAL_SEC") {
            Some(0) => tracing::warn!("Ignoring UPTIME_ALERT_INTERVAL_SEC=0"),
            Some(secs) => cfg.alert_interval_sec = secs,
            None => {}
        }

        cfg
    }
}

fn alert_channel<F>(lookup: &F) -> AlertChannel
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    match (
        non_empty("UPTIME_TELEGRAM_BOT_TOKEN"),
        non_empty("UPTIME_TELEGRAM_CHAT_ID"),
    ) {
        (Some(bot_token), Some(chat_id)) => return AlertChannel::Telegram { bot_token, chat_id },
        (None, None) => {}
        _ => tracing::warn!("Telegram needs both UPTIME_TELEGRAM_BOT_TOKEN and UPTIME_TELEGRAM_CHAT_ID"),
    }

    match non_empty("UPTIME_ALERT_WEBHOOK_URL") {
        Some(url) if url.starts_with("http://") || url.starts_with("https://") => AlertChannel::Webhook { url },
        Some(url) => {
            tracing::warn!("Ignoring UPTIME_ALERT_WEBHOOK_URL={:?}, expected an http(s) URL", url);
            AlertChannel::Log
        }
        None => AlertChannel::Log,
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}={:?}", key, raw);
            None
        }
    }
}
