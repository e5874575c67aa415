//! Alert notifier.
//!
//! Periodically replays each enabled monitor's recent samples, records the
//! incidents they produce and sends an alert for every new incident and every
//! recovery.

use crate::db::{DbError, IncidentStore, MonitorStore, SampleStore};
use crate::engine::{
    alert_events, derive_incidents, AlertEvent, DeliveryStatus, Incident, IncidentPolicy, IncidentState,
    Notification, Window,
};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Timeout for a single alert delivery.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Notifier error types.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Store error: {0}")]
    Store(#[from] DbError),
}

/// Where alerts go.
#[derive(Clone, Default, PartialEq)]
pub enum AlertChannel {
    /// Alerts are only logged.
    #[default]
    Log,
    Telegram { bot_token: String, chat_id: String },
    /// Alerts are POSTed as JSON.
    Webhook { url: String },
}

impl AlertChannel {
    pub fn name(&self) -> &'static str {
        match self {
            AlertChannel::Log => "noop",
            AlertChannel::Telegram { .. } => "telegram",
            AlertChannel::Webhook { .. } => "webhook",
        }
    }

    /// Deliver one alert.
    pub async fn send(&self, client: &reqwest::Client, event: &AlertEvent) -> Result<(), NotifyError> {
        let message = event.message();
        match self {
            AlertChannel::Log => {
                tracing::info!("Alert: {}", message.replace('\n', " | "));
            }
            AlertChannel::Telegram { bot_token, chat_id } => {
                let url = format!("{}/bot{}/sendMessage", TELEGRAM_API, bot_token);
                client
                    .post(&url)
                    .form(&[
                        ("chat_id", chat_id.as_str()),
                        ("text", message.as_str()),
                        ("parse_mode", "Markdown"),
                    ])
                    .send()
                    .await?
                    .error_for_status()?;
            }
            AlertChannel::Webhook { url } => {
                let body = serde_json::json!({
                    "type": event.kind,
                    "monitor_id": event.monitor_id,
                    "incident_id": event.incident_id,
                    "reason": event.reason,
                    "at": event.at,
                    "text": message,
                });
                client.post(url).json(&body).send().await?.error_for_status()?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for AlertChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertChannel::Log => f.write_str("Log"),
            AlertChannel::Telegram { chat_id, .. } => f
                .debug_struct("Telegram")
                .field("bot_token", &"<redacted>")
                .field("chat_id", chat_id)
                .finish(),
            AlertChannel::Webhook { url } => f.debug_struct("Webhook").field("url", url).finish(),
        }
    }
}

/// Background task turning incident transitions into alerts.
#[derive(Clone)]
pub struct Notifier {
    monitors: Arc<dyn MonitorStore>,
    samples: Arc<dyn SampleStore>,
    incidents: Arc<dyn IncidentStore>,
    policy: IncidentPolicy,
    channel: AlertChannel,
    client: reqwest::Client,
    stop: broadcast::Sender<()>,
}

impl Notifier {
    pub fn new(
        monitors: Arc<dyn MonitorStore>,
        samples: Arc<dyn SampleStore>,
        incidents: Arc<dyn IncidentStore>,
        policy: IncidentPolicy,
        channel: AlertChannel,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?;
        let (stop, _) = broadcast::channel(1);
        Ok(Self {
            monitors,
            samples,
            incidents,
            policy,
            channel,
            client,
            stop,
        })
    }

    /// Start the notifier background task.
    ///
    /// Transitions that happened before the task started are recorded
    /// without being sent. After that, each pass sends what happened since
    /// one interval before the previous pass, so late samples still alert.
    pub fn start(&self, every: Duration) {
        let notifier = self.clone();
        let mut rx = self.stop.subscribe();
        let grace = ChronoDuration::from_std(every).unwrap_or_else(|_| ChronoDuration::zero());

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            let mut since = Utc::now();

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        let now = Utc::now();
                        notifier.run_once(since, now).await;
                        since = now.checked_sub_signed(grace).unwrap_or(now);
                    }
                }
            }

            tracing::info!("Notifier: Stopped");
        });
    }

    /// Stop the notifier.
    pub fn stop(&self) {
        let _ = self.stop.send(());
    }

    /// One replay pass. Returns how many alerts were delivered.
    pub async fn run_once(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> usize {
        let mut sent = 0;
        for event in self.collect_events(now) {
            if event.at < since {
                tracing::debug!(
                    "Notifier: Not sending stale {:?} alert for monitor {}",
                    event.kind,
                    event.monitor_id
                );
                continue;
            }
            if self.deliver(&event).await {
                sent += 1;
            }
        }
        sent
    }

    fn collect_events(&self, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let monitors = match self.monitors.list_monitors() {
            Ok(m) => m,
            Err(e) => {
                tracing::error!("Notifier: Failed to list monitors: {}", e);
                return Vec::new();
            }
        };

        let (start, end) = Window::Month.bounds(now);
        let mut events = Vec::new();
        for monitor in monitors.iter().filter(|m| m.is_enabled) {
            let samples = match self.samples.get_samples(monitor.id, start, end) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!("Notifier: Failed to load samples for {}: {}", monitor.name, e);
                    continue;
                }
            };

            let derived = derive_incidents(monitor.id, &samples, self.policy);
            match sync_incidents(self.incidents.as_ref(), monitor.id, derived, now) {
                Ok(mut found) => events.append(&mut found),
                Err(e) => tracing::error!("Notifier: Failed to record incidents for {}: {}", monitor.name, e),
            }
        }

        events.sort_by_key(|e| e.at);
        events
    }

    async fn deliver(&self, event: &AlertEvent) -> bool {
        let (status, delivered) = match self.channel.send(&self.client, event).await {
            Ok(()) => {
                tracing::info!(
                    "Notifier: Sent {:?} alert for monitor {} via {}",
                    event.kind,
                    event.monitor_id,
                    self.channel.name()
                );
                (DeliveryStatus::Sent, true)
            }
            Err(e) => {
                tracing::error!(
                    "Notifier: Failed to send {:?} alert for monitor {}: {}",
                    event.kind,
                    event.monitor_id,
                    e
                );
                (DeliveryStatus::Failed, false)
            }
        };

        let notification = Notification {
            id: 0,
            incident_id: Some(event.incident_id),
            channel: self.channel.name().to_string(),
            sent_at: Utc::now(),
            status,
            detail: event.message(),
        };
        if let Err(e) = self.incidents.add_notification(&notification) {
            tracing::error!("Notifier: Failed to record notification: {}", e);
        }

        delivered
    }
}

/// Reconcile replayed incidents with the recorded ones and return the alerts owed.
///
/// A replayed incident matches the recorded one with the same opening time.
/// Failing that, an open recorded incident absorbs the first replayed incident
/// opened at or after it: once the start of a long outage leaves the replay
/// window, the replay reports a later opening time for the same outage. A
/// recorded open incident with no replayed counterpart, while the replay ends
/// healthy, is resolved at `now`.
pub fn sync_incidents(
    store: &dyn IncidentStore,
    monitor_id: i64,
    derived: Vec<Incident>,
    now: DateTime<Utc>,
) -> Result<Vec<AlertEvent>, DbError> {
    let mut pending_open = store.open_incident(monitor_id)?;
    let replay_ends_open = derived.iter().any(|i| i.state == IncidentState::Open);
    let mut events = Vec::new();

    for incident in derived {
        let recorded = match store.find_incident(monitor_id, incident.opened_at)? {
            Some(found) => {
                if pending_open.as_ref().map(|o| o.id) == Some(found.id) {
                    pending_open = None;
                }
                Some(found)
            }
            None => {
                let absorbs = pending_open
                    .as_ref()
                    .is_some_and(|open| open.opened_at <= incident.opened_at);
                if absorbs {
                    pending_open.take()
                } else {
                    None
                }
            }
        };

        match recorded.and_then(|r| r.id.map(|id| (id, r.state))) {
            Some((id, previous)) => {
                if previous == IncidentState::Open && incident.state == IncidentState::Resolved {
                    if let Some(closed_at) = incident.closed_at {
                        store.resolve_incident(id, closed_at)?;
                    }
                }
                events.extend(alert_events(&incident, id, Some(previous)));
            }
            None => {
                let id = store.add_incident(&incident)?;
                events.extend(alert_events(&incident, id, None));
            }
        }
    }

    if let Some(mut stale) = pending_open {
        if !replay_ends_open {
            if let Some(id) = stale.id {
                store.resolve_incident(id, now)?;
                stale.state = IncidentState::Resolved;
                stale.closed_at = Some(now);
                events.extend(alert_events(&stale, id, Some(IncidentState::Open)));
            }
        }
    }

    Ok(events)
}
