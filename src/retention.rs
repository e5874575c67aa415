//! Retention manager for pruning old samples.

use crate::db::{MonitorStore, SampleStore};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Samples are never pruned inside the widest summary window.
pub const MIN_RETENTION_DAYS: i64 = 30;

/// Upper bound on configurable retention, one century.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Background task deleting samples older than the retention period.
pub struct RetentionManager {
    monitors: Arc<dyn MonitorStore>,
    samples: Arc<dyn SampleStore>,
    retention: ChronoDuration,
    stop: broadcast::Sender<()>,
}

impl RetentionManager {
    /// `retention_days` is clamped to `[MIN_RETENTION_DAYS, MAX_RETENTION_DAYS]`.
    pub fn new(monitors: Arc<dyn MonitorStore>, samples: Arc<dyn SampleStore>, retention_days: i64) -> Self {
        let days = retention_days.clamp(MIN_RETENTION_DAYS, MAX_RETENTION_DAYS);
        let retention =
            ChronoDuration::try_days(days).unwrap_or_else(|| ChronoDuration::days(MIN_RETENTION_DAYS));
        let (stop, _) = broadcast::channel(1);
        Self {
            monitors,
            samples,
            retention,
            stop,
        }
    }

    /// Start the retention manager background task.
    pub fn start(&self, every: Duration) {
        let monitors = self.monitors.clone();
        let samples = self.samples.clone();
        let retention = self.retention;
        let mut rx = self.stop.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        match Utc::now().checked_sub_signed(retention) {
                            Some(cutoff) => {
                                process_retention(monitors.as_ref(), samples.as_ref(), cutoff);
                            }
                            None => tracing::error!(
                                "RetentionManager: Retention of {} days is out of range",
                                retention.num_days()
                            ),
                        }
                    }
                }
            }

            tracing::info!("RetentionManager: Stopped");
        });
    }

    /// Stop the retention manager.
    pub fn stop(&self) {
        let _ = self.stop.send(());
    }
}

/// Delete every sample older than `cutoff`, returning how many went.
pub fn process_retention(monitors: &dyn MonitorStore, samples: &dyn SampleStore, cutoff: DateTime<Utc>) -> usize {
    let monitors = match monitors.list_monitors() {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("RetentionManager: Failed to list monitors: {}", e);
            return 0;
        }
    };

    let mut total = 0;
    for monitor in monitors {
        match samples.delete_samples_before(monitor.id, cutoff) {
            Ok(deleted) => total += deleted,
            Err(e) => tracing::error!(
                "RetentionManager: Failed to delete samples for {}: {}",
                monitor.name,
                e
            ),
        }
    }

    if total > 0 {
        tracing::info!("RetentionManager: Deleted {} samples older than {}", total, cutoff);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::engine::{Monitor, Sample};
    use chrono::TimeZone;

    fn store_with_monitor() -> (Store, i64) {
        let store = Store::in_memory().unwrap();
        let mut monitor = Monitor {
            name: "api".to_string(),
            url: "https://example.com".to_string(),
            ..Default::default()
        };
        let id = store.add_monitor(&mut monitor).unwrap();
        (store, id)
    }

    #[test]
    fn test_process_retention() {
        let (store, id) = store_with_monitor();

        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let samples: Vec<Sample> = (0..10)
            .map(|d| Sample::new(id, t0 + ChronoDuration::days(d), Some(5.0), true))
            .collect();
        store.add_samples(&samples).unwrap();

        let deleted = process_retention(&store, &store, t0 + ChronoDuration::days(4));
        assert_eq!(deleted, 4);
        assert_eq!(store.sample_count().unwrap(), 6);
    }

    #[test]
    fn test_retention_is_clamped() {
        let store = Arc::new(Store::in_memory().unwrap());

        let short = RetentionManager::new(store.clone(), store.clone(), 7);
        assert_eq!(short.retention, ChronoDuration::days(MIN_RETENTION_DAYS));

        let huge = RetentionManager::new(store.clone(), store.clone(), 200_000_000_000_000);
        assert_eq!(huge.retention, ChronoDuration::days(MAX_RETENTION_DAYS));
        assert!(Utc::now().checked_sub_signed(huge.retention).is_some());

        let negative = RetentionManager::new(store.clone(), store, i64::MIN);
        assert_eq!(negative.retention, ChronoDuration::days(MIN_RETENTION_DAYS));
    }

    #[tokio::test]
    async fn test_background_task_prunes_and_stops() {
        let (store, id) = store_with_monitor();
        let now = Utc::now();
        store
            .add_samples(&[
                Sample::new(id, now - ChronoDuration::days(45), Some(5.0), true),
                Sample::new(id, now - ChronoDuration::days(40), Some(5.0), true),
                Sample::new(id, now - ChronoDuration::days(1), Some(5.0), true),
            ])
            .unwrap();

        let store = Arc::new(store);
        let manager = RetentionManager::new(store.clone(), store.clone(), MIN_RETENTION_DAYS);
        manager.start(Duration::from_millis(20));

        for _ in 0..50 {
            if store.sample_count().unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(store.sample_count().unwrap(), 1);

        manager.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Nothing prunes after stop
        store
            .add_samples(&[Sample::new(id, now - ChronoDuration::days(60), Some(5.0), true)])
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.sample_count().unwrap(), 2);
    }
}
