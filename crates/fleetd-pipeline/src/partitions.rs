use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use fleetd_store::{partition_window, Store, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::PipelineMetrics;

/// Keeps the daily partition set equal to `[today - retention, today +
/// horizon]`: creates what's missing in the horizon, drops what has aged out.
/// Runs at startup and then daily at a fixed UTC hour.
pub struct PartitionManager {
    store: Arc<dyn Store>,
    retention_days: u32,
    horizon_days: u32,
    hour: u32,
    metrics: Arc<PipelineMetrics>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub created: u32,
    pub dropped: u32,
}

impl PartitionManager {
    pub fn new(
        store: Arc<dyn Store>,
        retention_days: u32,
        horizon_days: u32,
        hour: u32,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self { store, retention_days, horizon_days, hour, metrics }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            retention_days = self.retention_days,
            horizon_days = self.horizon_days,
            hour = self.hour,
            "partition manager started"
        );

        // Startup pass: the window invariant must hold before the first
        // envelope needs a partition.
        self.maintain(Utc::now().date_naive()).await;

        loop {
            let wait = until_next_run(Utc::now(), self.hour);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => {
                    debug!("partition manager shutting down");
                    return;
                }
            }
            self.maintain(Utc::now().date_naive()).await;
        }
    }

    async fn maintain(&self, today: NaiveDate) {
        match self.run_once(today).await {
            Ok(report) => {
                self.metrics.partitions_created.inc_by(u64::from(report.created));
                self.metrics.partitions_dropped.inc_by(u64::from(report.dropped));
                info!(
                    created = report.created,
                    dropped = report.dropped,
                    "partition maintenance complete"
                );
            }
            Err(e) => warn!(error = %e, "partition maintenance failed"),
        }
    }

    /// One maintenance pass. Idempotent: a second run on the same day is a
    /// no-op.
    pub async fn run_once(&self, today: NaiveDate) -> Result<MaintenanceReport, StoreError> {
        let (start, end) = partition_window(today, self.retention_days, self.horizon_days);
        let mut report = MaintenanceReport::default();

        let mut day = start;
        while day <= end {
            if self.store.ensure_partition(day).await? {
                report.created += 1;
            }
            day = day
                .succ_opt()
                .ok_or_else(|| StoreError::Internal(format!("no successor day for {day}")))?;
        }

        for existing in self.store.list_partition_days().await? {
            if existing < start {
                self.store.drop_partition(existing).await?;
                report.dropped += 1;
            }
        }

        Ok(report)
    }
}

/// Time until the next occurrence of `hour`:00 UTC.
fn until_next_run(now: DateTime<Utc>, hour: u32) -> Duration {
    // Config validation bounds the hour to [0, 23].
    let Some(today_run) = now.date_naive().and_hms_opt(hour, 0, 0) else {
        return Duration::from_secs(3600);
    };
    let today_run = today_run.and_utc();
    let next = if now < today_run {
        today_run
    } else {
        today_run + ChronoDuration::days(1)
    };
    (next - now).to_std().unwrap_or(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetd_store::InMemoryStore;
    use prometheus::Registry;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn manager(store: Arc<InMemoryStore>) -> PartitionManager {
        let metrics = Arc::new(PipelineMetrics::register(&Registry::new()).unwrap());
        PartitionManager::new(store, 30, 7, 3, metrics)
    }

    #[tokio::test]
    async fn first_run_creates_the_full_window() {
        let store = Arc::new(InMemoryStore::new());
        let today = day("2026-08-01");

        let report = manager(store.clone()).run_once(today).await.unwrap();
        assert_eq!(report.created, 38); // 30 back + today + 7 forward
        assert_eq!(report.dropped, 0);

        let days = store.list_partition_days().await.unwrap();
        assert_eq!(days.first().copied(), Some(day("2026-07-02")));
        assert_eq!(days.last().copied(), Some(day("2026-08-08")));
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let store = Arc::new(InMemoryStore::new());
        let today = day("2026-08-01");
        let m = manager(store);

        m.run_once(today).await.unwrap();
        let report = m.run_once(today).await.unwrap();
        assert_eq!(report, MaintenanceReport::default());
    }

    #[tokio::test]
    async fn day_rollover_creates_ahead_and_drops_behind() {
        let store = Arc::new(InMemoryStore::new());
        let m = manager(store.clone());

        m.run_once(day("2026-08-01")).await.unwrap();
        let report = m.run_once(day("2026-08-02")).await.unwrap();

        // One new day at the horizon, one dropped past retention.
        assert_eq!(report.created, 1);
        assert_eq!(report.dropped, 1);

        let days = store.list_partition_days().await.unwrap();
        assert!(!days.contains(&day("2026-07-02")));
        assert!(days.contains(&day("2026-08-09")));
    }

    #[tokio::test]
    async fn stray_old_partitions_are_dropped() {
        let store = Arc::new(InMemoryStore::new());
        store.ensure_partition(day("2026-01-01")).await.unwrap();

        let report = manager(store.clone())
            .run_once(day("2026-08-01"))
            .await
            .unwrap();
        assert_eq!(report.dropped, 1);
        assert!(!store
            .list_partition_days()
            .await
            .unwrap()
            .contains(&day("2026-01-01")));
    }

    #[test]
    fn next_run_respects_the_hour() {
        let before = "2026-08-01T01:30:00Z".parse::<DateTime<Utc>>().unwrap();
        let wait = until_next_run(before, 3);
        assert_eq!(wait, Duration::from_secs(90 * 60));

        let after = "2026-08-01T04:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let wait = until_next_run(after, 3);
        assert_eq!(wait, Duration::from_secs(23 * 60 * 60));
    }
}
