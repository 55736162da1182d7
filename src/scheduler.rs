use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::router::QueueRouter;

/// Enqueues a recurring system job on a fixed interval.
///
/// The idempotency key buckets time by the interval, so overlapping
/// schedulers (multiple engine instances, or a restart inside a tick)
/// collapse to one job per bucket instead of stacking duplicates.
pub struct HeartbeatScheduler {
    router: Arc<QueueRouter>,
    job_type: String,
    payload: serde_json::Value,
    interval: Duration,
}

impl HeartbeatScheduler {
    pub fn new(
        router: Arc<QueueRouter>,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        interval: Duration,
    ) -> Self {
        Self {
            router,
            job_type: job_type.into(),
            payload,
            interval,
        }
    }

    fn bucket_key(&self) -> String {
        let interval_ms = self.interval.as_millis().max(1) as i64;
        let bucket = chrono::Utc::now().timestamp_millis() / interval_ms;
        format!("system:{}:{}", self.job_type, bucket)
    }

    async fn tick(&self) {
        let key = self.bucket_key();
        match self.router.enqueue(&self.job_type, self.payload.clone(), &key).await {
            Ok(job_id) => info!(job_type = %self.job_type, %job_id, "scheduled job enqueued"),
            Err(e) => warn!(job_type = %self.job_type, error = %e, "scheduled enqueue failed"),
        }
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.tick().await,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use crate::broker::JobBroker;
    use crate::registry::QueueRegistry;

    fn scheduler(interval: Duration) -> (HeartbeatScheduler, Arc<MemoryBroker>) {
        let broker = Arc::new(MemoryBroker::new());
        let registry = Arc::new(QueueRegistry::with_default_routes());
        let router = Arc::new(QueueRouter::new(registry, broker.clone()));
        (
            HeartbeatScheduler::new(
                router,
                "cleanup-temp",
                serde_json::json!({ "directory": "/tmp/app" }),
                interval,
            ),
            broker,
        )
    }

    #[tokio::test]
    async fn ticks_inside_one_bucket_dedup_to_one_job() {
        let (scheduler, broker) = scheduler(Duration::from_secs(3600));

        scheduler.tick().await;
        scheduler.tick().await;

        let counts = broker.counts("cleanup").await.unwrap();
        assert_eq!(counts.waiting, 1);
    }

    #[test]
    fn bucket_key_is_stable_within_the_interval() {
        let (scheduler, _) = scheduler(Duration::from_secs(3600));
        assert_eq!(scheduler.bucket_key(), scheduler.bucket_key());
        assert!(scheduler.bucket_key().starts_with("system:cleanup-temp:"));
    }
}
