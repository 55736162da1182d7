use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::broker::JobBroker;
use crate::dlq::DeadLetterStore;
use crate::error::EngineResult;
use crate::observability::EngineMetrics;
use crate::registry::QueueRegistry;

/// Samples queue depths and dead-letter size on a fixed interval and
/// publishes them as gauges. Sampling is lossy by nature: a failed tick is
/// logged and skipped, the next tick overwrites whatever staleness it left.
pub struct MetricsCollector {
    broker: Arc<dyn JobBroker>,
    dlq_store: Arc<dyn DeadLetterStore>,
    registry: Arc<QueueRegistry>,
    metrics: Arc<EngineMetrics>,
    interval: Duration,
}

impl MetricsCollector {
    pub fn new(
        broker: Arc<dyn JobBroker>,
        dlq_store: Arc<dyn DeadLetterStore>,
        registry: Arc<QueueRegistry>,
        metrics: Arc<EngineMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            broker,
            dlq_store,
            registry,
            metrics,
            interval,
        }
    }

    /// Take one sample across all configured queues plus the dead-letter size
    pub async fn sample(&self) -> EngineResult<()> {
        for config in self.registry.queues() {
            let counts = self.broker.counts(&config.name).await?;
            self.metrics.set_queue_depths(&config.name, &counts);
        }
        let dlq_size = self.dlq_store.size().await?;
        self.metrics.set_dlq_size(dlq_size);
        Ok(())
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sample().await {
                            warn!(error = %e, "metrics sample failed; will retry next tick");
                        }
                    }
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
