use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::broker::JobBroker;
use crate::config::EngineConfig;
use crate::dlq::{DeadLetterEscalator, DeadLetterRecord, DeadLetterStore};
use crate::error::EngineResult;
use crate::guard::SideEffectGuard;
use crate::kv::AtomicKvStore;
use crate::observability::{EngineMetrics, MetricsCollector};
use crate::processor::{HandlerRegistry, JobProcessor};
use crate::registry::QueueRegistry;
use crate::retry::RetryCoordinator;
use crate::router::QueueRouter;
use crate::types::{DlqRecordId, JobId, JobStatusView};
use crate::worker::WorkerPool;

/// Top-level engine: wires the router, worker pools, retry path,
/// dead-letter escalation and metrics sampling over the capability traits,
/// and owns their task lifecycles.
pub struct Engine {
    config: EngineConfig,
    registry: Arc<QueueRegistry>,
    broker: Arc<dyn JobBroker>,
    dlq_store: Arc<dyn DeadLetterStore>,
    router: Arc<QueueRouter>,
    processor: Arc<JobProcessor>,
    retry: Arc<RetryCoordinator>,
    escalator: Arc<DeadLetterEscalator>,
    metrics: Arc<EngineMetrics>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        registry: QueueRegistry,
        broker: Arc<dyn JobBroker>,
        kv_store: Arc<dyn AtomicKvStore>,
        dlq_store: Arc<dyn DeadLetterStore>,
        handlers: HandlerRegistry,
        prometheus: &prometheus::Registry,
    ) -> EngineResult<Self> {
        let registry = Arc::new(registry);
        let metrics = Arc::new(EngineMetrics::register(prometheus)?);
        let router = Arc::new(QueueRouter::new(registry.clone(), broker.clone()));
        let escalator = Arc::new(DeadLetterEscalator::new(
            dlq_store.clone(),
            router.clone(),
            metrics.clone(),
        ));
        let guard = Arc::new(SideEffectGuard::new(kv_store));
        let processor = Arc::new(JobProcessor::new(
            Arc::new(handlers),
            guard,
            metrics.clone(),
        ));
        let retry = Arc::new(RetryCoordinator::new(broker.clone(), escalator.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            registry,
            broker,
            dlq_store,
            router,
            processor,
            retry,
            escalator,
            metrics,
            shutdown_tx,
            shutdown_rx,
            tasks: Mutex::new(None),
        })
    }

    /// Spawn a worker pool per configured queue plus the metrics sampler.
    /// A second call on a running engine is a no-op.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            warn!("engine already started");
            return;
        }

        let mut handles = Vec::new();
        for queue in self.registry.queues() {
            let pool = WorkerPool::new(
                self.broker.clone(),
                self.processor.clone(),
                self.retry.clone(),
                queue.clone(),
                self.config.poll_interval,
                self.config.lease_duration,
            );
            handles.push(pool.spawn(self.shutdown_rx.clone()));
        }

        let collector = MetricsCollector::new(
            self.broker.clone(),
            self.dlq_store.clone(),
            self.registry.clone(),
            self.metrics.clone(),
            self.config.metrics_interval,
        );
        handles.push(collector.spawn(self.shutdown_rx.clone()));

        info!(
            broker_url = %self.config.broker_url,
            pools = handles.len() - 1,
            "engine started"
        );
        *tasks = Some(handles);
    }

    /// Stop leasing, drain in-flight attempts, and join every task. Safe to
    /// call repeatedly and from multiple callers; only the first does work.
    pub async fn shutdown(&self) {
        let handles = match self.tasks.lock().take() {
            Some(handles) => handles,
            None => return,
        };

        info!("engine shutting down");
        let _ = self.shutdown_tx.send(true);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "engine task panicked during shutdown");
            }
        }
        info!("engine stopped");
    }

    /// Submit a job. Duplicate keys collapse to the existing job id.
    pub async fn enqueue(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        idempotency_key: &str,
    ) -> EngineResult<JobId> {
        self.router.enqueue(job_type, payload, idempotency_key).await
    }

    /// Point-in-time status of a job
    pub async fn job_status(&self, job_id: &JobId) -> EngineResult<JobStatusView> {
        let record = self.broker.get_record(job_id).await?;
        Ok(JobStatusView::from(&record))
    }

    /// Most recent dead-letter records
    pub async fn inspect_dead_letters(&self, limit: usize) -> EngineResult<Vec<DeadLetterRecord>> {
        self.escalator.inspect(limit).await
    }

    /// Replay a dead-lettered job back onto its original queue
    pub async fn replay(&self, record_id: &DlqRecordId) -> EngineResult<JobId> {
        self.escalator.replay(record_id).await
    }

    pub fn router(&self) -> &Arc<QueueRouter> {
        &self.router
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }
}
