use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::error::{EngineError, EngineResult};
use crate::observability::EngineMetrics;
use crate::router::QueueRouter;
use crate::types::{BackoffPolicy, DlqRecordId, JobId, JobRecord};

/// Durable record of a terminally failed job. Immutable after creation;
/// replay consumes it without deleting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub id: DlqRecordId,
    pub original_job_id: JobId,
    pub job_type: String,
    pub queue: String,
    pub payload: Value,
    pub failed_reason: String,
    pub attempts_made: u32,
    pub failed_at: DateTime<Utc>,
}

/// Dead-letter storage capability
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn append(&self, record: DeadLetterRecord) -> EngineResult<()>;

    async fn get(&self, id: &DlqRecordId) -> EngineResult<Option<DeadLetterRecord>>;

    /// Most recent first, bounded. Re-querying yields current state, not a
    /// live stream.
    async fn recent(&self, limit: usize) -> EngineResult<Vec<DeadLetterRecord>>;

    async fn size(&self) -> EngineResult<u64>;
}

/// In-memory store for tests and development
pub struct MemoryDeadLetterStore {
    records: RwLock<Vec<DeadLetterRecord>>,
}

impl MemoryDeadLetterStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryDeadLetterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeadLetterStore for MemoryDeadLetterStore {
    async fn append(&self, record: DeadLetterRecord) -> EngineResult<()> {
        self.records.write().push(record);
        Ok(())
    }

    async fn get(&self, id: &DlqRecordId) -> EngineResult<Option<DeadLetterRecord>> {
        Ok(self.records.read().iter().find(|r| &r.id == id).cloned())
    }

    async fn recent(&self, limit: usize) -> EngineResult<Vec<DeadLetterRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn size(&self) -> EngineResult<u64> {
        Ok(self.records.read().len() as u64)
    }
}

/// Persists terminally failed jobs and supports inspection and replay.
pub struct DeadLetterEscalator {
    store: Arc<dyn DeadLetterStore>,
    router: Arc<QueueRouter>,
    metrics: Arc<EngineMetrics>,
}

impl DeadLetterEscalator {
    pub fn new(
        store: Arc<dyn DeadLetterStore>,
        router: Arc<QueueRouter>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            store,
            router,
            metrics,
        }
    }

    /// Write a dead-letter record for a job that exhausted its attempts.
    /// Called exactly once per terminal failure; bumps the dead-letter
    /// counter on success.
    pub async fn escalate(
        &self,
        record: &JobRecord,
        reason: &str,
    ) -> EngineResult<DeadLetterRecord> {
        let dlq_record = DeadLetterRecord {
            id: DlqRecordId::new(),
            original_job_id: record.job_id.clone(),
            job_type: record.spec.job_type.clone(),
            queue: record.spec.queue.clone(),
            payload: record.spec.payload.clone(),
            failed_reason: reason.to_string(),
            attempts_made: record.attempts_made,
            failed_at: Utc::now(),
        };

        self.store
            .append(dlq_record.clone())
            .await
            .map_err(|e| EngineError::DeadLetterWriteFailure(e.to_string()))?;

        self.metrics.inc_dead_lettered(&dlq_record.job_type);
        error!(
            job_id = %dlq_record.original_job_id,
            job_type = %dlq_record.job_type,
            attempts = dlq_record.attempts_made,
            reason,
            "job dead-lettered"
        );
        Ok(dlq_record)
    }

    /// Most recent dead-letter records, bounded by `limit`
    pub async fn inspect(&self, limit: usize) -> EngineResult<Vec<DeadLetterRecord>> {
        self.store.recent(limit).await
    }

    /// Re-enqueue a dead-lettered job to its original queue. The payload is
    /// merged with `replayedFromJobId` and `replayedAt`, and a fresh
    /// exponential backoff replaces the original policy. The replay job's
    /// identity derives from the record id, so replaying the same record
    /// twice dedups like any other duplicate submission.
    pub async fn replay(&self, record_id: &DlqRecordId) -> EngineResult<JobId> {
        let record = self
            .store
            .get(record_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("dead-letter record {record_id}")))?;

        let mut payload = match record.payload {
            Value::Object(map) => Value::Object(map),
            other => json!({ "payload": other }),
        };
        if let Value::Object(map) = &mut payload {
            map.insert(
                "replayedFromJobId".to_string(),
                json!(record.original_job_id.as_str()),
            );
            map.insert("replayedAt".to_string(), json!(Utc::now().to_rfc3339()));
        }

        let idempotency_key = format!("replay:{}", record.id);
        let job_id = self
            .router
            .enqueue_with_backoff(
                &record.job_type,
                payload,
                &idempotency_key,
                BackoffPolicy::exponential(Duration::from_secs(1)),
            )
            .await?;

        info!(
            dlq_record = %record.id,
            original_job_id = %record.original_job_id,
            new_job_id = %job_id,
            "dead-letter record replayed"
        );
        Ok(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use crate::broker::JobBroker;
    use crate::registry::QueueRegistry;
    use crate::types::JobSpec;

    fn escalator() -> (DeadLetterEscalator, Arc<MemoryBroker>, Arc<dyn DeadLetterStore>) {
        let broker = Arc::new(MemoryBroker::new());
        let registry = Arc::new(QueueRegistry::with_default_routes());
        let router = Arc::new(QueueRouter::new(registry, broker.clone()));
        let store: Arc<dyn DeadLetterStore> = Arc::new(MemoryDeadLetterStore::new());
        let metrics = Arc::new(EngineMetrics::register(&prometheus::Registry::new()).unwrap());
        (
            DeadLetterEscalator::new(store.clone(), router, metrics),
            broker,
            store,
        )
    }

    fn failed_record(job_id: &str, job_type: &str, queue: &str) -> JobRecord {
        let spec = JobSpec {
            job_type: job_type.to_string(),
            payload: json!({ "directory": "/tmp/x" }),
            queue: queue.to_string(),
            max_attempts: 3,
            backoff: BackoffPolicy::fixed(Duration::from_secs(10)),
        };
        let mut record = JobRecord::new(JobId::from(job_id), spec);
        record.attempts_made = 3;
        record.fail("boom".to_string());
        record
    }

    #[tokio::test]
    async fn escalate_writes_an_immutable_record() {
        let (escalator, _, store) = escalator();
        let record = failed_record("j1", "cleanup-temp", "cleanup");

        let dlq = escalator.escalate(&record, "boom").await.unwrap();

        assert_eq!(dlq.original_job_id, JobId::from("j1"));
        assert_eq!(dlq.attempts_made, 3);
        assert_eq!(dlq.failed_reason, "boom");
        assert_eq!(store.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn inspect_returns_most_recent_first_bounded() {
        let (escalator, _, _) = escalator();
        for i in 0..5 {
            let record = failed_record(&format!("j{i}"), "cleanup-temp", "cleanup");
            escalator.escalate(&record, "boom").await.unwrap();
        }

        let recent = escalator.inspect(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].original_job_id, JobId::from("j4"));
        assert_eq!(recent[2].original_job_id, JobId::from("j2"));
    }

    #[tokio::test]
    async fn replay_enqueues_to_original_queue_with_merged_payload() {
        let (escalator, broker, _) = escalator();
        let record = failed_record("original-id", "cleanup-temp", "cleanup");
        let dlq = escalator.escalate(&record, "boom").await.unwrap();

        let new_job_id = escalator.replay(&dlq.id).await.unwrap();
        assert_ne!(new_job_id, JobId::from("original-id"));

        let replayed = broker.get_record(&new_job_id).await.unwrap();
        assert_eq!(replayed.spec.queue, "cleanup");
        assert_eq!(
            replayed.spec.payload["replayedFromJobId"],
            json!("original-id")
        );
        assert_eq!(replayed.spec.payload["directory"], json!("/tmp/x"));
        assert!(replayed.spec.payload["replayedAt"].is_string());
    }

    #[tokio::test]
    async fn replaying_twice_dedups_on_the_record_id() {
        let (escalator, _, _) = escalator();
        let record = failed_record("original-id", "cleanup-temp", "cleanup");
        let dlq = escalator.escalate(&record, "boom").await.unwrap();

        let first = escalator.replay(&dlq.id).await.unwrap();
        let second = escalator.replay(&dlq.id).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn replay_of_unknown_record_is_not_found() {
        let (escalator, _, _) = escalator();
        let result = escalator.replay(&DlqRecordId::from("missing")).await;
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }
}
