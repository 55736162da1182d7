use std::sync::Arc;
use tracing::{info, instrument};

use crate::broker::JobBroker;
use crate::error::EngineResult;
use crate::identity::IdempotencyResolver;
use crate::registry::QueueRegistry;
use crate::types::{BackoffPolicy, JobId, JobSpec};

/// Routes a job type to its target queue and submits jobs to the broker.
///
/// Identity is derived before submission, so duplicate submissions (same
/// idempotency key) collapse broker-side to the existing job. The caller
/// only ever sees acceptance here; retries and dead-lettering happen
/// asynchronously and are observed by polling status.
pub struct QueueRouter {
    registry: Arc<QueueRegistry>,
    broker: Arc<dyn JobBroker>,
}

impl QueueRouter {
    pub fn new(registry: Arc<QueueRegistry>, broker: Arc<dyn JobBroker>) -> Self {
        Self { registry, broker }
    }

    /// Resolve the queue policy for a job type
    pub fn route_for(&self, job_type: &str) -> EngineResult<&crate::registry::QueueConfig> {
        self.registry.route_for(job_type)
    }

    /// Enqueue a job under the queue's default retry policy
    #[instrument(skip(self, payload), fields(job_type))]
    pub async fn enqueue(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        idempotency_key: &str,
    ) -> EngineResult<JobId> {
        let config = self.registry.route_for(job_type)?;
        let backoff = config.backoff.clone();
        self.submit(job_type, payload, idempotency_key, backoff)
            .await
    }

    /// Enqueue with an explicit backoff policy, overriding the queue default.
    /// Used by dead-letter replay, which applies a fresh policy.
    pub async fn enqueue_with_backoff(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        idempotency_key: &str,
        backoff: BackoffPolicy,
    ) -> EngineResult<JobId> {
        self.submit(job_type, payload, idempotency_key, backoff)
            .await
    }

    async fn submit(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        idempotency_key: &str,
        backoff: BackoffPolicy,
    ) -> EngineResult<JobId> {
        let config = self.registry.route_for(job_type)?;
        let job_id = IdempotencyResolver::resolve(idempotency_key)?;

        let spec = JobSpec {
            job_type: job_type.to_string(),
            payload,
            queue: config.name.clone(),
            max_attempts: config.max_attempts,
            backoff,
        };

        let job_id = self.broker.enqueue(job_id, spec).await?;
        info!(job_id = %job_id, job_type, queue = %config.name, "job accepted");
        Ok(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use crate::error::EngineError;
    use crate::registry::QueueRegistry;
    use crate::types::JobState;
    use std::time::Duration;

    fn router() -> (QueueRouter, Arc<MemoryBroker>) {
        let broker = Arc::new(MemoryBroker::new());
        let registry = Arc::new(QueueRegistry::with_default_routes());
        (QueueRouter::new(registry, broker.clone()), broker)
    }

    #[tokio::test]
    async fn enqueue_routes_by_job_type_and_derives_id() {
        let (router, broker) = router();

        let job_id = router
            .enqueue(
                "welcome-email",
                serde_json::json!({ "email": "a@b.com" }),
                "user-42-welcome",
            )
            .await
            .unwrap();

        assert_eq!(
            job_id.as_str(),
            "f07195026a421511538ae44623cc93b7234b8567bf56041868277808d959da13"
        );
        let record = broker.get_record(&job_id).await.unwrap();
        assert_eq!(record.spec.queue, "email");
        assert_eq!(record.spec.max_attempts, 3);
        assert!(matches!(record.state, JobState::Waiting));
    }

    #[tokio::test]
    async fn duplicate_submission_is_a_no_op_returning_existing_id() {
        let (router, broker) = router();
        let payload = serde_json::json!({ "email": "a@b.com" });

        let first = router
            .enqueue("welcome-email", payload.clone(), "user-42-welcome")
            .await
            .unwrap();
        let second = router
            .enqueue("welcome-email", payload, "user-42-welcome")
            .await
            .unwrap();

        assert_eq!(first, second);
        let leased = broker
            .lease("email", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(leased.is_some());
        assert!(broker
            .lease("email", Duration::from_secs(30))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unsupported_type_and_invalid_key_surface_synchronously() {
        let (router, _) = router();

        assert!(matches!(
            router
                .enqueue("mint-nft", serde_json::json!({}), "key")
                .await,
            Err(EngineError::UnsupportedJobType(_))
        ));
        assert!(matches!(
            router
                .enqueue("welcome-email", serde_json::json!({}), "  ")
                .await,
            Err(EngineError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn explicit_backoff_overrides_queue_default() {
        let (router, broker) = router();

        let job_id = router
            .enqueue_with_backoff(
                "cleanup-temp",
                serde_json::json!({ "directory": "/tmp/x" }),
                "replay:some-record",
                BackoffPolicy::exponential(Duration::from_secs(1)),
            )
            .await
            .unwrap();

        let record = broker.get_record(&job_id).await.unwrap();
        assert_eq!(
            record.spec.backoff,
            BackoffPolicy::exponential(Duration::from_secs(1))
        );
    }
}
