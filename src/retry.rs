use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use crate::broker::JobBroker;
use crate::dlq::DeadLetterEscalator;
use crate::error::EngineResult;
use crate::types::{DlqRecordId, LeasedJob};

/// What happened to a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Scheduled for redelivery once `retry_at` elapses
    Retry { retry_at: DateTime<Utc> },

    /// Attempt budget spent; terminally failed. `record_id` is `None` when
    /// the dead-letter write itself failed.
    DeadLetter { record_id: Option<DlqRecordId> },
}

/// Decides between backoff-scheduled retry and dead-letter escalation when
/// an attempt fails.
pub struct RetryCoordinator {
    broker: Arc<dyn JobBroker>,
    escalator: Arc<DeadLetterEscalator>,
}

impl RetryCoordinator {
    pub fn new(broker: Arc<dyn JobBroker>, escalator: Arc<DeadLetterEscalator>) -> Self {
        Self { broker, escalator }
    }

    /// Apply the retry policy to a failed attempt. Attempt counting lives in
    /// the broker record carried by the lease, so a crashed-and-reaped
    /// attempt still burns budget.
    pub async fn on_failure(&self, job: &LeasedJob, reason: &str) -> EngineResult<RetryDecision> {
        let record = &job.record;

        if record.attempts_made < record.spec.max_attempts {
            let delay = record.spec.backoff.delay_for(record.attempts_made);
            let retry_at = Utc::now()
                + chrono::Duration::from_std(delay)
                    .unwrap_or_else(|_| chrono::Duration::seconds(300));

            self.broker
                .ack_fail(job.job_id(), &job.lease_token, reason, Some(retry_at))
                .await?;

            warn!(
                job_id = %job.job_id(),
                attempt = record.attempts_made,
                max_attempts = record.spec.max_attempts,
                %retry_at,
                reason,
                "attempt failed, retry scheduled"
            );
            return Ok(RetryDecision::Retry { retry_at });
        }

        // Escalation is best-effort: a dead-letter store outage must not
        // leave the job spinning in the queue.
        let record_id = match self.escalator.escalate(record, reason).await {
            Ok(dlq_record) => Some(dlq_record.id),
            Err(e) => {
                error!(job_id = %job.job_id(), error = %e, "dead-letter write failed");
                None
            }
        };

        self.broker
            .ack_fail(job.job_id(), &job.lease_token, reason, None)
            .await?;

        error!(
            job_id = %job.job_id(),
            attempts = record.attempts_made,
            reason,
            "attempts exhausted, job dead-lettered"
        );
        Ok(RetryDecision::DeadLetter { record_id })
    }
}
