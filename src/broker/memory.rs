use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::broker::{BoxStream, JobBroker};
use crate::error::{EngineError, EngineResult};
use crate::types::{
    JobEvent, JobId, JobRecord, JobSpec, JobState, LeaseToken, LeasedJob, QueueCounts,
};

/// In-memory broker for testing and development.
///
/// Lock order when both are held: `queues` before `jobs`.
pub struct MemoryBroker {
    /// Job records indexed by job_id
    pub(crate) jobs: Arc<RwLock<HashMap<JobId, JobRecord>>>,

    /// Queue storage: queue_name -> job_ids, FIFO
    pub(crate) queues: Arc<RwLock<HashMap<String, VecDeque<JobId>>>>,

    /// Event broadcaster for observability
    pub(crate) events: broadcast::Sender<JobEvent>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            queues: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    fn validate_lease(record: &JobRecord, lease_token: &LeaseToken) -> EngineResult<()> {
        if record.state.is_terminal() {
            return Err(EngineError::JobAlreadyTerminal);
        }
        if record.lease_token.as_ref() != Some(lease_token) {
            return Err(EngineError::InvalidLeaseToken);
        }
        if record.lease_expired(Utc::now()) {
            return Err(EngineError::LeaseExpired);
        }
        Ok(())
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobBroker for MemoryBroker {
    async fn enqueue(&self, job_id: JobId, spec: JobSpec) -> EngineResult<JobId> {
        let queue_name = spec.queue.clone();
        let job_type = spec.job_type.clone();
        let now = Utc::now();

        // Atomic check-and-insert: the write lock spans the dedup check, so
        // racing submissions with the same id collapse to one record.
        {
            let mut jobs = self.jobs.write();
            if jobs.contains_key(&job_id) {
                return Ok(job_id);
            }
            jobs.insert(job_id.clone(), JobRecord::new(job_id.clone(), spec));
        }

        self.queues
            .write()
            .entry(queue_name.clone())
            .or_default()
            .push_back(job_id.clone());

        let _ = self.events.send(JobEvent::Enqueued {
            job_id: job_id.clone(),
            queue: queue_name,
            job_type,
            at: now,
        });

        Ok(job_id)
    }

    async fn lease(&self, queue: &str, lease_for: Duration) -> EngineResult<Option<LeasedJob>> {
        let now = Utc::now();
        let mut queues = self.queues.write();
        let deque = match queues.get_mut(queue) {
            Some(deque) => deque,
            None => return Ok(None),
        };
        let mut jobs = self.jobs.write();

        let mut index = 0;
        while index < deque.len() {
            let job_id = deque[index].clone();
            let record = match jobs.get_mut(&job_id) {
                Some(record) => record,
                None => {
                    // Dangling entry, drop it
                    deque.remove(index);
                    continue;
                }
            };

            if !record.state.is_eligible(now) {
                if matches!(record.state, JobState::Delayed { .. }) {
                    // Backoff not elapsed yet, keep its queue position
                    index += 1;
                } else {
                    // Terminal or already active leftovers do not belong here
                    deque.remove(index);
                }
                continue;
            }

            deque.remove(index);

            let lease_token = LeaseToken::new();
            let lease_until = now
                + chrono::Duration::from_std(lease_for)
                    .unwrap_or_else(|_| chrono::Duration::seconds(300));
            record.attempts_made += 1;
            record.start_processing(lease_token.clone(), lease_until);

            let _ = self.events.send(JobEvent::Leased {
                job_id: job_id.clone(),
                lease_until,
                at: now,
            });

            return Ok(Some(LeasedJob {
                record: record.clone(),
                lease_token,
                lease_until,
            }));
        }

        Ok(None)
    }

    async fn ack_complete(&self, job_id: &JobId, lease_token: &LeaseToken) -> EngineResult<()> {
        let now = Utc::now();
        {
            let mut jobs = self.jobs.write();
            let record = jobs
                .get_mut(job_id)
                .ok_or_else(|| EngineError::NotFound(format!("job {job_id}")))?;
            Self::validate_lease(record, lease_token)?;
            record.complete();
        }

        let _ = self.events.send(JobEvent::Completed {
            job_id: job_id.clone(),
            at: now,
        });
        Ok(())
    }

    async fn ack_fail(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        reason: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> EngineResult<()> {
        let now = Utc::now();
        let queue_name = {
            let mut jobs = self.jobs.write();
            let record = jobs
                .get_mut(job_id)
                .ok_or_else(|| EngineError::NotFound(format!("job {job_id}")))?;
            Self::validate_lease(record, lease_token)?;

            match retry_at {
                Some(retry_at) => {
                    record.schedule_retry(retry_at, reason.to_string());
                    Some(record.spec.queue.clone())
                }
                None => {
                    record.fail(reason.to_string());
                    None
                }
            }
        };

        match (queue_name, retry_at) {
            (Some(queue_name), Some(retry_at)) => {
                // A retried job re-enters behind newly arriving jobs
                self.queues
                    .write()
                    .entry(queue_name)
                    .or_default()
                    .push_back(job_id.clone());

                let _ = self.events.send(JobEvent::Retrying {
                    job_id: job_id.clone(),
                    retry_at,
                    error: reason.to_string(),
                    at: now,
                });
            }
            _ => {
                let _ = self.events.send(JobEvent::Failed {
                    job_id: job_id.clone(),
                    error: reason.to_string(),
                    at: now,
                });
            }
        }

        Ok(())
    }

    async fn counts(&self, queue: &str) -> EngineResult<QueueCounts> {
        let jobs = self.jobs.read();
        let mut counts = QueueCounts::default();
        for record in jobs.values().filter(|r| r.spec.queue == queue) {
            match record.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Active { .. } => counts.active += 1,
                JobState::Delayed { .. } => counts.delayed += 1,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn get_record(&self, job_id: &JobId) -> EngineResult<JobRecord> {
        self.jobs
            .read()
            .get(job_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("job {job_id}")))
    }

    fn event_stream(&self) -> BoxStream<JobEvent> {
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        let receiver = self.events.subscribe();
        Box::pin(BroadcastStream::new(receiver).filter_map(|result| result.ok()))
    }
}

/// Test helpers for deterministic lease handling
impl MemoryBroker {
    /// Force a lease to expire
    pub fn force_lease_expiry(&self, job_id: &JobId) {
        let mut jobs = self.jobs.write();
        if let Some(record) = jobs.get_mut(job_id) {
            if let JobState::Active { ref mut lease_until } = record.state {
                let expired = Utc::now() - chrono::Duration::seconds(1);
                *lease_until = expired;
                record.lease_until = Some(expired);
                record.updated_at = Utc::now();
            }
        }
    }
}
