use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::broker::memory::MemoryBroker;
use crate::dlq::DeadLetterEscalator;
use crate::types::{JobEvent, JobRecord, JobState};

/// Reclaims jobs whose workers died mid-lease.
///
/// A crashed worker never acks, so its job sits `Active` with an expired
/// lease. The reaper sweeps those back to the queue for another attempt, or
/// dead-letters them when the attempt budget is spent. The sweep is safe to
/// run concurrently with live workers: an expired lease token can no longer
/// ack, so the old holder cannot race the redelivery.
pub struct LeaseReaper {
    broker: Arc<MemoryBroker>,
    escalator: Option<Arc<DeadLetterEscalator>>,
    interval: Duration,
}

impl LeaseReaper {
    pub fn new(
        broker: Arc<MemoryBroker>,
        escalator: Option<Arc<DeadLetterEscalator>>,
        interval: Duration,
    ) -> Self {
        Self {
            broker,
            escalator,
            interval,
        }
    }

    /// One sweep over all jobs. Returns how many expired leases were handled.
    pub async fn reap_expired(&self) -> usize {
        let now = Utc::now();

        // Phase one under the locks: requeue jobs with attempts left, pull
        // out the exhausted ones for escalation. Lock order: queues before
        // jobs.
        let mut exhausted: Vec<JobRecord> = Vec::new();
        let mut reaped = 0;
        {
            let mut queues = self.broker.queues.write();
            let mut jobs = self.broker.jobs.write();

            for record in jobs.values_mut() {
                let expired = matches!(record.state, JobState::Active { .. })
                    && record.lease_expired(now);
                if !expired {
                    continue;
                }
                reaped += 1;

                if record.attempts_made < record.spec.max_attempts {
                    record.schedule_retry(now, "lease expired".to_string());
                    queues
                        .entry(record.spec.queue.clone())
                        .or_default()
                        .push_back(record.job_id.clone());
                    warn!(
                        job_id = %record.job_id,
                        attempt = record.attempts_made,
                        "expired lease requeued"
                    );
                    let _ = self.broker.events.send(JobEvent::Retrying {
                        job_id: record.job_id.clone(),
                        retry_at: now,
                        error: "lease expired".to_string(),
                        at: now,
                    });
                } else {
                    exhausted.push(record.clone());
                }
            }
        }

        // Phase two without the locks: escalation awaits the store
        for record in exhausted {
            if let Some(escalator) = &self.escalator {
                if let Err(e) = escalator.escalate(&record, "lease expired").await {
                    error!(job_id = %record.job_id, error = %e, "dead-letter write failed");
                }
            }
            {
                let mut jobs = self.broker.jobs.write();
                if let Some(record) = jobs.get_mut(&record.job_id) {
                    record.fail("lease expired".to_string());
                }
            }
            let _ = self.broker.events.send(JobEvent::Failed {
                job_id: record.job_id.clone(),
                error: "lease expired".to_string(),
                at: Utc::now(),
            });
        }

        reaped
    }

    /// Sweep on an interval until shutdown flips
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let reaped = self.reap_expired().await;
                        if reaped > 0 {
                            info!(reaped, "lease sweep reclaimed jobs");
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
