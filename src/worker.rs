use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use crate::broker::JobBroker;
use crate::processor::JobProcessor;
use crate::registry::QueueConfig;
use crate::retry::RetryCoordinator;
use crate::types::{LeasedJob, Outcome};

/// Sliding-window rate limiter: admits at most `max` dequeues per `window`,
/// measured against actual start timestamps rather than fixed buckets.
pub struct SlidingWindowLimiter {
    max: u32,
    window: Duration,
    starts: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            starts: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until the window has room, then consume a slot
    pub async fn admit(&self) {
        loop {
            let wait = {
                let mut starts = self.starts.lock();
                let now = Instant::now();
                while let Some(front) = starts.front() {
                    if now.duration_since(*front) >= self.window {
                        starts.pop_front();
                    } else {
                        break;
                    }
                }
                if (starts.len() as u32) < self.max {
                    starts.push_back(now);
                    return;
                }
                // Full: sleep until the oldest start leaves the window
                self.window - now.duration_since(*starts.front().unwrap_or(&now))
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Give back the most recently admitted slot. The window budget counts
    /// dequeues, so a poll that came back empty must not be charged.
    pub fn refund(&self) {
        self.starts.lock().pop_back();
    }
}

/// Polls one queue for leases and runs attempts on a bounded task set.
///
/// Concurrency is capped by a semaphore sized to the queue's limit, and
/// lease acquisition is additionally throttled by the sliding-window rate
/// limiter. On shutdown the pool stops leasing and drains in-flight
/// attempts to completion.
pub struct WorkerPool {
    broker: Arc<dyn JobBroker>,
    processor: Arc<JobProcessor>,
    retry: Arc<RetryCoordinator>,
    config: QueueConfig,
    poll_interval: Duration,
    lease_duration: Duration,
}

impl WorkerPool {
    pub fn new(
        broker: Arc<dyn JobBroker>,
        processor: Arc<JobProcessor>,
        retry: Arc<RetryCoordinator>,
        config: QueueConfig,
        poll_interval: Duration,
        lease_duration: Duration,
    ) -> Self {
        Self {
            broker,
            processor,
            retry,
            config,
            poll_interval,
            lease_duration,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let queue = self.config.name.clone();
        info!(
            queue = %queue,
            concurrency = self.config.concurrency,
            "worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let limiter = Arc::new(SlidingWindowLimiter::new(
            self.config.rate_limit.max,
            self.config.rate_limit.window,
        ));
        let mut in_flight = JoinSet::new();

        loop {
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            tokio::select! {
                _ = limiter.admit() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.broker.lease(&queue, self.lease_duration).await {
                Ok(Some(job)) => {
                    let broker = self.broker.clone();
                    let processor = self.processor.clone();
                    let retry = self.retry.clone();
                    in_flight.spawn(async move {
                        Self::execute(broker, processor, retry, job).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    limiter.refund();
                    drop(permit);
                    if Self::idle_pause(self.poll_interval, &mut shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    limiter.refund();
                    drop(permit);
                    error!(queue = %queue, error = %e, "lease poll failed");
                    if Self::idle_pause(self.poll_interval, &mut shutdown).await {
                        break;
                    }
                }
            }

            // Reap finished attempts so the set does not grow unbounded
            while in_flight.try_join_next().is_some() {}
        }

        // Drain: let in-flight attempts reach an ack before exiting
        debug!(queue = %queue, draining = in_flight.len(), "worker pool draining");
        while in_flight.join_next().await.is_some() {}
        info!(queue = %queue, "worker pool stopped");
    }

    /// Sleep out an empty poll, but wake immediately on shutdown. Returns
    /// `true` when shutdown was requested.
    async fn idle_pause(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(interval) => false,
            _ = shutdown.changed() => *shutdown.borrow(),
        }
    }

    async fn execute(
        broker: Arc<dyn JobBroker>,
        processor: Arc<JobProcessor>,
        retry: Arc<RetryCoordinator>,
        job: LeasedJob,
    ) {
        match processor.process(&job).await {
            Outcome::Success | Outcome::RecoveredNoOp => {
                if let Err(e) = broker.ack_complete(job.job_id(), &job.lease_token).await {
                    // Lost lease or a racing terminal ack; the reaper and the
                    // side-effect guard keep this safe
                    error!(job_id = %job.job_id(), error = %e, "completion ack failed");
                }
            }
            Outcome::Failure { reason } => {
                if let Err(e) = retry.on_failure(&job, &reason).await {
                    error!(job_id = %job.job_id(), error = %e, "failure ack failed");
                }
            }
        }
    }
}
