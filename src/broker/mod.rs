pub mod memory;
pub mod reaper;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use std::pin::Pin;
use std::time::Duration;

use crate::error::EngineResult;
use crate::types::{JobEvent, JobId, JobRecord, JobSpec, LeaseToken, LeasedJob, QueueCounts};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Durable queue broker capability.
///
/// The broker is the single source of truth for attempt counts and
/// scheduling state; the engine never keeps a competing copy of either
/// across restarts.
#[async_trait]
pub trait JobBroker: Send + Sync {
    /// Enqueue with id-based deduplication: when a job with this id is
    /// already held, the call is a no-op returning the existing id. The
    /// check-and-insert must be atomic so racing submissions cannot create
    /// two independently-executing jobs.
    async fn enqueue(&self, job_id: JobId, spec: JobSpec) -> EngineResult<JobId>;

    /// Lease the next eligible job on the queue (waiting, or delayed with an
    /// elapsed retry time). Grants an exclusive lease for `lease_for` and
    /// increments the attempt counter.
    async fn lease(&self, queue: &str, lease_for: Duration) -> EngineResult<Option<LeasedJob>>;

    /// Acknowledge successful completion. Lease token required.
    async fn ack_complete(&self, job_id: &JobId, lease_token: &LeaseToken) -> EngineResult<()>;

    /// Acknowledge failure. With `retry_at` the job is redelivered once that
    /// time elapses; without it the job is terminally failed.
    async fn ack_fail(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        reason: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> EngineResult<()>;

    /// Per-queue waiting/active/delayed counts
    async fn counts(&self, queue: &str) -> EngineResult<QueueCounts>;

    /// Full job record lookup, `NotFound` when unknown
    async fn get_record(&self, job_id: &JobId) -> EngineResult<JobRecord>;

    /// Lifecycle event stream for observability
    fn event_stream(&self) -> BoxStream<JobEvent>;
}
