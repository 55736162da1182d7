use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{JobId, LeaseToken};

/// Backoff kind applied before redelivering a failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffKind {
    /// Constant delay on every retry
    Fixed,
    /// Delay doubles with each attempt
    Exponential,
}

/// Delay strategy for retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub kind: BackoffKind,
    pub base_delay: Duration,
}

impl BackoffPolicy {
    /// Fixed backoff with the given base delay
    pub fn fixed(base_delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            base_delay,
        }
    }

    /// Exponential backoff with the given base delay
    pub fn exponential(base_delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_delay,
        }
    }

    /// Delay before redelivery after the given attempt number (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.kind {
            BackoffKind::Fixed => self.base_delay,
            BackoffKind::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.base_delay.saturating_mul(factor)
            }
        }
    }
}

/// Job submission data - immutable once enqueued
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Job type tag selecting the target queue and effect handler
    pub job_type: String,

    /// Opaque structured payload
    pub payload: serde_json::Value,

    /// Target queue name
    pub queue: String,

    /// Maximum delivery attempts before the job is dead-lettered
    pub max_attempts: u32,

    /// Backoff policy applied between attempts
    pub backoff: BackoffPolicy,
}

/// Job state lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobState {
    /// Queued and waiting to be leased
    Waiting,

    /// Leased by a worker and currently executing
    Active { lease_until: DateTime<Utc> },

    /// Failed and waiting for its backoff delay to elapse
    Delayed { retry_at: DateTime<Utc> },

    /// Completed successfully
    Completed { completed_at: DateTime<Utc> },

    /// Failed terminally (attempts exhausted)
    Failed {
        failed_at: DateTime<Utc>,
        reason: String,
    },
}

impl JobState {
    /// Check if the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    /// Check if the job may be leased right now
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Waiting => true,
            Self::Delayed { retry_at } => *retry_at <= now,
            _ => false,
        }
    }

    /// Get the state name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active { .. } => "active",
            Self::Delayed { .. } => "delayed",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Mutable runtime state of a job, owned by the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub spec: JobSpec,
    pub state: JobState,

    /// Authoritative attempt counter. Incremented by the broker when a lease
    /// is granted, so on a leased job it already includes the in-flight
    /// attempt. The engine never mirrors this value.
    pub attempts_made: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub lease_token: Option<LeaseToken>,
    pub lease_until: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a new waiting record
    pub fn new(job_id: JobId, spec: JobSpec) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            spec,
            state: JobState::Waiting,
            attempts_made: 0,
            created_at: now,
            updated_at: now,
            finished_at: None,
            last_error: None,
            lease_token: None,
            lease_until: None,
        }
    }

    /// Check if the current lease has expired
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        match (&self.state, &self.lease_until) {
            (JobState::Active { .. }, Some(lease_until)) => *lease_until < now,
            _ => false,
        }
    }

    /// Start processing under a lease
    pub fn start_processing(&mut self, lease_token: LeaseToken, lease_until: DateTime<Utc>) {
        self.state = JobState::Active { lease_until };
        self.lease_token = Some(lease_token);
        self.lease_until = Some(lease_until);
        self.updated_at = Utc::now();
    }

    /// Complete the job successfully
    pub fn complete(&mut self) {
        let now = Utc::now();
        self.state = JobState::Completed { completed_at: now };
        self.finished_at = Some(now);
        self.lease_token = None;
        self.lease_until = None;
        self.updated_at = now;
    }

    /// Fail the job terminally
    pub fn fail(&mut self, reason: String) {
        let now = Utc::now();
        self.state = JobState::Failed {
            failed_at: now,
            reason: reason.clone(),
        };
        self.last_error = Some(reason);
        self.finished_at = Some(now);
        self.lease_token = None;
        self.lease_until = None;
        self.updated_at = now;
    }

    /// Schedule a redelivery. The attempt counter is not touched here; it is
    /// incremented when the next lease is granted.
    pub fn schedule_retry(&mut self, retry_at: DateTime<Utc>, reason: String) {
        self.state = JobState::Delayed { retry_at };
        self.last_error = Some(reason);
        self.lease_token = None;
        self.lease_until = None;
        self.updated_at = Utc::now();
    }
}

/// A job leased for processing
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub record: JobRecord,
    pub lease_token: LeaseToken,
    pub lease_until: DateTime<Utc>,
}

impl LeasedJob {
    pub fn job_id(&self) -> &JobId {
        &self.record.job_id
    }

    pub fn spec(&self) -> &JobSpec {
        &self.record.spec
    }
}

/// Per-queue depth sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
}

/// Caller-facing view of a job's status
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub job_type: String,
    pub state: &'static str,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
}

impl From<&JobRecord> for JobStatusView {
    fn from(record: &JobRecord) -> Self {
        let failed_reason = match &record.state {
            JobState::Failed { reason, .. } => Some(reason.clone()),
            _ => None,
        };
        Self {
            job_id: record.job_id.clone(),
            job_type: record.spec.job_type.clone(),
            state: record.state.name(),
            created_at: record.created_at,
            processed_at: record.finished_at,
            failed_reason,
        }
    }
}
