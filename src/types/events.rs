use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobId;

/// Minimal stable event protocol emitted by the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    /// Job was enqueued
    Enqueued {
        job_id: JobId,
        queue: String,
        job_type: String,
        at: DateTime<Utc>,
    },

    /// Job was leased by a worker
    Leased {
        job_id: JobId,
        lease_until: DateTime<Utc>,
        at: DateTime<Utc>,
    },

    /// Job failed and will be redelivered
    Retrying {
        job_id: JobId,
        retry_at: DateTime<Utc>,
        error: String,
        at: DateTime<Utc>,
    },

    /// Job completed successfully
    Completed { job_id: JobId, at: DateTime<Utc> },

    /// Job failed terminally
    Failed {
        job_id: JobId,
        error: String,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Leased { .. } => "leased",
            Self::Retrying { .. } => "retrying",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }

    /// Get the job ID from any event
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Enqueued { job_id, .. } => job_id,
            Self::Leased { job_id, .. } => job_id,
            Self::Retrying { job_id, .. } => job_id,
            Self::Completed { job_id, .. } => job_id,
            Self::Failed { job_id, .. } => job_id,
        }
    }
}
