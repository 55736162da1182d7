mod events;
mod ids;
mod job;
mod outcome;

pub use events::JobEvent;
pub use ids::{DlqRecordId, JobId, LeaseToken};
pub use job::{
    BackoffKind, BackoffPolicy, JobRecord, JobSpec, JobState, JobStatusView, LeasedJob,
    QueueCounts,
};
pub use outcome::Outcome;
