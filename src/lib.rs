//! Idempotent job lifecycle engine.
//!
//! Callers submit jobs with a caller-chosen idempotency key; the engine
//! derives a deterministic job id from it, routes the job to a configured
//! queue, and executes its side effect at most once even though the broker
//! delivers at least once. Failed attempts retry with backoff until the
//! attempt budget is spent, then land in a dead-letter store that supports
//! inspection and replay.
//!
//! The durable pieces (queue broker, atomic key-value store, dead-letter
//! store) are capability traits with in-memory implementations; production
//! deployments supply their own backends.
//!
//! ```no_run
//! use std::sync::Arc;
//! use conveyor::{
//!     Engine, EngineConfig, HandlerRegistry, MemoryBroker, MemoryDeadLetterStore,
//!     MemoryKvStore, QueueRegistry,
//! };
//!
//! # async fn run(handlers: HandlerRegistry) -> conveyor::EngineResult<()> {
//! let engine = Engine::new(
//!     EngineConfig::from_env()?,
//!     QueueRegistry::with_default_routes(),
//!     Arc::new(MemoryBroker::new()),
//!     Arc::new(MemoryKvStore::new()),
//!     Arc::new(MemoryDeadLetterStore::new()),
//!     handlers,
//!     &prometheus::Registry::new(),
//! )?;
//! engine.start();
//!
//! let job_id = engine
//!     .enqueue(
//!         "welcome-email",
//!         serde_json::json!({ "email": "user@example.com" }),
//!         "user-42-welcome",
//!     )
//!     .await?;
//! println!("{}", engine.job_status(&job_id).await?.state);
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod config;
pub mod dlq;
pub mod engine;
pub mod error;
pub mod guard;
pub mod identity;
pub mod kv;
pub mod observability;
pub mod processor;
pub mod registry;
pub mod retry;
pub mod router;
pub mod scheduler;
pub mod types;
pub mod worker;

pub use broker::memory::MemoryBroker;
pub use broker::reaper::LeaseReaper;
pub use broker::JobBroker;
pub use config::EngineConfig;
pub use dlq::{DeadLetterEscalator, DeadLetterRecord, DeadLetterStore, MemoryDeadLetterStore};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use guard::{ReservationState, SideEffectGuard};
pub use identity::IdempotencyResolver;
pub use kv::{AtomicKvStore, MemoryKvStore};
pub use observability::{EngineMetrics, MetricsCollector};
pub use processor::{EffectHandler, HandlerRegistry, JobProcessor};
pub use registry::{QueueConfig, QueueRegistry, RateLimit};
pub use retry::{RetryCoordinator, RetryDecision};
pub use router::QueueRouter;
pub use scheduler::HeartbeatScheduler;
pub use types::{
    BackoffKind, BackoffPolicy, DlqRecordId, JobEvent, JobId, JobRecord, JobSpec, JobState,
    JobStatusView, LeaseToken, LeasedJob, Outcome, QueueCounts,
};
pub use worker::{SlidingWindowLimiter, WorkerPool};
