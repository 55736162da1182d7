use std::collections::HashMap;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::types::BackoffPolicy;

/// Sliding-window rate limit: at most `max` dequeues per `window`
#[derive(Debug, Clone)]
pub struct RateLimit {
    pub max: u32,
    pub window: Duration,
}

/// Per-queue policy, fixed at startup and read-only thereafter
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: String,

    /// Maximum simultaneously active jobs for this queue
    pub concurrency: usize,

    pub rate_limit: RateLimit,

    /// Delivery attempts before a job is dead-lettered
    pub max_attempts: u32,

    /// Backoff between attempts
    pub backoff: BackoffPolicy,
}

/// Explicit registry of queues and the job-type routing table, constructed
/// once at startup and passed to the router and worker pools. There is no
/// ambient global registry.
pub struct QueueRegistry {
    queues: HashMap<String, QueueConfig>,
    routes: HashMap<String, String>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
            routes: HashMap::new(),
        }
    }

    /// Registry with the stock routing table: `welcome-email` -> email,
    /// `generate-report` -> report, `cleanup-temp` -> cleanup.
    pub fn with_default_routes() -> Self {
        let default = |name: &str| QueueConfig {
            name: name.to_string(),
            concurrency: 4,
            rate_limit: RateLimit {
                max: 60,
                window: Duration::from_secs(60),
            },
            max_attempts: 3,
            backoff: BackoffPolicy::fixed(Duration::from_secs(10)),
        };

        Self::new()
            .queue(default("email"))
            .queue(default("report"))
            .queue(default("cleanup"))
            .route("welcome-email", "email")
            .route("generate-report", "report")
            .route("cleanup-temp", "cleanup")
    }

    /// Add a queue definition
    pub fn queue(mut self, config: QueueConfig) -> Self {
        self.queues.insert(config.name.clone(), config);
        self
    }

    /// Map a job type to a queue
    pub fn route(mut self, job_type: &str, queue: &str) -> Self {
        self.routes.insert(job_type.to_string(), queue.to_string());
        self
    }

    /// Resolve the queue policy for a job type
    pub fn route_for(&self, job_type: &str) -> EngineResult<&QueueConfig> {
        let queue = self
            .routes
            .get(job_type)
            .ok_or_else(|| EngineError::UnsupportedJobType(job_type.to_string()))?;
        self.queues.get(queue).ok_or_else(|| {
            EngineError::Internal(format!(
                "job type {job_type} routes to undefined queue {queue}"
            ))
        })
    }

    /// Look up a queue by name
    pub fn queue_config(&self, name: &str) -> Option<&QueueConfig> {
        self.queues.get(name)
    }

    /// Iterate all configured queues
    pub fn queues(&self) -> impl Iterator<Item = &QueueConfig> {
        self.queues.values()
    }
}

impl Default for QueueRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_routes_cover_the_stock_job_types() {
        let registry = QueueRegistry::with_default_routes();

        assert_eq!(registry.route_for("welcome-email").unwrap().name, "email");
        assert_eq!(registry.route_for("generate-report").unwrap().name, "report");
        assert_eq!(registry.route_for("cleanup-temp").unwrap().name, "cleanup");
    }

    #[test]
    fn unknown_job_type_is_rejected() {
        let registry = QueueRegistry::with_default_routes();

        assert!(matches!(
            registry.route_for("mint-nft"),
            Err(EngineError::UnsupportedJobType(_))
        ));
    }

    #[test]
    fn route_to_undefined_queue_is_an_internal_error() {
        let registry = QueueRegistry::new().route("orphan", "nowhere");

        assert!(matches!(
            registry.route_for("orphan"),
            Err(EngineError::Internal(_))
        ));
    }
}
