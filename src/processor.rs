use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::guard::SideEffectGuard;
use crate::observability::EngineMetrics;
use crate::types::{LeasedJob, Outcome};

/// Type-specific business logic: the externally visible effect executed at
/// most once per job id. Implementations are black boxes to the engine
/// beyond having a bounded duration.
#[async_trait]
pub trait EffectHandler: Send + Sync {
    /// Job type this handler processes
    fn job_type(&self) -> &str;

    /// Execute the effect. An `Err` carries the failure reason.
    async fn execute(&self, payload: &Value) -> Result<(), String>;
}

/// Registry of effect handlers, keyed by job type
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EffectHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn EffectHandler>) -> EngineResult<()> {
        let job_type = handler.job_type().to_string();
        if self.handlers.contains_key(&job_type) {
            return Err(EngineError::Internal(format!(
                "handler for job type {job_type} already registered"
            )));
        }
        self.handlers.insert(job_type, handler);
        Ok(())
    }

    pub fn get(&self, job_type: &str) -> Option<&Arc<dyn EffectHandler>> {
        self.handlers.get(job_type)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Executes one job attempt: fences the effect behind the side-effect
/// guard, dispatches to the type's handler, and records duration and
/// outcome metrics on every terminal path.
pub struct JobProcessor {
    handlers: Arc<HandlerRegistry>,
    guard: Arc<SideEffectGuard>,
    metrics: Arc<EngineMetrics>,
}

impl JobProcessor {
    pub fn new(
        handlers: Arc<HandlerRegistry>,
        guard: Arc<SideEffectGuard>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            handlers,
            guard,
            metrics,
        }
    }

    /// Run one attempt to an outcome. Never returns an error: every failure
    /// mode folds into `Outcome::Failure` for the retry coordinator.
    pub async fn process(&self, job: &LeasedJob) -> Outcome {
        let started = Instant::now();
        let outcome = self.run(job).await;
        self.metrics
            .observe_processing(&job.spec().job_type, started.elapsed(), &outcome);
        outcome
    }

    async fn run(&self, job: &LeasedJob) -> Outcome {
        let spec = job.spec();

        // Test hook: callers can force the failure path via the payload
        if spec
            .payload
            .get("forceFail")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Outcome::Failure {
                reason: "forced failure requested by payload".to_string(),
            };
        }

        match self.guard.reserve(job.job_id()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %job.job_id(), "side effect already reserved or done, skipping");
                return Outcome::RecoveredNoOp;
            }
            Err(e) => {
                return Outcome::Failure {
                    reason: format!("side-effect reservation failed: {e}"),
                }
            }
        }

        let handler = match self.handlers.get(&spec.job_type) {
            Some(handler) => handler,
            None => {
                return Outcome::Failure {
                    reason: format!("no handler registered for job type {}", spec.job_type),
                }
            }
        };

        if let Err(reason) = handler.execute(&spec.payload).await {
            return Outcome::Failure { reason };
        }

        if let Err(e) = self.guard.mark_done(job.job_id()).await {
            // The effect already ran; failing the attempt now would only
            // produce a RecoveredNoOp on redelivery. Leave the reservation
            // in-progress and surface it in logs.
            warn!(job_id = %job.job_id(), error = %e, "could not confirm side effect as done");
        }

        Outcome::Success
    }
}
