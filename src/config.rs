use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// Engine-wide runtime settings. Queue policy lives in the registry; this
/// covers the knobs shared by every queue.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Connection string for the backing broker. Required even for in-memory
    /// deployments so a misconfigured production boot fails fast instead of
    /// silently running without durability.
    pub broker_url: String,

    /// Exclusive processing window granted per lease
    pub lease_duration: Duration,

    /// Idle delay between lease polls on an empty queue
    pub poll_interval: Duration,

    /// Queue depth sampling period
    pub metrics_interval: Duration,

    /// Expired-lease sweep period
    pub reaper_interval: Duration,
}

impl EngineConfig {
    pub fn with_broker_url(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            lease_duration: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
            metrics_interval: Duration::from_secs(5),
            reaper_interval: Duration::from_secs(30),
        }
    }

    /// Read configuration from the environment. A missing `BROKER_URL` is a
    /// hard error: the process must not come up half-configured.
    pub fn from_env() -> EngineResult<Self> {
        let broker_url = std::env::var("BROKER_URL")
            .map_err(|_| EngineError::Config("BROKER_URL is not defined".to_string()))?;
        Ok(Self::with_broker_url(broker_url))
    }
}
