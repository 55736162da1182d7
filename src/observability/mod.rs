mod collector;
mod metrics;

pub use collector::MetricsCollector;
pub use metrics::EngineMetrics;
