use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use std::time::Duration;

use crate::error::EngineResult;
use crate::types::{Outcome, QueueCounts};

/// Engine metrics, registered once against a prometheus registry at startup.
/// Exposition (text format over HTTP) is the embedding process's concern.
pub struct EngineMetrics {
    jobs_total: IntCounterVec,
    job_duration_ms: HistogramVec,
    dlq_jobs_total: IntCounterVec,
    dlq_size: IntGauge,
    queue_waiting: IntGaugeVec,
    queue_active: IntGaugeVec,
    queue_delayed: IntGaugeVec,
}

impl EngineMetrics {
    pub fn register(registry: &Registry) -> EngineResult<Self> {
        let jobs_total = IntCounterVec::new(
            Opts::new("jobs_total", "Total jobs processed"),
            &["status", "type"],
        )?;
        let job_duration_ms = HistogramVec::new(
            HistogramOpts::new("job_duration_ms", "Job execution duration")
                .buckets(vec![100.0, 500.0, 1000.0, 2000.0, 5000.0]),
            &["type"],
        )?;
        let dlq_jobs_total = IntCounterVec::new(
            Opts::new("dlq_jobs_total", "Total jobs moved to dead letter queue"),
            &["type"],
        )?;
        let dlq_size = IntGauge::new(
            "queue_dead_letter_size",
            "Total number of jobs currently in the dead letter queue",
        )?;
        let queue_waiting = IntGaugeVec::new(
            Opts::new("queue_waiting_jobs", "Number of waiting jobs per queue"),
            &["queue"],
        )?;
        let queue_active = IntGaugeVec::new(
            Opts::new("queue_active_jobs", "Number of active jobs per queue"),
            &["queue"],
        )?;
        let queue_delayed = IntGaugeVec::new(
            Opts::new("queue_delayed_jobs", "Number of delayed jobs per queue"),
            &["queue"],
        )?;

        registry.register(Box::new(jobs_total.clone()))?;
        registry.register(Box::new(job_duration_ms.clone()))?;
        registry.register(Box::new(dlq_jobs_total.clone()))?;
        registry.register(Box::new(dlq_size.clone()))?;
        registry.register(Box::new(queue_waiting.clone()))?;
        registry.register(Box::new(queue_active.clone()))?;
        registry.register(Box::new(queue_delayed.clone()))?;

        Ok(Self {
            jobs_total,
            job_duration_ms,
            dlq_jobs_total,
            dlq_size,
            queue_waiting,
            queue_active,
            queue_delayed,
        })
    }

    /// Record one terminal processing path: outcome counter plus duration
    /// observation, tagged by job type.
    pub fn observe_processing(&self, job_type: &str, elapsed: Duration, outcome: &Outcome) {
        self.jobs_total
            .with_label_values(&[outcome.label(), job_type])
            .inc();
        self.job_duration_ms
            .with_label_values(&[job_type])
            .observe(elapsed.as_millis() as f64);
    }

    /// Bump the dead-letter counter for a terminally failed job
    pub fn inc_dead_lettered(&self, job_type: &str) {
        self.dlq_jobs_total.with_label_values(&[job_type]).inc();
    }

    /// Publish a queue depth sample
    pub fn set_queue_depths(&self, queue: &str, counts: &QueueCounts) {
        self.queue_waiting
            .with_label_values(&[queue])
            .set(counts.waiting as i64);
        self.queue_active
            .with_label_values(&[queue])
            .set(counts.active as i64);
        self.queue_delayed
            .with_label_values(&[queue])
            .set(counts.delayed as i64);
    }

    /// Publish the dead-letter store size
    pub fn set_dlq_size(&self, size: u64) {
        self.dlq_size.set(size as i64);
    }

    /// Current value of `jobs_total{status, type}`
    pub fn jobs_total(&self, status: &str, job_type: &str) -> u64 {
        self.jobs_total.with_label_values(&[status, job_type]).get()
    }

    /// Current value of `dlq_jobs_total{type}`
    pub fn dlq_total(&self, job_type: &str) -> u64 {
        self.dlq_jobs_total.with_label_values(&[job_type]).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_are_counted_by_status_and_type() {
        let metrics = EngineMetrics::register(&Registry::new()).unwrap();

        metrics.observe_processing(
            "welcome-email",
            Duration::from_millis(120),
            &Outcome::Success,
        );
        metrics.observe_processing(
            "welcome-email",
            Duration::from_millis(5),
            &Outcome::RecoveredNoOp,
        );
        metrics.observe_processing(
            "welcome-email",
            Duration::from_millis(40),
            &Outcome::Failure {
                reason: "boom".to_string(),
            },
        );

        assert_eq!(metrics.jobs_total("success", "welcome-email"), 1);
        assert_eq!(metrics.jobs_total("recovered", "welcome-email"), 1);
        assert_eq!(metrics.jobs_total("failure", "welcome-email"), 1);
    }

    #[test]
    fn queue_gauges_follow_samples() {
        let metrics = EngineMetrics::register(&Registry::new()).unwrap();

        metrics.set_queue_depths(
            "email",
            &QueueCounts {
                waiting: 3,
                active: 1,
                delayed: 2,
            },
        );
        metrics.set_dlq_size(7);

        assert_eq!(metrics.queue_waiting.with_label_values(&["email"]).get(), 3);
        assert_eq!(metrics.queue_active.with_label_values(&["email"]).get(), 1);
        assert_eq!(metrics.queue_delayed.with_label_values(&["email"]).get(), 2);
        assert_eq!(metrics.dlq_size.get(), 7);
    }
}
