// Prometheus counters exposed on GET /metrics

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    /// Jobs queued, by language
    pub submissions: IntCounterVec,
    /// Submissions refused before queueing, by reason
    pub rejections: IntCounterVec,
    /// Stored results read by clients, by submission status; every poll counts
    pub result_reads: IntCounterVec,
    pub cancellations: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("grader".to_string()), None)?;

        let submissions = IntCounterVec::new(
            Opts::new("submissions_total", "Submissions queued for grading"),
            &["language"],
        )?;
        let rejections = IntCounterVec::new(
            Opts::new("rejections_total", "Submissions rejected before queueing"),
            &["reason"],
        )?;
        let result_reads = IntCounterVec::new(
            Opts::new("result_reads_total", "Reads of stored results, one per GET"),
            &["status"],
        )?;
        let cancellations = IntCounter::new("cancellations_total", "Cancellation requests accepted")?;

        registry.register(Box::new(submissions.clone()))?;
        registry.register(Box::new(rejections.clone()))?;
        registry.register(Box::new(result_reads.clone()))?;
        registry.register(Box::new(cancellations.clone()))?;

        Ok(Self {
            registry,
            submissions,
            rejections,
            result_reads,
            cancellations,
        })
    }

    /// Text exposition format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.submissions.with_label_values(&["python"]).inc();
        metrics.rejections.with_label_values(&["unknown_problem"]).inc_by(2);

        let text = metrics.render().unwrap();
        assert!(text.contains("grader_submissions_total{language=\"python\"} 1"));
        assert!(text.contains("grader_rejections_total{reason=\"unknown_problem\"} 2"));
    }

    #[test]
    fn test_result_reads_count_every_poll() {
        let metrics = Metrics::new().unwrap();
        for _ in 0..3 {
            metrics.result_reads.with_label_values(&["Accepted"]).inc();
        }

        let text = metrics.render().unwrap();
        assert!(text.contains("grader_result_reads_total{status=\"Accepted\"} 3"));
        assert!(!text.contains("results_served_total"));
    }
}
