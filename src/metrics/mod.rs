//! Metrics collection for observability

use prometheus::{
    register_counter_vec_with_registry, register_histogram_vec_with_registry, CounterVec,
    HistogramVec, Opts, Registry,
};
use std::sync::Arc;
use once_cell::sync::Lazy;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Access guard metrics
    pub guard_decisions: CounterVec,
    pub guard_wait_duration: HistogramVec,

    // Session metrics
    pub auth_operations: CounterVec,

    // Crew store metrics
    pub crew_mutations: CounterVec,
    pub queries_answered: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let guard_decisions = register_counter_vec_with_registry!(
            Opts::new("guard_decisions_total", "Access guard outcomes per request"),
            &["outcome"],
            registry
        )?;

        let guard_wait_duration = register_histogram_vec_with_registry!(
            "guard_wait_duration_seconds",
            "Time a request waited for the access guard to decide",
            &["outcome"],
            registry
        )?;

        let auth_operations = register_counter_vec_with_registry!(
            Opts::new("auth_operations_total", "Login and logout attempts"),
            &["operation", "status"],
            registry
        )?;

        let crew_mutations = register_counter_vec_with_registry!(
            Opts::new("crew_mutations_total", "Task and query mutations on crew records"),
            &["operation", "status"],
            registry
        )?;

        let queries_answered = register_counter_vec_with_registry!(
            Opts::new("queries_answered_total", "Automated query answers per topic"),
            &["topic"],
            registry
        )?;

        Ok(Self {
            registry,
            guard_decisions,
            guard_wait_duration,
            auth_operations,
            crew_mutations,
            queries_answered,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record an access guard outcome and how long the request waited for it
    pub fn record_guard(&self, outcome: &str, waited_secs: f64) {
        self.guard_decisions.with_label_values(&[outcome]).inc();
        self.guard_wait_duration
            .with_label_values(&[outcome])
            .observe(waited_secs);
    }

    /// Record a login or logout attempt
    pub fn record_auth(&self, operation: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.auth_operations
            .with_label_values(&[operation, status])
            .inc();
    }

    /// Record a crew record mutation
    pub fn record_crew_mutation(&self, operation: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.crew_mutations
            .with_label_values(&[operation, status])
            .inc();
    }

    /// Record an automated answer; `topic` is "generic" when nothing matched
    pub fn record_query_answer(&self, topic: &str) {
        self.queries_answered.with_label_values(&[topic]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = Metrics::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_export_contains_recorded_series() {
        let metrics = Metrics::new().unwrap();
        metrics.record_guard("render", 0.0);
        metrics.record_auth("login", false);
        metrics.record_crew_mutation("add_task", true);
        metrics.record_query_answer("sleep");

        let text = metrics.export_prometheus();
        assert!(text.contains(r#"guard_decisions_total{outcome="render"} 1"#));
        assert!(text.contains(r#"auth_operations_total{operation="login",status="error"} 1"#));
        assert!(text.contains(r#"crew_mutations_total{operation="add_task",status="success"} 1"#));
        assert!(text.contains(r#"queries_answered_total{topic="sleep"} 1"#));
    }
}
