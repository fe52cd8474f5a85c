use prometheus::{GaugeVec, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

/// Reconciler metrics, registered once at startup and handed to every
/// reconcile via the shared `Context` — mirrors `WORKER_METRICS` in spirit,
/// but instance-scoped rather than process-global so tests can build their
/// own registry.
#[derive(Clone)]
pub struct Metrics {
    pub reconcile_count: IntCounter,
    pub reconcile_failures: IntCounterVec,
    pub reconcile_duration_seconds: HistogramVec,
    pub lro_polls: IntCounterVec,
    /// Labeled `(namespace, name, reason)`, set to 1 for the Ready
    /// condition's active reason and 0 for every other reason previously
    /// reported for that instance (SPEC_FULL §C.3).
    pub condition_reason: GaugeVec,
}

impl Metrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let reconcile_count = IntCounter::new("instance_reconcile_total", "Number of reconcile ticks run")?;
        let reconcile_failures = IntCounterVec::new(
            Opts::new("instance_reconcile_failures_total", "Number of reconcile ticks that errored"),
            &["instance"],
        )?;
        let reconcile_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new("instance_reconcile_duration_seconds", "Reconcile tick duration"),
            &["instance"],
        )?;
        let lro_polls = IntCounterVec::new(
            Opts::new("instance_lro_polls_total", "Long-running-operation polls issued"),
            &["instance", "kind"],
        )?;
        let condition_reason = GaugeVec::new(
            Opts::new("instance_ready_condition_reason", "Active Ready-condition reason, 1 if active"),
            &["namespace", "name", "reason"],
        )?;

        registry.register(Box::new(reconcile_count.clone()))?;
        registry.register(Box::new(reconcile_failures.clone()))?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;
        registry.register(Box::new(lro_polls.clone()))?;
        registry.register(Box::new(condition_reason.clone()))?;

        Ok(Metrics {
            reconcile_count,
            reconcile_failures,
            reconcile_duration_seconds,
            lro_polls,
            condition_reason,
        })
    }

    pub fn record_reason(&self, namespace: &str, name: &str, prior: Option<&str>, reason: &str) {
        if let Some(prior) = prior {
            if prior != reason {
                self.condition_reason.with_label_values(&[namespace, name, prior]).set(0.0);
            }
        }
        self.condition_reason.with_label_values(&[namespace, name, reason]).set(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_duplicate_collector_error() {
        let registry = Registry::new();
        assert!(Metrics::new(&registry).is_ok());
    }

    #[test]
    fn record_reason_zeroes_the_prior_reason() {
        let registry = Registry::new();
        let metrics = Metrics::new(&registry).unwrap();
        metrics.record_reason("ns", "inst", None, "CreateInProgress");
        metrics.record_reason("ns", "inst", Some("CreateInProgress"), "CreateComplete");
        assert_eq!(
            metrics.condition_reason.with_label_values(&["ns", "inst", "CreateInProgress"]).get(),
            0.0
        );
        assert_eq!(
            metrics.condition_reason.with_label_values(&["ns", "inst", "CreateComplete"]).get(),
            1.0
        );
    }
}
