use crate::errors::DriverError;
use prometheus::{
    histogram_opts, opts, proto::MetricFamily, HistogramVec, IntCounterVec, Registry,
};
use tokio::time::Instant;

/// Prometheus metrics for driver operations, kept in their own registry.
#[derive(Clone)]
pub struct Metrics {
    pub operations: IntCounterVec,
    pub failures: IntCounterVec,
    pub wait_duration: HistogramVec,
    registry: Registry,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let operations = IntCounterVec::new(
            opts!("extension_operations_total", "Driver operations by outcome"),
            &["kind", "operation", "result"],
        )?;
        let failures = IntCounterVec::new(
            opts!(
                "extension_operation_failures_total",
                "Failed driver operations by error"
            ),
            &["kind", "operation", "error"],
        )?;
        let wait_duration = HistogramVec::new(
            histogram_opts!(
                "extension_wait_duration_seconds",
                "Time spent waiting for external controllers",
                vec![1., 5., 15., 30., 60., 180., 600.]
            ),
            &["kind", "operation"],
        )?;
        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(wait_duration.clone()))?;
        Ok(Self {
            operations,
            failures,
            wait_duration,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    pub fn record(&self, kind: &str, operation: &str, res: Result<(), &DriverError>) {
        match res {
            Ok(()) => self
                .operations
                .with_label_values(&[kind, operation, "success"])
                .inc(),
            Err(err) => {
                self.operations
                    .with_label_values(&[kind, operation, "failure"])
                    .inc();
                self.failures
                    .with_label_values(&[kind, operation, err.metric_label()])
                    .inc();
            }
        }
    }

    pub fn measure_wait(&self, kind: &str, operation: &str) -> WaitMeasurer {
        WaitMeasurer {
            start: Instant::now(),
            metric: self.wait_duration.with_label_values(&[kind, operation]),
        }
    }
}

/// Observes the time between its creation and drop in the wait histogram.
pub struct WaitMeasurer {
    start: Instant,
    metric: prometheus::Histogram,
}

impl Drop for WaitMeasurer {
    fn drop(&mut self) {
        self.metric.observe(self.start.elapsed().as_secs_f64());
    }
}
