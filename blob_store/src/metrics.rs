//! Metrics for blob store operations.

use std::time::Instant;

use opentelemetry::{
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};

#[derive(Clone)]
pub struct BlobMetrics {
    /// Latency of object store calls, labelled by operation.
    pub operations: Histogram<f64>,

    /// Calls that ended in `BlobError::Unavailable`.
    pub errors: Counter<u64>,
}

impl BlobMetrics {
    pub fn new(meter: &Meter) -> Self {
        let operations = meter
            .f64_histogram("blob_store_operation_duration_seconds")
            .with_description("Duration of blob store operations in seconds")
            .build();

        let errors = meter
            .u64_counter("blob_store_errors_total")
            .with_description("Total number of blob store errors")
            .build();

        Self { operations, errors }
    }

    pub fn record_error(&self, operation: &'static str) {
        self.errors
            .add(1, &[KeyValue::new("operation", operation)]);
    }
}

impl Default for BlobMetrics {
    fn default() -> Self {
        Self::new(&opentelemetry::global::meter("blob_store"))
    }
}

/// Records the elapsed time into a histogram when dropped.
pub struct Timer {
    start: Instant,
    histogram: Histogram<f64>,
    labels: Vec<KeyValue>,
}

impl Timer {
    pub fn start(histogram: &Histogram<f64>, operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            histogram: histogram.clone(),
            labels: vec![KeyValue::new("operation", operation)],
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.record(duration, &self.labels);
    }
}
