use anyhow::Result;
use blob_store::Timer;
use data_model::ChunkStatus;
use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
    KeyValue,
};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::metrics::SdkMeterProvider;

use crate::config::ServerConfig;

/// Installs the global meter provider. Without it every instrument is a
/// no-op, so this has to run before any `DeliveryMetrics` is created.
pub fn init_provider(config: &ServerConfig) -> Result<Option<SdkMeterProvider>> {
    if !config.telemetry.enable_metrics {
        return Ok(None);
    }

    let mut exporter = MetricExporter::builder().with_tonic();
    if let Some(endpoint) = &config.telemetry.endpoint {
        exporter = exporter.with_endpoint(endpoint.clone());
    }
    let provider = SdkMeterProvider::builder()
        .with_periodic_exporter(exporter.build()?)
        .build();
    global::set_meter_provider(provider.clone());

    Ok(Some(provider))
}

#[derive(Clone)]
pub struct DeliveryMetrics {
    chunks_served: Counter<u64>,
    bytes_served: Counter<u64>,
    completions: Counter<u64>,
    not_ready_polls: Counter<u64>,
    rejections: Counter<u64>,
    fetch_latency: Histogram<f64>,
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        let meter = global::meter("wave-delivery");
        Self {
            chunks_served: meter
                .u64_counter("delivery_chunks_served")
                .with_description("Chunks returned with a payload")
                .build(),
            bytes_served: meter
                .u64_counter("delivery_bytes_served")
                .with_description("Payload bytes returned across all chunks")
                .build(),
            completions: meter
                .u64_counter("delivery_completions")
                .with_description("Artifacts marked as downloaded")
                .build(),
            not_ready_polls: meter
                .u64_counter("delivery_not_ready_polls")
                .with_description("Fetches answered with in_progress")
                .build(),
            rejections: meter
                .u64_counter("delivery_rejections")
                .with_description("Fetches rejected, by error kind")
                .build(),
            fetch_latency: meter
                .f64_histogram("delivery_fetch_duration_seconds")
                .with_description("Duration of chunk fetches in seconds")
                .build(),
        }
    }

    pub fn fetch_timer(&self) -> Timer {
        Timer::start(&self.fetch_latency, "fetch_chunk")
    }

    pub fn chunk_served(&self, len: usize, is_last: bool) {
        let labels = [KeyValue::new("is_last", is_last)];
        self.chunks_served.add(1, &labels);
        self.bytes_served.add(len as u64, &labels);
    }

    pub fn completed(&self) {
        self.completions.add(1, &[]);
    }

    pub fn not_ready(&self) {
        self.not_ready_polls.add(1, &[]);
    }

    pub fn rejected(&self, kind: ChunkStatus) {
        self.rejections
            .add(1, &[KeyValue::new("kind", kind.as_ref().to_string())]);
    }
}

impl Default for DeliveryMetrics {
    fn default() -> Self {
        Self::new()
    }
}
