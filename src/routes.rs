use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    routing::{get, post, put},
    Router,
};
use blob_store::BlobStorage;
use state_store::MetadataStore;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{coordinator::DeliveryCoordinator, metrics::DeliveryMetrics, middleware::InstanceRequestSpan};

mod artifacts;
mod download;

use artifacts::{create_artifact, mark_ready, upload_blob};
use download::{fetch_chunk, legacy_download};

#[derive(Clone)]
pub struct RouteState {
    pub coordinator: Arc<DeliveryCoordinator>,
    pub metadata: Arc<dyn MetadataStore>,
    pub blob_storage: Arc<BlobStorage>,
    pub metrics: Arc<DeliveryMetrics>,
}

pub fn create_routes(route_state: RouteState, request_span: InstanceRequestSpan) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/artifacts", post(create_artifact))
        .route("/artifacts/{id}/blob", put(upload_blob))
        .route("/artifacts/{id}/ready", post(mark_ready))
        .route("/artifacts/{id}/chunks", get(fetch_chunk))
        .route("/download", get(legacy_download))
        .with_state(route_state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span)
                .on_failure(()),
        )
        .layer(cors)
        .layer(DefaultBodyLimit::disable())
}

async fn index() -> &'static str {
    "Wave Delivery Server"
}
