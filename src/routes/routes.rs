//! Defines the gateway's HTTP surface.
//!
//! - `GET  /healthz`        liveness
//! - `GET  /readyz`         readiness (backend bucket reachable)
//! - `POST /upload`         multipart upload, field `file`
//! - `GET  /file/{*name}`   decrypted download
//!
//! The wildcard `*name` allows nested names like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{get_file, upload_file},
    },
    services::gateway_service::GatewayService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. The caller attaches the `GatewayService` state.
pub fn routes() -> Router<GatewayService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Uploads are streamed, so the default 2 MB cap does not apply.
        .route(
            "/upload",
            post(upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route("/file/{*name}", get(get_file))
}
