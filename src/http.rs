//! HTTP healthcheck endpoint of a distributed application.
//!
//! Requires the `http` feature. Uses axum for routing.
//!
//! ## Routes
//!
//! Mounted under the configured `healthcheck_path`
//! (`/distribution/healthcheck/` by default):
//!
//! - `GET {healthcheck_path}`: proxies of every remote key.
//! - `GET {healthcheck_path}:key`: proxies of one partition key.
//!
//! Answers `200` with `{ "<path>": true, ... }` when every probe
//! succeeds, `503` with the same map plus `errors` when one fails, and
//! `404` when the key has no remote service.
//!
//! ## Example
//!
//! ```ignore
//! let distribution = Distribution::new(app, options, network, scheduler)?;
//!
//! // Get the router to compose with other axum routes
//! let router = service_mesh::http::router(distribution.clone());
//!
//! // Or serve directly
//! service_mesh::http::serve(distribution, "0.0.0.0:3030").await?;
//! ```

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::app::{strip_slashes, ServiceError};
use crate::distribution::Distribution;

/// Build an axum `Router` serving the healthcheck routes of `distribution`.
pub fn router(distribution: Arc<Distribution>) -> Router {
    let base = format!("/{}", strip_slashes(&distribution.config().healthcheck_path));
    let base = if base == "/" { String::new() } else { base };
    let mut router = Router::new()
        .route(&format!("{base}/"), get(all_keys_handler))
        .route(&format!("{base}/:key"), get(key_handler));
    if !base.is_empty() {
        router = router.route(&base, get(all_keys_handler));
    }
    router.with_state(distribution)
}

/// Serve the healthcheck over HTTP at the given address (e.g. `"0.0.0.0:3030"`).
pub async fn serve(distribution: Arc<Distribution>, addr: &str) -> Result<(), std::io::Error> {
    let app = router(distribution);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

/// `GET {healthcheck_path}`
async fn all_keys_handler(State(distribution): State<Arc<Distribution>>) -> Response {
    respond(distribution, None).await
}

/// `GET {healthcheck_path}:key`
async fn key_handler(
    State(distribution): State<Arc<Distribution>>,
    Path(key): Path<String>,
) -> Response {
    respond(distribution, Some(key)).await
}

async fn respond(distribution: Arc<Distribution>, key: Option<String>) -> Response {
    // probes block on the substrate
    let outcome =
        tokio::task::spawn_blocking(move || distribution.healthcheck(key.as_deref())).await;
    match outcome {
        Ok(Ok(report)) => (StatusCode::OK, Json(report.to_json())).into_response(),
        Ok(Err(ServiceError::Unavailable {
            data: Some(report), ..
        })) => (StatusCode::SERVICE_UNAVAILABLE, Json(report)).into_response(),
        Ok(Err(err)) => {
            let status =
                StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(json!(err.to_payload()))).into_response()
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}
