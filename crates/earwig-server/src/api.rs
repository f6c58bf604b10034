//! HTTP API routes and handlers.
//!
//! Endpoint implementations organized by domain:
//! - `bluetooth` - scan, pairing bypass, connect
//! - `devices` - registry browsing
//! - `recordings` - capture sessions and files
//! - `system` / `health` - status endpoints
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod bluetooth;
pub mod devices;
pub mod error;
pub mod health;
pub mod openapi;
pub mod recordings;
pub mod system;

// Re-export commonly used types
#[allow(unused_imports)]
pub use error::{ApiError, ApiResult, ErrorResponse};

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                                  - Health check
/// /api
/// ├── /status                              - Registry counts, capture state
/// ├── /devices                             - Known devices
/// ├── /devices/{address}                   - One device + its captures
/// ├── /devices/{address}/recordings        - Capture metadata
/// ├── /devices/{address}/record/start|stop - Capture session control
/// ├── /recordings/{address}/{filename}     - Capture file download
/// ├── /scan /pair /connect                 - Workflow operations
/// └── /openapi.json                        - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/status", get(system::get_status))
                .route("/devices", get(devices::list_devices))
                .route("/devices/{address}", get(devices::get_device))
                .route(
                    "/devices/{address}/recordings",
                    get(recordings::list_recordings),
                )
                .route(
                    "/devices/{address}/record/start",
                    post(recordings::start_capture),
                )
                .route(
                    "/devices/{address}/record/stop",
                    post(recordings::stop_capture),
                )
                .route(
                    "/recordings/{address}/{filename}",
                    get(recordings::get_recording_file),
                )
                .route("/scan", post(bluetooth::scan))
                .route("/pair", post(bluetooth::pair))
                .route("/connect", post(bluetooth::connect))
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
