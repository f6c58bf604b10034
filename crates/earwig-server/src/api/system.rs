//! System status API endpoint.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// System status response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "version": "0.1.0",
    "uptime_secs": 3600,
    "devices_count": 2,
    "recordings_count": 7,
    "capture_active": false
}))]
pub struct StatusResponse {
    /// Server version.
    pub version: String,

    /// Server uptime in seconds.
    pub uptime_secs: u64,

    /// Number of devices in the registry.
    pub devices_count: usize,

    /// Total capture metadata entries across all devices.
    pub recordings_count: usize,

    /// Whether a capture session is currently running.
    pub capture_active: bool,
}

/// Get system status.
#[utoipa::path(
    get,
    path = "/status",
    tag = "system",
    operation_id = "getStatus",
    summary = "Get system status",
    description = "Returns counts from the registry and whether a capture \
        session is currently running.",
    responses(
        (status = 200, description = "System status", body = StatusResponse)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> Json<StatusResponse> {
    let devices = state.registry.devices();
    let recordings_count = devices
        .iter()
        .map(|d| state.registry.recordings(&d.address).len())
        .sum();
    let capture_active = state.capture.lock().await.is_some();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        devices_count: devices.len(),
        recordings_count,
        capture_active,
    })
}
