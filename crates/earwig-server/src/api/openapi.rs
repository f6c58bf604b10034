//! OpenAPI specification generation.
//!
//! The specification is served as plain JSON from `/api/openapi.json` and
//! drives external dashboard clients.

use axum::Json;
use utoipa::OpenApi;

use super::bluetooth::{
    ConnectRequest, ConnectResponse, DiscoveredDevice, PairRequest, PairResponse, ScanRequest,
    ScanResponse,
};
use super::devices::{
    DeviceDetailResponse, DeviceResponse, DevicesResponse, RecordingEntry, ServiceEntry,
};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::recordings::{RecordingsResponse, StartCaptureResponse, StopCaptureResponse};
use super::system::StatusResponse;

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Main OpenAPI document for the earwig dashboard.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "earwig API",
        version = "0.1.0",
        description = r#"
# earwig API

Dashboard API of earwig, a Bluetooth audio-capture assessment tool for
authorized security testing.

## Overview

1. **Scan**: discover nearby candidates with best-effort name/RSSI
2. **Pair**: attempt the no-confirmation pairing bypass; a rejection means
   the target is not susceptible and is reported, not raised
3. **Connect**: establish the link and introspect services
4. **Capture**: run one audio capture session at a time and browse the
   per-device capture history

Only assess devices you own or are authorized to test.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local earwig server")
    ),
    tags(
        (
            name = "system",
            description = "Health checks and system status"
        ),
        (
            name = "devices",
            description = "Persisted device records and connection history"
        ),
        (
            name = "bluetooth",
            description = "Discovery, pairing bypass, and connection"
        ),
        (
            name = "recordings",
            description = "Capture sessions and capture metadata"
        )
    ),
    paths(
        // System endpoints
        super::health::health_check,
        super::system::get_status,
        // Device endpoints
        super::devices::list_devices,
        super::devices::get_device,
        // Bluetooth endpoints
        super::bluetooth::scan,
        super::bluetooth::pair,
        super::bluetooth::connect,
        // Recording endpoints
        super::recordings::start_capture,
        super::recordings::stop_capture,
        super::recordings::list_recordings,
        super::recordings::get_recording_file,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // System types
            HealthResponse,
            StatusResponse,
            // Device types
            ServiceEntry,
            DeviceResponse,
            DevicesResponse,
            DeviceDetailResponse,
            RecordingEntry,
            // Bluetooth types
            ScanRequest,
            ScanResponse,
            DiscoveredDevice,
            PairRequest,
            PairResponse,
            ConnectRequest,
            ConnectResponse,
            // Recording types
            StartCaptureResponse,
            StopCaptureResponse,
            RecordingsResponse,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "earwig API");
        assert!(!spec.paths.paths.is_empty());
    }
}
