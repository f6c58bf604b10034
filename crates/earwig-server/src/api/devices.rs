//! Device registry API endpoints.
//!
//! Read-only views over what the workflow has learned about targets.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use earwig_core::{DeviceAddress, DeviceRecord, RecordingMetadata, ServiceRecord};

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

// ============================================================================
// Response Types
// ============================================================================

/// A service advertised by a device.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "uuid": "0000110b-0000-1000-8000-00805f9b34fb",
    "name": "Audio Sink"
}))]
pub struct ServiceEntry {
    /// Service UUID.
    pub uuid: String,
    /// Human-readable name, `Unknown` when the tool printed none.
    pub name: String,
}

impl From<ServiceRecord> for ServiceEntry {
    fn from(service: ServiceRecord) -> Self {
        Self {
            uuid: service.uuid,
            name: service.name,
        }
    }
}

/// One known device.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "address": "aa:bb:cc:dd:ee:ff",
    "address_type": "BR_EDR",
    "name": "Kitchen Speaker",
    "rssi": -48,
    "services": [],
    "last_seen": "2025-01-15 03:30:00",
    "connection_history": ["2025-01-15 03:30:00"]
}))]
pub struct DeviceResponse {
    /// Canonical device address.
    pub address: String,
    /// Addressing mode name.
    pub address_type: String,
    /// Advertised name, when one was seen.
    pub name: Option<String>,
    /// Last observed signal strength in dBm.
    pub rssi: Option<i16>,
    /// Services discovered on the last connection.
    pub services: Vec<ServiceEntry>,
    /// When the device was last connected (local time).
    pub last_seen: String,
    /// Up to ten most recent connection timestamps, newest last.
    pub connection_history: Vec<String>,
}

impl From<DeviceRecord> for DeviceResponse {
    fn from(record: DeviceRecord) -> Self {
        Self {
            address: record.address.to_string(),
            address_type: record.address_type.name().to_string(),
            name: record.name,
            rssi: record.rssi,
            services: record.services.into_iter().map(Into::into).collect(),
            last_seen: record.last_seen,
            connection_history: record.connection_history,
        }
    }
}

/// Metadata of one finished capture.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "filename": "AA_BB_CC_DD_EE_FF_20250115_033000.wav",
    "path": "extracted_data/aa:bb:cc:dd:ee:ff/recordings/AA_BB_CC_DD_EE_FF_20250115_033000.wav",
    "timestamp": "2025-01-15 03:30:00",
    "size_bytes": 176400,
    "duration_seconds": 1.0
}))]
pub struct RecordingEntry {
    /// Capture file base name.
    pub filename: String,
    /// Full path of the capture file.
    pub path: String,
    /// When the capture finished (local time).
    pub timestamp: String,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Estimated duration in seconds, one decimal place.
    pub duration_seconds: f64,
}

impl From<RecordingMetadata> for RecordingEntry {
    fn from(metadata: RecordingMetadata) -> Self {
        Self {
            filename: metadata.filename,
            path: metadata.path,
            timestamp: metadata.timestamp,
            size_bytes: metadata.size_bytes,
            duration_seconds: metadata.duration_seconds,
        }
    }
}

/// Device list response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DevicesResponse {
    /// Every known device, in registry order.
    pub devices: Vec<DeviceResponse>,
}

/// Single device response, including its captures.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeviceDetailResponse {
    /// The device record.
    pub device: DeviceResponse,
    /// Capture metadata recorded for the device, oldest first.
    pub recordings: Vec<RecordingEntry>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Parses a path address, mapping failure to a 400.
pub(crate) fn parse_address(raw: &str) -> Result<DeviceAddress, ApiError> {
    DeviceAddress::parse(raw).map_err(ApiError::from)
}

/// List all known devices.
#[utoipa::path(
    get,
    path = "/devices",
    tag = "devices",
    operation_id = "listDevices",
    summary = "List known devices",
    description = "Returns every device the workflow has ever connected to, \
        with its bounded connection history.",
    responses(
        (status = 200, description = "Known devices", body = DevicesResponse)
    )
)]
pub async fn list_devices(State(state): State<SharedState>) -> Json<DevicesResponse> {
    let devices = state
        .registry
        .devices()
        .into_iter()
        .map(Into::into)
        .collect();
    Json(DevicesResponse { devices })
}

/// Get one device with its capture metadata.
#[utoipa::path(
    get,
    path = "/devices/{address}",
    tag = "devices",
    operation_id = "getDevice",
    summary = "Get one device",
    params(
        ("address" = String, Path, description = "Device address, any case")
    ),
    responses(
        (status = 200, description = "Device found", body = DeviceDetailResponse),
        (status = 400, description = "Malformed address"),
        (status = 404, description = "Unknown device")
    )
)]
pub async fn get_device(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> ApiResult<Json<DeviceDetailResponse>> {
    let address = parse_address(&address)?;

    let record = state
        .registry
        .device(&address)
        .ok_or_else(|| ApiError::NotFound {
            error_code: "device_not_found".to_string(),
            message: format!("No record for device {address}"),
        })?;

    let recordings = state
        .registry
        .recordings(&address)
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(DeviceDetailResponse {
        device: record.into(),
        recordings,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use earwig_core::{AddressType, Target};

    #[test]
    fn device_response_from_record() {
        let mut target = Target::new(
            DeviceAddress::parse("AA:BB:CC:DD:EE:FF").unwrap(),
            AddressType::BrEdr,
        );
        target.name = Some("Speaker".to_string());
        let record = DeviceRecord::snapshot(&target);

        let response = DeviceResponse::from(record);
        assert_eq!(response.address, "aa:bb:cc:dd:ee:ff");
        assert_eq!(response.address_type, "BR_EDR");
        assert_eq!(response.name.as_deref(), Some("Speaker"));
    }

    #[test]
    fn parse_address_rejects_garbage_with_bad_request() {
        let err = parse_address("garbage").unwrap_err();
        assert!(matches!(err, ApiError::BadRequest { .. }));
    }
}
