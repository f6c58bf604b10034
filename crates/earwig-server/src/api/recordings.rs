//! Capture session API endpoints.
//!
//! One capture runs at a time. `start` spawns the session in the
//! background; `stop` fires the cooperative cancel signal — a normal
//! termination — and returns the finished metadata.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use utoipa::ToSchema;
use uuid::Uuid;

use earwig_core::Target;

use crate::api::devices::{parse_address, RecordingEntry};
use crate::api::error::{ApiError, ApiResult};
use crate::state::{ActiveCapture, SharedState};

// ============================================================================
// Response Types
// ============================================================================

/// Capture start response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "session_id": "7f8de2f4-9f3a-4e31-93e5-0a4bd9bb2f70",
    "address": "aa:bb:cc:dd:ee:ff",
    "started_at_utc": "2025-01-15T03:30:00Z"
}))]
pub struct StartCaptureResponse {
    /// Identifier of the running session.
    pub session_id: Uuid,
    /// Canonical target address.
    pub address: String,
    /// When the session started.
    pub started_at_utc: String,
}

/// Capture stop response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StopCaptureResponse {
    /// Identifier of the stopped session.
    pub session_id: Uuid,
    /// Metadata of the finished capture.
    pub recording: RecordingEntry,
}

/// Per-device capture list response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RecordingsResponse {
    /// Canonical device address.
    pub address: String,
    /// Capture metadata, oldest first.
    pub recordings: Vec<RecordingEntry>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Start a capture session against a device.
#[utoipa::path(
    post,
    path = "/devices/{address}/record/start",
    tag = "recordings",
    operation_id = "startCapture",
    summary = "Start a capture session",
    params(
        ("address" = String, Path, description = "Device address, any case")
    ),
    responses(
        (status = 200, description = "Session started", body = StartCaptureResponse),
        (status = 400, description = "Malformed address"),
        (status = 409, description = "A capture is already running")
    )
)]
pub async fn start_capture(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> ApiResult<Json<StartCaptureResponse>> {
    let address = parse_address(&address)?;

    let mut capture = state.capture.lock().await;
    if capture.is_some() {
        return Err(ApiError::Conflict {
            error_code: "capture_in_progress".to_string(),
            message: "A capture session is already running".to_string(),
        });
    }

    // Reuse what the registry knows about the device; an unknown address
    // still gets a capture attempt with defaults.
    let target = match state.registry.device(&address) {
        Some(record) => {
            let mut target = Target::new(record.address.clone(), record.address_type);
            target.name = record.name;
            target.rssi = record.rssi;
            target.services = record.services;
            target
        }
        None => Target::new(address.clone(), earwig_core::AddressType::default()),
    };

    let controller = state.recording_controller(&address);
    let cancel = Arc::new(Notify::new());
    let cancel_for_task = Arc::clone(&cancel);
    let task = tokio::spawn(async move {
        controller.record(&target, None, &cancel_for_task).await
    });

    let id = Uuid::new_v4();
    *capture = Some(ActiveCapture {
        id,
        address: address.clone(),
        cancel,
        task,
    });

    Ok(Json(StartCaptureResponse {
        session_id: id,
        address: address.to_string(),
        started_at_utc: Utc::now().to_rfc3339(),
    }))
}

/// Stop the running capture session.
#[utoipa::path(
    post,
    path = "/devices/{address}/record/stop",
    tag = "recordings",
    operation_id = "stopCapture",
    summary = "Stop the capture session",
    description = "Fires the cooperative cancel signal and returns the \
        finished capture's metadata. Stopping is a normal termination; the \
        partially written file is valid output.",
    params(
        ("address" = String, Path, description = "Device address, any case")
    ),
    responses(
        (status = 200, description = "Session stopped", body = StopCaptureResponse),
        (status = 400, description = "Malformed address"),
        (status = 409, description = "No capture running for this device")
    )
)]
pub async fn stop_capture(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> ApiResult<Json<StopCaptureResponse>> {
    let address = parse_address(&address)?;

    let mut guard = state.capture.lock().await;
    let Some(active) = guard.take() else {
        return Err(ApiError::Conflict {
            error_code: "no_capture_in_progress".to_string(),
            message: "No capture session is running".to_string(),
        });
    };
    if active.address != address {
        let running = active.address.to_string();
        *guard = Some(active);
        return Err(ApiError::Conflict {
            error_code: "capture_for_other_device".to_string(),
            message: format!("The running capture targets {running}"),
        });
    }
    drop(guard);

    active.cancel.notify_one();
    let metadata = active.task.await.map_err(|e| ApiError::InternalError {
        error_code: "capture_task_failed".to_string(),
        message: "Capture task aborted".to_string(),
        details: Some(e.to_string()),
    })??;

    Ok(Json(StopCaptureResponse {
        session_id: active.id,
        recording: metadata.into(),
    }))
}

/// List a device's capture metadata.
#[utoipa::path(
    get,
    path = "/devices/{address}/recordings",
    tag = "recordings",
    operation_id = "listRecordings",
    summary = "List a device's captures",
    params(
        ("address" = String, Path, description = "Device address, any case")
    ),
    responses(
        (status = 200, description = "Capture metadata", body = RecordingsResponse),
        (status = 400, description = "Malformed address")
    )
)]
pub async fn list_recordings(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> ApiResult<Json<RecordingsResponse>> {
    let address = parse_address(&address)?;
    let recordings = state
        .registry
        .recordings(&address)
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(RecordingsResponse {
        address: address.to_string(),
        recordings,
    }))
}

/// Serve a finished capture file.
#[utoipa::path(
    get,
    path = "/recordings/{address}/{filename}",
    tag = "recordings",
    operation_id = "getRecordingFile",
    summary = "Download a capture file",
    params(
        ("address" = String, Path, description = "Device address, any case"),
        ("filename" = String, Path, description = "Capture file name")
    ),
    responses(
        (status = 200, description = "The capture file as audio/wav"),
        (status = 400, description = "Malformed address or filename"),
        (status = 404, description = "No such capture")
    )
)]
pub async fn get_recording_file(
    State(state): State<SharedState>,
    Path((address, filename)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let address = parse_address(&address)?;

    // The filename must stay inside the device's recordings directory.
    if filename.contains('/') || filename.contains("..") {
        return Err(ApiError::BadRequest {
            error_code: "invalid_filename".to_string(),
            message: "Filename must not contain path separators".to_string(),
        });
    }

    let path = state.registry.recordings_dir(&address).join(&filename);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(([(header::CONTENT_TYPE, "audio/wav")], bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ApiError::NotFound {
            error_code: "recording_not_found".to_string(),
            message: format!("No capture named '{filename}' for {address}"),
        }),
        Err(e) => Err(ApiError::InternalError {
            error_code: "io_error".to_string(),
            message: "Failed to read capture file".to_string(),
            details: Some(e.to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_response_serialization() {
        let response = StopCaptureResponse {
            session_id: Uuid::nil(),
            recording: RecordingEntry {
                filename: "probe.wav".to_string(),
                path: "recordings/probe.wav".to_string(),
                timestamp: "2025-01-15 03:30:00".to_string(),
                size_bytes: 176_400,
                duration_seconds: 1.0,
            },
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("probe.wav"));
    }
}
