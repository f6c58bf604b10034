//! Bluetooth workflow API endpoints: scan, pair, connect.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use earwig_core::{AddressType, DeviceAddress, PairingOutcome, Target};

use crate::api::devices::ServiceEntry;
use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Scan request.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[schema(example = json!({
    "timeout_secs": 5,
    "auto_connect": false
}))]
pub struct ScanRequest {
    /// Scan duration in seconds; the configured default when omitted.
    pub timeout_secs: Option<u64>,

    /// Connect to the first accepting candidate after the scan.
    #[serde(default)]
    pub auto_connect: bool,
}

/// A device seen during a scan.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "address": "aa:bb:cc:dd:ee:ff",
    "name": "Kitchen Speaker",
    "rssi": -48
}))]
pub struct DiscoveredDevice {
    /// Canonical device address.
    pub address: String,
    /// Advertised name, when the scan line carried one.
    pub name: Option<String>,
    /// Signal strength in dBm, when printed.
    pub rssi: Option<i16>,
}

/// Scan response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScanResponse {
    /// Candidates seen, in order of first sight.
    pub devices: Vec<DiscoveredDevice>,
    /// How long the scan ran.
    pub scan_duration_secs: u64,
    /// Address auto-connect succeeded against, if requested and successful.
    pub connected: Option<String>,
    /// When the scan completed.
    #[schema(example = "2025-01-15T03:30:00Z")]
    pub scanned_at_utc: String,
}

/// Pairing request.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "address": "AA:BB:CC:DD:EE:FF",
    "address_type": "BR_EDR"
}))]
pub struct PairRequest {
    /// Target device address, any case.
    pub address: String,
    /// Addressing mode, by name or numeric value. Defaults to `BR_EDR`.
    pub address_type: Option<String>,
}

/// Pairing response.
///
/// `paired: false` is a normal outcome: the target rejected authentication
/// and resists the bypass. Tool breakage surfaces as an error status
/// instead, so the two can never be confused.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "address": "aa:bb:cc:dd:ee:ff",
    "paired": true,
    "attempted_at_utc": "2025-01-15T03:30:00Z"
}))]
pub struct PairResponse {
    /// Canonical target address.
    pub address: String,
    /// Whether a bond was established.
    pub paired: bool,
    /// When the attempt finished.
    pub attempted_at_utc: String,
}

/// Connect request.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "address": "AA:BB:CC:DD:EE:FF"
}))]
pub struct ConnectRequest {
    /// Target device address, any case.
    pub address: String,
    /// Addressing mode, by name or numeric value. Defaults to `BR_EDR`.
    pub address_type: Option<String>,
}

/// Connect response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectResponse {
    /// Canonical target address.
    pub address: String,
    /// Advertised name, when one was seen.
    pub name: Option<String>,
    /// Signal strength observed during the pre-connect scan.
    pub rssi: Option<i16>,
    /// Services discovered after connecting.
    pub services: Vec<ServiceEntry>,
    /// When the connection completed.
    pub connected_at_utc: String,
}

// ============================================================================
// Handlers
// ============================================================================

fn parse_type(raw: Option<&str>) -> Result<AddressType, ApiError> {
    match raw {
        Some(value) => value.parse::<AddressType>().map_err(ApiError::from),
        None => Ok(AddressType::default()),
    }
}

/// Scan for nearby devices, optionally auto-connecting.
#[utoipa::path(
    post,
    path = "/scan",
    tag = "bluetooth",
    operation_id = "scanDevices",
    summary = "Scan for nearby devices",
    description = "Runs a bounded discovery scan. With `auto_connect` set, \
        the candidates are then tried sequentially and the first that \
        accepts a connection is reported.",
    request_body = ScanRequest,
    responses(
        (status = 200, description = "Scan completed", body = ScanResponse),
        (status = 503, description = "Scan tool failed")
    )
)]
pub async fn scan(
    State(state): State<SharedState>,
    Json(request): Json<ScanRequest>,
) -> ApiResult<Json<ScanResponse>> {
    let timeout = request
        .timeout_secs
        .unwrap_or(state.config.scan_timeout_secs);
    let manager = state.connection_manager();

    let targets = manager.discover(timeout).await?;
    let devices: Vec<DiscoveredDevice> = targets
        .iter()
        .map(|t| DiscoveredDevice {
            address: t.address.to_string(),
            name: t.name.clone(),
            rssi: t.rssi,
        })
        .collect();

    let connected = if request.auto_connect {
        manager
            .connect_first(targets)
            .await
            .map(|t| t.address.to_string())
    } else {
        None
    };

    Ok(Json(ScanResponse {
        devices,
        scan_duration_secs: timeout,
        connected,
        scanned_at_utc: Utc::now().to_rfc3339(),
    }))
}

/// Attempt the no-confirmation pairing bypass against a target.
#[utoipa::path(
    post,
    path = "/pair",
    tag = "bluetooth",
    operation_id = "pairDevice",
    summary = "Attempt no-confirmation pairing",
    description = "Configures the controller and attempts pairing with \
        NoInputNoOutput capability. `paired: false` means the target \
        rejected authentication and is not susceptible.",
    request_body = PairRequest,
    responses(
        (status = 200, description = "Attempt finished", body = PairResponse),
        (status = 400, description = "Malformed address or type"),
        (status = 503, description = "Pairing tool failed")
    )
)]
pub async fn pair(
    State(state): State<SharedState>,
    Json(request): Json<PairRequest>,
) -> ApiResult<Json<PairResponse>> {
    let address = DeviceAddress::parse(&request.address)?;
    let address_type = parse_type(request.address_type.as_deref())?;

    let target = Target::new(address.clone(), address_type);
    let outcome = state.pairing_agent().pair(&target).await?;

    Ok(Json(PairResponse {
        address: address.to_string(),
        paired: outcome == PairingOutcome::Paired,
        attempted_at_utc: Utc::now().to_rfc3339(),
    }))
}

/// Connect to a target and introspect its services.
#[utoipa::path(
    post,
    path = "/connect",
    tag = "bluetooth",
    operation_id = "connectDevice",
    summary = "Connect to a device",
    description = "Connects with the configured retry policy, discovers the \
        target's services, and upserts the device record.",
    request_body = ConnectRequest,
    responses(
        (status = 200, description = "Connected", body = ConnectResponse),
        (status = 400, description = "Malformed address or type"),
        (status = 503, description = "Connection failed")
    )
)]
pub async fn connect(
    State(state): State<SharedState>,
    Json(request): Json<ConnectRequest>,
) -> ApiResult<Json<ConnectResponse>> {
    let address_type = parse_type(request.address_type.as_deref())?;

    let target = state
        .connection_manager()
        .connect_address(&request.address, address_type)
        .await?;

    Ok(Json(ConnectResponse {
        address: target.address.to_string(),
        name: target.name,
        rssi: target.rssi,
        services: target.services.into_iter().map(Into::into).collect(),
        connected_at_utc: Utc::now().to_rfc3339(),
    }))
}
