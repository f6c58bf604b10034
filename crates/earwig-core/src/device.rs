//! Target device types.

use serde::{Deserialize, Serialize};

use crate::address::{AddressType, DeviceAddress};

/// A capability advertised by a device, parsed from `bluetoothctl info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Service UUID as printed by the tool.
    pub uuid: String,
    /// Human-readable service name, `Unknown` when the tool prints none.
    pub name: String,
}

/// Working state for one device over one run.
///
/// Mutable while discovery and introspection fill in what is learned; never
/// persisted itself — the registry stores a projection of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Canonical device address.
    pub address: DeviceAddress,
    /// Addressing mode used for pairing.
    pub address_type: AddressType,
    /// Advertised name, when a scan line carried one.
    pub name: Option<String>,
    /// Last observed signal strength in dBm.
    pub rssi: Option<i16>,
    /// Services discovered after connecting.
    pub services: Vec<ServiceRecord>,
}

impl Target {
    /// Creates a target with nothing discovered yet.
    #[must_use]
    pub fn new(address: DeviceAddress, address_type: AddressType) -> Self {
        Self {
            address,
            address_type,
            name: None,
            rssi: None,
            services: Vec::new(),
        }
    }
}
