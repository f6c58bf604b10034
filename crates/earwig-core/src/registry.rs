//! Persistent per-device records and capture metadata.
//!
//! Backing store is a flat `devices.json` array keyed by canonical address,
//! plus an `extracted_data/<address>/` tree per device holding capture files
//! and their `recordings.json` metadata. The formats match what earlier
//! deployments wrote, so existing data files keep loading.
//!
//! Two deliberate simplifications, documented rather than fixed:
//!
//! - Single writer. Reads and rewrites are unlocked; concurrent processes
//!   race and the last full rewrite wins.
//! - Persistence failures are logged and swallowed here. By the time the
//!   registry runs, pairing/connection/recording already succeeded, and a
//!   metadata-write problem must not unwind that.

use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::address::{AddressType, DeviceAddress};
use crate::device::{ServiceRecord, Target};

/// Bound on per-device connection history, newest last.
const MAX_HISTORY: usize = 10;

/// Timestamp format shared with the persisted files.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Subdirectories materialized under each device's data directory.
const DEVICE_SUBDIRS: [&str; 4] = ["recordings", "contacts", "call_history", "media"];

/// Current local time in the persisted format.
#[must_use]
pub fn now_string() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// One persisted device record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Canonical address; unique key within the registry.
    pub address: DeviceAddress,

    /// Addressing mode, persisted by name.
    #[serde(rename = "type")]
    pub address_type: AddressType,

    /// Advertised name, when one was ever seen.
    pub name: Option<String>,

    /// Last observed signal strength in dBm.
    pub rssi: Option<i16>,

    /// Services discovered on the most recent connection.
    pub services: Vec<ServiceRecord>,

    /// When the device was last connected, local time.
    pub last_seen: String,

    /// Up to [`MAX_HISTORY`] most recent connection timestamps, newest last.
    #[serde(default)]
    pub connection_history: Vec<String>,
}

impl DeviceRecord {
    /// Projects a run's working [`Target`] into a persistable record,
    /// stamped with the current time.
    #[must_use]
    pub fn snapshot(target: &Target) -> Self {
        Self {
            address: target.address.clone(),
            address_type: target.address_type,
            name: target.name.clone(),
            rssi: target.rssi,
            services: target.services.clone(),
            last_seen: now_string(),
            connection_history: Vec::new(),
        }
    }
}

/// Metadata of one completed capture. Append-only; entries are never
/// mutated or pruned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingMetadata {
    /// Base name of the capture file.
    pub filename: String,
    /// Full path the capture was written to.
    pub path: String,
    /// When the capture finished, local time.
    pub timestamp: String,
    /// Size of the capture file in bytes.
    pub size_bytes: u64,
    /// Estimated duration, one decimal place. An approximation from the
    /// byte size, not parsed from the container.
    pub duration_seconds: f64,
}

/// File-backed store of device records and capture metadata.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    data_dir: PathBuf,
}

impl DeviceRegistry {
    /// Creates a registry rooted at `data_dir`.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Inserts or updates a record by canonical address.
    ///
    /// An existing record keeps its connection history and has every other
    /// field overwritten; a first-sight record starts with an empty history
    /// and gets its per-device directories materialized. Either way the
    /// current timestamp is appended and only the newest [`MAX_HISTORY`]
    /// entries are kept.
    ///
    /// Persistence failures are logged and swallowed.
    pub fn upsert(&self, mut record: DeviceRecord) {
        let mut devices = self.load_devices();

        let existing = devices
            .iter()
            .position(|d| d.address == record.address);

        let mut history = match existing {
            Some(index) => std::mem::take(&mut devices[index].connection_history),
            None => Vec::new(),
        };
        history.push(now_string());
        let excess = history.len().saturating_sub(MAX_HISTORY);
        history.drain(..excess);
        record.connection_history = history;

        self.ensure_device_dirs(&record.address);

        match existing {
            Some(index) => devices[index] = record,
            None => devices.push(record),
        }

        self.store_devices(&devices);
    }

    /// Every known device record, in file order.
    ///
    /// A missing or unreadable file yields an empty list.
    #[must_use]
    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.load_devices()
    }

    /// Looks up one record by canonical address.
    #[must_use]
    pub fn device(&self, address: &DeviceAddress) -> Option<DeviceRecord> {
        self.load_devices()
            .into_iter()
            .find(|d| &d.address == address)
    }

    /// Appends capture metadata to the device's unbounded recording list.
    ///
    /// Persistence failures are logged and swallowed.
    pub fn append_recording(&self, address: &DeviceAddress, metadata: RecordingMetadata) {
        // A capture can land before the device was ever upserted.
        self.ensure_device_dirs(address);

        let path = self.recordings_meta_path(address);
        let mut recordings = self.load_recordings(address);
        recordings.push(metadata);

        match serde_json::to_string_pretty(&recordings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    warn!(path = %path.display(), error = %e, "failed to write recording metadata");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize recording metadata"),
        }
    }

    /// Capture metadata recorded for one device, oldest first.
    #[must_use]
    pub fn recordings(&self, address: &DeviceAddress) -> Vec<RecordingMetadata> {
        self.load_recordings(address)
    }

    /// Directory capture files for `address` are stored under.
    #[must_use]
    pub fn recordings_dir(&self, address: &DeviceAddress) -> PathBuf {
        self.device_dir(address).join("recordings")
    }

    /// Path of the registry file itself.
    #[must_use]
    pub fn devices_path(&self) -> PathBuf {
        self.data_dir.join("devices.json")
    }

    fn device_dir(&self, address: &DeviceAddress) -> PathBuf {
        self.data_dir.join("extracted_data").join(address.as_str())
    }

    fn recordings_meta_path(&self, address: &DeviceAddress) -> PathBuf {
        self.device_dir(address).join("recordings.json")
    }

    fn ensure_device_dirs(&self, address: &DeviceAddress) {
        let device_dir = self.device_dir(address);
        for subdir in DEVICE_SUBDIRS {
            let path = device_dir.join(subdir);
            if let Err(e) = std::fs::create_dir_all(&path) {
                warn!(path = %path.display(), error = %e, "failed to create device directory");
            }
        }
    }

    fn load_devices(&self) -> Vec<DeviceRecord> {
        load_json_list(&self.devices_path())
    }

    fn store_devices(&self, devices: &[DeviceRecord]) {
        let path = self.devices_path();
        match serde_json::to_string_pretty(devices) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    warn!(path = %path.display(), error = %e, "failed to write device registry");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize device registry"),
        }
    }

    fn load_recordings(&self, address: &DeviceAddress) -> Vec<RecordingMetadata> {
        load_json_list(&self.recordings_meta_path(address))
    }
}

/// Reads a JSON array file, treating absence or corruption as empty.
fn load_json_list<T: for<'de> Deserialize<'de>>(path: &Path) -> Vec<T> {
    if !path.exists() {
        return Vec::new();
    }
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(list) => list,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse stored list");
                Vec::new()
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read stored list");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressType;

    fn address() -> DeviceAddress {
        DeviceAddress::parse("aa:bb:cc:dd:ee:ff").unwrap()
    }

    fn record() -> DeviceRecord {
        let mut target = Target::new(address(), AddressType::BrEdr);
        target.name = Some("Speaker".to_string());
        target.rssi = Some(-52);
        DeviceRecord::snapshot(&target)
    }

    #[test]
    fn first_sight_creates_one_record_and_device_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::new(dir.path());

        registry.upsert(record());

        let devices = registry.devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].connection_history.len(), 1);

        let device_dir = dir.path().join("extracted_data").join("aa:bb:cc:dd:ee:ff");
        for subdir in DEVICE_SUBDIRS {
            assert!(device_dir.join(subdir).is_dir(), "missing {subdir}");
        }
    }

    #[test]
    fn upsert_preserves_history_and_overwrites_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::new(dir.path());

        registry.upsert(record());

        let mut updated = record();
        updated.name = Some("Renamed".to_string());
        updated.rssi = Some(-70);
        registry.upsert(updated);

        let devices = registry.devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name.as_deref(), Some("Renamed"));
        assert_eq!(devices[0].rssi, Some(-70));
        assert_eq!(devices[0].connection_history.len(), 2);
    }

    #[test]
    fn history_is_bounded_to_the_ten_newest_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::new(dir.path());

        for _ in 0..15 {
            registry.upsert(record());
        }

        let stored = registry.device(&address()).unwrap();
        assert_eq!(stored.connection_history.len(), MAX_HISTORY);
        let mut sorted = stored.connection_history.clone();
        sorted.sort();
        assert_eq!(sorted, stored.connection_history, "history out of order");
    }

    #[test]
    fn history_never_exceeds_the_bound_mid_run() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::new(dir.path());

        for i in 1..=15 {
            registry.upsert(record());
            let len = registry.device(&address()).unwrap().connection_history.len();
            assert_eq!(len, i.min(MAX_HISTORY));
        }
    }

    #[test]
    fn corrupt_registry_file_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::new(dir.path());
        std::fs::write(registry.devices_path(), "not json at all").unwrap();

        assert!(registry.devices().is_empty());

        // And the next upsert rewrites it cleanly.
        registry.upsert(record());
        assert_eq!(registry.devices().len(), 1);
    }

    #[test]
    fn recordings_append_without_bound() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::new(dir.path());
        registry.upsert(record());

        for i in 0..12 {
            registry.append_recording(
                &address(),
                RecordingMetadata {
                    filename: format!("capture_{i}.wav"),
                    path: format!("recordings/capture_{i}.wav"),
                    timestamp: now_string(),
                    size_bytes: 176_400,
                    duration_seconds: 1.0,
                },
            );
        }

        let recordings = registry.recordings(&address());
        assert_eq!(recordings.len(), 12);
        assert_eq!(recordings[0].filename, "capture_0.wav");
        assert_eq!(recordings[11].filename, "capture_11.wav");
    }

    #[test]
    fn registry_file_format_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::new(dir.path());
        registry.upsert(record());

        let json = std::fs::read_to_string(registry.devices_path()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let entry = &parsed[0];
        assert_eq!(entry["address"], "aa:bb:cc:dd:ee:ff");
        assert_eq!(entry["type"], "BR_EDR");
        assert!(entry["last_seen"].is_string());
        assert!(entry["connection_history"].is_array());
    }
}
