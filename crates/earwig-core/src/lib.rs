//! # earwig-core
//!
//! Core logic for earwig, a Bluetooth audio-capture assessment tool built
//! around the BlueZ no-confirmation pairing weakness. Intended for
//! authorized security testing of devices you own or have permission to
//! assess.
//!
//! The workflow: validate a target address, drive the local controller
//! through a `NoInputNoOutput` pairing attempt, connect and introspect the
//! target, persist what was learned, and optionally capture audio from the
//! device microphone over PulseAudio.
//!
//! ## Architecture
//!
//! - [`address`] - address validation/canonicalization and addressing modes
//! - [`device`] - the per-run working target
//! - [`command`] - the external-tool runner boundary (all free-text parsing
//!   of tool output stays behind it)
//! - [`pairing`] - the no-confirmation pairing attempt and its three-way
//!   outcome classification
//! - [`connection`] - discovery, connection, service introspection, retry
//! - [`registry`] - persisted device records and capture metadata
//! - [`recording`] - capture sessions over the audio subsystem
//! - [`config`] - environment resolved once at startup
//! - [`error`] - unified error type

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod address;
pub mod command;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod pairing;
pub mod recording;
pub mod registry;

// Re-export primary types for convenience
pub use address::{AddressType, DeviceAddress};
pub use command::{CommandOutput, CommandRunner, SystemRunner};
pub use config::{Config, ToolPaths, REQUIRED_TOOLS};
pub use connection::{ConnectionManager, RetryPolicy};
pub use device::{ServiceRecord, Target};
pub use error::{Error, Result};
pub use pairing::{IoCapability, PairingAgent, PairingOutcome};
pub use recording::{AudioSubsystem, PulseAudio, RecordingController};
pub use registry::{DeviceRecord, DeviceRegistry, RecordingMetadata};
