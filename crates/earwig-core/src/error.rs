//! Unified error types for the earwig core library.
//!
//! One enum covers every failure mode the workflow can hit. Two design rules
//! shape it:
//!
//! - An authentication rejection from the target is **not** an error. It is
//!   the expected signal that a device resists the bypass and is reported as
//!   [`PairingOutcome::Rejected`](crate::pairing::PairingOutcome) instead.
//! - Tool failures always carry the raw captured output, because the only
//!   diagnostic a human-readable tool gives you is its text.

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all earwig operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The supplied string is not a colon-separated Bluetooth address.
    #[error("'{0}' is not a valid Bluetooth address (expected XX:XX:XX:XX:XX:XX)")]
    InvalidAddress(String),

    /// The supplied value names no known address type.
    #[error("'{0}' is not a valid address type (expected BR_EDR, LE_PUBLIC or LE_RANDOM, or 0-2)")]
    InvalidAddressType(String),

    /// An external tool failed or produced unexpected output.
    ///
    /// Carries the full command line and the captured stdout so the operator
    /// can see what the tool actually said.
    #[error("command '{command}' failed:\n{output}")]
    CommandFailed {
        /// The command line that was executed.
        command: String,
        /// Captured stdout of the failed invocation.
        output: String,
    },

    /// The target refused or dropped the connection attempt.
    #[error("failed to connect to {address}")]
    ConnectionFailed {
        /// Canonical address of the target.
        address: String,
        /// Captured tool output for troubleshooting.
        output: String,
    },

    /// The audio capture session could not be started or stopped.
    #[error("audio capture failed: {0}")]
    CaptureFailed(String),

    /// A registry read or write failed.
    ///
    /// The registry itself logs and swallows these; the variant exists for
    /// storage-path resolution at startup.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The configuration file exists but could not be parsed.
    #[error("failed to parse configuration at {}: {message}", .path.display())]
    ConfigParse {
        /// Path of the offending file.
        path: PathBuf,
        /// Parser diagnostic.
        message: String,
    },

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for earwig operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns `true` if retrying the same operation can reasonably succeed.
    ///
    /// Only transient connection failures qualify; malformed input and tool
    /// breakage never do.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. })
    }

    /// Returns `true` for validation errors that must fail fast, before any
    /// external command is issued.
    #[inline]
    #[must_use]
    pub fn is_fatal_input(&self) -> bool {
        matches!(self, Self::InvalidAddress(_) | Self::InvalidAddressType(_))
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidAddress(_) => "INVALID_ADDRESS",
            Self::InvalidAddressType(_) => "INVALID_ADDRESS_TYPE",
            Self::CommandFailed { .. } => "COMMAND_FAILED",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::CaptureFailed(_) => "CAPTURE_FAILED",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::ConfigParse { .. } => "CONFIG_PARSE_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failures_are_retryable() {
        let err = Error::ConnectionFailed {
            address: "aa:bb:cc:dd:ee:ff".into(),
            output: "Failed to connect: org.bluez.Error.Failed".into(),
        };
        assert!(err.is_retryable());
        assert!(!err.is_fatal_input());
    }

    #[test]
    fn invalid_address_is_fatal_and_not_retryable() {
        let err = Error::InvalidAddress("nonsense".into());
        assert!(err.is_fatal_input());
        assert!(!err.is_retryable());
    }

    #[test]
    fn command_failure_keeps_raw_output() {
        let err = Error::CommandFailed {
            command: "btmgmt pair -c 3 -t 0 aa:bb:cc:dd:ee:ff".into(),
            output: "pairing failed, status 0x0e".into(),
        };
        assert!(err.to_string().contains("status 0x0e"));
        assert_eq!(err.error_code(), "COMMAND_FAILED");
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
