//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use earwig_core::{
    Config, ConnectionManager, DeviceAddress, DeviceRegistry, PairingAgent, PulseAudio,
    RecordingController, RecordingMetadata, RetryPolicy, SystemRunner,
};

/// Shared application state handed to every handler.
pub type SharedState = Arc<AppState>;

/// A capture session currently running in the background.
pub struct ActiveCapture {
    /// Identifier returned to the client on start.
    pub id: Uuid,
    /// Device the capture targets.
    pub address: DeviceAddress,
    /// Cooperative cancellation signal; firing it ends the session normally.
    pub cancel: Arc<Notify>,
    /// The running capture task, resolving to the session metadata.
    pub task: JoinHandle<earwig_core::Result<RecordingMetadata>>,
}

/// Long-lived state: resolved configuration, the registry, the command
/// runner, and the at-most-one active capture session.
pub struct AppState {
    /// Configuration resolved once at startup.
    pub config: Config,
    /// Persistent device registry.
    pub registry: DeviceRegistry,
    /// Runner all Bluetooth/audio commands go through.
    pub runner: Arc<SystemRunner>,
    /// The active capture, if any. One capture at a time.
    pub capture: Mutex<Option<ActiveCapture>>,
    started_at: Instant,
}

impl AppState {
    /// Builds the state from a resolved configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let registry = DeviceRegistry::new(config.data_dir.clone());
        let runner = Arc::new(SystemRunner::new(config.privileged));
        Self {
            config,
            registry,
            runner,
            capture: Mutex::new(None),
            started_at: Instant::now(),
        }
    }

    /// A pairing agent over the configured tools.
    #[must_use]
    pub fn pairing_agent(&self) -> PairingAgent {
        PairingAgent::new(self.runner.clone(), self.config.tools())
    }

    /// A connection manager over the configured tools and retry policy.
    #[must_use]
    pub fn connection_manager(&self) -> ConnectionManager {
        ConnectionManager::new(
            self.runner.clone(),
            self.config.tools(),
            self.registry.clone(),
            RetryPolicy {
                attempts: self.config.connect_attempts,
                delay: std::time::Duration::from_secs(self.config.connect_retry_delay_secs),
            },
        )
    }

    /// A recording controller writing into the device's own recordings
    /// directory.
    #[must_use]
    pub fn recording_controller(&self, address: &DeviceAddress) -> RecordingController {
        let audio = Arc::new(PulseAudio::new(self.runner.clone(), self.config.tools()));
        RecordingController::new(audio, self.registry.clone(), self.registry.recordings_dir(address))
    }

    /// Seconds since the server started.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
