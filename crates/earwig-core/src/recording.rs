//! Audio capture sessions against a connected target.
//!
//! Once a device is bonded and connected, PulseAudio exposes it as a card
//! (`bluez_card.<ADDR>`) whose input (`bluez_input.<ADDR>.0`) carries the
//! device microphone. [`RecordingController`] coordinates one capture
//! session over that source and records its metadata; the actual audio I/O
//! lives behind the [`AudioSubsystem`] seam so tests can drive the
//! controller without a sound server.
//!
//! Cancellation is cooperative and is a *normal* termination: an operator
//! stopping the capture still produces a valid, partially-written file that
//! gets its metadata recorded like any other.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::address::DeviceAddress;
use crate::command::{run, CommandRunner};
use crate::config::ToolPaths;
use crate::device::Target;
use crate::error::{Error, Result};
use crate::registry::{now_string, DeviceRegistry, RecordingMetadata};

/// Reference encoding assumed by the duration estimate.
const SAMPLE_RATE: u32 = 44_100;
/// 16-bit samples.
const BYTES_PER_SAMPLE: u32 = 2;
/// Stereo.
const CHANNELS: u32 = 2;

/// Higher-quality card profile tried before capturing.
const PREFERRED_CARD_PROFILE: &str = "headset-head-unit-msbc";

/// Estimates a capture's duration in seconds from its byte size, rounded to
/// one decimal place.
///
/// Assumes the reference encoding (44.1 kHz, 16-bit, stereo) regardless of
/// the actual capture parameters; the container is never parsed, so the
/// estimate is wrong for other encodings. Documented approximation.
#[must_use]
pub fn estimate_duration_secs(size_bytes: u64) -> f64 {
    let bytes_per_second = f64::from(SAMPLE_RATE * BYTES_PER_SAMPLE * CHANNELS);
    #[allow(clippy::cast_precision_loss)]
    let seconds = size_bytes as f64 / bytes_per_second;
    (seconds * 10.0).round() / 10.0
}

/// PulseAudio card name of a bonded device.
#[must_use]
pub fn card_name(address: &DeviceAddress) -> String {
    format!("bluez_card.{}", address.pulse_suffix())
}

/// PulseAudio source name carrying a bonded device's microphone.
#[must_use]
pub fn source_name(address: &DeviceAddress) -> String {
    format!("bluez_input.{}.0", address.pulse_suffix())
}

/// Default capture file name: address plus a second-resolution timestamp.
#[must_use]
pub fn default_capture_name(address: &DeviceAddress) -> String {
    format!(
        "{}_{}.wav",
        address.pulse_suffix(),
        Local::now().format("%Y%m%d_%H%M%S")
    )
}

/// One in-flight capture.
#[async_trait]
pub trait CaptureSession: Send {
    /// Waits until the capture ends on its own.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaptureFailed`] when the capture terminates
    /// abnormally.
    async fn wait(&mut self) -> Result<()>;

    /// Terminates the capture. The file written so far stays valid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaptureFailed`] when the session cannot be reaped.
    async fn stop(&mut self) -> Result<()>;
}

/// Audio stack collaborator: capture and playback by object name and path.
#[async_trait]
pub trait AudioSubsystem: Send + Sync {
    /// Best-effort preparation of the device card before capturing.
    async fn prepare_card(&self, card: &str);

    /// Starts capturing `source` into `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaptureFailed`] when the capture cannot start.
    async fn start_capture(
        &self,
        source: &str,
        destination: &Path,
    ) -> Result<Box<dyn CaptureSession>>;

    /// Plays a file on the given sink, blocking until playback ends.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is missing or the player fails.
    async fn play(&self, sink: &str, path: &Path) -> Result<()>;
}

/// Real audio subsystem over `pactl`/`parecord`/`paplay`.
pub struct PulseAudio {
    runner: Arc<dyn CommandRunner>,
    tools: ToolPaths,
}

impl PulseAudio {
    /// Creates the subsystem using the given runner and tool paths.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, tools: ToolPaths) -> Self {
        Self { runner, tools }
    }
}

#[async_trait]
impl AudioSubsystem for PulseAudio {
    async fn prepare_card(&self, card: &str) {
        // Not every headset exposes the mSBC profile; capture still works on
        // the default one, so a failure here only gets logged.
        let result = run(
            self.runner.as_ref(),
            &self.tools.pactl,
            &["set-card-profile", card, PREFERRED_CARD_PROFILE],
        )
        .await;
        if let Err(e) = result {
            warn!(card, error = %e, "could not switch card profile");
        }
    }

    async fn start_capture(
        &self,
        source: &str,
        destination: &Path,
    ) -> Result<Box<dyn CaptureSession>> {
        let destination_str = destination.display().to_string();
        let child = Command::new(&self.tools.parecord)
            .args(["-d", source, &destination_str])
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::CaptureFailed(format!("failed to spawn parecord: {e}")))?;

        debug!(source, destination = %destination.display(), "capture started");
        Ok(Box::new(ParecordSession { child }))
    }

    async fn play(&self, sink: &str, path: &Path) -> Result<()> {
        tokio::fs::metadata(path).await?;
        let path_str = path.display().to_string();
        run(
            self.runner.as_ref(),
            &self.tools.paplay,
            &["-d", sink, &path_str],
        )
        .await?;
        Ok(())
    }
}

/// A running `parecord` process.
struct ParecordSession {
    child: Child,
}

#[async_trait]
impl CaptureSession for ParecordSession {
    async fn wait(&mut self) -> Result<()> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| Error::CaptureFailed(format!("failed to wait for parecord: {e}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::CaptureFailed(format!(
                "parecord exited with {status}"
            )))
        }
    }

    async fn stop(&mut self) -> Result<()> {
        if let Err(e) = self.child.start_kill() {
            // Already exited; reaping below is all that is left.
            debug!(error = %e, "parecord already gone");
        }
        self.child
            .wait()
            .await
            .map_err(|e| Error::CaptureFailed(format!("failed to reap parecord: {e}")))?;
        Ok(())
    }
}

/// Coordinates one capture session and records its metadata.
pub struct RecordingController {
    audio: Arc<dyn AudioSubsystem>,
    registry: DeviceRegistry,
    recordings_dir: PathBuf,
}

impl RecordingController {
    /// Creates a controller writing captures under `recordings_dir`.
    #[must_use]
    pub fn new(
        audio: Arc<dyn AudioSubsystem>,
        registry: DeviceRegistry,
        recordings_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            audio,
            registry,
            recordings_dir: recordings_dir.into(),
        }
    }

    /// Captures audio from `target` until the capture ends or `cancel`
    /// fires, then records the session metadata.
    ///
    /// Cancellation is a normal termination: the partially written file is
    /// valid output and gets its metadata appended like a full capture.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaptureFailed`] when the capture cannot start or
    /// ends abnormally, [`Error::Io`] when the finished file cannot be
    /// inspected.
    pub async fn record(
        &self,
        target: &Target,
        outfile: Option<String>,
        cancel: &Notify,
    ) -> Result<RecordingMetadata> {
        let card = card_name(&target.address);
        let source = source_name(&target.address);
        self.audio.prepare_card(&card).await;

        tokio::fs::create_dir_all(&self.recordings_dir).await?;
        let filename = outfile.unwrap_or_else(|| default_capture_name(&target.address));
        let path = self.recordings_dir.join(&filename);

        info!(source, path = %path.display(), "recording");
        let mut session = self.audio.start_capture(&source, &path).await?;

        let cancelled = tokio::select! {
            result = session.wait() => {
                result?;
                false
            }
            () = cancel.notified() => true,
        };
        if cancelled {
            info!("capture stopped by operator");
            session.stop().await?;
        }

        let size_bytes = tokio::fs::metadata(&path).await?.len();
        let metadata = RecordingMetadata {
            filename,
            path: path.display().to_string(),
            timestamp: now_string(),
            size_bytes,
            duration_seconds: estimate_duration_secs(size_bytes),
        };
        self.registry
            .append_recording(&target.address, metadata.clone());

        info!(
            size_bytes,
            duration = metadata.duration_seconds,
            "capture finished"
        );
        Ok(metadata)
    }

    /// Plays a finished capture on the given sink.
    ///
    /// # Errors
    ///
    /// As [`AudioSubsystem::play`].
    pub async fn play(&self, sink: &str, path: &Path) -> Result<()> {
        self.audio.play(sink, path).await
    }
}
