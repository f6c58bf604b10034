//! Device discovery, connection, and service introspection.
//!
//! Everything here is parsed from `bluetoothctl`'s human-readable output, so
//! the parsing is deliberately tolerant: discovery extracts whatever
//! addresses appear, and name/RSSI enrichment is best-effort — a line that
//! does not match simply leaves the field unset.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::address::{AddressType, DeviceAddress};
use crate::command::{render_command, run, CommandRunner};
use crate::config::ToolPaths;
use crate::device::{ServiceRecord, Target};
use crate::error::{Error, Result};
use crate::registry::{DeviceRecord, DeviceRegistry};

/// Marker `bluetoothctl connect` prints when the target refuses us.
const CONNECT_FAILURE_MARKER: &str = "Failed to connect";

/// Marker identifying a service line in `bluetoothctl info` output.
const UUID_MARKER: &str = "UUID";

/// Marker identifying a signal-strength token in scan output.
const RSSI_MARKER: &str = "RSSI";

/// Short scan run before connecting, to refresh name/RSSI.
const REFRESH_SCAN_SECS: u64 = 2;

/// Candidate addresses in scan output (`Device AA:BB:CC:DD:EE:FF ...`).
static DEVICE_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Device\s+([0-9a-f]{2}(?::[0-9a-f]{2}){5})").expect("device regex is valid")
});

/// Caller-level retry policy for transient connection failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts before the last error is surfaced.
    pub attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Discovers, connects to, and introspects target devices.
pub struct ConnectionManager {
    runner: Arc<dyn CommandRunner>,
    tools: ToolPaths,
    registry: DeviceRegistry,
    retry: RetryPolicy,
}

impl ConnectionManager {
    /// Creates a manager over the given runner, tools, and registry.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        tools: ToolPaths,
        registry: DeviceRegistry,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            runner,
            tools,
            registry,
            retry,
        }
    }

    /// Runs a bounded scan and returns the candidates seen, in order of
    /// first sight, with best-effort name/RSSI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandFailed`] when the scan itself cannot run.
    pub async fn discover(&self, timeout_secs: u64) -> Result<Vec<Target>> {
        let timeout = timeout_secs.to_string();
        let output = run(
            self.runner.as_ref(),
            &self.tools.bluetoothctl,
            &["--timeout", &timeout, "scan", "on"],
        )
        .await?;

        let mut targets: Vec<Target> = Vec::new();
        for capture in DEVICE_LINE_RE.captures_iter(&output) {
            let Ok(address) = DeviceAddress::parse(&capture[1]) else {
                continue;
            };
            if targets.iter().any(|t| t.address == address) {
                continue;
            }
            let mut target = Target::new(address, AddressType::BrEdr);
            enrich_from_scan(&mut target, &output);
            targets.push(target);
        }

        info!(count = targets.len(), "discovery finished");
        Ok(targets)
    }

    /// Connects to `target`, introspects its services, and upserts the
    /// resulting snapshot into the registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailed`] (retryable) when the tool reports
    /// the explicit connection-failure marker, [`Error::CommandFailed`] for
    /// anything else unexpected.
    pub async fn connect(&self, target: &mut Target) -> Result<()> {
        // A short scan first; name and RSSI are only printed while scanning.
        let refresh = REFRESH_SCAN_SECS.to_string();
        let scan = run(
            self.runner.as_ref(),
            &self.tools.bluetoothctl,
            &["--timeout", &refresh, "scan", "on"],
        )
        .await?;
        enrich_from_scan(target, &scan);

        let args = ["connect", target.address.as_str()];
        let output = self
            .runner
            .execute(&self.tools.bluetoothctl, &args)
            .await?;
        if output.stdout.contains(CONNECT_FAILURE_MARKER) {
            return Err(Error::ConnectionFailed {
                address: target.address.to_string(),
                output: output.stdout,
            });
        }
        if !output.stderr.is_empty() || !output.success {
            return Err(Error::CommandFailed {
                command: render_command(&self.tools.bluetoothctl, &args),
                output: output.stdout,
            });
        }

        let infos = run(
            self.runner.as_ref(),
            &self.tools.bluetoothctl,
            &["info", target.address.as_str()],
        )
        .await?;
        target.services = parse_services(&infos);

        info!(
            address = %target.address,
            services = target.services.len(),
            "connected"
        );
        self.registry.upsert(DeviceRecord::snapshot(target));
        Ok(())
    }

    /// Connects with the configured retry policy.
    ///
    /// Only transient [`Error::ConnectionFailed`] results are retried, with
    /// a fixed delay between attempts; everything else fails immediately.
    /// After the last attempt the last error is surfaced.
    ///
    /// # Errors
    ///
    /// As [`connect`](Self::connect), after retries are exhausted.
    pub async fn connect_with_retry(&self, target: &mut Target) -> Result<()> {
        let attempts = self.retry.attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match self.connect(target).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    warn!(
                        address = %target.address,
                        attempt,
                        attempts,
                        "connection attempt failed"
                    );
                    last_err = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::ConnectionFailed {
            address: target.address.to_string(),
            output: String::new(),
        }))
    }

    /// Validates an address string and connects with retry.
    ///
    /// Validation happens before any external command: a malformed address
    /// fails fast with zero invocations.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidAddress`] for malformed input, otherwise as
    /// [`connect_with_retry`](Self::connect_with_retry).
    pub async fn connect_address(
        &self,
        address: &str,
        address_type: AddressType,
    ) -> Result<Target> {
        let address = DeviceAddress::parse(address)?;
        let mut target = Target::new(address, address_type);
        self.connect_with_retry(&mut target).await?;
        Ok(target)
    }

    /// Discovers candidates and connects to the first that accepts,
    /// trying them sequentially.
    ///
    /// Returns `None` when no candidate was found or none accepted.
    ///
    /// # Errors
    ///
    /// Returns an error only when discovery itself fails; per-candidate
    /// connection failures are logged and skipped.
    pub async fn auto_connect(&self, timeout_secs: u64) -> Result<Option<Target>> {
        let targets = self.discover(timeout_secs).await?;
        if targets.is_empty() {
            warn!("no devices found during scan");
            return Ok(None);
        }
        Ok(self.connect_first(targets).await)
    }

    /// Tries the given candidates in order and returns the first that
    /// accepts a connection. Per-candidate failures are logged and skipped.
    pub async fn connect_first(&self, targets: Vec<Target>) -> Option<Target> {
        for mut target in targets {
            info!(address = %target.address, "attempting connection");
            match self.connect(&mut target).await {
                Ok(()) => return Some(target),
                Err(e) => warn!(address = %target.address, error = %e, "candidate skipped"),
            }
        }
        None
    }
}

/// Best-effort name/RSSI extraction from scan output lines mentioning the
/// target. Lines look like `[CHG] Device AA:BB:CC:DD:EE:FF Some Name RSSI: -55`;
/// anything that does not match leaves the fields unset.
fn enrich_from_scan(target: &mut Target, output: &str) {
    let needle = target.address.as_str();
    for line in output.lines() {
        if !line.to_ascii_lowercase().contains(needle) {
            continue;
        }
        if !line.contains("Device") || !line.contains(RSSI_MARKER) {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() > 4 {
            let name = parts[3..parts.len() - 2].join(" ");
            if !name.is_empty() {
                target.name = Some(name);
            }
        }
        if let Some(rssi) = parts.last().and_then(|p| p.parse::<i16>().ok()) {
            target.rssi = Some(rssi);
        }
    }
}

/// Parses `bluetoothctl info` service lines: everything after the `UUID`
/// marker, with an optional parenthesized human-readable name.
fn parse_services(output: &str) -> Vec<ServiceRecord> {
    let mut services = Vec::new();
    for line in output.lines() {
        if !line.contains(UUID_MARKER) {
            continue;
        }
        let Some(rest) = line.split("UUID:").nth(1) else {
            continue;
        };
        let rest = rest.trim();
        if rest.is_empty() {
            continue;
        }
        let (uuid, name) = match rest.split_once('(') {
            Some((value, tail)) => {
                let name = tail.split(')').next().unwrap_or("").trim();
                let name = if name.is_empty() { "Unknown" } else { name };
                (value.trim().to_string(), name.to_string())
            }
            None => (rest.to_string(), "Unknown".to_string()),
        };
        services.push(ServiceRecord { uuid, name });
    }
    services
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::ScriptedRunner;
    use std::path::Path;

    const SCAN_OUTPUT: &str = "\
Discovery started
[CHG] Controller 00:11:22:33:44:55 Discovering: yes
[NEW] Device AA:BB:CC:DD:EE:FF Kitchen Speaker RSSI: -52
[NEW] Device 11:22:33:44:55:66 Earbuds RSSI: -71
[CHG] Device AA:BB:CC:DD:EE:FF Kitchen Speaker RSSI: -48
";

    const INFO_OUTPUT: &str = "\
Device aa:bb:cc:dd:ee:ff (public)
\tName: Kitchen Speaker
\tUUID: 0000110b-0000-1000-8000-00805f9b34fb (Audio Sink)
\tUUID: 0000111e-0000-1000-8000-00805f9b34fb (Handsfree)
\tUUID: 00001200-0000-1000-8000-00805f9b34fb
";

    fn manager(runner: Arc<ScriptedRunner>, registry: DeviceRegistry) -> ConnectionManager {
        ConnectionManager::new(
            runner,
            ToolPaths::from_prefix(Path::new("/usr")),
            registry,
            RetryPolicy {
                attempts: 3,
                delay: Duration::ZERO,
            },
        )
    }

    #[tokio::test]
    async fn discover_parses_candidates_with_name_and_rssi() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok(SCAN_OUTPUT);

        let targets = manager(Arc::clone(&runner), DeviceRegistry::new(dir.path()))
            .discover(5)
            .await
            .unwrap();

        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].address.as_str(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(targets[0].name.as_deref(), Some("Kitchen Speaker"));
        // The later line for the same device wins.
        assert_eq!(targets[0].rssi, Some(-48));
        assert_eq!(targets[1].address.as_str(), "11:22:33:44:55:66");
        assert_eq!(targets[1].rssi, Some(-71));
    }

    #[tokio::test]
    async fn connect_populates_services_and_upserts() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::new(dir.path());
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok(SCAN_OUTPUT);
        runner.push_ok("Connection successful");
        runner.push_ok(INFO_OUTPUT);

        let mut target = Target::new(
            DeviceAddress::parse("AA:BB:CC:DD:EE:FF").unwrap(),
            AddressType::BrEdr,
        );
        manager(Arc::clone(&runner), registry.clone())
            .connect(&mut target)
            .await
            .unwrap();

        assert_eq!(target.services.len(), 3);
        assert_eq!(target.services[0].uuid, "0000110b-0000-1000-8000-00805f9b34fb");
        assert_eq!(target.services[0].name, "Audio Sink");
        assert_eq!(target.services[2].name, "Unknown");
        assert_eq!(target.rssi, Some(-48));

        let stored = registry.device(&target.address).unwrap();
        assert_eq!(stored.services.len(), 3);
        assert_eq!(stored.connection_history.len(), 1);
    }

    #[tokio::test]
    async fn failure_marker_maps_to_retryable_connection_failed() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok("");
        runner.push_ok("Failed to connect: org.bluez.Error.Failed");

        let mut target = Target::new(
            DeviceAddress::parse("aa:bb:cc:dd:ee:ff").unwrap(),
            AddressType::BrEdr,
        );
        let err = manager(Arc::clone(&runner), DeviceRegistry::new(dir.path()))
            .connect(&mut target)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ConnectionFailed { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn retry_stops_on_first_success() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        // Attempt 1: scan, then connect refused.
        runner.push_ok("");
        runner.push_ok("Failed to connect");
        // Attempt 2: scan, connect, info — succeeds.
        runner.push_ok("");
        runner.push_ok("Connection successful");
        runner.push_ok(INFO_OUTPUT);

        let mut target = Target::new(
            DeviceAddress::parse("aa:bb:cc:dd:ee:ff").unwrap(),
            AddressType::BrEdr,
        );
        manager(Arc::clone(&runner), DeviceRegistry::new(dir.path()))
            .connect_with_retry(&mut target)
            .await
            .unwrap();

        // Two attempts issued, the third never started.
        assert_eq!(runner.call_count(), 5);
    }

    #[tokio::test]
    async fn retry_surfaces_last_error_after_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        for _ in 0..3 {
            runner.push_ok("");
            runner.push_ok("Failed to connect");
        }

        let mut target = Target::new(
            DeviceAddress::parse("aa:bb:cc:dd:ee:ff").unwrap(),
            AddressType::BrEdr,
        );
        let err = manager(Arc::clone(&runner), DeviceRegistry::new(dir.path()))
            .connect_with_retry(&mut target)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ConnectionFailed { .. }));
        assert_eq!(runner.call_count(), 6);
    }

    #[tokio::test]
    async fn malformed_address_short_circuits_with_zero_commands() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());

        let err = manager(Arc::clone(&runner), DeviceRegistry::new(dir.path()))
            .connect_address("not-an-address", AddressType::BrEdr)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidAddress(_)));
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn auto_connect_takes_the_first_accepting_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        // Discovery scan.
        runner.push_ok(SCAN_OUTPUT);
        // First candidate refuses.
        runner.push_ok("");
        runner.push_ok("Failed to connect");
        // Second candidate accepts.
        runner.push_ok("");
        runner.push_ok("Connection successful");
        runner.push_ok(INFO_OUTPUT);

        let connected = manager(Arc::clone(&runner), DeviceRegistry::new(dir.path()))
            .auto_connect(5)
            .await
            .unwrap()
            .expect("one candidate should accept");

        assert_eq!(connected.address.as_str(), "11:22:33:44:55:66");
    }
}
