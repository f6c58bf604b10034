//! End-to-end workflow tests over a scripted command runner.
//!
//! These drive the real components — pairing agent, connection manager,
//! registry, recording controller — against captured tool output, with no
//! Bluetooth controller or sound server involved.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use earwig_core::{
    AddressType, AudioSubsystem, CommandOutput, CommandRunner, ConnectionManager, DeviceAddress,
    DeviceRegistry, Error, PairingAgent, PairingOutcome, RecordingController, Result, RetryPolicy,
    Target, ToolPaths,
};
use earwig_core::recording::CaptureSession;

/// Replays captured tool outputs in order and records each command line.
#[derive(Default)]
struct ScriptedRunner {
    outputs: Mutex<VecDeque<CommandOutput>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn push(&self, stdout: &str, success: bool) {
        self.outputs.lock().unwrap().push_back(CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            success,
        });
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn execute(&self, program: &Path, args: &[&str]) -> Result<CommandOutput> {
        let mut line = program.display().to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.calls.lock().unwrap().push(line);
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                success: true,
            }))
    }
}

/// Audio subsystem that writes one second of reference-encoded silence.
struct SilentAudio;

struct SilentSession;

#[async_trait]
impl AudioSubsystem for SilentAudio {
    async fn prepare_card(&self, _card: &str) {}

    async fn start_capture(
        &self,
        _source: &str,
        destination: &Path,
    ) -> Result<Box<dyn CaptureSession>> {
        std::fs::write(destination, vec![0u8; 176_400])?;
        Ok(Box::new(SilentSession))
    }

    async fn play(&self, _sink: &str, _path: &Path) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl CaptureSession for SilentSession {
    async fn wait(&mut self) -> Result<()> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

fn tools() -> ToolPaths {
    ToolPaths::from_prefix(&PathBuf::from("/usr"))
}

fn prepare_controller_ok(runner: &ScriptedRunner) {
    runner.push("bondable on", true);
    runner.push("pairable on", true);
    runner.push("linksec off", true);
}

#[tokio::test]
async fn mixed_case_address_runs_the_whole_chain_canonicalized() {
    let address = DeviceAddress::parse("AA:bb:CC:dd:EE:ff").unwrap();
    assert_eq!(address.as_str(), "aa:bb:cc:dd:ee:ff");

    let runner = Arc::new(ScriptedRunner::default());
    prepare_controller_ok(&runner);
    runner.push("Paired with aa:bb:cc:dd:ee:ff", true);

    let agent = PairingAgent::new(Arc::clone(&runner) as Arc<dyn CommandRunner>, tools());
    let target = Target::new(address.clone(), AddressType::BrEdr);
    let outcome = agent.pair(&target).await.unwrap();
    assert_eq!(outcome, PairingOutcome::Paired);

    // Every issued command carries the canonical lowercase form.
    let pair_call = runner.calls().last().unwrap().clone();
    assert!(pair_call.ends_with("pair -c 3 -t 0 aa:bb:cc:dd:ee:ff"));
}

#[tokio::test]
async fn authentication_rejection_is_reported_not_raised() {
    let runner = Arc::new(ScriptedRunner::default());
    prepare_controller_ok(&runner);
    runner.push(
        "Pairing failed with status 0x05 (Authentication Failed)",
        false,
    );

    let agent = PairingAgent::new(Arc::clone(&runner) as Arc<dyn CommandRunner>, tools());
    let target = Target::new(
        DeviceAddress::parse("aa:bb:cc:dd:ee:ff").unwrap(),
        AddressType::BrEdr,
    );

    let outcome = agent.pair(&target).await.unwrap();
    assert_eq!(outcome, PairingOutcome::Rejected);
    assert!(!outcome.is_paired());
}

#[tokio::test]
async fn already_paired_response_counts_as_paired() {
    let runner = Arc::new(ScriptedRunner::default());
    prepare_controller_ok(&runner);
    runner.push("Already Paired", true);

    let agent = PairingAgent::new(Arc::clone(&runner) as Arc<dyn CommandRunner>, tools());
    let target = Target::new(
        DeviceAddress::parse("aa:bb:cc:dd:ee:ff").unwrap(),
        AddressType::BrEdr,
    );

    let outcome = agent.pair(&target).await.unwrap();
    assert_eq!(outcome, PairingOutcome::Paired);
}

#[tokio::test]
async fn pair_connect_record_persists_device_and_capture_metadata() {
    let data_dir = tempfile::tempdir().unwrap();
    let registry = DeviceRegistry::new(data_dir.path());
    let runner = Arc::new(ScriptedRunner::default());

    // Pairing.
    prepare_controller_ok(&runner);
    runner.push("Paired with aa:bb:cc:dd:ee:ff", true);
    // Connection: refresh scan, connect, info.
    runner.push(
        "[NEW] Device AA:BB:CC:DD:EE:FF Kitchen Speaker RSSI: -48\n",
        true,
    );
    runner.push("Connection successful", true);
    runner.push(
        "\tUUID: 0000110b-0000-1000-8000-00805f9b34fb (Audio Sink)\n",
        true,
    );

    let shared: Arc<dyn CommandRunner> = runner.clone();
    let agent = PairingAgent::new(Arc::clone(&shared), tools());
    let manager = ConnectionManager::new(
        Arc::clone(&shared),
        tools(),
        registry.clone(),
        RetryPolicy::default(),
    );

    let mut target = Target::new(
        DeviceAddress::parse("aa:bb:cc:dd:ee:ff").unwrap(),
        AddressType::BrEdr,
    );

    assert!(agent.pair(&target).await.unwrap().is_paired());
    manager.connect(&mut target).await.unwrap();

    let record = registry.device(&target.address).unwrap();
    assert_eq!(record.name.as_deref(), Some("Kitchen Speaker"));
    assert_eq!(record.rssi, Some(-48));
    assert_eq!(record.services.len(), 1);
    assert_eq!(record.connection_history.len(), 1);

    // Capture over the fake audio stack.
    let controller = RecordingController::new(
        Arc::new(SilentAudio),
        registry.clone(),
        data_dir.path().join("recordings"),
    );
    let cancel = Notify::new();
    let metadata = controller
        .record(&target, Some("probe.wav".to_string()), &cancel)
        .await
        .unwrap();

    assert_eq!(metadata.size_bytes, 176_400);
    assert!((metadata.duration_seconds - 1.0).abs() < f64::EPSILON);

    let recordings = registry.recordings(&target.address);
    assert_eq!(recordings.len(), 1);
    assert_eq!(recordings[0].filename, "probe.wav");
}

#[tokio::test]
async fn unexpected_pairing_failure_surfaces_the_tool_output() {
    let runner = Arc::new(ScriptedRunner::default());
    prepare_controller_ok(&runner);
    runner.push("command failed, status 0x10 (Connection Refused)", false);

    let agent = PairingAgent::new(Arc::clone(&runner) as Arc<dyn CommandRunner>, tools());
    let target = Target::new(
        DeviceAddress::parse("aa:bb:cc:dd:ee:ff").unwrap(),
        AddressType::BrEdr,
    );

    match agent.pair(&target).await.unwrap_err() {
        Error::CommandFailed { output, .. } => {
            assert!(output.contains("status 0x10"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
