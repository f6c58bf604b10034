//! Application configuration.
//!
//! All environment knowledge lives here and is resolved once at startup:
//! the tool prefix (Termux installs under its own root), whether Bluetooth
//! management commands need privilege escalation, where device data and
//! recordings are stored, and the retry policy for connections. Components
//! receive the resolved values through their constructors instead of probing
//! the environment themselves.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Termux application root; its presence identifies a Termux host.
const TERMUX_ROOT: &str = "/data/data/com.termux";

/// Tool prefix inside a Termux install.
const TERMUX_PREFIX: &str = "/data/data/com.termux/files/usr";

/// External tools the workflow shells out to.
pub const REQUIRED_TOOLS: [&str; 5] = ["bluetoothctl", "btmgmt", "pactl", "parecord", "paplay"];

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Install prefix the external tools are resolved under (`<prefix>/bin`).
    pub prefix: PathBuf,

    /// Whether `bluetoothctl`/`btmgmt` must be wrapped in `sudo`.
    /// True on regular Linux hosts, false inside Termux.
    pub privileged: bool,

    /// Directory holding `devices.json` and the `extracted_data` tree.
    pub data_dir: PathBuf,

    /// Directory finished captures are written to.
    pub recordings_dir: PathBuf,

    /// Discovery scan duration in seconds.
    pub scan_timeout_secs: u64,

    /// Maximum connection attempts before surfacing the last error.
    pub connect_attempts: u32,

    /// Fixed delay between connection attempts in seconds.
    pub connect_retry_delay_secs: u64,

    /// PulseAudio sink used for playback.
    pub playback_sink: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: PathBuf::from("/usr"),
            privileged: true,
            data_dir: PathBuf::from("."),
            recordings_dir: PathBuf::from("recordings"),
            scan_timeout_secs: 5,
            connect_attempts: 3,
            connect_retry_delay_secs: 2,
            playback_sink: "alsa_output.pci-0000_00_05.0.analog-stereo".to_string(),
        }
    }
}

impl Config {
    /// Builds a configuration for the current host.
    ///
    /// Detects a Termux environment by the presence of its application root:
    /// Termux ships the tools under its own prefix, runs unprivileged, and
    /// exposes a `default` PulseAudio sink.
    #[must_use]
    pub fn detect() -> Self {
        if Path::new(TERMUX_ROOT).exists() {
            Self {
                prefix: PathBuf::from(TERMUX_PREFIX),
                privileged: false,
                playback_sink: "default".to_string(),
                ..Self::default()
            }
        } else {
            Self::default()
        }
    }

    /// Loads configuration from a TOML file, falling back to [`detect`]
    /// defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    ///
    /// [`detect`]: Self::detect
    pub fn load_or_detect(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| Error::ConfigParse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        } else {
            Ok(Self::detect())
        }
    }

    /// Saves the configuration as pretty TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default config file location.
    ///
    /// `/etc/earwig/config.toml` on Linux, the user config dir elsewhere.
    #[must_use]
    pub fn default_path() -> PathBuf {
        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/etc/earwig/config.toml")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "earwig")
                .map(|dirs| dirs.config_dir().join("config.toml"))
                .unwrap_or_else(|| PathBuf::from("earwig.toml"))
        }
    }

    /// Resolved paths of the external tools under the configured prefix.
    #[must_use]
    pub fn tools(&self) -> ToolPaths {
        ToolPaths::from_prefix(&self.prefix)
    }
}

/// Resolved absolute paths of the external tools.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    /// BlueZ interactive controller client.
    pub bluetoothctl: PathBuf,
    /// BlueZ management interface client.
    pub btmgmt: PathBuf,
    /// PulseAudio control client.
    pub pactl: PathBuf,
    /// PulseAudio recorder.
    pub parecord: PathBuf,
    /// PulseAudio playback client.
    pub paplay: PathBuf,
}

impl ToolPaths {
    /// Resolves every tool under `<prefix>/bin`.
    #[must_use]
    pub fn from_prefix(prefix: &Path) -> Self {
        let bin = prefix.join("bin");
        Self {
            bluetoothctl: bin.join("bluetoothctl"),
            btmgmt: bin.join("btmgmt"),
            pactl: bin.join("pactl"),
            parecord: bin.join("parecord"),
            paplay: bin.join("paplay"),
        }
    }

    /// Names of required tools missing from the filesystem.
    ///
    /// Used by the CLI `doctor` command and the remediation hint on fatal
    /// errors.
    #[must_use]
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("bluetoothctl", &self.bluetoothctl),
            ("btmgmt", &self.btmgmt),
            ("pactl", &self.pactl),
            ("parecord", &self.parecord),
            ("paplay", &self.paplay),
        ]
        .into_iter()
        .filter(|(_, path)| !path.exists())
        .map(|(name, _)| name)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_paths_resolve_under_prefix_bin() {
        let tools = ToolPaths::from_prefix(Path::new("/usr"));
        assert_eq!(tools.btmgmt, PathBuf::from("/usr/bin/btmgmt"));
        assert_eq!(tools.parecord, PathBuf::from("/usr/bin/parecord"));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&toml).unwrap();
        assert_eq!(back.prefix, config.prefix);
        assert_eq!(back.connect_attempts, config.connect_attempts);
    }

    #[test]
    fn partial_config_files_fill_in_defaults() {
        let config: Config = toml::from_str("scan_timeout_secs = 30").unwrap();
        assert_eq!(config.scan_timeout_secs, 30);
        assert_eq!(config.connect_attempts, Config::default().connect_attempts);
    }

    #[test]
    fn load_or_detect_without_file_uses_detection() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_detect(&dir.path().join("missing.toml")).unwrap();
        assert!(!config.prefix.as_os_str().is_empty());
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.scan_timeout_secs = 42;
        config.save(&path).unwrap();

        let back = Config::load_or_detect(&path).unwrap();
        assert_eq!(back.scan_timeout_secs, 42);
    }
}
