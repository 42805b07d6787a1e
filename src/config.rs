//! Configuration file handling

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::warn;
use trcc_core::{DeviceSignature, ProtocolVariant, SessionOptions, StreamPolicy};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub timing: TimingConfig,
    pub media: MediaConfig,
}

impl Config {
    /// Get the config file path for this platform
    pub fn path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "trcc").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load config from file, or create default if it doesn't exist
    pub fn load_or_create() -> Result<Self, Box<dyn Error>> {
        let path = Self::path().ok_or("could not determine config directory")?;

        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let config = Config::default();
            config.save_with_header()?;
            println!("created default config at {}", path.display());
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<(), Box<dyn Error>> {
        self.write(toml::to_string_pretty(self)?)
    }

    /// Save config with header comments for new files
    pub fn save_with_header(&self) -> Result<(), Box<dyn Error>> {
        let header = r#"# trcc configuration file
# durations accept humantime strings, ie "250ms" or "1s"

"#;
        let contents = toml::to_string_pretty(self)?;
        self.write(format!("{header}{contents}"))
    }

    fn write(&self, contents: String) -> Result<(), Box<dyn Error>> {
        let path = Self::path().ok_or("could not determine config directory")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(())
    }

    /// Session tunables for a dialect
    pub fn session_options(&self, variant: ProtocolVariant) -> SessionOptions {
        let timing = &self.timing;
        SessionOptions {
            handshake_timeout: timing
                .handshake_timeout
                .filter(|_| variant.requires_handshake()),
            stream: StreamPolicy {
                ack_timeout: timing.ack_timeout,
                flow_control_timeout: timing.flow_control_timeout,
                max_attempts: timing.max_attempts.max(1),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default device as `VID:PID`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl GeneralConfig {
    /// Parsed default device. An unreadable value is ignored with a warning.
    pub fn device(&self) -> Option<DeviceSignature> {
        let raw = self.device.as_deref()?;
        raw.parse()
            .inspect_err(|e| warn!("ignoring configured device: {e}"))
            .ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Handshake reply wait, dialect default when unset
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub handshake_timeout: Option<Duration>,
    /// Fixed frame acknowledgement wait
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,
    /// Flow-control signal wait between image blocks
    #[serde(with = "humantime_serde")]
    pub flow_control_timeout: Duration,
    /// Attempts per fixed frame, including the first
    pub max_attempts: u32,
    /// Frames buffered ahead of the device
    pub queue_depth: usize,
    /// Delay between animation frames
    #[serde(with = "humantime_serde")]
    pub frame_interval: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        let stream = StreamPolicy::default();
        Self {
            handshake_timeout: None,
            ack_timeout: stream.ack_timeout,
            flow_control_timeout: stream.flow_control_timeout,
            max_attempts: stream.max_attempts,
            queue_depth: 4,
            frame_interval: Duration::from_millis(62),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Background color for transparent images (hex)
    pub background_color: String,
    /// Use nearest neighbor interpolation
    pub use_nearest_neighbor: bool,
    /// Clockwise rotation in degrees, rounded down to a quarter turn
    pub rotation: u32,
    /// Brightness percentage, 100 is unchanged
    pub brightness: u8,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            background_color: "#000000".into(),
            use_nearest_neighbor: false,
            rotation: 0,
            brightness: 100,
        }
    }
}
