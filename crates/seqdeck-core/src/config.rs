//! Configuration file support.
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/seqdeck/config.toml`
//! - macOS: `~/Library/Application Support/seqdeck/config.toml`
//! - Windows: `%APPDATA%\seqdeck\config.toml`
//!
//! It is read once at startup.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::keys::KeyConfig;
use crate::screenset::GridLayout;
use crate::timing::{clamp_bpm, DEFAULT_BPM, DEFAULT_PPQN};

type Result<T> = std::result::Result<T, ConfigError>;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub keys: KeyConfig,
    pub osc: OscConfig,
    pub jack: JackConfig,
    pub midi: MidiConfig,
}

impl Config {
    /// Load configuration from a file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the default config file location
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Err(ConfigError::Config(format!("Config file not found at {:?}", path)))
        }
    }

    /// Load `path` if given, else the default location; a missing default
    /// file yields the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => match Self::config_path() {
                Ok(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "seqdeck") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Err(ConfigError::Config("Could not determine config directory".to_string()))
        }
    }

    /// Write a commented default config file to `path`.
    pub fn create_default_config_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG)?;
        Ok(())
    }
}

const DEFAULT_CONFIG: &str = r#"# seqdeck configuration file

[engine]
# Initial tempo (1-600)
bpm = 120.0

# Pulses per quarter note
ppqn = 192

# Grid shape of one screen set and number of screen sets
rows = 4
columns = 8
screen_sets = 32

# Return to the loop start when the transport stops
looping = false

[keys]
# One key per slot of the active screen set, column by column
sequence_keys = "1qaz2wsx3edc4rfv5tgb6yhn7ujm8ik,"

# One key per screen set
group_keys = "!QAZ@WSX#EDC$RFV%TGB^YHN&UJM*IK<"

bpm_step = 1

[keys.control]
start = "space"
stop = "escape"
bpm_up = "'"
bpm_down = ";"
screen_set_up = "]"
screen_set_down = "["
replace = "ctrl_l"
queue = "ctrl_r"
keep_queue = "\\"
snapshot_1 = "alt_l"
snapshot_2 = "alt_r"

[osc]
# UDP port for remote control (0 disables)
port = 7000

[jack]
# Follow the JACK transport
transport = false
client_name = "seqdeck"

[midi]
# ALSA input device name (optional)
# input = "Launchkey"

# Open a JACK MIDI input port
jack_input = false
"#;

/// `[engine]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bpm: f64,
    pub ppqn: u32,
    pub rows: usize,
    pub columns: usize,
    pub screen_sets: usize,
    pub looping: bool,
    /// Capacity of the status event channel.
    pub status_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let layout = GridLayout::default();
        Self {
            bpm: DEFAULT_BPM,
            ppqn: DEFAULT_PPQN,
            rows: layout.rows,
            columns: layout.columns,
            screen_sets: layout.screen_sets,
            looping: false,
            status_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn layout(&self) -> GridLayout {
        GridLayout {
            rows: self.rows.max(1),
            columns: self.columns.max(1),
            screen_sets: self.screen_sets.max(1),
        }
    }

    pub fn bpm(&self) -> f64 {
        clamp_bpm(self.bpm)
    }
}

/// `[osc]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OscConfig {
    pub port: u16,
}

impl Default for OscConfig {
    fn default() -> Self {
        Self { port: 7000 }
    }
}

/// `[jack]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JackConfig {
    pub transport: bool,
    pub client_name: String,
}

impl Default for JackConfig {
    fn default() -> Self {
        Self {
            transport: false,
            client_name: "seqdeck".to_string(),
        }
    }
}

/// `[midi]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    pub input: Option<String>,
    pub jack_input: bool,
}
