//! Configuration file support for uartupdate.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (UARTUPDATE_*)
//! 3. Local config file (./uartupdate.toml or ./uartupdate_ports.toml)
//! 4. Global config file (~/.config/uartupdate/config.toml)

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uartupdate::Timeouts;

/// Local ports file written after a successful scan.
const PORTS_FILE: &str = "uartupdate_ports.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// Protocol settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Frame trailer width ("16" or "32").
    pub crc: Option<String>,
    /// Response bound for ordinary commands, in seconds.
    pub command_timeout_secs: Option<u64>,
    /// Response bound for calls and status messages, in seconds.
    pub long_timeout_secs: Option<u64>,
}

impl LinkConfig {
    /// Timeouts with the configured overrides applied.
    pub fn timeouts(&self) -> Timeouts {
        let mut timeouts = Timeouts::default();
        if let Some(secs) = self.command_timeout_secs {
            timeouts = timeouts.with_command(Duration::from_secs(secs));
        }
        if let Some(secs) = self.long_timeout_secs {
            timeouts = timeouts.with_long(Duration::from_secs(secs));
        }
        timeouts
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Protocol configuration.
    #[serde(default)]
    pub link: LinkConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                if let Some(global_config) = Self::load_from_file(&global_path) {
                    debug!("Loaded global config from {}", global_path.display());
                    config.merge(global_config);
                }
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new("uartupdate.toml")) {
            debug!("Loaded local config from uartupdate.toml");
            config.merge(local_config);
        }

        // Remembered port wins over both
        if let Some(ports_config) = Self::load_ports_config() {
            config.merge_port(ports_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Load the remembered port from uartupdate_ports.toml.
    fn load_ports_config() -> Option<PortConfig> {
        let local_path = Path::new(PORTS_FILE);
        if local_path.exists() {
            if let Ok(content) = fs::read_to_string(local_path) {
                if let Ok(config) = toml::from_str(&content) {
                    debug!("Loaded ports config from {PORTS_FILE}");
                    return Some(config);
                }
            }
        }

        None
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "uartupdate").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    fn merge_port(&mut self, other: PortConfig) {
        if other.connection.serial.is_some() {
            self.port.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.port.connection.baud = other.connection.baud;
        }
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        self.merge_port(other.port);

        if other.link.crc.is_some() {
            self.link.crc = other.link.crc;
        }
        if other.link.command_timeout_secs.is_some() {
            self.link.command_timeout_secs = other.link.command_timeout_secs;
        }
        if other.link.long_timeout_secs.is_some() {
            self.link.long_timeout_secs = other.link.long_timeout_secs;
        }
    }

    /// Remember a discovered serial port in `dir`/uartupdate_ports.toml.
    pub fn save_port(&mut self, serial: &str, dir: &Path) -> anyhow::Result<PathBuf> {
        self.port.connection.serial = Some(serial.to_string());

        let port_config = PortConfig {
            connection: ConnectionConfig {
                serial: Some(serial.to_string()),
                baud: None,
            },
        };

        let path = dir.join(PORTS_FILE);
        let content = toml::to_string_pretty(&port_config)?;
        fs::write(&path, content)?;
        info!("Saved port configuration to {}", path.display());

        Ok(path)
    }
}
