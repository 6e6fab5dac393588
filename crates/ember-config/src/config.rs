//! Configuration structs with sensible defaults and RON persistence.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Session and transport settings.
    pub network: NetworkConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Which session variant to run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportKind {
    /// Connectionless datagrams.
    #[default]
    Udp,
    /// Connection-oriented streams with a join handshake.
    Tcp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Udp => f.write_str("udp"),
            TransportKind::Tcp => f.write_str("tcp"),
        }
    }
}

/// Session and transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address of the host to join.
    pub server_address: String,
    /// Port to host on, or of the host to join.
    pub server_port: u16,
    /// Connection slot limit (1..=254; 255 is the invalid index).
    pub max_connections: u8,
    /// Consecutive ports tried when binding.
    pub bind_attempts: u32,
    /// Session variant.
    pub transport: TransportKind,
    /// Session updates per second.
    pub tick_rate_hz: u32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Write a JSON log file next to the config in debug builds.
    pub log_to_file: bool,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 7777,
            max_connections: 8,
            bind_attempts: 8,
            transport: TransportKind::Udp,
            tick_rate_hz: 20,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: true,
        }
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Returns `Some(new_config)` if the file on disk differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Check ranges the session layer relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let network = &self.network;
        if network.max_connections == 0 || network.max_connections == u8::MAX {
            return Err(ConfigError::Invalid {
                field: "network.max_connections",
                reason: format!("{} is not in 1..=254", network.max_connections),
            });
        }
        if network.bind_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "network.bind_attempts",
                reason: "must try at least one port".to_string(),
            });
        }
        if network.tick_rate_hz == 0 || network.tick_rate_hz > 1000 {
            return Err(ConfigError::Invalid {
                field: "network.tick_rate_hz",
                reason: format!("{} is not in 1..=1000", network.tick_rate_hz),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("server_port: 7777"));
        assert!(ron_str.contains("max_connections: 8"));
        assert!(ron_str.contains("transport: Udp"));
    }

    #[test]
    fn test_missing_field_uses_default() {
        let config: Config = ron::from_str("(network: (server_port: 9000))").unwrap();
        assert_eq!(config.network.server_port, 9000);
        assert_eq!(config.network.bind_attempts, 8);
        assert_eq!(config.debug, DebugConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_transport_kind_parses() {
        let config: Config = ron::from_str("(network: (transport: Tcp))").unwrap();
        assert_eq!(config.network.transport, TransportKind::Tcp);
        assert_eq!(TransportKind::Tcp.to_string(), "tcp");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.network.server_address = "10.0.0.1".to_string();
        config.network.transport = TransportKind::Tcp;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.ron").exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());

        let mut modified = config.clone();
        modified.network.tick_rate_hz = 60;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.map(|c| c.network.tick_rate_hz), Some(60));
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.ron"), "{{not valid}}").unwrap();
        assert!(matches!(
            Config::load_or_create(dir.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_validate_ranges() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.network.max_connections = 255;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "network.max_connections",
                ..
            })
        ));

        let mut config = Config::default();
        config.network.tick_rate_hz = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.network.bind_attempts = 0;
        assert!(config.validate().is_err());
    }
}
