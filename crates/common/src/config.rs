//! Server configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default GDB Remote Serial Protocol port.
pub const DEFAULT_GDB_PORT: u16 = 2159;

/// Default QEMU Monitor Protocol port.
pub const DEFAULT_QMP_PORT: u16 = 4444;

/// Top-level configuration consumed from an external config file or CLI flags.
///
/// Only the enable flags and ports are user-configurable; the rest (bind
/// address, backlog) are fixed and not exposed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// GDB RSP endpoint configuration.
    pub gdb: EndpointConfig,
    /// QMP endpoint configuration.
    pub qmp: EndpointConfig,
}

/// Per-endpoint enable flag and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            gdb: EndpointConfig {
                enabled: true,
                port: DEFAULT_GDB_PORT,
            },
            qmp: EndpointConfig {
                enabled: true,
                port: DEFAULT_QMP_PORT,
            },
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_standard_ports() {
        let config = ServerConfig::default();
        assert_eq!(config.gdb.port, DEFAULT_GDB_PORT);
        assert_eq!(config.qmp.port, DEFAULT_QMP_PORT);
        assert!(config.gdb.enabled);
        assert!(config.qmp.enabled);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = ServerConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: ServerConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.gdb.port, config.gdb.port);
        assert_eq!(parsed.qmp.port, config.qmp.port);
    }
}
