//! emudbg Common Library
//!
//! Shared error types, configuration, and keyboard lookup tables used by
//! `emudbg-core`, `emudbg-daemon`, and `emudbg-cli`.

pub mod config;
pub mod error;
pub mod keycodes;

pub use config::{EndpointConfig, ServerConfig, DEFAULT_GDB_PORT, DEFAULT_QMP_PORT};
pub use error::{Error, Result};

/// emudbg version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default config directory for the standalone daemon binary.
pub fn default_config_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".emudbg")
}

/// Default config file path.
pub fn default_config_path() -> std::path::PathBuf {
    default_config_dir().join("config.toml")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
