// src/config/model.rs

use serde::Deserialize;
use thiserror::Error;

/// Raw top-level TOML document.
#[derive(Debug, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub logging: RawLogging,
    pub service: RawService,
    #[serde(default)]
    pub memory: RawMemory,
    #[serde(default)]
    pub target: Option<RawTarget>,
}

/// Mirror of the `[logging]` table
#[derive(Debug, Default, Deserialize)]
pub struct RawLogging {
    #[serde(default)]            pub enable: bool,
    #[serde(default)]            pub file:   Option<String>,
    #[serde(default = "default_level")] pub level: String,
}
fn default_level() -> String { "INFO".into() }

/// Mirror of the `[service]` table — `name` and `binary` are mandatory.
#[derive(Debug, Deserialize)]
pub struct RawService {
    pub name:           String,
    #[serde(default)]
    pub display_name:   Option<String>,
    pub binary:         String,
    #[serde(default)]
    pub endpoint:       String,
    #[serde(default = "default_load_method")]
    pub load_method:    String,
    #[serde(default = "default_io_method")]
    pub io_method:      String,
    /// humantime string, e.g. `"10s"`
    #[serde(default)]
    pub status_timeout: Option<String>,
    #[serde(default)]
    pub poll_interval:  Option<String>,
    #[serde(default)]
    pub shared_memory:  Option<RawSharedMemory>,
}
fn default_load_method() -> String { "normal".into() }
fn default_io_method() -> String { "control".into() }

/// Mirror of `[service.shared_memory]`
#[derive(Debug, Default, Deserialize)]
pub struct RawSharedMemory {
    #[serde(default)] pub process_id:      u32,
    #[serde(default)] pub process_address: u64,
    #[serde(default)] pub first_event:     String,
    #[serde(default)] pub second_event:    String,
}

/// Mirror of `[memory]`
#[derive(Debug, Default, Deserialize)]
pub struct RawMemory {
    #[serde(default)]
    pub scan_block_size: Option<u64>,
}

/// Mirror of `[target]`
#[derive(Debug, Deserialize)]
pub struct RawTarget {
    #[serde(default)]
    pub process_id:     Option<u64>,
    #[serde(default = "default_unload")]
    pub unload_on_exit: bool,
    #[serde(default)]
    pub signatures:     Vec<RawSignature>,
}
fn default_unload() -> bool { true }

/// One `[[target.signatures]]` entry
#[derive(Debug, Deserialize)]
pub struct RawSignature {
    pub name:    String,
    pub pattern: String,
    #[serde(default)]
    pub start:   Option<u64>,
    #[serde(default)]
    pub size:    Option<u64>,
}

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required field '{0}' is missing or empty")]
    MissingField(&'static str),

    #[error("invalid load method '{0}'")]
    InvalidLoadMethod(String),

    #[error("invalid I/O method '{0}'")]
    InvalidIoMethod(String),

    #[error("I/O method '{0}' has no transport in this build")]
    UnsupportedIoMethod(crate::config::types::IoMethod),

    #[error("invalid duration '{0}': {1}")]
    InvalidDuration(String, #[source] humantime::DurationError),

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
