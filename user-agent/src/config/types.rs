//! Runtime configuration types.
//!
//! These are the validated shapes the rest of the crate consumes. The raw
//! TOML mirror lives in `model.rs`; `loader.rs` converts one into the other.

use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use super::model::ConfigError;

/// How the privileged binary gets into the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMethod {
    /// Registered and started through the OS service manager.
    #[default]
    Normal,
}

/// How user mode talks to the privileged component once it is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoMethod {
    None,
    #[default]
    ControlChannel,
    SharedMemory,
}

/// Allow `"normal"` → `LoadMethod::Normal`
impl FromStr for LoadMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "normal" | "service" => Ok(LoadMethod::Normal),
            other => Err(ConfigError::InvalidLoadMethod(other.into())),
        }
    }
}

/// Allow `"control"` → `IoMethod::ControlChannel`
impl FromStr for IoMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(IoMethod::None),
            "control" | "control_channel" | "ioctl" => Ok(IoMethod::ControlChannel),
            "shared_memory" | "shared" => Ok(IoMethod::SharedMemory),
            other => Err(ConfigError::InvalidIoMethod(other.into())),
        }
    }
}

impl fmt::Display for IoMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IoMethod::None => "none",
            IoMethod::ControlChannel => "control",
            IoMethod::SharedMemory => "shared_memory",
        })
    }
}

/// Parameters for the shared-memory transport. Carried for completeness;
/// the control-channel path never reads them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedMemoryConfig {
    pub process_id: u32,
    pub process_address: u64,
    pub first_event: String,
    pub second_event: String,
}

/// Everything needed to install the privileged component and reach it.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Key in the OS service registry.
    pub name: String,
    pub display_name: String,
    /// Path to the privileged binary.
    pub binary: PathBuf,
    /// Symbolic path opened by the control channel, e.g. `\\.\MemDrv`.
    pub endpoint: String,
    pub load_method: LoadMethod,
    pub io_method: IoMethod,
    pub shared_memory: SharedMemoryConfig,
    /// Upper bound for a start/stop status transition.
    pub status_timeout: Duration,
    /// Sleep between status polls while waiting.
    pub poll_interval: Duration,
}

pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

impl ServiceConfig {
    /// Control-channel config with default timeouts.
    pub fn new(
        name: impl Into<String>,
        binary: impl Into<PathBuf>,
        endpoint: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            binary: binary.into(),
            endpoint: endpoint.into(),
            load_method: LoadMethod::Normal,
            io_method: IoMethod::ControlChannel,
            shared_memory: SharedMemoryConfig::default(),
            status_timeout: DEFAULT_STATUS_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_io_method(mut self, io_method: IoMethod) -> Self {
        self.io_method = io_method;
        self
    }

    pub fn with_timeouts(mut self, status_timeout: Duration, poll_interval: Duration) -> Self {
        self.status_timeout = status_timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// Structural checks that do not touch the OS.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingField("service.name"));
        }
        if self.io_method == IoMethod::ControlChannel && self.endpoint.trim().is_empty() {
            return Err(ConfigError::MissingField("service.endpoint"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "service.poll_interval",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

/// Mirror of the `[logging]` table after defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub enable: bool,
    pub file: Option<String>,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { enable: false, file: None, level: "INFO".into() }
    }
}

/// Remote-memory tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Regions at least this large are scanned block by block.
    pub scan_block_size: u64,
}

/// Largest single transfer the driver accepts is `i32::MAX`; blocks are an
/// eighth of that so a block plus pattern overlap always fits.
pub const DEFAULT_SCAN_BLOCK_SIZE: u64 = (i32::MAX / 8) as u64 + 1;

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { scan_block_size: DEFAULT_SCAN_BLOCK_SIZE }
    }
}

/// One signature to look for after attaching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureConfig {
    pub name: String,
    pub pattern: String,
    /// Region start; `None` means the process base.
    pub start: Option<u64>,
    pub size: u64,
}

pub const DEFAULT_SIGNATURE_REGION: u64 = 0x100_0000;

/// What the console entry point does after loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub process_id: Option<u64>,
    pub unload_on_exit: bool,
    pub signatures: Vec<SignatureConfig>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self { process_id: None, unload_on_exit: true, signatures: Vec::new() }
    }
}

/// Top-level runtime config.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub logging: LoggingConfig,
    pub service: ServiceConfig,
    pub memory: MemoryConfig,
    pub target: TargetConfig,
}
