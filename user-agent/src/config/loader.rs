// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads `memdrv.toml`, deserializes into `RawConfig`, and converts the raw
//! tables into validated runtime types.

use crate::config::model::{ConfigError, RawConfig, RawService, RawSignature, RawTarget};
use crate::config::types::{
    Config, LoggingConfig, MemoryConfig, ServiceConfig, SharedMemoryConfig, SignatureConfig,
    TargetConfig, DEFAULT_POLL_INTERVAL, DEFAULT_SIGNATURE_REGION, DEFAULT_STATUS_TIMEOUT,
};
use crate::memdrv_log;
use log::Level;
use std::{fs, path::Path, time::Duration};

/// Load and parse the configuration from `path`.
/// Logs at DEBUG before reading and INFO on success.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    memdrv_log!(Level::Debug, "config", "Reading config from {:?}", path);
    let txt = fs::read_to_string(path)?;
    let cfg = parse(&txt)?;
    memdrv_log!(Level::Info, "config", "Loaded config from {:?} (service={})", path, cfg.service.name);
    Ok(cfg)
}

/// Parse a TOML document that is already in memory.
pub fn parse(txt: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(txt)?;
    convert(raw)
}

fn convert(raw: RawConfig) -> Result<Config, ConfigError> {
    let logging = LoggingConfig {
        enable: raw.logging.enable,
        file: raw.logging.file,
        level: raw.logging.level,
    };
    let service = convert_service(raw.service)?;

    let scan_block_size = raw.memory.scan_block_size.unwrap_or(MemoryConfig::default().scan_block_size);
    if scan_block_size == 0 {
        return Err(ConfigError::InvalidValue {
            field: "memory.scan_block_size",
            reason: "must be at least 1".into(),
        });
    }

    let target = raw.target.map(convert_target).unwrap_or_default();

    Ok(Config { logging, service, memory: MemoryConfig { scan_block_size }, target })
}

/// Convert the `[service]` table. Enum strings and durations are parsed here
/// so a bad value fails before anything touches the OS.
pub fn convert_service(raw: RawService) -> Result<ServiceConfig, ConfigError> {
    let shared_memory = raw
        .shared_memory
        .map(|s| SharedMemoryConfig {
            process_id: s.process_id,
            process_address: s.process_address,
            first_event: s.first_event,
            second_event: s.second_event,
        })
        .unwrap_or_default();

    let cfg = ServiceConfig {
        display_name: raw.display_name.unwrap_or_else(|| raw.name.clone()),
        name: raw.name,
        binary: raw.binary.into(),
        endpoint: raw.endpoint,
        load_method: raw.load_method.parse()?,
        io_method: raw.io_method.parse()?,
        shared_memory,
        status_timeout: parse_duration(raw.status_timeout, DEFAULT_STATUS_TIMEOUT)?,
        poll_interval: parse_duration(raw.poll_interval, DEFAULT_POLL_INTERVAL)?,
    };
    cfg.validate()?;
    memdrv_log!(
        Level::Debug,
        "config",
        "Service '{}' → endpoint={:?} io={} timeout={:?}",
        cfg.name,
        cfg.endpoint,
        cfg.io_method,
        cfg.status_timeout
    );
    Ok(cfg)
}

fn convert_target(raw: RawTarget) -> TargetConfig {
    TargetConfig {
        process_id: raw.process_id,
        unload_on_exit: raw.unload_on_exit,
        signatures: raw.signatures.into_iter().map(convert_signature).collect(),
    }
}

fn convert_signature(raw: RawSignature) -> SignatureConfig {
    SignatureConfig {
        name: raw.name,
        pattern: raw.pattern,
        start: raw.start,
        size: raw.size.unwrap_or(DEFAULT_SIGNATURE_REGION),
    }
}

fn parse_duration(raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    match raw {
        None => Ok(default),
        Some(s) => humantime::parse_duration(&s).map_err(|e| ConfigError::InvalidDuration(s, e)),
    }
}
