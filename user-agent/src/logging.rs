//! Global logger installation.

use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::{path::Path, process, thread};

use crate::config::LoggingConfig;

/// Map the textual level from config; anything unknown means INFO.
pub fn level_filter(level: &str) -> LevelFilter {
    match level.to_uppercase().as_str() {
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" => LevelFilter::Trace,
        "OFF" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

/// Configure global logging as requested in `[logging]`.
///
/// Lines produced through `memdrv_log!` already carry their own prefix, so
/// the dispatcher only adds one for plain `log::*!` calls.
pub fn setup_logging(exe_dir: &Path, cfg: &LoggingConfig) -> Result<(), fern::InitError> {
    let log_path = cfg
        .enable
        .then(|| exe_dir.join(cfg.file.as_deref().unwrap_or("memdrv.log")));

    let mut dispatch = Dispatch::new()
        .format(|out, msg, record| {
            let text = msg.to_string();
            if text.starts_with('[') {
                out.finish(format_args!("{}", text))
            } else {
                out.finish(format_args!(
                    "[{}][{:5}][{}][pid={}][tid={:?}] {}",
                    Local::now().to_rfc3339(),
                    record.level(),
                    record.target(),
                    process::id(),
                    thread::current().id(),
                    text
                ))
            }
        })
        .level(level_filter(&cfg.level))
        .chain(std::io::stdout());

    if let Some(path) = log_path {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}
