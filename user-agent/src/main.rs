// src/main.rs

//! Console entry point.
//!
//! 1. Parse configuration & set up structured logging
//! 2. Build a session (service manager + device, or the in-process simulation)
//! 3. Load, attach to the configured process and run the signature scans
//! 4. Print a JSON report, then unload unless told to leave the component resident

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;

use memdrv::channel::Device;
use memdrv::config::types::SignatureConfig;
use memdrv::config::{self, Config};
use memdrv::service::ServiceBackend;
use memdrv::sim::SimWorld;
use memdrv::{logging, DriverSession, SessionEvent, Signature, Target};

const DEFAULT_CONFIG: &str = "memdrv.toml";

/// Process id and image the simulated host exposes when no target is configured.
const SIM_PROCESS_ID: u64 = 4242;
const SIM_IMAGE_BASE: u64 = 0x1_4000_0000;
const SIM_IMAGE_LEN: usize = 0x1_0000;

/// Print an error with context and terminate the process.
macro_rules! fatal {
    ($ctx:expr, $($arg:tt)+) => {{
        eprintln!(
            "[{}][ERROR][{}] {}",
            Local::now().to_rfc3339(),
            $ctx,
            format!($($arg)+)
        );
        std::process::exit(1);
    }};
}

#[derive(Debug, Serialize)]
struct SignatureHit {
    name: String,
    address: Option<u64>,
}

#[derive(Debug, Serialize)]
struct Report {
    service: String,
    simulated: bool,
    loaded: bool,
    connected: bool,
    target: Option<Target>,
    signatures: Vec<SignatureHit>,
}

/// Directory that contains the running executable.
fn exe_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot determine executable path")?;
    Ok(exe.parent().map(Path::to_path_buf).unwrap_or_default())
}

/// Region for one signature: explicit bounds, else the process image.
fn region(sig: &SignatureConfig, target: Option<Target>) -> Option<(u64, u64)> {
    let start = sig.start.or(target.map(|t| t.base))?;
    Some((start, sig.size))
}

fn run<B, D>(mut session: DriverSession<B, D>, cfg: &Config, simulated: bool) -> Result<Report>
where
    B: ServiceBackend,
    D: Device,
{
    session.events().listen(|event| match event {
        SessionEvent::Loaded => log::info!("driver session loaded"),
        SessionEvent::Unloaded => log::info!("driver session unloaded"),
        SessionEvent::Disposed => log::debug!("driver session disposed"),
    });

    session.load().context("loading the privileged component")?;
    if !session.is_connected() {
        log::warn!("component loaded but {} is not reachable", cfg.service.endpoint);
    }

    let mut signatures = Vec::new();
    if let Some(pid) = cfg.target.process_id {
        match session.attach(pid) {
            Ok(target) => log::info!("target {} base {:#x}", target.process_id, target.base),
            Err(e) => log::error!("attach to {} failed: {}", pid, e),
        }

        let memory = session.memory();
        for sig in &cfg.target.signatures {
            let parsed = Signature::parse(&sig.pattern)
                .with_context(|| format!("signature '{}'", sig.name))?;
            let address = region(sig, memory.target())
                .and_then(|(start, size)| memory.scan_signature(start, size, &parsed));
            log::info!("signature '{}' → {:?}", sig.name, address.map(|a| format!("{a:#x}")));
            signatures.push(SignatureHit { name: sig.name.clone(), address });
        }
    }

    let report = Report {
        service: cfg.service.name.clone(),
        simulated,
        loaded: session.is_loaded(),
        connected: session.is_connected(),
        target: session.target(),
        signatures,
    };

    if cfg.target.unload_on_exit {
        session.unload().context("unloading the privileged component")?;
    } else {
        log::warn!("leaving '{}' resident", cfg.service.name);
        session.release();
    }
    Ok(report)
}

/// In-process host with one process mapped, so the full flow runs anywhere.
fn simulated_world(cfg: &Config) -> SimWorld {
    let world = SimWorld::new();
    let pid = cfg.target.process_id.unwrap_or(SIM_PROCESS_ID);
    world.add_process(pid, SIM_IMAGE_BASE);

    let mut image = vec![0u8; SIM_IMAGE_LEN];
    image[..2].copy_from_slice(b"MZ");
    world.map(pid, SIM_IMAGE_BASE, image);
    world
}

fn main() -> Result<()> {
    // 1 ─ Context
    let mut simulate = false;
    let mut config_path = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--simulate" | "-s" => simulate = true,
            other => config_path = Some(PathBuf::from(other)),
        }
    }

    let exe_dir = exe_dir()?;
    let config_path = config_path.unwrap_or_else(|| exe_dir.join(DEFAULT_CONFIG));
    let cfg = config::load(&config_path)
        .unwrap_or_else(|e| fatal!("config", "{}: {}", config_path.display(), e));

    // 2 ─ Logging
    logging::setup_logging(&exe_dir, &cfg.logging).context("logging setup failed")?;
    log::info!("memdrv-agent starting with {}", config_path.display());

    // 3 ─ Session
    let report = if simulate {
        let world = simulated_world(&cfg);
        let session = DriverSession::new(cfg.service.clone(), world.scm(), world.device())?
            .with_memory_config(cfg.memory);
        run(session, &cfg, true)?
    } else {
        native(&cfg)?
    };

    // 4 ─ Report
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(windows)]
fn native(cfg: &Config) -> Result<Report> {
    let session = memdrv::session::NativeSession::native(cfg.service.clone())?
        .with_memory_config(cfg.memory);
    run(session, cfg, false)
}

#[cfg(not(windows))]
fn native(_cfg: &Config) -> Result<Report> {
    anyhow::bail!("the service manager backend needs Windows; pass --simulate to use the in-process host")
}
