//! Integration tests for loading configuration from disk and turning it
//! into a session.

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

use memdrv::config::{self, ConfigError, IoMethod};
use memdrv::sim::SimWorld;
use memdrv::{DriverSession, SessionError};

const DOCUMENT: &str = r#"
[logging]
enable = true
file   = "agent.log"
level  = "debug"

[service]
name           = "MemDrv"
display_name   = "Memory driver"
binary         = 'C:\drivers\memdrv.sys'
endpoint       = '\\.\MemDrv'
status_timeout = "2s"
poll_interval  = "10ms"

[memory]
scan_block_size = 4096

[target]
process_id     = 4242
unload_on_exit = false

[[target.signatures]]
name    = "tick"
pattern = "48 8B ?? 05"
start   = 0x140001000
size    = 0x2000
"#;

fn write_temp(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_document() {
    let file = write_temp(DOCUMENT);
    let cfg = config::load(file.path()).unwrap();

    assert!(cfg.logging.enable);
    assert_eq!(cfg.logging.file.as_deref(), Some("agent.log"));
    assert_eq!(cfg.service.display_name, "Memory driver");
    assert_eq!(cfg.service.endpoint, r"\\.\MemDrv");
    assert_eq!(cfg.service.status_timeout, Duration::from_secs(2));
    assert_eq!(cfg.service.poll_interval, Duration::from_millis(10));
    assert_eq!(cfg.memory.scan_block_size, 4096);
    assert_eq!(cfg.target.process_id, Some(4242));
    assert!(!cfg.target.unload_on_exit);
    assert_eq!(cfg.target.signatures[0].start, Some(0x1_4000_1000));
    assert_eq!(cfg.target.signatures[0].size, 0x2000);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = config::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn test_empty_endpoint_is_rejected() {
    let text = DOCUMENT.replace(r"endpoint       = '\\.\MemDrv'", "endpoint = ''");
    let file = write_temp(&text);
    assert!(matches!(
        config::load(file.path()),
        Err(ConfigError::MissingField("service.endpoint"))
    ));
}

#[test]
fn test_loaded_config_drives_a_session() {
    let file = write_temp(DOCUMENT);
    let cfg = config::load(file.path()).unwrap();
    let world = SimWorld::new();

    let mut s = DriverSession::new(cfg.service.clone(), world.scm(), world.device())
        .unwrap()
        .with_memory_config(cfg.memory);
    s.load().unwrap();
    assert!(s.is_connected());
}

#[test]
fn test_shared_memory_config_parses_but_cannot_build_a_session() {
    let text = DOCUMENT.replace(
        "[memory]",
        "io_method = \"shared_memory\"\n\n[service.shared_memory]\nprocess_id = 7\nfirst_event = \"A\"\nsecond_event = \"B\"\n\n[memory]",
    );
    let file = write_temp(&text);
    let cfg = config::load(file.path()).unwrap();
    assert_eq!(cfg.service.io_method, IoMethod::SharedMemory);
    assert_eq!(cfg.service.shared_memory.process_id, 7);

    let world = SimWorld::new();
    let err = DriverSession::new(cfg.service, world.scm(), world.device()).unwrap_err();
    assert!(matches!(err, SessionError::Config(ConfigError::UnsupportedIoMethod(IoMethod::SharedMemory))));
}
