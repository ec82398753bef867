//! Integration tests for the driver session lifecycle.
//!
//! Every test runs against the in-process simulated service manager and
//! device, so the full load → connect → unload path is exercised on any host.
//!
//! Key responsibilities:
//! - Verify load/unload ordering and the resulting service and channel state.
//! - Check the resident-component path skips the start step.
//! - Confirm dispose is idempotent and notifies exactly once.
//! - Make sure listener failures never reach the caller.

use std::time::Duration;

use memdrv::config::ServiceConfig;
use memdrv::service::ServiceState;
use memdrv::sim::{SimWorld, SimulatedDevice, SimulatedScm};
use memdrv::{DriverSession, SessionEvent};

const NAME: &str = "MemDrv";
const ENDPOINT: &str = r"\\.\MemDrv";

type SimSession = DriverSession<SimulatedScm, SimulatedDevice>;

fn session(world: &SimWorld) -> SimSession {
    let cfg = ServiceConfig::new(NAME, r"C:\drivers\memdrv.sys", ENDPOINT)
        .with_timeouts(Duration::from_millis(50), Duration::from_millis(1));
    DriverSession::new(cfg, world.scm(), world.device()).unwrap()
}

#[test]
fn test_load_connects_and_unload_tears_down() {
    let world = SimWorld::new();
    let mut s = session(&world);
    let rx = s.events().subscribe();

    // 1) Load installs, starts and connects
    s.load().unwrap();
    assert!(s.is_loaded());
    assert!(s.is_connected());
    assert_eq!(world.service_state(NAME), Some(ServiceState::Running));
    assert_eq!(world.start_count(), 1);
    assert_eq!(world.open_handles(), 1);

    // 2) Unload reverses it
    s.unload().unwrap();
    assert!(!s.is_loaded());
    assert!(!s.is_connected());
    assert!(!world.service_exists(NAME));
    assert_eq!(world.open_handles(), 0);

    assert_eq!(
        rx.try_iter().collect::<Vec<_>>(),
        vec![SessionEvent::Loaded, SessionEvent::Unloaded]
    );
}

#[test]
fn test_resident_endpoint_skips_start() {
    let world = SimWorld::new();
    world.make_resident(ENDPOINT);
    let mut s = session(&world);

    s.load().unwrap();
    assert!(s.is_loaded());
    assert!(s.is_connected());
    assert_eq!(world.start_count(), 0, "start must be skipped");
}

#[test]
fn test_unload_then_load_round_trip() {
    let world = SimWorld::new();
    let mut s = session(&world);

    s.load().unwrap();
    s.unload().unwrap();
    s.load().unwrap();

    assert!(s.is_loaded());
    assert!(s.is_connected());
    assert_eq!(world.service_state(NAME), Some(ServiceState::Running));
    assert_eq!(world.start_count(), 2);
    assert_eq!(world.open_handles(), 1);
}

#[test]
fn test_double_dispose_emits_once() {
    let world = SimWorld::new();
    let mut s = session(&world);
    s.load().unwrap();
    let rx = s.events().subscribe();

    s.dispose();
    s.dispose();

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events, vec![SessionEvent::Unloaded, SessionEvent::Disposed]);
    assert!(s.is_disposed());
    assert!(!world.service_exists(NAME));
    assert_eq!(world.open_handles(), 0);
}

#[test]
fn test_drop_unloads() {
    let world = SimWorld::new();
    {
        let mut s = session(&world);
        s.load().unwrap();
        assert!(world.service_exists(NAME));
    }
    assert!(!world.service_exists(NAME));
    assert_eq!(world.open_handles(), 0);
}

#[test]
fn test_release_leaves_component_resident() {
    let world = SimWorld::new();
    {
        let mut s = session(&world);
        s.load().unwrap();
        s.release();
        assert!(s.is_disposed());
        assert!(!s.is_connected());
    }
    assert_eq!(world.service_state(NAME), Some(ServiceState::Running));
    assert_eq!(world.open_handles(), 0);

    // 1) A later session picks the resident component up without starting it
    let starts = world.start_count();
    let mut next = session(&world);
    next.load().unwrap();
    assert!(next.is_connected());
    assert_eq!(world.start_count(), starts);
}

#[test]
fn test_failed_connect_still_loads() {
    let world = SimWorld::new();
    // Start never reaches Running, so the endpoint never appears.
    world.hang_transitions(true);
    let mut s = session(&world);

    s.load().unwrap();
    assert!(s.is_loaded());
    assert!(!s.is_connected());
}

#[test]
fn test_panicking_listener_does_not_abort_load() {
    let world = SimWorld::new();
    let mut s = session(&world);
    s.events().listen(|_| panic!("listener failure"));
    let rx = s.events().subscribe();

    s.load().unwrap();
    assert!(s.is_loaded());
    assert_eq!(rx.try_recv().unwrap(), SessionEvent::Loaded);
}

#[test]
fn test_unsigned_component_fails_load() {
    let world = SimWorld::new();
    world.reject_unsigned(true);
    let mut s = session(&world);

    let err = s.load().unwrap_err();
    assert!(err.to_string().contains("not signed"), "unexpected error: {err}");
    assert!(!s.is_loaded());
}
