//! Service lifecycle for the privileged component.
//!
//! The OS service manager is consumed through [`ServiceBackend`] and
//! [`ManagedService`]. [`ServiceLifecycle`] drives the state machine on top:
//!
//! ```text
//!   NotCreated ──create──▶ Created ──start──▶ Running ──stop──▶ Stopped
//!        ▲                    │                  ▲                │
//!        │                    │                  └──────start─────┘
//!        └───────delete───────┴──────────── delete (stops first) ─┘
//! ```
//!
//! Status waits are bounded by `ServiceConfig::status_timeout`. A wait that
//! elapses is logged and not retried.

#[cfg(windows)]
pub mod win32;

use std::{io, thread, time::{Duration, Instant}};

use log::Level;
use thiserror::Error;

use crate::config::ServiceConfig;
use crate::memdrv_log;

/// `ERROR_INVALID_IMAGE_HASH`: code integrity rejected the binary.
pub const ERROR_INVALID_IMAGE_HASH: i32 = 577;

/// Coarse status reported by the service manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    StartPending,
    StopPending,
    Running,
    Paused,
}

/// One status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSnapshot {
    pub state: ServiceState,
    /// The service currently accepts a stop request.
    pub can_stop: bool,
}

/// A handle to one registered service. Dropping it releases the handle.
pub trait ManagedService {
    fn query(&self) -> io::Result<ServiceSnapshot>;
    fn start(&self) -> io::Result<()>;
    fn stop(&self) -> io::Result<()>;
    /// Mark the registration for deletion.
    fn delete(&self) -> io::Result<()>;
}

/// Service registration capability: create, or open when it already exists.
pub trait ServiceBackend {
    type Service: ManagedService;

    fn create_or_open(&self, cfg: &ServiceConfig) -> io::Result<Self::Service>;
}

/// Where the lifecycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotCreated,
    Created,
    Running,
    Stopped,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service '{0}' is already created; delete it first")]
    AlreadyCreated(String),

    #[error("service is not created")]
    NotCreated,

    #[error("could not create or open service '{name}': {source}")]
    Create { name: String, #[source] source: io::Error },

    #[error("service '{name}' refused to start: the binary is not signed")]
    Unsigned { name: String, #[source] source: io::Error },

    #[error("failed to start service '{name}': {source}")]
    Start { name: String, #[source] source: io::Error },

    #[error("service '{name}' does not accept a stop request")]
    CannotStop { name: String },

    #[error("failed to stop service '{name}': {source}")]
    Stop { name: String, #[source] source: io::Error },

    #[error("failed to query service '{name}': {source}")]
    Query { name: String, #[source] source: io::Error },

    #[error("service '{name}' did not reach {target:?} within {waited:?}")]
    Timeout { name: String, target: ServiceState, waited: Duration },
}

impl ServiceError {
    /// Programming errors in the caller, as opposed to runtime conditions.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, ServiceError::AlreadyCreated(_) | ServiceError::NotCreated)
    }
}

/// Owns the service handle and tracks where the state machine is.
pub struct ServiceLifecycle<B: ServiceBackend> {
    backend: B,
    service: Option<B::Service>,
    name: String,
    state: LifecycleState,
    status_timeout: Duration,
    poll_interval: Duration,
}

impl<B: ServiceBackend> ServiceLifecycle<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            service: None,
            name: String::new(),
            state: LifecycleState::NotCreated,
            status_timeout: crate::config::types::DEFAULT_STATUS_TIMEOUT,
            poll_interval: crate::config::types::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_created(&self) -> bool {
        self.service.is_some()
    }

    pub fn is_loaded(&self) -> bool {
        self.state == LifecycleState::Running
    }

    /// Create the service, or open it if a registration with that name exists.
    pub fn create(&mut self, cfg: &ServiceConfig) -> Result<(), ServiceError> {
        if self.service.is_some() {
            return Err(ServiceError::AlreadyCreated(self.name.clone()));
        }

        let service = self.backend.create_or_open(cfg).map_err(|source| {
            memdrv_log!(Level::Error, "service", "create/open '{}' failed: {}", cfg.name, source);
            ServiceError::Create { name: cfg.name.clone(), source }
        })?;

        self.name = cfg.name.clone();
        self.status_timeout = cfg.status_timeout;
        self.poll_interval = cfg.poll_interval;
        self.service = Some(service);
        self.state = LifecycleState::Created;
        memdrv_log!(Level::Debug, "service", "'{}' created/opened ({})", self.name, cfg.binary.display());
        Ok(())
    }

    /// Start unless already running, then wait for `Running`.
    pub fn start(&mut self) -> Result<(), ServiceError> {
        let service = self.service.as_ref().ok_or(ServiceError::NotCreated)?;
        if self.state == LifecycleState::Running {
            return Ok(());
        }

        let snapshot = service.query().map_err(|source| self.query_error(source))?;
        if snapshot.state != ServiceState::Running {
            if let Err(source) = service.start() {
                let name = self.name.clone();
                return Err(if source.raw_os_error() == Some(ERROR_INVALID_IMAGE_HASH) {
                    memdrv_log!(Level::Error, "service", "'{}' is not signed, the service manager will not load it", name);
                    ServiceError::Unsigned { name, source }
                } else {
                    memdrv_log!(Level::Error, "service", "start '{}' failed: {}", name, source);
                    ServiceError::Start { name, source }
                });
            }

            match self.wait_for(ServiceState::Running) {
                Ok(()) => {}
                Err(ServiceError::Timeout { waited, .. }) => {
                    memdrv_log!(Level::Error, "service", "'{}' not running after {:?}; continuing", self.name, waited);
                }
                Err(e) => return Err(e),
            }
        }

        self.state = LifecycleState::Running;
        memdrv_log!(Level::Info, "service", "'{}' running", self.name);
        Ok(())
    }

    /// Stop if loaded, then wait for `Stopped`.
    pub fn stop(&mut self) -> Result<(), ServiceError> {
        let service = self.service.as_ref().ok_or(ServiceError::NotCreated)?;
        if self.state != LifecycleState::Running {
            return Ok(());
        }

        let snapshot = service.query().map_err(|source| self.query_error(source))?;
        if snapshot.state == ServiceState::Stopped {
            self.state = LifecycleState::Stopped;
            return Ok(());
        }
        if !snapshot.can_stop {
            memdrv_log!(Level::Error, "service", "'{}' cannot be stopped", self.name);
            return Err(ServiceError::CannotStop { name: self.name.clone() });
        }

        service.stop().map_err(|source| {
            memdrv_log!(Level::Error, "service", "stop '{}' failed: {}", self.name, source);
            ServiceError::Stop { name: self.name.clone(), source }
        })?;
        self.state = LifecycleState::Stopped;

        match self.wait_for(ServiceState::Stopped) {
            Ok(()) => {}
            Err(ServiceError::Timeout { waited, .. }) => {
                memdrv_log!(Level::Error, "service", "'{}' not stopped after {:?}", self.name, waited);
            }
            Err(e) => return Err(e),
        }
        memdrv_log!(Level::Info, "service", "'{}' stopped", self.name);
        Ok(())
    }

    /// Stop if needed, release the handle and remove the registration.
    ///
    /// A failed removal is logged only: the handle is released either way.
    pub fn delete(&mut self) -> Result<(), ServiceError> {
        if self.service.is_none() {
            return Err(ServiceError::NotCreated);
        }
        if self.state == LifecycleState::Running {
            self.stop()?;
        }

        if let Some(service) = self.service.take() {
            if let Err(e) = service.delete() {
                memdrv_log!(Level::Error, "service", "unable to delete '{}' through the service manager: {}", self.name, e);
            }
        }
        self.state = LifecycleState::NotCreated;
        memdrv_log!(Level::Debug, "service", "'{}' deleted", self.name);
        Ok(())
    }

    fn query_error(&self, source: io::Error) -> ServiceError {
        ServiceError::Query { name: self.name.clone(), source }
    }

    fn wait_for(&self, target: ServiceState) -> Result<(), ServiceError> {
        let service = self.service.as_ref().ok_or(ServiceError::NotCreated)?;
        let started = Instant::now();
        loop {
            let snapshot = service.query().map_err(|source| self.query_error(source))?;
            if snapshot.state == target {
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= self.status_timeout {
                return Err(ServiceError::Timeout { name: self.name.clone(), target, waited });
            }
            thread::sleep(self.poll_interval.min(self.status_timeout - waited));
        }
    }
}

impl<B: ServiceBackend> std::fmt::Debug for ServiceLifecycle<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceLifecycle")
            .field("name", &self.name)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimWorld, SimulatedScm};

    fn config() -> ServiceConfig {
        ServiceConfig::new("MemDrv", "C:\\memdrv.sys", r"\\.\MemDrv")
            .with_timeouts(Duration::from_millis(50), Duration::from_millis(1))
    }

    fn lifecycle(world: &SimWorld) -> ServiceLifecycle<SimulatedScm> {
        ServiceLifecycle::new(world.scm())
    }

    #[test]
    fn full_state_machine_round_trip() {
        let world = SimWorld::new();
        let mut lc = lifecycle(&world);
        assert_eq!(lc.state(), LifecycleState::NotCreated);

        lc.create(&config()).unwrap();
        assert_eq!(lc.state(), LifecycleState::Created);

        lc.start().unwrap();
        assert!(lc.is_loaded());
        assert_eq!(world.service_state("MemDrv"), Some(ServiceState::Running));

        lc.stop().unwrap();
        assert_eq!(lc.state(), LifecycleState::Stopped);

        lc.start().unwrap();
        lc.delete().unwrap();
        assert_eq!(lc.state(), LifecycleState::NotCreated);
        assert!(!world.service_exists("MemDrv"));
    }

    #[test]
    fn double_create_is_a_usage_error() {
        let world = SimWorld::new();
        let mut lc = lifecycle(&world);
        lc.create(&config()).unwrap();
        let err = lc.create(&config()).unwrap_err();
        assert!(err.is_usage_error());
        assert!(matches!(err, ServiceError::AlreadyCreated(name) if name == "MemDrv"));
    }

    #[test]
    fn operations_before_create_are_usage_errors() {
        let world = SimWorld::new();
        let mut lc = lifecycle(&world);
        assert!(matches!(lc.start(), Err(ServiceError::NotCreated)));
        assert!(matches!(lc.stop(), Err(ServiceError::NotCreated)));
        assert!(matches!(lc.delete(), Err(ServiceError::NotCreated)));
    }

    #[test]
    fn create_opens_an_existing_registration() {
        let world = SimWorld::new();
        let mut first = lifecycle(&world);
        first.create(&config()).unwrap();
        first.start().unwrap();

        let mut second = lifecycle(&world);
        second.create(&config()).unwrap();
        // Already running: start only flips the local flag.
        let starts = world.start_count();
        second.start().unwrap();
        assert_eq!(world.start_count(), starts);
    }

    #[test]
    fn unsigned_binary_is_reported_separately() {
        let world = SimWorld::new();
        world.reject_unsigned(true);
        let mut lc = lifecycle(&world);
        lc.create(&config()).unwrap();
        assert!(matches!(lc.start(), Err(ServiceError::Unsigned { .. })));
        assert!(!lc.is_loaded());
    }

    #[test]
    fn generic_start_failure_is_not_unsigned() {
        let world = SimWorld::new();
        world.fail_start(true);
        let mut lc = lifecycle(&world);
        lc.create(&config()).unwrap();
        assert!(matches!(lc.start(), Err(ServiceError::Start { .. })));
    }

    #[test]
    fn stop_when_not_loaded_is_a_noop() {
        let world = SimWorld::new();
        let mut lc = lifecycle(&world);
        lc.create(&config()).unwrap();
        lc.stop().unwrap();
        assert_eq!(lc.state(), LifecycleState::Created);
    }

    #[test]
    fn cannot_stop_fails_and_keeps_loaded() {
        let world = SimWorld::new();
        let mut lc = lifecycle(&world);
        lc.create(&config()).unwrap();
        lc.start().unwrap();

        world.set_can_stop("MemDrv", false);
        assert!(matches!(lc.stop(), Err(ServiceError::CannotStop { .. })));
        assert!(lc.is_loaded());

        // delete propagates the stop failure and keeps the handle.
        assert!(lc.delete().is_err());
        assert!(lc.is_created());
    }

    #[test]
    fn start_timeout_is_logged_not_fatal() {
        let world = SimWorld::new();
        world.hang_transitions(true);
        let mut lc = lifecycle(&world);
        lc.create(&config()).unwrap();
        lc.start().unwrap();
        assert!(lc.is_loaded());
        assert_eq!(world.service_state("MemDrv"), Some(ServiceState::StartPending));
    }

    #[test]
    fn failed_registration_removal_still_releases() {
        let world = SimWorld::new();
        world.fail_delete(true);
        let mut lc = lifecycle(&world);
        lc.create(&config()).unwrap();
        lc.delete().unwrap();
        assert!(!lc.is_created());
        assert!(world.service_exists("MemDrv"));
    }
}
