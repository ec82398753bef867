//! Driver session: one service lifecycle plus one control channel.
//!
//! `load` installs (or reuses) the privileged component and connects to it,
//! `unload` reverses that, and `dispose` is the idempotent teardown also run
//! on drop. A session optionally holds an attached target process; memory
//! access goes through the borrowing [`RemoteMemory`] view.

use log::Level;
use thiserror::Error;

use crate::channel::{can_connect_to, ChannelError, ControlChannel, Device};
use crate::config::{ConfigError, IoMethod, MemoryConfig, ServiceConfig};
use crate::memdrv_log;
use crate::memory::{self, MemoryError, RemoteMemory, Target};
use crate::notify::Notifier;
use crate::service::{ServiceBackend, ServiceError, ServiceLifecycle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Loaded,
    Unloaded,
    Disposed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("session was disposed")]
    Disposed,
}

pub struct DriverSession<B: ServiceBackend, D: Device> {
    config: ServiceConfig,
    memory: MemoryConfig,
    lifecycle: ServiceLifecycle<B>,
    channel: ControlChannel<D>,
    target: Option<Target>,
    loaded: bool,
    disposed: bool,
    events: Notifier<SessionEvent>,
}

#[cfg(windows)]
pub type NativeSession =
    DriverSession<crate::service::win32::ScmBackend, crate::channel::win32::Win32Device>;

#[cfg(windows)]
impl NativeSession {
    pub fn native(config: ServiceConfig) -> Result<Self, SessionError> {
        Self::new(config, crate::service::win32::ScmBackend, crate::channel::win32::Win32Device)
    }
}

impl<B: ServiceBackend, D: Device> DriverSession<B, D> {
    /// Validate `config` and wire the backends together. Nothing is
    /// installed until [`load`](Self::load).
    pub fn new(config: ServiceConfig, backend: B, device: D) -> Result<Self, SessionError> {
        config.validate()?;
        if config.io_method != IoMethod::ControlChannel {
            return Err(ConfigError::UnsupportedIoMethod(config.io_method).into());
        }

        let channel = ControlChannel::new(device, config.endpoint.clone());
        Ok(Self {
            config,
            memory: MemoryConfig::default(),
            lifecycle: ServiceLifecycle::new(backend),
            channel,
            target: None,
            loaded: false,
            disposed: false,
            events: Notifier::new("session"),
        })
    }

    pub fn with_memory_config(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &ServiceLifecycle<B> {
        &self.lifecycle
    }

    pub fn channel(&self) -> &ControlChannel<D> {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut ControlChannel<D> {
        &mut self.channel
    }

    pub fn events(&mut self) -> &mut Notifier<SessionEvent> {
        &mut self.events
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub fn is_attached(&self) -> bool {
        self.target.is_some()
    }

    pub fn target(&self) -> Option<Target> {
        self.target
    }

    /// Create, start unless the endpoint is already there, then connect.
    ///
    /// A failed connect is logged and does not fail the load; check
    /// [`is_connected`](Self::is_connected) afterwards.
    pub fn load(&mut self) -> Result<(), SessionError> {
        if self.disposed {
            return Err(SessionError::Disposed);
        }

        self.lifecycle.create(&self.config)?;

        if can_connect_to(self.channel.device(), &self.config.endpoint) {
            memdrv_log!(
                Level::Warn,
                "session",
                "{} is already reachable; assuming a resident component and skipping start",
                self.config.endpoint
            );
        } else {
            self.lifecycle.start()?;
        }

        self.loaded = true;

        if self.channel.is_connected() {
            self.channel.disconnect();
        }
        if let Err(e) = self.channel.connect() {
            memdrv_log!(Level::Error, "session", "loaded '{}' but could not connect: {}", self.config.name, e);
        }

        memdrv_log!(Level::Info, "session", "'{}' loaded", self.config.name);
        self.events.emit(SessionEvent::Loaded);
        Ok(())
    }

    /// Disconnect, stop and delete. Drops any attached target.
    pub fn unload(&mut self) -> Result<(), SessionError> {
        if self.channel.is_connected() {
            self.channel.disconnect();
        }
        self.target = None;

        self.lifecycle.stop()?;
        self.lifecycle.delete()?;

        self.loaded = false;
        memdrv_log!(Level::Info, "session", "'{}' unloaded", self.config.name);
        self.events.emit(SessionEvent::Unloaded);
        Ok(())
    }

    /// Idempotent teardown. Unload failures are logged only.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        if self.lifecycle.is_created() {
            if let Err(e) = self.unload() {
                memdrv_log!(Level::Error, "session", "unload during dispose failed: {}", e);
            }
        }
        self.target = None;
        self.channel.dispose();
        self.events.emit(SessionEvent::Disposed);
    }

    /// Close the channel and retire the session without unloading, so the
    /// component stays resident for a later session to pick up.
    pub fn release(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.target = None;
        self.channel.dispose();
        memdrv_log!(Level::Warn, "session", "'{}' released; component left resident", self.config.name);
        self.events.emit(SessionEvent::Disposed);
    }

    /// Select `process_id` as the target and resolve its base address.
    pub fn attach(&mut self, process_id: u64) -> Result<Target, SessionError> {
        self.target = None;
        let base = memory::query_base(&self.channel, process_id)?;
        if process_id == 0 || base <= shared::constants::MIN_PROCESS_BASE {
            memdrv_log!(Level::Error, "session", "process {} not found (base {:#x})", process_id, base);
            return Err(MemoryError::NoProcess { process_id, base }.into());
        }

        let target = Target { process_id, base };
        memdrv_log!(Level::Info, "session", "attached to {} at {:#x}", process_id, base);
        self.target = Some(target);
        Ok(target)
    }

    pub fn detach(&mut self) {
        self.target = None;
    }

    /// Memory view over the channel and the current target.
    pub fn memory(&self) -> RemoteMemory<'_, D> {
        RemoteMemory::new(&self.channel, self.target, self.memory.scan_block_size)
    }
}

impl<B: ServiceBackend, D: Device> Drop for DriverSession<B, D> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<B: ServiceBackend, D: Device> std::fmt::Debug for DriverSession<B, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverSession")
            .field("name", &self.config.name)
            .field("loaded", &self.loaded)
            .field("disposed", &self.disposed)
            .field("channel", &self.channel)
            .field("target", &self.target)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimWorld, SimulatedDevice, SimulatedScm};
    use std::time::Duration;

    fn session(world: &SimWorld) -> DriverSession<SimulatedScm, SimulatedDevice> {
        let cfg = ServiceConfig::new("MemDrv", "memdrv.sys", r"\\.\MemDrv")
            .with_timeouts(Duration::from_millis(50), Duration::from_millis(1));
        DriverSession::new(cfg, world.scm(), world.device()).unwrap()
    }

    #[test]
    fn rejects_io_methods_without_transport() {
        let world = SimWorld::new();
        for io in [IoMethod::None, IoMethod::SharedMemory] {
            let cfg = ServiceConfig::new("MemDrv", "memdrv.sys", r"\\.\MemDrv").with_io_method(io);
            let err = DriverSession::new(cfg, world.scm(), world.device()).unwrap_err();
            assert!(matches!(err, SessionError::Config(ConfigError::UnsupportedIoMethod(m)) if m == io));
        }
    }

    #[test]
    fn load_failure_leaves_session_unloaded() {
        let world = SimWorld::new();
        world.fail_start(true);
        let mut s = session(&world);
        assert!(matches!(s.load(), Err(SessionError::Service(ServiceError::Start { .. }))));
        assert!(!s.is_loaded());
        assert!(!s.is_connected());
    }

    #[test]
    fn attach_requires_a_connection() {
        let world = SimWorld::new();
        let mut s = session(&world);
        assert!(matches!(s.attach(42), Err(SessionError::Memory(MemoryError::NotConnected))));
    }

    #[test]
    fn dispose_without_load_only_emits() {
        let world = SimWorld::new();
        let mut s = session(&world);
        let rx = s.events().subscribe();
        s.dispose();
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![SessionEvent::Disposed]);
        assert!(matches!(s.load(), Err(SessionError::Disposed)));
    }
}
