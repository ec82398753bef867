// src/lib.rs
// ────────────────────────────────────────────────────────────────────────────
// Public library entry point.  Re-export everything for both `main.rs` and
// integration tests.

#[macro_use]
pub mod macros;

pub mod channel;
pub mod config;
pub mod logging;
pub mod memory;
pub mod notify;
pub mod service;
pub mod session;
pub mod sim;

pub use channel::{can_connect_to, ChannelError, ChannelEvent, ControlChannel, Device};
pub use config::{Config, ConfigError, ServiceConfig};
pub use memory::{Encoding, MemoryError, RawRead, RemoteMemory, Signature, Target, WriteMode};
pub use notify::Notifier;
pub use service::{LifecycleState, ServiceError, ServiceLifecycle, ServiceState};
pub use session::{DriverSession, SessionError, SessionEvent};
