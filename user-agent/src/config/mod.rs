//! Public API for configuration

pub mod loader;
pub mod model;
pub mod types;

// Re-export the main entrypoints:
pub use loader::{load, parse};
pub use model::ConfigError;
pub use types::{Config, IoMethod, LoadMethod, LoggingConfig, MemoryConfig, ServiceConfig};
