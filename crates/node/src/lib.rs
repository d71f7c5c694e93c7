//! RedRock node: configuration and slot wiring for the storage engine and
//! the snapshot transfer service

pub mod config;
pub mod registry;

pub use config::{Config, ConfigError, SharedConfig};
pub use registry::Registry;
