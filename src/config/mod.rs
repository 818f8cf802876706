// src/config/mod.rs

//! Configuration loading and validation for taskpod.
//!
//! - `model.rs`: the TOML-backed data model.
//! - `loader.rs`: reading a config file from disk.
//! - `validate.rs`: raw -> validated conversion.
//! - `order.rs`: prerequisite resolution for a requested task.

pub mod loader;
pub mod model;
pub mod order;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, ConfigSection, ContainerConfig, HealthCheckSection, RawConfigFile, TaskConfig,
};
pub use order::execution_order;
pub use validate::parse_duration;
