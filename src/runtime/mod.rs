//! Process wiring: configuration and backend resolution

pub mod config;
pub mod loader;
pub mod providers;

pub use loader::load_config;
pub use providers::{build_runtime, Runtime};
