//! Typed process configuration for the ingestion pipeline.

mod env_loader;
mod loader;
mod types;

pub use env_loader::apply_env_overrides;
pub use loader::load;
pub use types::*;
