//! ota-core: Shared infrastructure for the OTA data-access layer.
pub mod config;
pub mod error;
pub mod observability;

pub use serde;
pub use tracing;
pub use validator;
