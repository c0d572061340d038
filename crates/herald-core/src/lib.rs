//! Shared building blocks for the Herald broadcast server: configuration,
//! settings validation, the error taxonomy and identifier types.

pub mod config;
pub mod error;
pub mod types;
pub mod validate;

pub use config::ServerConfig;
pub use error::{HeraldError, Result};
pub use types::{ConnId, EventId};
pub use validate::ValidationError;
