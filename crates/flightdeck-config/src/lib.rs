//! # flightdeck Config
//!
//! Configuration management for the flightdeck engine, run stores and
//! resource lifecycle flights.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
