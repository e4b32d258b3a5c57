//! Common utilities shared across the crate

pub mod config;
pub mod error;
pub mod logging;

pub use error::{AssertionError, Error, Result};

/// The crate version string
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
