//! Core module - errors and the per-Handle HTTP client.

pub mod error;
pub mod http;

pub use error::{Error, ErrorCode, Result};
