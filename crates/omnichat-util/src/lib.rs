//! Shared utilities for omnichat.
//!
//! This crate provides the small pieces every other omnichat crate leans on:
//! - Error handling patterns
//! - ULID-based identifier generation for sessions and cache files
//! - Logging setup with tracing

pub mod error;
pub mod id;
pub mod log;

pub use error::{Error, ErrorKind, Result};
pub use id::{IdPrefix, Identifier};
