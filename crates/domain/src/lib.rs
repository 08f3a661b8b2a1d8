//! Shared domain layer for choir: the error taxonomy, core data model,
//! configuration, input validation, trace events, and the metrics collector.
//!
//! Everything here is I/O-free. Stores, handlers, and the gateway build on
//! these types; nothing in this crate depends on the runtime.

pub mod config;
pub mod error;
pub mod metrics;
pub mod trace;
pub mod types;
pub mod validate;

pub use error::{Error, Result};
