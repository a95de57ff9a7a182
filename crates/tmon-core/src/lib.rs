//! Core engine for the Telegram chat monitor.
//!
//! Framework-agnostic: the Telegram transport and the operator menu live behind
//! ports (traits) implemented in adapter crates.

pub mod config;
pub mod domain;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod ports;
pub mod reconcile;
pub mod resolver;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
