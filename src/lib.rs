//! th-cli - command line client for the certification test harness
//!
//! This library resolves test selections from capability declarations and
//! property overrides, submits them to the test harness backend and follows
//! the resulting runs over a live event stream.

pub mod backend;
pub mod cli;
pub mod commands;
pub mod common;
pub mod monitor;
pub mod selection;
pub mod session;
pub mod stream;

#[cfg(test)]
mod fakes;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use selection::{Catalog, Resolver, TestSelection};
