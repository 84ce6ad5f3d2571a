//! Common utilities shared by every command

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, ParseIssue, Result, ValidationIssue};
