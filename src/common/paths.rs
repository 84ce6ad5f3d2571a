//! Configuration and log file locations
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/th-cli/`
//! - macOS: `~/Library/Application Support/th-cli/`
//! - Windows: `%APPDATA%\th-cli\`

use std::path::{Path, PathBuf};

/// Name used for configuration directories and files
const APP_NAME: &str = "th-cli";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the user configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Configuration file in the current working directory, checked first
pub fn local_config_path() -> PathBuf {
    PathBuf::from(format!("{APP_NAME}.toml"))
}

/// Turn a run title into a safe log file name
///
/// Anything outside `[A-Za-z0-9._-]` becomes `_`, so titles such as the
/// default timestamp `2024-01-01-10:00:00` stay readable on every platform.
pub fn run_log_file_name(title: &str) -> String {
    let sanitized: String = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = sanitized.trim_matches('.');
    if trimmed.is_empty() {
        "run.log".to_string()
    } else {
        format!("{trimmed}.log")
    }
}

/// Full path of the log file for a run
pub fn run_log_path(log_dir: &Path, title: &str) -> PathBuf {
    log_dir.join(run_log_file_name(title))
}
