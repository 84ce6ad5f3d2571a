//! Properties file reader
//!
//! Flat `key=value` files with optional `[section]` headers. A section
//! prefixes every following key, so
//!
//! ```text
//! [dut_config]
//! setup_code=20202021
//! ```
//!
//! yields `dut_config.setup_code`. Lines starting with `#` or `;` and blank
//! lines are skipped.

use std::path::Path;

use super::{Origin, PropertyEntry, PropertyOverrides, ScalarValue};
use crate::common::ParseIssue;

/// Read a properties file, reporting every malformed line
pub fn read_properties_file(path: &Path) -> Result<PropertyOverrides, Vec<ParseIssue>> {
    let name = path.display().to_string();
    let content = std::fs::read_to_string(path)
        .map_err(|e| vec![ParseIssue::new(&name, None, format!("cannot read file: {e}"))])?;
    let entries = parse_properties(&name, &content)?;
    tracing::debug!(path = %name, count = entries.len(), "Read properties file");
    Ok(PropertyOverrides {
        origin: Origin::File(name),
        entries,
    })
}

/// Parse properties text; `name` is used in error messages
pub fn parse_properties(name: &str, content: &str) -> Result<Vec<PropertyEntry>, Vec<ParseIssue>> {
    let mut entries = Vec::new();
    let mut issues = Vec::new();
    let mut section: Option<String> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(inner) = line.strip_prefix('[') {
            match inner.strip_suffix(']').map(str::trim) {
                Some(name_part) if is_valid_key(name_part) => {
                    section = Some(name_part.to_string());
                }
                _ => issues.push(ParseIssue::new(
                    name,
                    Some(line_no),
                    format!("invalid section header '{line}'"),
                )),
            }
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            issues.push(ParseIssue::new(
                name,
                Some(line_no),
                format!("expected key=value, found '{line}'"),
            ));
            continue;
        };

        let key = key.trim();
        if !is_valid_key(key) {
            issues.push(ParseIssue::new(
                name,
                Some(line_no),
                format!("invalid key '{key}'"),
            ));
            continue;
        }

        let path = match &section {
            Some(section) => format!("{section}.{key}"),
            None => key.to_string(),
        };
        entries.push(PropertyEntry {
            path,
            value: ScalarValue::parse(value),
            line: line_no,
        });
    }

    if issues.is_empty() {
        Ok(entries)
    } else {
        Err(issues)
    }
}

/// Keys are dotted words; test case ids bring `-` along
fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && !key.ends_with('.')
        && !key.contains("..")
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Parse a `PATH=VALUE` argument from `--set`
pub fn parse_assignment(arg: &str) -> Result<(String, ScalarValue), String> {
    let (key, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected PATH=VALUE, got '{arg}'"))?;
    let key = key.trim();
    if !is_valid_key(key) {
        return Err(format!("invalid property path '{key}'"));
    }
    Ok((key.to_string(), ScalarValue::parse(value)))
}

/// Parse an `ID=BOOL` argument from `--capability`
pub fn parse_capability_flag(arg: &str) -> Result<(String, bool), String> {
    let (id, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected ID=true|false, got '{arg}'"))?;
    let id = id.trim();
    if id.is_empty() {
        return Err(format!("missing capability id in '{arg}'"));
    }
    match ScalarValue::parse(value).as_bool() {
        Some(enabled) => Ok((id.to_string(), enabled)),
        None => Err(format!("capability '{id}' must be true or false")),
    }
}
