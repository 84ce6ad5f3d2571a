//! Capability declaration readers
//!
//! Two formats are accepted, picked by file extension:
//!
//! - PICS XML (`.xml`): every `<picsItem>` contributes its `<itemNumber>`
//!   with the boolean in `<support>`. An item without `<support>` is left
//!   unspecified.
//! - YAML (`.yaml`, `.yml`): nested mappings whose boolean leaves are
//!   flattened into dotted ids. A `null` leaf is unspecified.
//!
//! A directory loads every supported file inside it in file name order.

use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_yaml::Value as Yaml;

use super::{CapabilityDeclaration, CapabilityEntry, Origin};
use crate::common::ParseIssue;

/// Read one capability file, or every capability file in a directory
pub fn read_capability_path(path: &Path) -> Result<Vec<CapabilityDeclaration>, Vec<ParseIssue>> {
    let name = path.display().to_string();
    if !path.is_dir() {
        return read_capability_file(path)
            .map(|decl| vec![decl])
            .map_err(|issue| vec![issue]);
    }

    let entries = std::fs::read_dir(path)
        .map_err(|e| vec![ParseIssue::new(&name, None, format!("cannot read directory: {e}"))])?;
    let mut files: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && Format::from_path(p).is_some())
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(vec![ParseIssue::new(
            name,
            None,
            "directory contains no .xml, .yaml or .yml capability files",
        )]);
    }

    let mut declarations = Vec::with_capacity(files.len());
    let mut issues = Vec::new();
    for file in &files {
        match read_capability_file(file) {
            Ok(decl) => declarations.push(decl),
            Err(issue) => issues.push(issue),
        }
    }
    if issues.is_empty() {
        Ok(declarations)
    } else {
        Err(issues)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Xml,
    Yaml,
}

impl Format {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "xml" => Some(Self::Xml),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

/// Read a single capability declaration file
pub fn read_capability_file(path: &Path) -> Result<CapabilityDeclaration, ParseIssue> {
    let name = path.display().to_string();
    let format = Format::from_path(path).ok_or_else(|| {
        ParseIssue::new(
            &name,
            None,
            "unsupported capability file type (expected .xml, .yaml or .yml)",
        )
    })?;
    let content = std::fs::read_to_string(path)
        .map_err(|e| ParseIssue::new(&name, None, format!("cannot read file: {e}")))?;

    let entries = match format {
        Format::Xml => parse_pics_xml(&name, &content)?,
        Format::Yaml => parse_capability_yaml(&name, &content)?,
    };
    tracing::debug!(path = %name, count = entries.len(), "Read capability declaration");

    Ok(CapabilityDeclaration {
        origin: Origin::File(name),
        entries,
    })
}

#[derive(Default)]
struct PicsItem {
    number: Option<String>,
    support: Option<String>,
    line: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Number,
    Support,
}

/// Parse a PICS XML document
pub fn parse_pics_xml(name: &str, content: &str) -> Result<Vec<CapabilityEntry>, ParseIssue> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let line_at = |pos: usize| content[..pos.min(content.len())].matches('\n').count() + 1;

    let mut entries = Vec::new();
    let mut item: Option<PicsItem> = None;
    let mut field: Option<Field> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            let pos = reader.error_position() as usize;
            ParseIssue::new(name, Some(line_at(pos)), format!("malformed XML: {e}"))
        })?;
        match event {
            Event::Start(tag) => match tag.local_name().as_ref() {
                b"picsItem" => {
                    let pos = reader.buffer_position() as usize;
                    item = Some(PicsItem {
                        line: line_at(pos),
                        ..PicsItem::default()
                    });
                }
                b"itemNumber" if item.is_some() => field = Some(Field::Number),
                b"support" if item.is_some() => field = Some(Field::Support),
                _ => {}
            },
            Event::Text(text) => {
                if let (Some(current), Some(f)) = (item.as_mut(), field) {
                    let value = text
                        .unescape()
                        .map_err(|e| {
                            ParseIssue::new(name, Some(current.line), format!("bad text: {e}"))
                        })?
                        .trim()
                        .to_string();
                    match f {
                        Field::Number => current.number = Some(value),
                        Field::Support => current.support = Some(value),
                    }
                }
            }
            Event::End(tag) => match tag.local_name().as_ref() {
                b"picsItem" => {
                    if let Some(done) = item.take() {
                        if let Some(entry) = finish_pics_item(name, done)? {
                            entries.push(entry);
                        }
                    }
                    field = None;
                }
                b"itemNumber" | b"support" => field = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if item.is_some() {
        return Err(ParseIssue::new(name, None, "unterminated <picsItem>"));
    }
    Ok(entries)
}

fn finish_pics_item(name: &str, item: PicsItem) -> Result<Option<CapabilityEntry>, ParseIssue> {
    let id = match item.number {
        Some(id) if !id.is_empty() => id,
        _ => {
            return Err(ParseIssue::new(
                name,
                Some(item.line),
                "<picsItem> without an <itemNumber>",
            ))
        }
    };
    let Some(support) = item.support.filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let enabled = match support.to_ascii_lowercase().as_str() {
        "true" | "1" => true,
        "false" | "0" => false,
        other => {
            return Err(ParseIssue::new(
                name,
                Some(item.line),
                format!("<support> of '{id}' must be true or false, got '{other}'"),
            ))
        }
    };
    Ok(Some(CapabilityEntry { id, enabled }))
}

/// Parse a YAML capability document
pub fn parse_capability_yaml(name: &str, content: &str) -> Result<Vec<CapabilityEntry>, ParseIssue> {
    let doc: Yaml = serde_yaml::from_str(content).map_err(|e| {
        let line = e.location().map(|loc| loc.line());
        ParseIssue::new(name, line, format!("malformed YAML: {e}"))
    })?;

    let mut entries = Vec::new();
    match doc {
        Yaml::Null => {}
        Yaml::Mapping(_) => flatten_yaml(name, "", &doc, &mut entries)?,
        _ => {
            return Err(ParseIssue::new(
                name,
                None,
                "expected a mapping of capability ids to true/false",
            ))
        }
    }
    Ok(entries)
}

fn flatten_yaml(
    name: &str,
    prefix: &str,
    value: &Yaml,
    out: &mut Vec<CapabilityEntry>,
) -> Result<(), ParseIssue> {
    match value {
        Yaml::Mapping(map) => {
            for (key, child) in map {
                let key = match key {
                    Yaml::String(s) => s.clone(),
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Bool(b) => b.to_string(),
                    _ => {
                        return Err(ParseIssue::new(
                            name,
                            None,
                            format!("non-scalar key under '{prefix}'"),
                        ))
                    }
                };
                let path = if prefix.is_empty() {
                    key
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_yaml(name, &path, child, out)?;
            }
            Ok(())
        }
        Yaml::Bool(enabled) => {
            out.push(CapabilityEntry {
                id: prefix.to_string(),
                enabled: *enabled,
            });
            Ok(())
        }
        Yaml::Null => Ok(()),
        Yaml::Tagged(tagged) => flatten_yaml(name, prefix, &tagged.value, out),
        _ => Err(ParseIssue::new(
            name,
            None,
            format!("capability '{prefix}' must be true or false"),
        )),
    }
}
