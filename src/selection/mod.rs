//! Test selection inputs and the resolved selection
//!
//! Readers turn capability declaration files and properties files into the
//! plain structures defined here; the resolver merges them with command line
//! overrides into one [`TestSelection`].

pub mod capability;
pub mod catalog;
pub mod graph;
pub mod properties;
pub mod resolver;

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::{json, Map, Value};

pub use catalog::{Catalog, CatalogCase};
pub use resolver::{resolve, Resolver};

/// Where a capability flag or property value came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Origin {
    /// An input file, by the path given on the command line
    File(String),
    /// A `--set` or `--capability` flag
    CommandLine,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{path}"),
            Self::CommandLine => write!(f, "command line"),
        }
    }
}

impl Serialize for Origin {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A scalar property value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ScalarValue {
    /// Parse a raw `value` from `key=value`
    ///
    /// `true`/`false` become booleans, numbers become integers or floats.
    /// Double-quoted text is always a string, which keeps values like a
    /// setup code `"00123"` intact.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
            return Self::Str(raw[1..raw.len() - 1].to_string());
        }
        match raw {
            "true" | "True" | "TRUE" => return Self::Bool(true),
            "false" | "False" | "FALSE" => return Self::Bool(false),
            _ => {}
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Self::Int(i);
        }
        if raw.contains('.') {
            if let Ok(f) = raw.parse::<f64>() {
                if f.is_finite() {
                    return Self::Float(f);
                }
            }
        }
        Self::Str(raw.to_string())
    }

    /// The referenced property path, for values of the form `${path}`
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::Str(s) => s
                .strip_prefix("${")
                .and_then(|rest| rest.strip_suffix('}'))
                .map(str::trim)
                .filter(|path| !path.is_empty()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => json!(i),
            Self::Float(f) => json!(f),
            Self::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

/// One capability flag from a declaration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityEntry {
    pub id: String,
    pub enabled: bool,
}

/// Capability flags declared by one file, in file order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityDeclaration {
    pub origin: Origin,
    pub entries: Vec<CapabilityEntry>,
}

/// One `key=value` line from a properties file
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyEntry {
    /// Dotted path, including any `[section]` prefix
    pub path: String,
    pub value: ScalarValue,
    /// 1-based line number
    pub line: usize,
}

/// Property overrides from one properties file, in file order
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyOverrides {
    pub origin: Origin,
    pub entries: Vec<PropertyEntry>,
}

/// Selection and overrides given directly on the command line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOverrides {
    /// Ids from `--tests-list`; must look like `TC-XXX-1.1`
    pub tests_list: Vec<String>,
    /// Ids taken from a `--selected-tests` JSON document
    pub selected_tests: Vec<String>,
    /// `--set PATH=VALUE`
    pub properties: Vec<(String, ScalarValue)>,
    /// `--capability ID=BOOL`
    pub capabilities: Vec<(String, bool)>,
}

impl CliOverrides {
    pub fn has_explicit_tests(&self) -> bool {
        !self.tests_list.is_empty() || !self.selected_tests.is_empty()
    }
}

/// What a property path configures
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    /// A parameter of one test case
    Case(String),
    /// A run-level setting (device under test, network)
    Run,
}

/// A (target, parameter) tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamKey {
    pub target: Target,
    /// Parameter name for cases; full dotted path for run settings
    pub name: String,
}

impl ParamKey {
    pub fn case(case: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            target: Target::Case(case.into()),
            name: name.into(),
        }
    }

    pub fn run(path: impl Into<String>) -> Self {
        Self {
            target: Target::Run,
            name: path.into(),
        }
    }

    pub fn case_id(&self) -> Option<&str> {
        match &self.target {
            Target::Case(id) => Some(id),
            Target::Run => None,
        }
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Target::Case(case) => write!(f, "{}.{}", case, self.name),
            Target::Run => write!(f, "{}", self.name),
        }
    }
}

/// A final value together with the source that supplied it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedValue {
    pub value: ScalarValue,
    pub origin: Origin,
}

/// A selected test case with its parameter overrides
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedCase {
    pub id: String,
    pub collection: String,
    pub suite: String,
    pub parameters: BTreeMap<String, ResolvedValue>,
}

/// The resolved, validated request for one test run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestSelection {
    /// Ordered, deduplicated test cases
    pub cases: Vec<SelectedCase>,
    /// Every explicitly declared capability flag
    pub capabilities: BTreeMap<String, bool>,
    /// Run-level settings keyed by dotted path
    pub run_config: BTreeMap<String, ResolvedValue>,
}

impl TestSelection {
    pub fn case_ids(&self) -> Vec<&str> {
        self.cases.iter().map(|c| c.id.as_str()).collect()
    }

    pub fn case(&self, id: &str) -> Option<&SelectedCase> {
        self.cases.iter().find(|c| c.id == id)
    }

    /// Enabled capability flags
    pub fn enabled_capabilities(&self) -> impl Iterator<Item = &str> {
        self.capabilities
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(id, _)| id.as_str())
    }

    /// `{collection: {suite: {case: iterations}}}` as the backend expects it
    pub fn selected_tests_payload(&self) -> Value {
        let mut collections = Map::new();
        for case in &self.cases {
            let suites = collections
                .entry(case.collection.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(suites) = suites {
                let cases = suites
                    .entry(case.suite.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(cases) = cases {
                    cases.insert(case.id.clone(), json!(1));
                }
            }
        }
        Value::Object(collections)
    }

    /// Run configuration document: run settings nested by path segment,
    /// test parameters per case and capability flags
    pub fn config_payload(&self) -> Value {
        let mut root = Map::new();
        for (path, resolved) in &self.run_config {
            insert_nested(&mut root, path, resolved.value.to_json());
        }

        let mut parameters = Map::new();
        for case in &self.cases {
            if case.parameters.is_empty() {
                continue;
            }
            let values: Map<String, Value> = case
                .parameters
                .iter()
                .map(|(name, resolved)| (name.clone(), resolved.value.to_json()))
                .collect();
            parameters.insert(case.id.clone(), Value::Object(values));
        }
        if !parameters.is_empty() {
            root.insert("test_parameters".to_string(), Value::Object(parameters));
        }

        if !self.capabilities.is_empty() {
            root.insert("pics".to_string(), self.pics_payload());
        }
        Value::Object(root)
    }

    /// Capability flags grouped by cluster (the id's first segment)
    fn pics_payload(&self) -> Value {
        let mut clusters = Map::new();
        for (id, enabled) in &self.capabilities {
            let cluster = id.split('.').next().unwrap_or(id.as_str());
            let entry = clusters
                .entry(cluster.to_string())
                .or_insert_with(|| json!({"name": cluster, "items": {}}));
            if let Some(Value::Object(items)) = entry.get_mut("items") {
                items.insert(id.clone(), json!({"number": id, "enabled": enabled}));
            }
        }
        json!({ "clusters": clusters })
    }
}

fn insert_nested(root: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return;
    };
    let mut current = root;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.to_string(), value);
}
