//! Configuration resolver
//!
//! Merges capability declarations, properties files and command line
//! overrides into one [`TestSelection`]. The merge itself is a pure function
//! over its ordered inputs; the only I/O is the catalog fetch done once when
//! a [`Resolver`] is created.
//!
//! Precedence is strict. Files may only add values that are still unset;
//! two files that disagree are reported as a conflict naming both. Command
//! line flags are applied last and may replace file values.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use super::catalog::{is_valid_capability_id, is_valid_test_id, Catalog, CatalogCase};
use super::graph::{find_cycles, stable_topo_order};
use super::{
    CapabilityDeclaration, CliOverrides, Origin, ParamKey, PropertyOverrides, ResolvedValue,
    ScalarValue, SelectedCase, Target, TestSelection,
};
use crate::backend::Backend;
use crate::common::{Error, Result, ValidationIssue};

/// Run-level settings accepted in properties files and `--set`
pub const RUN_SETTINGS: &[&str] = &[
    "dut_config.pairing_mode",
    "dut_config.setup_code",
    "dut_config.discriminator",
    "dut_config.chip_use_paa_certs",
    "dut_config.trace_log",
    "network.wifi.ssid",
    "network.wifi.password",
    "network.thread.channel",
    "network.thread.panid",
    "network.thread.extpanid",
    "network.thread.networkkey",
    "network.thread.networkname",
    "network.thread.rcp_serial_path",
    "network.thread.rcp_baudrate",
    "network.thread.on_mesh_prefix",
    "network.thread.network_interface",
    "network.thread.operational_dataset_hex",
];

pub const VALID_PAIRING_MODES: &[&str] =
    &["onnetwork", "ble-wifi", "ble-thread", "wifipaf-wifi", "nfc-thread"];

const BOOL_SETTINGS: &[&str] = &["dut_config.chip_use_paa_certs", "dut_config.trace_log"];
const INT_SETTINGS: &[&str] = &[
    "dut_config.discriminator",
    "network.thread.channel",
    "network.thread.rcp_baudrate",
];

/// Resolves selections against a catalog fetched once from the backend
#[derive(Debug, Clone)]
pub struct Resolver {
    catalog: Catalog,
}

impl Resolver {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    /// Fetch the catalog and hold it for the resolver's lifetime
    pub async fn fetch(backend: &dyn Backend) -> Result<Self> {
        let collections = backend.catalog().await?;
        Ok(Self::new(Catalog::from_collections(&collections)))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn resolve(
        &self,
        capabilities: &[CapabilityDeclaration],
        properties: &[PropertyOverrides],
        cli: &CliOverrides,
    ) -> Result<TestSelection> {
        resolve(&self.catalog, capabilities, properties, cli).map_err(Error::Validation)
    }
}

/// Why a property path did not map to a parameter
enum PathError {
    Unknown,
    UnknownParameter { case: String, parameter: String },
}

/// Map a property path to its (target, parameter) tuple
fn resolve_path(catalog: &Catalog, path: &str) -> std::result::Result<ParamKey, PathError> {
    if RUN_SETTINGS.contains(&path) {
        return Ok(ParamKey::run(path));
    }
    if let Some(full) = expand_shorthand(path) {
        return Ok(ParamKey::run(full));
    }
    match catalog.split_case_path(path) {
        Some((case, parameter)) if case.has_parameter(parameter) => {
            Ok(ParamKey::case(&case.id, parameter))
        }
        Some((case, parameter)) => Err(PathError::UnknownParameter {
            case: case.id.clone(),
            parameter: parameter.to_string(),
        }),
        None => Err(PathError::Unknown),
    }
}

/// `ssid` or `network.ssid` -> `network.wifi.ssid`
fn expand_shorthand(path: &str) -> Option<&'static str> {
    let (prefix, last) = match path.rsplit_once('.') {
        Some((prefix, last)) => (prefix, last),
        None => ("", path),
    };
    RUN_SETTINGS.iter().copied().find(|setting| {
        setting.rsplit('.').next() == Some(last)
            && (prefix.is_empty() || setting.starts_with(&format!("{prefix}.")))
    })
}

fn path_issue(err: PathError, path: &str, origin: &Origin) -> ValidationIssue {
    match err {
        PathError::Unknown => ValidationIssue::UnknownProperty {
            path: path.to_string(),
            origin: origin.to_string(),
        },
        PathError::UnknownParameter { case, parameter } => ValidationIssue::UnknownParameter {
            case,
            parameter,
            origin: origin.to_string(),
        },
    }
}

/// Merge all inputs into a selection, or list every problem found
pub fn resolve(
    catalog: &Catalog,
    capabilities: &[CapabilityDeclaration],
    properties: &[PropertyOverrides],
    cli: &CliOverrides,
) -> std::result::Result<TestSelection, Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    let flags = merge_capabilities(catalog, capabilities, cli, &mut issues);
    let mut values = merge_properties(catalog, properties, cli, &mut issues);
    let selected = select_cases(catalog, &flags, cli, &mut issues);

    let selected_ids: HashSet<&str> = selected.iter().map(|c| c.id.as_str()).collect();
    let mut unselected = BTreeSet::new();
    for (key, slot) in &values {
        if let Target::Case(case) = &key.target {
            if !selected_ids.contains(case.as_str()) {
                unselected.insert((case.clone(), slot.origin.to_string()));
            }
        }
    }
    issues.extend(
        unselected
            .into_iter()
            .map(|(case, origin)| ValidationIssue::OverrideWithoutSelection { case, origin }),
    );

    let case_deps = substitute_references(catalog, &mut values, &mut issues);
    validate_run_settings(&values, &mut issues);

    if !issues.is_empty() {
        return Err(issues);
    }

    let order: Vec<String> = selected.iter().map(|c| c.id.clone()).collect();
    let order = stable_topo_order(&order, &case_deps);

    let by_id: HashMap<&str, &CatalogCase> = selected.iter().map(|c| (c.id.as_str(), *c)).collect();
    let mut cases = Vec::with_capacity(order.len());
    for id in &order {
        let Some(case) = by_id.get(id.as_str()) else {
            continue;
        };
        let parameters = values
            .iter()
            .filter(|(key, _)| key.case_id() == Some(id.as_str()))
            .map(|(key, slot)| (key.name.clone(), slot.clone()))
            .collect();
        cases.push(SelectedCase {
            id: case.id.clone(),
            collection: case.collection.clone(),
            suite: case.suite.clone(),
            parameters,
        });
    }

    let run_config = values
        .into_iter()
        .filter(|(key, _)| key.target == Target::Run)
        .map(|(key, slot)| (key.name, slot))
        .collect();

    Ok(TestSelection {
        cases,
        capabilities: flags.into_iter().map(|(id, (on, _))| (id, on)).collect(),
        run_config,
    })
}

fn merge_capabilities(
    catalog: &Catalog,
    declarations: &[CapabilityDeclaration],
    cli: &CliOverrides,
    issues: &mut Vec<ValidationIssue>,
) -> BTreeMap<String, (bool, Origin)> {
    // only the cluster prefix has to be known to the catalog
    let clusters: BTreeSet<&str> = catalog
        .known_capabilities()
        .iter()
        .map(|id| cluster_of(id))
        .collect();
    let is_known = |id: &str| {
        is_valid_capability_id(id) && (clusters.is_empty() || clusters.contains(cluster_of(id)))
    };
    let from_cli: HashSet<&str> = cli.capabilities.iter().map(|(id, _)| id.as_str()).collect();

    let mut flags: BTreeMap<String, (bool, Origin)> = BTreeMap::new();
    for decl in declarations {
        let mut seen = HashSet::new();
        for entry in &decl.entries {
            if !is_known(&entry.id) {
                issues.push(ValidationIssue::UnknownCapability {
                    id: entry.id.clone(),
                    origin: decl.origin.to_string(),
                });
                continue;
            }
            if !seen.insert(entry.id.as_str()) {
                issues.push(ValidationIssue::DuplicateCapability {
                    id: entry.id.clone(),
                    origin: decl.origin.to_string(),
                });
                continue;
            }
            match flags.get_mut(&entry.id) {
                None => {
                    flags.insert(entry.id.clone(), (entry.enabled, decl.origin.clone()));
                }
                Some((enabled, origin)) if *enabled == entry.enabled => {
                    *origin = decl.origin.clone();
                }
                Some((_, origin)) if from_cli.contains(entry.id.as_str()) => {
                    tracing::info!(
                        capability = %entry.id,
                        "{} and {} disagree, command line decides",
                        origin,
                        decl.origin
                    );
                }
                Some((enabled, origin)) => issues.push(ValidationIssue::CapabilityConflict {
                    id: entry.id.clone(),
                    first_source: origin.to_string(),
                    first_value: *enabled,
                    second_source: decl.origin.to_string(),
                    second_value: entry.enabled,
                }),
            }
        }
    }

    for (id, enabled) in &cli.capabilities {
        if !is_known(id) {
            issues.push(ValidationIssue::UnknownCapability {
                id: id.clone(),
                origin: Origin::CommandLine.to_string(),
            });
            continue;
        }
        if let Some((previous, origin)) = flags.get(id) {
            if previous != enabled {
                tracing::info!(
                    capability = %id,
                    from = %origin,
                    "Command line sets {} to {}",
                    id,
                    enabled
                );
            }
        }
        flags.insert(id.clone(), (*enabled, Origin::CommandLine));
    }
    flags
}

fn merge_properties(
    catalog: &Catalog,
    files: &[PropertyOverrides],
    cli: &CliOverrides,
    issues: &mut Vec<ValidationIssue>,
) -> BTreeMap<ParamKey, ResolvedValue> {
    let mut values: BTreeMap<ParamKey, ResolvedValue> = BTreeMap::new();
    let from_cli: HashSet<ParamKey> = cli
        .properties
        .iter()
        .filter_map(|(path, _)| resolve_path(catalog, path).ok())
        .collect();

    for file in files {
        let mut first_line: HashMap<ParamKey, usize> = HashMap::new();
        for entry in &file.entries {
            let key = match resolve_path(catalog, &entry.path) {
                Ok(key) => key,
                Err(err) => {
                    issues.push(path_issue(err, &entry.path, &file.origin));
                    continue;
                }
            };
            if let Some(first) = first_line.get(&key) {
                issues.push(ValidationIssue::DuplicateProperty {
                    path: key.to_string(),
                    origin: file.origin.to_string(),
                    first_line: *first,
                    second_line: entry.line,
                });
                continue;
            }
            first_line.insert(key.clone(), entry.line);

            match values.get_mut(&key) {
                None => {
                    values.insert(
                        key,
                        ResolvedValue {
                            value: entry.value.clone(),
                            origin: file.origin.clone(),
                        },
                    );
                }
                Some(slot) if slot.value == entry.value => slot.origin = file.origin.clone(),
                Some(slot) if from_cli.contains(&key) => {
                    tracing::info!(
                        "{} and {} disagree on {}, command line decides",
                        slot.origin,
                        file.origin,
                        key
                    );
                }
                Some(slot) => issues.push(ValidationIssue::ParameterConflict {
                    target: key.to_string(),
                    first_source: slot.origin.to_string(),
                    first_value: slot.value.to_string(),
                    second_source: file.origin.to_string(),
                    second_value: entry.value.to_string(),
                }),
            }
        }
    }

    for (path, value) in &cli.properties {
        let key = match resolve_path(catalog, path) {
            Ok(key) => key,
            Err(err) => {
                issues.push(path_issue(err, path, &Origin::CommandLine));
                continue;
            }
        };
        if let Some(previous) = values.get(&key) {
            if previous.value != *value {
                tracing::info!(
                    "Command line overrides {} = '{}' from {} with '{}'",
                    key,
                    previous.value,
                    previous.origin,
                    value
                );
            }
        }
        values.insert(
            key,
            ResolvedValue {
                value: value.clone(),
                origin: Origin::CommandLine,
            },
        );
    }
    values
}

/// First dotted segment of a capability id, e.g. `ACE` for `ACE.S.A0000`
fn cluster_of(id: &str) -> &str {
    id.split('.').next().unwrap_or(id)
}

fn select_cases<'c>(
    catalog: &'c Catalog,
    flags: &BTreeMap<String, (bool, Origin)>,
    cli: &CliOverrides,
    issues: &mut Vec<ValidationIssue>,
) -> Vec<&'c CatalogCase> {
    let mut selected: Vec<&CatalogCase> = Vec::new();
    let mut seen = HashSet::new();
    let before = issues.len();

    if cli.has_explicit_tests() {
        let listed = cli.tests_list.iter().map(|id| (id, true));
        let json = cli.selected_tests.iter().map(|id| (id, false));
        for (id, check_format) in listed.chain(json) {
            if check_format && !is_valid_test_id(id) {
                issues.push(ValidationIssue::InvalidTestId { id: id.clone() });
                continue;
            }
            match catalog.find(id) {
                Some(case) => {
                    if seen.insert(case.id.as_str()) {
                        selected.push(case);
                    }
                }
                None => issues.push(ValidationIssue::UnknownTestCase { id: id.clone() }),
            }
        }
    } else {
        let enabled = |id: &String| flags.get(id).is_some_and(|(on, _)| *on);
        selected.extend(catalog.cases().iter().filter(|case| {
            !case.required_capabilities.is_empty()
                && case.required_capabilities.iter().all(enabled)
        }));
        tracing::debug!(count = selected.len(), "Selected test cases by capability");
    }

    if selected.is_empty() && issues.len() == before {
        issues.push(ValidationIssue::EmptySelection);
    }
    selected
}

/// Replace `${path}` values with the value they point at
///
/// Returns, per case, the other cases its parameters read from.
fn substitute_references(
    catalog: &Catalog,
    values: &mut BTreeMap<ParamKey, ResolvedValue>,
    issues: &mut Vec<ValidationIssue>,
) -> BTreeMap<String, BTreeSet<String>> {
    let mut edges: BTreeMap<ParamKey, Vec<ParamKey>> = BTreeMap::new();
    for (key, slot) in values.iter() {
        let Some(reference) = slot.value.reference() else {
            continue;
        };
        match resolve_path(catalog, reference) {
            Ok(target) if values.contains_key(&target) => {
                edges.insert(key.clone(), vec![target]);
            }
            _ => issues.push(ValidationIssue::DanglingReference {
                from: key.to_string(),
                to: reference.to_string(),
            }),
        }
    }

    let cycles = find_cycles(&edges);
    if !cycles.is_empty() {
        issues.extend(cycles.into_iter().map(|cycle| ValidationIssue::CircularReference {
            cycle: cycle.iter().map(ToString::to_string).collect(),
        }));
        return BTreeMap::new();
    }

    let mut case_deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut substituted = Vec::new();
    for (from, targets) in &edges {
        let mut current = &targets[0];
        // chains are acyclic here, so this ends within edges.len() hops
        for _ in 0..=edges.len() {
            match edges.get(current) {
                Some(next) => current = &next[0],
                None => break,
            }
        }
        if let Some(literal) = values.get(current) {
            substituted.push((from.clone(), literal.value.clone()));
        }
        if let (Some(a), Some(b)) = (from.case_id(), targets[0].case_id()) {
            if a != b {
                case_deps
                    .entry(a.to_string())
                    .or_default()
                    .insert(b.to_string());
            }
        }
    }
    for (key, value) in substituted {
        if let Some(slot) = values.get_mut(&key) {
            slot.value = value;
        }
    }
    case_deps
}

fn validate_run_settings(
    values: &BTreeMap<ParamKey, ResolvedValue>,
    issues: &mut Vec<ValidationIssue>,
) {
    for (key, slot) in values {
        if key.target != Target::Run || slot.value.reference().is_some() {
            continue;
        }
        let path = key.name.as_str();
        let reason = if path == "dut_config.pairing_mode" {
            match &slot.value {
                ScalarValue::Str(mode) if VALID_PAIRING_MODES.contains(&mode.as_str()) => None,
                other => Some(format!(
                    "'{}' is not a pairing mode (expected one of: {})",
                    other,
                    VALID_PAIRING_MODES.join(", ")
                )),
            }
        } else if BOOL_SETTINGS.contains(&path) {
            slot.value
                .as_bool()
                .is_none()
                .then(|| format!("expected true or false, got '{}'", slot.value))
        } else if INT_SETTINGS.contains(&path) {
            (!matches!(slot.value, ScalarValue::Int(_)))
                .then(|| format!("expected an integer, got '{}'", slot.value))
        } else {
            None
        };
        if let Some(reason) = reason {
            issues.push(ValidationIssue::InvalidValue {
                path: path.to_string(),
                origin: slot.origin.to_string(),
                reason,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::catalog::fixtures;
    use crate::selection::{CapabilityEntry, PropertyEntry};
    use proptest::prelude::*;

    fn file(name: &str, entries: &[(&str, ScalarValue)]) -> PropertyOverrides {
        PropertyOverrides {
            origin: Origin::File(name.to_string()),
            entries: entries
                .iter()
                .enumerate()
                .map(|(idx, (path, value))| PropertyEntry {
                    path: path.to_string(),
                    value: value.clone(),
                    line: idx + 1,
                })
                .collect(),
        }
    }

    fn caps(name: &str, entries: &[(&str, bool)]) -> CapabilityDeclaration {
        CapabilityDeclaration {
            origin: Origin::File(name.to_string()),
            entries: entries
                .iter()
                .map(|(id, enabled)| CapabilityEntry {
                    id: id.to_string(),
                    enabled: *enabled,
                })
                .collect(),
        }
    }

    fn tests(ids: &[&str]) -> CliOverrides {
        CliOverrides {
            tests_list: ids.iter().map(|s| s.to_string()).collect(),
            ..CliOverrides::default()
        }
    }

    fn int(i: i64) -> ScalarValue {
        ScalarValue::Int(i)
    }

    fn text(s: &str) -> ScalarValue {
        ScalarValue::Str(s.to_string())
    }

    #[test]
    fn test_explicit_tests_in_order_without_duplicates() {
        let sel = resolve(
            &fixtures::catalog(),
            &[],
            &[],
            &tests(&["TC-OO-2.1", "TC_ACE_1_1", "TC-OO-2.1"]),
        )
        .unwrap();
        assert_eq!(sel.case_ids(), vec!["TC-OO-2.1", "TC-ACE-1.1"]);
    }

    #[test]
    fn test_capabilities_select_applicable_cases() {
        let declared = caps("pics.xml", &[("ACE.S", true), ("OO.S", true), ("ACE.S.F01", false)]);
        let sel = resolve(&fixtures::catalog(), &[declared], &[], &CliOverrides::default()).unwrap();
        assert_eq!(sel.case_ids(), vec!["TC-ACE-1.1", "TC-OO-2.1"]);
        assert_eq!(sel.capabilities.get("ACE.S.F01"), Some(&false));
    }

    #[test]
    fn test_empty_selection_is_rejected() {
        let issues = resolve(&fixtures::catalog(), &[], &[], &CliOverrides::default()).unwrap_err();
        assert_eq!(issues, vec![ValidationIssue::EmptySelection]);
    }

    #[test]
    fn test_unknown_and_malformed_test_ids() {
        let issues =
            resolve(&fixtures::catalog(), &[], &[], &tests(&["TC-ZZZ-9.9", "bogus"])).unwrap_err();
        assert_eq!(
            issues,
            vec![
                ValidationIssue::UnknownTestCase {
                    id: "TC-ZZZ-9.9".to_string()
                },
                ValidationIssue::InvalidTestId {
                    id: "bogus".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_flipping_capability_between_files_conflicts() {
        let a = caps("a.xml", &[("ACE.S", true)]);
        let b = caps("b.xml", &[("ACE.S", false)]);
        let issues =
            resolve(&fixtures::catalog(), &[a, b], &[], &tests(&["TC-ACE-1.1"])).unwrap_err();
        assert_eq!(
            issues,
            vec![ValidationIssue::CapabilityConflict {
                id: "ACE.S".to_string(),
                first_source: "a.xml".to_string(),
                first_value: true,
                second_source: "b.xml".to_string(),
                second_value: false,
            }]
        );
    }

    #[test]
    fn test_duplicate_and_unknown_capabilities() {
        let a = caps("a.xml", &[("ACE.S", true), ("ACE.S", true), ("NOPE.S", true)]);
        let issues = resolve(&fixtures::catalog(), &[a], &[], &tests(&["TC-ACE-1.1"])).unwrap_err();
        assert_eq!(issues.len(), 2);
        assert!(matches!(issues[0], ValidationIssue::DuplicateCapability { .. }));
        assert!(matches!(issues[1], ValidationIssue::UnknownCapability { .. }));
    }

    #[test]
    fn test_items_outside_requirements_are_accepted() {
        let a = caps("ACE.xml", &[("ACE.S", true), ("ACE.S.A0000", true), ("ACE.S.C00.Rsp", false)]);
        let sel = resolve(&fixtures::catalog(), &[a], &[], &tests(&["TC-ACE-1.1"])).unwrap();
        assert_eq!(sel.capabilities.get("ACE.S.A0000"), Some(&true));
        assert_eq!(sel.capabilities.get("ACE.S.C00.Rsp"), Some(&false));
    }

    #[test]
    fn test_cli_capability_settles_file_conflict() {
        let a = caps("a.xml", &[("ACE.S", true)]);
        let b = caps("b.xml", &[("ACE.S", false)]);
        let cli = CliOverrides {
            capabilities: vec![("ACE.S".to_string(), false)],
            ..tests(&["TC-OO-2.1"])
        };
        let sel = resolve(&fixtures::catalog(), &[a, b], &[], &cli).unwrap();
        assert_eq!(sel.capabilities.get("ACE.S"), Some(&false));
    }

    #[test]
    fn test_cli_capability_overrides_file() {
        let a = caps("a.xml", &[("ACE.S", false)]);
        let cli = CliOverrides {
            capabilities: vec![("ACE.S".to_string(), true)],
            ..CliOverrides::default()
        };
        let sel = resolve(&fixtures::catalog(), &[a], &[], &cli).unwrap();
        assert_eq!(sel.case_ids(), vec!["TC-ACE-1.1"]);
    }

    #[test]
    fn test_conflicting_parameter_names_both_sources() {
        let a = file("a.properties", &[("TC-ACE-1.1.endpoint", int(1))]);
        let b = file("b.properties", &[("TC-ACE-1.1.endpoint", int(2))]);
        let issues = resolve(&fixtures::catalog(), &[], &[a, b], &tests(&["TC-ACE-1.1"])).unwrap_err();
        assert_eq!(
            issues,
            vec![ValidationIssue::ParameterConflict {
                target: "TC-ACE-1.1.endpoint".to_string(),
                first_source: "a.properties".to_string(),
                first_value: "1".to_string(),
                second_source: "b.properties".to_string(),
                second_value: "2".to_string(),
            }]
        );
    }

    #[test]
    fn test_cli_value_settles_file_conflict() {
        let a = file("a.properties", &[("TC-ACE-1.1.endpoint", int(1))]);
        let b = file("b.properties", &[("TC-ACE-1.1.endpoint", int(2))]);
        let mut cli = tests(&["TC-ACE-1.1"]);
        cli.properties.push(("TC_ACE_1_1.endpoint".to_string(), int(3)));
        let sel = resolve(&fixtures::catalog(), &[], &[a, b], &cli).unwrap();
        let endpoint = &sel.case("TC-ACE-1.1").unwrap().parameters["endpoint"];
        assert_eq!(endpoint.value, int(3));
        assert_eq!(endpoint.origin, Origin::CommandLine);
    }

    #[test]
    fn test_equal_values_move_provenance() {
        let a = file("a.properties", &[("TC-ACE-1.1.endpoint", int(1))]);
        let b = file("b.properties", &[("TC_ACE_1_1.endpoint", int(1))]);
        let sel = resolve(&fixtures::catalog(), &[], &[a, b], &tests(&["TC-ACE-1.1"])).unwrap();
        let endpoint = &sel.case("TC-ACE-1.1").unwrap().parameters["endpoint"];
        assert_eq!(endpoint.origin, Origin::File("b.properties".to_string()));
    }

    #[test]
    fn test_unknown_parameter_and_property() {
        let a = file(
            "a.properties",
            &[("TC-ACE-1.1.speed", int(1)), ("dut_config.colour", text("red"))],
        );
        let issues = resolve(&fixtures::catalog(), &[], &[a], &tests(&["TC-ACE-1.1"])).unwrap_err();
        assert_eq!(
            issues,
            vec![
                ValidationIssue::UnknownParameter {
                    case: "TC-ACE-1.1".to_string(),
                    parameter: "speed".to_string(),
                    origin: "a.properties".to_string(),
                },
                ValidationIssue::UnknownProperty {
                    path: "dut_config.colour".to_string(),
                    origin: "a.properties".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_duplicate_key_in_one_file() {
        let a = file("a.properties", &[("ssid", text("x")), ("network.wifi.ssid", text("x"))]);
        let issues = resolve(&fixtures::catalog(), &[], &[a], &tests(&["TC-ACE-1.1"])).unwrap_err();
        assert_eq!(
            issues,
            vec![ValidationIssue::DuplicateProperty {
                path: "network.wifi.ssid".to_string(),
                origin: "a.properties".to_string(),
                first_line: 1,
                second_line: 2,
            }]
        );
    }

    #[test]
    fn test_shorthand_keys_expand() {
        let a = file(
            "a.properties",
            &[("ssid", text("lab")), ("network.panid", text("0x1234")), ("setup_code", text("20202021"))],
        );
        let sel = resolve(&fixtures::catalog(), &[], &[a], &tests(&["TC-ACE-1.1"])).unwrap();
        assert!(sel.run_config.contains_key("network.wifi.ssid"));
        assert!(sel.run_config.contains_key("network.thread.panid"));
        assert!(sel.run_config.contains_key("dut_config.setup_code"));
    }

    #[test]
    fn test_invalid_run_setting_values() {
        let a = file(
            "a.properties",
            &[
                ("dut_config.pairing_mode", text("carrier-pigeon")),
                ("dut_config.trace_log", text("sometimes")),
                ("dut_config.discriminator", text("abc")),
            ],
        );
        let issues = resolve(&fixtures::catalog(), &[], &[a], &tests(&["TC-ACE-1.1"])).unwrap_err();
        assert_eq!(issues.len(), 3);
        assert!(issues
            .iter()
            .all(|i| matches!(i, ValidationIssue::InvalidValue { .. })));
    }

    #[test]
    fn test_override_without_selection() {
        let a = file("a.properties", &[("TC-OO-2.1.endpoint", int(1))]);
        let issues = resolve(&fixtures::catalog(), &[], &[a], &tests(&["TC-ACE-1.1"])).unwrap_err();
        assert_eq!(
            issues,
            vec![ValidationIssue::OverrideWithoutSelection {
                case: "TC-OO-2.1".to_string(),
                origin: "a.properties".to_string(),
            }]
        );
    }

    #[test]
    fn test_two_node_reference_cycle() {
        let a = file(
            "a.properties",
            &[
                ("TC-ACE-1.1.endpoint", text("${TC-OO-2.1.endpoint}")),
                ("TC-OO-2.1.endpoint", text("${TC-ACE-1.1.endpoint}")),
            ],
        );
        let issues = resolve(
            &fixtures::catalog(),
            &[],
            &[a],
            &tests(&["TC-ACE-1.1", "TC-OO-2.1"]),
        )
        .unwrap_err();
        assert_eq!(
            issues,
            vec![ValidationIssue::CircularReference {
                cycle: vec![
                    "TC-ACE-1.1.endpoint".to_string(),
                    "TC-OO-2.1.endpoint".to_string(),
                    "TC-ACE-1.1.endpoint".to_string(),
                ]
            }]
        );
    }

    #[test]
    fn test_four_node_reference_cycle() {
        let a = file(
            "a.properties",
            &[
                ("TC-ACE-1.1.endpoint", text("${TC-ACE-1.1.timeout}")),
                ("TC-ACE-1.1.timeout", text("${TC-ACE-1.2.endpoint}")),
                ("TC-ACE-1.2.endpoint", text("${TC-OO-2.1.delay}")),
                ("TC-OO-2.1.delay", text("${TC-ACE-1.1.endpoint}")),
            ],
        );
        let issues = resolve(
            &fixtures::catalog(),
            &[],
            &[a],
            &tests(&["TC-ACE-1.1", "TC-ACE-1.2", "TC-OO-2.1"]),
        )
        .unwrap_err();
        assert_eq!(issues.len(), 1);
        match &issues[0] {
            ValidationIssue::CircularReference { cycle } => {
                assert_eq!(cycle.len(), 5);
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.contains(&"TC-OO-2.1.delay".to_string()));
            }
            other => panic!("Expected CircularReference, got {other:?}"),
        }
    }

    #[test]
    fn test_references_substitute_and_order_cases() {
        let a = file(
            "a.properties",
            &[
                ("TC-ACE-1.1.endpoint", text("${TC-OO-2.1.endpoint}")),
                ("TC-OO-2.1.endpoint", text("${TC-OO-2.1.delay}")),
                ("TC-OO-2.1.delay", int(7)),
            ],
        );
        let sel = resolve(
            &fixtures::catalog(),
            &[],
            &[a],
            &tests(&["TC-ACE-1.1", "TC-ACE-1.2", "TC-OO-2.1"]),
        )
        .unwrap();
        assert_eq!(sel.case_ids(), vec!["TC-OO-2.1", "TC-ACE-1.1", "TC-ACE-1.2"]);
        assert_eq!(sel.case("TC-ACE-1.1").unwrap().parameters["endpoint"].value, int(7));
    }

    #[test]
    fn test_dangling_reference() {
        let a = file("a.properties", &[("TC-ACE-1.1.endpoint", text("${TC-ACE-1.1.timeout}"))]);
        let issues = resolve(&fixtures::catalog(), &[], &[a], &tests(&["TC-ACE-1.1"])).unwrap_err();
        assert_eq!(
            issues,
            vec![ValidationIssue::DanglingReference {
                from: "TC-ACE-1.1.endpoint".to_string(),
                to: "TC-ACE-1.1.timeout".to_string(),
            }]
        );
    }

    #[test]
    fn test_all_problems_reported_together() {
        let a = file("a.properties", &[("nope", int(1)), ("TC-ACE-1.1.speed", int(1))]);
        let b = caps("b.xml", &[("BAD ID", true)]);
        let issues = resolve(&fixtures::catalog(), &[b], &[a], &tests(&["TC-ZZZ-1.1"])).unwrap_err();
        assert_eq!(issues.len(), 4);
    }

    proptest! {
        #[test]
        fn prop_cli_always_wins(file_value in -1000i64..1000, cli_value in -1000i64..1000) {
            let a = file("a.properties", &[("TC-ACE-1.1.endpoint", int(file_value))]);
            let mut cli = tests(&["TC-ACE-1.1"]);
            cli.properties.push(("TC-ACE-1.1.endpoint".to_string(), int(cli_value)));
            let sel = resolve(&fixtures::catalog(), &[], &[a], &cli).unwrap();
            let resolved = &sel.case("TC-ACE-1.1").unwrap().parameters["endpoint"];
            prop_assert_eq!(&resolved.value, &int(cli_value));
            prop_assert_eq!(&resolved.origin, &Origin::CommandLine);
        }

        #[test]
        fn prop_files_conflict_only_on_different_values(x in 0i64..20, y in 0i64..20) {
            let a = file("a.properties", &[("TC-ACE-1.1.endpoint", int(x))]);
            let b = file("b.properties", &[("TC-ACE-1.1.endpoint", int(y))]);
            let result = resolve(&fixtures::catalog(), &[], &[a, b], &tests(&["TC-ACE-1.1"]));
            if x == y {
                let sel = result.unwrap();
                let resolved = &sel.case("TC-ACE-1.1").unwrap().parameters["endpoint"];
                prop_assert_eq!(&resolved.origin, &Origin::File("b.properties".to_string()));
            } else {
                let issues = result.unwrap_err();
                prop_assert_eq!(issues.len(), 1);
                let is_conflict = matches!(issues[0], ValidationIssue::ParameterConflict { .. });
                prop_assert!(is_conflict);
            }
        }

        #[test]
        fn prop_capability_order_is_irrelevant_without_conflicts(flip in any::<bool>()) {
            let a = caps("a.xml", &[("ACE.S", true)]);
            let b = caps("b.xml", &[("OO.S", true)]);
            let inputs = if flip { vec![a, b] } else { vec![b, a] };
            let sel = resolve(&fixtures::catalog(), &inputs, &[], &CliOverrides::default()).unwrap();
            prop_assert_eq!(sel.case_ids(), vec!["TC-ACE-1.1", "TC-OO-2.1"]);
        }
    }
}
