//! Backend test case catalog
//!
//! Flattens the collection/suite/case tree into a list of cases that can be
//! looked up by id. Ids are compared after replacing `-` and `.` with `_`,
//! so `TC-ACE-1.1` and `TC_ACE_1_1` name the same case.

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;

use crate::backend::types::TestCollections;

/// One runnable test case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogCase {
    /// Id as the backend keys it
    pub id: String,
    pub title: String,
    pub collection: String,
    pub suite: String,
    pub parameters: BTreeSet<String>,
    pub required_capabilities: Vec<String>,
}

impl CatalogCase {
    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.contains(name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    cases: Vec<CatalogCase>,
    by_id: HashMap<String, usize>,
    capabilities: BTreeSet<String>,
}

/// Normalized form used for id comparison
pub fn normalize_id(id: &str) -> String {
    id.trim().replace(['-', '.'], "_")
}

/// `TC-XXX-1.1`, `TC_XXX_1_1`, `TC-XXX-1.1.2` and `-custom` suffixed ids
pub fn is_valid_test_id(id: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^TC[-_][A-Z_]{2,20}([-_.]\d+){2,3}(-custom)?$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(id.trim()))
}

/// Capability ids are dotted words, e.g. `ACL.S.A0000` or `MCORE.ROLE.COMMISSIONEE`
pub fn is_valid_capability_id(id: &str) -> bool {
    !id.is_empty()
        && id.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        })
}

impl Catalog {
    pub fn new(cases: Vec<CatalogCase>) -> Self {
        let mut by_id = HashMap::new();
        let mut capabilities = BTreeSet::new();
        for (idx, case) in cases.iter().enumerate() {
            let key = normalize_id(&case.id);
            if by_id.contains_key(&key) {
                tracing::debug!(id = %case.id, "Duplicate test case id in catalog, keeping first");
            } else {
                by_id.insert(key, idx);
            }
            capabilities.extend(case.required_capabilities.iter().cloned());
        }
        Self {
            cases,
            by_id,
            capabilities,
        }
    }

    pub fn from_collections(collections: &TestCollections) -> Self {
        let mut cases = Vec::new();
        for (collection_name, collection) in &collections.test_collections {
            for (suite_name, suite) in &collection.test_suites {
                for (case_id, entry) in &suite.test_cases {
                    cases.push(CatalogCase {
                        id: case_id.clone(),
                        title: entry.metadata.title.clone(),
                        collection: collection_name.clone(),
                        suite: suite_name.clone(),
                        parameters: entry.parameters.iter().cloned().collect(),
                        required_capabilities: entry.pics.clone(),
                    });
                }
            }
        }
        tracing::debug!(cases = cases.len(), "Loaded test catalog");
        Self::new(cases)
    }

    pub fn cases(&self) -> &[CatalogCase] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&CatalogCase> {
        self.by_id
            .get(&normalize_id(id))
            .and_then(|idx| self.cases.get(*idx))
    }

    /// Capability ids referenced by any case; empty when the backend does
    /// not publish requirements
    pub fn known_capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    /// Split `<case id>.<parameter>` at the longest id prefix the catalog knows
    pub fn split_case_path<'p>(&self, path: &'p str) -> Option<(&CatalogCase, &'p str)> {
        path.rmatch_indices('.').find_map(|(idx, _)| {
            let (prefix, rest) = (&path[..idx], &path[idx + 1..]);
            if rest.is_empty() {
                return None;
            }
            self.find(prefix).map(|case| (case, rest))
        })
    }
}
