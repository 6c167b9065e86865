//! Group and repository records, and the deduplicated inventory handed from
//! discovery to synchronization.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;

use crate::error::ArchiveError;
use crate::gitlab::redact_url;

/// One group or subgroup on the hosting service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GroupNode {
    pub id: u64,
    /// Slash-separated, case-preserving, never empty.
    pub full_path: String,
    pub parent_id: Option<u64>,
}

/// One remote repository reachable under the root group.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryRecord {
    pub id: u64,
    /// `path_with_namespace`, e.g. `acme/team-a/backend`
    pub full_path: String,
    /// Credential-bearing clone URL. Never logged or serialized as is.
    #[serde(skip)]
    pub fetch_url: String,
    pub web_url: Option<String>,
    pub default_branch: Option<String>,
    pub archived: bool,
}

impl RepositoryRecord {
    /// Clone URL with any embedded credentials stripped.
    pub fn display_url(&self) -> String {
        redact_url(&self.fetch_url)
    }
}

impl fmt::Debug for RepositoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryRecord")
            .field("id", &self.id)
            .field("full_path", &self.full_path)
            .field("fetch_url", &self.display_url())
            .field("default_branch", &self.default_branch)
            .field("archived", &self.archived)
            .finish()
    }
}

/// Repositories deduplicated by id and sorted by full path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    records: Vec<RepositoryRecord>,
}

impl Inventory {
    /// Build an inventory from raw listings, in any order and with duplicates.
    ///
    /// The first record seen for an id wins. When distinct ids claim the same
    /// path, the lowest id keeps it and every other claimant is returned as a
    /// [`ArchiveError::PathCollision`] instead of being merged.
    pub fn build(records: impl IntoIterator<Item = RepositoryRecord>) -> (Self, Vec<ArchiveError>) {
        let mut by_id: BTreeMap<u64, RepositoryRecord> = BTreeMap::new();
        for record in records {
            by_id.entry(record.id).or_insert(record);
        }

        let mut owners: HashMap<String, u64> = HashMap::with_capacity(by_id.len());
        let mut kept = Vec::with_capacity(by_id.len());
        let mut collisions = Vec::new();

        for (id, record) in by_id {
            match owners.get(&record.full_path) {
                Some(&kept_id) => collisions.push(ArchiveError::PathCollision {
                    path: record.full_path.clone(),
                    kept_id,
                    rejected_id: id,
                }),
                None => {
                    owners.insert(record.full_path.clone(), id);
                    kept.push(record);
                }
            }
        }

        kept.sort_by(|a, b| a.full_path.cmp(&b.full_path));
        (Self { records: kept }, collisions)
    }

    pub fn records(&self) -> &[RepositoryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RepositoryRecord> {
        self.records.iter()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.full_path.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a Inventory {
    type Item = &'a RepositoryRecord;
    type IntoIter = std::slice::Iter<'a, RepositoryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
