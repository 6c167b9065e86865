//! Group tree traversal
//!
//! Walks a group and all of its descendant subgroups breadth-first and
//! flattens every project found into an [`Inventory`]. A group whose listing
//! fails is recorded as a [`DiscoveryGap`] and its subtree is skipped; the
//! rest of the tree is still walked.

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ArchiveError, Result};
use crate::inventory::{GroupNode, Inventory, RepositoryRecord};

/// Source of group and project listings.
///
/// Implemented by [`crate::gitlab::GitLabClient`]; tests substitute
/// in-memory trees.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GroupSource: Send + Sync {
    /// Resolve the root path. Errors here are fatal for the run.
    async fn resolve_group(&self, path: &str) -> Result<GroupNode>;

    /// Every direct subgroup of `group`, all pages collected
    async fn list_subgroups(&self, group: &GroupNode) -> Result<Vec<GroupNode>>;

    /// Every project directly inside `group`, all pages collected
    async fn list_projects(&self, group: &GroupNode) -> Result<Vec<RepositoryRecord>>;
}

/// A subtree that contributed nothing to the inventory.
#[derive(Debug)]
pub struct DiscoveryGap {
    /// Group path, or the repository path for a collision
    pub group_path: String,
    pub cause: ArchiveError,
}

/// Result of walking one root group.
#[derive(Debug)]
pub struct Discovery {
    pub root: GroupNode,
    pub inventory: Inventory,
    pub gaps: Vec<DiscoveryGap>,
    pub groups_visited: usize,
}

impl Discovery {
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }
}

type Visit = (GroupNode, Result<(Vec<GroupNode>, Vec<RepositoryRecord>)>);

pub struct GroupTraversal {
    source: Arc<dyn GroupSource>,
    max_parallel: usize,
}

impl GroupTraversal {
    pub fn new(source: Arc<dyn GroupSource>, max_parallel: usize) -> Self {
        Self {
            source,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Discover every repository under `root_path`.
    ///
    /// Only a failure to resolve the root itself is returned as `Err`.
    pub async fn discover(&self, root_path: &str) -> Result<Discovery> {
        let root = self.source.resolve_group(root_path).await?;
        info!("Discovering repositories under {} (id {})", root.full_path, root.id);

        let mut seen: HashSet<u64> = HashSet::from([root.id]);
        let mut queue: VecDeque<GroupNode> = VecDeque::from([root.clone()]);
        let mut in_flight = FuturesUnordered::new();

        let mut records = Vec::new();
        let mut gaps = Vec::new();
        let mut groups_visited = 0usize;

        loop {
            while in_flight.len() < self.max_parallel {
                let Some(group) = queue.pop_front() else {
                    break;
                };
                in_flight.push(visit(Arc::clone(&self.source), group));
            }

            let Some((group, listing)) = in_flight.next().await else {
                break;
            };
            groups_visited += 1;

            match listing {
                Ok((subgroups, projects)) => {
                    debug!(
                        "Group {}: {} subgroups, {} projects",
                        group.full_path,
                        subgroups.len(),
                        projects.len()
                    );
                    records.extend(projects);
                    for subgroup in subgroups {
                        if seen.insert(subgroup.id) {
                            queue.push_back(subgroup);
                        } else {
                            debug!("Skipping already queued group {}", subgroup.full_path);
                        }
                    }
                }
                Err(cause) => {
                    warn!("Skipping subtree {}: {}", group.full_path, cause);
                    gaps.push(DiscoveryGap {
                        group_path: group.full_path,
                        cause,
                    });
                }
            }
        }

        let (inventory, collisions) = Inventory::build(records);
        for cause in collisions {
            let group_path = match &cause {
                ArchiveError::PathCollision { path, .. } => path.clone(),
                _ => root.full_path.clone(),
            };
            warn!("{}", cause);
            gaps.push(DiscoveryGap { group_path, cause });
        }
        gaps.sort_by(|a, b| a.group_path.cmp(&b.group_path));

        info!(
            "Discovered {} repositories in {} groups ({} gaps)",
            inventory.len(),
            groups_visited,
            gaps.len()
        );

        Ok(Discovery {
            root,
            inventory,
            gaps,
            groups_visited,
        })
    }
}

/// List one group. Both listings must succeed for its projects to count.
async fn visit(source: Arc<dyn GroupSource>, group: GroupNode) -> Visit {
    let listing = futures::try_join!(source.list_subgroups(&group), source.list_projects(&group));
    (group, listing)
}
