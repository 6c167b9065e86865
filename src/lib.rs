//! glbak - GitLab group archiver
//!
//! Mirrors every repository under a GitLab group, including all nested
//! subgroups, into a local directory tree of bare mirror repositories.
//! Repeated runs update the mirrors in place.
//!
//! ## Modules
//!
//! - [`gitlab`]: paginated GitLab v4 API client
//! - [`traversal`]: breadth-first walk of the group tree into an [`Inventory`]
//! - [`mirror`]: `git clone --mirror` / `git fetch --prune` per repository
//! - [`coordinator`]: runs discovery then synchronization and builds the [`RunReport`]
//! - [`progress`]: terminal progress bars per top-level subgroup
//! - [`config`]: YAML configuration with environment overrides

pub mod config;
pub mod coordinator;
pub mod error;
pub mod gitlab;
pub mod health;
pub mod inventory;
pub mod mirror;
pub mod progress;
pub mod retry;
pub mod traversal;

pub use config::Config;
pub use coordinator::{Counts, FailureEntry, RunCoordinator, RunReport};
pub use error::{ArchiveError, Listing, MirrorAction};
pub use gitlab::{ClientConfig, GitLabClient};
pub use health::HealthCheck;
pub use inventory::{GroupNode, Inventory, RepositoryRecord};
pub use mirror::{LocalMirrorTarget, MirrorSynchronizer, OutcomeKind, SyncOutcome, SyncSettings};
pub use retry::RetryPolicy;
pub use traversal::{Discovery, DiscoveryGap, GroupSource, GroupTraversal};
