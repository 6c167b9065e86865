//! Error taxonomy for discovery and mirror synchronization.
//!
//! Only [`ArchiveError::RemoteUnavailable`] aborts a run. Every other variant
//! is caught at the repository or group boundary and turned into a failed
//! outcome or a discovery gap.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Which listing endpoint a page belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Listing {
    Subgroups,
    Projects,
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Listing::Subgroups => f.write_str("subgroups"),
            Listing::Projects => f.write_str("projects"),
        }
    }
}

/// The mirror operation chosen for a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorAction {
    /// `git clone --mirror` into a fresh target
    Create,
    /// `git fetch --prune` into an existing mirror
    Update,
    /// Inspecting an existing target before deciding to update it
    Verify,
}

impl fmt::Display for MirrorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorAction::Create => f.write_str("mirror-clone"),
            MirrorAction::Update => f.write_str("mirror-update"),
            MirrorAction::Verify => f.write_str("mirror-verify"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The root group could not be resolved. Fatal for the whole run.
    #[error("cannot resolve root group '{path}': {reason}")]
    RemoteUnavailable { path: String, reason: String },

    /// A listing page failed permanently or exhausted its retries.
    #[error("listing {listing} of group '{group}' failed after {attempts} attempt(s): {reason}")]
    PageFetchFailed {
        group: String,
        listing: Listing,
        attempts: u32,
        reason: String,
    },

    /// Two distinct remote repositories claim the same full path.
    #[error("repository {rejected_id} claims path '{path}' already held by repository {kept_id}")]
    PathCollision {
        path: String,
        kept_id: u64,
        rejected_id: u64,
    },

    /// The target exists on disk but is not a mirror of the expected remote.
    #[error("{} is not a mirror of {expected}: {reason}", path.display())]
    MirrorCorrupt {
        path: PathBuf,
        expected: String,
        reason: String,
    },

    /// `git` kept failing after the retry budget was spent.
    #[error("{action} failed after {attempts} attempt(s): {stderr}")]
    MirrorOperationFailed {
        action: MirrorAction,
        attempts: u32,
        stderr: String,
    },

    /// The repository path would map outside the archive root.
    #[error("repository path '{0}' cannot be mapped under the archive root")]
    UnsafePath(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The run was interrupted before every repository was started.
    #[error("run cancelled with {not_attempted} repositories not attempted")]
    Cancelled { not_attempted: usize },
}

impl ArchiveError {
    /// Stable machine-readable identifier used in JSON reports.
    pub fn code(&self) -> &'static str {
        match self {
            ArchiveError::RemoteUnavailable { .. } => "remote_unavailable",
            ArchiveError::PageFetchFailed { .. } => "page_fetch_failed",
            ArchiveError::PathCollision { .. } => "path_collision",
            ArchiveError::MirrorCorrupt { .. } => "mirror_corrupt",
            ArchiveError::MirrorOperationFailed { .. } => "mirror_operation_failed",
            ArchiveError::UnsafePath(_) => "unsafe_path",
            ArchiveError::Io { .. } => "io",
            ArchiveError::Cancelled { .. } => "cancelled",
        }
    }

    /// Whether this error must abort the run instead of being recorded.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ArchiveError::RemoteUnavailable { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArchiveError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
