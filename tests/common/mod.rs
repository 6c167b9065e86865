//! Common test utilities and helpers for glbak tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tempfile::TempDir;

use glbak::error::Result as ArchiveResult;
use glbak::{ArchiveError, GroupNode, GroupSource, Listing, RepositoryRecord, RetryPolicy, SyncSettings};

/// Whether a usable `git` binary is on PATH.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run git with a fixed identity, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "glbak tests")
        .env("GIT_AUTHOR_EMAIL", "tests@glbak.invalid")
        .env("GIT_COMMITTER_NAME", "glbak tests")
        .env("GIT_COMMITTER_EMAIL", "tests@glbak.invalid")
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("HOME", dir)
        .output()
        .expect("Failed to execute git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// A bare "remote" repository with a working clone used to change it.
pub struct RemoteFixture {
    pub dir: TempDir,
}

impl RemoteFixture {
    /// Remote with `main`, a `feature` branch and a `v1.0` tag.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).expect("Failed to create work dir");

        git(&work, &["init", "-q"]);
        git(&work, &["checkout", "-q", "-b", "main"]);
        std::fs::write(work.join("README.md"), "# fixture\n").expect("Failed to write file");
        git(&work, &["add", "README.md"]);
        git(&work, &["-c", "commit.gpgsign=false", "commit", "-q", "-m", "initial"]);
        git(&work, &["branch", "feature"]);
        git(&work, &["tag", "v1.0"]);

        let remote = dir.path().join("remote.git");
        git(dir.path(), &["init", "-q", "--bare", "remote.git"]);
        git(&work, &["push", "-q", "--mirror", remote.to_str().expect("utf-8 path")]);

        Self { dir }
    }

    pub fn url(&self) -> String {
        self.dir.path().join("remote.git").to_string_lossy().into_owned()
    }

    fn work(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    fn publish(&self) {
        git(&self.work(), &["push", "-q", "--mirror", &self.url()]);
    }

    /// Add a commit on `main` and publish it.
    pub fn commit(&self, file: &str, content: &str) {
        let work = self.work();
        std::fs::write(work.join(file), content).expect("Failed to write file");
        git(&work, &["add", file]);
        git(&work, &["-c", "commit.gpgsign=false", "commit", "-q", "-m", file]);
        self.publish();
    }

    /// Delete a branch and a tag, then publish the deletions.
    pub fn delete_refs(&self, branch: &str, tag: &str) {
        let work = self.work();
        git(&work, &["branch", "-q", "-D", branch]);
        git(&work, &["tag", "-d", tag]);
        self.publish();
    }
}

/// `refname -> objectname` for every ref in a (bare) repository.
pub fn refs(git_dir: &Path) -> BTreeMap<String, String> {
    let out = git(
        git_dir,
        &["--git-dir", ".", "for-each-ref", "--format=%(refname) %(objectname)"],
    );
    out.lines()
        .filter_map(|line| line.split_once(' '))
        .map(|(name, oid)| (name.to_string(), oid.to_string()))
        .collect()
}

/// Every file and directory under `root` with file contents, for byte-level comparison.
pub fn snapshot_tree(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Option<Vec<u8>>>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let relative = path.strip_prefix(root).expect("under root").to_path_buf();
            if path.is_dir() {
                out.insert(relative, None);
                walk(root, &path, out);
            } else {
                out.insert(relative, Some(std::fs::read(&path).expect("Failed to read file")));
            }
        }
    }

    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

/// Sync settings with a fast retry policy for tests.
pub fn test_settings(archive_root: &Path) -> SyncSettings {
    SyncSettings {
        archive_root: archive_root.to_path_buf(),
        git_binary: "git".to_string(),
        timeout: Duration::from_secs(60),
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: 0.0,
        },
    }
}

pub fn record(id: u64, full_path: &str, fetch_url: &str) -> RepositoryRecord {
    RepositoryRecord {
        id,
        full_path: full_path.to_string(),
        fetch_url: fetch_url.to_string(),
        web_url: None,
        default_branch: Some("main".to_string()),
        archived: false,
    }
}

/// In-memory group tree standing in for the GitLab API.
#[derive(Default)]
pub struct FakeGroups {
    groups: HashMap<String, GroupNode>,
    children: HashMap<u64, Vec<GroupNode>>,
    projects: HashMap<u64, Vec<RepositoryRecord>>,
    failing: HashSet<u64>,
}

impl FakeGroups {
    pub fn group(mut self, id: u64, full_path: &str, parent_id: Option<u64>) -> Self {
        let node = GroupNode {
            id,
            full_path: full_path.to_string(),
            parent_id,
        };
        if let Some(parent) = parent_id {
            self.children.entry(parent).or_default().push(node.clone());
        }
        self.groups.insert(full_path.to_string(), node);
        self
    }

    pub fn project(mut self, group_id: u64, record: RepositoryRecord) -> Self {
        self.projects.entry(group_id).or_default().push(record);
        self
    }

    /// Make the project listing of `group_id` fail permanently.
    pub fn failing(mut self, group_id: u64) -> Self {
        self.failing.insert(group_id);
        self
    }
}

#[async_trait]
impl GroupSource for FakeGroups {
    async fn resolve_group(&self, path: &str) -> ArchiveResult<GroupNode> {
        self.groups
            .get(path)
            .cloned()
            .ok_or_else(|| ArchiveError::RemoteUnavailable {
                path: path.to_string(),
                reason: "HTTP 404 Not Found".to_string(),
            })
    }

    async fn list_subgroups(&self, group: &GroupNode) -> ArchiveResult<Vec<GroupNode>> {
        Ok(self.children.get(&group.id).cloned().unwrap_or_default())
    }

    async fn list_projects(&self, group: &GroupNode) -> ArchiveResult<Vec<RepositoryRecord>> {
        if self.failing.contains(&group.id) {
            return Err(ArchiveError::PageFetchFailed {
                group: group.full_path.clone(),
                listing: Listing::Projects,
                attempts: 4,
                reason: "HTTP 503 Service Unavailable".to_string(),
            });
        }
        Ok(self.projects.get(&group.id).cloned().unwrap_or_default())
    }
}

/// Assertion helpers for test validation
pub fn assert_contains_all(text: &str, expected: &[&str]) {
    for item in expected {
        assert!(
            text.contains(item),
            "Expected text to contain '{}', but it didn't. Text: {}",
            item,
            text
        );
    }
}
