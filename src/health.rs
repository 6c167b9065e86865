//! Preflight checks for `glbak doctor`
//!
//! Verifies that git runs, the token is accepted by GitLab, and the archive
//! root is usable before any backup is attempted.

use std::path::Path;
use tokio::process::Command as AsyncCommand;

use crate::config::Config;
use crate::gitlab::{ClientConfig, GitLabClient};

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Git installation status
    pub git: CheckResult,
    /// GitLab token status
    pub gitlab_auth: CheckResult,
    /// Archive root status
    pub archive_root: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all health checks
    pub async fn run(config: &Config) -> Self {
        Self {
            git: Self::check_git(&config.sync.git_binary).await,
            gitlab_auth: Self::check_gitlab_auth(config).await,
            archive_root: Self::check_archive_root(&config.archive_root_path()),
        }
    }

    /// Check if all checks passed (warnings count as passed)
    pub fn all_passed(&self) -> bool {
        self.all_checks().iter().all(|(_, r)| r.passed)
    }

    /// Get list of failed checks
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| !r.passed)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| r.is_warning)
            .collect()
    }

    async fn check_git(git_binary: &str) -> CheckResult {
        match AsyncCommand::new(git_binary).arg("--version").output().await {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                CheckResult::ok_with_details("Git installed", version.trim().to_string())
            }
            Ok(output) => CheckResult::error_with_details(
                "Git command failed",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ),
            Err(_) => CheckResult::error_with_details(
                format!("{} not found in PATH", git_binary),
                "Install git: https://git-scm.com/downloads",
            ),
        }
    }

    /// Check the token is present and accepted
    async fn check_gitlab_auth(config: &Config) -> CheckResult {
        let token = match config.token() {
            Ok(token) => token,
            Err(e) => {
                return CheckResult::error_with_details(
                    "GitLab token missing",
                    format!("{}\nCreate a token with read_api and read_repository scopes", e),
                )
            }
        };

        let client = match GitLabClient::new(ClientConfig::from_config(config, token)) {
            Ok(client) => client,
            Err(e) => return CheckResult::error_with_details("Invalid GitLab settings", e.to_string()),
        };

        match client.current_user().await {
            Ok(username) => CheckResult::ok_with_details(
                "GitLab authentication successful",
                format!("Username: {} ({})", username, config.gitlab.base_url),
            ),
            Err(e) => CheckResult::error_with_details(
                "GitLab authentication failed",
                format!("{}: {}", config.gitlab.base_url, e),
            ),
        }
    }

    /// The archive root must exist or be creatable under a writable ancestor.
    fn check_archive_root(path: &Path) -> CheckResult {
        if path.is_dir() {
            return match std::fs::metadata(path) {
                Ok(meta) if meta.permissions().readonly() => CheckResult::error_with_details(
                    "Archive root is read-only",
                    path.display().to_string(),
                ),
                Ok(_) => CheckResult::ok_with_details("Archive root exists", path.display().to_string()),
                Err(e) => CheckResult::error_with_details("Archive root is not accessible", e.to_string()),
            };
        }
        if path.exists() {
            return CheckResult::error_with_details(
                "Archive root is not a directory",
                path.display().to_string(),
            );
        }

        match path.ancestors().skip(1).find(|a| a.exists()) {
            Some(ancestor) if ancestor.is_dir() => CheckResult::warning_with_details(
                "Archive root does not exist yet",
                format!("{} will be created on first backup", path.display()),
            ),
            _ => CheckResult::error_with_details(
                "Archive root cannot be created",
                format!("Run: mkdir -p {}", path.display()),
            ),
        }
    }

    /// Get all checks as a slice for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 3] {
        [
            ("Git Installation", &self.git),
            ("GitLab Authentication", &self.gitlab_auth),
            ("Archive Root", &self.archive_root),
        ]
    }
}
