use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures::stream::{self, Stream, TryStreamExt};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{ArchiveError, Listing, Result};
use crate::inventory::{GroupNode, RepositoryRecord};
use crate::retry::{RetryPolicy, Transient};
use crate::traversal::GroupSource;

/// GitLab caps `per_page` at 100.
const MAX_PER_PAGE: u32 = 100;
const MAX_ERROR_BODY_CHARS: usize = 300;
const NEXT_PAGE_HEADER: &str = "x-next-page";

/// Everything the client needs, passed explicitly at construction.
#[derive(Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: String,
    pub timeout: Duration,
    pub verify_ssl: bool,
    pub per_page: u32,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    pub fn from_config(config: &Config, token: String) -> Self {
        Self {
            base_url: config.gitlab.base_url.clone(),
            token,
            timeout: config.http_timeout(),
            verify_ssl: config.gitlab.verify_ssl,
            per_page: config.gitlab.per_page,
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("token", &"***")
            .field("timeout", &self.timeout)
            .field("verify_ssl", &self.verify_ssl)
            .field("per_page", &self.per_page)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Paginated client for the GitLab v4 group and project listing endpoints
#[derive(Clone)]
pub struct GitLabClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
    per_page: u32,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct ApiGroup {
    id: u64,
    full_path: String,
    parent_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApiProject {
    id: u64,
    path_with_namespace: String,
    http_url_to_repo: String,
    web_url: Option<String>,
    default_branch: Option<String>,
    #[serde(default)]
    archived: bool,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    username: String,
}

impl ApiGroup {
    fn into_node(self) -> std::result::Result<GroupNode, String> {
        let full_path = self.full_path.trim_matches('/').to_string();
        if full_path.is_empty() {
            return Err(format!("group {} has an empty full_path", self.id));
        }
        Ok(GroupNode {
            id: self.id,
            full_path,
            parent_id: self.parent_id,
        })
    }
}

impl ApiProject {
    fn into_record(self, token: &str) -> std::result::Result<RepositoryRecord, String> {
        let full_path = self.path_with_namespace.trim_matches('/').to_string();
        if full_path.is_empty() {
            return Err(format!("project {} has an empty path_with_namespace", self.id));
        }
        Ok(RepositoryRecord {
            id: self.id,
            full_path,
            fetch_url: embed_token(&self.http_url_to_repo, token),
            web_url: self.web_url,
            default_branch: self.default_branch,
            archived: self.archived,
        })
    }
}

/// A single failed HTTP exchange, before retry classification
#[derive(Debug)]
enum ApiFailure {
    Transport(reqwest::Error),
    Status {
        status: StatusCode,
        body: String,
        retry_after: Option<Duration>,
    },
    Decode(String),
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiFailure::Transport(e) => write!(f, "transport error: {}", e),
            ApiFailure::Status { status, body, .. } if body.is_empty() => write!(f, "HTTP {}", status),
            ApiFailure::Status { status, body, .. } => write!(f, "HTTP {}: {}", status, body),
            ApiFailure::Decode(e) => write!(f, "unexpected response body: {}", e),
        }
    }
}

impl Transient for ApiFailure {
    fn is_transient(&self) -> bool {
        match self {
            ApiFailure::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            ApiFailure::Status { status, .. } => {
                matches!(status.as_u16(), 408 | 429) || status.is_server_error()
            }
            ApiFailure::Decode(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiFailure::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl GitLabClient {
    /// Create a new GitLab client from an explicit configuration
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/'))
            .with_context(|| format!("Invalid GitLab base URL: {}", config.base_url))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("GitLab base URL must be http(s): {}", config.base_url));
        }
        if config.token.is_empty() {
            return Err(anyhow!("GitLab API token is required"));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .user_agent(concat!("glbak/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url,
            token: config.token,
            per_page: config.per_page.clamp(1, MAX_PER_PAGE),
            retry: config.retry,
        })
    }

    /// Resolve a group path to its stable numeric id.
    ///
    /// Any failure here means the run cannot start.
    pub async fn resolve_group(&self, path: &str) -> Result<GroupNode> {
        let trimmed = path.trim_matches('/');
        let unavailable = |reason: String| ArchiveError::RemoteUnavailable {
            path: path.to_string(),
            reason,
        };
        if trimmed.is_empty() {
            return Err(unavailable("group path is empty".to_string()));
        }

        let url = self.endpoint(&["groups", trimmed]);
        let label = format!("resolve group {}", trimmed);
        let (group, _) = self
            .retry
            .run(&label, None, || self.try_get::<ApiGroup>(url.clone()))
            .await
            .map_err(|exhausted| {
                unavailable(format!("{} (after {} attempt(s))", exhausted.error, exhausted.attempts))
            })?;

        let node = group.into_node().map_err(unavailable)?;
        debug!("Resolved group {} -> id {}", node.full_path, node.id);
        Ok(node)
    }

    /// Lazily page through the direct subgroups of `group`.
    pub fn subgroup_pages<'a>(
        &'a self,
        group: &'a GroupNode,
    ) -> impl Stream<Item = Result<Vec<GroupNode>>> + 'a {
        self.pages(group, Listing::Subgroups, ApiGroup::into_node)
    }

    /// Lazily page through the projects directly inside `group`, archived ones included.
    pub fn project_pages<'a>(
        &'a self,
        group: &'a GroupNode,
    ) -> impl Stream<Item = Result<Vec<RepositoryRecord>>> + 'a {
        let token = self.token.as_str();
        self.pages(group, Listing::Projects, move |raw: ApiProject| {
            raw.into_record(token)
        })
    }

    /// Username the token belongs to
    pub async fn current_user(&self) -> anyhow::Result<String> {
        let url = self.endpoint(&["user"]);
        let (user, _) = self
            .retry
            .run("current user", None, || self.try_get::<ApiUser>(url.clone()))
            .await
            .map_err(|exhausted| anyhow!("{}", exhausted.error))?;
        Ok(user.username)
    }

    fn pages<'a, T, R, F>(
        &'a self,
        group: &'a GroupNode,
        listing: Listing,
        convert: F,
    ) -> impl Stream<Item = Result<Vec<R>>> + 'a
    where
        T: DeserializeOwned + 'a,
        R: 'a,
        F: Fn(T) -> std::result::Result<R, String> + Copy + 'a,
    {
        stream::try_unfold(Some(1u32), move |page| async move {
            let Some(page) = page else {
                return Ok::<_, ArchiveError>(None);
            };

            let url = self.listing_url(group.id, listing, page);
            let label = format!("{} of {} page {}", listing, group.full_path, page);
            let (items, next_header) = self
                .retry
                .run(&label, None, || self.try_get::<Vec<T>>(url.clone()))
                .await
                .map_err(|exhausted| ArchiveError::PageFetchFailed {
                    group: group.full_path.clone(),
                    listing,
                    attempts: exhausted.attempts,
                    reason: exhausted.error.to_string(),
                })?;

            let next = self.next_page(page, items.len(), next_header.as_deref());
            let converted = items
                .into_iter()
                .map(convert)
                .collect::<std::result::Result<Vec<R>, String>>()
                .map_err(|reason| ArchiveError::PageFetchFailed {
                    group: group.full_path.clone(),
                    listing,
                    attempts: 1,
                    reason,
                })?;

            debug!(
                "Fetched {} {} of {} (page {}, next {:?})",
                converted.len(),
                listing,
                group.full_path,
                page,
                next
            );
            Ok::<_, ArchiveError>(Some((converted, next)))
        })
    }

    /// Decide the page after `page` from the `X-Next-Page` header.
    ///
    /// An empty header marks the last page. Without the header a short page
    /// ends the listing.
    fn next_page(&self, page: u32, item_count: usize, header: Option<&str>) -> Option<u32> {
        if item_count == 0 {
            return None;
        }
        let next = match header.map(str::trim) {
            Some("") => None,
            Some(value) => value.parse::<u32>().ok(),
            None if item_count >= self.per_page as usize => Some(page + 1),
            None => None,
        };
        next.filter(|n| *n > page)
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["api", "v4"]).extend(segments);
        }
        url
    }

    fn listing_url(&self, group_id: u64, listing: Listing, page: u32) -> Url {
        let id = group_id.to_string();
        let mut url = match listing {
            Listing::Subgroups => self.endpoint(&["groups", &id, "subgroups"]),
            Listing::Projects => self.endpoint(&["groups", &id, "projects"]),
        };
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("per_page", &self.per_page.to_string())
                .append_pair("page", &page.to_string());
            if listing == Listing::Projects {
                query
                    .append_pair("include_subgroups", "false")
                    .append_pair("with_shared", "false");
            }
        }
        url
    }

    async fn try_get<T: DeserializeOwned>(
        &self,
        url: Url,
    ) -> std::result::Result<(T, Option<String>), ApiFailure> {
        let response = self
            .http
            .get(url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(ApiFailure::Transport)?;

        let status = response.status();
        let next_page = header_string(response.headers(), NEXT_PAGE_HEADER);
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.map_err(ApiFailure::Transport)?;

        if !status.is_success() {
            return Err(ApiFailure::Status {
                status,
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
                retry_after,
            });
        }

        let value = serde_json::from_str(&body).map_err(|e| ApiFailure::Decode(e.to_string()))?;
        Ok((value, next_page))
    }
}

#[async_trait]
impl GroupSource for GitLabClient {
    async fn resolve_group(&self, path: &str) -> Result<GroupNode> {
        GitLabClient::resolve_group(self, path).await
    }

    async fn list_subgroups(&self, group: &GroupNode) -> Result<Vec<GroupNode>> {
        self.subgroup_pages(group).try_concat().await
    }

    async fn list_projects(&self, group: &GroupNode) -> Result<Vec<RepositoryRecord>> {
        let projects: Vec<RepositoryRecord> = self.project_pages(group).try_concat().await?;
        info!("Found {} projects in {}", projects.len(), group.full_path);
        Ok(projects)
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_string(headers, RETRY_AFTER.as_str())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Embed `token` as `oauth2:<token>@` in an HTTPS clone URL.
///
/// Non-HTTPS and unparsable URLs are returned unchanged.
pub fn embed_token(url: &str, token: &str) -> String {
    if token.is_empty() {
        return url.to_string();
    }
    match Url::parse(url) {
        Ok(mut parsed) if parsed.scheme() == "https" => {
            if parsed.set_username("oauth2").is_err() || parsed.set_password(Some(token)).is_err() {
                return url.to_string();
            }
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

/// Strip any userinfo from a URL for display.
pub fn redact_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) if !parsed.username().is_empty() || parsed.password().is_some() => {
            let _ = parsed.set_username("");
            let _ = parsed.set_password(None);
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

/// Replace the password embedded in `fetch_url` wherever it appears in `text`.
pub fn redact_credentials(text: &str, fetch_url: &str) -> String {
    let Some(secret) = Url::parse(fetch_url)
        .ok()
        .and_then(|u| u.password().map(|p| p.to_string()))
    else {
        return text.to_string();
    };
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(&secret, "***")
}
