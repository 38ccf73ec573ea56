//! # GitHub Issue Tracker Client
//!
//! REST client for the issue and label endpoints the watcher needs. Tracks
//! the `x-ratelimit-*` headers and refuses to send once the budget is spent.
//! Label transitions are applied with a conditional `PUT` guarded by the
//! issue's `ETag`, so a concurrent edit surfaces as
//! [`TrackerError::ConcurrentModification`] instead of being overwritten.

use async_trait::async_trait;
use reqwest::{
    header, Client as HttpClient, IntoUrl, Method, RequestBuilder, Response, StatusCode, Url,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::{Issue, IssueTracker, LabelTransition};
use crate::error::TrackerError;

const DEFAULT_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "label-watcher/0.1";
const PAGE_SIZE: &str = "100";
/// Upper bound on `Link: rel="next"` pages followed per label
const MAX_PAGES: usize = 50;

/// GitHub REST client scoped to a single repository
pub struct GitHubTracker {
    http_client: HttpClient,
    base_url: String,
    token: String,
    owner: String,
    repo: String,
    rate_limit: Mutex<RateLimit>,
}

#[derive(Debug, Clone, Copy)]
struct RateLimit {
    remaining: i64,
    reset_at: Option<Instant>,
}

#[derive(Debug, Deserialize)]
struct GitHubError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GitHubLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GitHubIssue {
    number: u64,
    title: String,
    state: String,
    #[serde(default)]
    labels: Vec<GitHubLabel>,
    html_url: Option<String>,
    pull_request: Option<serde_json::Value>,
}

impl From<GitHubIssue> for Issue {
    fn from(issue: GitHubIssue) -> Self {
        Self {
            number: Some(issue.number),
            title: issue.title,
            state: issue.state,
            labels: issue.labels.into_iter().map(|label| label.name).collect(),
            html_url: issue.html_url,
        }
    }
}

impl GitHubTracker {
    /// Create a client for `owner/repo` authenticated with `token`
    pub fn new(token: &str, owner: &str, repo: &str) -> Result<Self, TrackerError> {
        let http_client = HttpClient::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            base_url: DEFAULT_API_URL.to_string(),
            token: token.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            rate_limit: Mutex::new(RateLimit {
                remaining: 5000,
                reset_at: None,
            }),
        })
    }

    /// Point the client at a different API root (GitHub Enterprise, tests)
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// `owner/repo` this client is scoped to
    #[must_use]
    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.base_url, self.owner, self.repo, path
        )
    }

    /// Issue label URL with the label percent-encoded as one path segment
    fn label_url(&self, issue_number: u64, label: &str) -> Result<Url, TrackerError> {
        let mut url = Url::parse(&self.repo_url(&format!("issues/{issue_number}/labels")))
            .map_err(|e| TrackerError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| TrackerError::InvalidUrl(self.base_url.clone()))?
            .push(label);
        Ok(url)
    }

    fn request(&self, method: Method, url: impl IntoUrl) -> RequestBuilder {
        self.http_client
            .request(method, url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(header::ACCEPT, "application/vnd.github+json")
    }

    /// Send a request after checking the local rate limit budget
    async fn send(&self, request: RequestBuilder) -> Result<Response, TrackerError> {
        self.check_rate_limit()?;
        let response = request.send().await?;
        self.update_rate_limit(&response);
        Ok(response)
    }

    /// List open issues carrying a single label, following `Link: rel="next"`
    async fn list_issues_with_label(&self, label: &str) -> Result<Vec<GitHubIssue>, TrackerError> {
        let mut request = self
            .request(Method::GET, &self.repo_url("issues"))
            .query(&[("state", "open"), ("labels", label), ("per_page", PAGE_SIZE)]);
        let mut issues = Vec::new();

        for _ in 0..MAX_PAGES {
            let response = self.send(request).await?;
            if !response.status().is_success() {
                return Err(Self::error_from_response(response).await);
            }

            let next = Self::next_page_url(response.headers());
            let page: Vec<GitHubIssue> = response.json().await?;
            issues.extend(page);

            let Some(next) = next else {
                return Ok(issues);
            };
            request = self.request(Method::GET, &next);
        }

        warn!(
            label,
            pages = MAX_PAGES,
            fetched = issues.len(),
            "Stopped following issue pages; remaining issues are not observed"
        );
        Ok(issues)
    }

    /// Target of the `rel="next"` entry in a `Link` header
    fn next_page_url(headers: &header::HeaderMap) -> Option<String> {
        let link = headers.get(header::LINK)?.to_str().ok()?;
        link.split(',').find_map(|entry| {
            let (target, params) = entry.split_once(';')?;
            params
                .split(';')
                .any(|param| param.trim() == "rel=\"next\"")
                .then(|| {
                    target
                        .trim()
                        .trim_start_matches('<')
                        .trim_end_matches('>')
                        .to_string()
                })
        })
    }

    /// Get labels with the issue `ETag` for conditional updates
    async fn get_labels_with_etag(
        &self,
        issue_number: u64,
    ) -> Result<(Vec<String>, Option<String>), TrackerError> {
        let request = self.request(Method::GET, &self.repo_url(&format!("issues/{issue_number}")));
        let response = self.send(request).await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|h| h.to_str().ok())
            .map(ToString::to_string);

        let issue: GitHubIssue = response.json().await?;
        let labels = issue.labels.into_iter().map(|label| label.name).collect();
        Ok((labels, etag))
    }

    /// Labels after replacing `from` with `to`, sorted and deduplicated
    fn replace_label(current: &[String], from: &str, to: &str) -> Vec<String> {
        let mut labels: Vec<String> = current
            .iter()
            .filter(|label| label.as_str() != from)
            .cloned()
            .collect();
        labels.push(to.to_string());
        labels.sort();
        labels.dedup();
        labels
    }

    /// Map a non-success response to a tracker error
    async fn error_from_response(response: Response) -> TrackerError {
        let status = response.status();
        let rate_limited = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|h| h.to_str().ok())
            .is_some_and(|remaining| remaining == "0");
        let reset_in = Self::rate_limit_reset(&response);

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GitHubError>(&body)
            .map(|error| error.message)
            .unwrap_or(body);

        match status {
            StatusCode::UNAUTHORIZED => TrackerError::AuthenticationFailed,
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS if rate_limited => {
                TrackerError::RateLimitExceeded {
                    reset_in: reset_in.unwrap_or(Duration::from_secs(60)),
                }
            }
            StatusCode::FORBIDDEN => TrackerError::PermissionDenied(message),
            StatusCode::NOT_FOUND => TrackerError::NotFound(message),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                TrackerError::Timeout(message)
            }
            status => TrackerError::Api {
                status: status.as_u16(),
                message,
            },
        }
    }

    /// Refuse to send while the budget is spent and the window has not reset
    fn check_rate_limit(&self) -> Result<(), TrackerError> {
        let mut rate_limit = self.rate_limit.lock().unwrap_or_else(PoisonError::into_inner);
        if rate_limit.remaining > 0 {
            return Ok(());
        }

        match rate_limit.reset_at {
            Some(reset_at) if Instant::now() < reset_at => Err(TrackerError::RateLimitExceeded {
                reset_in: reset_at.saturating_duration_since(Instant::now()),
            }),
            Some(_) => {
                // Window has rolled over; let the next response refresh the budget
                rate_limit.remaining = 1;
                rate_limit.reset_at = None;
                Ok(())
            }
            None => Err(TrackerError::RateLimitExceeded {
                reset_in: Duration::from_secs(60),
            }),
        }
    }

    /// Update rate limit tracking from response headers
    fn update_rate_limit(&self, response: &Response) {
        let remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<i64>().ok());
        let reset_in = Self::rate_limit_reset(response);

        let mut rate_limit = self.rate_limit.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(remaining) = remaining {
            rate_limit.remaining = remaining;
            if remaining < 100 {
                warn!(remaining, "GitHub rate limit running low");
            }
        }
        if let Some(reset_in) = reset_in {
            rate_limit.reset_at = Some(Instant::now() + reset_in);
        }
    }

    /// Extract rate limit reset time from response
    fn rate_limit_reset(response: &Response) -> Option<Duration> {
        response
            .headers()
            .get("x-ratelimit-reset")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<i64>().ok())
            .map(|reset_timestamp| {
                let now = chrono::Utc::now().timestamp();
                #[allow(clippy::cast_sign_loss)]
                let seconds_until_reset = (reset_timestamp - now).max(0) as u64;
                Duration::from_secs(seconds_until_reset)
            })
    }
}

#[async_trait]
impl IssueTracker for GitHubTracker {
    #[instrument(skip(self), fields(repository = %self.repository()))]
    async fn list_issues(&self, labels: &[String]) -> Result<Vec<Issue>, TrackerError> {
        let mut issues: BTreeMap<u64, Issue> = BTreeMap::new();

        for label in labels {
            for issue in self.list_issues_with_label(label).await? {
                if issue.pull_request.is_some() {
                    continue;
                }
                issues.entry(issue.number).or_insert_with(|| issue.into());
            }
        }

        debug!("Found {} open issues across {} labels", issues.len(), labels.len());
        Ok(issues.into_values().collect())
    }

    #[instrument(skip(self))]
    async fn get_labels(&self, issue_number: u64) -> Result<Vec<String>, TrackerError> {
        let (labels, _) = self.get_labels_with_etag(issue_number).await?;
        debug!("Retrieved {} labels for issue #{}", labels.len(), issue_number);
        Ok(labels)
    }

    #[instrument(skip(self))]
    async fn add_labels(&self, issue_number: u64, labels: &[String]) -> Result<(), TrackerError> {
        if labels.is_empty() {
            return Ok(());
        }

        let request = self
            .request(
                Method::POST,
                &self.repo_url(&format!("issues/{issue_number}/labels")),
            )
            .json(&serde_json::json!({ "labels": labels }));
        let response = self.send(request).await?;

        if response.status().is_success() {
            info!("Added {} labels to issue #{}", labels.len(), issue_number);
            Ok(())
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    #[instrument(skip(self))]
    async fn remove_label(&self, issue_number: u64, label: &str) -> Result<(), TrackerError> {
        let request = self.request(Method::DELETE, self.label_url(issue_number, label)?);
        let response = self.send(request).await?;

        match response.status() {
            status if status.is_success() => {
                debug!("Removed label '{}' from issue #{}", label, issue_number);
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                debug!(
                    "Label '{}' not found on issue #{} (already removed)",
                    label, issue_number
                );
                Ok(())
            }
            _ => Err(Self::error_from_response(response).await),
        }
    }

    #[instrument(skip(self, body))]
    async fn create_comment(&self, issue_number: u64, body: &str) -> Result<(), TrackerError> {
        let request = self
            .request(
                Method::POST,
                &self.repo_url(&format!("issues/{issue_number}/comments")),
            )
            .json(&serde_json::json!({ "body": body }));
        let response = self.send(request).await?;

        if response.status().is_success() {
            debug!("Posted comment on issue #{}", issue_number);
            Ok(())
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    #[instrument(skip(self))]
    async fn transition_label(
        &self,
        issue_number: u64,
        from: &str,
        to: &str,
    ) -> Result<LabelTransition, TrackerError> {
        let (previous_labels, etag) = self.get_labels_with_etag(issue_number).await?;

        if !previous_labels.iter().any(|label| label == from) {
            warn!(
                "Label '{}' no longer present on issue #{}, not transitioning",
                from, issue_number
            );
            return Ok(LabelTransition {
                success: false,
                current_labels: previous_labels.clone(),
                previous_labels,
            });
        }

        let new_labels = Self::replace_label(&previous_labels, from, to);

        let mut request = self
            .request(
                Method::PUT,
                &self.repo_url(&format!("issues/{issue_number}/labels")),
            )
            .json(&serde_json::json!({ "labels": new_labels }));
        if let Some(etag) = etag {
            request = request.header(header::IF_MATCH, etag);
        }

        let response = self.send(request).await?;

        match response.status() {
            status if status.is_success() => {
                let labels: Vec<GitHubLabel> = response.json().await?;
                let current_labels = labels.into_iter().map(|label| label.name).collect();
                info!("Transitioned issue #{} from '{}' to '{}'", issue_number, from, to);
                Ok(LabelTransition {
                    success: true,
                    previous_labels,
                    current_labels,
                })
            }
            StatusCode::PRECONDITION_FAILED => {
                Err(TrackerError::ConcurrentModification(issue_number))
            }
            _ => Err(Self::error_from_response(response).await),
        }
    }
}
