//! Issue tracker abstraction.
//!
//! The decision layer and watcher only talk to the tracker through
//! [`IssueTracker`]; [`GitHubTracker`] is the REST implementation.

pub mod github;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

pub use github::GitHubTracker;

/// An issue as seen by the watcher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Tracker-assigned number; `None` for issues not yet created upstream
    pub number: Option<u64>,
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
}

impl Issue {
    #[must_use]
    pub fn new(number: u64, title: &str, labels: &[&str]) -> Self {
        Self {
            number: Some(number),
            title: title.to_string(),
            state: "open".to_string(),
            labels: labels.iter().map(ToString::to_string).collect(),
            html_url: None,
        }
    }

    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Result of a label transition on the tracker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelTransition {
    /// Whether the tracker applied the change
    pub success: bool,
    pub previous_labels: Vec<String>,
    pub current_labels: Vec<String>,
}

/// Operations the watcher needs from an issue tracker
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Open issues carrying any of `labels`, each issue listed once
    async fn list_issues(&self, labels: &[String]) -> Result<Vec<Issue>, TrackerError>;

    /// Current labels of an issue
    async fn get_labels(&self, issue_number: u64) -> Result<Vec<String>, TrackerError>;

    /// Add labels to an issue
    async fn add_labels(&self, issue_number: u64, labels: &[String]) -> Result<(), TrackerError>;

    /// Remove a label; removing an absent label succeeds
    async fn remove_label(&self, issue_number: u64, label: &str) -> Result<(), TrackerError>;

    /// Post a comment on an issue
    async fn create_comment(&self, issue_number: u64, body: &str) -> Result<(), TrackerError>;

    /// Replace `from` with `to` on an issue in a single update
    async fn transition_label(
        &self,
        issue_number: u64,
        from: &str,
        to: &str,
    ) -> Result<LabelTransition, TrackerError>;
}
