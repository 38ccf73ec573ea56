//! In-memory issue tracker shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use label_watcher::{Issue, IssueTracker, LabelTransition, TrackerError};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

/// Tracker backed by a map of issues.
///
/// Errors pushed with [`FakeTracker::fail_next_transition`] are returned, in
/// order, by the next `transition_label` calls.
#[derive(Default)]
pub struct FakeTracker {
    issues: Mutex<BTreeMap<u64, Issue>>,
    transition_failures: Mutex<VecDeque<TrackerError>>,
    comments: Mutex<Vec<(u64, String)>>,
}

impl FakeTracker {
    pub fn with_issues(issues: Vec<Issue>) -> Self {
        let tracker = Self::default();
        for issue in issues {
            tracker.insert(issue);
        }
        tracker
    }

    pub fn insert(&self, issue: Issue) {
        let number = issue.number.expect("fake issues need a number");
        self.issues.lock().unwrap().insert(number, issue);
    }

    pub fn set_labels(&self, issue_number: u64, labels: &[&str]) {
        let mut issues = self.issues.lock().unwrap();
        let issue = issues.get_mut(&issue_number).expect("unknown issue");
        issue.labels = labels.iter().map(ToString::to_string).collect();
    }

    pub fn labels(&self, issue_number: u64) -> Vec<String> {
        self.issues.lock().unwrap()[&issue_number].labels.clone()
    }

    pub fn fail_next_transition(&self, error: TrackerError) {
        self.transition_failures.lock().unwrap().push_back(error);
    }

    pub fn comments(&self) -> Vec<(u64, String)> {
        self.comments.lock().unwrap().clone()
    }

    fn not_found(issue_number: u64) -> TrackerError {
        TrackerError::NotFound(format!("issue #{issue_number}"))
    }
}

#[async_trait]
impl IssueTracker for FakeTracker {
    async fn list_issues(&self, labels: &[String]) -> Result<Vec<Issue>, TrackerError> {
        Ok(self
            .issues
            .lock()
            .unwrap()
            .values()
            .filter(|issue| labels.iter().any(|label| issue.has_label(label)))
            .cloned()
            .collect())
    }

    async fn get_labels(&self, issue_number: u64) -> Result<Vec<String>, TrackerError> {
        self.issues
            .lock()
            .unwrap()
            .get(&issue_number)
            .map(|issue| issue.labels.clone())
            .ok_or_else(|| Self::not_found(issue_number))
    }

    async fn add_labels(&self, issue_number: u64, labels: &[String]) -> Result<(), TrackerError> {
        let mut issues = self.issues.lock().unwrap();
        let issue = issues
            .get_mut(&issue_number)
            .ok_or_else(|| Self::not_found(issue_number))?;
        for label in labels {
            if !issue.has_label(label) {
                issue.labels.push(label.clone());
            }
        }
        Ok(())
    }

    async fn remove_label(&self, issue_number: u64, label: &str) -> Result<(), TrackerError> {
        if let Some(issue) = self.issues.lock().unwrap().get_mut(&issue_number) {
            issue.labels.retain(|l| l != label);
        }
        Ok(())
    }

    async fn create_comment(&self, issue_number: u64, body: &str) -> Result<(), TrackerError> {
        self.comments
            .lock()
            .unwrap()
            .push((issue_number, body.to_string()));
        Ok(())
    }

    async fn transition_label(
        &self,
        issue_number: u64,
        from: &str,
        to: &str,
    ) -> Result<LabelTransition, TrackerError> {
        if let Some(error) = self.transition_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let mut issues = self.issues.lock().unwrap();
        let issue = issues
            .get_mut(&issue_number)
            .ok_or_else(|| Self::not_found(issue_number))?;
        let previous_labels = issue.labels.clone();

        if !issue.has_label(from) {
            return Ok(LabelTransition {
                success: false,
                current_labels: previous_labels.clone(),
                previous_labels,
            });
        }

        issue.labels.retain(|l| l != from);
        if !issue.has_label(to) {
            issue.labels.push(to.to_string());
        }

        Ok(LabelTransition {
            success: true,
            previous_labels,
            current_labels: issue.labels.clone(),
        })
    }
}
