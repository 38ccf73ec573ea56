//! Label-driven workflow automation for issue trackers.
//!
//! Humans tag issues with status labels (for example `status:needs-plan`);
//! the watcher notices the label, moves the issue to the phase's active label
//! (`status:planning`), runs the phase action and records the outcome.
//!
//! # Architecture
//!
//! - [`IssueStateStore`] tracks, per issue and phase, whether the phase is
//!   pending, processing, completed or failed
//! - [`LabelTransitionMetrics`] aggregates transition outcomes, failure reasons
//!   and transition types, with ranked reporting and snapshots
//! - [`TransitionDecider`] decides whether an observed issue needs a
//!   transition, performs it and records the result in both stores
//! - [`IssueTracker`] abstracts the tracker; [`GitHubTracker`] implements it
//!   over the GitHub REST API
//! - [`PhaseAction`] is the per-phase hook ([`NoopAction`], [`CommentAction`])
//! - [`LabelWatcher`] polls on an interval and drives the decider
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use label_watcher::{
//!     ActionRegistry, GitHubTracker, IssueStateStore, IssueTracker, LabelTransitionMetrics,
//!     LabelWatcher, TransitionDecider, WatcherSettings, WorkflowLabels,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let tracker: Arc<dyn IssueTracker> = Arc::new(GitHubTracker::new("token", "acme", "widgets")?);
//! let labels = WorkflowLabels::default();
//! let decider = TransitionDecider::new(
//!     Arc::clone(&tracker),
//!     Arc::new(IssueStateStore::new()),
//!     Arc::new(LabelTransitionMetrics::new()),
//!     &labels,
//!     ActionRegistry::new(),
//! );
//! let watcher = LabelWatcher::new(
//!     "acme/widgets",
//!     tracker,
//!     decider,
//!     labels.watched_labels(),
//!     WatcherSettings::default(),
//! );
//! let report = watcher.poll_once().await?;
//! println!("attempted {} transitions", report.attempted());
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod config;
pub mod decision;
pub mod error;
pub mod metrics;
pub mod state;
pub mod tracker;
pub mod watcher;
pub mod workflow;

pub use action::{ActionContext, ActionRegistry, CommentAction, NoopAction, PhaseAction};
pub use config::{RepositoryConfig, WatcherConfig};
pub use decision::{Decision, PlannedTransition, SkipReason, TransitionDecider, TransitionReport};
pub use error::{ActionError, ConfigError, DecisionError, FailureReason, TrackerError};
pub use metrics::{
    render_prometheus, transition_key, LabelTransitionMetrics, LabelTransitionMetricsSnapshot,
};
pub use state::{IssueState, IssueStateStore, IssueStatus};
pub use tracker::{GitHubTracker, Issue, IssueTracker, LabelTransition};
pub use watcher::{DetectionCallback, LabelWatcher, PollReport, WatcherSettings};
pub use workflow::{Phase, PhaseLabels, ReworkLabels, Route, RouteKind, WorkflowLabels};
