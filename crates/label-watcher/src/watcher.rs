//! Polling watcher.
//!
//! Each cycle lists the issues carrying any watched label, reports every
//! observed issue to the detection callback, hands the issue to the
//! [`TransitionDecider`] and sweeps stale terminal state. Detection fires on
//! every observation; metrics only move when a transition is attempted.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::decision::TransitionDecider;
use crate::error::TrackerError;
use crate::metrics::LabelTransitionMetricsSnapshot;
use crate::tracker::{Issue, IssueTracker};

/// Called for every issue observed during a poll
pub type DetectionCallback = Arc<dyn Fn(&Issue) + Send + Sync>;

/// Timing knobs for a watcher
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub poll_interval: Duration,
    /// How long terminal issue state is kept after its last write
    pub state_retention: Duration,
    /// Log a metrics summary every this many cycles; `0` disables it
    pub summary_every_cycles: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            state_retention: Duration::from_secs(24 * 60 * 60),
            summary_every_cycles: 10,
        }
    }
}

/// Counts from a single poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub observed: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Terminal state entries removed by the cleanup sweep
    pub swept: usize,
}

impl PollReport {
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Polls one repository and drives its issues through the workflow
pub struct LabelWatcher {
    name: String,
    tracker: Arc<dyn IssueTracker>,
    decider: TransitionDecider,
    watched_labels: Vec<String>,
    settings: WatcherSettings,
    on_detect: Option<DetectionCallback>,
}

impl LabelWatcher {
    #[must_use]
    pub fn new(
        name: &str,
        tracker: Arc<dyn IssueTracker>,
        decider: TransitionDecider,
        watched_labels: Vec<String>,
        settings: WatcherSettings,
    ) -> Self {
        Self {
            name: name.to_string(),
            tracker,
            decider,
            watched_labels,
            settings,
            on_detect: None,
        }
    }

    /// Install the callback fired for every observed issue
    #[must_use]
    pub fn with_detection_callback(mut self, callback: DetectionCallback) -> Self {
        self.on_detect = Some(callback);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn decider(&self) -> &TransitionDecider {
        &self.decider
    }

    /// Run a single poll cycle
    #[instrument(skip(self), fields(watcher = %self.name))]
    pub async fn poll_once(&self) -> Result<PollReport, TrackerError> {
        let issues = self.tracker.list_issues(&self.watched_labels).await?;
        let mut report = PollReport {
            observed: issues.len(),
            ..PollReport::default()
        };

        for issue in &issues {
            if let Some(on_detect) = &self.on_detect {
                on_detect(issue);
            }

            match self.decider.process(issue).await {
                Ok(Some(_)) => report.succeeded += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    debug!(error = %e, "Transition failed, will retry next cycle");
                }
            }
        }

        report.swept = self
            .decider
            .state()
            .cleanup_old_states(self.settings.state_retention);

        debug!(
            observed = report.observed,
            attempted = report.attempted(),
            failed = report.failed,
            swept = report.swept,
            "Poll cycle finished"
        );
        Ok(report)
    }

    /// Poll until cancelled and return the final metrics snapshot
    pub async fn run(&self, cancel: CancellationToken) -> LabelTransitionMetricsSnapshot {
        info!(
            watcher = %self.name,
            labels = ?self.watched_labels,
            interval_secs = self.settings.poll_interval.as_secs(),
            "Starting label watcher"
        );

        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles: u64 = 0;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            cycles += 1;
            match self.poll_once().await {
                Ok(report) if report.attempted() > 0 => {
                    info!(
                        watcher = %self.name,
                        observed = report.observed,
                        succeeded = report.succeeded,
                        failed = report.failed,
                        "Processed label transitions"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(watcher = %self.name, error = %e, "Failed to fetch watched issues");
                }
            }

            if self.settings.summary_every_cycles > 0
                && cycles % self.settings.summary_every_cycles == 0
            {
                self.log_summary();
            }
        }

        warn!(watcher = %self.name, cycles, "Label watcher stopped");
        self.log_summary();
        self.decider.metrics().snapshot()
    }

    fn log_summary(&self) {
        let snapshot = self.decider.metrics().snapshot();
        info!(
            watcher = %self.name,
            total = snapshot.total_transitions,
            successful = snapshot.successful_transitions,
            failed = snapshot.failed_transitions,
            success_rate = %snapshot.success_rate_formatted(),
            top_failures = ?snapshot.top_failure_reasons(3),
            tracked_issues = self.decider.state().len(),
            "Label transition summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionRegistry;
    use crate::metrics::LabelTransitionMetrics;
    use crate::state::IssueStateStore;
    use crate::tracker::{LabelTransition, MockIssueTracker};
    use crate::workflow::WorkflowLabels;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn watcher(tracker: MockIssueTracker) -> LabelWatcher {
        let tracker: Arc<dyn IssueTracker> = Arc::new(tracker);
        let labels = WorkflowLabels::default();
        let decider = TransitionDecider::new(
            Arc::clone(&tracker),
            Arc::new(IssueStateStore::new()),
            Arc::new(LabelTransitionMetrics::new()),
            &labels,
            ActionRegistry::new(),
        );
        LabelWatcher::new(
            "acme/widgets",
            tracker,
            decider,
            labels.watched_labels(),
            WatcherSettings {
                poll_interval: Duration::from_millis(10),
                ..WatcherSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn test_repeated_polls_do_not_inflate_metrics() {
        let mut tracker = MockIssueTracker::new();
        tracker
            .expect_list_issues()
            .returning(|_| Ok(vec![Issue::new(1, "t", &["status:needs-plan"])]));
        tracker
            .expect_transition_label()
            .times(1)
            .returning(|_, _, to| {
                Ok(LabelTransition {
                    success: true,
                    previous_labels: vec![],
                    current_labels: vec![to.to_string()],
                })
            });

        let detected = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&detected);
        let watcher = watcher(tracker).with_detection_callback(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let first = watcher.poll_once().await.unwrap();
        let second = watcher.poll_once().await.unwrap();
        let third = watcher.poll_once().await.unwrap();

        assert_eq!(first.succeeded, 1);
        assert_eq!(second.skipped, 1);
        assert_eq!(third.attempted(), 0);
        assert_eq!(detected.load(Ordering::SeqCst), 3);
        assert_eq!(watcher.decider().metrics().total_transitions(), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let mut tracker = MockIssueTracker::new();
        tracker
            .expect_list_issues()
            .returning(|_| Err(TrackerError::AuthenticationFailed));

        let err = watcher(tracker).poll_once().await.unwrap_err();
        assert!(matches!(err, TrackerError::AuthenticationFailed));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let mut tracker = MockIssueTracker::new();
        tracker.expect_list_issues().returning(|_| Ok(vec![]));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let snapshot = watcher(tracker).run(cancel).await;
        assert_eq!(snapshot.total_transitions, 0);
    }
}
