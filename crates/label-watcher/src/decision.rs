//! # Transition Decision Layer
//!
//! Decides whether an observed issue needs a label transition, performs it
//! through the tracker and records the outcome. State is written before
//! metrics; the two stores are never locked together.
//!
//! A route is eligible when its source label is on the issue, the issue has
//! no phase in flight, and (for forward routes) the phase has not already
//! completed. The rework route ignores completion: it exists to send a
//! finished issue back to an earlier phase.

use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::action::{ActionContext, ActionRegistry};
use crate::error::{ActionError, DecisionError};
use crate::metrics::LabelTransitionMetrics;
use crate::state::{IssueStateStore, IssueStatus};
use crate::tracker::{Issue, IssueTracker};
use crate::workflow::{Phase, Route, RouteKind, WorkflowLabels};

/// Why an observed issue needs no transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Issue has no tracker number
    MissingNumber,
    /// None of the watched labels is present
    NoTrackedLabel,
    /// A phase of the issue is already being processed
    AlreadyProcessing,
    /// The matching phase already completed
    AlreadyCompleted(Phase),
}

/// A transition the decider intends to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTransition {
    pub issue_number: u64,
    pub route: Route,
}

/// Outcome of [`TransitionDecider::decide`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Skip(SkipReason),
    Transition(PlannedTransition),
}

/// Result of a successful transition
#[derive(Debug)]
pub struct TransitionReport {
    pub issue_number: u64,
    pub phase: Phase,
    pub transition: String,
    pub current_labels: Vec<String>,
    /// Action outcome; `None` when no action ran
    pub action: Option<Result<(), ActionError>>,
}

/// Applies workflow routes to observed issues
pub struct TransitionDecider {
    tracker: Arc<dyn IssueTracker>,
    state: Arc<IssueStateStore>,
    metrics: Arc<LabelTransitionMetrics>,
    actions: ActionRegistry,
    routes: Vec<Route>,
}

impl TransitionDecider {
    #[must_use]
    pub fn new(
        tracker: Arc<dyn IssueTracker>,
        state: Arc<IssueStateStore>,
        metrics: Arc<LabelTransitionMetrics>,
        labels: &WorkflowLabels,
        actions: ActionRegistry,
    ) -> Self {
        Self {
            tracker,
            state,
            metrics,
            actions,
            routes: labels.routes(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &Arc<IssueStateStore> {
        &self.state
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<LabelTransitionMetrics> {
        &self.metrics
    }

    /// Decide what to do with an issue without touching any state
    #[must_use]
    pub fn decide(&self, issue: &Issue) -> Decision {
        let Some(issue_number) = issue.number else {
            return Decision::Skip(SkipReason::MissingNumber);
        };

        let mut matched: Option<&Route> = None;
        for route in &self.routes {
            if !issue.has_label(&route.from) {
                continue;
            }
            if route.kind == RouteKind::Forward
                && self.state.has_been_processed(issue_number, route.phase)
            {
                matched.get_or_insert(route);
                continue;
            }
            matched = Some(route);
            break;
        }

        let Some(route) = matched else {
            return Decision::Skip(SkipReason::NoTrackedLabel);
        };

        if self.state.is_processing(issue_number) {
            return Decision::Skip(SkipReason::AlreadyProcessing);
        }

        if route.kind == RouteKind::Forward
            && self.state.has_been_processed(issue_number, route.phase)
        {
            return Decision::Skip(SkipReason::AlreadyCompleted(route.phase));
        }

        Decision::Transition(PlannedTransition {
            issue_number,
            route: route.clone(),
        })
    }

    /// Decide and, when needed, perform the transition for an issue.
    ///
    /// Returns `Ok(None)` when no transition was needed. A tracker failure is
    /// recorded as `Failed` plus a metrics failure, the phase action still
    /// runs, and the error is returned carrying the action outcome.
    #[instrument(skip(self, issue), fields(issue_number = ?issue.number))]
    pub async fn process(&self, issue: &Issue) -> Result<Option<TransitionReport>, DecisionError> {
        let planned = match self.decide(issue) {
            Decision::Transition(planned) => planned,
            Decision::Skip(reason) => {
                debug!(?reason, "No transition needed");
                return Ok(None);
            }
        };

        let PlannedTransition {
            issue_number,
            route,
        } = planned;
        let transition = route.descriptor();

        // decide() only read the state; the claim re-checks under one write lock
        if !self.state.try_begin_processing(
            issue_number,
            route.phase,
            route.kind == RouteKind::Rework,
        ) {
            debug!(phase = %route.phase, "Issue claimed concurrently, skipping");
            return Ok(None);
        }

        info!(
            issue_number,
            phase = %route.phase,
            transition = %transition,
            "Attempting label transition"
        );

        let outcome = self
            .tracker
            .transition_label(issue_number, &route.from, &route.to)
            .await;

        let result = match outcome {
            Ok(applied) if applied.success => {
                self.record_success(issue_number, &route);
                self.metrics.record_success(issue_number, &transition);
                Ok(applied.current_labels)
            }
            Ok(_) => {
                let err = DecisionError::Rejected {
                    issue_number,
                    phase: route.phase,
                    transition: transition.clone(),
                    action: None,
                };
                self.record_failure(issue_number, &route, &transition, &err);
                Err(err)
            }
            Err(source) => {
                let err = DecisionError::Transition {
                    issue_number,
                    phase: route.phase,
                    transition: transition.clone(),
                    reason: source.failure_reason(),
                    source,
                    action: None,
                };
                self.record_failure(issue_number, &route, &transition, &err);
                Err(err)
            }
        };

        let action = if route.kind == RouteKind::Forward {
            self.run_action(&route, issue, result.is_ok()).await
        } else {
            None
        };

        let current_labels = match result {
            Ok(labels) => labels,
            Err(err) => return Err(err.with_action(action)),
        };
        Ok(Some(TransitionReport {
            issue_number,
            phase: route.phase,
            transition,
            current_labels,
            action,
        }))
    }

    fn record_success(&self, issue_number: u64, route: &Route) {
        match route.kind {
            RouteKind::Forward => {
                self.state.mark_as_completed(issue_number, route.phase);
            }
            RouteKind::Rework => {
                // Reopen the target phase and everything after it
                self.state
                    .set_state(issue_number, route.phase, IssueStatus::Pending);
                for phase in route.phase.later_phases() {
                    self.state.set_state(issue_number, phase, IssueStatus::Pending);
                }
            }
        }

        info!(
            issue_number,
            phase = %route.phase,
            "Label transition succeeded"
        );
    }

    fn record_failure(
        &self,
        issue_number: u64,
        route: &Route,
        transition: &str,
        err: &DecisionError,
    ) {
        let reason = err.failure_reason();
        self.state.mark_as_failed(issue_number, route.phase);
        self.metrics
            .record_failure(issue_number, transition, reason.as_str());

        warn!(
            issue_number,
            phase = %route.phase,
            transition,
            reason = %reason,
            error = %err,
            "Label transition failed"
        );
    }

    async fn run_action(
        &self,
        route: &Route,
        issue: &Issue,
        transitioned: bool,
    ) -> Option<Result<(), ActionError>> {
        let action = self.actions.get(route.phase);
        if !action.can_execute(Some(issue)) {
            debug!(action = action.name(), "Action not applicable");
            return None;
        }

        let ctx = ActionContext::for_route(route, transitioned);
        let result = action.execute(&ctx, Some(issue)).await;
        if let Err(e) = &result {
            error!(
                action = action.name(),
                phase = %route.phase,
                error = %e,
                "Phase action failed"
            );
        }
        Some(result)
    }
}
