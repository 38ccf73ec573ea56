//! Per-phase actions.
//!
//! An action runs after the decision layer attempts to move an issue into a
//! phase. Actions are looked up by phase in an [`ActionRegistry`]; phases
//! without a registered action fall back to [`NoopAction`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::ActionError;
use crate::tracker::{Issue, IssueTracker};
use crate::workflow::{Phase, Route};

/// What the action is being run for
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub phase: Phase,
    pub from_label: String,
    pub to_label: String,
    /// Whether the label transition succeeded
    pub transitioned: bool,
}

impl ActionContext {
    #[must_use]
    pub fn for_route(route: &Route, transitioned: bool) -> Self {
        Self {
            phase: route.phase,
            from_label: route.from.clone(),
            to_label: route.to.clone(),
            transitioned,
        }
    }
}

/// Work performed when an issue enters a phase
#[async_trait]
pub trait PhaseAction: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Whether the action applies to this issue
    fn can_execute(&self, issue: Option<&Issue>) -> bool;

    /// Run the action
    async fn execute(&self, ctx: &ActionContext, issue: Option<&Issue>) -> Result<(), ActionError>;
}

/// Action that does nothing and never fails
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAction;

#[async_trait]
impl PhaseAction for NoopAction {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn can_execute(&self, issue: Option<&Issue>) -> bool {
        issue.is_some_and(|issue| issue.number.is_some())
    }

    async fn execute(&self, ctx: &ActionContext, issue: Option<&Issue>) -> Result<(), ActionError> {
        debug!(
            phase = %ctx.phase,
            issue_number = issue.and_then(|issue| issue.number),
            "No-op action"
        );
        Ok(())
    }
}

/// Posts a templated comment when a phase is entered.
///
/// The template may use `{issue}`, `{phase}`, `{from}` and `{to}`.
pub struct CommentAction {
    tracker: Arc<dyn IssueTracker>,
    template: String,
}

impl CommentAction {
    #[must_use]
    pub fn new(tracker: Arc<dyn IssueTracker>, template: &str) -> Self {
        Self {
            tracker,
            template: template.to_string(),
        }
    }

    fn render(&self, ctx: &ActionContext, issue_number: u64) -> String {
        self.template
            .replace("{issue}", &issue_number.to_string())
            .replace("{phase}", ctx.phase.as_str())
            .replace("{from}", &ctx.from_label)
            .replace("{to}", &ctx.to_label)
    }
}

#[async_trait]
impl PhaseAction for CommentAction {
    fn name(&self) -> &'static str {
        "comment"
    }

    fn can_execute(&self, issue: Option<&Issue>) -> bool {
        issue.is_some_and(|issue| issue.number.is_some())
    }

    async fn execute(&self, ctx: &ActionContext, issue: Option<&Issue>) -> Result<(), ActionError> {
        let issue_number = issue
            .and_then(|issue| issue.number)
            .ok_or_else(|| ActionError::NotExecutable {
                action: self.name().to_string(),
                reason: "issue has no number".to_string(),
            })?;

        if !ctx.transitioned {
            debug!(issue_number, phase = %ctx.phase, "Transition failed, skipping comment");
            return Ok(());
        }

        let body = self.render(ctx, issue_number);
        self.tracker
            .create_comment(issue_number, &body)
            .await
            .map_err(|source| ActionError::Tracker {
                action: self.name().to_string(),
                source,
            })
    }
}

/// Phase to action lookup
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<Phase, Arc<dyn PhaseAction>>,
    fallback: NoopAction,
}

impl ActionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the action for a phase, replacing any previous one
    #[must_use]
    pub fn with_action(mut self, phase: Phase, action: Arc<dyn PhaseAction>) -> Self {
        self.actions.insert(phase, action);
        self
    }

    /// Action for a phase, `NoopAction` when none is registered
    #[must_use]
    pub fn get(&self, phase: Phase) -> &dyn PhaseAction {
        self.actions
            .get(&phase)
            .map_or(&self.fallback as &dyn PhaseAction, |action| action.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::MockIssueTracker;

    fn ctx(transitioned: bool) -> ActionContext {
        ActionContext {
            phase: Phase::Plan,
            from_label: "status:needs-plan".to_string(),
            to_label: "status:planning".to_string(),
            transitioned,
        }
    }

    #[tokio::test]
    async fn test_noop_accepts_missing_issue() {
        let action = NoopAction;
        assert!(action.execute(&ctx(true), None).await.is_ok());

        let unnumbered = Issue {
            number: None,
            ..Issue::default()
        };
        assert!(action.execute(&ctx(true), Some(&unnumbered)).await.is_ok());
    }

    #[test]
    fn test_noop_can_execute_requires_number() {
        let action = NoopAction;
        assert!(!action.can_execute(None));
        assert!(!action.can_execute(Some(&Issue::default())));
        assert!(action.can_execute(Some(&Issue::new(1, "t", &[]))));
    }

    #[tokio::test]
    async fn test_comment_action_renders_template() {
        let mut tracker = MockIssueTracker::new();
        tracker
            .expect_create_comment()
            .withf(|number, body| {
                *number == 42 && body == "Entered plan on #42 (status:needs-plan -> status:planning)"
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let action = CommentAction::new(
            Arc::new(tracker),
            "Entered {phase} on #{issue} ({from} -> {to})",
        );
        let issue = Issue::new(42, "t", &[]);
        action.execute(&ctx(true), Some(&issue)).await.unwrap();
    }

    #[tokio::test]
    async fn test_comment_action_skips_failed_transition() {
        let mut tracker = MockIssueTracker::new();
        tracker.expect_create_comment().never();

        let action = CommentAction::new(Arc::new(tracker), "hi");
        let issue = Issue::new(1, "t", &[]);
        action.execute(&ctx(false), Some(&issue)).await.unwrap();
    }

    #[tokio::test]
    async fn test_comment_action_requires_number() {
        let action = CommentAction::new(Arc::new(MockIssueTracker::new()), "hi");
        let err = action.execute(&ctx(true), None).await.unwrap_err();
        assert!(matches!(err, ActionError::NotExecutable { .. }));
    }

    #[test]
    fn test_registry_falls_back_to_noop() {
        let registry = ActionRegistry::new().with_action(
            Phase::Review,
            Arc::new(CommentAction::new(Arc::new(MockIssueTracker::new()), "x")),
        );
        assert_eq!(registry.get(Phase::Plan).name(), "noop");
        assert_eq!(registry.get(Phase::Review).name(), "comment");
    }
}
