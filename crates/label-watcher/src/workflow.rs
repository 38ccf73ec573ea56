//! # Workflow Label Definitions
//!
//! Defines the workflow phases an issue moves through and the status labels
//! that drive each move. A phase is entered when the bot replaces the phase's
//! trigger label (set by a human) with its active label.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Workflow stages, in the order an issue normally passes through them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Planning the change
    Plan,
    /// Implementing the plan
    Implementation,
    /// Reviewing the implementation
    Review,
}

impl Phase {
    /// All phases in workflow order
    pub const ALL: [Phase; 3] = [Phase::Plan, Phase::Implementation, Phase::Review];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Implementation => "implementation",
            Self::Review => "review",
        }
    }

    /// Phases that come strictly after this one
    pub fn later_phases(self) -> impl Iterator<Item = Phase> {
        Self::ALL.into_iter().filter(move |phase| *phase > self)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label pair for a single phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseLabels {
    /// Label a human applies to request the phase
    pub trigger: String,
    /// Label the bot applies once the phase has been entered
    pub active: String,
    /// Optional comment template posted when the phase is entered.
    /// Supports `{issue}`, `{phase}`, `{from}` and `{to}` placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl PhaseLabels {
    #[must_use]
    pub fn new(trigger: &str, active: &str) -> Self {
        Self {
            trigger: trigger.to_string(),
            active: active.to_string(),
            comment: None,
        }
    }
}

/// Label pair that sends an issue back to an earlier phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReworkLabels {
    /// Label signalling that changes were requested
    pub trigger: String,
    /// Phase the issue re-enters; the label applied is that phase's trigger
    pub reopens: Phase,
}

/// Complete label configuration for the workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowLabels {
    pub plan: PhaseLabels,
    pub implementation: PhaseLabels,
    pub review: PhaseLabels,
    pub rework: Option<ReworkLabels>,
}

impl Default for WorkflowLabels {
    fn default() -> Self {
        Self {
            plan: PhaseLabels::new("status:needs-plan", "status:planning"),
            implementation: PhaseLabels::new("status:ready", "status:implementing"),
            review: PhaseLabels::new("status:review-requested", "status:reviewing"),
            rework: Some(ReworkLabels {
                trigger: "status:requires-changes".to_string(),
                reopens: Phase::Implementation,
            }),
        }
    }
}

/// Whether a route enters a phase or sends the issue back to one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Forward,
    Rework,
}

/// A single `from -> to` label move bound to a phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub kind: RouteKind,
    pub phase: Phase,
    pub from: String,
    pub to: String,
}

impl Route {
    /// Transition descriptor used as the metrics key
    #[must_use]
    pub fn descriptor(&self) -> String {
        crate::metrics::transition_key(&self.from, &self.to)
    }
}

impl WorkflowLabels {
    /// Labels configured for a phase
    #[must_use]
    pub fn phase(&self, phase: Phase) -> &PhaseLabels {
        match phase {
            Phase::Plan => &self.plan,
            Phase::Implementation => &self.implementation,
            Phase::Review => &self.review,
        }
    }

    /// Routes in evaluation order: rework first, then forward routes by phase
    #[must_use]
    pub fn routes(&self) -> Vec<Route> {
        let mut routes = Vec::with_capacity(Phase::ALL.len() + 1);

        if let Some(rework) = &self.rework {
            routes.push(Route {
                kind: RouteKind::Rework,
                phase: rework.reopens,
                from: rework.trigger.clone(),
                to: self.phase(rework.reopens).trigger.clone(),
            });
        }

        for phase in Phase::ALL {
            let labels = self.phase(phase);
            routes.push(Route {
                kind: RouteKind::Forward,
                phase,
                from: labels.trigger.clone(),
                to: labels.active.clone(),
            });
        }

        routes
    }

    /// Labels the watcher polls for
    #[must_use]
    pub fn watched_labels(&self) -> Vec<String> {
        self.routes().into_iter().map(|route| route.from).collect()
    }

    /// Every label the workflow uses, in configuration order
    #[must_use]
    pub fn all_labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = Phase::ALL
            .iter()
            .flat_map(|phase| {
                let labels = self.phase(*phase);
                [labels.trigger.as_str(), labels.active.as_str()]
            })
            .collect();
        if let Some(rework) = &self.rework {
            labels.push(rework.trigger.as_str());
        }
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_ordering() {
        assert!(Phase::Plan < Phase::Implementation);
        assert!(Phase::Implementation < Phase::Review);
        let later: Vec<Phase> = Phase::Plan.later_phases().collect();
        assert_eq!(later, vec![Phase::Implementation, Phase::Review]);
        assert_eq!(Phase::Review.later_phases().count(), 0);
    }

    #[test]
    fn test_default_routes() {
        let routes = WorkflowLabels::default().routes();
        assert_eq!(routes.len(), 4);

        assert_eq!(routes[0].kind, RouteKind::Rework);
        assert_eq!(routes[0].from, "status:requires-changes");
        assert_eq!(routes[0].to, "status:ready");

        assert_eq!(routes[1].phase, Phase::Plan);
        assert_eq!(
            routes[1].descriptor(),
            "status:needs-plan->status:planning"
        );
        assert_eq!(routes[3].phase, Phase::Review);
    }

    #[test]
    fn test_watched_labels_without_rework() {
        let labels = WorkflowLabels {
            rework: None,
            ..WorkflowLabels::default()
        };
        assert_eq!(
            labels.watched_labels(),
            vec![
                "status:needs-plan".to_string(),
                "status:ready".to_string(),
                "status:review-requested".to_string(),
            ]
        );
    }

    #[test]
    fn test_phase_serde_names() {
        let json = serde_json::to_string(&Phase::Implementation).unwrap();
        assert_eq!(json, "\"implementation\"");
        assert_eq!(Phase::Review.to_string(), "review");
    }
}
