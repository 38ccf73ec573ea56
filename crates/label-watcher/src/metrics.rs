//! # Label Transition Metrics
//!
//! Aggregates the outcome of every attempted label transition: totals by
//! outcome, failure counts by reason tag, and attempt counts by transition
//! descriptor (`"<from>-><to>"`). Only aggregates are kept; the issue number
//! passed to the record methods is not retained.
//!
//! All counters live behind a single reader/writer lock so that
//! `total == successful + failed` holds for every reader, and snapshots are
//! copied under one read guard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Build the transition descriptor used as the `transition_types` key
#[must_use]
pub fn transition_key(from: &str, to: &str) -> String {
    format!("{from}->{to}")
}

#[derive(Debug, Default)]
struct MetricsInner {
    total_transitions: u64,
    successful_transitions: u64,
    failed_transitions: u64,
    failure_reasons: HashMap<String, u64>,
    transition_types: HashMap<String, u64>,
    last_transition_time: Option<DateTime<Utc>>,
}

/// Running transition counters for one watcher
#[derive(Debug)]
pub struct LabelTransitionMetrics {
    inner: RwLock<MetricsInner>,
    start_time: DateTime<Utc>,
}

impl Default for LabelTransitionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelTransitionMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MetricsInner::default()),
            start_time: Utc::now(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MetricsInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MetricsInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a successful transition
    pub fn record_success(&self, issue_number: u64, transition_type: &str) {
        {
            let mut inner = self.write();
            inner.total_transitions += 1;
            inner.successful_transitions += 1;
            *inner
                .transition_types
                .entry(transition_type.to_string())
                .or_insert(0) += 1;
            inner.last_transition_time = Some(Utc::now());
        }
        debug!(issue_number, transition = transition_type, "Recorded transition success");
    }

    /// Record a failed transition with its reason tag
    pub fn record_failure(&self, issue_number: u64, transition_type: &str, reason: &str) {
        {
            let mut inner = self.write();
            inner.total_transitions += 1;
            inner.failed_transitions += 1;
            *inner.failure_reasons.entry(reason.to_string()).or_insert(0) += 1;
            *inner
                .transition_types
                .entry(transition_type.to_string())
                .or_insert(0) += 1;
            inner.last_transition_time = Some(Utc::now());
        }
        debug!(
            issue_number,
            transition = transition_type,
            reason,
            "Recorded transition failure"
        );
    }

    #[must_use]
    pub fn total_transitions(&self) -> u64 {
        self.read().total_transitions
    }

    #[must_use]
    pub fn successful_transitions(&self) -> u64 {
        self.read().successful_transitions
    }

    #[must_use]
    pub fn failed_transitions(&self) -> u64 {
        self.read().failed_transitions
    }

    #[must_use]
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    #[must_use]
    pub fn last_transition_time(&self) -> Option<DateTime<Utc>> {
        self.read().last_transition_time
    }

    /// Time since the recorder was created
    #[must_use]
    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.start_time
    }

    /// Percentage of successful transitions in `[0, 100]`, `0` when empty
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let inner = self.read();
        success_rate(inner.successful_transitions, inner.total_transitions)
    }

    /// Success rate with two decimals and a trailing `%`
    #[must_use]
    pub fn success_rate_formatted(&self) -> String {
        format_rate(self.success_rate())
    }

    /// The `n` most common failure reasons, highest count first
    #[must_use]
    pub fn top_failure_reasons(&self, n: usize) -> Vec<(String, u64)> {
        top_n(&self.read().failure_reasons, n)
    }

    /// The `n` most attempted transitions, highest count first
    #[must_use]
    pub fn most_frequent_transitions(&self, n: usize) -> Vec<(String, u64)> {
        top_n(&self.read().transition_types, n)
    }

    /// Zero every counter and clear both maps. `start_time` is kept.
    pub fn reset(&self) {
        *self.write() = MetricsInner::default();
        info!("Label transition metrics reset");
    }

    /// Independent point-in-time copy of all counters
    #[must_use]
    pub fn snapshot(&self) -> LabelTransitionMetricsSnapshot {
        let inner = self.read();
        LabelTransitionMetricsSnapshot {
            total_transitions: inner.total_transitions,
            successful_transitions: inner.successful_transitions,
            failed_transitions: inner.failed_transitions,
            success_rate: success_rate(inner.successful_transitions, inner.total_transitions),
            failure_reasons: inner.failure_reasons.clone(),
            transition_types: inner.transition_types.clone(),
            start_time: self.start_time,
            last_transition_time: inner.last_transition_time,
        }
    }
}

/// Frozen copy of [`LabelTransitionMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelTransitionMetricsSnapshot {
    pub total_transitions: u64,
    pub successful_transitions: u64,
    pub failed_transitions: u64,
    /// Success percentage at capture time
    pub success_rate: f64,
    pub failure_reasons: HashMap<String, u64>,
    pub transition_types: HashMap<String, u64>,
    pub start_time: DateTime<Utc>,
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl LabelTransitionMetricsSnapshot {
    #[must_use]
    pub fn success_rate_formatted(&self) -> String {
        format_rate(self.success_rate)
    }

    #[must_use]
    pub fn top_failure_reasons(&self, n: usize) -> Vec<(String, u64)> {
        top_n(&self.failure_reasons, n)
    }

    #[must_use]
    pub fn most_frequent_transitions(&self, n: usize) -> Vec<(String, u64)> {
        top_n(&self.transition_types, n)
    }

    /// Render the snapshot in Prometheus text exposition format
    #[must_use]
    pub fn to_prometheus(&self, prefix: &str) -> String {
        render_families(prefix, &[(String::new(), self)])
    }
}

/// Render several snapshots as one Prometheus exposition.
///
/// Each `HELP`/`TYPE` header is written once per metric family, and every
/// series carries `label_name="<key>"` so snapshots stay distinguishable.
#[must_use]
pub fn render_prometheus<'a, I>(prefix: &str, label_name: &str, snapshots: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a LabelTransitionMetricsSnapshot)>,
{
    let labelled: Vec<(String, &LabelTransitionMetricsSnapshot)> = snapshots
        .into_iter()
        .map(|(value, snapshot)| {
            (
                format!("{label_name}=\"{}\"", escape_label_value(value)),
                snapshot,
            )
        })
        .collect();
    render_families(prefix, &labelled)
}

const COUNTER_FAMILIES: [(&str, &str); 3] = [
    (
        "transitions_total",
        "Total number of label transitions attempted",
    ),
    (
        "transitions_successful_total",
        "Total number of successful label transitions",
    ),
    (
        "transitions_failed_total",
        "Total number of failed label transitions",
    ),
];

fn counter_values(snapshot: &LabelTransitionMetricsSnapshot) -> [u64; 3] {
    [
        snapshot.total_transitions,
        snapshot.successful_transitions,
        snapshot.failed_transitions,
    ]
}

/// `base` are pre-rendered labels shared by every series of a snapshot
fn render_families(
    prefix: &str,
    snapshots: &[(String, &LabelTransitionMetricsSnapshot)],
) -> String {
    let mut output = String::new();

    for (index, (name, help)) in COUNTER_FAMILIES.into_iter().enumerate() {
        write_header(&mut output, prefix, name, help, "counter");
        for (base, snapshot) in snapshots {
            let _ = writeln!(
                output,
                "{prefix}_{name}{} {}",
                label_set(base, None),
                counter_values(snapshot)[index]
            );
        }
    }

    write_header(
        &mut output,
        prefix,
        "transition_failures_total",
        "Failed label transitions by reason",
        "counter",
    );
    for (base, snapshot) in snapshots {
        for (reason, count) in sorted_by_key(&snapshot.failure_reasons) {
            let _ = writeln!(
                output,
                "{prefix}_transition_failures_total{} {count}",
                label_set(base, Some(("reason", reason)))
            );
        }
    }

    write_header(
        &mut output,
        prefix,
        "transitions_by_type_total",
        "Attempted label transitions by descriptor",
        "counter",
    );
    for (base, snapshot) in snapshots {
        for (transition, count) in sorted_by_key(&snapshot.transition_types) {
            let _ = writeln!(
                output,
                "{prefix}_transitions_by_type_total{} {count}",
                label_set(base, Some(("transition", transition)))
            );
        }
    }

    write_header(
        &mut output,
        prefix,
        "transition_success_rate_percent",
        "Successful transitions as a percentage",
        "gauge",
    );
    for (base, snapshot) in snapshots {
        let _ = writeln!(
            output,
            "{prefix}_transition_success_rate_percent{} {:.2}",
            label_set(base, None),
            snapshot.success_rate
        );
    }

    output
}

fn write_header(output: &mut String, prefix: &str, name: &str, help: &str, kind: &str) {
    let _ = writeln!(output, "# HELP {prefix}_{name} {help}");
    let _ = writeln!(output, "# TYPE {prefix}_{name} {kind}");
}

/// `{base,key="value"}`, or nothing when there are no labels
fn label_set(base: &str, extra: Option<(&str, &str)>) -> String {
    let mut labels = base.to_string();
    if let Some((key, value)) = extra {
        if !labels.is_empty() {
            labels.push(',');
        }
        let _ = write!(labels, "{key}=\"{}\"", escape_label_value(value));
    }
    if labels.is_empty() {
        labels
    } else {
        format!("{{{labels}}}")
    }
}

fn success_rate(successful: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * successful as f64 / total as f64
    }
}

fn format_rate(rate: f64) -> String {
    format!("{rate:.2}%")
}

/// Highest counts first, ties broken by key so results are reproducible
fn top_n(counts: &HashMap<String, u64>, n: usize) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = counts
        .iter()
        .map(|(key, count)| (key.clone(), *count))
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(n);
    entries
}

fn sorted_by_key(counts: &HashMap<String, u64>) -> Vec<(&String, &u64)> {
    let mut entries: Vec<_> = counts.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn counts(pairs: &[(&str, u64)]) -> HashMap<String, u64> {
        pairs
            .iter()
            .map(|(key, count)| ((*key).to_string(), *count))
            .collect()
    }

    #[test]
    fn test_empty_recorder() {
        let metrics = LabelTransitionMetrics::new();
        assert_eq!(metrics.total_transitions(), 0);
        assert!(metrics.success_rate().abs() < f64::EPSILON);
        assert_eq!(metrics.success_rate_formatted(), "0.00%");
        assert!(metrics.top_failure_reasons(5).is_empty());
        assert!(metrics.most_frequent_transitions(5).is_empty());
        assert!(metrics.last_transition_time().is_none());
    }

    #[test]
    fn test_success_rate_formatting() {
        let metrics = LabelTransitionMetrics::new();
        for _ in 0..3 {
            metrics.record_success(1, "a->b");
        }
        metrics.record_failure(1, "a->b", "timeout");
        assert_eq!(metrics.success_rate_formatted(), "75.00%");

        metrics.record_failure(2, "a->b", "timeout");
        metrics.record_failure(3, "a->b", "timeout");
        assert_eq!(metrics.success_rate_formatted(), "50.00%");
    }

    #[test]
    fn test_totals_stay_consistent() {
        let metrics = LabelTransitionMetrics::new();
        let calls = [true, false, false, true, true, false, true];
        for (i, success) in calls.iter().enumerate() {
            if *success {
                metrics.record_success(i as u64, "x->y");
            } else {
                metrics.record_failure(i as u64, "x->y", "api_error");
            }
            let snapshot = metrics.snapshot();
            assert_eq!(
                snapshot.total_transitions,
                snapshot.successful_transitions + snapshot.failed_transitions
            );
        }
        assert_eq!(metrics.most_frequent_transitions(1), vec![("x->y".to_string(), 7)]);
    }

    #[test]
    fn test_top_n_orders_and_clamps() {
        let reasons = counts(&[
            ("api_error", 10),
            ("timeout", 5),
            ("permission_denied", 8),
            ("not_found", 2),
        ]);
        assert_eq!(
            top_n(&reasons, 3),
            vec![
                ("api_error".to_string(), 10),
                ("permission_denied".to_string(), 8),
                ("timeout".to_string(), 5),
            ]
        );
        assert_eq!(top_n(&reasons, 10).len(), 4);
        assert!(top_n(&reasons, 0).is_empty());
    }

    #[test]
    fn test_top_n_ties_are_lexicographic() {
        let reasons = counts(&[("timeout", 3), ("api_error", 3), ("conflict", 1)]);
        assert_eq!(
            top_n(&reasons, 2),
            vec![("api_error".to_string(), 3), ("timeout".to_string(), 3)]
        );
    }

    #[test]
    fn test_reset_keeps_start_time() {
        let metrics = LabelTransitionMetrics::new();
        let start = metrics.start_time();
        metrics.record_success(1, "a->b");
        metrics.record_failure(2, "b->c", "timeout");

        metrics.reset();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_transitions, 0);
        assert_eq!(snapshot.successful_transitions, 0);
        assert_eq!(snapshot.failed_transitions, 0);
        assert!(snapshot.failure_reasons.is_empty());
        assert!(snapshot.transition_types.is_empty());
        assert!(snapshot.last_transition_time.is_none());
        assert_eq!(snapshot.start_time, start);
    }

    #[test]
    fn test_snapshot_is_isolated() {
        let metrics = LabelTransitionMetrics::new();
        metrics.record_success(1, "a->b");
        let snapshot = metrics.snapshot();

        metrics.record_failure(2, "a->b", "timeout");
        metrics.record_success(3, "c->d");

        assert_eq!(snapshot.total_transitions, 1);
        assert_eq!(snapshot.transition_types.get("a->b"), Some(&1));
        assert!(snapshot.failure_reasons.is_empty());
        assert_eq!(snapshot.success_rate_formatted(), "100.00%");

        metrics.reset();
        assert_eq!(snapshot.total_transitions, 1);
    }

    #[test]
    fn test_concurrent_recording_loses_nothing() {
        let metrics = Arc::new(LabelTransitionMetrics::new());
        let handles: Vec<_> = (0..100u64)
            .map(|i| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    if i % 3 == 0 {
                        metrics.record_failure(i, "a->b", "timeout");
                    } else {
                        metrics.record_success(i, "a->b");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_transitions, 100);
        assert_eq!(snapshot.failed_transitions, 34);
        assert_eq!(snapshot.successful_transitions, 66);
        assert_eq!(snapshot.failure_reasons["timeout"], 34);
        assert_eq!(snapshot.transition_types["a->b"], 100);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = LabelTransitionMetrics::new();
        metrics.record_success(1, "status:ready->status:implementing");
        metrics.record_failure(2, "status:ready->status:implementing", "api_error");

        let text = metrics.snapshot().to_prometheus("label_watcher");
        assert!(text.contains("label_watcher_transitions_total 2\n"));
        assert!(text.contains("label_watcher_transitions_failed_total 1\n"));
        assert!(text.contains("label_watcher_transition_failures_total{reason=\"api_error\"} 1\n"));
        assert!(text.contains(
            "label_watcher_transitions_by_type_total{transition=\"status:ready->status:implementing\"} 2\n"
        ));
        assert!(text.contains("label_watcher_transition_success_rate_percent 50.00\n"));
    }

    #[test]
    fn test_prometheus_export_for_several_repositories() {
        let widgets = LabelTransitionMetrics::new();
        widgets.record_success(1, "a->b");
        let gadgets = LabelTransitionMetrics::new();
        gadgets.record_success(2, "a->b");
        gadgets.record_failure(3, "a->b", "timeout");

        let (widgets, gadgets) = (widgets.snapshot(), gadgets.snapshot());
        let text = render_prometheus(
            "label_watcher",
            "repository",
            [("acme/widgets", &widgets), ("acme/gadgets", &gadgets)],
        );

        for family in [
            "transitions_total",
            "transitions_successful_total",
            "transitions_failed_total",
            "transition_failures_total",
            "transitions_by_type_total",
            "transition_success_rate_percent",
        ] {
            let type_line = format!("# TYPE label_watcher_{family} ");
            assert_eq!(text.matches(&type_line).count(), 1, "{family}");
        }

        assert!(text.contains("label_watcher_transitions_total{repository=\"acme/widgets\"} 1\n"));
        assert!(text.contains("label_watcher_transitions_total{repository=\"acme/gadgets\"} 2\n"));
        assert!(text.contains(
            "label_watcher_transition_failures_total{repository=\"acme/gadgets\",reason=\"timeout\"} 1\n"
        ));
        assert!(text.contains(
            "label_watcher_transitions_by_type_total{repository=\"acme/widgets\",transition=\"a->b\"} 1\n"
        ));
        assert!(text.contains(
            "label_watcher_transition_success_rate_percent{repository=\"acme/gadgets\"} 50.00\n"
        ));
        assert!(!text.contains("label_watcher_transitions_total 1\n"));
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("a\"b\\c"), "a\\\"b\\\\c");
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = LabelTransitionMetrics::new();
        metrics.record_failure(1, "a->b", "timeout");
        let value = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(value["failed_transitions"], 1);
        assert_eq!(value["failure_reasons"]["timeout"], 1);
        assert_eq!(value["success_rate"], 0.0);
    }
}
