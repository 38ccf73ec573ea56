//! State Management for Watched Issues
//!
//! Tracks, per issue and per workflow phase, whether the phase is pending,
//! being processed, completed or failed. Keying by phase lets an issue
//! re-enter an earlier phase without losing what happened in later ones.
//!
//! Key Features:
//! - In-memory store guarded by a single reader/writer lock
//! - Copy-on-read accessors so callers never alias internal storage
//! - Cleanup sweep that only ever removes terminal entries

use crate::workflow::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::debug;

/// Processing status of one phase of one issue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    /// Not started; also the answer for phases never seen
    #[default]
    Pending,

    /// A transition into the phase is in flight
    Processing,

    /// The phase was entered successfully
    Completed,

    /// The last attempt to enter the phase failed
    Failed,
}

impl IssueStatus {
    /// Terminal statuses are the only ones the cleanup sweep may remove
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Stored status of a single `(issue, phase)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueState {
    pub issue_number: u64,
    pub phase: Phase,
    pub status: IssueStatus,
    pub last_action: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct PhaseEntry {
    status: IssueStatus,
    last_action: DateTime<Utc>,
}

/// Thread-safe per-issue, per-phase state store
#[derive(Debug, Default)]
pub struct IssueStateStore {
    states: RwLock<HashMap<u64, HashMap<Phase, PhaseEntry>>>,
}

impl IssueStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<u64, HashMap<Phase, PhaseEntry>>> {
        self.states.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<u64, HashMap<Phase, PhaseEntry>>> {
        self.states.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Upsert the status of a phase and stamp the write time
    pub fn set_state(&self, issue_number: u64, phase: Phase, status: IssueStatus) {
        let entry = PhaseEntry {
            status,
            last_action: Utc::now(),
        };
        self.write()
            .entry(issue_number)
            .or_default()
            .insert(phase, entry);
        debug!(issue_number, %phase, ?status, "Issue state updated");
    }

    /// Atomically claim a phase for processing.
    ///
    /// Fails when any phase of the issue is already `Processing`, or when
    /// this phase is `Completed` and `reopen` is false. On success the phase
    /// is `Processing` before the lock is released.
    pub fn try_begin_processing(&self, issue_number: u64, phase: Phase, reopen: bool) -> bool {
        let mut states = self.write();

        if let Some(phases) = states.get(&issue_number) {
            if phases
                .values()
                .any(|entry| entry.status == IssueStatus::Processing)
            {
                return false;
            }
            if !reopen
                && phases
                    .get(&phase)
                    .is_some_and(|entry| entry.status == IssueStatus::Completed)
            {
                return false;
            }
        }

        states.entry(issue_number).or_default().insert(
            phase,
            PhaseEntry {
                status: IssueStatus::Processing,
                last_action: Utc::now(),
            },
        );
        drop(states);
        debug!(issue_number, %phase, "Issue phase claimed for processing");
        true
    }

    /// Stored status of a phase, `Pending` when nothing was recorded
    #[must_use]
    pub fn get_state(&self, issue_number: u64, phase: Phase) -> IssueStatus {
        self.read()
            .get(&issue_number)
            .and_then(|phases| phases.get(&phase))
            .map(|entry| entry.status)
            .unwrap_or_default()
    }

    /// True if any phase of the issue is currently being processed
    #[must_use]
    pub fn is_processing(&self, issue_number: u64) -> bool {
        self.read().get(&issue_number).is_some_and(|phases| {
            phases
                .values()
                .any(|entry| entry.status == IssueStatus::Processing)
        })
    }

    /// True if this exact phase completed
    #[must_use]
    pub fn has_been_processed(&self, issue_number: u64, phase: Phase) -> bool {
        self.get_state(issue_number, phase) == IssueStatus::Completed
    }

    pub fn mark_as_completed(&self, issue_number: u64, phase: Phase) {
        self.set_state(issue_number, phase, IssueStatus::Completed);
    }

    pub fn mark_as_failed(&self, issue_number: u64, phase: Phase) {
        self.set_state(issue_number, phase, IssueStatus::Failed);
    }

    /// Deep copy of every tracked status
    #[must_use]
    pub fn get_all_states(&self) -> HashMap<u64, HashMap<Phase, IssueStatus>> {
        self.read()
            .iter()
            .map(|(issue_number, phases)| {
                let phases = phases
                    .iter()
                    .map(|(phase, entry)| (*phase, entry.status))
                    .collect();
                (*issue_number, phases)
            })
            .collect()
    }

    /// Every stored phase of one issue, in phase order
    #[must_use]
    pub fn get_issue_state(&self, issue_number: u64) -> Option<Vec<IssueState>> {
        let states = self.read();
        let phases = states.get(&issue_number)?;

        let mut entries: Vec<IssueState> = phases
            .iter()
            .map(|(phase, entry)| IssueState {
                issue_number,
                phase: *phase,
                status: entry.status,
                last_action: entry.last_action,
            })
            .collect();
        entries.sort_by_key(|entry| entry.phase);
        Some(entries)
    }

    /// Forget an issue entirely. Returns whether it was tracked.
    pub fn clear(&self, issue_number: u64) -> bool {
        self.write().remove(&issue_number).is_some()
    }

    /// Number of tracked issues
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove terminal entries not written within `retention`.
    ///
    /// Returns the number of phase entries removed.
    pub fn cleanup_old_states(&self, retention: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.cleanup_older_than(cutoff)
    }

    /// Remove terminal entries last written before `cutoff`.
    ///
    /// Pending and Processing entries survive regardless of age. Issues left
    /// without any phase are dropped.
    pub fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut states = self.write();
        let mut removed = 0;

        states.retain(|_, phases| {
            let before = phases.len();
            phases.retain(|_, entry| !(entry.status.is_terminal() && entry.last_action < cutoff));
            removed += before - phases.len();
            !phases.is_empty()
        });

        if removed > 0 {
            debug!(removed, %cutoff, "Swept stale issue states");
        }
        removed
    }
}
