/*!
 * History ledger: bounded, append-only record of entered states.
 *
 * The ledger is owned by the transition engine and mutated only inside its
 * critical section; callers get read-only snapshots. It also carries the
 * last-recorded-state snapshot used for crash recovery.
 */
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use modeflow_core::types::{StateId, Timestamp};
use modeflow_core::utils::elapsed_millis;

/// Default number of retained history entries
pub const DEFAULT_HISTORY_SIZE: usize = 1000;

/// A record of one state occupancy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The state that was entered
    pub state: StateId,
    /// When the state was entered
    #[serde(rename = "timestamp")]
    pub entered_at: Timestamp,
    /// How long the state was occupied; unset while the entry is live
    pub duration_ms: Option<u64>,
}

/// Bounded, append-only record of entered states
#[derive(Debug)]
pub struct HistoryLedger {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    last_recorded: Option<StateId>,
}

impl HistoryLedger {
    /// Create a ledger retaining at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            last_recorded: None,
        }
    }

    /// Append a live entry for a state entered at `entered_at`
    ///
    /// Stamps the previous live entry's duration. A non-built-in state also
    /// becomes the recovery snapshot.
    pub fn record(&mut self, state: StateId, entered_at: Timestamp) {
        if let Some(previous) = self.entries.back_mut() {
            if previous.duration_ms.is_none() {
                previous.duration_ms = Some(elapsed_millis(previous.entered_at, entered_at));
            }
        }
        if !state.is_builtin() {
            self.last_recorded = Some(state.clone());
        }
        self.entries.push_back(HistoryEntry {
            state,
            entered_at,
            duration_ms: None,
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// The `n` most recently entered states, in insertion order
    pub fn last(&self, n: usize) -> Vec<HistoryEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of retained entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The most recent recoverable state, if one was recorded
    pub fn snapshot_last_state(&self) -> Option<&StateId> {
        self.last_recorded.as_ref()
    }

    /// Seed the recovery snapshot from an external checkpoint
    pub fn restore_last_state(&mut self, state: StateId) {
        self.last_recorded = Some(state);
    }

    /// Drop the recovery snapshot
    pub fn clear_last_state(&mut self) {
        self.last_recorded = None;
    }
}

impl Default for HistoryLedger {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}
