//! Per-execution item bookkeeping
//!
//! Backend items report their full text (or output) so far on every event.
//! [`ItemState`] remembers how much of each field has already been published
//! and which lifecycle transitions have been announced, so the translator can
//! turn snapshots into deltas and announce each transition once.
//!
//! An `ItemState` is created empty for each execution and dropped with it.

use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Started,
    Completed,
}

/// Sent lengths and lifecycle tags for the items of one execution
#[derive(Debug, Default)]
pub struct ItemState {
    sent: HashMap<String, usize>,
    lifecycle: HashMap<String, Lifecycle>,
}

/// Sent-length key for an item's output field
#[must_use]
pub fn output_key(item_id: &str) -> String {
    format!("{item_id}:output")
}

fn state_key(item_id: &str) -> String {
    format!("{item_id}:state")
}

impl ItemState {
    /// Create empty bookkeeping
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The unseen suffix of `text` for `key`, if any
    ///
    /// Records the new length when a non-empty suffix is returned. A snapshot
    /// that does not extend what was already sent yields nothing.
    pub fn delta<'a>(&mut self, key: &str, text: &'a str) -> Option<&'a str> {
        let sent = self.sent_len(key);
        let Some(suffix) = text.get(sent..) else {
            tracing::debug!(
                key = %key,
                sent = sent,
                len = text.len(),
                "Snapshot does not extend sent text; skipping"
            );
            return None;
        };
        if suffix.is_empty() {
            return None;
        }
        self.sent.insert(key.to_string(), text.len());
        Some(suffix)
    }

    /// Bytes already published for `key`
    #[must_use]
    pub fn sent_len(&self, key: &str) -> usize {
        self.sent.get(key).copied().unwrap_or(0)
    }

    /// Whether anything was published for `key`
    #[must_use]
    pub fn has_sent(&self, key: &str) -> bool {
        self.sent_len(key) > 0
    }

    /// Record the first sighting of an item; true only the first time
    pub fn mark_started(&mut self, item_id: &str) -> bool {
        let key = state_key(item_id);
        if self.lifecycle.contains_key(&key) {
            return false;
        }
        self.lifecycle.insert(key, Lifecycle::Started);
        true
    }

    /// Record an item's completion; true only the first time
    pub fn mark_completed(&mut self, item_id: &str) -> bool {
        let previous = self.lifecycle.insert(state_key(item_id), Lifecycle::Completed);
        previous != Some(Lifecycle::Completed)
    }
}
