//! Delayed discard registry.
//!
//! Tracks at most one pending teardown per key. The registry owns no timer
//! thread: the reconciler worker asks for [`DiscardRegistry::next_deadline`],
//! sleeps until then (or until a command arrives) and calls
//! [`DiscardRegistry::fire_due`].

use crate::types::SubscriptionKey;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// A scheduled-but-not-yet-executed teardown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingDiscard {
    /// None when the grace period is too long to represent; such a discard
    /// only fires through [`DiscardRegistry::fire_all`].
    pub deadline: Option<Instant>,
    /// Cancellation token, unique per scheduling.
    pub token: u64,
}

#[derive(Debug, Default)]
pub struct DiscardRegistry {
    pending: HashMap<SubscriptionKey, PendingDiscard>,
    /// Deadline order; ties broken by token.
    by_deadline: BTreeMap<(Instant, u64), SubscriptionKey>,
    next_token: u64,
}

impl DiscardRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a discard for `key` to fire `after` from `now`.
    ///
    /// Returns false, leaving the existing deadline untouched, if one is
    /// already pending.
    pub fn schedule(&mut self, key: &SubscriptionKey, after: Duration, now: Instant) -> bool {
        if self.pending.contains_key(key) {
            return false;
        }
        let token = self.next_token;
        self.next_token += 1;
        let deadline = now.checked_add(after);
        self.pending
            .insert(key.clone(), PendingDiscard { deadline, token });
        if let Some(deadline) = deadline {
            self.by_deadline.insert((deadline, token), key.clone());
        }
        true
    }

    /// Cancel any pending discard for `key`. Returns true if one was pending.
    pub fn cancel(&mut self, key: &SubscriptionKey) -> bool {
        match self.pending.remove(key) {
            Some(pending) => {
                if let Some(deadline) = pending.deadline {
                    self.by_deadline.remove(&(deadline, pending.token));
                }
                true
            }
            None => false,
        }
    }

    /// Whether a discard is scheduled for `key`.
    pub fn is_pending(&self, key: &SubscriptionKey) -> bool {
        self.pending.contains_key(key)
    }

    /// The pending discard for `key`, if any.
    pub fn get(&self, key: &SubscriptionKey) -> Option<PendingDiscard> {
        self.pending.get(key).copied()
    }

    /// Earliest deadline among pending discards.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Clear and fire every discard whose deadline is at or before `now`,
    /// earliest first. Returns the number fired.
    pub fn fire_due<F>(&mut self, now: Instant, mut on_fire: F) -> usize
    where
        F: FnMut(SubscriptionKey),
    {
        let mut fired = 0;
        while let Some(entry) = self.by_deadline.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let key = entry.remove();
            self.pending.remove(&key);
            on_fire(key);
            fired += 1;
        }
        fired
    }

    /// Clear and fire every pending discard regardless of deadline:
    /// dated ones earliest first, then undated ones in key order.
    pub fn fire_all<F>(&mut self, mut on_fire: F) -> usize
    where
        F: FnMut(SubscriptionKey),
    {
        let dated = std::mem::take(&mut self.by_deadline);
        let mut undated: Vec<SubscriptionKey> = self
            .pending
            .drain()
            .filter(|(_, pending)| pending.deadline.is_none())
            .map(|(key, _)| key)
            .collect();
        undated.sort();

        let count = dated.len() + undated.len();
        for key in dated.into_values().chain(undated) {
            on_fire(key);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
