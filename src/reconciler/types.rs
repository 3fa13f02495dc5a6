//! Types shared between the reconciler handle and its worker.

use crate::error::{Result, SubsError};
use crate::scope::ScopeBinding;
use crate::types::{SubscriptionKey, SubscriptionPayload};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default grace period before an unneeded subscription is stopped.
pub const DEFAULT_DISCARD_GRACE: Duration = Duration::from_secs(10);

/// Configuration for a reconciler.
#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// How long an unneeded subscription stays open before it is stopped.
    /// Default: 10s
    pub discard_grace: Duration,

    /// Command queue bound (None = unbounded). Submitting to a full queue
    /// blocks the caller.
    pub queue_capacity: Option<usize>,

    /// Name of the worker thread.
    pub thread_name: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            discard_grace: DEFAULT_DISCARD_GRACE,
            queue_capacity: None,
            thread_name: "substance-reconciler".to_string(),
        }
    }
}

impl ReconcilerConfig {
    /// Set how long an unneeded subscription stays open.
    pub fn with_discard_grace(mut self, grace: Duration) -> Self {
        self.discard_grace = grace;
        self
    }

    /// Bound the command queue to `capacity` pending operations.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }
}

/// Work items for the reconciler worker, processed strictly in order.
pub(crate) enum Command {
    Transition {
        payloads: Vec<SubscriptionPayload>,
        reply: Sender<Result<()>>,
    },
    Need {
        payload: SubscriptionPayload,
        bind: Option<ScopeBinding>,
        reply: Sender<Result<Retained>>,
    },
    NeedAll {
        payloads: Vec<SubscriptionPayload>,
        reply: Sender<Result<RetainedSet>>,
    },
    Release {
        key: SubscriptionKey,
    },
    Snapshot {
        reply: Sender<Result<TableSnapshot>>,
    },
    FlushDiscards {
        reply: Sender<Result<usize>>,
    },
    Shutdown,
}

/// Pending result of a queued operation.
///
/// The result can be taken once; asking again after it was delivered
/// yields [`SubsError::QueueFault`].
#[must_use = "a completion does nothing unless waited on"]
pub struct Completion<T> {
    receiver: Receiver<Result<T>>,
}

impl<T> Completion<T> {
    pub(crate) fn channel() -> (Sender<Result<T>>, Self) {
        let (sender, receiver) = bounded(1);
        (sender, Self { receiver })
    }

    /// Block until the operation settles.
    pub fn wait(self) -> Result<T> {
        self.receiver.recv().unwrap_or_else(|_| Err(dropped()))
    }

    /// Block for at most `timeout`. Returns None if still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(dropped())),
        }
    }

    /// Non-blocking poll. Returns None if still pending.
    pub fn try_get(&self) -> Option<Result<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(dropped())),
        }
    }
}

fn dropped() -> SubsError {
    SubsError::QueueFault("operation dropped before it settled".to_string())
}

struct RetainedInner {
    key: SubscriptionKey,
    released: AtomicBool,
    commands: Sender<Command>,
}

impl Drop for RetainedInner {
    fn drop(&mut self) {
        if !*self.released.get_mut() {
            tracing::debug!(key = %self.key, "descriptor dropped while held, releasing");
            let _ = self.commands.send(Command::Release {
                key: self.key.clone(),
            });
        }
    }
}

/// Release descriptor for an ad hoc `need`.
///
/// Clones share one release: whichever clone releases first wins, the rest
/// get [`SubsError::AlreadyReleased`]. Dropping the last clone of a
/// descriptor that is still held releases it.
#[derive(Clone)]
pub struct Retained {
    inner: Arc<RetainedInner>,
}

impl Retained {
    pub(crate) fn new(key: SubscriptionKey, commands: Sender<Command>) -> Self {
        Self {
            inner: Arc::new(RetainedInner {
                key,
                released: AtomicBool::new(false),
                commands,
            }),
        }
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.inner.key
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Give up this hold on the subscription.
    ///
    /// When the last hold goes and no transition requires the key, a
    /// discard is scheduled.
    pub fn release(&self) -> Result<()> {
        if !self.mark_released() {
            return Err(SubsError::AlreadyReleased(self.inner.key.clone()));
        }
        tracing::debug!(key = %self.inner.key, "releasing descriptor");
        self.inner
            .commands
            .send(Command::Release {
                key: self.inner.key.clone(),
            })
            .map_err(|_| SubsError::QueueFault("reconciler has shut down".to_string()))
    }

    /// Flip the released flag. Returns false if it was already set.
    pub(crate) fn mark_released(&self) -> bool {
        !self.inner.released.swap(true, Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Retained {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retained")
            .field("key", &self.inner.key)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Several descriptors held and released as a unit.
#[derive(Clone, Debug)]
pub struct RetainedSet {
    members: Vec<Retained>,
}

impl RetainedSet {
    pub(crate) fn new(members: Vec<Retained>) -> Self {
        Self { members }
    }

    pub fn members(&self) -> &[Retained] {
        &self.members
    }

    pub fn keys(&self) -> impl Iterator<Item = &SubscriptionKey> {
        self.members.iter().map(Retained::key)
    }

    pub fn is_released(&self) -> bool {
        self.members.iter().all(Retained::is_released)
    }

    /// Release every member still held.
    ///
    /// Fails with [`SubsError::AlreadyReleased`] if nothing was left to
    /// release.
    pub fn release(&self) -> Result<()> {
        let mut released_any = false;
        let mut first_error = None;
        for member in self.members.iter().filter(|m| !m.is_released()) {
            match member.release() {
                Ok(()) => released_any = true,
                Err(SubsError::AlreadyReleased(_)) => {}
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }
        if let Some(error) = first_error {
            return Err(error);
        }
        if !released_any && !self.members.is_empty() {
            return Err(SubsError::AlreadyReleased(self.members[0].key().clone()));
        }
        Ok(())
    }
}

/// Point-in-time view of one table entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntrySnapshot {
    pub key: SubscriptionKey,
    pub retain_count: u32,
    pub required_by_state: bool,
    pub discard_pending: bool,
}

/// Point-in-time view of the subscription table, sorted by key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TableSnapshot {
    pub entries: Vec<EntrySnapshot>,
}

impl TableSnapshot {
    pub fn get(&self, key: &str) -> Option<&EntrySnapshot> {
        self.entries.iter().find(|e| e.key.as_str() == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.key.as_str()).collect()
    }

    /// Keys the current declarative state requires.
    pub fn required_keys(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.required_by_state)
            .map(|e| e.key.as_str())
            .collect()
    }

    pub fn pending_discards(&self) -> usize {
        self.entries.iter().filter(|e| e.discard_pending).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
