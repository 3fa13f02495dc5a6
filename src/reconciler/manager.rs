//! The reconciler worker: sole owner of the subscription table and the
//! discard registry.

use crate::discard::DiscardRegistry;
use crate::error::Result;
use crate::scope::ScopeBinding;
use crate::subscriber::{ErrorSink, Subscriber};
use crate::table::SubscriptionTable;
use crate::types::{SubscriptionKey, SubscriptionPayload};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendError, Sender};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::types::{Command, EntrySnapshot, Retained, RetainedSet, TableSnapshot};

/// State driven by the worker thread. Commands arrive in submission order
/// and each one runs to completion before the next is read, so no two
/// reconciliation steps interleave. Discard deadlines are checked between
/// commands on the same thread.
pub(crate) struct Worker {
    table: SubscriptionTable,
    discards: DiscardRegistry,
    subscriber: Box<dyn Subscriber>,
    sink: Arc<dyn ErrorSink>,
    discard_grace: Duration,
    /// Minted into every [`Retained`] so releases land on this queue.
    commands: Sender<Command>,
    receiver: Receiver<Command>,
}

impl Worker {
    pub(crate) fn new(
        subscriber: Box<dyn Subscriber>,
        sink: Arc<dyn ErrorSink>,
        discard_grace: Duration,
        commands: Sender<Command>,
        receiver: Receiver<Command>,
    ) -> Self {
        Self {
            table: SubscriptionTable::new(),
            discards: DiscardRegistry::new(),
            subscriber,
            sink,
            discard_grace,
            commands,
            receiver,
        }
    }

    /// Run until a shutdown command arrives, then stop every open handle.
    pub(crate) fn run(mut self) {
        debug!("reconciler worker started");
        loop {
            let next = match self.discards.next_deadline() {
                Some(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    match self.receiver.recv_timeout(timeout) {
                        Ok(command) => Some(command),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match self.receiver.recv() {
                    Ok(command) => Some(command),
                    Err(_) => break,
                },
            };

            if let Some(command) = next {
                if !self.handle(command) {
                    break;
                }
            }
            self.fire_due_discards(Instant::now());
        }

        let stopped = self.table.clear();
        debug!(stopped, "reconciler worker stopped");
    }

    /// Process one command. Returns false on shutdown.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Transition { payloads, reply } => {
                let result = self.transition(payloads);
                if let Err(error) = &result {
                    warn!(%error, "transition step failed");
                    self.sink.report(error);
                }
                let _ = reply.send(result);
            }
            Command::Need {
                payload,
                bind,
                reply,
            } => {
                let bound = bind.is_some();
                let result = self.need(payload).map(|retained| {
                    if let Some(scope) = bind {
                        self.bind(&scope, &retained);
                    }
                    retained
                });
                // Nobody is left to release an undelivered hold; a bound one
                // still belongs to its scope.
                if let Err(SendError(Ok(retained))) = reply.send(result) {
                    if !bound {
                        debug!(key = %retained.key(), "need abandoned, releasing");
                        self.release_now(&retained);
                    }
                }
            }
            Command::NeedAll { payloads, reply } => {
                if let Err(SendError(Ok(set))) = reply.send(self.need_all(payloads)) {
                    debug!(members = set.members().len(), "need_all abandoned, releasing");
                    for retained in set.members() {
                        self.release_now(retained);
                    }
                }
            }
            Command::Release { key } => {
                if let Err(error) = self.release(&key) {
                    warn!(%error, "release failed");
                    self.sink.report(&error);
                }
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(Ok(self.snapshot()));
            }
            Command::FlushDiscards { reply } => {
                let _ = reply.send(Ok(self.flush_discards()));
            }
            Command::Shutdown => return false,
        }
        true
    }

    /// Reconcile the table against `next`: rescue or schedule discards for
    /// existing entries, then open whatever is missing.
    fn transition(&mut self, next: Vec<SubscriptionPayload>) -> Result<()> {
        let wanted: HashSet<&SubscriptionKey> = next.iter().map(|p| &p.key).collect();
        let now = Instant::now();

        for (key, entry) in self.table.iter_mut() {
            let is_next = wanted.contains(key);
            if is_next {
                if self.discards.cancel(key) {
                    debug!(%key, "discard cancelled, subscription wanted again");
                }
            } else if entry.retain_count == 0
                && self.discards.schedule(key, self.discard_grace, now)
            {
                debug!(%key, grace = ?self.discard_grace, "discard scheduled");
            }
            entry.required_by_state = is_next;
        }

        let pending: Vec<&SubscriptionPayload> = next
            .iter()
            .filter(|p| !self.table.contains(&p.key))
            .collect();
        trace!(wanted = wanted.len(), opening = pending.len(), "transition diff");

        let mut first_error = None;
        for payload in pending {
            match self.subscriber.open(payload) {
                Ok(handle) => {
                    debug!(key = %payload.key, "subscription opened");
                    self.table.put(payload.key.clone(), handle).required_by_state = true;
                }
                Err(error) => {
                    debug!(key = %payload.key, %error, "subscription open failed");
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Retain `payload`, opening it if nothing holds it yet.
    fn need(&mut self, payload: SubscriptionPayload) -> Result<Retained> {
        let key = payload.key.clone();
        if let Some(retain_count) = self.table.retain(&key) {
            if self.discards.cancel(&key) {
                debug!(%key, "discard cancelled, subscription needed");
            }
            debug!(%key, retain_count, "retained open subscription");
        } else {
            let handle = self.subscriber.open(&payload)?;
            self.table.put(key.clone(), handle).retain_count = 1;
            debug!(%key, "subscription opened on demand");
        }
        Ok(Retained::new(key, self.commands.clone()))
    }

    /// Retain every payload or none of them.
    fn need_all(&mut self, payloads: Vec<SubscriptionPayload>) -> Result<RetainedSet> {
        let mut members = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match self.need(payload) {
                Ok(retained) => members.push(retained),
                Err(error) => {
                    for retained in &members {
                        self.release_now(retained);
                    }
                    return Err(error);
                }
            }
        }
        Ok(RetainedSet::new(members))
    }

    fn bind(&mut self, scope: &ScopeBinding, retained: &Retained) {
        if !scope.attach(retained) {
            debug!(key = %retained.key(), "scope already torn down, releasing");
            self.release_now(retained);
        }
    }

    /// Release on the worker itself, bypassing the queue.
    fn release_now(&mut self, retained: &Retained) {
        if retained.mark_released() {
            if let Err(error) = self.release(retained.key()) {
                self.sink.report(&error);
            }
        }
    }

    fn release(&mut self, key: &SubscriptionKey) -> Result<()> {
        let remaining = self.table.release(key)?;
        trace!(%key, remaining, "descriptor released");
        if remaining > 0 {
            return Ok(());
        }
        let required = self
            .table
            .get(key)
            .map(|entry| entry.required_by_state)
            .unwrap_or(false);
        if !required && self.discards.schedule(key, self.discard_grace, Instant::now()) {
            debug!(%key, grace = ?self.discard_grace, "last hold released, discard scheduled");
        }
        Ok(())
    }

    fn fire_due_discards(&mut self, now: Instant) {
        let table = &mut self.table;
        self.discards.fire_due(now, |key| {
            discard(table, &key);
        });
    }

    fn flush_discards(&mut self) -> usize {
        let table = &mut self.table;
        let mut stopped = 0;
        self.discards.fire_all(|key| {
            if discard(table, &key) {
                stopped += 1;
            }
        });
        debug!(stopped, "pending discards flushed");
        stopped
    }

    fn snapshot(&self) -> TableSnapshot {
        let mut entries: Vec<EntrySnapshot> = self
            .table
            .iter()
            .map(|(key, entry)| EntrySnapshot {
                key: key.clone(),
                retain_count: entry.retain_count,
                required_by_state: entry.required_by_state,
                discard_pending: self.discards.is_pending(key),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        TableSnapshot { entries }
    }
}

/// Stop `key` if it is still idle when its discard fires.
fn discard(table: &mut SubscriptionTable, key: &SubscriptionKey) -> bool {
    match table.get(key) {
        Some(entry) if entry.is_idle() => {
            debug!(%key, "discarding subscription");
            table.remove(key)
        }
        Some(entry) => {
            trace!(%key, ?entry, "discard skipped, subscription in use");
            false
        }
        None => false,
    }
}
