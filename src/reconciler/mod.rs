//! Transition queue and reconciler.
//!
//! [`Reconciler`] is the handle callers hold. Every operation is posted to a
//! single worker thread that owns the subscription table and the discard
//! registry, so operations run strictly in submission order and never
//! interleave.
//!
//! # Example
//!
//! ```ignore
//! let reconciler = Reconciler::spawn(ReconcilerConfig::default(), subscriber, LogErrorSink)?;
//!
//! // Entering a view that needs two feeds
//! reconciler
//!     .transition([Descriptor::from("books"), Descriptor::named("shelf", [3])])?
//!     .wait()?;
//!
//! // An ad hoc hold that outlives the view
//! let cart = reconciler.need("cart")?.wait()?;
//! reconciler.transition(Vec::<Descriptor>::new())?.wait()?;
//! cart.release()?;
//! ```

mod manager;
mod types;

pub use types::{
    Completion, EntrySnapshot, ReconcilerConfig, Retained, RetainedSet, TableSnapshot,
    DEFAULT_DISCARD_GRACE,
};

use crate::error::{Result, SubsError};
use crate::normalize::{normalize, normalize_json, normalize_set};
use crate::scope::Scope;
use crate::subscriber::{ErrorSink, LogErrorSink, Subscriber};
use crate::types::{Descriptor, SubscriptionPayload};
use crossbeam_channel::{bounded, unbounded, Sender};
use manager::Worker;
use serde_json::Value;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use types::Command;

/// Handle to a running reconciler.
///
/// Dropping it processes whatever is already queued, stops every open
/// subscription and joins the worker.
pub struct Reconciler {
    config: ReconcilerConfig,
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl Reconciler {
    /// Start a reconciler with its own worker thread.
    pub fn spawn<S, E>(config: ReconcilerConfig, subscriber: S, sink: E) -> Result<Self>
    where
        S: Subscriber,
        E: ErrorSink,
    {
        let (commands, receiver) = match config.queue_capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };

        let worker = Worker::new(
            Box::new(subscriber),
            Arc::new(sink),
            config.discard_grace,
            commands.clone(),
            receiver,
        );

        let thread = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || worker.run())
            .map_err(|e| SubsError::Spawn(e.to_string()))?;

        Ok(Self {
            config,
            commands,
            thread: Some(thread),
        })
    }

    /// Start a reconciler with the default config that logs failures.
    pub fn with_subscriber<S: Subscriber>(subscriber: S) -> Result<Self> {
        Self::spawn(ReconcilerConfig::default(), subscriber, LogErrorSink)
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Reconcile open subscriptions against a new requirement set.
    ///
    /// Malformed descriptors fail here, before anything is queued. Open
    /// failures settle the returned completion with the error and are also
    /// reported to the error sink.
    pub fn transition<I>(&self, descriptors: I) -> Result<Completion<()>>
    where
        I: IntoIterator,
        I::Item: Into<Descriptor>,
    {
        let descriptors: Vec<Descriptor> = descriptors.into_iter().map(Into::into).collect();
        let payloads = normalize_set(&descriptors)?;
        Ok(self.post_transition(payloads))
    }

    /// [`Reconciler::transition`] for a wire-level requirement set (`null` or
    /// an array of descriptors).
    pub fn transition_json(&self, value: Value) -> Result<Completion<()>> {
        let payloads = normalize_json(value)?;
        Ok(self.post_transition(payloads))
    }

    fn post_transition(&self, payloads: Vec<SubscriptionPayload>) -> Completion<()> {
        tracing::debug!(
            keys = ?payloads.iter().map(|p| p.key.as_str()).collect::<Vec<_>>(),
            "posting transition"
        );
        self.submit(|reply| Command::Transition { payloads, reply })
    }

    /// Hold a subscription open independently of the declarative state.
    pub fn need(&self, descriptor: impl Into<Descriptor>) -> Result<Completion<Retained>> {
        let payload = normalize(&descriptor.into())?;
        Ok(self.submit(|reply| Command::Need {
            payload,
            bind: None,
            reply,
        }))
    }

    /// [`Reconciler::need`], releasing automatically when `owner` is torn
    /// down.
    pub fn need_bound(
        &self,
        owner: &Scope,
        descriptor: impl Into<Descriptor>,
    ) -> Result<Completion<Retained>> {
        let payload = normalize(&descriptor.into())?;
        let bind = Some(owner.binding());
        Ok(self.submit(|reply| Command::Need {
            payload,
            bind,
            reply,
        }))
    }

    /// Hold several subscriptions as one unit. Either all are retained or,
    /// if any open fails, none stay retained.
    pub fn need_all<I>(&self, descriptors: I) -> Result<Completion<RetainedSet>>
    where
        I: IntoIterator,
        I::Item: Into<Descriptor>,
    {
        let descriptors: Vec<Descriptor> = descriptors.into_iter().map(Into::into).collect();
        let payloads = normalize_set(&descriptors)?;
        Ok(self.submit(|reply| Command::NeedAll { payloads, reply }))
    }

    /// Queued view of the subscription table.
    pub fn snapshot(&self) -> Completion<TableSnapshot> {
        self.submit(|reply| Command::Snapshot { reply })
    }

    /// Fire every pending discard now. Settles with the number of
    /// subscriptions stopped.
    pub fn flush_discards(&self) -> Completion<usize> {
        self.submit(|reply| Command::FlushDiscards { reply })
    }

    /// Drain the queue, stop every subscription and join the worker.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_worker()
    }

    fn submit<T, F>(&self, make: F) -> Completion<T>
    where
        F: FnOnce(Sender<Result<T>>) -> Command,
    {
        let (reply, completion) = Completion::channel();
        // On a dead worker the command, and with it `reply`, is dropped and
        // the completion settles as a queue fault.
        let _ = self.commands.send(make(reply));
        completion
    }

    fn stop_worker(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        let _ = self.commands.send(Command::Shutdown);
        thread
            .join()
            .map_err(|_| SubsError::QueueFault("reconciler worker panicked".to_string()))
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        let _ = self.stop_worker();
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("queued", &self.commands.len())
            .field("running", &self.thread.is_some())
            .finish()
    }
}
