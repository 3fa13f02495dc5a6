//! Shared fixtures: a recording backend and error sink.

#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use substance::{
    ErrorSink, Reconciler, ReconcilerConfig, SubsError, Subscriber, SubscriptionHandle,
    SubscriptionPayload, TableSnapshot,
};

#[derive(Default)]
struct BackendState {
    calls: Vec<Vec<Value>>,
    stops: HashMap<String, usize>,
    failing: HashSet<String>,
    latency: HashMap<String, Duration>,
}

/// In-memory backend that records every open and stop.
#[derive(Clone, Default)]
pub struct Backend {
    state: Arc<Mutex<BackendState>>,
}

impl Backend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every open of subscription `name`.
    pub fn fail(&self, name: &str) {
        self.state.lock().failing.insert(name.to_string());
    }

    /// Make opens of subscription `name` take `latency`.
    pub fn delay(&self, name: &str, latency: Duration) {
        self.state.lock().latency.insert(name.to_string(), latency);
    }

    /// Arguments of every open call, in call order.
    pub fn calls(&self) -> Vec<Vec<Value>> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Successful and failed opens whose first argument is `name`.
    pub fn opens_of(&self, name: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|args| args.first().and_then(Value::as_str) == Some(name))
            .count()
    }

    pub fn stops_of(&self, key: &str) -> usize {
        self.state.lock().stops.get(key).copied().unwrap_or(0)
    }

    pub fn total_stops(&self) -> usize {
        self.state.lock().stops.values().sum()
    }
}

struct RecordingHandle {
    key: String,
    state: Arc<Mutex<BackendState>>,
}

impl SubscriptionHandle for RecordingHandle {
    fn stop(&mut self) {
        *self.state.lock().stops.entry(self.key.clone()).or_insert(0) += 1;
    }
}

impl Subscriber for Backend {
    fn open(
        &mut self,
        payload: &SubscriptionPayload,
    ) -> substance::Result<Box<dyn SubscriptionHandle>> {
        let latency = {
            let mut state = self.state.lock();
            state.calls.push(payload.args.clone());
            if state.failing.contains(payload.name()) {
                return Err(SubsError::open(&payload.key, "rejected by backend"));
            }
            state.latency.get(payload.name()).copied()
        };
        if let Some(latency) = latency {
            thread::sleep(latency);
        }
        Ok(Box::new(RecordingHandle {
            key: payload.key.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

/// Error sink that keeps every report.
#[derive(Clone, Default)]
pub struct RecordingSink {
    errors: Arc<Mutex<Vec<SubsError>>>,
}

impl RecordingSink {
    pub fn errors(&self) -> Vec<SubsError> {
        self.errors.lock().clone()
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, error: &SubsError) {
        self.errors.lock().push(error.clone());
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Reconciler over a fresh backend with the given grace period.
pub fn spawn(grace: Duration) -> (Reconciler, Backend, RecordingSink) {
    init_tracing();
    let backend = Backend::new();
    let sink = RecordingSink::default();
    let reconciler = Reconciler::spawn(
        ReconcilerConfig::default().with_discard_grace(grace),
        backend.clone(),
        sink.clone(),
    )
    .unwrap();
    (reconciler, backend, sink)
}

pub fn snapshot(reconciler: &Reconciler) -> TableSnapshot {
    reconciler.snapshot().wait().unwrap()
}
