//! Collaborator contracts: the backend that opens subscriptions and the sink
//! that receives transition failures.

use crate::error::{Result, SubsError};
use crate::types::SubscriptionPayload;

/// An open subscription. The reconciler calls `stop` at most once.
pub trait SubscriptionHandle: Send {
    fn stop(&mut self);
}

/// Opens named, parameterized subscriptions.
///
/// Called only from the reconciler's worker thread, so a slow `open`
/// holds up every queued operation behind it.
pub trait Subscriber: Send + 'static {
    /// Open the subscription described by `payload`.
    ///
    /// Backend rejections should be returned as [`SubsError::Open`].
    fn open(&mut self, payload: &SubscriptionPayload) -> Result<Box<dyn SubscriptionHandle>>;
}

impl<F> Subscriber for F
where
    F: FnMut(&SubscriptionPayload) -> Result<Box<dyn SubscriptionHandle>> + Send + 'static,
{
    fn open(&mut self, payload: &SubscriptionPayload) -> Result<Box<dyn SubscriptionHandle>> {
        self(payload)
    }
}

/// Receives failures of queued transitions and worker-side releases.
pub trait ErrorSink: Send + Sync + 'static {
    fn report(&self, error: &SubsError);
}

/// Default sink: logs the failure.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn report(&self, error: &SubsError) {
        tracing::warn!(%error, "subscription transition failed");
    }
}
