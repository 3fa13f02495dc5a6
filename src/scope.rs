//! Owner scopes for bound descriptors.
//!
//! A [`Scope`] stands in for an externally owned resource (a view, a
//! session, a component) whose teardown should drop the subscriptions it
//! asked for. Descriptors bound to a scope are released exactly once when
//! the scope is torn down or dropped.

use crate::error::SubsError;
use crate::reconciler::Retained;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct ScopeState {
    torn_down: bool,
    bound: Vec<Retained>,
}

/// Shared handle the reconciler worker uses to attach descriptors.
#[derive(Clone)]
pub(crate) struct ScopeBinding {
    state: Arc<Mutex<ScopeState>>,
}

impl ScopeBinding {
    /// Attach `retained` unless the scope is already torn down.
    pub(crate) fn attach(&self, retained: &Retained) -> bool {
        let mut state = self.state.lock();
        if state.torn_down {
            return false;
        }
        state.bound.push(retained.clone());
        true
    }
}

/// Owner whose teardown releases every descriptor bound to it.
pub struct Scope {
    binding: ScopeBinding,
}

impl Scope {
    pub fn new() -> Self {
        Self {
            binding: ScopeBinding {
                state: Arc::new(Mutex::new(ScopeState::default())),
            },
        }
    }

    pub(crate) fn binding(&self) -> ScopeBinding {
        self.binding.clone()
    }

    /// Bind an existing descriptor. If the scope is already torn down the
    /// descriptor is released right away.
    pub fn bind(&self, retained: &Retained) {
        if !self.binding.attach(retained) {
            release_quietly(retained);
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.binding.state.lock().torn_down
    }

    /// Number of descriptors currently bound.
    pub fn bound_count(&self) -> usize {
        self.binding.state.lock().bound.len()
    }

    /// Release every bound descriptor. Later calls do nothing.
    ///
    /// Returns how many descriptors this call released.
    pub fn teardown(&self) -> usize {
        let bound = {
            let mut state = self.binding.state.lock();
            state.torn_down = true;
            std::mem::take(&mut state.bound)
        };
        bound.iter().filter(|r| release_quietly(r)).count()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn release_quietly(retained: &Retained) -> bool {
    match retained.release() {
        Ok(()) => true,
        Err(SubsError::AlreadyReleased(_)) => false,
        Err(error) => {
            tracing::debug!(key = %retained.key(), %error, "scope release failed");
            false
        }
    }
}
