//! # Substance
//!
//! Client-side subscription lifecycle management. Callers declare which live
//! data subscriptions the current state needs; the reconciler opens what is
//! missing and tears down what is no longer wanted, after a grace period that
//! absorbs rapid back-and-forth navigation.
//!
//! ## Core Concepts
//!
//! - **Descriptors**: a bare name, a name with arguments, or a raw
//!   `[name, args..]` array, normalized to a canonical key
//! - **Transitions**: declarative requirement sets, processed strictly in
//!   submission order
//! - **Needs**: ad hoc, retain-counted holds that outlive transitions
//! - **Discards**: delayed, cancellable teardown of unneeded subscriptions
//!
//! ## Example
//!
//! ```ignore
//! use serde_json::json;
//! use substance::{Descriptor, LogErrorSink, Reconciler, ReconcilerConfig, Scope};
//!
//! let reconciler = Reconciler::spawn(ReconcilerConfig::default(), backend, LogErrorSink)?;
//!
//! reconciler
//!     .transition([Descriptor::named("books", [json!("scifi"), json!(2)]), "favourites".into()])?
//!     .wait()?;
//!
//! let scope = Scope::new();
//! let _profile = reconciler.need_bound(&scope, "profile")?.wait()?;
//! drop(scope); // releases "profile"
//! ```

pub mod discard;
pub mod error;
pub mod normalize;
pub mod reconciler;
pub mod scope;
pub mod subscriber;
pub mod table;
pub mod types;

// Re-exports
pub use discard::{DiscardRegistry, PendingDiscard};
pub use error::{Result, SubsError};
pub use normalize::{key_for, normalize, normalize_json, normalize_set};
pub use reconciler::{
    Completion, EntrySnapshot, Reconciler, ReconcilerConfig, Retained, RetainedSet,
    TableSnapshot, DEFAULT_DISCARD_GRACE,
};
pub use scope::Scope;
pub use subscriber::{ErrorSink, LogErrorSink, Subscriber, SubscriptionHandle};
pub use table::{SubscriptionEntry, SubscriptionTable};
pub use types::{Descriptor, SubscriptionKey, SubscriptionPayload};
