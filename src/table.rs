//! The subscription table: canonical key to live handle plus retain metadata.

use crate::error::{Result, SubsError};
use crate::subscriber::SubscriptionHandle;
use crate::types::SubscriptionKey;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// A live subscription and its bookkeeping.
pub struct SubscriptionEntry {
    handle: Box<dyn SubscriptionHandle>,
    /// Number of outstanding `need` descriptors.
    pub retain_count: u32,
    /// Whether the most recent transition asked for this key.
    pub required_by_state: bool,
}

impl SubscriptionEntry {
    /// Neither retained nor required; eligible for discard.
    pub fn is_idle(&self) -> bool {
        self.retain_count == 0 && !self.required_by_state
    }
}

impl std::fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("retain_count", &self.retain_count)
            .field("required_by_state", &self.required_by_state)
            .finish_non_exhaustive()
    }
}

/// An entry exists for a key iff its handle has not been stopped.
#[derive(Default)]
pub struct SubscriptionTable {
    entries: HashMap<SubscriptionKey, SubscriptionEntry>,
}

impl SubscriptionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The entry for `key`, if its subscription is open.
    pub fn get(&self, key: &SubscriptionKey) -> Option<&SubscriptionEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &SubscriptionKey) -> Option<&mut SubscriptionEntry> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert a freshly opened handle with no retains and no state flag.
    ///
    /// A handle already stored under `key` is stopped first so it is never
    /// orphaned.
    pub fn put(
        &mut self,
        key: SubscriptionKey,
        handle: Box<dyn SubscriptionHandle>,
    ) -> &mut SubscriptionEntry {
        let entry = SubscriptionEntry {
            handle,
            retain_count: 0,
            required_by_state: false,
        };
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                tracing::warn!(key = %occupied.key(), "replacing live subscription handle");
                let mut previous = occupied.insert(entry);
                previous.handle.stop();
                occupied.into_mut()
            }
            Entry::Vacant(vacant) => vacant.insert(entry),
        }
    }

    /// Stop and forget the handle for `key`. Absent keys are a no-op.
    pub fn remove(&mut self, key: &SubscriptionKey) -> bool {
        match self.entries.remove(key) {
            Some(mut entry) => {
                entry.handle.stop();
                true
            }
            None => false,
        }
    }

    /// Increment the retain count of an existing entry.
    pub fn retain(&mut self, key: &SubscriptionKey) -> Option<u32> {
        self.entries.get_mut(key).map(|entry| {
            entry.retain_count += 1;
            entry.retain_count
        })
    }

    /// Decrement the retain count, returning the remaining count.
    pub fn release(&mut self, key: &SubscriptionKey) -> Result<u32> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| SubsError::NotRetained(key.clone()))?;
        if entry.retain_count == 0 {
            return Err(SubsError::NotRetained(key.clone()));
        }
        entry.retain_count -= 1;
        Ok(entry.retain_count)
    }

    pub fn keys(&self) -> impl Iterator<Item = &SubscriptionKey> {
        self.entries.keys()
    }

    pub fn iter_mut(
        &mut self,
    ) -> impl Iterator<Item = (&SubscriptionKey, &mut SubscriptionEntry)> {
        self.entries.iter_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SubscriptionKey, &SubscriptionEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stop every handle. Returns how many were stopped.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        for (_, mut entry) in self.entries.drain() {
            entry.handle.stop();
        }
        count
    }
}

impl Drop for SubscriptionTable {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counted(Arc<AtomicUsize>);

    impl SubscriptionHandle for Counted {
        fn stop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn key(s: &str) -> SubscriptionKey {
        SubscriptionKey::from(s)
    }

    #[test]
    fn test_put_starts_unretained() {
        let mut table = SubscriptionTable::new();
        let stops = Arc::new(AtomicUsize::new(0));
        let entry = table.put(key("a"), Box::new(Counted(Arc::clone(&stops))));
        assert_eq!(entry.retain_count, 0);
        assert!(!entry.required_by_state);
        assert!(entry.is_idle());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_stops_once_and_is_idempotent() {
        let mut table = SubscriptionTable::new();
        let stops = Arc::new(AtomicUsize::new(0));
        table.put(key("a"), Box::new(Counted(Arc::clone(&stops))));

        assert!(table.remove(&key("a")));
        assert!(!table.remove(&key("a")));
        assert!(!table.remove(&key("never")));
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_retain_release() {
        let mut table = SubscriptionTable::new();
        let stops = Arc::new(AtomicUsize::new(0));
        table.put(key("a"), Box::new(Counted(Arc::clone(&stops))));

        assert_eq!(table.retain(&key("a")), Some(1));
        assert_eq!(table.retain(&key("a")), Some(2));
        assert_eq!(table.release(&key("a")).unwrap(), 1);
        assert_eq!(table.release(&key("a")).unwrap(), 0);
        assert!(matches!(
            table.release(&key("a")),
            Err(SubsError::NotRetained(_))
        ));
        assert!(matches!(
            table.release(&key("b")),
            Err(SubsError::NotRetained(_))
        ));
        assert_eq!(table.retain(&key("b")), None);
    }

    #[test]
    fn test_put_replaces_and_stops_previous() {
        let mut table = SubscriptionTable::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        table.put(key("a"), Box::new(Counted(Arc::clone(&first))));
        table.put(key("a"), Box::new(Counted(Arc::clone(&second))));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_stops_everything() {
        let stops = Arc::new(AtomicUsize::new(0));
        {
            let mut table = SubscriptionTable::new();
            table.put(key("a"), Box::new(Counted(Arc::clone(&stops))));
            table.put(key("b"), Box::new(Counted(Arc::clone(&stops))));
        }
        assert_eq!(stops.load(Ordering::SeqCst), 2);
    }
}
