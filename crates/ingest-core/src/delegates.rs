//! Observer registry shared by channels, senders, and the log manager.
//!
//! Callbacks are always invoked on a snapshot taken outside the lock, so a
//! delegate may add or remove delegates while being notified.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by [`DelegateRegistry::add`], used to remove the delegate.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct DelegateId(u64);

static NEXT_DELEGATE_ID: AtomicU64 = AtomicU64::new(1);

impl DelegateId {
    fn next() -> Self {
        Self(NEXT_DELEGATE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Ordered list of registered delegates.
pub struct DelegateRegistry<D: ?Sized> {
    entries: Mutex<Vec<(DelegateId, Arc<D>)>>,
}

impl<D: ?Sized> DelegateRegistry<D> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register a delegate. Registering the same `Arc` twice is a no-op and
    /// returns the existing handle.
    pub fn add(&self, delegate: Arc<D>) -> DelegateId {
        let mut entries = self.entries.lock();
        if let Some((id, _)) = entries.iter().find(|(_, d)| Arc::ptr_eq(d, &delegate)) {
            return *id;
        }
        let id = DelegateId::next();
        entries.push((id, delegate));
        id
    }

    /// Remove a delegate. Returns `false` if it was not registered.
    pub fn remove(&self, id: DelegateId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Current delegates in registration order.
    pub fn snapshot(&self) -> Vec<Arc<D>> {
        self.entries
            .lock()
            .iter()
            .map(|(_, delegate)| Arc::clone(delegate))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<D: ?Sized> Default for DelegateRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: ?Sized> std::fmt::Debug for DelegateRegistry<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Fixed(&'static str);

    impl Named for Fixed {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_snapshot_preserves_registration_order() {
        let registry: DelegateRegistry<dyn Named> = DelegateRegistry::new();
        registry.add(Arc::new(Fixed("first")));
        registry.add(Arc::new(Fixed("second")));

        let names: Vec<String> = registry
            .snapshot()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_add_same_delegate_twice_is_noop() {
        let registry: DelegateRegistry<dyn Named> = DelegateRegistry::new();
        let delegate: Arc<dyn Named> = Arc::new(Fixed("only"));

        let first = registry.add(Arc::clone(&delegate));
        let second = registry.add(delegate);
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_by_handle() {
        let registry: DelegateRegistry<dyn Named> = DelegateRegistry::new();
        let keep = registry.add(Arc::new(Fixed("keep")));
        let drop_id = registry.add(Arc::new(Fixed("drop")));

        assert!(registry.remove(drop_id));
        assert!(!registry.remove(drop_id));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(keep));
        assert!(registry.is_empty());
    }
}
