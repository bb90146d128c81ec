use std::sync::{Arc, Mutex};

use dashmap::DashMap;

/// Process-wide map from topic name to its mutual-exclusion lock. Writers
/// and the retention engine hold a topic's lock around any mutation that
/// overlaps producer state.
///
/// Locks materialize on first reference and are never destroyed; removal
/// would race with concurrent acquirers.
#[derive(Debug, Default)]
pub struct TopicLockRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TopicLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the topic's entry if it does not exist yet.
    pub fn ensure(&self, topic: &str) {
        self.locks.entry(topic.to_string()).or_default();
    }

    /// Get-or-create. Concurrent first-time callers observe the same lock
    /// instance.
    pub fn lock_for(&self, topic: &str) -> Arc<Mutex<()>> {
        self.locks.entry(topic.to_string()).or_default().clone()
    }

    /// Lookup without creating. The retention delete path requires the
    /// entry to have been created at init time.
    pub fn get(&self, topic: &str) -> Option<Arc<Mutex<()>>> {
        self.locks.get(topic).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_for_creates_on_first_reference() {
        let registry = TopicLockRegistry::new();
        assert!(registry.get("t").is_none());

        let lock = registry.lock_for("t");
        let again = registry.get("t").expect("entry must persist");
        assert!(Arc::ptr_eq(&lock, &again));
    }

    #[test]
    fn concurrent_first_acquirers_share_one_instance() {
        let registry = Arc::new(TopicLockRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.lock_for("shared"))
            })
            .collect();

        let locks: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for lock in &locks[1..] {
            assert!(Arc::ptr_eq(&locks[0], lock));
        }
    }

    #[test]
    fn ensure_is_idempotent() {
        let registry = TopicLockRegistry::new();
        registry.ensure("t");
        let first = registry.get("t").unwrap();
        registry.ensure("t");
        let second = registry.get("t").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
