use std::sync::RwLock;

use dashmap::DashMap;

use pagemq_kv::KvStore;
use pagemq_util::{unix_secs, UnixSecs};

use crate::topic_lock::TopicLockRegistry;
use crate::{keys, RetentionError};

/// Tracks when each topic was last checked for expired pages. Process-local;
/// seeded from the metadata store at startup.
#[derive(Debug, Default)]
pub struct RetentionTracker {
    // topic -> last retention check, unix seconds
    last_checked: DashMap<String, UnixSecs>,
    // held shared across loop iteration, mirroring the writer path's
    // exclusive use during topic teardown
    mutex: RwLock<()>,
}

impl RetentionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discovers topics under `topic_id/`, stamps each with the current
    /// time, and makes sure the lock registry knows them.
    pub fn init(&self, meta: &dyn KvStore, locks: &TopicLockRegistry) -> Result<(), RetentionError> {
        let pairs = meta.load_with_prefix(keys::TOPIC_ID_PREFIX.as_bytes())?;
        let now = unix_secs();
        for (key, _) in pairs {
            let topic = std::str::from_utf8(&key[keys::TOPIC_ID_PREFIX.len()..])
                .map_err(|_| RetentionError::KeyDecode {
                    key: String::from_utf8_lossy(&key).into_owned(),
                    reason: "topic name is not valid utf-8".into(),
                })?
                .to_string();
            locks.ensure(&topic);
            self.last_checked.insert(topic, now);
        }
        Ok(())
    }

    /// Insert-or-replace; also used when a topic is created at runtime.
    pub fn touch(&self, topic: &str, ts: UnixSecs) {
        self.last_checked.insert(topic.to_string(), ts);
    }

    pub fn last_checked(&self, topic: &str) -> Option<UnixSecs> {
        self.last_checked.get(topic).map(|entry| *entry.value())
    }

    /// Iterates a snapshot of the tracked topics. The callback may call
    /// back into the tracker (e.g. `touch`).
    pub fn for_each(&self, mut f: impl FnMut(&str, UnixSecs)) {
        let _guard = match self.mutex.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let snapshot: Vec<(String, UnixSecs)> = self
            .last_checked
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        for (topic, ts) in snapshot {
            f(&topic, ts);
        }
    }

    pub fn len(&self) -> usize {
        self.last_checked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_checked.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagemq_kv::{mem::MemKv, WriteBatch};

    #[test]
    fn init_discovers_topics_and_ensures_locks() -> Result<(), RetentionError> {
        let meta = MemKv::new();
        let mut batch = WriteBatch::default();
        batch.put(keys::topic_id_key("alpha"), b"".as_slice());
        batch.put(keys::topic_id_key("beta"), b"".as_slice());
        batch.put(b"page_msg_size/alpha/1".as_slice(), b"10".as_slice());
        meta.write(batch)?;

        let locks = TopicLockRegistry::new();
        let tracker = RetentionTracker::new();
        tracker.init(&meta, &locks)?;

        assert_eq!(tracker.len(), 2);
        assert!(tracker.last_checked("alpha").is_some());
        assert!(locks.get("beta").is_some());
        assert!(locks.get("page_msg_size").is_none());
        Ok(())
    }

    #[test]
    fn touch_replaces_and_never_removes() {
        let tracker = RetentionTracker::new();
        tracker.touch("t", 100);
        tracker.touch("t", 200);
        assert_eq!(tracker.last_checked("t"), Some(200));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn for_each_tolerates_reentrant_touch() {
        let tracker = RetentionTracker::new();
        tracker.touch("a", 1);
        tracker.touch("b", 2);

        let mut seen = Vec::new();
        tracker.for_each(|topic, ts| {
            seen.push((topic.to_string(), ts));
            tracker.touch(topic, ts + 10);
        });

        seen.sort();
        assert_eq!(seen, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
        assert_eq!(tracker.last_checked("a"), Some(11));
        assert_eq!(tracker.last_checked("b"), Some(12));
    }
}
