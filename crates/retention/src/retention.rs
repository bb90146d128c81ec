use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pagemq_kv::{prefix_successor, KvError, KvStore, WriteBatch};
use pagemq_util::unix_secs;

use crate::policy::{msg_size_expired, msg_time_expired};
use crate::topic_lock::TopicLockRegistry;
use crate::tracker::RetentionTracker;
use crate::{keys, PageId, RetentionConfig, RetentionError};

/// Background retention and space-reclamation engine for one queue
/// instance. Owns a single loop task driven by two tickers: a frequent
/// retention tick that evicts expired acked pages per topic, and a slow
/// compaction tick that asks both stores to reclaim the space freed by
/// range deletes.
#[derive(Debug)]
pub struct RetentionService {
    inner: Arc<Inner>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct Inner {
    config: RetentionConfig,
    meta: Arc<dyn KvStore>,
    data: Arc<dyn KvStore>,
    locks: Arc<TopicLockRegistry>,
    tracker: RetentionTracker,
}

impl RetentionService {
    /// Builds the engine and seeds the topic tracker from the metadata
    /// store.
    pub fn new(
        config: RetentionConfig,
        meta: Arc<dyn KvStore>,
        data: Arc<dyn KvStore>,
        locks: Arc<TopicLockRegistry>,
    ) -> Result<Self, RetentionError> {
        let tracker = RetentionTracker::new();
        tracker.init(meta.as_ref(), &locks)?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                meta,
                data,
                locks,
                tracker,
            }),
            shutdown: CancellationToken::new(),
            worker: Mutex::new(None),
        })
    }

    /// Spawns the retention loop. Subsequent calls are no-ops.
    pub fn start(&self) {
        let mut worker = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if worker.is_some() || self.shutdown.is_cancelled() {
            return;
        }

        let inner = self.inner.clone();
        let shutdown = self.shutdown.clone();
        *worker = Some(tokio::spawn(async move {
            inner.run(shutdown).await;
        }));
    }

    /// Signals shutdown (idempotent) and waits for the loop task to return.
    /// An in-flight per-topic pass is allowed to complete; the signal is
    /// only observed between passes.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let handle = {
            let mut worker = match self.worker.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            worker.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Registers a topic created after startup with the tracker and the
    /// lock registry.
    pub fn track_topic(&self, topic: &str) {
        self.inner.locks.ensure(topic);
        self.inner.tracker.touch(topic, unix_secs());
    }

    pub fn tracker(&self) -> &RetentionTracker {
        &self.inner.tracker
    }

    /// Runs one eviction pass for `topic`. Normally driven by the loop;
    /// exposed so the outer queue can force a pass (e.g. on topic drop).
    pub fn expired_clean_up(&self, topic: &str) -> Result<(), RetentionError> {
        self.inner.expired_clean_up(topic)
    }

    /// Sums the byte sizes of the contiguous acked page prefix of `topic`.
    pub fn calculate_topic_acked_size(&self, topic: &str) -> Result<i64, RetentionError> {
        self.inner.calculate_topic_acked_size(topic)
    }
}

impl Inner {
    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        debug!("retention loop started");

        let tick_every = Duration::from_secs(self.config.ticker_time_secs.max(1));
        let compact_every = Duration::from_secs(self.config.compaction_interval_secs.max(1));

        // interval_at so neither ticker fires at startup
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + tick_every, tick_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut compaction_ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + compact_every, compact_every);
        compaction_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("retention loop finished");
                    return;
                }
                _ = compaction_ticker.tick() => {
                    info!("triggering manual compaction of data and meta stores");
                    self.compact_stores();
                }
                _ = ticker.tick() => {
                    self.retention_tick();
                }
            }
        }
    }

    /// Rechecks every tracked topic that is due. A failed pass leaves the
    /// topic's timestamp alone so the next tick retries it.
    fn retention_tick(&self) {
        let now = unix_secs();
        let check_interval = self.config.check_interval_secs();

        self.tracker.for_each(|topic, last_checked| {
            if last_checked + check_interval < now {
                match self.expired_clean_up(topic) {
                    Ok(()) => self.tracker.touch(topic, now),
                    Err(err) => warn!(topic, error = %err, "retention pass failed"),
                }
            }
        });
    }

    fn compact_stores(&self) {
        for (name, store) in [("data", self.data.as_ref()), ("meta", self.meta.as_ref())] {
            if let Err(err) = compact_full_span(store) {
                warn!(store = name, error = %err, "manual compaction failed");
            }
        }
    }

    /// Checks page retention for one topic:
    /// 1. sum the acked sizes of the contiguous acked page prefix;
    /// 2. walk that prefix evicting pages whose ack outlived the window;
    /// 3. keep walking while the remaining acked bytes exceed the quota;
    /// 4. range-delete page metadata and message data up to the last
    ///    evicted page.
    fn expired_clean_up(&self, topic: &str) -> Result<(), RetentionError> {
        let start = Instant::now();
        let mut deleted_acked_size: i64 = 0;
        let mut page_cleaned: i64 = 0;
        let mut page_end_id: PageId = 0;
        let mut last_ack: i64 = 0;

        let total_acked_size = self.calculate_topic_acked_size(topic)?;
        if total_acked_size == 0 {
            debug!(
                topic,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "no acked pages, skipping retention"
            );
            return Ok(());
        }

        let page_prefix = keys::page_msg_size_prefix(topic);
        let upper = prefix_successor(page_prefix.as_bytes());
        // the upper bound keeps the iterator from walking into other topics
        let mut pages = self.meta.iterator(Some(&upper))?;
        pages.seek(page_prefix.as_bytes());

        let now = unix_secs();
        while pages.valid() {
            let Some(page_key) = pages.key() else { break };
            let page_id = keys::parse_page_id(page_key)?;

            let acked_key = keys::acked_ts_key(topic, page_id);
            let Some(acked_value) = self.meta.load(acked_key.as_bytes())? else {
                // first unacked page bounds the evictable prefix
                break;
            };
            let acked_ts = keys::parse_i64(acked_key.as_bytes(), &acked_value)?;
            last_ack = acked_ts;

            if !msg_time_expired(acked_ts, now, &self.config) {
                break;
            }

            let Some(size_value) = pages.value() else { break };
            page_end_id = page_id;
            deleted_acked_size += keys::parse_i64(page_key, size_value)?;
            page_cleaned += 1;
            pages.next();
        }
        pages.status()?;

        debug!(
            topic,
            page_end_id,
            deleted_acked_size,
            last_ack,
            page_cleaned,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "expired check by retention time"
        );

        // Size pass continues from wherever the time pass stopped.
        while pages.valid() {
            let (Some(page_key), Some(size_value)) = (pages.key(), pages.value()) else {
                break;
            };
            let size = keys::parse_i64(page_key, size_value)?;

            if !msg_size_expired(deleted_acked_size + size, total_acked_size, &self.config) {
                break;
            }

            page_end_id = keys::parse_page_id(page_key)?;
            deleted_acked_size += size;
            page_cleaned += 1;
            pages.next();
        }
        pages.status()?;
        drop(pages);

        if page_end_id == 0 {
            debug!(
                topic,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "no pages expired, skipping retention"
            );
            return Ok(());
        }

        debug!(
            topic,
            page_end_id,
            deleted_acked_size,
            page_cleaned,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "expired check by message size"
        );
        self.clean_data(topic, page_end_id)
    }

    /// Sums page sizes along the contiguous acked prefix; the first page
    /// without an ack record stops the scan.
    fn calculate_topic_acked_size(&self, topic: &str) -> Result<i64, RetentionError> {
        let page_prefix = keys::page_msg_size_prefix(topic);
        let upper = prefix_successor(page_prefix.as_bytes());
        let mut pages = self.meta.iterator(Some(&upper))?;
        pages.seek(page_prefix.as_bytes());

        let mut acked_size: i64 = 0;
        while pages.valid() {
            let (Some(page_key), Some(size_value)) = (pages.key(), pages.value()) else {
                break;
            };
            let page_id = keys::parse_page_id(page_key)?;

            let acked_key = keys::acked_ts_key(topic, page_id);
            if self.meta.load(acked_key.as_bytes())?.is_none() {
                break;
            }

            acked_size += keys::parse_i64(page_key, size_value)?;
            pages.next();
        }
        pages.status()?;
        Ok(acked_size)
    }

    /// Evicts pages `[0, page_end_id]`: message data first, then all three
    /// metadata families in one atomic batch, under the topic lock. A crash
    /// between the two deletes leaves metadata pointing at missing data;
    /// the next pass re-issues both range deletes and converges.
    fn clean_data(&self, topic: &str, page_end_id: PageId) -> Result<(), RetentionError> {
        let mut batch = WriteBatch::default();
        batch.delete_range(
            keys::page_msg_size_prefix(topic),
            keys::page_msg_size_key(topic, page_end_id + 1),
        );
        batch.delete_range(
            keys::page_ts_prefix(topic),
            keys::page_ts_key(topic, page_end_id + 1),
        );
        batch.delete_range(
            keys::acked_ts_prefix(topic),
            keys::acked_ts_key(topic, page_end_id + 1),
        );

        let lock = self
            .locks
            .get(topic)
            .ok_or_else(|| RetentionError::MissingTopicLock(topic.to_string()))?;
        let _guard = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        delete_messages(self.data.as_ref(), topic, 0, page_end_id)?;
        self.meta.write(batch)?;
        Ok(())
    }
}

/// Range-deletes message data for `topic` across pages
/// `[start_id, end_id]` in its own atomic batch. Deleting already-absent
/// keys is a no-op, which is what makes crash recovery converge.
pub fn delete_messages(
    data: &dyn KvStore,
    topic: &str,
    start_id: PageId,
    end_id: PageId,
) -> Result<(), RetentionError> {
    let start_key = keys::data_key(topic, start_id);
    let end_key = keys::data_key(topic, end_id + 1);

    let mut batch = WriteBatch::default();
    batch.delete_range(start_key, end_key);
    data.write(batch)?;

    debug!(topic, start_id, end_id, "deleted message range");
    Ok(())
}

/// Seeks the store's last key and requests a forced compaction from the
/// start of the keyspace up to just past it. Empty stores are skipped.
fn compact_full_span(store: &dyn KvStore) -> Result<(), KvError> {
    let mut iter = store.iterator(None)?;
    iter.seek_to_last();
    if !iter.valid() {
        iter.status()?;
        return Ok(());
    }
    let upper = match iter.key() {
        Some(last_key) => prefix_successor(last_key),
        None => return Ok(()),
    };
    drop(iter);

    store.compact(None, Some(&upper), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagemq_kv::mem::MemKv;
    use pagemq_kv::observable::{CompactCall, ObservableKv};

    #[test]
    fn compact_full_span_skips_empty_store() {
        let store = ObservableKv::new(MemKv::new());
        compact_full_span(&store).unwrap();
        assert!(store.compact_calls().is_empty());
    }

    #[test]
    fn compact_full_span_bounds_by_last_key_successor() {
        let store = ObservableKv::new(MemKv::new());
        let mut batch = WriteBatch::default();
        batch.put(b"t/1".as_slice(), b"a".as_slice());
        batch.put(b"t/9".as_slice(), b"b".as_slice());
        store.write(batch).unwrap();

        compact_full_span(&store).unwrap();
        assert_eq!(
            store.compact_calls(),
            vec![CompactCall {
                lo: None,
                hi: Some(b"t/:".to_vec()), // successor of "t/9"
                force: true,
            }]
        );
    }
}
