use std::sync::Arc;

use pagemq_kv::{KvStore, WriteBatch};
use pagemq_util::UnixSecs;

use crate::{keys, PageId, RetentionError};

/// Bookkeeping surface over the metadata store. The append path records
/// sealed pages, the ack path marks them fully acked; the retention engine
/// only reads these families (and range-deletes them on eviction).
#[derive(Debug, Clone)]
pub struct PageIndex {
    meta: Arc<dyn KvStore>,
}

impl PageIndex {
    pub fn new(meta: Arc<dyn KvStore>) -> Self {
        Self { meta }
    }

    /// Makes the topic producible. Existence of `topic_id/{topic}` is the
    /// topic-set; the value is reserved for topic metadata.
    pub fn register_topic(&self, topic: &str) -> Result<(), RetentionError> {
        let mut batch = WriteBatch::default();
        batch.put(keys::topic_id_key(topic), Vec::new());
        self.meta.write(batch)?;
        Ok(())
    }

    /// Records a sealed page: its cumulative byte size and the timestamp of
    /// its newest message, committed together.
    pub fn record_page(
        &self,
        topic: &str,
        page_id: PageId,
        size_bytes: i64,
        newest_ts: UnixSecs,
    ) -> Result<(), RetentionError> {
        let mut batch = WriteBatch::default();
        batch.put(keys::page_msg_size_key(topic, page_id), size_bytes.to_string());
        batch.put(keys::page_ts_key(topic, page_id), newest_ts.to_string());
        self.meta.write(batch)?;
        Ok(())
    }

    /// Marks a page fully acked. Presence of the key is what makes the page
    /// eligible for eviction; acks are assumed contiguous per topic.
    pub fn mark_page_acked(
        &self,
        topic: &str,
        page_id: PageId,
        acked_ts: UnixSecs,
    ) -> Result<(), RetentionError> {
        let mut batch = WriteBatch::default();
        batch.put(keys::acked_ts_key(topic, page_id), acked_ts.to_string());
        self.meta.write(batch)?;
        Ok(())
    }

    pub fn load_page_size(&self, topic: &str, page_id: PageId) -> Result<Option<i64>, RetentionError> {
        let key = keys::page_msg_size_key(topic, page_id);
        match self.meta.load(key.as_bytes())? {
            Some(value) => Ok(Some(keys::parse_i64(key.as_bytes(), &value)?)),
            None => Ok(None),
        }
    }

    pub fn load_acked_ts(
        &self,
        topic: &str,
        page_id: PageId,
    ) -> Result<Option<UnixSecs>, RetentionError> {
        let key = keys::acked_ts_key(topic, page_id);
        match self.meta.load(key.as_bytes())? {
            Some(value) => Ok(Some(keys::parse_i64(key.as_bytes(), &value)?)),
            None => Ok(None),
        }
    }

    pub fn topic_names(&self) -> Result<Vec<String>, RetentionError> {
        let pairs = self.meta.load_with_prefix(keys::TOPIC_ID_PREFIX.as_bytes())?;
        let mut out = Vec::with_capacity(pairs.len());
        for (key, _) in pairs {
            let topic = std::str::from_utf8(&key[keys::TOPIC_ID_PREFIX.len()..]).map_err(|_| {
                RetentionError::KeyDecode {
                    key: String::from_utf8_lossy(&key).into_owned(),
                    reason: "topic name is not valid utf-8".into(),
                }
            })?;
            out.push(topic.to_string());
        }
        Ok(out)
    }
}
