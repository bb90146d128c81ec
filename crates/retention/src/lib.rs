pub mod keys;
pub mod page_index;
pub mod policy;
pub mod retention;
pub mod topic_lock;
pub mod tracker;

pub use page_index::PageIndex;
pub use retention::{delete_messages, RetentionService};
pub use topic_lock::TopicLockRegistry;
pub use tracker::RetentionTracker;

use pagemq_kv::KvError;

pub type PageId = i64;

#[derive(thiserror::Error, Debug)]
pub enum RetentionError {
    #[error("kv error: {0}")]
    Kv(#[from] KvError),

    #[error("invalid key {key}: {reason}")]
    KeyDecode { key: String, reason: String },

    #[error("invalid value for key {key}: {reason}")]
    ValueDecode { key: String, reason: String },

    #[error("topic {0} has no registered lock")]
    MissingTopicLock(String),
}

/// Knobs for the retention loop. Negative retention values disable the
/// corresponding policy entirely.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Retention-pass ticker interval, in seconds.
    pub ticker_time_secs: u64,
    /// Manual-compaction ticker interval, in seconds.
    pub compaction_interval_secs: u64,
    /// Time-based retention window, in minutes. Negative disables.
    pub retention_time_minutes: i64,
    /// Per-topic cap on retained acked bytes, in MB. Negative disables.
    pub retention_size_mb: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        RetentionConfig {
            ticker_time_secs: 60,
            compaction_interval_secs: 30 * 60,
            retention_time_minutes: 3 * 24 * 60,
            retention_size_mb: 8192,
        }
    }
}

impl RetentionConfig {
    /// Retention window in seconds; stays negative when disabled.
    pub fn retention_time_secs(&self) -> i64 {
        self.retention_time_minutes.saturating_mul(60)
    }

    /// Per-topic recheck interval. A tenth of the retention window, so
    /// eviction lags the window by at most ~10%.
    pub fn check_interval_secs(&self) -> i64 {
        self.retention_time_secs() / 10
    }
}
