//! Expiry predicates. Pure and I/O-free so boundary behavior can be tested
//! exhaustively.

use pagemq_util::UnixSecs;

use crate::RetentionConfig;

pub const MB: i64 = 1024 * 1024;

/// True when a page fully acked at `acked_ts` has outlived the retention
/// window. A negative window disables time-based expiry.
pub fn msg_time_expired(acked_ts: UnixSecs, now: UnixSecs, config: &RetentionConfig) -> bool {
    let retention_secs = config.retention_time_secs();
    if retention_secs < 0 {
        return false;
    }
    acked_ts + retention_secs < now
}

/// True when deleting `deleted_acked_size` bytes still leaves more acked
/// bytes than the configured quota. A negative quota disables size-based
/// expiry.
pub fn msg_size_expired(
    deleted_acked_size: i64,
    total_acked_size: i64,
    config: &RetentionConfig,
) -> bool {
    if config.retention_size_mb < 0 {
        return false;
    }
    total_acked_size - deleted_acked_size > config.retention_size_mb * MB
}
