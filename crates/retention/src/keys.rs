//! Key layout for the two stores.
//!
//! MetaKV keys are ASCII with `/`-separated components and unpadded base-10
//! integers:
//!
//! - `page_msg_size/{topic}/{pageID}` -> page byte size
//! - `page_ts/{topic}/{pageID}`       -> newest message timestamp (unix secs)
//! - `acked_ts/{topic}/{pageID}`      -> full-ack timestamp (unix secs)
//! - `topic_id/{topic}`               -> topic marker
//!
//! DataKV keys are `{topic}/{seqID}`. Page ids and seq ids come from the
//! same monotonic allocator; range bounds over these keys assume ids of
//! equal decimal width within one topic's live span.

use crate::{PageId, RetentionError};

pub const TOPIC_ID_PREFIX: &str = "topic_id/";
pub const PAGE_MSG_SIZE_TITLE: &str = "page_msg_size";
pub const PAGE_TS_TITLE: &str = "page_ts";
pub const ACKED_TS_TITLE: &str = "acked_ts";

pub fn topic_id_key(topic: &str) -> String {
    format!("{TOPIC_ID_PREFIX}{topic}")
}

pub fn page_msg_size_prefix(topic: &str) -> String {
    format!("{PAGE_MSG_SIZE_TITLE}/{topic}/")
}

pub fn page_msg_size_key(topic: &str, page_id: PageId) -> String {
    format!("{PAGE_MSG_SIZE_TITLE}/{topic}/{page_id}")
}

pub fn page_ts_prefix(topic: &str) -> String {
    format!("{PAGE_TS_TITLE}/{topic}/")
}

pub fn page_ts_key(topic: &str, page_id: PageId) -> String {
    format!("{PAGE_TS_TITLE}/{topic}/{page_id}")
}

pub fn acked_ts_prefix(topic: &str) -> String {
    format!("{ACKED_TS_TITLE}/{topic}/")
}

pub fn acked_ts_key(topic: &str, page_id: PageId) -> String {
    format!("{ACKED_TS_TITLE}/{topic}/{page_id}")
}

pub fn data_key(topic: &str, seq_id: i64) -> String {
    format!("{topic}/{seq_id}")
}

/// Extracts the trailing page id from a metadata key such as
/// `page_msg_size/{topic}/{pageID}`.
pub fn parse_page_id(key: &[u8]) -> Result<PageId, RetentionError> {
    let text = std::str::from_utf8(key).map_err(|_| RetentionError::KeyDecode {
        key: String::from_utf8_lossy(key).into_owned(),
        reason: "not valid utf-8".into(),
    })?;

    let (_, id_part) = text.rsplit_once('/').ok_or_else(|| RetentionError::KeyDecode {
        key: text.to_string(),
        reason: "missing page id component".into(),
    })?;

    id_part.parse().map_err(|_| RetentionError::KeyDecode {
        key: text.to_string(),
        reason: "page id is not a valid integer".into(),
    })
}

/// Parses a decimal i64 value stored under `key`.
pub fn parse_i64(key: &[u8], value: &[u8]) -> Result<i64, RetentionError> {
    let text = std::str::from_utf8(value).map_err(|_| RetentionError::ValueDecode {
        key: String::from_utf8_lossy(key).into_owned(),
        reason: "not valid utf-8".into(),
    })?;

    text.parse().map_err(|_| RetentionError::ValueDecode {
        key: String::from_utf8_lossy(key).into_owned(),
        reason: "not a valid integer".into(),
    })
}
