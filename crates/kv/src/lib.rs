pub mod mem;
pub mod observable;
pub mod rocks;

#[derive(thiserror::Error, Debug)]
pub enum KvError {
    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("iterator error: {0}")]
    Iterator(String),

    #[error("unexpected internal error: {0}")]
    Internal(String),
}

pub fn make_rocksdb_store(path: &str, sync_write: bool) -> Result<rocks::RocksKv, KvError> {
    rocks::RocksKv::open(path, sync_write)
}

/// A batch of writes applied atomically with respect to readers: either all
/// ops are observed or none.
#[derive(Debug, Default)]
pub struct WriteBatch {
    pub(crate) ops: Vec<BatchOp>,
}

#[derive(Debug)]
pub(crate) enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
    DeleteRange(Vec<u8>, Vec<u8>),
}

impl WriteBatch {
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    /// Deletes every key in `[lo, hi)`. Deleting an empty range is a no-op.
    pub fn delete_range(&mut self, lo: impl Into<Vec<u8>>, hi: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::DeleteRange(lo.into(), hi.into()));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Narrow store surface shared by the queue paths and the retention engine.
///
/// Two physical instances back one queue: a metadata store with
/// human-readable bookkeeping keys and a data store keyed by
/// `{topic}/{seqID}`.
pub trait KvStore: Send + Sync + std::fmt::Debug {
    /// Point lookup. Absent keys are `None`, distinct from an error.
    fn load(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    /// Snapshot of every pair whose key starts with `prefix`, in
    /// lexicographic key order.
    fn load_with_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError>;

    /// Forward iterator, bounded exclusively by `upper_bound` when given.
    /// The iterator starts out invalid; callers position it with `seek` or
    /// `seek_to_last`.
    fn iterator(&self, upper_bound: Option<&[u8]>) -> Result<Box<dyn KvIterator + '_>, KvError>;

    /// Atomically commit a batch of writes.
    fn write(&self, batch: WriteBatch) -> Result<(), KvError>;

    /// Hint the engine to reclaim space across `[lo, hi)`; `None` bounds are
    /// open. May complete asynchronously.
    fn compact(&self, lo: Option<&[u8]>, hi: Option<&[u8]>, force: bool) -> Result<(), KvError>;
}

pub trait KvIterator {
    fn seek(&mut self, key: &[u8]);
    fn seek_to_last(&mut self);
    fn next(&mut self);
    fn valid(&self) -> bool;
    fn key(&self) -> Option<&[u8]>;
    fn value(&self) -> Option<&[u8]>;
    /// Terminal iteration error, distinct from plain exhaustion.
    fn status(&self) -> Result<(), KvError>;
}

/// Smallest byte string strictly greater than every string with the given
/// prefix: the rightmost non-0xff byte is incremented and the tail dropped.
/// An all-0xff input has no such bound; it is extended with a zero byte so
/// the result still sorts after the input itself.
pub fn prefix_successor(prefix: &[u8]) -> Vec<u8> {
    let mut out = prefix.to_vec();
    for i in (0..out.len()).rev() {
        if out[i] != u8::MAX {
            out[i] += 1;
            out.truncate(i + 1);
            return out;
        }
    }
    out.push(0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_successor_increments_last_byte() {
        assert_eq!(prefix_successor(b"abc"), b"abd".to_vec());
        assert_eq!(prefix_successor(b"page_msg_size/t/"), b"page_msg_size/t0".to_vec());
    }

    #[test]
    fn prefix_successor_carries_over_max_bytes() {
        assert_eq!(prefix_successor(&[b'a', 0xff]), vec![b'b']);
        assert_eq!(prefix_successor(&[b'a', 0xff, 0xff]), vec![b'b']);
        assert_eq!(prefix_successor(&[0x01, 0xff, 0x07, 0xff]), vec![0x01, 0xff, 0x08]);
    }

    #[test]
    fn prefix_successor_of_all_max_bytes_extends() {
        assert_eq!(prefix_successor(&[0xff, 0xff]), vec![0xff, 0xff, 0x00]);
        assert_eq!(prefix_successor(&[]), vec![0x00]);
    }

    #[test]
    fn prefix_successor_bounds_every_extension() {
        let prefixes: &[&[u8]] = &[b"a", b"topic/", b"z\xffq", &[0x00], &[0x7f, 0xff]];
        let suffixes: &[&[u8]] = &[b"", b"0", b"\xff\xff\xff", &[0x00]];

        for prefix in prefixes {
            let succ = prefix_successor(prefix);
            assert!(succ.as_slice() > *prefix, "successor must sort after the prefix");
            for suffix in suffixes {
                let mut extended = prefix.to_vec();
                extended.extend_from_slice(suffix);
                assert!(
                    succ > extended,
                    "successor {:?} must bound extension {:?}",
                    succ,
                    extended
                );
            }
        }
    }

    #[test]
    fn write_batch_tracks_ops() {
        let mut batch = WriteBatch::default();
        assert!(batch.is_empty());

        batch.put(b"k".as_slice(), b"v".as_slice());
        batch.delete(b"k".as_slice());
        batch.delete_range(b"a".as_slice(), b"b".as_slice());
        assert_eq!(batch.len(), 3);
    }
}
