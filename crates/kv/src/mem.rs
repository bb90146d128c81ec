use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{BatchOp, KvError, KvIterator, KvStore, WriteBatch};

/// In-memory store over a sorted map. Drop-in substitute for [`RocksKv`] in
/// tests; iterators operate on a snapshot taken at creation time, matching
/// the snapshot-consistent iteration the engine expects.
///
/// [`RocksKv`]: crate::rocks::RocksKv
#[derive(Debug, Default)]
pub struct MemKv {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl KvStore for MemKv {
    fn load(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.read().get(key).cloned())
    }

    fn load_with_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let entries = self.read();
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn iterator(&self, upper_bound: Option<&[u8]>) -> Result<Box<dyn KvIterator + '_>, KvError> {
        let entries = self.read();
        let snapshot: Vec<(Vec<u8>, Vec<u8>)> = match upper_bound {
            Some(upper) => entries
                .range(..upper.to_vec())
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            None => entries
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        };
        let pos = snapshot.len(); // invalid until positioned
        Ok(Box::new(MemIter {
            entries: snapshot,
            pos,
        }))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), KvError> {
        let mut entries = self.write_guard();
        for op in batch.ops {
            match op {
                BatchOp::Put(key, value) => {
                    entries.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    entries.remove(&key);
                }
                BatchOp::DeleteRange(lo, hi) => {
                    let doomed: Vec<Vec<u8>> =
                        entries.range(lo..hi).map(|(key, _)| key.clone()).collect();
                    for key in doomed {
                        entries.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    fn compact(&self, _lo: Option<&[u8]>, _hi: Option<&[u8]>, _force: bool) -> Result<(), KvError> {
        Ok(())
    }
}

struct MemIter {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
}

impl KvIterator for MemIter {
    fn seek(&mut self, key: &[u8]) {
        self.pos = self.entries.partition_point(|(k, _)| k.as_slice() < key);
    }

    fn seek_to_last(&mut self) {
        // leaves an empty snapshot invalid (0 < 0)
        self.pos = self.entries.len().saturating_sub(1);
    }

    fn next(&mut self) {
        if self.pos < self.entries.len() {
            self.pos += 1;
        }
    }

    fn valid(&self) -> bool {
        self.pos < self.entries.len()
    }

    fn key(&self) -> Option<&[u8]> {
        self.entries.get(self.pos).map(|(k, _)| k.as_slice())
    }

    fn value(&self) -> Option<&[u8]> {
        self.entries.get(self.pos).map(|(_, v)| v.as_slice())
    }

    fn status(&self) -> Result<(), KvError> {
        Ok(())
    }
}
