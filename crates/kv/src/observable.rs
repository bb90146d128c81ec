use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::{KvError, KvIterator, KvStore, WriteBatch};

/// Per-operation counters for a wrapped store.
#[derive(Debug, Default)]
pub struct KvOpStats {
    pub loads: AtomicU64,
    pub prefix_loads: AtomicU64,
    pub iterators: AtomicU64,
    pub writes: AtomicU64,
    pub compactions: AtomicU64,
}

/// One recorded manual-compaction request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactCall {
    pub lo: Option<Vec<u8>>,
    pub hi: Option<Vec<u8>>,
    pub force: bool,
}

/// Decorator that counts operations against the wrapped store, records
/// manual compaction requests, and can stall point reads to simulate a slow
/// backend. Test instrumentation for the retention scenarios.
#[derive(Debug)]
pub struct ObservableKv<S> {
    inner: S,
    stats: KvOpStats,
    load_delay: Option<Duration>,
    compact_calls: Mutex<Vec<CompactCall>>,
}

impl<S: KvStore> ObservableKv<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            stats: KvOpStats::default(),
            load_delay: None,
            compact_calls: Mutex::new(Vec::new()),
        }
    }

    /// Stall every `load` by `delay`.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    pub fn stats(&self) -> &KvOpStats {
        &self.stats
    }

    pub fn compact_calls(&self) -> Vec<CompactCall> {
        match self.compact_calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: KvStore> KvStore for ObservableKv<S> {
    fn load(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        self.stats.loads.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.load_delay {
            std::thread::sleep(delay);
        }
        self.inner.load(key)
    }

    fn load_with_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        self.stats.prefix_loads.fetch_add(1, Ordering::Relaxed);
        self.inner.load_with_prefix(prefix)
    }

    fn iterator(&self, upper_bound: Option<&[u8]>) -> Result<Box<dyn KvIterator + '_>, KvError> {
        self.stats.iterators.fetch_add(1, Ordering::Relaxed);
        self.inner.iterator(upper_bound)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), KvError> {
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        self.inner.write(batch)
    }

    fn compact(&self, lo: Option<&[u8]>, hi: Option<&[u8]>, force: bool) -> Result<(), KvError> {
        self.stats.compactions.fetch_add(1, Ordering::Relaxed);
        let call = CompactCall {
            lo: lo.map(<[u8]>::to_vec),
            hi: hi.map(<[u8]>::to_vec),
            force,
        };
        match self.compact_calls.lock() {
            Ok(mut calls) => calls.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }
        self.inner.compact(lo, hi, force)
    }
}
