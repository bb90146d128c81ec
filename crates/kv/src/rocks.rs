use crate::{BatchOp, KvError, KvIterator, KvStore, WriteBatch};

use rocksdb::{
    BottommostLevelCompaction, CompactOptions, DBRawIteratorWithThreadMode, DBWithThreadMode,
    Direction, IteratorMode, MultiThreaded, Options, ReadOptions, WriteOptions,
};

type Db = DBWithThreadMode<MultiThreaded>;

/// RocksDB-backed store. One instance per physical namespace; the queue
/// opens two (metadata and message data) at separate paths.
#[derive(Debug)]
pub struct RocksKv {
    db: Db,
    sync_write: bool,
}

impl RocksKv {
    pub fn open(path: &str, sync_write: bool) -> Result<Self, KvError> {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        let bg_jobs = match cpus {
            0..=2 => 2,
            3..=4 => 4,
            5..=8 => 6,
            _ => 8,
        };

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_background_jobs(bg_jobs);
        opts.set_enable_pipelined_write(true);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(3);
        opts.set_min_write_buffer_number_to_merge(2);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_cache_index_and_filter_blocks(true);
        block_opts.set_pin_l0_filter_and_index_blocks_in_cache(true);

        opts.set_block_based_table_factory(&block_opts);

        let db = Db::open(&opts, path)?;
        Ok(Self { db, sync_write })
    }

    fn write_opts(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_write); // fsync WAL before returning
        write_opts
    }
}

impl KvStore for RocksKv {
    fn load(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.db.get(key)?)
    }

    fn load_with_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward));

        let mut out = Vec::new();
        for pair in iter {
            let (key, value) = pair?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.into_vec(), value.into_vec()));
        }
        Ok(out)
    }

    fn iterator(&self, upper_bound: Option<&[u8]>) -> Result<Box<dyn KvIterator + '_>, KvError> {
        let mut read_opts = ReadOptions::default();
        if let Some(upper) = upper_bound {
            read_opts.set_iterate_upper_bound(upper.to_vec());
        }
        Ok(Box::new(RocksIter {
            inner: self.db.raw_iterator_opt(read_opts),
        }))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), KvError> {
        let mut wb = rocksdb::WriteBatch::default();
        for op in batch.ops {
            match op {
                BatchOp::Put(key, value) => wb.put(key, value),
                BatchOp::Delete(key) => wb.delete(key),
                BatchOp::DeleteRange(lo, hi) => wb.delete_range(lo, hi),
            }
        }
        self.db.write_opt(wb, &self.write_opts())?;
        Ok(())
    }

    fn compact(&self, lo: Option<&[u8]>, hi: Option<&[u8]>, force: bool) -> Result<(), KvError> {
        tracing::debug!(force, "manual range compaction requested");
        if force {
            let mut opts = CompactOptions::default();
            opts.set_bottommost_level_compaction(BottommostLevelCompaction::Force);
            self.db.compact_range_opt(lo, hi, &opts);
        } else {
            self.db.compact_range(lo, hi);
        }
        Ok(())
    }
}

pub struct RocksIter<'a> {
    inner: DBRawIteratorWithThreadMode<'a, Db>,
}

impl KvIterator for RocksIter<'_> {
    fn seek(&mut self, key: &[u8]) {
        self.inner.seek(key);
    }

    fn seek_to_last(&mut self) {
        self.inner.seek_to_last();
    }

    fn next(&mut self) {
        self.inner.next();
    }

    fn valid(&self) -> bool {
        self.inner.valid()
    }

    fn key(&self) -> Option<&[u8]> {
        self.inner.key()
    }

    fn value(&self) -> Option<&[u8]> {
        self.inner.value()
    }

    fn status(&self) -> Result<(), KvError> {
        Ok(self.inner.status()?)
    }
}
