//! Per-rank checkpoint handle
//!
//! Thin lifecycle wrapper over the `adlb-xpt` log for one rank: append
//! fingerprint/value records, look them up through the in-memory index,
//! and rebuild the index from a previous run's file.
//!
//! Lookups read through a separate descriptor with positioned reads, so
//! they are safe to run while this rank keeps appending; the writer's
//! flush-before-index rule guarantees an indexed location never points
//! at unflushed bytes.

use std::fs::File;
use std::path::{Path, PathBuf};

use adlb_xpt::{FlushPolicy, XptIndex, XptReader, XptResult, XptStats, XptWriter};

/// Default inline threshold for indexed values.
pub use adlb_xpt::index::DEFAULT_MAX_INLINE;

/// One rank's open checkpoint.
pub struct Checkpoint {
    writer: XptWriter,
    index: XptIndex,
    reader_file: File,
    path: PathBuf,
    block_size: u32,
    nranks: u32,
}

impl Checkpoint {
    /// Open (creating) the shared checkpoint file for this rank. The
    /// flush policy comes from `ADLB_XPT_FLUSH_PERIOD`.
    pub fn create<P: AsRef<Path>>(
        path: P,
        rank: u32,
        nranks: u32,
        block_size: u32,
    ) -> XptResult<Checkpoint> {
        let writer = XptWriter::create(&path, rank, nranks, block_size, FlushPolicy::from_env())?;
        let reader_file = File::open(&path)?;
        Ok(Checkpoint {
            writer,
            index: XptIndex::new(DEFAULT_MAX_INLINE),
            reader_file,
            path: path.as_ref().to_path_buf(),
            block_size,
            nranks,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and index it.
    pub fn write(&mut self, key: &[u8], val: &[u8]) -> XptResult<()> {
        self.writer.write_indexed(key, val, &mut self.index)
    }

    /// Fetch a previously written value: inline from the index, or a
    /// positioned read into the log.
    pub fn lookup(&self, key: &[u8]) -> XptResult<Option<Vec<u8>>> {
        self.index
            .fetch(key, &self.reader_file, self.block_size as u64, self.nranks)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Write the end-of-rank marker (when the block has room) and sync.
    pub fn close(self) -> XptResult<()> {
        self.writer.close()
    }

    /// Rebuild one rank's index from an existing file, reporting how
    /// many records survived. Corrupt records are skipped by resync.
    pub fn reload<P: AsRef<Path>>(
        path: P,
        rank: u32,
    ) -> XptResult<(XptIndex, XptStats, XptReader)> {
        let mut reader = XptReader::open(path)?;
        let mut index = XptIndex::new(DEFAULT_MAX_INLINE);
        let stats = reader.load_rank(rank, Some(&mut index))?;
        Ok((index, stats, reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_lookup_reload_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.xpt");

        let mut cp = Checkpoint::create(&path, 0, 1, 1024).unwrap();
        cp.write(b"alpha", b"1").unwrap();
        let big = vec![9u8; 4000];
        cp.write(b"beta", &big).unwrap();

        // live lookups while the writer is open
        assert_eq!(cp.lookup(b"alpha").unwrap().unwrap(), b"1");
        assert_eq!(cp.lookup(b"beta").unwrap().unwrap(), big);
        assert!(cp.lookup(b"gamma").unwrap().is_none());
        cp.close().unwrap();

        // recovery path
        let (index, stats, reader) = Checkpoint::reload(&path, 0).unwrap();
        assert_eq!(stats.valid, 2);
        assert_eq!(stats.invalid, 0);
        let got = index
            .fetch(b"beta", reader.file(), reader.block_size(), reader.ranks())
            .unwrap()
            .unwrap();
        assert_eq!(got, big);
    }
}
