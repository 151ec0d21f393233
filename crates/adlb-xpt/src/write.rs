//! Record writer
//!
//! Assembles framed records over the block writer and owns the flush
//! policy. The invariant the index relies on: a record whose location
//! is about to be indexed is flushed first, so a reader can never
//! follow an index entry into unflushed bytes.

use std::path::Path;
use std::time::{Duration, Instant};

use adlb_core::vint;

use crate::bufwrite::BlockWriter;
use crate::index::{IndexEntry, XptIndex};
use crate::{XptResult, XPT_SYNC_MARKER};

/// When buffered records reach the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Only on close or explicit flush.
    NoFlush,
    /// At most once per interval.
    Periodic(Duration),
    /// After every record.
    Always,
}

impl FlushPolicy {
    /// `ADLB_XPT_FLUSH_PERIOD`: unset buffers until close, `0` flushes
    /// every record, `N` flushes at most every N seconds.
    pub fn from_env() -> FlushPolicy {
        match adlb_core::env::env_get_opt::<u64>("ADLB_XPT_FLUSH_PERIOD") {
            None => FlushPolicy::NoFlush,
            Some(0) => FlushPolicy::Always,
            Some(secs) => FlushPolicy::Periodic(Duration::from_secs(secs)),
        }
    }
}

/// Where a record's value bytes live in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLoc {
    pub offset: u64,
    pub len: u64,
}

/// Append-side handle for one rank.
pub struct XptWriter {
    bw: BlockWriter,
    policy: FlushPolicy,
    last_flush: Instant,
}

impl XptWriter {
    pub fn create<P: AsRef<Path>>(
        path: P,
        rank: u32,
        nranks: u32,
        block_size: u32,
        policy: FlushPolicy,
    ) -> XptResult<XptWriter> {
        Ok(XptWriter {
            bw: BlockWriter::create(path, rank, nranks, block_size)?,
            policy,
            last_flush: Instant::now(),
        })
    }

    /// Append one record. Returns where the value bytes landed.
    /// `persist` forces a flush for this record regardless of policy.
    pub fn write_record(&mut self, key: &[u8], val: &[u8], persist: bool) -> XptResult<RecordLoc> {
        let mut key_hdr = Vec::with_capacity(vint::MAX_WIDTH + key.len());
        vint::encode_u64(key.len() as u64, &mut key_hdr);
        key_hdr.extend_from_slice(key);

        let rec_len = (key_hdr.len() + val.len()) as u64;
        let mut len_hdr = Vec::with_capacity(vint::MAX_WIDTH);
        vint::encode_u64(rec_len, &mut len_hdr);

        // CRC over (varint rec_len ++ body)
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len_hdr);
        hasher.update(&key_hdr);
        hasher.update(val);
        let crc = hasher.finalize();

        self.bw.bufwrite_uint32(XPT_SYNC_MARKER)?;
        self.bw.bufwrite_uint32(crc)?;
        self.bw.write(&len_hdr)?;
        self.bw.write(&key_hdr)?;
        let loc = RecordLoc {
            offset: self.bw.tell(),
            len: val.len() as u64,
        };
        self.bw.write(val)?;

        match self.policy {
            FlushPolicy::Always => self.bw.flush()?,
            FlushPolicy::Periodic(gap) if self.last_flush.elapsed() >= gap => {
                self.bw.flush()?;
                self.last_flush = Instant::now();
            }
            _ if persist => self.bw.flush()?,
            _ => {}
        }
        Ok(loc)
    }

    /// Append a record and commit it to `index`. Small values are kept
    /// inline in the index; larger ones are indexed by location, with
    /// the flush-before-index rule enforced here.
    pub fn write_indexed(
        &mut self,
        key: &[u8],
        val: &[u8],
        index: &mut XptIndex,
    ) -> XptResult<()> {
        let inline = val.len() <= index.max_inline();
        let loc = self.write_record(key, val, !inline)?;
        if inline {
            index.insert(key.to_vec(), IndexEntry::Inline(val.to_vec()));
        } else {
            index.insert(
                key.to_vec(),
                IndexEntry::InFile {
                    file: None,
                    offset: loc.offset,
                    len: loc.len,
                },
            );
        }
        Ok(())
    }

    pub fn flush(&mut self) -> XptResult<()> {
        self.bw.flush()
    }

    pub fn sync(&mut self) -> XptResult<()> {
        self.bw.sync()
    }

    /// Close the rank's stream: write the zero-length end-of-rank marker
    /// if the current block has room for it, then flush. Without room
    /// the boundary stays implicit, which readers treat like EOF.
    pub fn close(mut self) -> XptResult<()> {
        // marker (4) + crc (4) + varint 0 (1)
        if self.bw.room_in_block() >= 9 {
            let len_hdr = [0u8]; // varint encoding of 0
            let crc = crc32fast::hash(&len_hdr);
            self.bw.bufwrite_uint32(XPT_SYNC_MARKER)?;
            self.bw.bufwrite_uint32(crc)?;
            self.bw.write(&len_hdr)?;
        }
        self.bw.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::XPT_MAGIC;
    use std::io::Read;

    #[test]
    fn test_record_bytes_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xpt.log");
        let mut w = XptWriter::create(&path, 0, 1, 4096, FlushPolicy::Always).unwrap();
        let loc = w.write_record(b"k", b"value", false).unwrap();
        w.flush().unwrap();

        let mut bytes = Vec::new();
        std::fs::File::open(&path)
            .unwrap()
            .read_to_end(&mut bytes)
            .unwrap();
        assert_eq!(bytes[0], XPT_MAGIC);
        // header is 8 bytes; record starts at 9
        assert_eq!(
            u32::from_be_bytes(bytes[9..13].try_into().unwrap()),
            XPT_SYNC_MARKER
        );
        // rec_len = 1 (varint keylen) + 1 (key) + 5 (value) = 7
        assert_eq!(bytes[17], 7);
        assert_eq!(bytes[18], 1);
        assert_eq!(bytes[19], b'k');
        assert_eq!(&bytes[20..25], b"value");
        assert_eq!(loc.offset, 20);
        assert_eq!(loc.len, 5);
    }

    #[test]
    fn test_close_writes_end_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xpt.log");
        let w = XptWriter::create(&path, 0, 1, 4096, FlushPolicy::NoFlush).unwrap();
        w.close().unwrap();

        let mut bytes = Vec::new();
        std::fs::File::open(&path)
            .unwrap()
            .read_to_end(&mut bytes)
            .unwrap();
        assert_eq!(
            u32::from_be_bytes(bytes[9..13].try_into().unwrap()),
            XPT_SYNC_MARKER
        );
        assert_eq!(bytes[17], 0); // zero-length record
    }
}
