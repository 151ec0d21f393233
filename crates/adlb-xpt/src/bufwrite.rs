//! Striped buffered block writer
//!
//! Low-level append path for one rank. Buffers bytes within the current
//! owned block and emits the per-block magic byte whenever a write
//! crosses into the rank's next block (`+N` stride). `u32` values go out
//! big-endian.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::{XptError, XptResult, XPT_MAGIC};

/// Buffered writer over the blocks one rank owns.
pub struct BlockWriter {
    file: File,
    rank: u32,
    nranks: u32,
    block_size: u64,
    /// File offset of the next byte to be written (never rests on a
    /// block boundary between calls).
    file_offset: u64,
    /// File offset the buffer starts at.
    buf_start: u64,
    buf: Vec<u8>,
}

impl BlockWriter {
    /// Open (creating if needed) the shared checkpoint file for one
    /// rank. Writes the magic of the rank's first block; rank 0 also
    /// writes the file header.
    pub fn create<P: AsRef<Path>>(
        path: P,
        rank: u32,
        nranks: u32,
        block_size: u32,
    ) -> XptResult<BlockWriter> {
        if rank >= nranks {
            return Err(XptError::RankOutOfRange);
        }
        if block_size < 64 {
            return Err(XptError::BadHeader("block size too small"));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let start = rank as u64 * block_size as u64;
        let mut bw = BlockWriter {
            file,
            rank,
            nranks,
            block_size: block_size as u64,
            file_offset: start,
            buf_start: start,
            buf: Vec::with_capacity(64 * 1024),
        };
        bw.buf.push(XPT_MAGIC);
        bw.file_offset += 1;
        if rank == 0 {
            bw.bufwrite_uint32(block_size)?;
            bw.bufwrite_uint32(nranks)?;
        }
        Ok(bw)
    }

    #[inline]
    pub fn rank(&self) -> u32 {
        self.rank
    }

    #[inline]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// File offset where the next data byte will land, looking through
    /// an upcoming block jump.
    pub fn tell(&self) -> u64 {
        if self.file_offset % self.block_size == 0 {
            self.next_owned_block() * self.block_size + 1
        } else {
            self.file_offset
        }
    }

    /// Index of the block the writer moves to after filling the current
    /// one.
    fn next_owned_block(&self) -> u64 {
        // file_offset sits exactly at the end of a just-filled block
        (self.file_offset / self.block_size - 1) + self.nranks as u64
    }

    /// Jump to the rank's next block if the current one is full. Flushes
    /// the buffer (buffered bytes are contiguous within one block run).
    fn ensure_in_block(&mut self) -> XptResult<()> {
        if self.file_offset % self.block_size != 0 {
            return Ok(());
        }
        let next = self.next_owned_block();
        self.flush()?;
        self.file_offset = next * self.block_size;
        self.buf_start = self.file_offset;
        self.buf.push(XPT_MAGIC);
        self.file_offset += 1;
        Ok(())
    }

    /// Append bytes, splitting across block boundaries as needed.
    pub fn write(&mut self, mut bytes: &[u8]) -> XptResult<()> {
        while !bytes.is_empty() {
            self.ensure_in_block()?;
            let space = (self.block_size - self.file_offset % self.block_size) as usize;
            let take = space.min(bytes.len());
            self.buf.extend_from_slice(&bytes[..take]);
            self.file_offset += take as u64;
            bytes = &bytes[take..];
        }
        Ok(())
    }

    /// Big-endian u32, the one number format the file format fixes.
    pub fn bufwrite_uint32(&mut self, v: u32) -> XptResult<()> {
        self.write(&v.to_be_bytes())
    }

    /// Bytes remaining in the current block.
    pub fn room_in_block(&self) -> u64 {
        if self.file_offset % self.block_size == 0 {
            0
        } else {
            self.block_size - self.file_offset % self.block_size
        }
    }

    /// Push buffered bytes to the file at their recorded offset.
    pub fn flush(&mut self) -> XptResult<()> {
        if self.buf.is_empty() {
            self.buf_start = self.file_offset;
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(self.buf_start))?;
        self.file.write_all(&self.buf)?;
        self.buf.clear();
        self.buf_start = self.file_offset;
        Ok(())
    }

    /// Flush and fsync.
    pub fn sync(&mut self) -> XptResult<()> {
        self.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn read_all(path: &std::path::Path) -> Vec<u8> {
        let mut buf = Vec::new();
        File::open(path).unwrap().read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_header_and_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xpt.log");
        let mut bw = BlockWriter::create(&path, 0, 2, 128).unwrap();
        bw.write(b"hello").unwrap();
        bw.flush().unwrap();

        let bytes = read_all(&path);
        assert_eq!(bytes[0], XPT_MAGIC);
        assert_eq!(u32::from_be_bytes(bytes[1..5].try_into().unwrap()), 128);
        assert_eq!(u32::from_be_bytes(bytes[5..9].try_into().unwrap()), 2);
        assert_eq!(&bytes[9..14], b"hello");
    }

    #[test]
    fn test_rank_one_starts_at_its_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xpt.log");
        let mut bw = BlockWriter::create(&path, 1, 2, 128).unwrap();
        bw.write(b"abc").unwrap();
        bw.flush().unwrap();

        let bytes = read_all(&path);
        assert_eq!(bytes[128], XPT_MAGIC);
        assert_eq!(&bytes[129..132], b"abc");
    }

    #[test]
    fn test_block_crossing_emits_magic_and_strides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xpt.log");
        // rank 1 of 2, 128-byte blocks: owns blocks 1, 3, 5, ...
        let mut bw = BlockWriter::create(&path, 1, 2, 128).unwrap();
        let data: Vec<u8> = (0..200u8).collect();
        bw.write(&data).unwrap();
        bw.flush().unwrap();

        let bytes = read_all(&path);
        // block 1: magic + first 127 data bytes
        assert_eq!(bytes[128], XPT_MAGIC);
        assert_eq!(&bytes[129..256], &data[..127]);
        // block 2 untouched (rank 0's territory, sparse zeros)
        assert_eq!(bytes[256..384].iter().map(|b| *b as u64).sum::<u64>(), 0);
        // block 3: magic + remaining 73 bytes
        assert_eq!(bytes[384], XPT_MAGIC);
        assert_eq!(&bytes[385..385 + 73], &data[127..]);
    }

    #[test]
    fn test_tell_accounts_for_jump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xpt.log");
        let mut bw = BlockWriter::create(&path, 0, 2, 128).unwrap();
        // fill block 0 exactly: 1 magic + 8 header already used
        bw.write(&vec![7u8; 119]).unwrap();
        assert_eq!(bw.room_in_block(), 0);
        // next data byte lands after the magic of block 2
        assert_eq!(bw.tell(), 2 * 128 + 1);
        bw.write(b"x").unwrap();
        bw.flush().unwrap();
        let bytes = read_all(&path);
        assert_eq!(bytes[256], XPT_MAGIC);
        assert_eq!(bytes[257], b'x');
    }
}
