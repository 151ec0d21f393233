//! Record reader with resynchronization
//!
//! Reads one rank's record stream, following the rank's block stride
//! and stripping block magic bytes. A CRC mismatch, an oversize length,
//! or garbage where a record should start marks that record INVALID and
//! rescans from the byte after the most recent sync marker until the
//! marker pattern reappears; subsequent records are unaffected.
//!
//! End-of-rank is any of: a zero-length record with a good CRC, a zero
//! magic byte at a block start, or plain EOF. A reader cannot tell a
//! clean close at a block boundary from a crash mid-block, and does not
//! try to.

use std::fs::File;
use std::path::Path;

use adlb_core::vint;

use crate::index::{IndexEntry, XptIndex};
use crate::{XptError, XptResult, XPT_MAGIC, XPT_MAX_RECORD, XPT_SYNC_MARKER};

/// One read_record step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Valid {
        key: Vec<u8>,
        val: Vec<u8>,
        /// File offset of the first value byte (for the index).
        val_offset: u64,
    },
    /// A corrupt record was skipped; the stream is resynchronized.
    Invalid,
    EndOfRank,
}

/// Per-rank scan statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct XptStats {
    pub valid: u64,
    pub invalid: u64,
}

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

/// Fill `buf` completely or report how much was available.
pub(crate) fn pread_full(file: &File, buf: &mut [u8], mut offset: u64) -> std::io::Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        let n = pread(file, &mut buf[done..], offset)?;
        if n == 0 {
            break;
        }
        done += n;
        offset += n as u64;
    }
    Ok(done)
}

/// Read-side handle over the shared checkpoint file.
pub struct XptReader {
    file: File,
    block_size: u64,
    nranks: u32,
    pos: u64,
    /// Byte just after the most recently seen sync marker; resync
    /// rescans from here.
    resync_base: u64,
    /// A resync already consumed the next record's marker.
    marker_consumed: bool,
    at_end: bool,
}

impl XptReader {
    /// Open and validate magic + header.
    pub fn open<P: AsRef<Path>>(path: P) -> XptResult<XptReader> {
        let file = File::open(path)?;
        let mut hdr = [0u8; 9];
        if pread_full(&file, &mut hdr, 0)? != 9 {
            return Err(XptError::BadHeader("file shorter than header"));
        }
        if hdr[0] != XPT_MAGIC {
            return Err(XptError::BadMagic);
        }
        let block_size = u32::from_be_bytes(hdr[1..5].try_into().unwrap()) as u64;
        let nranks = u32::from_be_bytes(hdr[5..9].try_into().unwrap());
        if block_size < 64 {
            return Err(XptError::BadHeader("block size too small"));
        }
        if nranks == 0 {
            return Err(XptError::BadHeader("zero ranks"));
        }
        Ok(XptReader {
            file,
            block_size,
            nranks,
            pos: 0,
            resync_base: 0,
            marker_consumed: false,
            at_end: true,
        })
    }

    #[inline]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    #[inline]
    pub fn ranks(&self) -> u32 {
        self.nranks
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Position at the start of one rank's record stream.
    pub fn select_rank(&mut self, rank: u32) -> XptResult<()> {
        if rank >= self.nranks {
            return Err(XptError::RankOutOfRange);
        }
        let start = rank as u64 * self.block_size;
        let mut magic = [0u8; 1];
        let have = pread_full(&self.file, &mut magic, start)?;
        self.at_end = have == 0 || magic[0] != XPT_MAGIC;
        self.pos = start + 1;
        if rank == 0 {
            self.pos += 8; // file header
        }
        self.resync_base = self.pos;
        self.marker_consumed = false;
        Ok(())
    }

    /// If `pos` rests on a block boundary, hop to the rank's next block
    /// and consume its magic. False when the stream is over.
    fn normalize_boundary(&mut self) -> XptResult<bool> {
        if self.at_end {
            return Ok(false);
        }
        if self.pos % self.block_size != 0 {
            return Ok(true);
        }
        let next = (self.pos / self.block_size - 1) + self.nranks as u64;
        let start = next * self.block_size;
        let mut magic = [0u8; 1];
        let have = pread_full(&self.file, &mut magic, start)?;
        if have == 0 || magic[0] != XPT_MAGIC {
            // zero byte = unused block; anything else is unusable too
            self.at_end = true;
            return Ok(false);
        }
        self.pos = start + 1;
        Ok(true)
    }

    /// Where the next data byte will come from, looking through a hop.
    fn tell_data(&self) -> u64 {
        if self.pos % self.block_size == 0 {
            ((self.pos / self.block_size - 1) + self.nranks as u64) * self.block_size + 1
        } else {
            self.pos
        }
    }

    /// Exactly `n` data bytes, or None at end-of-stream.
    fn read_span(&mut self, n: u64) -> XptResult<Option<Vec<u8>>> {
        let mut out = Vec::with_capacity(n as usize);
        let mut remaining = n;
        while remaining > 0 {
            if !self.normalize_boundary()? {
                return Ok(None);
            }
            let space = self.block_size - self.pos % self.block_size;
            let take = space.min(remaining) as usize;
            let mut buf = vec![0u8; take];
            let got = pread_full(&self.file, &mut buf, self.pos)?;
            if got < take {
                self.at_end = true;
                return Ok(None);
            }
            out.extend_from_slice(&buf);
            self.pos += take as u64;
            remaining -= take as u64;
        }
        Ok(Some(out))
    }

    fn read_byte(&mut self) -> XptResult<Option<u8>> {
        Ok(self.read_span(1)?.map(|v| v[0]))
    }

    fn read_u32_be(&mut self) -> XptResult<Option<u32>> {
        Ok(self
            .read_span(4)?
            .map(|v| u32::from_be_bytes(v.try_into().unwrap())))
    }

    /// Decode a varint from the stream, capturing its raw bytes for CRC
    /// recomputation. None = end of stream, Err-free invalid = None
    /// via the `ok` flag.
    fn read_varint_capture(&mut self, cap: &mut Vec<u8>) -> XptResult<Option<Option<u64>>> {
        let mut raw = Vec::with_capacity(vint::MAX_WIDTH);
        loop {
            let Some(b) = self.read_byte()? else {
                return Ok(None);
            };
            raw.push(b);
            if b & 0x80 == 0 {
                break;
            }
            if raw.len() == vint::MAX_WIDTH {
                cap.extend_from_slice(&raw);
                return Ok(Some(None)); // unterminated: corrupt
            }
        }
        cap.extend_from_slice(&raw);
        Ok(Some(vint::decode_u64(&raw).map(|(v, _)| v)))
    }

    /// Read the next record of the selected rank.
    pub fn read_record(&mut self) -> XptResult<ReadOutcome> {
        if self.at_end {
            return Ok(ReadOutcome::EndOfRank);
        }
        if !self.marker_consumed {
            let Some(marker) = self.read_u32_be()? else {
                return Ok(ReadOutcome::EndOfRank);
            };
            if marker != XPT_SYNC_MARKER {
                return self.resync();
            }
        }
        self.marker_consumed = false;
        self.resync_base = self.pos;

        let Some(crc_stored) = self.read_u32_be()? else {
            return Ok(ReadOutcome::EndOfRank);
        };

        let mut crc_buf = Vec::new();
        let Some(rec_len) = self.read_varint_capture(&mut crc_buf)? else {
            return Ok(ReadOutcome::EndOfRank);
        };
        let Some(rec_len) = rec_len else {
            return self.resync();
        };
        if rec_len > XPT_MAX_RECORD {
            return self.resync();
        }
        if rec_len == 0 {
            return if crc32fast::hash(&crc_buf) == crc_stored {
                self.at_end = true;
                Ok(ReadOutcome::EndOfRank)
            } else {
                self.resync()
            };
        }

        let body_start = crc_buf.len();
        let Some(key_len) = self.read_varint_capture(&mut crc_buf)? else {
            return Ok(ReadOutcome::EndOfRank);
        };
        let Some(key_len) = key_len else {
            return self.resync();
        };
        let key_hdr_len = (crc_buf.len() - body_start) as u64;
        if key_hdr_len + key_len > rec_len {
            return self.resync();
        }
        let Some(key) = self.read_span(key_len)? else {
            return Ok(ReadOutcome::EndOfRank);
        };
        crc_buf.extend_from_slice(&key);

        let val_len = rec_len - key_hdr_len - key_len;
        let val_offset = self.tell_data();
        let Some(val) = self.read_span(val_len)? else {
            return Ok(ReadOutcome::EndOfRank);
        };
        crc_buf.extend_from_slice(&val);

        if crc32fast::hash(&crc_buf) != crc_stored {
            return self.resync();
        }
        Ok(ReadOutcome::Valid {
            key,
            val,
            val_offset,
        })
    }

    /// Seek back to the byte after the prior sync marker and slide a
    /// big-endian 4-byte window forward until the marker reappears. The
    /// bad record is reported INVALID either way; finding the marker
    /// leaves the stream ready for the next record.
    fn resync(&mut self) -> XptResult<ReadOutcome> {
        self.pos = self.resync_base;
        self.at_end = false;
        let mut window = 0u32;
        let mut seen = 0usize;
        loop {
            let Some(b) = self.read_byte()? else {
                // no further marker in this rank
                self.at_end = true;
                return Ok(ReadOutcome::Invalid);
            };
            window = (window << 8) | b as u32;
            seen += 1;
            if seen >= 4 && window == XPT_SYNC_MARKER {
                self.marker_consumed = true;
                self.resync_base = self.pos;
                return Ok(ReadOutcome::Invalid);
            }
        }
    }

    /// Scan one rank, optionally rebuilding an index, and report
    /// valid/invalid counts.
    pub fn load_rank(&mut self, rank: u32, mut index: Option<&mut XptIndex>) -> XptResult<XptStats> {
        self.select_rank(rank)?;
        let mut stats = XptStats::default();
        loop {
            match self.read_record()? {
                ReadOutcome::Valid {
                    key,
                    val,
                    val_offset,
                } => {
                    stats.valid += 1;
                    if let Some(ix) = index.as_deref_mut() {
                        let entry = if val.len() <= ix.max_inline() {
                            IndexEntry::Inline(val)
                        } else {
                            IndexEntry::InFile {
                                file: None,
                                offset: val_offset,
                                len: val.len() as u64,
                            }
                        };
                        ix.insert(key, entry);
                    }
                }
                ReadOutcome::Invalid => stats.invalid += 1,
                ReadOutcome::EndOfRank => return Ok(stats),
            }
        }
    }
}
