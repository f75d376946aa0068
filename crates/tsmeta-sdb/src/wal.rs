//! File-backed replication log
//!
//! Append-only file of framed log entries with:
//! - Sequential sequence numbers
//! - CRC32C checksums per record
//! - Torn tail detection on open
//!
//! Only the last record may be torn. A length that runs past the end of the
//! file while a valid record still follows it, or a length above
//! [`MAX_RECORD_DATA`], is corruption and fails the open.
//!
//! Record format:
//! ```text
//! +--------+------+--------+------+--------+
//! | Magic  | Seq  | Length | Data | CRC32C |
//! | 4B     | 8B   | 4B     | var  | 4B     |
//! +--------+------+--------+------+--------+
//! ```

use crate::log::{LogEntry, ReplicationLog};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};
use tsmeta_common::{Error, Result};

/// Record magic number
const LOG_MAGIC: u32 = 0x5344_424C; // "SDBL"

/// Record header size (magic + seq + length)
const RECORD_HEADER_SIZE: usize = 16;

/// Trailing checksum size
const RECORD_CRC_SIZE: usize = 4;

/// Largest record body accepted
pub const MAX_RECORD_DATA: usize = 1 << 20;

/// A single framed record
#[derive(Debug)]
struct LogRecord {
    seq: u64,
    data: Vec<u8>,
}

/// Outcome of parsing the bytes at some offset
enum Parsed {
    Record(LogRecord, usize),
    /// Not enough bytes for a full record: torn tail
    Incomplete,
}

impl LogRecord {
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + self.data.len() + RECORD_CRC_SIZE);

        buf.extend_from_slice(&LOG_MAGIC.to_le_bytes());
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);

        // CRC over everything except the CRC itself
        let crc = crc32c::crc32c(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        buf
    }

    fn parse(data: &[u8]) -> Result<Parsed> {
        if data.len() < RECORD_HEADER_SIZE {
            return Ok(Parsed::Incomplete);
        }

        let magic = read_u32(&data[0..4]);
        if magic != LOG_MAGIC {
            return Err(Error::DataCorruption("invalid log record magic".into()));
        }

        let seq = read_u64(&data[4..12]);
        let data_len = read_u32(&data[12..16]) as usize;
        if data_len > MAX_RECORD_DATA {
            return Err(Error::DataCorruption(format!(
                "log record {seq} claims {data_len} bytes"
            )));
        }

        let total_size = RECORD_HEADER_SIZE + data_len + RECORD_CRC_SIZE;
        if data.len() < total_size {
            return Ok(Parsed::Incomplete);
        }

        let body_end = RECORD_HEADER_SIZE + data_len;
        let stored_crc = read_u32(&data[body_end..total_size]);
        let computed_crc = crc32c::crc32c(&data[..body_end]);
        if computed_crc != stored_crc {
            return Err(Error::DataCorruption(format!(
                "log record {seq} checksum mismatch"
            )));
        }

        let record = Self {
            seq,
            data: data[RECORD_HEADER_SIZE..body_end].to_vec(),
        };
        Ok(Parsed::Record(record, total_size))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

/// Walk every complete record in `data`, returning the valid prefix length
fn walk_records(
    data: &[u8],
    mut visit: impl FnMut(LogRecord) -> Result<()>,
) -> Result<usize> {
    let mut offset = 0;
    while offset < data.len() {
        match LogRecord::parse(&data[offset..])? {
            Parsed::Record(record, size) => {
                visit(record)?;
                offset += size;
            }
            Parsed::Incomplete => {
                if let Some(at) = find_record(&data[offset + 1..]) {
                    return Err(Error::DataCorruption(format!(
                        "log record at offset {offset} runs into a valid record at offset {}",
                        offset + 1 + at
                    )));
                }
                break;
            }
        }
    }
    Ok(offset)
}

/// Offset of the first complete, checksummed record in `data`
fn find_record(data: &[u8]) -> Option<usize> {
    let magic = LOG_MAGIC.to_le_bytes();
    data.windows(magic.len())
        .enumerate()
        .filter(|(_, window)| **window == magic[..])
        .map(|(at, _)| at)
        .find(|&at| matches!(LogRecord::parse(&data[at..]), Ok(Parsed::Record(..))))
}

/// Buffered file handle plus the length of the records known to be whole
struct Writer {
    out: BufWriter<File>,
    len: u64,
}

/// File-backed [`ReplicationLog`]
pub struct FileLog {
    /// Log file path
    path: PathBuf,
    /// Buffered writer, also serializes sequence assignment
    writer: Mutex<Writer>,
    /// Last assigned sequence number
    last_seq: AtomicU64,
    /// Sync after every append
    sync_on_write: bool,
}

impl FileLog {
    /// Open (or create) the log at `path`.
    ///
    /// A partially written final record is cut off. A checksum mismatch or
    /// an impossible length fails the open and leaves the file untouched.
    pub fn open(path: impl AsRef<Path>, sync_on_write: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let existing = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut last_seq = 0;
        let valid_len = walk_records(&existing, |record| {
            last_seq = record.seq;
            Ok(())
        })?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        if valid_len < existing.len() {
            warn!(
                "Dropping {} bytes of torn tail from {}",
                existing.len() - valid_len,
                path.display()
            );
            file.set_len(valid_len as u64)?;
        }

        debug!("Opened log {} at seq {}", path.display(), last_seq);

        Ok(Self {
            path,
            writer: Mutex::new(Writer {
                out: BufWriter::new(file),
                len: valid_len as u64,
            }),
            last_seq: AtomicU64::new(last_seq),
            sync_on_write,
        })
    }

    /// Flush buffered records and sync to disk
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.out.flush()?;
        writer.out.get_ref().sync_all()?;
        Ok(())
    }

    /// Drop buffered bytes and cut the file back to its last whole record
    fn reset_writer(writer: &mut Writer) -> std::io::Result<()> {
        let file = writer.out.get_ref().try_clone()?;
        let stale = std::mem::replace(&mut writer.out, BufWriter::new(file));
        let (_, discarded) = stale.into_parts();
        if let Ok(buf) = discarded
            && !buf.is_empty()
        {
            debug!("Discarded {} buffered log bytes", buf.len());
        }
        writer.out.get_ref().set_len(writer.len)
    }

    /// Get the path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReplicationLog for FileLog {
    fn append(&self, entry: &LogEntry) -> Result<u64> {
        let data = entry.to_bytes()?;
        if data.len() > MAX_RECORD_DATA {
            return Err(Error::replication(format!(
                "log entry of {} bytes exceeds {MAX_RECORD_DATA}",
                data.len()
            )));
        }

        let mut writer = self.writer.lock();
        let seq = self.last_seq.load(Ordering::Acquire) + 1;
        let bytes = LogRecord { seq, data }.to_bytes();

        if let Err(e) = (|| -> std::io::Result<()> {
            writer.out.write_all(&bytes)?;
            writer.out.flush()?;
            if self.sync_on_write {
                writer.out.get_ref().sync_data()?;
            }
            Ok(())
        })() {
            if let Err(reset) = Self::reset_writer(&mut writer) {
                warn!("Failed to reset log {}: {}", self.path.display(), reset);
            }
            return Err(Error::replication(format!("log write failed: {e}")));
        }

        writer.len += bytes.len() as u64;
        self.last_seq.store(seq, Ordering::Release);
        Ok(seq)
    }

    fn replay(&self, visit: &mut dyn FnMut(u64, LogEntry) -> Result<()>) -> Result<u64> {
        self.writer.lock().out.flush()?;

        let mut bytes = Vec::new();
        File::open(&self.path)?.read_to_end(&mut bytes)?;

        let mut last = 0;
        walk_records(&bytes, |record| {
            last = record.seq;
            let entry = LogEntry::from_bytes(&record.data)?;
            visit(record.seq, entry)
        })?;
        Ok(last)
    }

    fn last_seq(&self) -> u64 {
        self.last_seq.load(Ordering::Acquire)
    }
}
