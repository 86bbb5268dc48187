//! Commit journal: append-only log of committed write-sets
//!
//! Every committed transaction is appended as one checksummed frame before
//! its changes become visible, so the tables can be rebuilt by replay.
//!
//! # Frame format
//! ```text
//! [body_len:  u32]
//! [sequence:  u64]
//! [timestamp: i64]   // unix millis of the commit
//! [payload:   bytes] // bincode-encoded Vec<Change>
//! [checksum:  u32]   // CRC32C over sequence+timestamp+payload
//! ```

use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use types::account::TradingAccount;
use types::instrument::Instrument;
use types::ledger::Transaction;
use types::order::Order;
use types::position::Position;
use types::risk::RiskAlert;

use crate::store::Setting;

/// Frames above this size are treated as corruption
const MAX_BODY_LEN: usize = 64 * 1024 * 1024;
/// sequence + timestamp + checksum
const FIXED_BODY_LEN: usize = 8 + 8 + 4;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Sequence error: expected {expected}, got {got}")]
    SequenceError { expected: u64, got: u64 },
}

// ── Records ─────────────────────────────────────────────────────────

/// One row written by a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Change {
    Account(TradingAccount),
    Order(Order),
    Position(Position),
    Transaction(Transaction),
    Alert(RiskAlert),
    Instrument(Instrument),
    Setting(Setting),
}

/// A committed write-set
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRecord {
    pub sequence: u64,
    pub timestamp: i64,
    pub changes: Vec<Change>,
}

impl CommitRecord {
    fn checksum(sequence: u64, timestamp: i64, payload: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(16 + payload.len());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    /// Encode to a length-prefixed frame
    pub fn to_bytes(&self) -> Result<Vec<u8>, JournalError> {
        let payload = bincode::serialize(&self.changes)
            .map_err(|e| JournalError::Serialization(e.to_string()))?;
        let body_len = (FIXED_BODY_LEN + payload.len()) as u32;
        let checksum = Self::checksum(self.sequence, self.timestamp, &payload);

        let mut buf = Vec::with_capacity(4 + body_len as usize);
        buf.extend_from_slice(&body_len.to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&payload);
        buf.extend_from_slice(&checksum.to_le_bytes());
        Ok(buf)
    }

    /// Decode one frame from the front of `data`.
    ///
    /// Returns `(record, bytes_consumed)`. Truncated or corrupted frames are
    /// errors, never panics.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), JournalError> {
        let corrupt = |detail: String| JournalError::Serialization(detail);

        let len_bytes: [u8; 4] = data
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| corrupt("Not enough data for length prefix".into()))?;
        let body_len = u32::from_le_bytes(len_bytes) as usize;

        if !(FIXED_BODY_LEN..=MAX_BODY_LEN).contains(&body_len) {
            return Err(corrupt(format!("Implausible body length: {}", body_len)));
        }
        let body = data.get(4..4 + body_len).ok_or_else(|| {
            corrupt(format!(
                "Incomplete frame: need {} bytes, have {}",
                4 + body_len,
                data.len()
            ))
        })?;

        let (head, rest) = body.split_at(16);
        let (payload, crc) = rest.split_at(rest.len() - 4);
        let sequence = u64::from_le_bytes(read_array(&head[..8])?);
        let timestamp = i64::from_le_bytes(read_array(&head[8..16])?);
        let checksum = u32::from_le_bytes(read_array(crc)?);

        if checksum != Self::checksum(sequence, timestamp, payload) {
            return Err(corrupt(format!("Checksum mismatch at sequence {}", sequence)));
        }

        let changes: Vec<Change> =
            bincode::deserialize(payload).map_err(|e| corrupt(e.to_string()))?;

        Ok((
            Self {
                sequence,
                timestamp,
                changes,
            },
            4 + body_len,
        ))
    }
}

fn read_array<const N: usize>(bytes: &[u8]) -> Result<[u8; N], JournalError> {
    bytes
        .try_into()
        .map_err(|_| JournalError::Serialization(format!("expected {} bytes", N)))
}

// ── Writer ──────────────────────────────────────────────────────────

/// Append-only journal writer; flushes and syncs every commit.
pub struct JournalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    next_sequence: u64,
    bytes_written: u64,
}

impl JournalWriter {
    /// Open (or create) the journal file for appending.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let bytes_written = file.metadata()?.len();

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            next_sequence: 0,
            bytes_written,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set the next expected sequence number (used after replay).
    pub fn set_next_sequence(&mut self, seq: u64) {
        self.next_sequence = seq;
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append a record; its sequence must be the next expected one.
    pub fn append(&mut self, record: &CommitRecord) -> Result<(), JournalError> {
        if record.sequence != self.next_sequence {
            return Err(JournalError::SequenceError {
                expected: self.next_sequence,
                got: record.sequence,
            });
        }
        let frame = record.to_bytes()?;
        self.writer.write_all(&frame)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;

        self.bytes_written += frame.len() as u64;
        self.next_sequence += 1;
        Ok(())
    }
}

// ── Reader ──────────────────────────────────────────────────────────

/// Result of scanning a journal file
#[derive(Debug, Default)]
pub struct JournalScan {
    pub records: Vec<CommitRecord>,
    /// Byte offset of the first unreadable frame, if the tail is damaged
    pub corrupted_at: Option<u64>,
    pub detail: Option<String>,
}

/// Read every valid frame from `path`, stopping at the first damaged one.
///
/// A torn final write leaves a partial frame; the valid prefix is returned
/// and the offset of the damage is reported.
pub fn read_journal(path: &Path) -> Result<JournalScan, JournalError> {
    let mut data = Vec::new();
    match File::open(path) {
        Ok(mut f) => {
            f.read_to_end(&mut data)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(JournalScan::default()),
        Err(e) => return Err(e.into()),
    }

    let mut scan = JournalScan::default();
    let mut pos = 0usize;
    let mut expected = 0u64;

    while pos < data.len() {
        match CommitRecord::from_bytes(&data[pos..]) {
            Ok((record, used)) if record.sequence == expected => {
                expected += 1;
                pos += used;
                scan.records.push(record);
            }
            Ok((record, _)) => {
                scan.corrupted_at = Some(pos as u64);
                scan.detail = Some(format!(
                    "Sequence gap: expected {}, got {}",
                    expected, record.sequence
                ));
                break;
            }
            Err(e) => {
                scan.corrupted_at = Some(pos as u64);
                scan.detail = Some(e.to_string());
                break;
            }
        }
    }

    Ok(scan)
}

/// Cut a damaged tail off so new frames append after the valid prefix.
pub fn truncate_journal(path: &Path, len: u64) -> Result<(), JournalError> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tempfile::TempDir;
    use types::ids::UserId;
    use types::instrument::Segment;

    fn record(seq: u64) -> CommitRecord {
        CommitRecord {
            sequence: seq,
            timestamp: 1_708_123_456_789 + seq as i64,
            changes: vec![
                Change::Account(TradingAccount::new(UserId::new(), Utc::now())),
                Change::Instrument(Instrument::new(
                    "NSE:RELIANCE",
                    "RELIANCE",
                    Segment::Equity,
                    1,
                    Decimal::from_str_exact("2450.55").unwrap(),
                )),
            ],
        }
    }

    #[test]
    fn test_frame_decodes() {
        let rec = record(0);
        let bytes = rec.to_bytes().unwrap();
        let (decoded, used) = CommitRecord::from_bytes(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoded, rec);
    }

    #[test]
    fn test_checksum_detects_flip() {
        let mut bytes = record(0).to_bytes().unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        assert!(CommitRecord::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_truncated_frame_is_error() {
        let bytes = record(0).to_bytes().unwrap();
        assert!(CommitRecord::from_bytes(&bytes[..bytes.len() - 3]).is_err());
        assert!(CommitRecord::from_bytes(&bytes[..2]).is_err());
    }

    #[test]
    fn test_writer_enforces_sequence() {
        let dir = TempDir::new().unwrap();
        let mut w = JournalWriter::open(dir.path().join("commits.log")).unwrap();
        assert!(matches!(
            w.append(&record(3)),
            Err(JournalError::SequenceError { expected: 0, got: 3 })
        ));
        w.append(&record(0)).unwrap();
        w.append(&record(1)).unwrap();
        assert_eq!(w.next_sequence(), 2);
    }

    #[test]
    fn test_read_recovers_valid_prefix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("commits.log");
        let mut w = JournalWriter::open(&path).unwrap();
        for seq in 0..3 {
            w.append(&record(seq)).unwrap();
        }
        let good_len = w.bytes_written();
        drop(w);

        // torn write
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[42, 0, 0, 0, 1, 2, 3]).unwrap();
        drop(f);

        let scan = read_journal(&path).unwrap();
        assert_eq!(scan.records.len(), 3);
        assert_eq!(scan.corrupted_at, Some(good_len));

        truncate_journal(&path, good_len).unwrap();
        let scan = read_journal(&path).unwrap();
        assert!(scan.corrupted_at.is_none());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let scan = read_journal(&dir.path().join("absent.log")).unwrap();
        assert!(scan.records.is_empty());
    }
}
