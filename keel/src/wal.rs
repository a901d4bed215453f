//! The write-ahead log.
//!
//! The buffer pool only needs a [`PageLog`]: somewhere to record a dirty
//! page's before and after images, and a way to force those records to disk
//! before the page itself is written. [`WalManager`] is the file-backed
//! implementation.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher;
use parking_lot::Mutex;

use crate::error::{DbError, DbResult};
use crate::page::HeapPage;
use crate::page_id::PageAddress;
use crate::transaction::TransactionId;

pub type Lsn = u64;

/// Serialized header size: total_len u32, tid u64, prev_lsn u64, crc u32.
pub const WAL_HEADER_LEN: usize = 4 + 8 + 8 + 4;

/// What the buffer pool requires from a log.
pub trait PageLog: Send + Sync {
    /// Records the before and after images of a page dirtied by `tid`.
    fn log_write(&self, tid: TransactionId, before: &HeapPage, after: &HeapPage) -> DbResult<()>;

    /// Makes every record logged so far durable.
    fn force(&self) -> DbResult<()>;

    /// Records how a transaction ended.
    fn log_outcome(&self, _tid: TransactionId, _committed: bool) -> DbResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Full images of a page before and after a transaction changed it.
    Update {
        page: PageAddress,
        before: Vec<u8>,
        after: Vec<u8>,
    },
    Commit,
    Abort,
}

impl WalRecord {
    fn serialize(&self, buf: &mut BytesMut) {
        match self {
            WalRecord::Update {
                page,
                before,
                after,
            } => {
                buf.put_u8(1);
                buf.put_u32(page.table_id);
                buf.put_u32(page.page_number);
                buf.put_u32(before.len() as u32);
                buf.put_slice(before);
                buf.put_u32(after.len() as u32);
                buf.put_slice(after);
            }
            WalRecord::Commit => buf.put_u8(2),
            WalRecord::Abort => buf.put_u8(3),
        }
    }

    pub fn deserialize(mut buf: &[u8]) -> Option<WalRecord> {
        if !buf.has_remaining() {
            return None;
        }
        match buf.get_u8() {
            1 => {
                if buf.remaining() < 12 {
                    return None;
                }
                let page = PageAddress::new(buf.get_u32(), buf.get_u32());
                let before = take_image(&mut buf)?;
                let after = take_image(&mut buf)?;
                Some(WalRecord::Update {
                    page,
                    before,
                    after,
                })
            }
            2 => Some(WalRecord::Commit),
            3 => Some(WalRecord::Abort),
            _ => None,
        }
    }
}

fn take_image(buf: &mut &[u8]) -> Option<Vec<u8>> {
    if buf.remaining() < 4 {
        return None;
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return None;
    }
    let image = buf[..len].to_vec();
    buf.advance(len);
    Some(image)
}

/// One record read back from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedRecord {
    pub lsn: Lsn,
    pub tid: TransactionId,
    pub prev_lsn: Option<Lsn>,
    pub record: WalRecord,
}

struct WalState {
    file: File,
    next_lsn: Lsn,
    /// Last record written by each transaction, for `prev_lsn` chaining.
    last_lsn: HashMap<TransactionId, Lsn>,
}

/// Append-only log file of CRC-checked records.
pub struct WalManager {
    state: Mutex<WalState>,
    /// Highest transaction id found in the log when it was opened.
    max_recovered_tid: Option<TransactionId>,
}

impl WalManager {
    /// Opens the WAL file, creating it if needed. New records are appended.
    ///
    /// A final record cut short by a crash, or whose checksum fails at the
    /// very end of the file, is truncated away. A bad record followed by
    /// more data is corruption and fails the open.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(path)?;
        let file_len = file.metadata()?.len();
        let (end, max_recovered_tid) = Self::scan(&mut file, file_len)?;
        if end < file_len {
            log::warn!("truncating torn WAL tail: {} bytes after lsn {}", file_len - end, end);
            file.set_len(end)?;
            file.sync_all()?;
        }
        Ok(Self {
            state: Mutex::new(WalState {
                file,
                next_lsn: end,
                last_lsn: HashMap::new(),
            }),
            max_recovered_tid,
        })
    }

    /// Walks the log one record at a time, checking lengths and checksums
    /// without decoding bodies. Returns where the valid prefix ends and the
    /// highest transaction id in it.
    fn scan(file: &mut File, file_len: u64) -> DbResult<(Lsn, Option<TransactionId>)> {
        let mut lsn = 0;
        let mut max_tid: Option<TransactionId> = None;
        let mut body = Vec::new();
        while lsn < file_len {
            let remaining = file_len - lsn;
            if remaining < WAL_HEADER_LEN as u64 {
                break;
            }
            file.seek(SeekFrom::Start(lsn))?;
            let mut header = [0u8; WAL_HEADER_LEN];
            file.read_exact(&mut header)?;
            let mut h = &header[..];
            let total_len = h.get_u32();
            let tid = h.get_u64();
            let prev_lsn = h.get_u64();
            let crc = h.get_u32();
            if (total_len as usize) < WAL_HEADER_LEN || total_len as u64 > remaining {
                break;
            }

            body.resize(total_len as usize - WAL_HEADER_LEN, 0);
            file.read_exact(&mut body)?;
            if checksum(total_len, tid, prev_lsn, &body) != crc {
                if lsn + total_len as u64 == file_len {
                    break;
                }
                return Err(corrupt(lsn, "checksum mismatch"));
            }
            max_tid = max_tid.max(Some(TransactionId::new(tid)));
            lsn += total_len as u64;
        }
        Ok((lsn, max_tid))
    }

    /// Highest transaction id that had a record in the log at open time.
    pub fn max_recovered_tid(&self) -> Option<TransactionId> {
        self.max_recovered_tid
    }

    /// Appends a record for `tid` and returns its LSN. The record is not
    /// durable until [`PageLog::force`].
    pub fn log(&self, tid: TransactionId, record: &WalRecord) -> DbResult<Lsn> {
        let mut body = BytesMut::new();
        record.serialize(&mut body);
        let total_len = (WAL_HEADER_LEN + body.len()) as u32;

        let mut state = self.state.lock();
        let lsn = state.next_lsn;
        // u64::MAX marks the first record of a transaction.
        let prev_lsn = state.last_lsn.get(&tid).copied().unwrap_or(u64::MAX);

        let crc = checksum(total_len, tid.as_u64(), prev_lsn, &body);

        let mut out = BytesMut::with_capacity(total_len as usize);
        out.put_u32(total_len);
        out.put_u64(tid.as_u64());
        out.put_u64(prev_lsn);
        out.put_u32(crc);
        out.put_slice(&body);
        state.file.write_all(&out)?;

        state.next_lsn += total_len as u64;
        match record {
            WalRecord::Commit | WalRecord::Abort => {
                state.last_lsn.remove(&tid);
            }
            WalRecord::Update { .. } => {
                state.last_lsn.insert(tid, lsn);
            }
        }
        Ok(lsn)
    }

    /// Reads the record at `lsn`, verifying its checksum.
    pub fn read_record(&self, lsn: Lsn) -> DbResult<LoggedRecord> {
        let mut state = self.state.lock();
        Self::read_at(&mut state.file, lsn)
    }

    /// Every record in the log, in LSN order.
    pub fn records(&self) -> DbResult<Vec<LoggedRecord>> {
        let mut state = self.state.lock();
        let end = state.next_lsn;
        let mut lsn = 0;
        let mut records = Vec::new();
        while lsn < end {
            let (record, len) = Self::read_with_len(&mut state.file, lsn)?;
            records.push(record);
            lsn += len;
        }
        Ok(records)
    }

    fn read_at(file: &mut File, lsn: Lsn) -> DbResult<LoggedRecord> {
        Self::read_with_len(file, lsn).map(|(record, _)| record)
    }

    fn read_with_len(file: &mut File, lsn: Lsn) -> DbResult<(LoggedRecord, u64)> {
        file.seek(SeekFrom::Start(lsn))?;
        let mut header = [0u8; WAL_HEADER_LEN];
        file.read_exact(&mut header)?;
        let mut h = &header[..];
        let total_len = h.get_u32();
        let tid = h.get_u64();
        let prev_lsn = h.get_u64();
        let crc = h.get_u32();

        if (total_len as usize) < WAL_HEADER_LEN {
            return Err(corrupt(lsn, "record shorter than its header"));
        }
        let mut body = vec![0u8; total_len as usize - WAL_HEADER_LEN];
        file.read_exact(&mut body)?;

        if checksum(total_len, tid, prev_lsn, &body) != crc {
            return Err(corrupt(lsn, "checksum mismatch"));
        }

        let record = WalRecord::deserialize(&body).ok_or_else(|| corrupt(lsn, "unknown record body"))?;
        Ok((
            LoggedRecord {
                lsn,
                tid: TransactionId::new(tid),
                prev_lsn: (prev_lsn != u64::MAX).then_some(prev_lsn),
                record,
            },
            total_len as u64,
        ))
    }
}

fn checksum(total_len: u32, tid: u64, prev_lsn: u64, body: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&total_len.to_be_bytes());
    hasher.update(&tid.to_be_bytes());
    hasher.update(&prev_lsn.to_be_bytes());
    hasher.update(body);
    hasher.finalize()
}

fn corrupt(lsn: Lsn, what: &str) -> DbError {
    DbError::Io(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("corrupt WAL record at {lsn}: {what}"),
    ))
}

impl PageLog for WalManager {
    fn log_write(&self, tid: TransactionId, before: &HeapPage, after: &HeapPage) -> DbResult<()> {
        self.log(
            tid,
            &WalRecord::Update {
                page: after.id(),
                before: before.page_data(),
                after: after.page_data(),
            },
        )?;
        Ok(())
    }

    fn force(&self) -> DbResult<()> {
        self.state.lock().file.sync_data()?;
        Ok(())
    }

    fn log_outcome(&self, tid: TransactionId, committed: bool) -> DbResult<()> {
        let record = if committed {
            WalRecord::Commit
        } else {
            WalRecord::Abort
        };
        self.log(tid, &record)?;
        self.force()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::tempdir;

    #[test]
    fn test_records_chain_per_transaction() {
        let dir = tempdir().unwrap();
        let wal = WalManager::open(dir.path().join("test.wal")).unwrap();
        let t1 = TransactionId::new(1);
        let t2 = TransactionId::new(2);
        let page = PageAddress::new(5, 0);
        let update = WalRecord::Update {
            page,
            before: vec![0; 8],
            after: vec![1; 8],
        };

        let a = wal.log(t1, &update).unwrap();
        let b = wal.log(t2, &update).unwrap();
        let c = wal.log(t1, &WalRecord::Commit).unwrap();
        wal.force().unwrap();

        let records = wal.records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].lsn, a);
        assert_eq!(records[0].prev_lsn, None);
        assert_eq!(records[1].lsn, b);
        assert_eq!(records[1].prev_lsn, None);
        assert_eq!(records[2].lsn, c);
        assert_eq!(records[2].prev_lsn, Some(a));
        assert_eq!(records[0].record, update);
    }

    #[test]
    fn test_crc_mismatch_is_invalid_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        let wal = WalManager::open(&path).unwrap();
        let lsn = wal.log(TransactionId::new(1), &WalRecord::Commit).unwrap();
        wal.log(TransactionId::new(2), &WalRecord::Commit).unwrap();
        wal.force().unwrap();

        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(lsn + 20)).unwrap();
        file.write_all(&[0, 0, 0, 0]).unwrap();
        drop(file);

        match wal.read_record(lsn) {
            Err(DbError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::InvalidData),
            other => panic!("expected a checksum failure, got {other:?}"),
        }
        drop(wal);

        // A bad record with more log after it is not a torn tail.
        match WalManager::open(&path) {
            Err(DbError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::InvalidData),
            Ok(_) => panic!("expected the open to fail"),
            Err(e) => panic!("unexpected error {e}"),
        }
    }

    #[test]
    fn test_torn_tail_is_truncated_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        let wal = WalManager::open(&path).unwrap();
        wal.log(TransactionId::new(3), &WalRecord::Commit).unwrap();
        let second = wal.log(TransactionId::new(7), &WalRecord::Commit).unwrap();
        wal.force().unwrap();
        drop(wal);

        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        let wal = WalManager::open(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), second);
        assert_eq!(wal.max_recovered_tid(), Some(TransactionId::new(3)));
        assert_eq!(wal.records().unwrap().len(), 1);

        let lsn = wal.log(TransactionId::new(8), &WalRecord::Abort).unwrap();
        assert_eq!(lsn, second);
        assert_eq!(wal.records().unwrap().len(), 2);
    }

    #[test]
    fn test_checksum_failure_in_last_record_is_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        let wal = WalManager::open(&path).unwrap();
        wal.log(TransactionId::new(1), &WalRecord::Commit).unwrap();
        let last = wal.log(TransactionId::new(2), &WalRecord::Abort).unwrap();
        drop(wal);

        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(last + WAL_HEADER_LEN as u64)).unwrap();
        file.write_all(&[9]).unwrap();
        drop(file);

        let wal = WalManager::open(&path).unwrap();
        assert_eq!(wal.records().unwrap().len(), 1);
        assert_eq!(wal.max_recovered_tid(), Some(TransactionId::new(1)));
    }
}
