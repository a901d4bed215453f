//! Transaction identifiers and handles.

use std::fmt;
use std::sync::Arc;

use crate::buffer_pool::{BufferPool, PageRef, Permissions};
use crate::error::DbResult;
use crate::heap_table::{HeapScan, HeapTable};
use crate::page_id::PageAddress;
use crate::tuple::Tuple;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A running transaction. It must end with [`commit`](Self::commit) or
/// [`abort`](Self::abort); dropping it unfinished aborts it.
pub struct Transaction {
    id: TransactionId,
    pool: Arc<BufferPool>,
    finished: bool,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, pool: Arc<BufferPool>) -> Self {
        log::debug!("began tx {}", id);
        Self {
            id,
            pool,
            finished: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn get_page(&self, addr: PageAddress, perm: Permissions) -> DbResult<PageRef> {
        self.pool.get_page(self.id, addr, perm)
    }

    pub fn insert_tuple(&self, table_id: u32, tuple: &mut Tuple) -> DbResult<()> {
        self.pool.insert_tuple(self.id, table_id, tuple)
    }

    pub fn delete_tuple(&self, tuple: &Tuple) -> DbResult<()> {
        self.pool.delete_tuple(self.id, tuple)
    }

    pub fn scan<'a>(&'a self, table: &'a HeapTable) -> HeapScan<'a> {
        table.scan(&self.pool, self.id)
    }

    /// Flushes this transaction's pages, logs the commit and releases its
    /// locks. If flushing fails the transaction is aborted instead.
    pub fn commit(mut self) -> DbResult<()> {
        self.finish(true)
    }

    /// Reverts this transaction's cached pages and releases its locks.
    pub fn abort(mut self) -> DbResult<()> {
        self.finish(false)
    }

    fn finish(&mut self, commit: bool) -> DbResult<()> {
        self.pool.complete(self.id, commit)?;
        self.finished = true;
        self.pool.log().log_outcome(self.id, commit)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.finish(false) {
            log::warn!("failed to abort tx {} on drop: {}", self.id, e);
        }
    }
}
