//! Errors surfaced by the storage engine.

use std::io;

use thiserror::Error;

use crate::page_id::PageAddress;
use crate::transaction::TransactionId;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    /// A lock could not be acquired within the randomized wait window. The
    /// caller must abort the transaction.
    #[error("transaction {tid} aborted: timed out waiting for a lock on page {page}")]
    TransactionAborted { tid: TransactionId, page: PageAddress },

    #[error("page {0} has no empty slot")]
    PageFull(PageAddress),

    #[error("tuple schema does not match the schema of table {0}")]
    SchemaMismatch(u32),

    #[error("page {page} is out of range: table holds {page_count} pages")]
    PageOutOfRange { page: PageAddress, page_count: u32 },

    #[error("tuple is not stored on page {0}")]
    TupleNotOnPage(PageAddress),

    #[error("slot {slot} on page {page} is already empty")]
    SlotEmpty { page: PageAddress, slot: usize },

    #[error("tuple has no record address")]
    MissingRecordAddress,

    #[error("malformed page {page}: {reason}")]
    MalformedPage { page: PageAddress, reason: String },

    #[error("cannot evict: all {0} cached pages are dirty")]
    AllPagesDirty(usize),

    #[error("cannot evict: {in_use} of {cached} cached pages are being modified, the rest are dirty")]
    NoEvictablePage { cached: usize, in_use: usize },

    #[error("no table with id {0}")]
    UnknownTable(u32),

    #[error("no table named {0:?}")]
    UnknownTableName(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DbError {
    /// True for the lock-timeout condition that obliges the caller to abort.
    pub fn is_transaction_aborted(&self) -> bool {
        matches!(self, DbError::TransactionAborted { .. })
    }

    pub(crate) fn malformed(page: PageAddress, reason: impl Into<String>) -> Self {
        DbError::MalformedPage {
            page,
            reason: reason.into(),
        }
    }
}
