pub mod buffer_pool;

pub mod catalog;

pub mod config;

pub mod database;

pub mod error;

pub mod failpoint;

pub mod heap_table;

pub mod lock_manager;

pub mod page;

pub mod page_id;

pub mod transaction;

pub mod tuple;

pub mod wal;

pub use buffer_pool::{BufferPool, PageRef, Permissions};
pub use catalog::Catalog;
pub use config::{BufferPoolConfig, DEFAULT_PAGES, DEFAULT_PAGE_SIZE};
pub use database::Database;
pub use error::{DbError, DbResult};
pub use heap_table::{HeapScan, HeapTable};
pub use lock_manager::{LockMode, LockTable};
pub use page::HeapPage;
pub use page_id::{PageAddress, RecordAddress};
pub use transaction::{Transaction, TransactionId};
pub use tuple::{Field, FieldType, Schema, Tuple};
pub use wal::{PageLog, WalManager};
