//! Wires the catalog, log and buffer pool together.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::buffer_pool::BufferPool;
use crate::catalog::Catalog;
use crate::config::BufferPoolConfig;
use crate::error::DbResult;
use crate::transaction::{Transaction, TransactionId};
use crate::wal::WalManager;

pub struct Database {
    catalog: Arc<Catalog>,
    wal: Arc<WalManager>,
    pool: Arc<BufferPool>,
    next_transaction_id: AtomicU64,
}

impl Database {
    /// Opens the log at `wal_path` and builds an empty catalog and buffer
    /// pool. Transaction ids continue after the highest one in the log.
    pub fn open<P: AsRef<Path>>(wal_path: P, config: BufferPoolConfig) -> DbResult<Self> {
        let wal = Arc::new(WalManager::open(wal_path)?);
        let next_id = wal.max_recovered_tid().map_or(1, |id| id.as_u64() + 1);
        let catalog = Arc::new(Catalog::new(config.page_size));
        let pool = Arc::new(BufferPool::new(config, catalog.clone(), wal.clone())?);
        log::info!("database opened, next transaction id {}", next_id);
        Ok(Self {
            catalog,
            wal,
            pool,
            next_transaction_id: AtomicU64::new(next_id),
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn wal(&self) -> &Arc<WalManager> {
        &self.wal
    }

    /// Starts a transaction with a fresh id.
    pub fn begin(&self) -> Transaction {
        let id = self.next_transaction_id.fetch_add(1, Ordering::SeqCst);
        Transaction::new(TransactionId::new(id), Arc::clone(&self.pool))
    }
}
