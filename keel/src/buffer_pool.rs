//! Manages the buffer pool, a fixed-capacity cache of heap pages.
//!
//! Every page handed out is first locked on behalf of the requesting
//! transaction. Eviction never writes a dirty page (no-steal), and a
//! transaction's dirty pages are written, after their log records are
//! forced, when it commits (force). Aborting reloads them from disk.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;

use crate::catalog::Catalog;
use crate::config::BufferPoolConfig;
use crate::error::{DbError, DbResult};
use crate::failpoint;
use crate::lock_manager::{LockMode, LockTable};
use crate::page::HeapPage;
use crate::page_id::PageAddress;
use crate::transaction::TransactionId;
use crate::tuple::Tuple;
use crate::wal::PageLog;

/// A cached page. The page lock taken in [`BufferPool::get_page`] decides who
/// may use it; the `RwLock` only guards the in-memory bytes.
pub type PageRef = Arc<RwLock<HeapPage>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

impl Permissions {
    pub fn lock_mode(self) -> LockMode {
        match self {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        }
    }
}

struct CachedPage {
    page: PageRef,
    /// Load order stamp; the smallest clean one is evicted first.
    age: u64,
}

#[derive(Default)]
struct PageCache {
    pages: HashMap<PageAddress, CachedPage>,
    next_age: u64,
}

impl PageCache {
    fn insert(&mut self, addr: PageAddress, page: PageRef) {
        let age = self.next_age;
        self.next_age += 1;
        self.pages.insert(addr, CachedPage { page, age });
    }

    fn dirtied_by(&self, tid: TransactionId) -> Vec<PageAddress> {
        self.pages
            .iter()
            .filter(|(_, e)| e.page.read().is_dirty() == Some(tid))
            .map(|(addr, _)| *addr)
            .collect()
    }
}

/// The buffer pool manager.
pub struct BufferPool {
    config: BufferPoolConfig,
    catalog: Arc<Catalog>,
    log: Arc<dyn PageLog>,
    cache: Mutex<PageCache>,
    locks: LockTable,
}

impl BufferPool {
    pub fn new(
        config: BufferPoolConfig,
        catalog: Arc<Catalog>,
        log: Arc<dyn PageLog>,
    ) -> DbResult<Self> {
        config.validate()?;
        if catalog.page_size() != config.page_size {
            return Err(DbError::Config(format!(
                "catalog uses {}-byte pages but the pool is configured for {}",
                catalog.page_size(),
                config.page_size
            )));
        }
        Ok(Self {
            config,
            catalog,
            log,
            cache: Mutex::new(PageCache::default()),
            locks: LockTable::new(),
        })
    }

    pub fn config(&self) -> &BufferPoolConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn log(&self) -> &Arc<dyn PageLog> {
        &self.log
    }

    pub fn lock_table(&self) -> &LockTable {
        &self.locks
    }

    /// Locks `addr` for `tid` in the mode `perm` implies, then returns the
    /// cached page, loading it (and evicting if full) on a miss.
    ///
    /// Fails with [`DbError::TransactionAborted`] if the lock is not granted
    /// within the randomized timeout; the caller must then abort `tid`.
    pub fn get_page(
        &self,
        tid: TransactionId,
        addr: PageAddress,
        perm: Permissions,
    ) -> DbResult<PageRef> {
        self.locks.acquire(
            addr,
            tid,
            perm.lock_mode(),
            self.lock_timeout(),
            self.config.lock_poll_interval,
        )?;

        let mut cache = self.cache.lock();
        if let Some(entry) = cache.pages.get(&addr) {
            return Ok(Arc::clone(&entry.page));
        }
        if cache.pages.len() >= self.config.capacity {
            self.evict_locked(&mut cache)?;
        }
        let page = self.catalog.table(addr.table_id)?.read_page(addr)?;
        log::debug!("loaded page {} for tx {}", addr, tid);
        let page = Arc::new(RwLock::new(page));
        cache.insert(addr, Arc::clone(&page));
        Ok(page)
    }

    fn lock_timeout(&self) -> Duration {
        let jitter = self.config.lock_timeout_jitter.as_millis() as u64;
        let extra = rand::thread_rng().gen_range(0..=jitter);
        self.config.lock_timeout + Duration::from_millis(extra)
    }

    /// Releases `tid`'s lock on one page before the transaction ends.
    /// Returns false if no lock was held.
    pub fn release_page(&self, tid: TransactionId, addr: PageAddress) -> bool {
        self.locks.release(addr, tid)
    }

    pub fn holds_lock(&self, tid: TransactionId, addr: PageAddress) -> bool {
        self.locks.holds(addr, tid)
    }

    /// Inserts `tuple` into table `table_id` on behalf of `tid` and caches the
    /// dirtied page so later reads in the transaction see it.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        table_id: u32,
        tuple: &mut Tuple,
    ) -> DbResult<()> {
        let table = self.catalog.table(table_id)?;
        let pages = table.insert_tuple(self, tid, tuple)?;
        self.cache_dirtied(tid, pages)
    }

    /// Deletes `tuple` from the table its record address names.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> DbResult<()> {
        let rid = tuple.record_address().ok_or(DbError::MissingRecordAddress)?;
        let table = self.catalog.table(rid.page.table_id)?;
        let pages = table.delete_tuple(self, tid, tuple)?;
        self.cache_dirtied(tid, pages)
    }

    fn cache_dirtied(&self, tid: TransactionId, pages: Vec<PageRef>) -> DbResult<()> {
        for page in pages {
            let addr = {
                let mut p = page.write();
                p.mark_dirty(Some(tid));
                p.id()
            };
            let mut cache = self.cache.lock();
            if let Some(entry) = cache.pages.get_mut(&addr) {
                entry.page = page;
                continue;
            }
            if cache.pages.len() >= self.config.capacity {
                self.evict_locked(&mut cache)?;
            }
            cache.insert(addr, page);
        }
        Ok(())
    }

    /// Evicts the oldest clean page.
    pub fn evict_page(&self) -> DbResult<()> {
        let mut cache = self.cache.lock();
        self.evict_locked(&mut cache)
    }

    fn evict_locked(&self, cache: &mut PageCache) -> DbResult<()> {
        // A write-latched page is mid-mutation, so whether it is clean is
        // unknown; it is never a candidate.
        let mut in_use = 0;
        let mut victim: Option<(PageAddress, u64)> = None;
        for (addr, entry) in &cache.pages {
            let Some(page) = entry.page.try_read() else {
                in_use += 1;
                continue;
            };
            if page.is_dirty().is_none() && victim.map_or(true, |(_, age)| entry.age < age) {
                victim = Some((*addr, entry.age));
            }
        }

        match victim {
            Some((addr, _)) => {
                cache.pages.remove(&addr);
                log::debug!("evicted page {}", addr);
                Ok(())
            }
            None if in_use > 0 => {
                log::warn!(
                    "buffer pool has no evictable page: {} of {} in use",
                    in_use,
                    cache.pages.len()
                );
                Err(DbError::NoEvictablePage {
                    cached: cache.pages.len(),
                    in_use,
                })
            }
            None => {
                log::error!("buffer pool exhausted: all {} pages are dirty", cache.pages.len());
                Err(DbError::AllPagesDirty(cache.pages.len()))
            }
        }
    }

    /// Writes `addr` to disk if it is cached and dirty, after logging its
    /// before and after images and forcing the log.
    pub fn flush_page(&self, addr: PageAddress) -> DbResult<()> {
        let cache = self.cache.lock();
        self.flush_locked(&cache, addr)
    }

    fn flush_locked(&self, cache: &PageCache, addr: PageAddress) -> DbResult<()> {
        let Some(entry) = cache.pages.get(&addr) else {
            return Ok(());
        };
        let mut page = entry.page.write();
        let Some(tid) = page.is_dirty() else {
            return Ok(());
        };

        let before = page.before_image()?;
        self.log.log_write(tid, &before, &page)?;
        self.log.force()?;
        failpoint::maybe_fail(failpoint::FLUSH_AFTER_FORCE)?;
        self.catalog.table(addr.table_id)?.write_page(&page)?;

        page.mark_dirty(None);
        page.set_before_image();
        log::debug!("flushed page {} dirtied by tx {}", addr, tid);
        Ok(())
    }

    /// Writes every page dirtied by `tid`.
    pub fn flush_pages(&self, tid: TransactionId) -> DbResult<()> {
        let cache = self.cache.lock();
        for addr in cache.dirtied_by(tid) {
            self.flush_locked(&cache, addr)?;
        }
        Ok(())
    }

    /// Writes every dirty page, whoever dirtied it. Meant for shutdown and
    /// checkpoints: calling it while transactions are running writes
    /// uncommitted data.
    pub fn flush_all_pages(&self) -> DbResult<()> {
        let cache = self.cache.lock();
        let addrs: Vec<PageAddress> = cache.pages.keys().copied().collect();
        for addr in addrs {
            self.flush_locked(&cache, addr)?;
        }
        Ok(())
    }

    /// Drops a page from the cache without writing it.
    pub fn discard_page(&self, addr: PageAddress) {
        if self.cache.lock().pages.remove(&addr).is_some() {
            log::debug!("discarded page {}", addr);
        }
    }

    /// Commits `tid`.
    pub fn transaction_complete(&self, tid: TransactionId) -> DbResult<()> {
        self.complete(tid, true)
    }

    /// Ends `tid`: on commit its dirty pages are flushed, on abort they are
    /// reloaded from disk. Then every lock it holds is released.
    pub fn complete(&self, tid: TransactionId, commit: bool) -> DbResult<()> {
        {
            let cache = self.cache.lock();
            let dirtied = cache.dirtied_by(tid);
            for addr in dirtied {
                if commit {
                    self.flush_locked(&cache, addr)?;
                } else {
                    self.restore_locked(&cache, addr)?;
                }
            }
        }
        let released = self.locks.release_all(tid);
        log::debug!(
            "tx {} {} and released {} locks",
            tid,
            if commit { "committed" } else { "aborted" },
            released.len()
        );
        Ok(())
    }

    /// Replaces the cached contents of `addr` with the copy on disk.
    fn restore_locked(&self, cache: &PageCache, addr: PageAddress) -> DbResult<()> {
        let Some(entry) = cache.pages.get(&addr) else {
            return Ok(());
        };
        let fresh = self.catalog.table(addr.table_id)?.read_page(addr)?;
        *entry.page.write() = fresh;
        log::debug!("restored page {} from disk", addr);
        Ok(())
    }

    pub fn num_cached_pages(&self) -> usize {
        self.cache.lock().pages.len()
    }

    pub fn is_cached(&self, addr: PageAddress) -> bool {
        self.cache.lock().pages.contains_key(&addr)
    }

    /// Cached page addresses in load order.
    pub fn cached_pages(&self) -> Vec<PageAddress> {
        let cache = self.cache.lock();
        let mut entries: Vec<(u64, PageAddress)> =
            cache.pages.iter().map(|(addr, e)| (e.age, *addr)).collect();
        entries.sort();
        entries.into_iter().map(|(_, addr)| addr).collect()
    }
}
