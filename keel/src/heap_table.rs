//! A table stored as a flat file of fixed-size heap pages.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crc32fast::Hasher;
use parking_lot::Mutex;

use crate::buffer_pool::{BufferPool, PageRef, Permissions};
use crate::error::{DbError, DbResult};
use crate::failpoint;
use crate::page::{empty_page_data, HeapPage};
use crate::page_id::PageAddress;
use crate::transaction::TransactionId;
use crate::tuple::{Schema, Tuple};

/// Derives a table id from the canonical path of its file, so the same file
/// keeps its id across runs.
pub fn table_id_for(path: &Path) -> DbResult<u32> {
    let canonical = path.canonicalize()?;
    let mut hasher = Hasher::new();
    hasher.update(canonical.as_os_str().as_encoded_bytes());
    Ok(hasher.finalize())
}

pub struct HeapTable {
    id: u32,
    path: PathBuf,
    file: Mutex<File>,
    schema: Arc<Schema>,
    page_size: usize,
}

impl HeapTable {
    /// Opens the table file, creating it and its parent directories if they
    /// don't exist.
    pub fn open<P: AsRef<Path>>(path: P, schema: Arc<Schema>, page_size: usize) -> DbResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let id = table_id_for(path)?;
        log::debug!("opened table {} at {:?} with schema {}", id, path, schema);
        Ok(Self {
            id,
            path: path.to_path_buf(),
            file: Mutex::new(file),
            schema,
            page_size,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of whole pages in the file, recomputed from its length.
    pub fn num_pages(&self) -> DbResult<u32> {
        let file = self.file.lock();
        self.pages_in(&file)
    }

    fn pages_in(&self, file: &File) -> DbResult<u32> {
        Ok((file.metadata()?.len() / self.page_size as u64) as u32)
    }

    /// Reads one page straight from the file, bypassing the buffer pool.
    pub fn read_page(&self, addr: PageAddress) -> DbResult<HeapPage> {
        if addr.table_id != self.id {
            return Err(DbError::UnknownTable(addr.table_id));
        }
        let mut data = vec![0u8; self.page_size];
        {
            let mut file = self.file.lock();
            let page_count = self.pages_in(&file)?;
            if addr.page_number >= page_count {
                return Err(DbError::PageOutOfRange {
                    page: addr,
                    page_count,
                });
            }
            file.seek(SeekFrom::Start(self.offset_of(addr.page_number)))?;
            file.read_exact(&mut data)?;
        }
        HeapPage::parse(addr, Arc::clone(&self.schema), &data)
    }

    /// Writes a page at its offset. The page may sit at most one page past
    /// the current end of the file.
    pub fn write_page(&self, page: &HeapPage) -> DbResult<()> {
        let addr = page.id();
        let data = page.page_data();
        if data.len() != self.page_size {
            return Err(DbError::malformed(
                addr,
                format!("{}-byte page written to a table of {}-byte pages", data.len(), self.page_size),
            ));
        }
        let mut file = self.file.lock();
        let page_count = self.pages_in(&file)?;
        if addr.table_id != self.id || addr.page_number > page_count {
            return Err(DbError::PageOutOfRange {
                page: addr,
                page_count,
            });
        }
        self.write_at(&mut file, addr.page_number, &data)
    }

    /// Appends an all-zero page and returns its address. The file lock is
    /// held across the length check and the write, so concurrent allocators
    /// get distinct page numbers.
    fn append_empty_page(&self) -> DbResult<PageAddress> {
        let mut file = self.file.lock();
        let page_number = self.pages_in(&file)?;
        self.write_at(&mut file, page_number, &empty_page_data(self.page_size))?;
        log::debug!("table {} grew to {} pages", self.id, page_number + 1);
        Ok(PageAddress::new(self.id, page_number))
    }

    fn write_at(&self, file: &mut File, page_number: u32, data: &[u8]) -> DbResult<()> {
        failpoint::maybe_fail(failpoint::HEAP_WRITE_PAGE)?;
        file.seek(SeekFrom::Start(self.offset_of(page_number)))?;
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }

    fn offset_of(&self, page_number: u32) -> u64 {
        page_number as u64 * self.page_size as u64
    }

    /// Inserts `tuple` into the first page with a free slot, appending a new
    /// page when every existing page is full. Returns the page it mutated.
    pub fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> DbResult<Vec<PageRef>> {
        if !tuple.schema().is_compatible(&self.schema) {
            return Err(DbError::SchemaMismatch(self.id));
        }

        for page_number in 0..self.num_pages()? {
            let addr = PageAddress::new(self.id, page_number);
            let already_held = pool.holds_lock(tid, addr);
            let page = pool.get_page(tid, addr, Permissions::ReadWrite)?;
            if page.read().num_empty_slots() > 0 {
                page.write().insert_tuple(tuple)?;
                return Ok(vec![page]);
            }
            if !already_held {
                pool.release_page(tid, addr);
            }
        }

        let addr = self.append_empty_page()?;
        let page = pool.get_page(tid, addr, Permissions::ReadWrite)?;
        page.write().insert_tuple(tuple)?;
        Ok(vec![page])
    }

    /// Deletes `tuple` from the page its record address names.
    pub fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> DbResult<Vec<PageRef>> {
        let rid = tuple.record_address().ok_or(DbError::MissingRecordAddress)?;
        if rid.page.table_id != self.id {
            return Err(DbError::TupleNotOnPage(rid.page));
        }
        let page = pool.get_page(tid, rid.page, Permissions::ReadWrite)?;
        page.write().delete_tuple(tuple)?;
        Ok(vec![page])
    }

    /// A cursor over every stored tuple, page by page, read through `pool`.
    pub fn scan<'a>(&'a self, pool: &'a BufferPool, tid: TransactionId) -> HeapScan<'a> {
        HeapScan {
            table: self,
            pool,
            tid,
            next_page: 0,
            current: Vec::new().into_iter(),
            open: true,
        }
    }
}

/// Lazy cursor over a heap table. Pages are fetched through the buffer pool
/// with read permission as the cursor reaches them.
pub struct HeapScan<'a> {
    table: &'a HeapTable,
    pool: &'a BufferPool,
    tid: TransactionId,
    next_page: u32,
    current: std::vec::IntoIter<Tuple>,
    open: bool,
}

impl HeapScan<'_> {
    /// Stops the cursor; it yields nothing until rewound.
    pub fn close(&mut self) {
        self.open = false;
        self.current = Vec::new().into_iter();
    }

    /// Restarts the cursor from the first page.
    pub fn rewind(&mut self) {
        self.close();
        self.next_page = 0;
        self.open = true;
    }
}

impl Iterator for HeapScan<'_> {
    type Item = DbResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.open {
            if let Some(tuple) = self.current.next() {
                return Some(Ok(tuple));
            }
            let loaded = self.table.num_pages().and_then(|page_count| {
                if self.next_page >= page_count {
                    return Ok(None);
                }
                let addr = PageAddress::new(self.table.id, self.next_page);
                let page = self.pool.get_page(self.tid, addr, Permissions::ReadOnly)?;
                let tuples: Vec<Tuple> = page.read().iter().cloned().collect();
                Ok(Some(tuples))
            });
            match loaded {
                Ok(Some(tuples)) => {
                    self.next_page += 1;
                    self.current = tuples.into_iter();
                }
                Ok(None) => self.close(),
                Err(e) => {
                    self.close();
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
