//! Inspection tooling over a catalog of heap tables.

use std::path::Path;

use keel::{BufferPoolConfig, Database, DbResult};

/// What a scan found in one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub name: String,
    pub table_id: u32,
    pub pages: u32,
    pub tuples: usize,
}

/// Loads every table named in `catalog_path` and counts its tuples by
/// scanning through the buffer pool in one read-only transaction.
pub fn inspect(
    catalog_path: &Path,
    wal_path: &Path,
    config: BufferPoolConfig,
) -> DbResult<Vec<TableSummary>> {
    let db = Database::open(wal_path, config)?;
    let catalog = db.catalog();
    catalog.load_schema(catalog_path)?;

    let tx = db.begin();
    let mut summaries = Vec::new();
    for table_id in catalog.table_ids() {
        let table = catalog.table(table_id)?;
        let mut tuples = 0;
        for tuple in tx.scan(&table) {
            tuple?;
            tuples += 1;
        }
        summaries.push(TableSummary {
            name: catalog.table_name(table_id)?,
            table_id,
            pages: table.num_pages()?,
            tuples,
        });
    }
    tx.commit()?;
    Ok(summaries)
}
