#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use keel::{BufferPoolConfig, Database, Field, FieldType, HeapTable, Schema, Transaction, Tuple};
use tempfile::{tempdir, TempDir};

/// A database in a temporary directory with one two-int-column table.
/// The directory is removed when this is dropped.
pub struct TestDb {
    pub db: Database,
    pub table: Arc<HeapTable>,
    pub dir: TempDir,
}

impl TestDb {
    pub fn table_id(&self) -> u32 {
        self.table.id()
    }

    pub fn row(&self, a: i32, b: i32) -> Tuple {
        Tuple::new(self.table.schema().clone(), vec![Field::Int(a), Field::Int(b)]).unwrap()
    }

    /// First column of every tuple visible to `tx`, in scan order.
    pub fn keys(&self, tx: &Transaction) -> Vec<i32> {
        tx.scan(&self.table)
            .map(|t| match t.unwrap().field(0) {
                Some(Field::Int(v)) => *v,
                other => panic!("unexpected field {other:?}"),
            })
            .collect()
    }

    /// Reopens the same files in a fresh database, as after a restart.
    pub fn reopen(&self, config: BufferPoolConfig) -> (Database, Arc<HeapTable>) {
        let db = Database::open(self.dir.path().join("test.wal"), config).unwrap();
        let table = db
            .catalog()
            .open_table(self.table.path(), "t", self.table.schema().as_ref().clone(), None)
            .unwrap();
        (db, table)
    }
}

pub fn fast_config(capacity: usize) -> BufferPoolConfig {
    BufferPoolConfig::default()
        .with_capacity(capacity)
        .with_lock_timeout(Duration::from_millis(200), Duration::from_millis(100))
}

pub fn setup_db(test_name: &str, config: BufferPoolConfig) -> TestDb {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("test.wal"), config).unwrap();
    let schema = Schema::from_types(&[FieldType::Int, FieldType::Int]);
    let table = db
        .catalog()
        .open_table(dir.path().join(format!("{test_name}.dat")), "t", schema, None)
        .unwrap();
    TestDb { db, table, dir }
}

/// Rows per page for the two-int schema at the default page size.
pub fn slots_per_page() -> usize {
    keel::page::num_slots_for(keel::DEFAULT_PAGE_SIZE, 8)
}
