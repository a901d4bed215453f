use keel::{DbError, FieldType, PageAddress, Permissions, Schema};
use serial_test::serial;
use std::collections::HashSet;
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

mod common;

#[test]
#[serial]
fn test_writer_times_out_behind_reader() {
    let t = common::setup_db("reader_writer", common::fast_config(10));
    let tx = t.db.begin();
    let mut row = t.row(1, 100);
    tx.insert_tuple(t.table_id(), &mut row).unwrap();
    tx.commit().unwrap();

    let page = PageAddress::new(t.table_id(), 0);
    let reader = t.db.begin();
    reader.get_page(page, Permissions::ReadOnly).unwrap();

    let writer = t.db.begin();
    let start = Instant::now();
    let result = thread::scope(|s| {
        s.spawn(|| writer.get_page(page, Permissions::ReadWrite).map(|_| ()))
            .join()
            .unwrap()
    });
    let waited = start.elapsed();
    match result {
        Err(DbError::TransactionAborted { tid, page: p }) => {
            assert_eq!(tid, writer.id());
            assert_eq!(p, page);
        }
        other => panic!("expected the writer to be aborted, got {other:?}"),
    }
    assert!(waited >= Duration::from_millis(200), "gave up after {waited:?}");
    writer.abort().unwrap();

    // The reader keeps its lock and can still read.
    let locks = t.db.buffer_pool().lock_table();
    assert!(locks.holds(page, reader.id()));
    assert_eq!(t.keys(&reader), vec![1]);
    reader.commit().unwrap();
    assert!(locks.is_empty());
}

#[test]
#[serial]
fn test_readers_share_a_page() {
    let t = common::setup_db("shared_readers", common::fast_config(10));
    let tx = t.db.begin();
    let mut row = t.row(1, 1);
    tx.insert_tuple(t.table_id(), &mut row).unwrap();
    tx.commit().unwrap();

    let page = PageAddress::new(t.table_id(), 0);
    let readers: Vec<_> = (0..3).map(|_| t.db.begin()).collect();
    thread::scope(|s| {
        for reader in &readers {
            s.spawn(move || {
                reader.get_page(page, Permissions::ReadOnly).unwrap();
            });
        }
    });
    assert_eq!(t.db.buffer_pool().lock_table().holders(page).len(), 3);
    for reader in readers {
        reader.commit().unwrap();
    }
}

#[test]
#[serial]
fn test_writer_proceeds_once_holder_commits() {
    let t = common::setup_db("handoff", common::fast_config(10));
    let tx = t.db.begin();
    let mut row = t.row(1, 1);
    tx.insert_tuple(t.table_id(), &mut row).unwrap();
    tx.commit().unwrap();

    let page = PageAddress::new(t.table_id(), 0);
    let holder = t.db.begin();
    holder.get_page(page, Permissions::ReadWrite).unwrap();
    let waiter = t.db.begin();

    thread::scope(|s| {
        let handle = s.spawn(|| waiter.get_page(page, Permissions::ReadWrite).map(|_| ()));
        thread::sleep(Duration::from_millis(50));
        holder.commit().unwrap();
        handle.join().unwrap().unwrap();
    });
    assert_eq!(
        t.db.buffer_pool().lock_table().holders(page),
        vec![(waiter.id(), keel::LockMode::Exclusive)]
    );
    waiter.commit().unwrap();
}

#[test]
#[serial]
fn test_crossed_writers_break_the_deadlock() {
    let t = common::setup_db("deadlock_a", common::fast_config(10));
    let other = t
        .db
        .catalog()
        .open_table(
            t.dir.path().join("deadlock_b.dat"),
            "u",
            Schema::from_types(&[FieldType::Int, FieldType::Int]),
            None,
        )
        .unwrap();

    let setup = t.db.begin();
    let mut a = t.row(1, 1);
    setup.insert_tuple(t.table_id(), &mut a).unwrap();
    let mut b = t.row(2, 2);
    setup.insert_tuple(other.id(), &mut b).unwrap();
    setup.commit().unwrap();

    let p0 = PageAddress::new(t.table_id(), 0);
    let p1 = PageAddress::new(other.id(), 0);
    let barrier = Barrier::new(2);

    let outcomes: Vec<bool> = thread::scope(|s| {
        let run = |first: PageAddress, second: PageAddress| {
            let tx = t.db.begin();
            tx.get_page(first, Permissions::ReadWrite).unwrap();
            barrier.wait();
            match tx.get_page(second, Permissions::ReadWrite) {
                Ok(_) => {
                    tx.commit().unwrap();
                    true
                }
                Err(e) => {
                    assert!(e.is_transaction_aborted());
                    tx.abort().unwrap();
                    false
                }
            }
        };
        let h1 = s.spawn(move || run(p0, p1));
        let h2 = s.spawn(move || run(p1, p0));
        vec![h1.join().unwrap(), h2.join().unwrap()]
    });

    assert!(outcomes.contains(&false), "someone must time out");
    assert!(t.db.buffer_pool().lock_table().is_empty());
}

#[test]
#[serial]
fn test_concurrent_inserts_with_retry() {
    let t = common::setup_db("concurrent_inserts", common::fast_config(20));
    let threads = 4;
    let per_thread = 10;

    // Seed page 0 so every writer contends for it instead of appending.
    let seed = t.db.begin();
    let mut row = t.row(-1, -1);
    seed.insert_tuple(t.table_id(), &mut row).unwrap();
    seed.commit().unwrap();

    thread::scope(|s| {
        for n in 0..threads {
            let t = &t;
            s.spawn(move || {
                for i in 0..per_thread {
                    let key = n * 1000 + i;
                    loop {
                        let tx = t.db.begin();
                        let mut row = t.row(key, n);
                        match tx.insert_tuple(t.table_id(), &mut row) {
                            Ok(()) => {
                                tx.commit().unwrap();
                                break;
                            }
                            Err(e) if e.is_transaction_aborted() => {
                                tx.abort().unwrap();
                            }
                            Err(e) => panic!("insert failed: {e}"),
                        }
                    }
                }
            });
        }
    });

    let tx = t.db.begin();
    let keys = t.keys(&tx);
    tx.commit().unwrap();
    assert_eq!(keys.len(), (threads * per_thread) as usize + 1);
    let unique: HashSet<_> = keys.iter().collect();
    assert_eq!(unique.len(), keys.len());
    assert_eq!(t.table.num_pages().unwrap(), 1);
}
