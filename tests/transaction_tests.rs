use std::sync::Arc;

use lstore::lock_manager::{LockKey, LOCK_MANAGER};
use lstore::table::Table;
use lstore::{Database, Transaction, TransactionWorker};

use tempfile::{tempdir, TempDir};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn grades_table() -> (TempDir, Database, Arc<Table>) {
    init_logging();
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let table = db.create_table("grades", 5, 0).unwrap();
    (dir, db, table)
}

const FULL: [usize; 5] = [1, 1, 1, 1, 1];

#[test]
fn transaction_commits_its_queries() {
    let (_dir, _db, table) = grades_table();

    let mut txn = Transaction::new();
    txn.add_insert(table.clone(), vec![1, 10, 20, 30, 40]);
    txn.add_update(table.clone(), 1, vec![None, Some(99), None, None, None]);
    txn.add_select(table.clone(), 1, 0, FULL.to_vec());
    txn.add_increment(table.clone(), 1, 2);
    assert!(txn.run());

    let records = table.select(1, 0, &FULL).unwrap();
    assert_eq!(records[0].columns, vec![1, 99, 21, 30, 40]);

    // All locks were released at commit.
    let rid = records[0].rid;
    assert!(LOCK_MANAGER.acquire_exclusive(LockKey::new(table.table_id(), rid), 999_000));
    LOCK_MANAGER.release_all(999_000);
}

#[test]
fn failed_query_aborts_and_rolls_back_insert() {
    let (_dir, _db, table) = grades_table();

    let mut txn = Transaction::new();
    txn.add_insert(table.clone(), vec![1, 10, 20, 30, 40]);
    // Updating a key that does not exist fails and forces an abort.
    txn.add_update(table.clone(), 42, vec![None, Some(1), None, None, None]);
    assert!(!txn.run());

    assert!(table.select(1, 0, &FULL).unwrap().is_empty());
    assert_eq!(table.sum(0, 100, 1).unwrap(), 0);

    // The rolled back insert left no index residue behind.
    table.insert(&[1, 2, 3, 4, 5]).unwrap();
    assert_eq!(table.select(1, 0, &FULL).unwrap().len(), 1);
}

#[test]
fn abort_rolls_back_update_and_delete() {
    let (_dir, _db, table) = grades_table();

    table.insert(&[1, 10, 20, 30, 40]).unwrap();
    table.insert(&[2, 11, 21, 31, 41]).unwrap();

    let mut txn = Transaction::new();
    txn.add_update(table.clone(), 1, vec![None, Some(99), None, None, None]);
    txn.add_delete(table.clone(), 2);
    txn.add_delete(table.clone(), 7);
    assert!(!txn.run());

    // Both records read exactly as before the transaction.
    assert_eq!(table.select(1, 0, &FULL).unwrap()[0].columns, vec![1, 10, 20, 30, 40]);
    assert_eq!(table.select(2, 0, &FULL).unwrap()[0].columns, vec![2, 11, 21, 31, 41]);
    assert_eq!(table.sum(1, 2, 1).unwrap(), 21);

    // A later update builds on the restored state.
    table.update(1, &[None, None, Some(5), None, None]).unwrap();
    assert_eq!(table.select(1, 0, &FULL).unwrap()[0].columns, vec![1, 10, 5, 30, 40]);
    assert_eq!(table.select_version(1, 0, &FULL, -1).unwrap()[0].columns, vec![1, 10, 20, 30, 40]);
}

#[test]
fn conflicting_writer_aborts() {
    let (_dir, _db, table) = grades_table();

    table.insert(&[1, 10, 20, 30, 40]).unwrap();
    let rid = table.select(1, 0, &FULL).unwrap()[0].rid;
    let key = LockKey::new(table.table_id(), rid);

    // Another transaction holds the record exclusively.
    let holder = 999_001;
    assert!(LOCK_MANAGER.acquire_exclusive(key, holder));

    let mut txn = Transaction::new();
    txn.add_update(table.clone(), 1, vec![None, Some(99), None, None, None]);
    assert!(!txn.run());

    // The blocked update left no trace.
    assert_eq!(table.select(1, 0, &FULL).unwrap()[0].columns, vec![1, 10, 20, 30, 40]);

    LOCK_MANAGER.release_all(holder);

    // With the lock gone the same transaction shape commits.
    let mut retry = Transaction::new();
    retry.add_update(table.clone(), 1, vec![None, Some(99), None, None, None]);
    assert!(retry.run());
    assert_eq!(table.select(1, 0, &FULL).unwrap()[0].columns, vec![1, 99, 20, 30, 40]);
}

#[test]
fn conflicting_reader_aborts() {
    let (_dir, _db, table) = grades_table();

    table.insert(&[1, 10, 20, 30, 40]).unwrap();
    let rid = table.select(1, 0, &FULL).unwrap()[0].rid;
    let key = LockKey::new(table.table_id(), rid);

    let holder = 999_002;
    assert!(LOCK_MANAGER.acquire_exclusive(key, holder));

    let mut txn = Transaction::new();
    txn.add_select(table.clone(), 1, 0, FULL.to_vec());
    assert!(!txn.run());

    LOCK_MANAGER.release_all(holder);
}

#[test]
fn workers_on_disjoint_keys_all_commit() {
    let (_dir, _db, table) = grades_table();

    let make_worker = |offset: i64| {
        let worker = TransactionWorker::new();
        for i in 0..20 {
            let key = offset + i;
            let mut txn = Transaction::new();
            txn.add_insert(table.clone(), vec![key, key, 0, 0, 0]);
            txn.add_update(table.clone(), key, vec![None, None, Some(key), None, None]);
            worker.add_transaction(txn);
        }
        worker
    };

    let w1 = make_worker(0);
    let w2 = make_worker(1000);
    w1.run();
    w2.run();

    assert_eq!(w1.join(), 20);
    assert_eq!(w2.join(), 20);
    assert!(w1.stats().iter().all(|ok| *ok));

    assert_eq!(table.sum(0, 19, 1).unwrap(), (0..20).sum::<i64>());
    assert_eq!(table.sum(1000, 1019, 2).unwrap(), (1000..1020).sum::<i64>());
}

#[test]
fn contending_writers_never_both_win_a_record() {
    let (_dir, _db, table) = grades_table();

    table.insert(&[1, 0, 0, 0, 0]).unwrap();

    // Two workers hammer the same record. No-wait locking means any overlap
    // aborts one side, and a transaction that commits applied all of its
    // updates, so the record always lands in a consistent state.
    let make_worker = |value: i64| {
        let worker = TransactionWorker::new();
        let mut txn = Transaction::new();
        for _ in 0..25 {
            txn.add_update(table.clone(), 1, vec![None, Some(value), None, None, None]);
            txn.add_increment(table.clone(), 1, 2);
        }
        worker.add_transaction(txn);
        worker
    };

    let w1 = make_worker(111);
    let w2 = make_worker(222);
    w1.run();
    w2.run();
    let committed = w1.join() + w2.join();

    assert!(committed >= 1 && committed <= 2);

    let record = &table.select(1, 0, &FULL).unwrap()[0];
    // Column 1 carries the winner's value; column 2 counts 25 increments per
    // committed transaction.
    assert!(record.columns[1] == 111 || record.columns[1] == 222);
    assert_eq!(record.columns[2] as usize, committed * 25);
}
