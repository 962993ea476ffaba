use lstore::bufferpool::{BufferPool, PageKey};
use lstore::errors::DatabaseError;
use lstore::helpers::now_millis;
use lstore::rid::RID;

use tempfile::tempdir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Insert one row into the base page behind `key`.
fn write_row(pool: &BufferPool, key: PageKey, rid: RID, values: &[i64]) {
    let handle = pool.pin(key).unwrap();
    handle
        .with_page_mut(|page| {
            page.as_base_mut()
                .and_then(|base| base.insert(rid, now_millis(), 0, rid, values))
        })
        .unwrap();
    handle.mark_dirty();
}

fn read_row(pool: &BufferPool, key: PageKey, slot: usize) -> Vec<i64> {
    let handle = pool.pin(key).unwrap();
    handle
        .with_page(|page| page.as_base().and_then(|base| base.read_row(slot)))
        .unwrap()
}

#[test]
fn pin_write_read_back() {
    init_logging();
    let dir = tempdir().unwrap();
    let pool = BufferPool::new(dir.path(), 4);
    let table = pool.register_table("t", 2);

    let key = PageKey::base(table, 0, 0);
    write_row(&pool, key, RID::base(0, 0, 0), &[42, 7]);

    assert_eq!(read_row(&pool, key, 0), vec![42, 7]);
}

#[test]
fn lru_evicts_least_recently_used() {
    init_logging();
    let dir = tempdir().unwrap();
    let pool = BufferPool::new(dir.path(), 2);
    let table = pool.register_table("t", 1);

    let p0 = PageKey::base(table, 0, 0);
    let p1 = PageKey::base(table, 0, 1);
    let p2 = PageKey::base(table, 0, 2);

    drop(pool.pin(p0).unwrap());
    drop(pool.pin(p1).unwrap());

    // Touch p0 so p1 becomes the oldest.
    drop(pool.pin(p0).unwrap());

    drop(pool.pin(p2).unwrap());
    assert!(pool.resident(&p0));
    assert!(!pool.resident(&p1));
    assert!(pool.resident(&p2));
}

#[test]
fn pinned_frames_are_never_evicted() {
    init_logging();
    let dir = tempdir().unwrap();
    let pool = BufferPool::new(dir.path(), 2);
    let table = pool.register_table("t", 1);

    let h0 = pool.pin(PageKey::base(table, 0, 0)).unwrap();
    let h1 = pool.pin(PageKey::base(table, 0, 1)).unwrap();

    // Both frames pinned: nothing can be evicted.
    match pool.pin(PageKey::base(table, 0, 2)) {
        Err(DatabaseError::PoolExhausted) => {}
        Err(other) => panic!("expected PoolExhausted, got {other:?}"),
        Ok(_) => panic!("expected PoolExhausted, got a frame"),
    }

    drop(h1);
    assert!(pool.pin(PageKey::base(table, 0, 2)).is_ok());
    drop(h0);
}

#[test]
fn dirty_eviction_writes_back_and_reloads() {
    init_logging();
    let dir = tempdir().unwrap();
    let pool = BufferPool::new(dir.path(), 1);
    let table = pool.register_table("t", 2);

    let p0 = PageKey::base(table, 0, 0);
    write_row(&pool, p0, RID::base(0, 0, 0), &[1, 2]);
    write_row(&pool, p0, RID::base(0, 0, 1), &[3, 4]);

    // Pinning another page forces the dirty frame out through the disk.
    drop(pool.pin(PageKey::base(table, 0, 1)).unwrap());
    assert!(!pool.resident(&p0));

    assert_eq!(read_row(&pool, p0, 0), vec![1, 2]);
    assert_eq!(read_row(&pool, p0, 1), vec![3, 4]);
}

#[test]
fn flush_survives_a_new_pool() {
    init_logging();
    let dir = tempdir().unwrap();

    {
        let pool = BufferPool::new(dir.path(), 4);
        let table = pool.register_table("t", 3);
        write_row(&pool, PageKey::base(table, 0, 0), RID::base(0, 0, 0), &[9, 8, 7]);
        pool.flush_table(table).unwrap();
    }

    let pool = BufferPool::new(dir.path(), 4);
    let table = pool.register_table("t", 3);
    assert_eq!(read_row(&pool, PageKey::base(table, 0, 0), 0), vec![9, 8, 7]);
}

#[test]
fn explicit_flush_clears_dirty_flag() {
    init_logging();
    let dir = tempdir().unwrap();
    let pool = BufferPool::new(dir.path(), 2);
    let table = pool.register_table("t", 1);

    let key = PageKey::base(table, 0, 0);
    let handle = pool.pin(key).unwrap();
    handle
        .with_page_mut(|page| {
            page.as_base_mut().and_then(|base| {
                let rid = RID::base(0, 0, 0);
                base.insert(rid, now_millis(), 0, rid, &[5])
            })
        })
        .unwrap();
    handle.mark_dirty();
    assert!(handle.is_dirty());

    pool.flush(&handle).unwrap();
    assert!(!handle.is_dirty());

    let path = dir
        .path()
        .join("tables")
        .join("t")
        .join("pagerange0")
        .join("base0.bin");
    assert!(path.exists());
}
