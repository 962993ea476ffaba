use lstore::table::Record;
use lstore::Database;

use tempfile::tempdir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const FULL: [usize; 3] = [1, 1, 1];

#[test]
fn close_reopen_round_trip() {
    init_logging();
    let dir = tempdir().unwrap();

    let before: Vec<Record>;
    {
        let db = Database::open(dir.path()).unwrap();
        let table = db.create_table("scores", 3, 0).unwrap();

        for key in 0..50 {
            table.insert(&[key, key * 10, 0]).unwrap();
        }
        for key in 0..10 {
            table.update(key, &[None, None, Some(key + 1)]).unwrap();
        }
        table.delete(49).unwrap();

        before = (0..50)
            .flat_map(|key| table.select(key, 0, &FULL).unwrap())
            .collect();
        db.close().unwrap();
    }

    let db = Database::open(dir.path()).unwrap();
    let table = db.get_table("scores").unwrap();

    let after: Vec<Record> = (0..50)
        .flat_map(|key| table.select(key, 0, &FULL).unwrap())
        .collect();
    assert_eq!(before, after);

    // Version history survives too.
    let original = table.select_version(3, 0, &FULL, -1).unwrap();
    assert_eq!(original[0].columns, vec![3, 30, 0]);

    // The deleted record stays deleted.
    assert!(table.select(49, 0, &FULL).unwrap().is_empty());
}

#[test]
fn tiny_pool_evicts_dirty_frames_and_survives() {
    init_logging();
    let dir = tempdir().unwrap();

    {
        // Two frames for three base pages plus a tail page guarantees dirty
        // evictions along the way.
        let db = Database::open_with_capacity(dir.path(), 2).unwrap();
        let table = db.create_table("t", 2, 0).unwrap();

        for key in 0..1100 {
            table.insert(&[key, key + 7]).unwrap();
        }
        for key in 0..20 {
            table.update(key, &[None, Some(key - 7)]).unwrap();
        }

        db.close().unwrap();
    }

    let db = Database::open_with_capacity(dir.path(), 2).unwrap();
    let table = db.get_table("t").unwrap();

    for key in [0, 5, 19, 20, 511, 512, 1023, 1024, 1099] {
        let records = table.select(key, 0, &[1, 1]).unwrap();
        assert_eq!(records.len(), 1, "key {key}");
        let expected = if key < 20 { key - 7 } else { key + 7 };
        assert_eq!(records[0].columns, vec![key, expected]);
    }
}

#[test]
fn reopened_database_keeps_allocating() {
    init_logging();
    let dir = tempdir().unwrap();

    {
        let db = Database::open(dir.path()).unwrap();
        let table = db.create_table("t", 2, 0).unwrap();
        for key in 0..600 {
            table.insert(&[key, 0]).unwrap();
        }
        db.close().unwrap();
    }

    {
        let db = Database::open(dir.path()).unwrap();
        let table = db.get_table("t").unwrap();

        // The allocation cursors picked up where the first session stopped.
        for key in 600..700 {
            table.insert(&[key, 1]).unwrap();
        }
        table.update(650, &[None, Some(9)]).unwrap();
        db.close().unwrap();
    }

    let db = Database::open(dir.path()).unwrap();
    let table = db.get_table("t").unwrap();
    assert_eq!(table.select(599, 0, &[1, 1]).unwrap()[0].columns, vec![599, 0]);
    assert_eq!(table.select(650, 0, &[1, 1]).unwrap()[0].columns, vec![650, 9]);
    assert_eq!(table.sum(600, 699, 1).unwrap(), 99 + 9);
}

#[test]
fn on_disk_layout_matches_the_contract() {
    init_logging();
    let dir = tempdir().unwrap();

    let db = Database::open(dir.path()).unwrap();
    let table = db.create_table("layout", 4, 1).unwrap();
    table.insert(&[9, 1, 0, 0]).unwrap();
    table.update(1, &[Some(10), None, None, None]).unwrap();
    db.close().unwrap();

    let table_dir = dir.path().join("tables").join("layout");
    let metadata = std::fs::read(table_dir.join("metadata.bin")).unwrap();
    assert_eq!(metadata.len(), 20);

    // key_col = 1, num_columns = 4, little endian.
    assert_eq!(i32::from_le_bytes(metadata[0..4].try_into().unwrap()), 1);
    assert_eq!(i32::from_le_bytes(metadata[4..8].try_into().unwrap()), 4);

    assert!(table_dir.join("indices.bin").exists());
    assert!(table_dir.join("page_directory.bin").exists());
    assert!(table_dir.join("pagerange0").join("base0.bin").exists());
    assert!(table_dir.join("pagerange0").join("tail0.bin").exists());
}
