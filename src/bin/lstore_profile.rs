use rand::prelude::*;

use lstore::Database;

/// Randomized single-threaded workload against one table, useful for
/// profiling the storage path. Run with `RUST_LOG=info` for progress output.
fn main() {
    env_logger::init();

    let root = std::env::temp_dir().join("lstore_profile");
    let _ = std::fs::remove_dir_all(&root);

    let db = Database::open(&root).expect("failed to open database");
    let table = db.create_table("prof_tbl", 8, 0).expect("failed to create table");

    let mut rng = rand::thread_rng();
    let mut keys: Vec<i64> = Vec::new();

    for i in 0..250_000u32 {
        match rng.gen_range(0..4) {
            0 => {
                let key = rng.gen_range(0..1_000_000);
                let mut row: Vec<i64> = (0..8).map(|_| rng.gen_range(1..=100)).collect();
                row[0] = key;

                if table.insert(&row).is_ok() {
                    keys.push(key);
                }
            }

            1 => {
                if let Some(key) = keys.choose(&mut rng) {
                    let updates: Vec<Option<i64>> = (0..8)
                        .map(|column| {
                            if column > 0 && rng.gen_bool(0.5) {
                                Some(rng.gen_range(1..=100))
                            } else {
                                None
                            }
                        })
                        .collect();
                    let _ = table.update(*key, &updates);
                }
            }

            2 => {
                if let Some(key) = keys.choose(&mut rng) {
                    let projection = vec![1; 8];
                    let _ = table.select(*key, 0, &projection);
                }
            }

            3 => {
                let lo = rng.gen_range(0..1_000_000);
                let _ = table.sum(lo, lo + 1000, rng.gen_range(0..8));
            }

            _ => unreachable!(),
        }

        if i % 10_000 == 0 {
            log::info!("{i}/250k operations");
        }
    }

    db.close().expect("failed to close database");
}
