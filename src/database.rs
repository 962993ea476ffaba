use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::info;

use crate::bufferpool::BufferPool;
use crate::constants::BP_NUM_FRAMES;
use crate::errors::DatabaseError;
use crate::table::Table;

/// Owns a root directory, the buffer pool shared by its tables, and the
/// tables themselves. There is no write-ahead log: durability comes from
/// flushing on eviction and on `close`.
pub struct Database {
    root: PathBuf,
    pool: Arc<BufferPool>,
    tables: Mutex<HashMap<String, Arc<Table>>>,
}

impl Database {
    /// Open a database rooted at `path` with the default buffer pool size,
    /// loading every table found under `path/tables/`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Database, DatabaseError> {
        Database::open_with_capacity(path, BP_NUM_FRAMES)
    }

    /// Open a database with an explicit buffer pool frame count.
    pub fn open_with_capacity(
        path: impl Into<PathBuf>,
        frames: usize,
    ) -> Result<Database, DatabaseError> {
        let root = path.into();
        let tables_dir = root.join("tables");
        fs::create_dir_all(&tables_dir)?;

        let pool = Arc::new(BufferPool::new(&root, frames));
        let mut tables = HashMap::new();

        for entry in fs::read_dir(&tables_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let table = Table::load(pool.clone(), &name)?;
            tables.insert(name, table);
        }

        info!("opened database at {} with {} tables", root.display(), tables.len());

        Ok(Database { root, pool, tables: Mutex::new(tables) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Flush every table's metadata, page directory, and index array, stop
    /// the merge workers, and write all dirty frames back to disk.
    pub fn close(&self) -> Result<(), DatabaseError> {
        let tables = self.tables.lock().unwrap();

        for table in tables.values() {
            table.shutdown();
            table.persist()?;
        }
        self.pool.flush_all()?;

        info!("closed database at {}", self.root.display());
        Ok(())
    }

    /// Create a new table. Fails if the name is already taken.
    pub fn create_table(
        &self,
        name: &str,
        num_columns: usize,
        key_column: usize,
    ) -> Result<Arc<Table>, DatabaseError> {
        let mut tables = self.tables.lock().unwrap();
        if tables.contains_key(name) {
            return Err(DatabaseError::Argument(format!("table {name} already exists")));
        }

        let table = Table::create(self.pool.clone(), name, num_columns, key_column)?;
        tables.insert(name.to_string(), table.clone());
        Ok(table)
    }

    /// Drop a table: stop its merge worker, discard its frames, and remove
    /// its directory.
    pub fn drop_table(&self, name: &str) -> Result<(), DatabaseError> {
        let table = self
            .tables
            .lock()
            .unwrap()
            .remove(name)
            .ok_or(DatabaseError::NotFound)?;

        table.shutdown();
        self.pool.discard_table(table.table_id());

        let dir = self.root.join("tables").join(name);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }

        Ok(())
    }

    /// Get a table that already exists by name.
    pub fn get_table(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.lock().unwrap().get(name).cloned()
    }
}
