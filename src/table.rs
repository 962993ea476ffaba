use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::bufferpool::{BufferPool, FrameHandle, PageKey};
use crate::constants::{BASE_PAGES_PER_RANGE, MERGE_THRESHOLD};
use crate::errors::DatabaseError;
use crate::helpers::{now_millis, schema_bitmask};
use crate::index::Index;
use crate::merge::{self, MergeHandle};
use crate::page::PageRange;
use crate::persistables::DirectoryPersistable;
use crate::rid::{Address, RID};

/// A materialized row handed back by the query surface: the base RID, the
/// primary key value, and the projected column values in column order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub rid: RID,
    pub key: i64,
    pub columns: Vec<i64>,
}

/// Everything an insert changed, kept so an aborting transaction can undo it.
#[derive(Clone, Debug)]
pub struct InsertOutcome {
    pub rid: RID,
    pub values: Vec<i64>,
}

/// Everything an update changed. `prev_indirection` and `prev_schema` are the
/// base record's fields captured before the update landed; `index_changes`
/// lists `(column, old, new)` for every index mapping that moved.
#[derive(Clone, Debug)]
pub struct UpdateOutcome {
    pub base_rid: RID,
    pub tail_rid: RID,
    pub prev_indirection: RID,
    pub prev_schema: i64,
    pub index_changes: Vec<(usize, i64, i64)>,
}

/// Everything a delete changed. `removed` lists the `(column, value)` index
/// entries that were dropped.
#[derive(Clone, Debug)]
pub struct DeleteOutcome {
    pub base_rid: RID,
    pub prev_indirection: RID,
    pub removed: Vec<(usize, i64)>,
}

/// Mutable table state guarded by one mutex: the page directory, the page
/// range bookkeeping, and the base allocation cursors.
struct TableState {
    page_directory: HashMap<RID, Address>,
    page_ranges: Vec<PageRange>,
    current_page_range: usize,
    current_base_page: usize,
    current_slot: usize,
}

/// A single table: columnar storage split into immutable base records and
/// chained tail records, with per-column indexes and a background merge
/// worker consolidating long tail chains.
pub struct Table {
    /// Name of the table.
    pub name: String,

    /// Number of user columns.
    pub num_columns: usize,

    /// Index of the primary key column.
    pub key_column: usize,

    /// Identifier assigned by the buffer pool.
    table_id: usize,

    state: Mutex<TableState>,
    index: Mutex<Index>,

    /// Buffer pool shared by all tables in the database.
    pool: Arc<BufferPool>,

    /// Background merge worker, installed right after construction.
    merge: Mutex<Option<MergeHandle>>,
}

impl Table {
    /// Create a brand new table and spawn its merge worker.
    pub fn create(
        pool: Arc<BufferPool>,
        name: &str,
        num_columns: usize,
        key_column: usize,
    ) -> Result<Arc<Table>, DatabaseError> {
        if num_columns == 0 || num_columns > 63 {
            return Err(DatabaseError::Argument(format!(
                "num_columns must be between 1 and 63, got {num_columns}"
            )));
        }
        if key_column >= num_columns {
            return Err(DatabaseError::Argument(format!(
                "key column {key_column} out of bounds for {num_columns} columns"
            )));
        }

        let table_id = pool.register_table(name, num_columns);
        fs::create_dir_all(pool.table_dir(table_id)?)?;

        let table = Arc::new(Table {
            name: name.to_string(),
            num_columns,
            key_column,
            table_id,
            state: Mutex::new(TableState {
                page_directory: HashMap::new(),
                page_ranges: vec![PageRange::new()],
                current_page_range: 0,
                current_base_page: 0,
                current_slot: 0,
            }),
            index: Mutex::new(Index::new(num_columns, key_column)),
            pool,
            merge: Mutex::new(None),
        });

        *table.merge.lock().unwrap() = Some(merge::spawn(&table));
        Ok(table)
    }

    /// Load a previously persisted table from the database directory.
    pub fn load(pool: Arc<BufferPool>, name: &str) -> Result<Arc<Table>, DatabaseError> {
        let dir = pool.root().join("tables").join(name);

        // metadata.bin holds five little-endian i32s: key column, column
        // count, and the three allocation cursors.
        let bytes = fs::read(dir.join("metadata.bin"))?;
        if bytes.len() != 20 {
            return Err(DatabaseError::Invariant(format!(
                "metadata.bin for table {name} has {} bytes, expected 20",
                bytes.len()
            )));
        }
        let ints: Vec<i32> = bytes
            .chunks_exact(4)
            .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        let key_column = ints[0] as usize;
        let num_columns = ints[1] as usize;

        let directory_bytes = fs::read(dir.join("page_directory.bin"))?;
        let directory: DirectoryPersistable = serde_json::from_slice(&directory_bytes)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        let index_bytes = fs::read(dir.join("indices.bin"))?;
        let index: Index = serde_json::from_slice(&index_bytes)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        let table_id = pool.register_table(name, num_columns);

        let table = Arc::new(Table {
            name: name.to_string(),
            num_columns,
            key_column,
            table_id,
            state: Mutex::new(TableState {
                page_directory: directory.entries.into_iter().collect(),
                page_ranges: directory.ranges,
                current_page_range: ints[2] as usize,
                current_base_page: ints[3] as usize,
                current_slot: ints[4] as usize,
            }),
            index: Mutex::new(index),
            pool,
            merge: Mutex::new(None),
        });

        *table.merge.lock().unwrap() = Some(merge::spawn(&table));
        Ok(table)
    }

    /// Identifier assigned by the buffer pool, also used to qualify lock keys.
    pub fn table_id(&self) -> usize {
        self.table_id
    }

    // ------------------------------------------------------------------
    // Query surface
    // ------------------------------------------------------------------

    /// Create a new base record. Fails on wrong arity or a duplicate primary
    /// key; returns the RID of the new record.
    pub fn insert(&self, values: &[i64]) -> Result<RID, DatabaseError> {
        Ok(self.insert_op(values)?.rid)
    }

    /// Select the newest version of every record whose latest value in
    /// `column` equals `value`.
    pub fn select(
        &self,
        value: i64,
        column: usize,
        projection: &[usize],
    ) -> Result<Vec<Record>, DatabaseError> {
        self.select_version(value, column, projection, 0)
    }

    /// Select a relative version: 0 is the newest, -k is k updates older,
    /// clamping at the base record. Positive versions are invalid.
    pub fn select_version(
        &self,
        value: i64,
        column: usize,
        projection: &[usize],
        relative_version: i64,
    ) -> Result<Vec<Record>, DatabaseError> {
        self.check_column(column)?;
        if projection.len() != self.num_columns {
            return Err(DatabaseError::Argument(format!(
                "projection has {} entries, expected {}",
                projection.len(),
                self.num_columns
            )));
        }

        let mut records = Vec::new();
        for rid in self.lookup_rids(column, value)? {
            if let Some(row) = self.read_record(rid, relative_version)? {
                records.push(Record {
                    rid,
                    key: row[self.key_column],
                    columns: project(&row, projection),
                });
            }
        }

        Ok(records)
    }

    /// Insert a tail record carrying the given updates. `None` keeps the
    /// current value. The primary key may not change.
    pub fn update(&self, key: i64, values: &[Option<i64>]) -> Result<(), DatabaseError> {
        self.update_op(key, values).map(|_| ())
    }

    /// Mark the record with this primary key deleted and drop it from every
    /// enabled index. Physical reclamation is deferred.
    pub fn delete(&self, key: i64) -> Result<(), DatabaseError> {
        self.delete_op(key).map(|_| ())
    }

    /// Sum `column` over the newest versions of all records whose primary key
    /// falls in `[start, end]`. An empty range sums to zero.
    pub fn sum(&self, start: i64, end: i64, column: usize) -> Result<i64, DatabaseError> {
        self.sum_version(start, end, column, 0)
    }

    /// Sum `column` over a relative version of all records whose primary key
    /// falls in `[start, end]`.
    pub fn sum_version(
        &self,
        start: i64,
        end: i64,
        column: usize,
        relative_version: i64,
    ) -> Result<i64, DatabaseError> {
        self.check_column(column)?;

        let rids = {
            let index = self.index.lock().unwrap();
            index.locate_range(self.key_column, start, end)
        };

        let mut total = 0;
        for rid in rids {
            if let Some(row) = self.read_record(rid, relative_version)? {
                total += row[column];
            }
        }

        Ok(total)
    }

    /// Add one to a single column of the record with this primary key.
    pub fn increment(&self, key: i64, column: usize) -> Result<(), DatabaseError> {
        self.increment_op(key, column).map(|_| ())
    }

    /// Enable and backfill a secondary index on `column`.
    pub fn create_index(&self, column: usize) -> Result<(), DatabaseError> {
        self.check_column(column)?;

        let rids = self.living_base_rids();
        let mut rows = Vec::with_capacity(rids.len());
        for rid in rids {
            if let Some(row) = self.read_record(rid, 0)? {
                rows.push((rid, row[column]));
            }
        }

        let mut index = self.index.lock().unwrap();
        index.enable(column)?;
        for (rid, value) in rows {
            index.insert(column, value, rid);
        }

        Ok(())
    }

    /// Drop the secondary index on `column`.
    pub fn drop_index(&self, column: usize) -> Result<(), DatabaseError> {
        self.check_column(column)?;
        self.index.lock().unwrap().disable(column)
    }

    // ------------------------------------------------------------------
    // Operations with undo information, used by the transaction layer
    // ------------------------------------------------------------------

    pub(crate) fn insert_op(&self, values: &[i64]) -> Result<InsertOutcome, DatabaseError> {
        if values.len() != self.num_columns {
            return Err(DatabaseError::Argument(format!(
                "expected {} values, got {}",
                self.num_columns,
                values.len()
            )));
        }

        let mut state = self.state.lock().unwrap();

        {
            let index = self.index.lock().unwrap();
            if !index.locate(self.key_column, values[self.key_column]).is_empty() {
                return Err(DatabaseError::Argument(format!(
                    "duplicate primary key {}",
                    values[self.key_column]
                )));
            }
        }

        // Walk the allocation cursor forward until the current base page has
        // room. At most one advance is ever needed.
        let handle = loop {
            let key = PageKey::base(self.table_id, state.current_page_range, state.current_base_page);
            let handle = self.pool.pin(key)?;
            if handle.with_page(|page| page.has_capacity()) {
                break handle;
            }

            if state.current_base_page + 1 < BASE_PAGES_PER_RANGE {
                let range = state.current_page_range;
                state.page_ranges[range].append_base_page()?;
                state.current_base_page += 1;
            } else {
                state.page_ranges.push(PageRange::new());
                state.current_page_range += 1;
                state.current_base_page = 0;
            }
            state.current_slot = 0;
        };

        let slot = handle.with_page(|page| page.num_records());
        let rid = RID::base(state.current_page_range, state.current_base_page, slot);

        // A fresh base record's indirection is itself: no updates yet.
        handle.with_page_mut(|page| {
            page.as_base_mut()
                .and_then(|base| base.insert(rid, now_millis(), 0, rid, values))
        })?;
        handle.mark_dirty();

        state.page_directory.insert(rid, rid.address());
        state.current_slot = slot + 1;

        self.index.lock().unwrap().insert_row(values, rid);

        Ok(InsertOutcome { rid, values: values.to_vec() })
    }

    pub(crate) fn update_op(
        &self,
        key: i64,
        values: &[Option<i64>],
    ) -> Result<UpdateOutcome, DatabaseError> {
        if values.len() != self.num_columns {
            return Err(DatabaseError::Argument(format!(
                "expected {} values, got {}",
                self.num_columns,
                values.len()
            )));
        }
        if values[self.key_column].is_some() {
            return Err(DatabaseError::Argument("the primary key may not be updated".into()));
        }

        let mut state = self.state.lock().unwrap();

        let base_rid = {
            let index = self.index.lock().unwrap();
            index
                .locate(self.key_column, key)
                .into_iter()
                .next()
                .ok_or(DatabaseError::NotFound)?
        };
        let addr = self.directory_lookup(&state, base_rid)?;

        let base_handle = self.pool.pin(PageKey::base(self.table_id, addr.range, addr.page))?;
        let (prev, prev_schema) = base_handle.with_page(|page| {
            let base = page.as_base()?;
            Ok::<_, DatabaseError>((base.indirection(addr.slot)?, base.schema_encoding(addr.slot)?))
        })?;
        if prev.is_deleted() {
            return Err(DatabaseError::NotFound);
        }

        // Cumulative update scheme: carry the current effective value of every
        // column the update leaves alone.
        let current = self.effective_row(&state, &base_handle, addr, prev)?;
        let new_row: Vec<i64> = (0..self.num_columns)
            .map(|column| values[column].unwrap_or(current[column]))
            .collect();
        let bits = schema_bitmask(values);

        // Allocate a tail slot, opening a new tail page on overflow.
        let range_index = addr.range;
        let mut tail_page = state.page_ranges[range_index].tail_pages - 1;
        let mut tail_handle = self.pool.pin(PageKey::tail(self.table_id, range_index, tail_page))?;
        if !tail_handle.with_page(|page| page.has_capacity()) {
            tail_page = state.page_ranges[range_index].append_tail_page();
            tail_handle = self.pool.pin(PageKey::tail(self.table_id, range_index, tail_page))?;
        }

        let tail_slot = tail_handle.with_page(|page| page.num_records());
        let tail_rid = RID::tail(range_index, tail_page, tail_slot);

        tail_handle.with_page_mut(|page| {
            page.as_tail_mut()
                .and_then(|tail| tail.insert(tail_rid, now_millis(), bits, prev, base_rid, &new_row))
        })?;
        tail_handle.mark_dirty();
        state.page_directory.insert(tail_rid, tail_rid.address());

        // Link the chain and fold the new bits into the base schema encoding.
        base_handle.with_page_mut(|page| {
            let base = page.as_base_mut()?;
            base.set_indirection(addr.slot, tail_rid)?;
            base.set_schema_encoding(addr.slot, prev_schema | bits)
        })?;
        base_handle.mark_dirty();

        let mut index_changes = Vec::new();
        {
            let mut index = self.index.lock().unwrap();
            for column in 0..self.num_columns {
                if let Some(new) = values[column] {
                    if index.is_enabled(column) && current[column] != new {
                        index.update(column, current[column], new, base_rid);
                        index_changes.push((column, current[column], new));
                    }
                }
            }
        }

        let range = &mut state.page_ranges[range_index];
        range.tail_records += 1;
        range.updates_since_merge += 1;
        if range.updates_since_merge >= MERGE_THRESHOLD {
            range.updates_since_merge = 0;
            self.request_merge(range_index);
        }

        Ok(UpdateOutcome { base_rid, tail_rid, prev_indirection: prev, prev_schema, index_changes })
    }

    pub(crate) fn delete_op(&self, key: i64) -> Result<DeleteOutcome, DatabaseError> {
        let state = self.state.lock().unwrap();

        let base_rid = {
            let index = self.index.lock().unwrap();
            index
                .locate(self.key_column, key)
                .into_iter()
                .next()
                .ok_or(DatabaseError::NotFound)?
        };
        let addr = self.directory_lookup(&state, base_rid)?;

        let base_handle = self.pool.pin(PageKey::base(self.table_id, addr.range, addr.page))?;
        let prev = base_handle
            .with_page(|page| page.as_base().and_then(|base| base.indirection(addr.slot)))?;
        if prev.is_deleted() {
            return Err(DatabaseError::NotFound);
        }

        let current = self.effective_row(&state, &base_handle, addr, prev)?;

        base_handle.with_page_mut(|page| {
            page.as_base_mut()
                .and_then(|base| base.set_indirection(addr.slot, RID::deleted()))
        })?;
        base_handle.mark_dirty();

        let removed = self.index.lock().unwrap().remove_row(&current, base_rid);

        Ok(DeleteOutcome { base_rid, prev_indirection: prev, removed })
    }

    pub(crate) fn increment_op(
        &self,
        key: i64,
        column: usize,
    ) -> Result<UpdateOutcome, DatabaseError> {
        self.check_column(column)?;

        let base_rid = self.locate_key(key).ok_or(DatabaseError::NotFound)?;
        let row = self.read_record(base_rid, 0)?.ok_or(DatabaseError::NotFound)?;

        let mut values = vec![None; self.num_columns];
        values[column] = Some(row[column] + 1);
        self.update_op(key, &values)
    }

    // ------------------------------------------------------------------
    // Rollback, used by aborting transactions
    // ------------------------------------------------------------------

    /// Undo an insert: mark the record deleted and drop its index entries.
    pub(crate) fn rollback_insert(&self, outcome: &InsertOutcome) -> Result<(), DatabaseError> {
        let state = self.state.lock().unwrap();
        let addr = self.directory_lookup(&state, outcome.rid)?;

        let handle = self.pool.pin(PageKey::base(self.table_id, addr.range, addr.page))?;
        handle.with_page_mut(|page| {
            page.as_base_mut()
                .and_then(|base| base.set_indirection(addr.slot, RID::deleted()))
        })?;
        handle.mark_dirty();
        drop(state);

        self.index.lock().unwrap().remove_row(&outcome.values, outcome.rid);
        Ok(())
    }

    /// Undo an update: restore the base record's indirection and schema
    /// encoding and move the index mappings back. The tail record stays in
    /// place, unreachable from the chain.
    pub(crate) fn rollback_update(&self, outcome: &UpdateOutcome) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().unwrap();
        let addr = self.directory_lookup(&state, outcome.base_rid)?;

        let handle = self.pool.pin(PageKey::base(self.table_id, addr.range, addr.page))?;
        handle.with_page_mut(|page| {
            let base = page.as_base_mut()?;
            base.set_indirection(addr.slot, outcome.prev_indirection)?;
            base.set_schema_encoding(addr.slot, outcome.prev_schema)
        })?;
        handle.mark_dirty();

        state.page_directory.remove(&outcome.tail_rid);
        drop(state);

        let mut index = self.index.lock().unwrap();
        for (column, old, new) in outcome.index_changes.iter().rev() {
            index.update(*column, *new, *old, outcome.base_rid);
        }

        Ok(())
    }

    /// Undo a delete: restore the indirection and reinsert the index entries.
    pub(crate) fn rollback_delete(&self, outcome: &DeleteOutcome) -> Result<(), DatabaseError> {
        let state = self.state.lock().unwrap();
        let addr = self.directory_lookup(&state, outcome.base_rid)?;

        let handle = self.pool.pin(PageKey::base(self.table_id, addr.range, addr.page))?;
        handle.with_page_mut(|page| {
            page.as_base_mut()
                .and_then(|base| base.set_indirection(addr.slot, outcome.prev_indirection))
        })?;
        handle.mark_dirty();
        drop(state);

        let mut index = self.index.lock().unwrap();
        for (column, value) in &outcome.removed {
            index.insert(*column, *value, outcome.base_rid);
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookups shared with the transaction layer
    // ------------------------------------------------------------------

    /// Base RID of the record with this primary key, if any.
    pub(crate) fn locate_key(&self, key: i64) -> Option<RID> {
        let index = self.index.lock().unwrap();
        index.locate(self.key_column, key).into_iter().next()
    }

    /// Base RIDs matching `value` on `column`. Uses the column's index when
    /// one is enabled, otherwise scans the living base records.
    pub(crate) fn lookup_rids(&self, column: usize, value: i64) -> Result<Vec<RID>, DatabaseError> {
        self.check_column(column)?;

        {
            let index = self.index.lock().unwrap();
            if index.is_enabled(column) {
                return Ok(index.locate(column, value));
            }
        }

        debug!("table {}: falling back to scan for column {column}", self.name);
        let mut matches = Vec::new();
        for rid in self.living_base_rids() {
            if let Some(row) = self.read_record(rid, 0)? {
                if row[column] == value {
                    matches.push(rid);
                }
            }
        }
        Ok(matches)
    }

    /// Base RIDs with primary keys in `[start, end]`.
    pub(crate) fn lookup_key_range(&self, start: i64, end: i64) -> Vec<RID> {
        let index = self.index.lock().unwrap();
        index.locate_range(self.key_column, start, end)
    }

    fn living_base_rids(&self) -> Vec<RID> {
        let state = self.state.lock().unwrap();
        let mut rids: Vec<RID> =
            state.page_directory.keys().copied().filter(|rid| rid.is_base()).collect();
        rids.sort();
        rids
    }

    // ------------------------------------------------------------------
    // Record materialization
    // ------------------------------------------------------------------

    fn check_column(&self, column: usize) -> Result<(), DatabaseError> {
        if column >= self.num_columns {
            return Err(DatabaseError::Argument(format!(
                "column {column} out of bounds for {} columns",
                self.num_columns
            )));
        }
        Ok(())
    }

    fn directory_lookup(
        &self,
        state: &TableState,
        rid: RID,
    ) -> Result<Address, DatabaseError> {
        state
            .page_directory
            .get(&rid)
            .copied()
            .ok_or_else(|| DatabaseError::Invariant(format!("RID {rid:?} missing from page directory")))
    }

    /// The current effective row of a base record, given its indirection.
    /// Tail records are cumulative, so one read suffices.
    fn effective_row(
        &self,
        state: &TableState,
        base_handle: &FrameHandle,
        addr: Address,
        indirection: RID,
    ) -> Result<Vec<i64>, DatabaseError> {
        if !indirection.is_tail() {
            return base_handle.with_page(|page| page.as_base().and_then(|base| base.read_row(addr.slot)));
        }

        let tail_addr = self.directory_lookup(state, indirection)?;
        let tail_handle = self.pool.pin(PageKey::tail(self.table_id, tail_addr.range, tail_addr.page))?;
        tail_handle.with_page(|page| page.as_tail().and_then(|tail| tail.read_row(tail_addr.slot)))
    }

    /// Materialize a relative version of a base record, or `None` when the
    /// record does not exist or has been deleted. Version 0 is the newest
    /// version; negative versions walk the indirection chain toward the base
    /// record, clamping there.
    fn read_record(&self, base_rid: RID, version: i64) -> Result<Option<Vec<i64>>, DatabaseError> {
        if version > 0 {
            return Err(DatabaseError::Argument(format!(
                "relative version must be zero or negative, got {version}"
            )));
        }

        let addr = {
            let state = self.state.lock().unwrap();
            match state.page_directory.get(&base_rid) {
                Some(addr) => *addr,
                None => return Ok(None),
            }
        };

        let base_handle = self.pool.pin(PageKey::base(self.table_id, addr.range, addr.page))?;
        let indirection = base_handle
            .with_page(|page| page.as_base().and_then(|base| base.indirection(addr.slot)))?;

        if indirection.is_deleted() {
            return Ok(None);
        }

        if !indirection.is_tail() {
            // Self loop: the base record is the newest (and only) version.
            let row = base_handle
                .with_page(|page| page.as_base().and_then(|base| base.read_row(addr.slot)))?;
            return Ok(Some(row));
        }

        // Walk back |version| steps from the newest tail record.
        let mut current = indirection;
        let mut steps = version.unsigned_abs();
        while steps > 0 {
            let tail_addr = {
                let state = self.state.lock().unwrap();
                self.directory_lookup(&state, current)?
            };
            let tail_handle =
                self.pool.pin(PageKey::tail(self.table_id, tail_addr.range, tail_addr.page))?;
            let previous = tail_handle
                .with_page(|page| page.as_tail().and_then(|tail| tail.indirection(tail_addr.slot)))?;

            if previous == base_rid {
                current = base_rid;
                break;
            }
            current = previous;
            steps -= 1;
        }

        if current == base_rid {
            let row = base_handle
                .with_page(|page| page.as_base().and_then(|base| base.read_row(addr.slot)))?;
            return Ok(Some(row));
        }

        let tail_addr = {
            let state = self.state.lock().unwrap();
            self.directory_lookup(&state, current)?
        };
        let tail_handle =
            self.pool.pin(PageKey::tail(self.table_id, tail_addr.range, tail_addr.page))?;
        let row = tail_handle
            .with_page(|page| page.as_tail().and_then(|tail| tail.read_row(tail_addr.slot)))?;
        Ok(Some(row))
    }

    // ------------------------------------------------------------------
    // Merge
    // ------------------------------------------------------------------

    fn request_merge(&self, range: usize) {
        if let Some(handle) = self.merge.lock().unwrap().as_ref() {
            debug!("table {}: requesting merge of page range {range}", self.name);
            handle.request(range);
        }
    }

    /// Consolidate one page range: fold every chain's newest tail values into
    /// the base pages, reset indirections to self, and advance the TPS
    /// high-water mark. Slots updated between the snapshot and the publish
    /// step are skipped and handled by a later merge, which makes the
    /// operation safe under concurrent writers and idempotent.
    pub fn merge_range(&self, range_index: usize) -> Result<(), DatabaseError> {
        let (base_pages, tail_high) = {
            let state = self.state.lock().unwrap();
            let range = state.page_ranges.get(range_index).ok_or_else(|| {
                DatabaseError::Argument(format!("page range {range_index} does not exist"))
            })?;
            (range.base_pages, range.tail_records)
        };

        for page in 0..base_pages {
            let handle = self.pool.pin(PageKey::base(self.table_id, range_index, page))?;

            // Snapshot the slots that currently point at a tail record.
            let pending: Vec<(usize, RID, RID)> = handle.with_page(|buffer| {
                let base = buffer.as_base()?;
                let mut slots = Vec::new();
                for slot in 0..base.num_records() {
                    let indirection = base.indirection(slot)?;
                    if indirection.is_tail() {
                        slots.push((slot, base.rid(slot)?, indirection));
                    }
                }
                Ok::<_, DatabaseError>(slots)
            })?;

            if pending.is_empty() {
                continue;
            }

            // Tail records are cumulative, so the newest one carries the full
            // consolidated row.
            let mut consolidated = Vec::with_capacity(pending.len());
            for (slot, base_rid, tail_rid) in pending {
                let tail_addr = {
                    let state = self.state.lock().unwrap();
                    match state.page_directory.get(&tail_rid) {
                        Some(addr) => *addr,
                        None => continue,
                    }
                };
                let tail_handle =
                    self.pool.pin(PageKey::tail(self.table_id, tail_addr.range, tail_addr.page))?;
                let row = tail_handle
                    .with_page(|buffer| buffer.as_tail().and_then(|tail| tail.read_row(tail_addr.slot)))?;
                consolidated.push((slot, base_rid, tail_rid, row));
            }

            // Publish under the table state lock. Re-check each slot's
            // indirection so a chain extended after the snapshot is left for
            // the next merge instead of being clobbered.
            let state = self.state.lock().unwrap();
            handle.with_page_mut(|buffer| {
                let base = buffer.as_base_mut()?;
                for (slot, base_rid, tail_rid, row) in &consolidated {
                    if base.indirection(*slot)? != *tail_rid {
                        continue;
                    }
                    for (column, value) in row.iter().enumerate() {
                        base.update_value(column, *slot, *value)?;
                    }
                    base.set_indirection(*slot, *base_rid)?;
                }
                Ok::<_, DatabaseError>(())
            })?;
            handle.mark_dirty();
            drop(state);
        }

        let mut state = self.state.lock().unwrap();
        let range = &mut state.page_ranges[range_index];
        if tail_high > range.tps {
            range.tps = tail_high;
        }
        info!(
            "table {}: merged page range {range_index}, tps now {}",
            self.name, range.tps
        );

        Ok(())
    }

    /// TPS high-water mark of a page range. Mostly useful for inspection.
    pub fn range_tps(&self, range_index: usize) -> Option<u64> {
        let state = self.state.lock().unwrap();
        state.page_ranges.get(range_index).map(|range| range.tps)
    }

    // ------------------------------------------------------------------
    // Persistence and shutdown
    // ------------------------------------------------------------------

    /// Write the table's metadata, page directory, and index array to disk.
    /// Page payloads are flushed separately by the buffer pool.
    pub fn persist(&self) -> Result<(), DatabaseError> {
        let dir = self.pool.table_dir(self.table_id)?;
        fs::create_dir_all(&dir)?;

        let state = self.state.lock().unwrap();

        let mut metadata = Vec::with_capacity(20);
        for value in [
            self.key_column as i32,
            self.num_columns as i32,
            state.current_page_range as i32,
            state.current_base_page as i32,
            state.current_slot as i32,
        ] {
            metadata.extend_from_slice(&value.to_le_bytes());
        }
        fs::write(dir.join("metadata.bin"), metadata)?;

        let mut entries: Vec<(RID, Address)> =
            state.page_directory.iter().map(|(rid, addr)| (*rid, *addr)).collect();
        entries.sort_by_key(|(rid, _)| *rid);
        let directory = DirectoryPersistable { entries, ranges: state.page_ranges.clone() };
        let directory_bytes = serde_json::to_vec(&directory)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        fs::write(dir.join("page_directory.bin"), directory_bytes)?;
        drop(state);

        let index = self.index.lock().unwrap();
        let index_bytes =
            serde_json::to_vec(&*index).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        fs::write(dir.join("indices.bin"), index_bytes)?;

        Ok(())
    }

    /// Stop the background merge worker and wait for it to exit.
    pub fn shutdown(&self) {
        if let Some(handle) = self.merge.lock().unwrap().take() {
            handle.shutdown();
        }
    }
}

/// Keep the columns whose projection flag is set.
fn project(row: &[i64], projection: &[usize]) -> Vec<i64> {
    row.iter()
        .zip(projection.iter())
        .filter(|(_, flag)| **flag != 0)
        .map(|(value, _)| *value)
        .collect()
}
