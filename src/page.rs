use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::constants::{BASE_PAGES_PER_RANGE, CELLS_PER_PAGE, CELL_SIZE, PAGE_SIZE};
use crate::errors::DatabaseError;
use crate::rid::RID;

/// Represents a physical page: a byte buffer holding up to `CELLS_PER_PAGE`
/// fixed-width cells for a single column. Cells are 64 bit integers encoded
/// little endian, which keeps the on-disk image stable between runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Page {
    data: Vec<u8>,

    /// The number of cells currently written. Also the next available slot.
    num_cells: usize,
}

impl Page {
    /// Create a new empty physical page.
    pub fn new() -> Self {
        Page { data: vec![0; PAGE_SIZE], num_cells: 0 }
    }

    pub fn has_capacity(&self) -> bool {
        self.num_cells < CELLS_PER_PAGE
    }

    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    /// Append a value, returning the slot it landed in.
    pub fn write(&mut self, value: i64) -> Result<usize, DatabaseError> {
        if !self.has_capacity() {
            return Err(DatabaseError::PageFull);
        }

        let slot = self.num_cells;
        self.data[slot * CELL_SIZE..(slot + 1) * CELL_SIZE].copy_from_slice(&value.to_le_bytes());
        self.num_cells += 1;

        Ok(slot)
    }

    /// Read the cell at `slot`.
    pub fn read(&self, slot: usize) -> Result<i64, DatabaseError> {
        if slot >= self.num_cells {
            return Err(DatabaseError::Invariant(format!(
                "read of slot {slot} past end of page ({} cells)",
                self.num_cells
            )));
        }

        let mut bytes = [0u8; CELL_SIZE];
        bytes.copy_from_slice(&self.data[slot * CELL_SIZE..(slot + 1) * CELL_SIZE]);
        Ok(i64::from_le_bytes(bytes))
    }

    /// Overwrite the cell at `slot` in place. Used by merge consolidation.
    pub fn update(&mut self, slot: usize, value: i64) -> Result<(), DatabaseError> {
        if slot >= self.num_cells {
            return Err(DatabaseError::Invariant(format!(
                "update of slot {slot} past end of page ({} cells)",
                self.num_cells
            )));
        }

        self.data[slot * CELL_SIZE..(slot + 1) * CELL_SIZE].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new()
    }
}

/// Zero sized struct representing **base** pages.
#[derive(Clone, Copy, Debug)]
pub struct Base;

/// Zero sized struct representing **tail** pages.
#[derive(Clone, Copy, Debug)]
pub struct Tail;

/// Represents a **logical** base or tail page, depending on the provided
/// generic type argument: one physical page per user column plus parallel
/// metadata arrays (RID, start time, schema encoding, indirection, and for
/// tail pages the base RID each slot updates).
///
/// Invariant: every column page and every parallel array holds exactly
/// `num_records` entries; inserts advance all of them together.
#[derive(Clone, Debug)]
pub struct LogicalPage<T> {
    /// One physical page per user column.
    columns: Vec<Page>,

    rids: Vec<RID>,
    start_times: Vec<i64>,
    schema_encodings: Vec<i64>,
    indirections: Vec<RID>,

    /// Parallel only for tail pages; stays empty on base pages.
    base_rids: Vec<RID>,

    /// Phantom field for the generic type argument.
    phantom: PhantomData<T>,
}

impl<T> LogicalPage<T> {
    /// Create a new logical page with `num_columns` user columns.
    pub fn new(num_columns: usize) -> LogicalPage<T> {
        LogicalPage {
            columns: (0..num_columns).map(|_| Page::new()).collect(),
            rids: Vec::new(),
            start_times: Vec::new(),
            schema_encodings: Vec::new(),
            indirections: Vec::new(),
            base_rids: Vec::new(),
            phantom: PhantomData::<T>,
        }
    }

    pub fn num_records(&self) -> usize {
        self.rids.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.num_records() < CELLS_PER_PAGE
    }

    fn check_slot(&self, slot: usize) -> Result<(), DatabaseError> {
        if slot >= self.num_records() {
            return Err(DatabaseError::Invariant(format!(
                "slot {slot} out of bounds for page with {} records",
                self.num_records()
            )));
        }
        Ok(())
    }

    /// Read a single column value.
    pub fn read_value(&self, column: usize, slot: usize) -> Result<i64, DatabaseError> {
        let page = self.columns.get(column).ok_or_else(|| {
            DatabaseError::Argument(format!("column {column} out of bounds"))
        })?;
        page.read(slot)
    }

    /// Read every user column of the record at `slot`.
    pub fn read_row(&self, slot: usize) -> Result<Vec<i64>, DatabaseError> {
        self.check_slot(slot)?;
        self.columns.iter().map(|page| page.read(slot)).collect()
    }

    /// Overwrite one column value in place. Used by merge consolidation.
    pub fn update_value(&mut self, column: usize, slot: usize, value: i64) -> Result<(), DatabaseError> {
        let page = self.columns.get_mut(column).ok_or_else(|| {
            DatabaseError::Argument(format!("column {column} out of bounds"))
        })?;
        page.update(slot, value)
    }

    pub fn rid(&self, slot: usize) -> Result<RID, DatabaseError> {
        self.check_slot(slot)?;
        Ok(self.rids[slot])
    }

    pub fn indirection(&self, slot: usize) -> Result<RID, DatabaseError> {
        self.check_slot(slot)?;
        Ok(self.indirections[slot])
    }

    pub fn set_indirection(&mut self, slot: usize, rid: RID) -> Result<(), DatabaseError> {
        self.check_slot(slot)?;
        self.indirections[slot] = rid;
        Ok(())
    }

    pub fn schema_encoding(&self, slot: usize) -> Result<i64, DatabaseError> {
        self.check_slot(slot)?;
        Ok(self.schema_encodings[slot])
    }

    pub fn set_schema_encoding(&mut self, slot: usize, mask: i64) -> Result<(), DatabaseError> {
        self.check_slot(slot)?;
        self.schema_encodings[slot] = mask;
        Ok(())
    }

    pub fn start_time(&self, slot: usize) -> Result<i64, DatabaseError> {
        self.check_slot(slot)?;
        Ok(self.start_times[slot])
    }

    fn insert_common(
        &mut self,
        rid: RID,
        start_time: i64,
        schema_encoding: i64,
        indirection: RID,
        values: &[i64],
    ) -> Result<usize, DatabaseError> {
        if !self.has_capacity() {
            return Err(DatabaseError::PageFull);
        }

        if values.len() != self.columns.len() {
            return Err(DatabaseError::Argument(format!(
                "expected {} column values, got {}",
                self.columns.len(),
                values.len()
            )));
        }

        let mut slot = 0;
        for (page, value) in self.columns.iter_mut().zip(values.iter()) {
            slot = page.write(*value)?;
        }

        self.rids.push(rid);
        self.start_times.push(start_time);
        self.schema_encodings.push(schema_encoding);
        self.indirections.push(indirection);

        Ok(slot)
    }

    pub(crate) fn from_parts(
        columns: Vec<Page>,
        rids: Vec<RID>,
        start_times: Vec<i64>,
        schema_encodings: Vec<i64>,
        indirections: Vec<RID>,
        base_rids: Vec<RID>,
    ) -> Self {
        LogicalPage {
            columns,
            rids,
            start_times,
            schema_encodings,
            indirections,
            base_rids,
            phantom: PhantomData::<T>,
        }
    }

    pub(crate) fn into_parts(self) -> (Vec<Page>, Vec<RID>, Vec<i64>, Vec<i64>, Vec<RID>, Vec<RID>) {
        (
            self.columns,
            self.rids,
            self.start_times,
            self.schema_encodings,
            self.indirections,
            self.base_rids,
        )
    }
}

/// Methods for logical **base** pages.
impl LogicalPage<Base> {
    /// Insert a new base record. A fresh base record's indirection is its own
    /// RID (the self loop meaning "no updates yet"). Returns the slot of this
    /// record or `Err(PageFull)` when the page has no more space.
    pub fn insert(
        &mut self,
        rid: RID,
        start_time: i64,
        schema_encoding: i64,
        indirection: RID,
        values: &[i64],
    ) -> Result<usize, DatabaseError> {
        self.insert_common(rid, start_time, schema_encoding, indirection, values)
    }
}

/// Methods for logical **tail** pages.
impl LogicalPage<Tail> {
    /// Insert a new tail record. `indirection` names the previous version and
    /// `base_rid` the base record at the end of the chain.
    pub fn insert(
        &mut self,
        rid: RID,
        start_time: i64,
        schema_encoding: i64,
        indirection: RID,
        base_rid: RID,
        values: &[i64],
    ) -> Result<usize, DatabaseError> {
        let slot = self.insert_common(rid, start_time, schema_encoding, indirection, values)?;
        self.base_rids.push(base_rid);
        Ok(slot)
    }

    pub fn base_rid(&self, slot: usize) -> Result<RID, DatabaseError> {
        self.check_slot(slot)?;
        Ok(self.base_rids[slot])
    }
}

/// Bookkeeping for one page range: a bounded set of base pages and an
/// unbounded sequence of tail pages, plus the merge high-water mark.
///
/// The page payloads themselves live in buffer pool frames; this struct only
/// tracks how many pages exist and how far merging has progressed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageRange {
    /// Number of base pages allocated in this range, at most
    /// `BASE_PAGES_PER_RANGE`.
    pub base_pages: usize,

    /// Number of tail pages allocated in this range. Unbounded.
    pub tail_pages: usize,

    /// Total tail records ever written to this range.
    pub tail_records: u64,

    /// Tail records written since the last merge request was sent.
    pub updates_since_merge: u64,

    /// Tail-page-sequence high-water mark: the number of tail records already
    /// consolidated into the base pages.
    pub tps: u64,
}

impl PageRange {
    /// A fresh page range starts with one base page and one tail page.
    pub fn new() -> Self {
        PageRange {
            base_pages: 1,
            tail_pages: 1,
            tail_records: 0,
            updates_since_merge: 0,
            tps: 0,
        }
    }

    /// Record capacity of the base section of this range.
    pub fn is_full(&self) -> bool {
        self.base_pages >= BASE_PAGES_PER_RANGE
    }

    /// Allocate another base page, returning its index. Fails once the range
    /// holds `BASE_PAGES_PER_RANGE` base pages.
    pub fn append_base_page(&mut self) -> Result<usize, DatabaseError> {
        if self.is_full() {
            return Err(DatabaseError::PageRangeFull);
        }

        self.base_pages += 1;
        Ok(self.base_pages - 1)
    }

    /// Allocate another tail page, returning its index.
    pub fn append_tail_page(&mut self) -> usize {
        self.tail_pages += 1;
        self.tail_pages - 1
    }

    /// Tail records not yet consolidated into base pages.
    pub fn unmerged_tail_records(&self) -> u64 {
        self.tail_records.saturating_sub(self.tps)
    }
}

impl Default for PageRange {
    fn default() -> Self {
        PageRange::new()
    }
}
