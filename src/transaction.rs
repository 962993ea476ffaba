use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use crate::errors::DatabaseError;
use crate::lock_manager::{LockKey, LOCK_MANAGER};
use crate::rid::RID;
use crate::table::{DeleteOutcome, InsertOutcome, Table, UpdateOutcome};

/// Uniquely identifies a running transaction, process-wide.
pub type TransactionId = usize;

static NEXT_TRANSACTION_ID: AtomicUsize = AtomicUsize::new(1);

/// One query bound to its argument tuple. The table it runs against is kept
/// alongside in the transaction's query list.
#[derive(Clone, Debug)]
pub enum Query {
    Insert { values: Vec<i64> },
    Update { key: i64, values: Vec<Option<i64>> },
    Select { value: i64, column: usize, projection: Vec<usize> },
    SelectVersion { value: i64, column: usize, projection: Vec<usize>, relative_version: i64 },
    Sum { start: i64, end: i64, column: usize },
    SumVersion { start: i64, end: i64, column: usize, relative_version: i64 },
    Increment { key: i64, column: usize },
    Delete { key: i64 },
}

/// Compensation for one applied query, replayed in reverse on abort.
enum UndoRecord {
    Insert { table: Arc<Table>, outcome: InsertOutcome },
    Update { table: Arc<Table>, outcome: UpdateOutcome },
    Delete { table: Arc<Table>, outcome: DeleteOutcome },
}

/// An ordered sequence of queries executed under strict two-phase locking
/// with no-wait conflict handling: every lock is taken before the query it
/// guards and nothing is released until commit or abort. A lock rejection or
/// query failure aborts the transaction, rolling back the queries already
/// applied.
pub struct Transaction {
    id: TransactionId,
    queries: Vec<(Arc<Table>, Query)>,
    undo_log: Vec<UndoRecord>,
}

impl Transaction {
    /// Create a new transaction.
    pub fn new() -> Self {
        Transaction {
            id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::SeqCst),
            queries: Vec::new(),
            undo_log: Vec::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Add an insert query to this transaction.
    pub fn add_insert(&mut self, table: Arc<Table>, values: Vec<i64>) {
        self.queries.push((table, Query::Insert { values }));
    }

    /// Add an update query to this transaction.
    pub fn add_update(&mut self, table: Arc<Table>, key: i64, values: Vec<Option<i64>>) {
        self.queries.push((table, Query::Update { key, values }));
    }

    /// Add a select query to this transaction.
    pub fn add_select(&mut self, table: Arc<Table>, value: i64, column: usize, projection: Vec<usize>) {
        self.queries.push((table, Query::Select { value, column, projection }));
    }

    /// Add a versioned select query to this transaction.
    pub fn add_select_version(
        &mut self,
        table: Arc<Table>,
        value: i64,
        column: usize,
        projection: Vec<usize>,
        relative_version: i64,
    ) {
        self.queries
            .push((table, Query::SelectVersion { value, column, projection, relative_version }));
    }

    /// Add a sum query to this transaction.
    pub fn add_sum(&mut self, table: Arc<Table>, start: i64, end: i64, column: usize) {
        self.queries.push((table, Query::Sum { start, end, column }));
    }

    /// Add a versioned sum query to this transaction.
    pub fn add_sum_version(
        &mut self,
        table: Arc<Table>,
        start: i64,
        end: i64,
        column: usize,
        relative_version: i64,
    ) {
        self.queries.push((table, Query::SumVersion { start, end, column, relative_version }));
    }

    /// Add an increment query to this transaction.
    pub fn add_increment(&mut self, table: Arc<Table>, key: i64, column: usize) {
        self.queries.push((table, Query::Increment { key, column }));
    }

    /// Add a delete query to this transaction.
    pub fn add_delete(&mut self, table: Arc<Table>, key: i64) {
        self.queries.push((table, Query::Delete { key }));
    }

    /// Execute every query in order. Returns `true` on commit and `false` on
    /// abort.
    pub fn run(&mut self) -> bool {
        for position in 0..self.queries.len() {
            let (table, query) = self.queries[position].clone();
            if !self.execute(table, query) {
                return self.abort();
            }
        }

        self.commit()
    }

    /// Shared lock on one record, no-wait.
    fn lock_shared(&self, table: &Table, rid: RID) -> bool {
        LOCK_MANAGER.acquire_shared(LockKey::new(table.table_id(), rid), self.id)
    }

    /// Exclusive lock on one record, no-wait.
    fn lock_exclusive(&self, table: &Table, rid: RID) -> bool {
        LOCK_MANAGER.acquire_exclusive(LockKey::new(table.table_id(), rid), self.id)
    }

    /// Run one query, acquiring its locks first. Returns `false` when the
    /// transaction must abort.
    fn execute(&mut self, table: Arc<Table>, query: Query) -> bool {
        match query {
            Query::Insert { values } => match table.insert_op(&values) {
                Ok(outcome) => {
                    let rid = outcome.rid;
                    self.undo_log.push(UndoRecord::Insert { table: table.clone(), outcome });
                    // The RID is freshly allocated, so this lock cannot
                    // conflict; taking it keeps the record ours until commit.
                    self.lock_exclusive(&table, rid)
                }
                Err(error) => self.note_failure("insert", &error),
            },

            Query::Update { key, values } => {
                let Some(rid) = table.locate_key(key) else {
                    return false;
                };
                if !self.lock_exclusive(&table, rid) {
                    debug!("transaction {}: write conflict on {rid:?}", self.id);
                    return false;
                }

                match table.update_op(key, &values) {
                    Ok(outcome) => {
                        self.undo_log.push(UndoRecord::Update { table, outcome });
                        true
                    }
                    Err(error) => self.note_failure("update", &error),
                }
            }

            Query::Increment { key, column } => {
                let Some(rid) = table.locate_key(key) else {
                    return false;
                };
                if !self.lock_exclusive(&table, rid) {
                    debug!("transaction {}: write conflict on {rid:?}", self.id);
                    return false;
                }

                match table.increment_op(key, column) {
                    Ok(outcome) => {
                        self.undo_log.push(UndoRecord::Update { table, outcome });
                        true
                    }
                    Err(error) => self.note_failure("increment", &error),
                }
            }

            Query::Delete { key } => {
                let Some(rid) = table.locate_key(key) else {
                    return false;
                };
                if !self.lock_exclusive(&table, rid) {
                    debug!("transaction {}: write conflict on {rid:?}", self.id);
                    return false;
                }

                match table.delete_op(key) {
                    Ok(outcome) => {
                        self.undo_log.push(UndoRecord::Delete { table, outcome });
                        true
                    }
                    Err(error) => self.note_failure("delete", &error),
                }
            }

            Query::Select { value, column, projection } => {
                self.execute_select(table, value, column, projection, 0)
            }

            Query::SelectVersion { value, column, projection, relative_version } => {
                self.execute_select(table, value, column, projection, relative_version)
            }

            Query::Sum { start, end, column } => self.execute_sum(table, start, end, column, 0),

            Query::SumVersion { start, end, column, relative_version } => {
                self.execute_sum(table, start, end, column, relative_version)
            }
        }
    }

    /// Record a query failure at the right severity and signal an abort.
    /// Recoverable kinds are routine; anything else deserves a loud note.
    fn note_failure(&self, op: &str, error: &DatabaseError) -> bool {
        if error.is_recoverable() {
            debug!("transaction {}: {op} failed: {error}", self.id);
        } else {
            warn!("transaction {}: {op} hit a fatal error: {error}", self.id);
        }
        false
    }

    fn execute_select(
        &mut self,
        table: Arc<Table>,
        value: i64,
        column: usize,
        projection: Vec<usize>,
        relative_version: i64,
    ) -> bool {
        let rids = match table.lookup_rids(column, value) {
            Ok(rids) => rids,
            Err(error) => return self.note_failure("select", &error),
        };

        for rid in &rids {
            if !self.lock_shared(&table, *rid) {
                debug!("transaction {}: read conflict on {rid:?}", self.id);
                return false;
            }
        }

        table.select_version(value, column, &projection, relative_version).is_ok()
    }

    fn execute_sum(
        &mut self,
        table: Arc<Table>,
        start: i64,
        end: i64,
        column: usize,
        relative_version: i64,
    ) -> bool {
        let rids = table.lookup_key_range(start, end);
        for rid in &rids {
            if !self.lock_shared(&table, *rid) {
                debug!("transaction {}: read conflict on {rid:?}", self.id);
                return false;
            }
        }

        table.sum_version(start, end, column, relative_version).is_ok()
    }

    /// Undo every applied query in reverse order, then release all locks.
    fn abort(&mut self) -> bool {
        debug!("transaction {}: aborting", self.id);

        for undo in self.undo_log.drain(..).rev() {
            let result = match &undo {
                UndoRecord::Insert { table, outcome } => table.rollback_insert(outcome),
                UndoRecord::Update { table, outcome } => table.rollback_update(outcome),
                UndoRecord::Delete { table, outcome } => table.rollback_delete(outcome),
            };

            if let Err(error) = result {
                warn!("transaction {}: rollback step failed: {error}", self.id);
            }
        }

        LOCK_MANAGER.release_all(self.id);
        false
    }

    /// Release all locks and report success.
    fn commit(&mut self) -> bool {
        self.undo_log.clear();
        LOCK_MANAGER.release_all(self.id);
        true
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction::new()
    }
}
