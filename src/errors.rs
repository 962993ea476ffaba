use thiserror::Error;

use crate::rid::RID;

/// Every failure the engine can surface. Recoverable kinds (`NotFound`,
/// `Conflict`, `Argument`) are converted to aborts by the transaction layer;
/// `Invariant` and `Io` are fatal to the transaction that hits them.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// No record matches the given key or RID.
    #[error("record not found")]
    NotFound,

    /// A lock request was rejected under the no-wait policy.
    #[error("lock conflict on record {0:?}")]
    Conflict(RID),

    /// Every buffer pool frame is pinned.
    #[error("buffer pool exhausted: all frames pinned")]
    PoolExhausted,

    /// A page range already holds its maximum number of base pages.
    #[error("page range filled to capacity")]
    PageRangeFull,

    /// A physical page has no room for another cell.
    #[error("page filled to capacity")]
    PageFull,

    /// Structural corruption. Not recoverable.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Caller-visible misuse: bad column index, wrong arity, mutated
    /// primary key, duplicate key, positive relative version.
    #[error("invalid argument: {0}")]
    Argument(String),
}

impl DatabaseError {
    /// Whether the transaction layer treats this error as a plain abort
    /// rather than a fatal condition worth reporting loudly.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DatabaseError::NotFound | DatabaseError::Conflict(_) | DatabaseError::Argument(_)
        )
    }
}
