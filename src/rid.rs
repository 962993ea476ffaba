use serde::{Deserialize, Serialize};

/// Distinguishes base records, tail records, and the deleted sentinel that a
/// base record's indirection takes on after deletion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Base,
    Tail,
    Deleted,
}

/// Identifies any record in a table. The coordinates double as the physical
/// location: page range index, logical page index within the range, and slot
/// within the page. RIDs are assigned monotonically and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RID {
    pub range: usize,
    pub page: usize,
    pub slot: usize,
    pub kind: RecordKind,
}

impl RID {
    /// RID of a base record.
    pub fn base(range: usize, page: usize, slot: usize) -> Self {
        RID { range, page, slot, kind: RecordKind::Base }
    }

    /// RID of a tail record.
    pub fn tail(range: usize, page: usize, slot: usize) -> Self {
        RID { range, page, slot, kind: RecordKind::Tail }
    }

    /// The sentinel stored in a base record's indirection column once the
    /// record has been deleted.
    pub const fn deleted() -> Self {
        RID { range: 0, page: 0, slot: 0, kind: RecordKind::Deleted }
    }

    pub fn is_base(&self) -> bool {
        self.kind == RecordKind::Base
    }

    pub fn is_tail(&self) -> bool {
        self.kind == RecordKind::Tail
    }

    pub fn is_deleted(&self) -> bool {
        self.kind == RecordKind::Deleted
    }

    /// Physical coordinates of this record.
    pub fn address(&self) -> Address {
        Address::new(self.range, self.page, self.slot)
    }
}

/// Physical address of a record. The page directory maps RIDs to these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Page range index.
    pub range: usize,

    /// Logical page index.
    pub page: usize,

    /// Slot offset within the page.
    pub slot: usize,
}

impl Address {
    pub fn new(range: usize, page: usize, slot: usize) -> Self {
        Address { range, page, slot }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rid_ordering_follows_allocation_order() {
        let earlier = RID::base(0, 0, 5);
        let later = RID::base(0, 1, 0);
        assert!(earlier < later);
        assert!(later < RID::base(1, 0, 0));
    }

    #[test]
    fn deleted_sentinel_is_not_base_or_tail() {
        let sentinel = RID::deleted();
        assert!(sentinel.is_deleted());
        assert!(!sentinel.is_base());
        assert!(!sentinel.is_tail());
    }
}
