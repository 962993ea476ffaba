use serde::{Deserialize, Serialize};

use crate::page::{Base, LogicalPage, Page, PageRange, Tail};
use crate::rid::{Address, RID};

/// On-disk image of one logical page: the per-column data blocks followed by
/// the parallel metadata arrays, the TPS pair, and the record count. Written
/// with bincode; the layout must round-trip byte-identically on one build.
#[derive(Serialize, Deserialize, Debug)]
pub struct PagePersistable {
    pub columns: Vec<Page>,
    pub rids: Vec<RID>,
    pub indirections: Vec<RID>,
    pub schema_encodings: Vec<i64>,
    pub start_times: Vec<i64>,

    /// Only populated for tail pages.
    pub base_rids: Vec<RID>,

    pub tps: (u64, u64),
    pub num_records: u64,
}

impl PagePersistable {
    fn from_parts(
        (columns, rids, start_times, schema_encodings, indirections, base_rids): (
            Vec<Page>,
            Vec<RID>,
            Vec<i64>,
            Vec<i64>,
            Vec<RID>,
            Vec<RID>,
        ),
    ) -> Self {
        let num_records = rids.len() as u64;
        PagePersistable {
            columns,
            rids,
            indirections,
            schema_encodings,
            start_times,
            base_rids,
            tps: (0, 0),
            num_records,
        }
    }

    pub fn from_base(page: LogicalPage<Base>) -> Self {
        PagePersistable::from_parts(page.into_parts())
    }

    pub fn from_tail(page: LogicalPage<Tail>) -> Self {
        PagePersistable::from_parts(page.into_parts())
    }

    pub fn into_base(self) -> LogicalPage<Base> {
        LogicalPage::from_parts(
            self.columns,
            self.rids,
            self.start_times,
            self.schema_encodings,
            self.indirections,
            self.base_rids,
        )
    }

    pub fn into_tail(self) -> LogicalPage<Tail> {
        LogicalPage::from_parts(
            self.columns,
            self.rids,
            self.start_times,
            self.schema_encodings,
            self.indirections,
            self.base_rids,
        )
    }
}

/// Contents of `page_directory.bin`: the RID to address mapping plus the
/// per-range bookkeeping needed to resume allocation and merging.
///
/// The directory is stored as a list of pairs because JSON maps may only be
/// keyed by strings.
#[derive(Serialize, Deserialize, Debug)]
pub struct DirectoryPersistable {
    pub entries: Vec<(RID, Address)>,
    pub ranges: Vec<PageRange>,
}
