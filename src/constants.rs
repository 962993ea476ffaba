/// Size of a physical page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Size of a single cell in bytes. Every user column is a 64 bit integer.
pub const CELL_SIZE: usize = 8;

/// Number of cells that can be stored in a page.
pub const CELLS_PER_PAGE: usize = PAGE_SIZE / CELL_SIZE;

/// The number of (logical) base pages per page range.
pub const BASE_PAGES_PER_RANGE: usize = 16;

/// Number of frames in the buffer pool.
pub const BP_NUM_FRAMES: usize = 100;

/// Number of unmerged tail records in a page range that triggers a merge request.
pub const MERGE_THRESHOLD: u64 = 512;
