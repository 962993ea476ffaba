use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::debug;

use crate::constants::BP_NUM_FRAMES;
use crate::errors::DatabaseError;
use crate::page::{Base, LogicalPage, Tail};
use crate::persistables::PagePersistable;

/// Whether a frame holds a base page or a tail page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PageKind {
    Base,
    Tail,
}

/// Identity of a logical page cached by the buffer pool. Identity is
/// data-defined: the same key always resolves to the same canonical file
/// under the table's directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PageKey {
    /// Process-unique table identifier from [`BufferPool::register_table`].
    pub table: usize,

    /// Page range index.
    pub range: usize,

    /// Logical page index within the range.
    pub page: usize,

    pub kind: PageKind,
}

impl PageKey {
    pub fn base(table: usize, range: usize, page: usize) -> Self {
        PageKey { table, range, page, kind: PageKind::Base }
    }

    pub fn tail(table: usize, range: usize, page: usize) -> Self {
        PageKey { table, range, page, kind: PageKind::Tail }
    }

    /// File name of this page inside its `pagerange<i>` directory.
    fn file_name(&self) -> String {
        match self.kind {
            PageKind::Base => format!("base{}.bin", self.page),
            PageKind::Tail => format!("tail{}.bin", self.page),
        }
    }
}

/// The payload of a frame: one whole logical page.
#[derive(Clone, Debug)]
pub enum PageBuffer {
    Base(LogicalPage<Base>),
    Tail(LogicalPage<Tail>),
}

impl PageBuffer {
    fn empty(kind: PageKind, num_columns: usize) -> Self {
        match kind {
            PageKind::Base => PageBuffer::Base(LogicalPage::new(num_columns)),
            PageKind::Tail => PageBuffer::Tail(LogicalPage::new(num_columns)),
        }
    }

    pub fn num_records(&self) -> usize {
        match self {
            PageBuffer::Base(page) => page.num_records(),
            PageBuffer::Tail(page) => page.num_records(),
        }
    }

    pub fn has_capacity(&self) -> bool {
        match self {
            PageBuffer::Base(page) => page.has_capacity(),
            PageBuffer::Tail(page) => page.has_capacity(),
        }
    }

    pub fn as_base(&self) -> Result<&LogicalPage<Base>, DatabaseError> {
        match self {
            PageBuffer::Base(page) => Ok(page),
            PageBuffer::Tail(_) => {
                Err(DatabaseError::Invariant("expected a base page, found a tail page".into()))
            }
        }
    }

    pub fn as_base_mut(&mut self) -> Result<&mut LogicalPage<Base>, DatabaseError> {
        match self {
            PageBuffer::Base(page) => Ok(page),
            PageBuffer::Tail(_) => {
                Err(DatabaseError::Invariant("expected a base page, found a tail page".into()))
            }
        }
    }

    pub fn as_tail(&self) -> Result<&LogicalPage<Tail>, DatabaseError> {
        match self {
            PageBuffer::Tail(page) => Ok(page),
            PageBuffer::Base(_) => {
                Err(DatabaseError::Invariant("expected a tail page, found a base page".into()))
            }
        }
    }

    pub fn as_tail_mut(&mut self) -> Result<&mut LogicalPage<Tail>, DatabaseError> {
        match self {
            PageBuffer::Tail(page) => Ok(page),
            PageBuffer::Base(_) => {
                Err(DatabaseError::Invariant("expected a tail page, found a base page".into()))
            }
        }
    }

    fn to_persistable(&self) -> PagePersistable {
        match self {
            PageBuffer::Base(page) => PagePersistable::from_base(page.clone()),
            PageBuffer::Tail(page) => PagePersistable::from_tail(page.clone()),
        }
    }
}

/// One buffer pool slot: a logical page plus its bookkeeping. Pin counts and
/// the dirty flag are atomics so unpinning never needs the pool mutex; a
/// frame with a nonzero pin count is never chosen by eviction.
pub struct Frame {
    key: PageKey,
    page: RwLock<PageBuffer>,
    pin_count: AtomicUsize,
    dirty: AtomicBool,
    last_access: AtomicU64,
}

/// A pinned frame. The pin is held for the lifetime of the handle and
/// released on drop, so the pin count can never go below zero.
pub struct FrameHandle {
    frame: Arc<Frame>,
}

impl FrameHandle {
    pub fn key(&self) -> PageKey {
        self.frame.key
    }

    /// Read access to the page payload.
    pub fn with_page<R>(&self, f: impl FnOnce(&PageBuffer) -> R) -> R {
        let page = self.frame.page.read().unwrap();
        f(&page)
    }

    /// Write access to the page payload. Callers that mutate must also call
    /// [`FrameHandle::mark_dirty`].
    pub fn with_page_mut<R>(&self, f: impl FnOnce(&mut PageBuffer) -> R) -> R {
        let mut page = self.frame.page.write().unwrap();
        f(&mut page)
    }

    pub fn mark_dirty(&self) {
        self.frame.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.frame.dirty.load(Ordering::SeqCst)
    }
}

impl Drop for FrameHandle {
    fn drop(&mut self) {
        self.frame.pin_count.fetch_sub(1, Ordering::SeqCst);
    }
}

struct TableInfo {
    name: String,
    num_columns: usize,
}

struct PoolInner {
    frames: Vec<Option<Arc<Frame>>>,
    map: HashMap<PageKey, usize>,
}

/// Table identifiers are allocated process-wide so that keys from distinct
/// databases never alias, notably in the global lock manager.
static NEXT_TABLE_ID: AtomicUsize = AtomicUsize::new(0);

/// A fixed pool of frames caching logical pages, shared by every table of a
/// database. Frame allocation, eviction selection, and identity installation
/// are serialized under one mutex; eviction is LRU over unpinned frames with
/// synchronous write-back of dirty pages.
pub struct BufferPool {
    root: PathBuf,
    capacity: usize,
    inner: Mutex<PoolInner>,
    tables: Mutex<HashMap<usize, TableInfo>>,
    clock: AtomicU64,
}

impl BufferPool {
    /// Create a pool of `capacity` frames rooted at the database directory.
    pub fn new(root: impl Into<PathBuf>, capacity: usize) -> Self {
        assert!(capacity > 0, "buffer pool requires at least one frame");

        BufferPool {
            root: root.into(),
            capacity,
            inner: Mutex::new(PoolInner {
                frames: (0..capacity).map(|_| None).collect(),
                map: HashMap::new(),
            }),
            tables: Mutex::new(HashMap::new()),
            clock: AtomicU64::new(0),
        }
    }

    pub fn with_default_capacity(root: impl Into<PathBuf>) -> Self {
        BufferPool::new(root, BP_NUM_FRAMES)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register a table with the pool, returning its identifier. The pool
    /// needs the name for canonical paths and the column count to initialize
    /// empty pages.
    pub fn register_table(&self, name: &str, num_columns: usize) -> usize {
        let id = NEXT_TABLE_ID.fetch_add(1, Ordering::SeqCst);
        self.tables
            .lock()
            .unwrap()
            .insert(id, TableInfo { name: name.to_string(), num_columns });
        id
    }

    /// Directory holding a table's persisted state.
    pub fn table_dir(&self, table: usize) -> Result<PathBuf, DatabaseError> {
        let tables = self.tables.lock().unwrap();
        let info = tables.get(&table).ok_or_else(|| {
            DatabaseError::Invariant(format!("table {table} not registered with buffer pool"))
        })?;
        Ok(self.root.join("tables").join(&info.name))
    }

    fn page_path(&self, key: PageKey) -> Result<PathBuf, DatabaseError> {
        Ok(self
            .table_dir(key.table)?
            .join(format!("pagerange{}", key.range))
            .join(key.file_name()))
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Pin the page identified by `key`, loading or initializing it if it is
    /// not resident. Fails with `PoolExhausted` when every frame is pinned.
    pub fn pin(&self, key: PageKey) -> Result<FrameHandle, DatabaseError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(&index) = inner.map.get(&key) {
            let frame = inner.frames[index]
                .as_ref()
                .ok_or_else(|| DatabaseError::Invariant("frame map points at empty slot".into()))?
                .clone();
            frame.pin_count.fetch_add(1, Ordering::SeqCst);
            frame.last_access.store(self.tick(), Ordering::SeqCst);
            return Ok(FrameHandle { frame });
        }

        // Miss: find a free slot, evicting if the pool is full.
        let slot = match inner.frames.iter().position(|frame| frame.is_none()) {
            Some(index) => index,
            None => self.evict(&mut inner)?,
        };

        let payload = self.load_or_init(key)?;
        let frame = Arc::new(Frame {
            key,
            page: RwLock::new(payload),
            pin_count: AtomicUsize::new(1),
            dirty: AtomicBool::new(false),
            last_access: AtomicU64::new(self.tick()),
        });

        inner.map.insert(key, slot);
        inner.frames[slot] = Some(frame.clone());

        Ok(FrameHandle { frame })
    }

    /// Choose the least recently used unpinned frame, write it back if dirty,
    /// and return its freed slot index. Ties on the access stamp go to the
    /// lower frame index.
    fn evict(&self, inner: &mut PoolInner) -> Result<usize, DatabaseError> {
        let mut victim: Option<(usize, u64)> = None;

        for (index, slot) in inner.frames.iter().enumerate() {
            if let Some(frame) = slot {
                if frame.pin_count.load(Ordering::SeqCst) > 0 {
                    continue;
                }

                let stamp = frame.last_access.load(Ordering::SeqCst);
                if victim.map_or(true, |(_, best)| stamp < best) {
                    victim = Some((index, stamp));
                }
            }
        }

        let (index, _) = victim.ok_or(DatabaseError::PoolExhausted)?;
        let frame = inner.frames[index]
            .take()
            .ok_or_else(|| DatabaseError::Invariant("eviction chose an empty slot".into()))?;
        inner.map.remove(&frame.key);

        if frame.dirty.load(Ordering::SeqCst) {
            debug!("evicting dirty frame {:?}", frame.key);
            self.write_payload(frame.key, &frame.page.read().unwrap())?;
            frame.dirty.store(false, Ordering::SeqCst);
        } else {
            debug!("evicting clean frame {:?}", frame.key);
        }

        Ok(index)
    }

    /// Read the on-disk copy of `key` if one exists, otherwise hand back an
    /// empty page of the right shape.
    fn load_or_init(&self, key: PageKey) -> Result<PageBuffer, DatabaseError> {
        let path = self.page_path(key)?;

        if !path.exists() {
            let tables = self.tables.lock().unwrap();
            let info = tables.get(&key.table).ok_or_else(|| {
                DatabaseError::Invariant(format!("table {} not registered", key.table))
            })?;
            return Ok(PageBuffer::empty(key.kind, info.num_columns));
        }

        let bytes = fs::read(&path)?;
        let (persistable, _): (PagePersistable, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        Ok(match key.kind {
            PageKind::Base => PageBuffer::Base(persistable.into_base()),
            PageKind::Tail => PageBuffer::Tail(persistable.into_tail()),
        })
    }

    fn write_payload(&self, key: PageKey, payload: &PageBuffer) -> Result<(), DatabaseError> {
        let path = self.page_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = bincode::serde::encode_to_vec(payload.to_persistable(), bincode::config::standard())
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        fs::write(&path, bytes)?;

        Ok(())
    }

    /// Write a pinned frame back to its canonical path if it is dirty.
    pub fn flush(&self, handle: &FrameHandle) -> Result<(), DatabaseError> {
        if handle.frame.dirty.load(Ordering::SeqCst) {
            self.write_payload(handle.frame.key, &handle.frame.page.read().unwrap())?;
            handle.frame.dirty.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Flush every dirty frame belonging to `table`.
    pub fn flush_table(&self, table: usize) -> Result<(), DatabaseError> {
        let frames: Vec<Arc<Frame>> = {
            let inner = self.inner.lock().unwrap();
            inner
                .frames
                .iter()
                .flatten()
                .filter(|frame| frame.key.table == table)
                .cloned()
                .collect()
        };

        for frame in frames {
            if frame.dirty.load(Ordering::SeqCst) {
                self.write_payload(frame.key, &frame.page.read().unwrap())?;
                frame.dirty.store(false, Ordering::SeqCst);
            }
        }

        Ok(())
    }

    /// Flush every dirty frame in the pool.
    pub fn flush_all(&self) -> Result<(), DatabaseError> {
        let tables: Vec<usize> = self.tables.lock().unwrap().keys().copied().collect();
        for table in tables {
            self.flush_table(table)?;
        }
        Ok(())
    }

    /// Drop every frame belonging to `table` without writing anything back,
    /// and forget its registration. Used when a table is dropped.
    pub fn discard_table(&self, table: usize) {
        let mut inner = self.inner.lock().unwrap();
        for slot in inner.frames.iter_mut() {
            if slot.as_ref().is_some_and(|frame| frame.key.table == table) {
                *slot = None;
            }
        }
        inner.map.retain(|key, _| key.table != table);
        drop(inner);

        self.tables.lock().unwrap().remove(&table);
    }

    /// Whether `key` currently occupies a frame. Mostly useful to observe
    /// eviction from the outside.
    pub fn resident(&self, key: &PageKey) -> bool {
        self.inner.lock().unwrap().map.contains_key(key)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
