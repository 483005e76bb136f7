use ahash::AHashMap;
use log::{debug, trace, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::config::BufferConfig;
use super::disk_manager::DiskManager;
use super::error::{FileError, FileResult};
use super::{BufferId, PAGE_SIZE, PageData, PageId};

/// Source of per-pool ids, so a handle is only honoured by the pool that issued it
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(0);

/// One slot of the buffer pool
pub struct BufferDescriptor {
    /// Page currently held by this slot, if any
    page_id: Option<PageId>,
    /// Number of outstanding pins
    ref_count: u64,
    /// Recently-used signal for the clock sweep
    usage_count: u64,
    /// Whether the bytes differ from what is on disk
    dirty: bool,
    page: Box<PageData>,
}

impl BufferDescriptor {
    fn new() -> Self {
        Self {
            page_id: None,
            ref_count: 0,
            usage_count: 0,
            dirty: false,
            page: Box::new([0u8; PAGE_SIZE]),
        }
    }

    pub fn page_id(&self) -> Option<PageId> {
        self.page_id
    }

    pub fn ref_count(&self) -> u64 {
        self.ref_count
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn data(&self) -> &PageData {
        &self.page
    }

    fn holds_pin(&self, page_id: PageId) -> bool {
        self.page_id == Some(page_id) && self.ref_count > 0
    }

    fn pin(&mut self, max_usage_count: u64) {
        self.ref_count += 1;
        if self.usage_count < max_usage_count {
            self.usage_count += 1;
        }
    }
}

impl fmt::Debug for BufferDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferDescriptor")
            .field("page_id", &self.page_id)
            .field("ref_count", &self.ref_count)
            .field("usage_count", &self.usage_count)
            .field("dirty", &self.dirty)
            .finish()
    }
}

/// Proof of one pin on a resident page.
///
/// Returned by `fetch_page`/`create_page` and consumed by `unpin`. While the
/// handle is alive the page cannot be evicted, so it always refers to the
/// slot it was issued for.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a pinned page stays unevictable until its handle is unpinned"]
pub struct PageHandle {
    pool_id: u64,
    buffer_id: BufferId,
    page_id: PageId,
}

impl PageHandle {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn buffer_id(&self) -> BufferId {
        self.buffer_id
    }
}

/// Counters since the pool was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub hits: u64,
    /// Index misses that loaded a page from disk
    pub misses: u64,
    pub evictions: u64,
    /// Dirty pages written back to disk
    pub flushes: u64,
}

/// Fixed-size page cache with clock eviction and pin counting
pub struct BufferManager {
    /// Stamped into every handle this pool issues
    pool_id: u64,
    /// Underlying disk manager
    disk_manager: DiskManager,
    /// Slot arena, never resized after construction
    descriptors: Vec<BufferDescriptor>,
    /// Resident page id -> slot
    buffer_table: AHashMap<PageId, BufferId>,
    /// Where the next eviction sweep starts
    clock_hand: BufferId,
    /// Spare page that incoming reads land in before being swapped into a slot
    load_buffer: Box<PageData>,
    config: BufferConfig,
    stats: BufferStats,
}

impl BufferManager {
    /// Create a buffer manager with `pool_size` slots and default settings
    pub fn new(disk_manager: DiskManager, pool_size: usize) -> FileResult<Self> {
        Self::with_config(disk_manager, BufferConfig::with_pool_size(pool_size))
    }

    /// Create a buffer manager from an explicit config
    pub fn with_config(disk_manager: DiskManager, config: BufferConfig) -> FileResult<Self> {
        config.validate()?;

        let descriptors = (0..config.pool_size)
            .map(|_| BufferDescriptor::new())
            .collect();

        Ok(Self {
            pool_id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            disk_manager,
            descriptors,
            buffer_table: AHashMap::with_capacity(config.pool_size),
            clock_hand: 0,
            load_buffer: Box::new([0u8; PAGE_SIZE]),
            config,
            stats: BufferStats::default(),
        })
    }

    /// Get a reference to the disk manager
    pub fn disk_manager(&self) -> &DiskManager {
        &self.disk_manager
    }

    /// Direct access to the disk manager. Writes made here bypass the cache.
    pub fn disk_manager_mut(&mut self) -> &mut DiskManager {
        &mut self.disk_manager
    }

    /// Get the config the pool was built with
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Get a snapshot of the hit/miss/eviction counters
    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    /// Get the number of slots in the pool
    pub fn pool_size(&self) -> usize {
        self.descriptors.len()
    }

    /// Pin a page, loading it from disk if it is not resident
    pub fn fetch_page(&mut self, page_id: PageId) -> FileResult<PageHandle> {
        if let Some(&buffer_id) = self.buffer_table.get(&page_id) {
            self.descriptors[buffer_id].pin(self.config.max_usage_count);
            self.stats.hits += 1;
            trace!("buffer hit: page {} in slot {}", page_id, buffer_id);
            return Ok(self.handle(buffer_id, page_id));
        }

        let buffer_id = self.evict()?;
        self.write_back(buffer_id)?;

        // The victim keeps its slot until the read has succeeded
        self.disk_manager.read_page(page_id, &mut self.load_buffer)?;
        std::mem::swap(&mut self.descriptors[buffer_id].page, &mut self.load_buffer);
        self.stats.misses += 1;

        self.install(buffer_id, page_id);
        Ok(self.handle(buffer_id, page_id))
    }

    /// Allocate a new zero-filled page and pin it.
    ///
    /// The page starts clean: unless it is dirtied, it is never written to disk.
    pub fn create_page(&mut self) -> FileResult<PageHandle> {
        let buffer_id = self.evict()?;
        self.write_back(buffer_id)?;

        let page_id = self.disk_manager.allocate_page();
        debug!("allocated page {} into slot {}", page_id, buffer_id);
        self.descriptors[buffer_id].page.fill(0);

        self.install(buffer_id, page_id);
        Ok(self.handle(buffer_id, page_id))
    }

    /// Release one pin
    pub fn unpin(&mut self, handle: PageHandle) -> FileResult<()> {
        let desc = self.pinned_mut(&handle)?;
        desc.ref_count -= 1;
        Ok(())
    }

    /// Borrow the descriptor behind a handle
    pub fn descriptor(&self, handle: &PageHandle) -> FileResult<&BufferDescriptor> {
        let desc = self
            .descriptors
            .get(handle.buffer_id)
            .filter(|d| handle.pool_id == self.pool_id && d.holds_pin(handle.page_id))
            .ok_or(FileError::InvalidHandle {
                buffer_id: handle.buffer_id,
                page_id: handle.page_id,
            })?;
        Ok(desc)
    }

    /// Get the page bytes for reading
    pub fn page(&self, handle: &PageHandle) -> FileResult<&PageData> {
        Ok(&self.descriptor(handle)?.page)
    }

    /// Get the page bytes for writing. This marks the page dirty.
    pub fn page_mut(&mut self, handle: &PageHandle) -> FileResult<&mut PageData> {
        let desc = self.pinned_mut(handle)?;
        desc.dirty = true;
        Ok(&mut desc.page)
    }

    /// Mark a pinned page as modified
    pub fn mark_dirty(&mut self, handle: &PageHandle) -> FileResult<()> {
        self.pinned_mut(handle)?.dirty = true;
        Ok(())
    }

    /// Write a resident page back to disk if it is dirty
    pub fn flush_page(&mut self, page_id: PageId) -> FileResult<()> {
        let buffer_id = *self
            .buffer_table
            .get(&page_id)
            .ok_or(FileError::PageNotResident(page_id))?;
        self.write_back(buffer_id)?;
        Ok(())
    }

    /// Write every dirty page back to disk
    pub fn flush_all(&mut self) -> FileResult<()> {
        for buffer_id in 0..self.descriptors.len() {
            self.write_back(buffer_id)?;
        }

        if self.config.sync_on_flush {
            self.disk_manager.sync()?;
        }
        Ok(())
    }

    /// Check if a page is in the buffer pool
    pub fn is_page_cached(&self, page_id: PageId) -> bool {
        self.buffer_table.contains_key(&page_id)
    }

    /// Get the number of pages currently in the buffer pool
    pub fn resident_page_count(&self) -> usize {
        self.buffer_table.len()
    }

    /// Get the number of dirty pages in the buffer pool
    pub fn dirty_page_count(&self) -> usize {
        self.descriptors.iter().filter(|d| d.dirty).count()
    }

    /// Number of slots with at least one outstanding pin
    pub fn pinned_page_count(&self) -> usize {
        self.descriptors.iter().filter(|d| d.ref_count > 0).count()
    }

    fn handle(&self, buffer_id: BufferId, page_id: PageId) -> PageHandle {
        PageHandle {
            pool_id: self.pool_id,
            buffer_id,
            page_id,
        }
    }

    fn pinned_mut(&mut self, handle: &PageHandle) -> FileResult<&mut BufferDescriptor> {
        let pool_id = self.pool_id;
        let desc = self
            .descriptors
            .get_mut(handle.buffer_id)
            .filter(|d| handle.pool_id == pool_id && d.holds_pin(handle.page_id))
            .ok_or(FileError::InvalidHandle {
                buffer_id: handle.buffer_id,
                page_id: handle.page_id,
            })?;
        Ok(desc)
    }

    /// Pick a victim slot with a clock sweep.
    ///
    /// Pinned slots are skipped. An unpinned slot with a usage count is
    /// decremented and passed over; the first unpinned slot found at zero is
    /// the victim. Fails after a full lap of consecutive pinned slots.
    fn evict(&mut self) -> FileResult<BufferId> {
        let pool_size = self.descriptors.len();
        let mut consecutive_pins = 0;

        while consecutive_pins < pool_size {
            let buffer_id = self.clock_hand;
            self.clock_hand = (self.clock_hand + 1) % pool_size;

            let desc = &mut self.descriptors[buffer_id];
            if desc.ref_count > 0 {
                consecutive_pins += 1;
                continue;
            }

            consecutive_pins = 0;
            if desc.usage_count == 0 {
                return Ok(buffer_id);
            }
            desc.usage_count -= 1;
        }

        debug!("no free buffer: all {} slots pinned", pool_size);
        Err(FileError::NoFreeBuffer)
    }

    /// Flush a slot if dirty, under the id of the page it holds
    fn write_back(&mut self, buffer_id: BufferId) -> FileResult<()> {
        let desc = &mut self.descriptors[buffer_id];
        if desc.dirty
            && let Some(page_id) = desc.page_id
        {
            debug!("writing back page {} from slot {}", page_id, buffer_id);
            self.disk_manager.write_page(page_id, &desc.page)?;
            desc.dirty = false;
            self.stats.flushes += 1;
        }
        Ok(())
    }

    /// Point a (clean, unpinned) victim slot at `page_id`, pin it, and swap
    /// the index entry
    fn install(&mut self, buffer_id: BufferId, page_id: PageId) {
        let desc = &mut self.descriptors[buffer_id];
        let evicted = desc.page_id.replace(page_id);
        desc.dirty = false;
        desc.ref_count = 0;
        desc.usage_count = 0;
        desc.pin(self.config.max_usage_count);

        if let Some(evicted) = evicted {
            debug!(
                "evicted page {} from slot {} for page {}",
                evicted, buffer_id, page_id
            );
            self.buffer_table.remove(&evicted);
            self.stats.evictions += 1;
        }
        self.buffer_table.insert(page_id, buffer_id);
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            warn!("failed to flush buffer pool on drop: {}", e);
        }
    }
}
