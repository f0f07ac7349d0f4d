//! Backing memory.
//!
//! A [`MemoryArena`] hands out [`BackingMemory`] from a named heap, and the
//! small [`SharedAttributes`] region that travels with each buffer. The OS
//! allocator lives behind this trait; [`HeapArena`] is an in-process arena
//! backed by ordinary heap memory, with switches for simulating missing heaps
//! and exhausted memory.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::config::AllocatorConfig;
use crate::error::{Error, Result};
use crate::handle::{AttributeRegion, SharedAttributes};
use crate::usage::Usage;

const SZ_4K: usize = 4 * 1024;
const SZ_2M: usize = 2 * 1024 * 1024;

/// A physical memory pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeapKind {
    /// Scattered system pages.
    System,
    /// Physically contiguous memory.
    Contiguous,
    /// Large compound pages.
    Compound,
    /// Memory reserved for the framebuffer.
    Framebuffer,
    /// Protected memory. Never falls back.
    Secure,
}

impl HeapKind {
    /// Smallest page the heap backs an allocation of `size` bytes with.
    pub const fn min_page_size(self, size: usize) -> usize {
        match self {
            Self::Contiguous => size,
            Self::Compound => SZ_2M,
            Self::System | Self::Framebuffer | Self::Secure => SZ_4K,
        }
    }
}

bitflags::bitflags! {
    /// Per-allocation heap flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct HeapFlags: u32 {
        const CACHED = 1 << 0;
        const CACHED_NEEDS_SYNC = 1 << 1;
    }
}

/// Choose the heap for `usage`.
///
/// Returns `None` for protected content on a platform without a secure heap.
pub fn pick_heap(usage: Usage, config: &AllocatorConfig) -> Option<HeapKind> {
    if usage.contains(Usage::PROTECTED) {
        if config.secure_heap() {
            Some(HeapKind::Secure)
        } else {
            log::error!("protected memory is not supported on this platform");
            None
        }
    } else if usage.contains(Usage::FRAMEBUFFER) {
        Some(HeapKind::Framebuffer)
    } else if usage.contains(Usage::COMPOSER_OVERLAY) && !usage.contains(Usage::VIDEO_ENCODER) {
        Some(config.composer_heap())
    } else {
        Some(HeapKind::System)
    }
}

/// Flags for an allocation from `heap`. CPU read-often buffers are cached,
/// except on the contiguous heap, which is always uncached.
pub fn heap_flags(heap: HeapKind, usage: Usage) -> HeapFlags {
    if heap != HeapKind::Contiguous && usage.reads_often() {
        HeapFlags::CACHED | HeapFlags::CACHED_NEEDS_SYNC
    } else {
        HeapFlags::empty()
    }
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

/// A CPU view of backing memory. Clones share the same bytes.
#[derive(Clone)]
pub struct Mapping {
    bytes: Arc<RwLock<Box<[u8]>>>,
}

impl Mapping {
    /// Zero-filled memory of `len` bytes, or `None` when the request cannot
    /// be satisfied.
    pub fn try_zeroed(len: usize) -> Option<Self> {
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len).ok()?;
        bytes.resize(len, 0);
        Some(Self {
            bytes: Arc::new(RwLock::new(bytes.into_boxed_slice())),
        })
    }

    pub fn len(&self) -> usize {
        self.with_bytes(<[u8]>::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both mappings view the same memory.
    pub fn shares_memory_with(&self, other: &Mapping) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }

    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.bytes.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.bytes.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Copy `data` in at `offset`.
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.with_bytes_mut(|bytes| {
            let end = offset
                .checked_add(data.len())
                .filter(|&end| end <= bytes.len())
                .ok_or(Error::InvalidParameters("write past end of mapping"))?;
            bytes[offset..end].copy_from_slice(data);
            Ok(())
        })
    }

    /// Fill `buf` from `offset`.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.with_bytes(|bytes| {
            let end = offset
                .checked_add(buf.len())
                .filter(|&end| end <= bytes.len())
                .ok_or(Error::InvalidParameters("read past end of mapping"))?;
            buf.copy_from_slice(&bytes[offset..end]);
            Ok(())
        })
    }
}

impl core::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mapping").field("len", &self.len()).finish()
    }
}

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

/// One open handle to an allocation.
///
/// Duplicated handles share the allocation; the memory is released when the
/// last one is freed.
#[derive(Clone, Debug)]
pub struct BackingMemory {
    id: u64,
    heap: HeapKind,
    flags: HeapFlags,
    size: usize,
    mapping: Mapping,
}

impl BackingMemory {
    pub fn new(id: u64, heap: HeapKind, flags: HeapFlags, mapping: Mapping) -> Self {
        Self {
            id,
            heap,
            flags,
            size: mapping.len(),
            mapping,
        }
    }

    /// Arena-local allocation number, shared by duplicates.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn heap(&self) -> HeapKind {
        self.heap
    }

    pub fn flags(&self) -> HeapFlags {
        self.flags
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn min_page_size(&self) -> usize {
        self.heap.min_page_size(self.size)
    }

    pub(crate) fn mapping(&self) -> &Mapping {
        &self.mapping
    }
}

/// Source of physical memory.
pub trait MemoryArena: Send + Sync {
    /// Allocate `size` zeroed bytes from `heap`.
    fn allocate(&self, size: usize, heap: HeapKind, flags: HeapFlags) -> Result<BackingMemory>;

    /// Open another handle to the same allocation.
    fn duplicate(&self, memory: &BackingMemory) -> Result<BackingMemory>;

    /// Map the memory for CPU access.
    fn map(&self, memory: &BackingMemory) -> Result<Mapping>;

    /// Close one handle.
    fn free(&self, memory: &BackingMemory);

    /// Flush CPU caches for cached memory.
    fn sync(&self, _memory: &BackingMemory) {}

    /// Create the attribute region for a new buffer.
    fn create_attributes(&self, attributes: SharedAttributes) -> Result<AttributeRegion>;

    /// Open an existing attribute region by id.
    fn open_attributes(&self, id: u64) -> Result<AttributeRegion>;

    /// Destroy an attribute region. Views already open stay readable.
    fn free_attributes(&self, id: u64);
}

/// Allocate from `heap`, falling back to the system heap when the preferred
/// heap fails. Secure and system requests do not fall back.
pub fn allocate_with_fallback(
    arena: &dyn MemoryArena,
    size: usize,
    heap: HeapKind,
    usage: Usage,
) -> Result<BackingMemory> {
    match arena.allocate(size, heap, heap_flags(heap, usage)) {
        Ok(memory) => Ok(memory),
        Err(err) if matches!(heap, HeapKind::Secure | HeapKind::System) => {
            log::error!("allocation of {size} bytes from the {heap:?} heap failed: {err}");
            Err(err)
        }
        Err(err) => {
            log::warn!("{heap:?} heap failed ({err}), falling back to the system heap");
            let system = HeapKind::System;
            arena
                .allocate(size, system, heap_flags(system, usage))
                .inspect_err(|err| log::error!("fallback allocation failed: {err}"))
        }
    }
}

/// In-process arena backed by heap memory.
///
/// Every heap is available unless removed with [`HeapArena::without_heap`].
/// [`HeapArena::fail_after`] makes allocations fail once a number of them
/// have succeeded.
#[derive(Debug, Default)]
pub struct HeapArena {
    unavailable: HashSet<HeapKind>,
    fail_after: Option<usize>,
    unmappable: bool,
    next_id: AtomicU64,
    allocations: AtomicUsize,
    map_failed: AtomicBool,
    open: Mutex<HashMap<u64, usize>>,
    next_region: AtomicU64,
    regions: Mutex<HashMap<u64, Arc<SharedAttributes>>>,
}

impl HeapArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every allocation from `heap` fail.
    pub fn without_heap(mut self, heap: HeapKind) -> Self {
        self.unavailable.insert(heap);
        self
    }

    /// Allow `count` successful allocations, then fail.
    pub fn fail_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Make every map request fail.
    pub fn unmappable(mut self) -> Self {
        self.unmappable = true;
        self
    }

    /// Successful allocations so far, not counting duplicates.
    pub fn allocation_count(&self) -> usize {
        self.allocations.load(Ordering::Acquire)
    }

    /// Allocations with at least one open handle.
    pub fn live_allocations(&self) -> usize {
        self.open.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Attribute regions not yet destroyed.
    pub fn live_attribute_regions(&self) -> usize {
        self.regions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether a map request has been refused.
    pub fn map_failed(&self) -> bool {
        self.map_failed.load(Ordering::Acquire)
    }
}

impl MemoryArena for HeapArena {
    fn allocate(&self, size: usize, heap: HeapKind, flags: HeapFlags) -> Result<BackingMemory> {
        if size == 0 {
            return Err(Error::InvalidParameters("allocation size is zero"));
        }
        if self.unavailable.contains(&heap) {
            return Err(Error::AllocationExhausted { heap, size });
        }
        let reserved = self.allocations.fetch_add(1, Ordering::AcqRel);
        if self.fail_after.is_some_and(|limit| reserved >= limit) {
            self.allocations.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::AllocationExhausted { heap, size });
        }

        let Some(mapping) = Mapping::try_zeroed(size) else {
            self.allocations.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::AllocationExhausted { heap, size });
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, 1);
        log::trace!("arena: allocated #{id}, {size} bytes from {heap:?} ({flags:?})");
        Ok(BackingMemory::new(id, heap, flags, mapping))
    }

    fn duplicate(&self, memory: &BackingMemory) -> Result<BackingMemory> {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        let handles = open.get_mut(&memory.id).ok_or(Error::BadHandle)?;
        *handles += 1;
        Ok(memory.clone())
    }

    fn map(&self, memory: &BackingMemory) -> Result<Mapping> {
        if self.unmappable {
            self.map_failed.store(true, Ordering::Release);
            return Err(Error::UnsupportedOperation("memory cannot be mapped"));
        }
        Ok(memory.mapping().clone())
    }

    fn free(&self, memory: &BackingMemory) {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        match open.get_mut(&memory.id) {
            Some(handles) if *handles > 1 => *handles -= 1,
            Some(_) => {
                open.remove(&memory.id);
                log::trace!("arena: released #{}", memory.id);
            }
            None => log::warn!("arena: free of unknown allocation #{}", memory.id),
        }
    }

    fn create_attributes(&self, attributes: SharedAttributes) -> Result<AttributeRegion> {
        let id = self.next_region.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(attributes);
        self.regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&shared));
        Ok(AttributeRegion::new(id, shared))
    }

    fn open_attributes(&self, id: u64) -> Result<AttributeRegion> {
        let regions = self.regions.lock().unwrap_or_else(PoisonError::into_inner);
        let shared = regions.get(&id).ok_or_else(|| {
            log::error!("arena: no attribute region #{id}");
            Error::BadHandle
        })?;
        Ok(AttributeRegion::new(id, Arc::clone(shared)))
    }

    fn free_attributes(&self, id: u64) {
        if self
            .regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_none()
        {
            log::warn!("arena: free of unknown attribute region #{id}");
        }
    }
}
