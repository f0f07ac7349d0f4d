//! Allocation orchestration and buffer lifetime.
//!
//! [`Allocator`] runs format selection, allocation-type resolution and
//! geometry for each descriptor, obtains backing memory from a
//! [`MemoryArena`] and hands back [`AllocatedBuffer`] handles. It also
//! implements retain and release, which may be called from any process
//! holding a copy of a handle.
//!
//! ```
//! use std::sync::Arc;
//! use gralloc::{Allocator, AllocatorConfig, BufferDescriptor, FormatId, HeapArena, Usage};
//!
//! let allocator = Allocator::new(AllocatorConfig::new(), Arc::new(HeapArena::new()));
//! let desc = BufferDescriptor::new(FormatId::RGBA_8888.raw() as u64, 64, 64)
//!     .with_producer_usage(Usage::CPU_WRITE_OFTEN)
//!     .with_consumer_usage(Usage::CPU_READ_OFTEN);
//! let buffers = allocator.allocate(&[desc]).unwrap();
//! assert_eq!(buffers[0].byte_stride(), 256);
//! for buffer in buffers {
//!     allocator.free(buffer).unwrap();
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::afbc;
use crate::alloc_type::{AllocationType, afbc_format_fallback};
use crate::arena::{self, BackingMemory, HeapKind, Mapping, MemoryArena};
use crate::capabilities::{BlockCapabilities, CapabilityCache, CapabilityProbe, NoProbe};
use crate::config::AllocatorConfig;
use crate::descriptor::{BufferDescriptor, BufferLayout};
use crate::error::{Error, Result};
use crate::format;
use crate::geometry::{GeometryCalculator, StandardGeometry, layered_size};
use crate::handle::{
    AllocatedBuffer, AttributeRegion, HANDLE_MAGIC, HANDLE_VERSION, SharedAttributes, YuvInfo,
};
use crate::select::FormatSelector;
use crate::usage::Usage;

/// Allocation counter shared by every allocator in the process.
static NEXT_BACKING_STORE_ID: AtomicU32 = AtomicU32::new(0);

/// Allocates buffers for one process.
pub struct Allocator {
    config: AllocatorConfig,
    caps: CapabilityCache,
    arena: Arc<dyn MemoryArena>,
    geometry: Arc<dyn GeometryCalculator>,
    pid: u32,
}

impl Allocator {
    /// An allocator for the current process that finds no capability
    /// modules and uses the static defaults of `config`'s hardware target.
    pub fn new(config: AllocatorConfig, arena: Arc<dyn MemoryArena>) -> Self {
        let caps = CapabilityCache::new(Arc::new(NoProbe), *config.hardware());
        Self {
            config,
            caps,
            arena,
            geometry: Arc::new(StandardGeometry),
            pid: std::process::id(),
        }
    }

    /// Discover capabilities through `probe`, on first allocation.
    pub fn with_probe(mut self, probe: Arc<dyn CapabilityProbe>) -> Self {
        self.caps = CapabilityCache::new(probe, *self.config.hardware());
        self
    }

    /// Use `caps` without probing.
    pub fn with_capabilities(mut self, caps: BlockCapabilities) -> Self {
        self.caps = CapabilityCache::preset(caps);
        self
    }

    pub fn with_geometry(mut self, geometry: Arc<dyn GeometryCalculator>) -> Self {
        self.geometry = geometry;
        self
    }

    /// Act as process `pid`.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn arena(&self) -> &Arc<dyn MemoryArena> {
        &self.arena
    }

    /// Resolved capability masks, probing on first use.
    pub fn capabilities(&self) -> &BlockCapabilities {
        self.caps.get()
    }

    fn selector(&self) -> FormatSelector<'_> {
        FormatSelector::new(self.caps.get(), &self.config)
    }

    // -----------------------------------------------------------------------
    // Layout
    // -----------------------------------------------------------------------

    /// Decide format, allocation type and geometry for `desc` without
    /// allocating memory.
    pub fn resolve(&self, desc: &BufferDescriptor) -> Result<BufferLayout> {
        desc.check()?;
        let usage = desc.usage();
        let unsupported = Error::UnsupportedFormat {
            format: desc.format(),
            usage: usage.bits(),
        };
        let selector = self.selector();

        let pixel_count = desc.width() as u64 * desc.height() as u64;
        let internal_format = selector
            .select(desc.format(), desc.format_kind(), usage, pixel_count)
            .ok_or_else(|| {
                log::error!(
                    "unrecognized format {:#x} for usage {:#x}",
                    desc.format(),
                    usage.bits()
                );
                unsupported.clone()
            })?;
        let selected_info = format::find(internal_format.base()).ok_or_else(|| unsupported.clone())?;

        let mut alloc_type = AllocationType::resolve(internal_format, selected_info, usage)?;
        let mut format_info = selected_info;
        if alloc_type.is_afbc() {
            format_info = afbc_format_fallback(
                selected_info,
                usage,
                self.caps.get(),
                !alloc_type.multi_plane,
            )
            .ok_or_else(|| unsupported.clone())?;
            if !format_info.is_multi_plane() {
                alloc_type.multi_plane = false;
            }
        }
        let alloc_format = internal_format.with_base(format_info.id);
        alloc_type.validate(format_info, desc.height())?;

        let (alloc_width, alloc_height) =
            selector.adjust_dimensions(internal_format, usage, desc.width(), desc.height())?;
        let geometry = self.geometry.compute(
            alloc_width,
            alloc_height,
            &alloc_type,
            format_info,
            usage.has_cpu(),
            usage.has_hw(),
        )?;
        let size = layered_size(geometry.size, desc.layer_count(), &alloc_type)?;

        log::debug!(
            "layout: {:#x} {}x{} -> {alloc_format:?} {alloc_type:?}, {size} bytes",
            desc.format(),
            desc.width(),
            desc.height()
        );
        Ok(BufferLayout {
            internal_format,
            alloc_format,
            alloc_type,
            format_info,
            alloc_width,
            alloc_height,
            geometry,
            layer_count: desc.layer_count(),
            size,
        })
    }

    // -----------------------------------------------------------------------
    // Allocation
    // -----------------------------------------------------------------------

    /// Allocate one buffer per descriptor.
    ///
    /// Descriptors that land on the same heap with the same flags share one
    /// block of memory sized for the largest of them. Either every buffer is
    /// returned or none is, and nothing stays allocated after a failure.
    pub fn allocate(&self, descriptors: &[BufferDescriptor]) -> Result<Vec<AllocatedBuffer>> {
        if descriptors.is_empty() {
            return Err(Error::InvalidParameters("no descriptors"));
        }
        let layouts = descriptors
            .iter()
            .map(|desc| self.resolve(desc))
            .collect::<Result<Vec<_>>>()?;

        let shared = self.is_shareable(descriptors);
        let backings = if shared {
            self.allocate_shared(descriptors, &layouts)?
        } else {
            self.allocate_each(descriptors, &layouts)?
        };

        let mappings = match self.map_all(descriptors, &backings) {
            Ok(mappings) => mappings,
            Err(err) => {
                self.free_all(&backings);
                return Err(err);
            }
        };

        if !shared && self.config.init_afbc_headers() {
            for (layout, mapping) in layouts.iter().zip(&mappings) {
                let Some(mapping) = mapping else { continue };
                if !layout.alloc_type.is_afbc() {
                    continue;
                }
                let multi_plane = layout.geometry.planes[1].is_used();
                let init = mapping.with_bytes_mut(|bytes| {
                    afbc::init_planes(
                        bytes,
                        &layout.geometry.planes,
                        layout.internal_format,
                        multi_plane,
                    )
                });
                if let Err(err) = init {
                    self.free_all(&backings);
                    return Err(err);
                }
            }
        }

        let regions = match self.create_regions(descriptors, &layouts) {
            Ok(regions) => regions,
            Err(err) => {
                self.free_all(&backings);
                return Err(err);
            }
        };

        let batch_id = shared.then(|| self.next_backing_store_id());
        let buffers = descriptors
            .iter()
            .zip(layouts.into_iter().zip(regions))
            .zip(backings.into_iter().zip(mappings))
            .map(|((desc, (layout, region)), (backing, mapping))| {
                let backing_store_id = batch_id.unwrap_or_else(|| self.next_backing_store_id());
                self.make_handle(desc, layout, backing, mapping, region, backing_store_id)
            })
            .collect();
        Ok(buffers)
    }

    /// One attribute region per buffer, each holding one reference.
    fn create_regions(
        &self,
        descriptors: &[BufferDescriptor],
        layouts: &[BufferLayout],
    ) -> Result<Vec<AttributeRegion>> {
        let mut regions: Vec<AttributeRegion> = Vec::with_capacity(descriptors.len());
        for (desc, layout) in descriptors.iter().zip(layouts) {
            let yuv_info = YuvInfo::for_format(layout.alloc_format, desc.usage());
            match self.arena.create_attributes(SharedAttributes::new(yuv_info)) {
                Ok(region) => regions.push(region),
                Err(err) => {
                    log::error!("attribute region could not be created: {err}");
                    for region in &regions {
                        self.arena.free_attributes(region.id());
                    }
                    return Err(err);
                }
            }
        }
        Ok(regions)
    }

    fn next_backing_store_id(&self) -> u64 {
        let counter = NEXT_BACKING_STORE_ID.fetch_add(1, Ordering::Relaxed);
        ((self.pid as u64) << 32) | counter as u64
    }

    /// Whether every descriptor picks the same heap with the same flags.
    fn is_shareable(&self, descriptors: &[BufferDescriptor]) -> bool {
        if descriptors.len() < 2 {
            return false;
        }
        let mut policy = None;
        for desc in descriptors {
            let usage = desc.usage();
            let Some(heap) = arena::pick_heap(usage, &self.config) else {
                return false;
            };
            let this = (heap, arena::heap_flags(heap, usage));
            match policy {
                Some(first) if first != this => return false,
                Some(_) => {}
                None => policy = Some(this),
            }
        }
        true
    }

    fn heap_for(&self, usage: Usage, size: usize) -> Result<HeapKind> {
        arena::pick_heap(usage, &self.config).ok_or(Error::AllocationExhausted {
            heap: HeapKind::Secure,
            size,
        })
    }

    fn allocate_shared(
        &self,
        descriptors: &[BufferDescriptor],
        layouts: &[BufferLayout],
    ) -> Result<Vec<BackingMemory>> {
        // first of the largest
        let (largest, size) = layouts
            .iter()
            .enumerate()
            .fold((0, 0), |(best, max), (i, l)| if l.size > max { (i, l.size) } else { (best, max) });
        let usage = descriptors[largest].usage();
        let heap = self.heap_for(usage, size)?;
        let first = arena::allocate_with_fallback(self.arena.as_ref(), size, heap, usage)?;
        log::debug!(
            "shared allocation of {size} bytes for {} buffers from {:?}",
            descriptors.len(),
            first.heap()
        );

        let mut backings = Vec::with_capacity(descriptors.len());
        for _ in 1..descriptors.len() {
            match self.arena.duplicate(&first) {
                Ok(dup) => backings.push(dup),
                Err(err) => {
                    log::error!("shared memory could not be duplicated: {err}");
                    self.free_all(&backings);
                    self.arena.free(&first);
                    return Err(err);
                }
            }
        }
        backings.insert(0, first);
        Ok(backings)
    }

    fn allocate_each(
        &self,
        descriptors: &[BufferDescriptor],
        layouts: &[BufferLayout],
    ) -> Result<Vec<BackingMemory>> {
        let mut backings = Vec::with_capacity(descriptors.len());
        for (i, (desc, layout)) in descriptors.iter().zip(layouts).enumerate() {
            let usage = desc.usage();
            let allocated = self
                .heap_for(usage, layout.size)
                .and_then(|heap| arena::allocate_with_fallback(self.arena.as_ref(), layout.size, heap, usage));
            match allocated {
                Ok(backing) => backings.push(backing),
                Err(err) => {
                    log::error!("allocation failed for descriptor {i}: {err}");
                    self.free_all(&backings);
                    return Err(err);
                }
            }
        }
        Ok(backings)
    }

    /// Map every buffer the CPU may touch. Protected memory stays unmapped.
    fn map_all(
        &self,
        descriptors: &[BufferDescriptor],
        backings: &[BackingMemory],
    ) -> Result<Vec<Option<Mapping>>> {
        descriptors
            .iter()
            .zip(backings)
            .map(|(desc, backing)| {
                if desc.usage().contains(Usage::PROTECTED) {
                    return Ok(None);
                }
                self.arena
                    .map(backing)
                    .map(Some)
                    .inspect_err(|err| log::error!("mapping backing memory #{} failed: {err}", backing.id()))
            })
            .collect()
    }

    fn free_all(&self, backings: &[BackingMemory]) {
        for backing in backings {
            self.arena.free(backing);
        }
    }

    fn make_handle(
        &self,
        desc: &BufferDescriptor,
        layout: BufferLayout,
        backing: BackingMemory,
        mapping: Option<Mapping>,
        attributes: AttributeRegion,
        backing_store_id: u64,
    ) -> AllocatedBuffer {
        AllocatedBuffer {
            magic: HANDLE_MAGIC,
            version: HANDLE_VERSION,
            req_format: desc.format(),
            width: desc.width(),
            height: desc.height(),
            alloc_width: layout.alloc_width,
            alloc_height: layout.alloc_height,
            producer_usage: desc.producer_usage(),
            consumer_usage: desc.consumer_usage(),
            internal_format: layout.internal_format,
            alloc_format: layout.alloc_format,
            alloc_type: layout.alloc_type,
            planes: layout.geometry.planes,
            pixel_stride: layout.geometry.pixel_stride,
            size: layout.size,
            layer_count: layout.layer_count,
            backing_store_size: backing.size(),
            backing,
            backing_store_id,
            attributes,
            allocating_pid: self.pid,
            remote_pid: None,
            mapping,
            write_owner: false,
        }
    }

    // -----------------------------------------------------------------------
    // Lifetime
    // -----------------------------------------------------------------------

    /// Receive a handle sent from another process. The attribute region is
    /// opened through this allocator's arena; the memory is not mapped until
    /// the copy is retained.
    pub fn import(&self, buffer: &AllocatedBuffer) -> Result<AllocatedBuffer> {
        buffer.validate()?;
        let attributes = self.arena.open_attributes(buffer.attributes_id())?;
        Ok(buffer.received(attributes))
    }

    /// Take a reference to `buffer`. The first retain in a process that did
    /// not allocate the buffer maps it.
    pub fn retain(&self, buffer: &mut AllocatedBuffer) -> Result<()> {
        buffer.validate()?;
        let known = buffer.allocating_pid == self.pid || buffer.remote_pid == Some(self.pid);
        if !known {
            if !buffer.usage().contains(Usage::PROTECTED) {
                let mapping = self.arena.map(&buffer.backing).inspect_err(|err| {
                    log::error!(
                        "mapping buffer {:#x} in process {} failed: {err}",
                        buffer.backing_store_id,
                        self.pid
                    )
                })?;
                buffer.mapping = Some(mapping);
            }
            buffer.remote_pid = Some(self.pid);
        }
        let count = buffer.attributes.attributes().retain()?;
        log::trace!("retain {:#x}: {count} references", buffer.backing_store_id);
        Ok(())
    }

    /// Drop a reference to `buffer`. Returns `true` when this was the last
    /// reference and the backing memory has been released.
    pub fn release(&self, buffer: &mut AllocatedBuffer) -> Result<bool> {
        buffer.validate()?;
        if buffer.allocating_pid != self.pid && buffer.remote_pid != Some(self.pid) {
            log::error!(
                "process {} releasing buffer {:#x} it does not hold",
                self.pid,
                buffer.backing_store_id
            );
            return Err(Error::BadHandle);
        }
        let remaining = buffer.attributes.attributes().release().inspect_err(|_| {
            log::error!("buffer {:#x} released too many times", buffer.backing_store_id)
        })?;
        if remaining > 0 {
            log::trace!("release {:#x}: {remaining} references left", buffer.backing_store_id);
            return Ok(false);
        }
        buffer.mapping = None;
        buffer.write_owner = false;
        self.arena.free_attributes(buffer.attributes_id());
        self.arena.free(&buffer.backing);
        log::debug!("freed buffer {:#x}", buffer.backing_store_id);
        Ok(true)
    }

    /// Release the reference held by a handle and drop it.
    pub fn free(&self, mut buffer: AllocatedBuffer) -> Result<()> {
        self.release(&mut buffer).map(|_| ())
    }
}

impl core::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Allocator")
            .field("config", &self.config)
            .field("caps", &self.caps)
            .field("geometry", &self.geometry)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::HeapArena;
    use crate::capabilities::CapabilityMask;
    use crate::format::FormatId;
    use crate::internal_format::AfbcModifiers;

    fn allocator(arena: &Arc<HeapArena>) -> Allocator {
        Allocator::new(AllocatorConfig::new(), arena.clone()).with_pid(100)
    }

    fn rgbx(size: u32) -> BufferDescriptor {
        BufferDescriptor::new(FormatId::RGBX_8888.raw() as u64, size, size)
            .with_producer_usage(Usage::GPU_RENDER_TARGET)
            .with_consumer_usage(Usage::GPU_TEXTURE)
    }

    #[test]
    fn single_buffer_gets_own_id() {
        let arena = Arc::new(HeapArena::new());
        let alloc = allocator(&arena);
        let a = alloc.allocate(&[rgbx(64)]).unwrap().remove(0);
        let b = alloc.allocate(&[rgbx(64)]).unwrap().remove(0);
        assert_eq!(a.backing_store_id() >> 32, 100);
        assert_eq!(b.backing_store_id() >> 32, 100);
        assert!(b.backing_store_id() as u32 > a.backing_store_id() as u32);
        assert_ne!(a.attributes_id(), b.attributes_id());
        assert_eq!(a.allocating_pid(), 100);
        assert_eq!(a.ref_count(), 1);
        assert!(a.mapping().is_some());
        assert_eq!(arena.allocation_count(), 2);
    }

    #[test]
    fn allocators_in_one_process_never_reuse_ids() {
        let arena = Arc::new(HeapArena::new());
        let first = allocator(&arena);
        let second = allocator(&arena);
        let a = first.allocate(&[rgbx(16)]).unwrap().remove(0);
        let b = second.allocate(&[rgbx(16)]).unwrap().remove(0);
        assert_ne!(a.backing_store_id(), b.backing_store_id());
        assert!(!a.shares_backing_with(&b));
    }

    #[test]
    fn shared_batch_uses_largest_size() {
        let arena = Arc::new(HeapArena::new());
        let alloc = allocator(&arena);
        let buffers = alloc.allocate(&[rgbx(32), rgbx(128), rgbx(64)]).unwrap();
        assert_eq!(arena.allocation_count(), 1);
        let largest = buffers[1].size();
        for b in &buffers {
            assert_eq!(b.backing_store_size(), largest);
            assert!(b.backing_store_size() >= b.size());
            assert!(b.shares_backing_with(&buffers[0]));
        }
    }

    #[test]
    fn differing_heaps_are_not_shared() {
        let arena = Arc::new(HeapArena::new());
        let alloc = allocator(&arena);
        let composer = rgbx(64).with_consumer_usage(Usage::COMPOSER_OVERLAY);
        let buffers = alloc.allocate(&[rgbx(64), composer]).unwrap();
        assert_eq!(arena.allocation_count(), 2);
        assert_eq!(buffers[0].heap(), HeapKind::System);
        assert_eq!(buffers[1].heap(), HeapKind::Compound);
        assert!(!buffers[0].shares_backing_with(&buffers[1]));
    }

    #[test]
    fn protected_without_secure_heap_fails() {
        let arena = Arc::new(HeapArena::new());
        let alloc = allocator(&arena);
        let desc = rgbx(64).with_consumer_usage(Usage::PROTECTED);
        assert!(matches!(
            alloc.allocate(&[desc]),
            Err(Error::AllocationExhausted { heap: HeapKind::Secure, .. })
        ));
        assert_eq!(arena.live_allocations(), 0);
    }

    #[test]
    fn protected_buffers_are_not_mapped() {
        let arena = Arc::new(HeapArena::new());
        let alloc = Allocator::new(AllocatorConfig::new().with_secure_heap(true), arena.clone());
        let desc = rgbx(64).with_consumer_usage(Usage::PROTECTED);
        let buffer = alloc.allocate(&[desc]).unwrap().remove(0);
        assert_eq!(buffer.heap(), HeapKind::Secure);
        assert!(buffer.mapping().is_none());
    }

    #[test]
    fn map_failure_releases_memory() {
        let arena = Arc::new(HeapArena::new().unmappable());
        let alloc = allocator(&arena);
        assert!(alloc.allocate(&[rgbx(64), rgbx(64)]).is_err());
        assert!(arena.map_failed());
        assert_eq!(arena.live_allocations(), 0);
    }

    #[test]
    fn afbc_headers_are_written() {
        let arena = Arc::new(HeapArena::new());
        let caps = BlockCapabilities {
            gpu: CapabilityMask::OPTIONS_PRESENT | CapabilityMask::AFBC_BASIC,
            ..Default::default()
        };
        let alloc = allocator(&arena).with_capabilities(caps);
        let desc = BufferDescriptor::new(FormatId::RGBA_8888.raw() as u64, 64, 64)
            .with_producer_usage(Usage::GPU_RENDER_TARGET)
            .with_consumer_usage(Usage::GPU_TEXTURE);
        let buffer = alloc.allocate(&[desc]).unwrap().remove(0);
        assert!(buffer.alloc_format().modifiers().contains(AfbcModifiers::BASIC));
        let mut word = [0u8; 4];
        buffer.mapping().unwrap().read(0, &mut word).unwrap();
        assert_eq!(u32::from_le_bytes(word), 1024);
    }

    #[test]
    fn header_init_can_be_disabled() {
        let arena = Arc::new(HeapArena::new());
        let caps = BlockCapabilities {
            gpu: CapabilityMask::OPTIONS_PRESENT | CapabilityMask::AFBC_BASIC,
            ..Default::default()
        };
        let alloc = Allocator::new(AllocatorConfig::new().with_init_afbc_headers(false), arena.clone())
            .with_capabilities(caps);
        let desc = BufferDescriptor::new(FormatId::RGBA_8888.raw() as u64, 64, 64)
            .with_producer_usage(Usage::GPU_RENDER_TARGET)
            .with_consumer_usage(Usage::GPU_TEXTURE);
        let buffer = alloc.allocate(&[desc]).unwrap().remove(0);
        assert!(buffer.alloc_type().is_afbc());
        let zeros = buffer.mapping().unwrap().with_bytes(|b| b.iter().all(|&x| x == 0));
        assert!(zeros);
    }

    #[test]
    fn empty_batch_is_invalid() {
        let arena = Arc::new(HeapArena::new());
        assert!(matches!(
            allocator(&arena).allocate(&[]),
            Err(Error::InvalidParameters(_))
        ));
    }

    #[test]
    fn remote_retain_maps_and_release_frees_once() {
        let arena = Arc::new(HeapArena::new());
        let local = allocator(&arena);
        let remote = Allocator::new(AllocatorConfig::new(), arena.clone()).with_pid(200);

        let mut buffer = local.allocate(&[rgbx(64)]).unwrap().remove(0);
        let mut copy = remote.import(&buffer).unwrap();
        assert!(copy.mapping().is_none());
        remote.retain(&mut copy).unwrap();
        assert_eq!(copy.remote_pid(), Some(200));
        assert!(copy.mapping().unwrap().shares_memory_with(buffer.mapping().unwrap()));
        assert_eq!(buffer.ref_count(), 2);

        assert!(!local.release(&mut buffer).unwrap());
        assert_eq!(arena.live_allocations(), 1);
        assert!(remote.release(&mut copy).unwrap());
        assert_eq!(arena.live_allocations(), 0);
        assert!(copy.mapping().is_none());
        assert_eq!(remote.release(&mut copy), Err(Error::BadHandle));
    }

    #[test]
    fn attribute_region_lives_until_last_release() {
        let arena = Arc::new(HeapArena::new());
        let local = allocator(&arena);
        let remote = Allocator::new(AllocatorConfig::new(), arena.clone()).with_pid(200);

        let mut buffer = local.allocate(&[rgbx(64)]).unwrap().remove(0);
        assert_eq!(arena.live_attribute_regions(), 1);
        let copy = remote.import(&buffer).unwrap();
        assert_eq!(copy.attributes_id(), buffer.attributes_id());
        assert!(copy.attributes.same_region(&buffer.attributes));

        assert!(local.release(&mut buffer).unwrap());
        assert_eq!(arena.live_attribute_regions(), 0);
        assert!(matches!(remote.import(&buffer), Err(Error::BadHandle)));
    }

    #[test]
    fn import_needs_the_owning_arena() {
        let local = allocator(&Arc::new(HeapArena::new()));
        let elsewhere = allocator(&Arc::new(HeapArena::new())).with_pid(400);
        let buffer = local.allocate(&[rgbx(64)]).unwrap().remove(0);
        assert!(matches!(elsewhere.import(&buffer), Err(Error::BadHandle)));
    }

    #[test]
    fn shared_batch_buffers_count_references_separately() {
        let arena = Arc::new(HeapArena::new());
        let alloc = allocator(&arena);
        let mut buffers = alloc.allocate(&[rgbx(64), rgbx(64)]).unwrap();
        assert_eq!(arena.live_attribute_regions(), 2);
        alloc.retain(&mut buffers[0]).unwrap();
        assert_eq!(buffers[0].ref_count(), 2);
        assert_eq!(buffers[1].ref_count(), 1);
        assert!(alloc.release(&mut buffers[1]).unwrap());
        assert_eq!(arena.live_allocations(), 1);
        assert_eq!(arena.live_attribute_regions(), 1);
    }

    #[test]
    fn unrelated_process_cannot_release() {
        let arena = Arc::new(HeapArena::new());
        let local = allocator(&arena);
        let stranger = Allocator::new(AllocatorConfig::new(), arena.clone()).with_pid(300);
        let buffer = local.allocate(&[rgbx(64)]).unwrap().remove(0);
        let mut copy = stranger.import(&buffer).unwrap();
        assert_eq!(stranger.release(&mut copy), Err(Error::BadHandle));
        assert_eq!(buffer.ref_count(), 1);
    }

    #[test]
    fn corrupted_handle_is_rejected() {
        let arena = Arc::new(HeapArena::new());
        let alloc = allocator(&arena);
        let mut buffer = alloc.allocate(&[rgbx(64)]).unwrap().remove(0);
        buffer.magic = 0;
        assert_eq!(alloc.retain(&mut buffer), Err(Error::BadHandle));
        assert!(matches!(alloc.import(&buffer), Err(Error::BadHandle)));
    }
}
