//! Allocated buffer handles.
//!
//! An [`AllocatedBuffer`] is one process's copy of a buffer handle. Every
//! buffer owns a [`SharedAttributes`] region, created by the arena beside
//! the backing memory and named by id in the handle. A process receiving the
//! handle opens the region through its arena, so the buffer can be released
//! from any process that holds it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::alloc_type::AllocationType;
use crate::arena::{BackingMemory, HeapKind, Mapping};
use crate::error::{Error, Result};
use crate::format::{self, MAX_PLANES};
use crate::geometry::PlaneLayout;
use crate::internal_format::InternalFormat;
use crate::usage::Usage;

/// Identifies a structurally valid handle.
pub const HANDLE_MAGIC: u32 = 0x0314_1592;

/// Handle layout version.
pub const HANDLE_VERSION: u32 = 1;

/// YUV colour encoding of a buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum YuvInfo {
    #[default]
    Bt601Narrow,
    Bt601Wide,
    Bt709Narrow,
    Bt709Wide,
}

impl YuvInfo {
    /// Colour info for a buffer of `alloc_format`, or `None` for RGB.
    ///
    /// 10-bit formats are BT.709 wide. Otherwise the usage selector picks the
    /// encoding, defaulting to BT.601 narrow.
    pub fn for_format(alloc_format: InternalFormat, usage: Usage) -> Option<Self> {
        let info = format::find(alloc_format.base())?;
        if !info.is_yuv {
            return None;
        }
        if info.bits_per_sample == 10 {
            return Some(Self::Bt709Wide);
        }
        Some(match usage.yuv_color_space_selector() {
            1 => Self::Bt601Wide,
            2 => Self::Bt709Narrow,
            3 => Self::Bt709Wide,
            _ => Self::Bt601Narrow,
        })
    }
}

/// Fixed-layout region shared by every process holding a buffer.
#[derive(Debug)]
pub struct SharedAttributes {
    ref_count: AtomicU32,
    yuv_info: Option<YuvInfo>,
}

impl SharedAttributes {
    /// A region holding one reference.
    pub fn new(yuv_info: Option<YuvInfo>) -> Self {
        Self {
            ref_count: AtomicU32::new(1),
            yuv_info,
        }
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn yuv_info(&self) -> Option<YuvInfo> {
        self.yuv_info
    }

    /// Add a reference. Fails once the count has reached zero.
    pub(crate) fn retain(&self) -> Result<u32> {
        self.ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n == 0 { None } else { n.checked_add(1) }
            })
            .map(|prev| prev + 1)
            .map_err(|_| Error::BadHandle)
    }

    /// Drop a reference and return the remaining count. Exactly one caller
    /// sees zero.
    pub(crate) fn release(&self) -> Result<u32> {
        self.ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|prev| prev - 1)
            .map_err(|_| Error::BadHandle)
    }
}

/// A [`SharedAttributes`] region opened in this process.
#[derive(Clone, Debug)]
pub struct AttributeRegion {
    id: u64,
    shared: Arc<SharedAttributes>,
}

impl AttributeRegion {
    pub fn new(id: u64, shared: Arc<SharedAttributes>) -> Self {
        Self { id, shared }
    }

    /// Arena-wide region id, carried in every copy of the handle.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn attributes(&self) -> &SharedAttributes {
        &self.shared
    }

    /// Whether both views open the same region.
    pub fn same_region(&self, other: &AttributeRegion) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

/// A buffer handle as seen by one process.
#[derive(Debug)]
pub struct AllocatedBuffer {
    pub(crate) magic: u32,
    pub(crate) version: u32,
    pub(crate) req_format: u64,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) alloc_width: u32,
    pub(crate) alloc_height: u32,
    pub(crate) producer_usage: Usage,
    pub(crate) consumer_usage: Usage,
    pub(crate) internal_format: InternalFormat,
    pub(crate) alloc_format: InternalFormat,
    pub(crate) alloc_type: AllocationType,
    pub(crate) planes: [PlaneLayout; MAX_PLANES],
    pub(crate) pixel_stride: u32,
    pub(crate) size: usize,
    pub(crate) layer_count: u32,
    pub(crate) backing: BackingMemory,
    pub(crate) backing_store_id: u64,
    pub(crate) backing_store_size: usize,
    pub(crate) attributes: AttributeRegion,
    pub(crate) allocating_pid: u32,
    pub(crate) remote_pid: Option<u32>,
    pub(crate) mapping: Option<Mapping>,
    pub(crate) write_owner: bool,
}

impl AllocatedBuffer {
    /// Check the handle's magic and version.
    pub fn validate(&self) -> Result<()> {
        if self.magic != HANDLE_MAGIC || self.version != HANDLE_VERSION {
            log::error!(
                "invalid buffer handle: magic {:#x} version {}",
                self.magic,
                self.version
            );
            return Err(Error::BadHandle);
        }
        Ok(())
    }

    /// A copy of this handle as received by another process, with the
    /// attribute region opened there. Nothing is mapped.
    pub(crate) fn received(&self, attributes: AttributeRegion) -> Self {
        Self {
            backing: self.backing.clone(),
            attributes,
            mapping: None,
            write_owner: false,
            ..*self
        }
    }

    /// Requested width and height.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Width and height after format-specific padding.
    pub fn alloc_dimensions(&self) -> (u32, u32) {
        (self.alloc_width, self.alloc_height)
    }

    /// The format value the caller asked for.
    pub fn requested_format(&self) -> u64 {
        self.req_format
    }

    pub fn internal_format(&self) -> InternalFormat {
        self.internal_format
    }

    /// The format the memory is laid out in. Differs from
    /// [`AllocatedBuffer::internal_format`] after a single-plane AFBC fallback.
    pub fn alloc_format(&self) -> InternalFormat {
        self.alloc_format
    }

    pub fn alloc_type(&self) -> &AllocationType {
        &self.alloc_type
    }

    /// Plane 0 stride in pixels.
    pub fn stride(&self) -> u32 {
        self.pixel_stride
    }

    /// Plane 0 stride in bytes.
    pub fn byte_stride(&self) -> u32 {
        self.planes[0].byte_stride
    }

    pub fn planes(&self) -> &[PlaneLayout; MAX_PLANES] {
        &self.planes
    }

    /// Whether more than one plane is stored.
    pub fn is_multi_plane(&self) -> bool {
        self.planes[1].is_used()
    }

    pub fn producer_usage(&self) -> Usage {
        self.producer_usage
    }

    pub fn consumer_usage(&self) -> Usage {
        self.consumer_usage
    }

    pub fn usage(&self) -> Usage {
        self.producer_usage | self.consumer_usage
    }

    pub fn layer_count(&self) -> u32 {
        self.layer_count
    }

    /// Bytes used by this buffer, all layers included.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Process-unique id of the backing memory. Buffers allocated together
    /// with shared memory report the same id.
    pub fn backing_store_id(&self) -> u64 {
        self.backing_store_id
    }

    /// Size of the backing memory, at least [`AllocatedBuffer::size`].
    pub fn backing_store_size(&self) -> usize {
        self.backing_store_size
    }

    pub fn heap(&self) -> HeapKind {
        self.backing.heap()
    }

    pub fn min_page_size(&self) -> usize {
        self.backing.min_page_size()
    }

    pub fn yuv_info(&self) -> Option<YuvInfo> {
        self.attributes.attributes().yuv_info()
    }

    /// References held across every process.
    pub fn ref_count(&self) -> u32 {
        self.attributes.attributes().ref_count()
    }

    /// Id of the shared attribute region.
    pub fn attributes_id(&self) -> u64 {
        self.attributes.id()
    }

    pub fn allocating_pid(&self) -> u32 {
        self.allocating_pid
    }

    pub fn remote_pid(&self) -> Option<u32> {
        self.remote_pid
    }

    /// The CPU mapping in this process, if mapped.
    pub fn mapping(&self) -> Option<&Mapping> {
        self.mapping.as_ref()
    }

    /// Whether the last lock asked for CPU write access.
    pub fn is_write_owner(&self) -> bool {
        self.write_owner
    }

    /// Whether `self` and `other` are backed by the same memory.
    pub fn shares_backing_with(&self, other: &AllocatedBuffer) -> bool {
        self.backing_store_id == other.backing_store_id
    }
}
