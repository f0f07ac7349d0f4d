//! Graphics buffer allocation for GPU, display, video and camera pipelines.
//!
//! Given a requested pixel format, dimensions and usage flags naming the
//! hardware blocks that will produce and consume a buffer, this crate picks
//! the internal format (possibly AFBC compressed), computes the byte-level
//! layout of every plane, and obtains backing memory for it:
//!
//! - [`FormatSelector`] turns a requested format and usage into an
//!   [`InternalFormat`] against per-block [`CapabilityMask`]s
//! - [`AllocationType`] decodes the AFBC modifiers of an internal format
//! - [`GeometryCalculator`] / [`StandardGeometry`] lay out strides, offsets
//!   and sizes
//! - [`Allocator`] drives the above per [`BufferDescriptor`], shares memory
//!   between batched descriptors, and manages [`AllocatedBuffer`] lifetime
//! - [`Allocator::lock`], [`Allocator::lock_ycbcr`] and
//!   [`Allocator::lock_flex`] give the CPU access to uncompressed buffers
//!
//! Physical memory comes from a [`MemoryArena`] and hardware capabilities
//! from a [`CapabilityProbe`]; [`HeapArena`] and [`StaticProbe`] are
//! in-process implementations.

#![forbid(unsafe_code)]

mod access;
mod afbc;
mod alloc_type;
mod allocator;
mod arena;
mod capabilities;
mod config;
mod descriptor;
mod error;
mod format;
mod geometry;
mod handle;
mod internal_format;
mod select;
mod usage;

pub use access::{
    Fence, FlexComponent, FlexFormat, FlexLayout, FlexPlane, Rect, YCbCrLayout, test_lock_usage,
};
pub use afbc::{HeaderLayout, init_planes as init_afbc_planes, write_headers as write_afbc_headers};
pub use alloc_type::{AllocationType, BlockKind, afbc_format_fallback};
pub use allocator::Allocator;
pub use arena::{
    BackingMemory, HeapArena, HeapFlags, HeapKind, Mapping, MemoryArena, allocate_with_fallback,
    heap_flags, pick_heap,
};
pub use capabilities::{
    BlockCapabilities, CapabilityCache, CapabilityMask, CapabilityProbe, HardwareBlock,
    HardwareTarget, NoProbe, StaticProbe,
};
pub use config::{AFBC_MIN_DISPLAY_PERCENT, AllocatorConfig};
pub use descriptor::{BufferDescriptor, BufferLayout};
pub use error::{Error, Result};
pub use format::{FormatId, MAX_PLANES, PixelFormatDescriptor};
pub use geometry::{Geometry, GeometryCalculator, PlaneLayout, StandardGeometry, layered_size};
pub use handle::{
    AllocatedBuffer, AttributeRegion, HANDLE_MAGIC, HANDLE_VERSION, SharedAttributes, YuvInfo,
};
pub use internal_format::{AfbcModifiers, FormatKind, InternalFormat};
pub use select::FormatSelector;
pub use usage::{ConsumerRole, ProducerRole, Usage, classify_consumer, classify_producer};

/// The format catalog.
pub mod formats {
    pub use crate::format::{all, find, is_afbc_supported, is_yuv, single_plane_afbc_equivalent};
}
