//! Allocation requests and their resolved layouts.

use crate::alloc_type::AllocationType;
use crate::error::{Error, Result};
use crate::format::PixelFormatDescriptor;
use crate::geometry::{Geometry, PlaneLayout};
use crate::internal_format::{FormatKind, InternalFormat};
use crate::usage::Usage;

/// One buffer to allocate.
///
/// ```
/// use gralloc::{BufferDescriptor, FormatId, Usage};
///
/// let desc = BufferDescriptor::new(FormatId::NV12.raw() as u64, 1920, 1080)
///     .with_consumer_usage(Usage::GPU_TEXTURE);
/// assert_eq!(desc.layer_count(), 1);
/// assert_eq!(desc.usage(), Usage::GPU_TEXTURE);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct BufferDescriptor {
    format: u64,
    format_kind: FormatKind,
    width: u32,
    height: u32,
    layer_count: u32,
    producer_usage: Usage,
    consumer_usage: Usage,
}

impl BufferDescriptor {
    /// A single-layer request for `format` with no usage.
    pub const fn new(format: u64, width: u32, height: u32) -> Self {
        Self {
            format,
            format_kind: FormatKind::Usage,
            width,
            height,
            layer_count: 1,
            producer_usage: Usage::empty(),
            consumer_usage: Usage::empty(),
        }
    }

    /// Treat the format as an already-encoded internal format.
    pub const fn with_format_kind(mut self, kind: FormatKind) -> Self {
        self.format_kind = kind;
        self
    }

    pub const fn with_layer_count(mut self, layers: u32) -> Self {
        self.layer_count = layers;
        self
    }

    pub const fn with_producer_usage(mut self, usage: Usage) -> Self {
        self.producer_usage = usage;
        self
    }

    pub const fn with_consumer_usage(mut self, usage: Usage) -> Self {
        self.consumer_usage = usage;
        self
    }

    pub const fn format(&self) -> u64 {
        self.format
    }

    pub const fn format_kind(&self) -> FormatKind {
        self.format_kind
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    pub const fn layer_count(&self) -> u32 {
        self.layer_count
    }

    pub const fn producer_usage(&self) -> Usage {
        self.producer_usage
    }

    pub const fn consumer_usage(&self) -> Usage {
        self.consumer_usage
    }

    /// Producer and consumer usage combined.
    pub const fn usage(&self) -> Usage {
        self.producer_usage.union(self.consumer_usage)
    }

    /// Reject shapes no allocation can satisfy.
    pub fn check(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidParameters("width and height must be non-zero"));
        }
        if self.layer_count == 0 {
            return Err(Error::InvalidParameters("layer count must be non-zero"));
        }
        Ok(())
    }
}

/// Everything decided about a descriptor before memory is requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct BufferLayout {
    /// Selected format, possibly naming a multi-plane base.
    pub internal_format: InternalFormat,
    /// Modifiers of `internal_format` on the base format actually laid out.
    pub alloc_format: InternalFormat,
    pub alloc_type: AllocationType,
    /// Catalog entry of the laid-out base format.
    pub format_info: &'static PixelFormatDescriptor,
    /// Dimensions after format-specific padding.
    pub alloc_width: u32,
    pub alloc_height: u32,
    pub geometry: Geometry,
    pub layer_count: u32,
    /// All layers.
    pub size: usize,
}

impl BufferLayout {
    pub fn planes(&self) -> &[PlaneLayout] {
        &self.geometry.planes
    }

    pub fn pixel_stride(&self) -> u32 {
        self.geometry.pixel_stride
    }

    /// Byte offset of layer `index`.
    pub fn layer_offset(&self, index: u32) -> Option<usize> {
        if index >= self.layer_count {
            return None;
        }
        let per_layer = self.size / self.layer_count as usize;
        Some(per_layer * index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatId;

    #[test]
    fn defaults() {
        let d = BufferDescriptor::new(FormatId::RGBA_8888.raw() as u64, 64, 32);
        assert_eq!(d.format_kind(), FormatKind::Usage);
        assert_eq!(d.layer_count(), 1);
        assert!(d.usage().is_empty());
        assert!(d.check().is_ok());
    }

    #[test]
    fn usage_is_union_of_both_sides() {
        let d = BufferDescriptor::new(1, 1, 1)
            .with_producer_usage(Usage::GPU_RENDER_TARGET)
            .with_consumer_usage(Usage::GPU_TEXTURE);
        assert_eq!(d.usage(), Usage::GPU_RENDER_TARGET | Usage::GPU_TEXTURE);
    }

    #[test]
    fn degenerate_shapes() {
        for d in [
            BufferDescriptor::new(1, 0, 16),
            BufferDescriptor::new(1, 16, 0),
            BufferDescriptor::new(1, 16, 16).with_layer_count(0),
        ] {
            assert!(matches!(d.check(), Err(Error::InvalidParameters(_))));
        }
    }
}
