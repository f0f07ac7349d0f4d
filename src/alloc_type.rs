//! Allocation-type resolution.
//!
//! Interprets the AFBC modifiers of a selected [`InternalFormat`] as a
//! superblock layout, and falls back from multi-plane to single-plane AFBC
//! when the planes cannot be compressed separately.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::capabilities::{BlockCapabilities, CapabilityMask};
use crate::error::{Error, Result};
use crate::format::{self, FormatId, PixelFormatDescriptor};
use crate::internal_format::{AfbcModifiers, InternalFormat};
use crate::usage::{ConsumerRole, ProducerRole, Usage, classify_consumer, classify_producer};

/// Superblock shape of an AFBC plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlockKind {
    #[default]
    Uncompressed,
    /// 16x16
    Basic,
    /// 32x8
    Wide,
    /// 64x4
    ExtraWide,
}

impl BlockKind {
    /// Superblock width and height in pixels; zero when uncompressed.
    pub const fn superblock(self) -> (u32, u32) {
        match self {
            Self::Uncompressed => (0, 0),
            Self::Basic => (16, 16),
            Self::Wide => (32, 8),
            Self::ExtraWide => (64, 4),
        }
    }
}

/// How a buffer is laid out in memory.
///
/// `multi_plane` describes the stored layout. After a single-plane fallback
/// the requested internal format may still name a multi-plane base format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct AllocationType {
    /// Superblock kind of a single-plane buffer or of the luma plane.
    pub primary: BlockKind,
    /// Chroma planes are compressed separately, always with 64x4 superblocks.
    pub multi_plane: bool,
    pub tiled_headers: bool,
    /// Header stride padded to four superblocks.
    pub header_padded: bool,
    /// A second body follows the first for front-buffer rendering.
    pub front_buffer_safe: bool,
}

static WARN_MODIFIER_COMBINATION: AtomicBool = AtomicBool::new(true);

impl AllocationType {
    pub const fn uncompressed(multi_plane: bool) -> Self {
        Self {
            primary: BlockKind::Uncompressed,
            multi_plane,
            tiled_headers: false,
            header_padded: false,
            front_buffer_safe: false,
        }
    }

    #[inline]
    pub const fn is_afbc(&self) -> bool {
        !matches!(self.primary, BlockKind::Uncompressed)
    }

    /// Superblock size of `plane`.
    pub const fn superblock(&self, plane: usize) -> (u32, u32) {
        if plane > 0 && self.is_afbc() && self.multi_plane {
            BlockKind::ExtraWide.superblock()
        } else {
            self.primary.superblock()
        }
    }

    /// Derive the allocation type from the modifiers of `format`.
    pub fn resolve(
        format: InternalFormat,
        info: &PixelFormatDescriptor,
        usage: Usage,
    ) -> Result<Self> {
        let mut alloc = Self::uncompressed(info.is_multi_plane());
        let modifiers = format.modifiers();
        if modifiers.is_empty() {
            return Ok(alloc);
        }

        if modifiers.contains(AfbcModifiers::BASIC)
            && modifiers.intersects(
                AfbcModifiers::SPLIT_BLOCK | AfbcModifiers::WIDE_BLOCK | AfbcModifiers::TILED_HEADERS,
            )
            && WARN_MODIFIER_COMBINATION.swap(false, Ordering::Relaxed)
        {
            log::warn!(
                "AFBC modifier bits are not mutually exclusive: basic is always set, check the extended bits"
            );
        }

        let reject = || Error::UnsupportedFormat {
            format: format.raw(),
            usage: usage.bits(),
        };

        alloc.primary = if modifiers.contains(AfbcModifiers::WIDE_BLOCK) {
            BlockKind::Wide
        } else if modifiers.contains(AfbcModifiers::EXTRA_WIDE_BLOCK) {
            BlockKind::ExtraWide
        } else {
            BlockKind::Basic
        };

        if modifiers.contains(AfbcModifiers::TILED_HEADERS) {
            alloc.tiled_headers = true;
            if info.is_multi_plane() && !modifiers.contains(AfbcModifiers::EXTRA_WIDE_BLOCK) {
                log::warn!(
                    "extra-wide AFBC must be signalled for multi-plane formats, falling back to single plane"
                );
                alloc.multi_plane = false;
            }
            if modifiers.contains(AfbcModifiers::DOUBLE_BODY) {
                alloc.front_buffer_safe = true;
            }
        } else {
            if info.is_multi_plane() {
                log::warn!(
                    "multi-plane AFBC is not supported without tiled headers, falling back to single plane"
                );
            }
            alloc.multi_plane = false;
        }

        if modifiers.contains(AfbcModifiers::EXTRA_WIDE_BLOCK) && !alloc.tiled_headers {
            log::error!("extra-wide AFBC blocks require tiled headers ({format:?})");
            return Err(reject());
        }

        if alloc.front_buffer_safe
            && modifiers.intersects(AfbcModifiers::WIDE_BLOCK | AfbcModifiers::EXTRA_WIDE_BLOCK)
        {
            log::error!("front-buffer safe AFBC is not supported with wide blocks ({format:?})");
            return Err(reject());
        }

        if !info.is_multi_plane()
            && modifiers.contains(AfbcModifiers::WIDE_BLOCK | AfbcModifiers::EXTRA_WIDE_BLOCK)
        {
            // wide plus extra-wide means multi-plane
            log::error!("multi-plane AFBC requested for single-plane format {}", info.id);
            return Err(reject());
        }

        if usage.contains(Usage::AFBC_PADDING) {
            alloc.header_padded = true;
        }

        Ok(alloc)
    }

    /// Check the allocation type against the format that will be allocated.
    pub fn validate(&self, info: &PixelFormatDescriptor, height: u32) -> Result<()> {
        if self.is_afbc() {
            if !info.supports_afbc {
                log::error!("AFBC selected but not supported for base format {}", info.id);
                return Err(Error::UnsupportedFormat {
                    format: info.id.raw() as u64,
                    usage: 0,
                });
            }
            if info.is_multi_plane() != self.multi_plane {
                log::error!(
                    "format {} ({} planes) is incompatible with {}-plane AFBC",
                    info.id,
                    info.plane_count,
                    if self.multi_plane { "multi" } else { "single" }
                );
                return Err(Error::UnsupportedFormat {
                    format: info.id.raw() as u64,
                    usage: 0,
                });
            }
        } else if !info.supports_linear {
            log::error!("uncompressed layout not supported for base format {}", info.id);
            return Err(Error::UnsupportedFormat {
                format: info.id.raw() as u64,
                usage: 0,
            });
        }

        if info.id == FormatId::BLOB && height != 1 {
            log::error!("BLOB buffers must have height 1, got {height}");
            return Err(Error::InvalidParameters("BLOB height must be 1"));
        }
        Ok(())
    }
}

/// Pick the format whose geometry an AFBC buffer is allocated with.
///
/// Multi-plane formats, and formats without direct AFBC support, are replaced
/// by a single-plane AFBC equivalent when `force` is set or when the producer
/// and consumer cannot read separate planes. Multi-plane reads are only
/// known to work on the GPU.
pub fn afbc_format_fallback(
    info: &'static PixelFormatDescriptor,
    usage: Usage,
    caps: &BlockCapabilities,
    force: bool,
) -> Option<&'static PixelFormatDescriptor> {
    let producer = classify_producer(usage);
    let consumer = classify_consumer(usage, caps.display);
    let multi_plane_supported = producer == ProducerRole::Unknown
        && matches!(consumer, ConsumerRole::Unknown | ConsumerRole::GpuExclusive)
        && caps.gpu.contains(CapabilityMask::AFBC_MULTIPLANE_READ);

    if !(force || !multi_plane_supported) || (!info.is_multi_plane() && info.supports_afbc) {
        return Some(info);
    }

    match format::single_plane_afbc_equivalent(info) {
        Some(single) => {
            if single.id != info.id {
                log::warn!(
                    "AFBC base format conversion ({}): {} -> {}",
                    if force { "forced" } else { "unsupported" },
                    info.id,
                    single.id
                );
            }
            Some(single)
        }
        None => {
            log::error!("no single-plane AFBC equivalent for format {}", info.id);
            None
        }
    }
}
