//! AFBC header initialization.
//!
//! Freshly allocated AFBC buffers get a valid header for every superblock so
//! that a consumer reading the buffer before the first write sees a solid
//! block instead of garbage.

use crate::error::{Error, Result};
use crate::format::FormatId;
use crate::geometry::{
    AFBC_HEADER_BYTES_PER_BLOCK, AFBC_PIXELS_PER_BLOCK, PlaneLayout, afbc_buffer_alignment,
    checked_align_up,
};
use crate::internal_format::{AfbcModifiers, InternalFormat};

/// Bytes in one superblock header.
pub const HEADER_BYTES: usize = AFBC_HEADER_BYTES_PER_BLOCK as usize;

/// Superblock header layout family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeaderLayout {
    /// 16x16, 32x8 (split or not) and 64x4 without subsampling.
    Plain,
    /// 4:2:0 in 16x16 or 32x8.
    Subsampled,
}

impl HeaderLayout {
    /// Separate planes carry a header each and are not subsampled within
    /// the plane.
    pub const fn for_format(base: FormatId, multi_plane: bool) -> Self {
        if base.is_subsampled_yuv() && !multi_plane {
            Self::Subsampled
        } else {
            Self::Plain
        }
    }

    /// Header words for a superblock whose body starts `body_offset` bytes in.
    pub const fn words(self, body_offset: u32, tiled: bool) -> [u32; 4] {
        match self {
            // tiled headers may be zero for non-subsampled layouts
            Self::Plain if tiled => [0; 4],
            Self::Plain => [body_offset, 0x1, 0x10000, 0x0],
            Self::Subsampled => [
                body_offset.wrapping_add(1 << 28),
                0x8020_0040,
                0x0100_4000,
                0x0002_0080,
            ],
        }
    }
}

/// Write headers for a `width` x `height` plane at the start of `buf`.
///
/// Width and height must already be superblock aligned. Returns the number
/// of headers written.
pub fn write_headers(
    buf: &mut [u8],
    format: InternalFormat,
    multi_plane: bool,
    width: u32,
    height: u32,
) -> Result<usize> {
    let tiled = format.modifiers().contains(AfbcModifiers::TILED_HEADERS);
    let too_large = || Error::InvalidParameters("AFBC header too large");
    let count = width as u64 * height as u64 / AFBC_PIXELS_PER_BLOCK;
    let body_offset = count
        .checked_mul(AFBC_HEADER_BYTES_PER_BLOCK)
        .ok_or_else(too_large)
        .and_then(|bytes| checked_align_up(bytes, afbc_buffer_alignment(tiled)))?;
    let body_offset = u32::try_from(body_offset).map_err(|_| too_large())?;

    let count = usize::try_from(count).map_err(|_| too_large())?;
    let needed = count
        .checked_mul(HEADER_BYTES)
        .filter(|&n| n <= buf.len())
        .ok_or(Error::InvalidParameters("AFBC header does not fit the buffer"))?;

    let layout = HeaderLayout::for_format(format.base(), multi_plane);
    log::trace!("writing {count} AFBC headers, layout {layout:?}, for {format:?}");

    let mut header = [0u8; HEADER_BYTES];
    for (chunk, word) in header.chunks_exact_mut(4).zip(layout.words(body_offset, tiled)) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    for slot in buf[..needed].chunks_exact_mut(HEADER_BYTES) {
        slot.copy_from_slice(&header);
    }
    Ok(count)
}

/// Write headers for every used plane of a buffer.
pub fn init_planes(
    buf: &mut [u8],
    planes: &[PlaneLayout],
    format: InternalFormat,
    multi_plane: bool,
) -> Result<()> {
    for (i, plane) in planes.iter().enumerate() {
        if i > 0 && !plane.is_used() {
            break;
        }
        let region = buf
            .get_mut(plane.offset..)
            .ok_or(Error::InvalidParameters("plane offset past end of buffer"))?;
        write_headers(region, format, multi_plane, plane.alloc_width, plane.alloc_height)?;
    }
    Ok(())
}
