//! Buffer geometry.
//!
//! A [`GeometryCalculator`] turns dimensions, an [`AllocationType`] and a
//! format into per-plane allocation sizes, strides and offsets.
//! [`StandardGeometry`] is the layout every producer and consumer in this
//! crate agrees on.

use core::fmt;

use crate::alloc_type::AllocationType;
use crate::error::{Error, Result};
use crate::format::{FormatId, MAX_PLANES, PixelFormatDescriptor};

/// Bytes of AFBC header per superblock.
pub const AFBC_HEADER_BYTES_PER_BLOCK: u64 = 16;
/// Pixels in every superblock shape (16x16, 32x8 and 64x4).
pub const AFBC_PIXELS_PER_BLOCK: u64 = 256;
/// Alignment of AFBC header and body buffers.
pub const AFBC_BUFFER_ALIGN: u64 = 1024;
/// Alignment of AFBC header and body buffers with tiled headers.
pub const AFBC_TILED_BUFFER_ALIGN: u64 = 4 * AFBC_BUFFER_ALIGN;

/// Allocated region of one plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PlaneLayout {
    /// Byte offset from the start of the buffer (or layer).
    pub offset: usize,
    pub byte_stride: u32,
    pub alloc_width: u32,
    pub alloc_height: u32,
}

impl PlaneLayout {
    /// Whether the plane is present. Unused planes are all zero.
    pub fn is_used(&self) -> bool {
        self.byte_stride != 0
    }
}

/// Output of a geometry computation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Geometry {
    /// Plane 0 stride in pixels. Zero unless CPU-accessible and uncompressed.
    pub pixel_stride: u32,
    /// Bytes for one layer, all planes included.
    pub size: usize,
    pub planes: [PlaneLayout; MAX_PLANES],
}

impl Geometry {
    /// The planes in use.
    pub fn used_planes(&self) -> impl Iterator<Item = &PlaneLayout> {
        self.planes
            .iter()
            .enumerate()
            .filter(|(i, p)| *i == 0 || p.is_used())
            .map(|(_, p)| p)
    }
}

/// Computes buffer geometry.
pub trait GeometryCalculator: Send + Sync + fmt::Debug {
    /// Lay out a single layer of `width` x `height` pixels.
    ///
    /// `has_cpu` and `has_hw` say whether the CPU and any hardware block
    /// access the buffer; each adds stride alignment.
    fn compute(
        &self,
        width: u32,
        height: u32,
        alloc: &AllocationType,
        format: &PixelFormatDescriptor,
        has_cpu: bool,
        has_hw: bool,
    ) -> Result<Geometry>;
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

const fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// Least common multiple. A zero operand is ignored.
pub const fn lcm(a: u64, b: u64) -> u64 {
    if a != 0 && b != 0 {
        a / gcd(a, b) * b
    } else if a > b {
        a
    } else {
        b
    }
}

/// Round `value` up to a multiple of `align`. Alignments of 0 and 1 are no-ops.
pub const fn align_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

/// [`align_up`] that reports overflow instead of wrapping.
pub fn checked_align_up(value: u64, align: u64) -> Result<u64> {
    if align <= 1 {
        return Ok(value);
    }
    value.checked_next_multiple_of(align).ok_or_else(size_overflow)
}

/// Alignment of AFBC header and body sections.
pub const fn afbc_buffer_alignment(tiled: bool) -> u64 {
    if tiled {
        AFBC_TILED_BUFFER_ALIGN
    } else {
        AFBC_BUFFER_ALIGN
    }
}

fn afbc_buffer_align(size: u64, tiled: bool) -> Result<u64> {
    checked_align_up(size, afbc_buffer_alignment(tiled))
}

fn size_overflow() -> Error {
    Error::InvalidParameters("buffer size overflows")
}

fn checked_mul(a: u64, b: u64) -> Result<u64> {
    a.checked_mul(b).ok_or_else(size_overflow)
}

fn checked_add(a: u64, b: u64) -> Result<u64> {
    a.checked_add(b).ok_or_else(size_overflow)
}

fn to_u32(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::InvalidParameters("buffer dimensions overflow"))
}

fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| size_overflow())
}

/// Total size of a buffer with `layer_count` layers of `layer_size` bytes.
///
/// AFBC layers are aligned so that each layer's headers stay aligned.
pub fn layered_size(layer_size: usize, layer_count: u32, alloc: &AllocationType) -> Result<usize> {
    if layer_count == 0 {
        return Err(Error::InvalidParameters("layer count is zero"));
    }
    if layer_count == 1 {
        return Ok(layer_size);
    }
    let mut size = layer_size as u64;
    if alloc.is_afbc() {
        size = checked_align_up(size, if alloc.tiled_headers { 4096 } else { 128 })?;
    }
    checked_mul(size, layer_count as u64).and_then(to_usize)
}

// ---------------------------------------------------------------------------
// Standard geometry
// ---------------------------------------------------------------------------

/// The default layout rules.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardGeometry;

impl StandardGeometry {
    /// Allocation width and height of `plane`, in pixels.
    fn plane_dimensions(
        width: u64,
        height: u64,
        format: &PixelFormatDescriptor,
        alloc: &AllocationType,
        plane: usize,
        has_cpu: bool,
    ) -> (u64, u64) {
        let (sb_w, sb_h) = alloc.superblock(plane);
        let (sb_w, sb_h) = (sb_w as u64, sb_h as u64);
        let hsub = format.hsub as u64;
        let vsub = format.vsub as u64;

        // whole samples for every channel
        let mut w = align_up(width, hsub);
        let mut h = align_up(height, vsub);
        if plane > 0 {
            w /= hsub;
            h /= vsub;
        }

        let pixel_align = if has_cpu {
            format.pixel_width_alignment as u64
        } else if alloc.is_afbc() && alloc.header_padded && !format.is_yuv {
            // four 16-byte headers: a 64-byte header stride
            4 * sb_w
        } else {
            0
        };

        let (tile_w, tile_h) = if alloc.tiled_headers {
            let scale = if format.bpp_afbc[plane] > 32 { 4 } else { 8 };
            (sb_w * scale, sb_h * scale)
        } else {
            (sb_w, sb_h)
        };

        let linear_tile = format.tile_size as u64;
        let w_align = lcm(lcm(lcm(1, pixel_align), linear_tile), tile_w);
        let h_align = lcm(lcm(1, linear_tile), tile_h);
        (align_up(w, w_align), align_up(h, h_align))
    }

    fn stride_alignment(format: &PixelFormatDescriptor, plane: usize, has_cpu: bool, has_hw: bool) -> u64 {
        let hw_align = match (has_hw, format.is_yuv) {
            (false, _) => 0,
            (true, true) => 128,
            (true, false) => 64,
        };
        let cpu_align = if has_cpu {
            debug_assert_eq!(format.bpp[plane] as u64 * format.pixel_width_alignment as u64 % 8, 0);
            format.bpp[plane] as u64 * format.pixel_width_alignment as u64 / 8
        } else {
            0
        };
        lcm(hw_align, cpu_align)
    }
}

impl GeometryCalculator for StandardGeometry {
    fn compute(
        &self,
        width: u32,
        height: u32,
        alloc: &AllocationType,
        format: &PixelFormatDescriptor,
        has_cpu: bool,
        has_hw: bool,
    ) -> Result<Geometry> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidParameters("width and height must be non-zero"));
        }
        let afbc = alloc.is_afbc();
        let plane_count = (format.plane_count as usize).min(MAX_PLANES);
        let mut geometry = Geometry::default();
        let mut size: u64 = 0;

        for plane in 0..plane_count {
            let (w, h) = Self::plane_dimensions(
                width as u64,
                height as u64,
                format,
                alloc,
                plane,
                has_cpu,
            );

            let byte_stride = if afbc {
                let bpp = format.bpp_afbc[plane] as u64;
                debug_assert_eq!(w * bpp % 8, 0, "{}: AFBC stride not whole bytes", format.id);
                w * bpp / 8
            } else {
                let bpp = format.bpp[plane] as u64;
                if bpp == 0 {
                    return Err(Error::UnsupportedFormat {
                        format: format.id.raw() as u64,
                        usage: 0,
                    });
                }
                debug_assert_eq!(w * bpp % 8, 0, "{}: stride not whole bytes", format.id);
                let align = Self::stride_alignment(format, plane, has_cpu, has_hw);
                let stride = align_up(w * bpp / 8, align);

                // chroma stride must be exactly half the luma stride and still aligned
                if format.id == FormatId::YV12 && has_cpu && has_hw {
                    if plane == 0 {
                        align_up(stride, 2 * align)
                    } else {
                        let chroma = geometry.planes[0].byte_stride as u64 / 2;
                        debug_assert_eq!(chroma % align.max(1), 0);
                        debug_assert_eq!(chroma % 16, 0);
                        chroma
                    }
                } else {
                    stride
                }
            };

            if plane == 0 && !afbc && has_cpu {
                geometry.pixel_stride = to_u32(byte_stride * 8 / format.bpp[0] as u64)?;
            }

            let (body, header) = if afbc {
                let superblocks = checked_mul(w, h)? / AFBC_PIXELS_PER_BLOCK;
                let (sb_w, sb_h) = alloc.superblock(plane);
                let sb_bytes = align_up(
                    format.bpp_afbc[plane] as u64 * sb_w as u64 * sb_h as u64 / 8,
                    128,
                );
                let mut body = checked_mul(superblocks, sb_bytes)?;
                // separate planes: keep the next plane's header aligned
                if format.is_multi_plane() && plane < 2 {
                    body = afbc_buffer_align(body, alloc.tiled_headers)?;
                }
                if alloc.front_buffer_safe {
                    body = checked_add(body, afbc_buffer_align(body, alloc.tiled_headers)?)?;
                }
                let header = afbc_buffer_align(
                    checked_mul(superblocks, AFBC_HEADER_BYTES_PER_BLOCK)?,
                    alloc.tiled_headers,
                )?;
                (body, header)
            } else {
                (checked_mul(byte_stride, h)?, 0)
            };

            log::trace!(
                "plane {plane}: {w}x{h} stride={byte_stride} body={body} header={header} offset={size}"
            );

            geometry.planes[plane] = PlaneLayout {
                offset: to_usize(size)?,
                byte_stride: to_u32(byte_stride)?,
                alloc_width: to_u32(w)?,
                alloc_height: to_u32(h)?,
            };
            size = checked_add(size, checked_add(body, header)?)?;
        }

        geometry.size = to_usize(size)?;
        log::debug!(
            "geometry for {} {width}x{height}: size={} pixel_stride={}",
            format.id,
            geometry.size,
            geometry.pixel_stride
        );
        Ok(geometry)
    }
}
