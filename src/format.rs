//! Pixel format catalog.
//!
//! [`FormatId`] names a base pixel format. [`PixelFormatDescriptor`] holds the
//! intrinsic properties of each format the allocator knows about, and
//! [`find()`] looks one up. The table is immutable and needs no locking.

use core::fmt;

/// Maximum number of physical planes in any supported format.
pub const MAX_PLANES: usize = 3;

/// Base pixel format identifier.
///
/// Values below `0x100` and the fourcc-style values match the platform HAL
/// numbering. Formats without a HAL equivalent live in the private range
/// starting at `0x100`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormatId(u32);

impl FormatId {
    pub const UNDEFINED: Self = Self(0);

    // --- HAL formats ---
    pub const RGBA_8888: Self = Self(0x1);
    pub const RGBX_8888: Self = Self(0x2);
    pub const RGB_888: Self = Self(0x3);
    pub const RGB_565: Self = Self(0x4);
    pub const BGRA_8888: Self = Self(0x5);
    pub const YCBCR_422_SP: Self = Self(0x10);
    pub const YCRCB_420_SP: Self = Self(0x11);
    pub const YCBCR_422_I: Self = Self(0x14);
    pub const RGBA_16161616: Self = Self(0x16);
    pub const RAW16: Self = Self(0x20);
    pub const BLOB: Self = Self(0x21);
    pub const IMPLEMENTATION_DEFINED: Self = Self(0x22);
    pub const YCBCR_420_888: Self = Self(0x23);
    pub const RAW10: Self = Self(0x25);
    pub const RAW12: Self = Self(0x26);
    pub const YCBCR_422_888: Self = Self(0x27);
    pub const RGBA_1010102: Self = Self(0x2B);
    pub const DEPTH_16: Self = Self(0x30);
    pub const DEPTH_24: Self = Self(0x31);
    pub const DEPTH_24_STENCIL_8: Self = Self(0x32);
    pub const DEPTH_32F: Self = Self(0x33);
    pub const DEPTH_32F_STENCIL_8: Self = Self(0x34);
    pub const STENCIL_8: Self = Self(0x35);
    pub const Y8: Self = Self(0x2020_3859);
    pub const Y16: Self = Self(0x2036_3159);
    pub const YV12: Self = Self(0x3231_5659);

    // --- Private range ---
    pub const NV12: Self = Self(0x100);
    pub const NV21: Self = Self(0x101);
    pub const YUV422_8BIT: Self = Self(0x102);
    pub const Y0L2: Self = Self(0x103);
    pub const P010: Self = Self(0x104);
    pub const P210: Self = Self(0x105);
    pub const Y210: Self = Self(0x106);
    pub const Y410: Self = Self(0x107);
    pub const YUV420_8BIT_I: Self = Self(0x108);
    pub const YUV420_10BIT_I: Self = Self(0x109);
    pub const YUV444_10BIT_I: Self = Self(0x10A);

    /// Wrap a raw format value.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw format value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Replace platform flexible formats with the concrete format they are
    /// allocated as. Other formats pass through unchanged.
    pub const fn map_flexible(self) -> Self {
        match self {
            Self::IMPLEMENTATION_DEFINED | Self::YCBCR_420_888 => Self::NV12,
            Self::YUV422_8BIT => Self::YCBCR_422_I,
            other => other,
        }
    }

    /// Whether this is one of the platform's flexible YCbCr formats.
    pub const fn is_flexible_ycbcr(self) -> bool {
        matches!(self, Self::YCBCR_420_888 | Self::YCBCR_422_888)
    }

    /// Chroma-subsampled YUV formats. These use the alternative AFBC header
    /// layout when stored in a single plane.
    pub const fn is_subsampled_yuv(self) -> bool {
        matches!(
            self,
            Self::YV12
                | Self::YCRCB_420_SP
                | Self::NV12
                | Self::NV21
                | Self::YCBCR_422_I
                | Self::Y0L2
                | Self::P010
                | Self::P210
                | Self::Y210
                | Self::YUV422_8BIT
                | Self::YCBCR_420_888
                | Self::YUV420_8BIT_I
                | Self::YUV420_10BIT_I
                | Self::YCBCR_422_SP
        )
    }

    /// Depth and stencil formats.
    pub const fn is_depth_or_stencil(self) -> bool {
        matches!(
            self,
            Self::DEPTH_16
                | Self::DEPTH_24
                | Self::DEPTH_24_STENCIL_8
                | Self::DEPTH_32F
                | Self::DEPTH_32F_STENCIL_8
                | Self::STENCIL_8
        )
    }

    /// Sensor and single-channel formats only the CPU or camera may touch.
    pub const fn is_raw_or_luma_only(self) -> bool {
        matches!(
            self,
            Self::RAW10 | Self::RAW12 | Self::RAW16 | Self::Y8 | Self::Y16
        )
    }

    /// 4:2:0 formats that a video decoder pads by one superblock row.
    pub(crate) const fn is_yuv420_decoder_padded(self) -> bool {
        matches!(
            self,
            Self::YUV420_8BIT_I
                | Self::YCRCB_420_SP
                | Self::NV12
                | Self::NV21
                | Self::YV12
                | Self::YUV420_10BIT_I
                | Self::Y0L2
        )
    }

    /// Whether the catalog has an entry for this format.
    #[inline]
    pub fn is_known(self) -> bool {
        find(self).is_some()
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Intrinsic properties of one pixel format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct PixelFormatDescriptor {
    pub id: FormatId,
    /// Number of physical planes (1 to 3).
    pub plane_count: u8,
    pub component_count: u8,
    /// Bits per sample of the primary (largest) component.
    pub bits_per_sample: u8,
    /// Bits per pixel per plane when AFBC compressed, without implicit padding.
    pub bpp_afbc: [u8; MAX_PLANES],
    /// Bits per pixel per plane when uncompressed, including sample padding.
    pub bpp: [u8; MAX_PLANES],
    /// Horizontal subsampling. Also the width rounding for non-YUV formats.
    pub hsub: u8,
    /// Vertical subsampling. Also the height rounding for non-YUV formats.
    pub vsub: u8,
    /// Uncompressed tile size in pixels, assumed square.
    pub tile_size: u8,
    pub has_alpha: bool,
    pub is_yuv: bool,
    pub supports_afbc: bool,
    pub supports_linear: bool,
    /// The uncompressed layout can be described as a flex layout.
    pub supports_flex: bool,
    /// Width alignment in pixels for CPU access. Power of two.
    pub pixel_width_alignment: u8,
}

impl PixelFormatDescriptor {
    /// Whether the data is split across more than one physical plane.
    #[inline]
    pub const fn is_multi_plane(&self) -> bool {
        self.plane_count > 1
    }

    /// Whether `other` can stand in for `self` when swapping formats,
    /// component by component.
    ///
    /// Alpha may be dropped from a YUV format, so that a 4-component YUV
    /// format can fall back to a 3-component one.
    pub const fn comparable_components(&self, other: &Self) -> bool {
        if other.component_count == self.component_count
            && other.bits_per_sample == self.bits_per_sample
            && other.is_yuv == self.is_yuv
        {
            return true;
        }
        self.is_yuv && self.has_alpha && other.component_count == 3 && other.is_yuv && !other.has_alpha
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

const A: u8 = 1 << 0; // alpha
const Y: u8 = 1 << 1; // yuv
const C: u8 = 1 << 2; // afbc
const L: u8 = 1 << 3; // linear
const F: u8 = 1 << 4; // flex

#[allow(clippy::too_many_arguments)]
const fn entry(
    id: FormatId,
    plane_count: u8,
    component_count: u8,
    bits_per_sample: u8,
    bpp_afbc: [u8; MAX_PLANES],
    bpp: [u8; MAX_PLANES],
    sub: (u8, u8),
    tile_size: u8,
    flags: u8,
    pixel_width_alignment: u8,
) -> PixelFormatDescriptor {
    PixelFormatDescriptor {
        id,
        plane_count,
        component_count,
        bits_per_sample,
        bpp_afbc,
        bpp,
        hsub: sub.0,
        vsub: sub.1,
        tile_size,
        has_alpha: flags & A != 0,
        is_yuv: flags & Y != 0,
        supports_afbc: flags & C != 0,
        supports_linear: flags & L != 0,
        supports_flex: flags & F != 0,
        pixel_width_alignment,
    }
}

#[rustfmt::skip]
static FORMATS: &[PixelFormatDescriptor] = &[
    //    id                              npln ncmp bps  bpp_afbc      bpp           sub     tile flags           pwa
    entry(FormatId::RGB_565,              1,   3,   6,   [16, 0, 0],   [16, 0, 0],   (1, 1), 1,   C | L,          1),
    entry(FormatId::RGB_888,              1,   3,   8,   [24, 0, 0],   [24, 0, 0],   (1, 1), 1,   C | L | F,      1),
    entry(FormatId::RGBA_8888,            1,   4,   8,   [32, 0, 0],   [32, 0, 0],   (1, 1), 1,   A | C | L | F,  1),
    entry(FormatId::BGRA_8888,            1,   4,   8,   [32, 0, 0],   [32, 0, 0],   (1, 1), 1,   A | C | L | F,  1),
    entry(FormatId::RGBX_8888,            1,   3,   8,   [32, 0, 0],   [32, 0, 0],   (1, 1), 1,   C | L | F,      1),
    entry(FormatId::RGBA_1010102,         1,   4,   10,  [32, 0, 0],   [32, 0, 0],   (1, 1), 1,   A | C | L,      1),
    entry(FormatId::RGBA_16161616,        1,   4,   16,  [64, 0, 0],   [64, 0, 0],   (1, 1), 1,   A | L | F,      1),
    entry(FormatId::Y8,                   1,   1,   8,   [8, 0, 0],    [8, 0, 0],    (2, 2), 1,   Y | C | L | F,  16),
    entry(FormatId::Y16,                  1,   1,   16,  [16, 0, 0],   [16, 0, 0],   (2, 2), 1,   Y | C | L | F,  16),
    entry(FormatId::YUV420_8BIT_I,        1,   3,   8,   [12, 0, 0],   [0, 0, 0],    (2, 2), 1,   Y | C,          1),
    entry(FormatId::NV12,                 2,   3,   8,   [8, 16, 0],   [8, 16, 0],   (2, 2), 1,   Y | C | L | F,  1),
    entry(FormatId::NV21,                 2,   3,   8,   [8, 16, 0],   [8, 16, 0],   (2, 2), 1,   Y | C | L | F,  1),
    entry(FormatId::YCRCB_420_SP,         2,   3,   8,   [8, 16, 0],   [8, 16, 0],   (2, 2), 1,   Y | C | L | F,  1),
    entry(FormatId::YV12,                 3,   3,   8,   [8, 8, 8],    [8, 8, 8],    (2, 2), 1,   Y | C | L | F,  16),
    entry(FormatId::YCBCR_422_I,          1,   3,   8,   [16, 0, 0],   [16, 0, 0],   (2, 1), 1,   Y | C | L | F,  1),
    entry(FormatId::YCBCR_422_SP,         2,   3,   8,   [8, 16, 0],   [8, 16, 0],   (2, 1), 1,   Y | C | L | F,  1),
    entry(FormatId::YUV420_10BIT_I,       1,   3,   10,  [15, 0, 0],   [0, 0, 0],    (2, 2), 1,   Y | C,          1),
    entry(FormatId::Y0L2,                 1,   4,   10,  [16, 0, 0],   [16, 0, 0],   (2, 2), 2,   A | Y | L,      1),
    entry(FormatId::P010,                 2,   3,   10,  [10, 20, 0],  [16, 32, 0],  (2, 2), 1,   Y | C | L | F,  1),
    entry(FormatId::Y210,                 1,   3,   10,  [20, 0, 0],   [32, 0, 0],   (2, 1), 1,   Y | C | L | F,  1),
    entry(FormatId::P210,                 2,   3,   10,  [10, 20, 0],  [16, 32, 0],  (2, 1), 1,   Y | C | L | F,  1),
    entry(FormatId::YUV444_10BIT_I,       1,   3,   10,  [30, 0, 0],   [0, 0, 0],    (1, 1), 1,   Y | C,          1),
    entry(FormatId::Y410,                 1,   4,   10,  [32, 0, 0],   [32, 0, 0],   (1, 1), 1,   A | Y | L,      1),
    entry(FormatId::RAW16,                1,   1,   16,  [16, 0, 0],   [16, 0, 0],   (2, 2), 1,   L,              16),
    entry(FormatId::RAW12,                1,   1,   12,  [12, 0, 0],   [12, 0, 0],   (4, 2), 1,   L,              4),
    entry(FormatId::RAW10,                1,   1,   10,  [10, 0, 0],   [10, 0, 0],   (4, 2), 1,   L,              4),
    entry(FormatId::BLOB,                 1,   1,   8,   [8, 0, 0],    [8, 0, 0],    (1, 1), 1,   L,              1),
    entry(FormatId::DEPTH_16,             1,   1,   16,  [0, 0, 0],    [16, 0, 0],   (1, 1), 1,   L,              1),
    entry(FormatId::DEPTH_24,             1,   1,   24,  [0, 0, 0],    [24, 0, 0],   (1, 1), 1,   L,              1),
    entry(FormatId::DEPTH_24_STENCIL_8,   1,   2,   24,  [0, 0, 0],    [32, 0, 0],   (1, 1), 1,   L,              1),
    entry(FormatId::DEPTH_32F,            1,   1,   32,  [0, 0, 0],    [32, 0, 0],   (1, 1), 1,   L,              1),
    entry(FormatId::DEPTH_32F_STENCIL_8,  1,   2,   32,  [0, 0, 0],    [40, 0, 0],   (1, 1), 1,   L,              1),
    entry(FormatId::STENCIL_8,            1,   1,   8,   [0, 0, 0],    [8, 0, 0],    (1, 1), 1,   L,              1),
];

/// All catalog entries, in lookup order.
#[inline]
pub fn all() -> &'static [PixelFormatDescriptor] {
    FORMATS
}

/// Look up a base format. Returns `None` for formats the allocator does not know.
pub fn find(id: FormatId) -> Option<&'static PixelFormatDescriptor> {
    FORMATS.iter().find(|f| f.id == id)
}

/// Whether `id` is a YUV format. Unknown formats are not.
pub fn is_yuv(id: FormatId) -> bool {
    find(id).is_some_and(|f| f.is_yuv)
}

/// Whether AFBC can be used for `id`, either directly or through a
/// comparable format that supports it.
pub fn is_afbc_supported(id: FormatId) -> bool {
    let Some(info) = find(id) else {
        return false;
    };
    info.supports_afbc
        || FORMATS
            .iter()
            .any(|other| info.comparable_components(other) && other.supports_afbc)
}

/// Find a single-plane AFBC YUV format that can replace `info` for sizing.
///
/// Returns `info` itself when it is already single-plane AFBC, and `None`
/// when `info` is not YUV or no replacement exists.
pub fn single_plane_afbc_equivalent(
    info: &'static PixelFormatDescriptor,
) -> Option<&'static PixelFormatDescriptor> {
    if !info.is_yuv {
        return None;
    }
    if info.plane_count == 1 && info.supports_afbc {
        return Some(info);
    }
    FORMATS.iter().find(|f| {
        f.plane_count == 1
            && f.supports_afbc
            && f.bits_per_sample == info.bits_per_sample
            && f.hsub == info.hsub
            && f.vsub == info.vsub
            && f.is_yuv == info.is_yuv
            && info.comparable_components(f)
    })
}
