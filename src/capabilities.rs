//! Hardware block capability masks.
//!
//! Each hardware block (GPU, display, video codec, camera) advertises a
//! [`CapabilityMask`] of the compression features it can produce or consume.
//! Masks are obtained from a [`CapabilityProbe`] once per [`CapabilityCache`]
//! and fall back to static defaults derived from a [`HardwareTarget`] when the
//! probe finds nothing, which is the normal case on many devices.

use std::sync::{Arc, OnceLock};

bitflags::bitflags! {
    /// Compression features a hardware block supports.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CapabilityMask: u64 {
        /// The block reported (or was configured with) capabilities at all.
        const OPTIONS_PRESENT = 1 << 0;
        const AFBC_BASIC = 1 << 1;
        const AFBC_SPLIT_BLOCK = 1 << 2;
        const AFBC_WIDE_BLOCK = 1 << 3;
        const AFBC_WIDE_BLOCK_YUV_DISABLE = 1 << 4;
        const AFBC_TILED_HEADERS = 1 << 5;
        const AFBC_EXTRA_WIDE_BLOCK = 1 << 6;
        const AFBC_MULTIPLANE_READ = 1 << 7;
        const AFBC_DOUBLE_BODY = 1 << 8;
        const AFBC_YUV_NO_READ = 1 << 9;
        const AFBC_YUV_NO_WRITE = 1 << 10;
        const PIXFMT_RGBA_1010102 = 1 << 32;
        const PIXFMT_RGBA_16161616 = 1 << 33;

        /// Every bit that enables some form of AFBC.
        const AFBC_ENABLE_MASK = Self::AFBC_BASIC.bits()
            | Self::AFBC_SPLIT_BLOCK.bits()
            | Self::AFBC_WIDE_BLOCK.bits()
            | Self::AFBC_TILED_HEADERS.bits()
            | Self::AFBC_EXTRA_WIDE_BLOCK.bits()
            | Self::AFBC_MULTIPLANE_READ.bits()
            | Self::AFBC_DOUBLE_BODY.bits();
    }
}

/// A hardware block with its own capability mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HardwareBlock {
    Gpu,
    Display,
    Video,
    Camera,
}

impl HardwareBlock {
    pub const ALL: [Self; 4] = [Self::Gpu, Self::Display, Self::Video, Self::Camera];

    /// Driver libraries queried for this block, in order.
    pub const fn library_paths(self) -> &'static [&'static str] {
        match self {
            Self::Gpu => &[GPU_LIBRARY_PATH_VENDOR, GPU_LIBRARY_PATH_SYSTEM],
            Self::Display => &[DISPLAY_LIBRARY_PATH],
            Self::Video => &[VIDEO_LIBRARY_PATH],
            Self::Camera => &[],
        }
    }
}

pub const GPU_LIBRARY_PATH_VENDOR: &str = "/vendor/lib64/egl/libGLES_mali.so";
pub const GPU_LIBRARY_PATH_SYSTEM: &str = "/system/lib64/egl/libGLES_mali.so";
pub const DISPLAY_LIBRARY_PATH: &str = "/vendor/lib64/hw/hwcomposer.default.so";
pub const VIDEO_LIBRARY_PATH: &str = "/system/lib/libstagefrighthw.so";

/// Symbol each driver library exports its capability mask under.
pub const CAPABILITY_SYMBOL: &str = "mali_gralloc_format_capabilities";

/// Reads a capability mask out of a driver module.
///
/// Returning `None` means the module or symbol was not found. That is not an
/// error; static defaults are used instead.
pub trait CapabilityProbe: Send + Sync {
    fn query(&self, block: HardwareBlock, library: &str, symbol: &str) -> Option<CapabilityMask>;
}

/// A probe that never finds a driver module.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProbe;

impl CapabilityProbe for NoProbe {
    fn query(&self, _: HardwareBlock, _: &str, _: &str) -> Option<CapabilityMask> {
        None
    }
}

/// A probe answering from a fixed per-block table.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticProbe {
    gpu: Option<CapabilityMask>,
    display: Option<CapabilityMask>,
    video: Option<CapabilityMask>,
    camera: Option<CapabilityMask>,
}

impl StaticProbe {
    pub const fn new() -> Self {
        Self {
            gpu: None,
            display: None,
            video: None,
            camera: None,
        }
    }

    /// Report `mask` for `block`.
    pub const fn with_block(mut self, block: HardwareBlock, mask: CapabilityMask) -> Self {
        match block {
            HardwareBlock::Gpu => self.gpu = Some(mask),
            HardwareBlock::Display => self.display = Some(mask),
            HardwareBlock::Video => self.video = Some(mask),
            HardwareBlock::Camera => self.camera = Some(mask),
        }
        self
    }
}

impl CapabilityProbe for StaticProbe {
    fn query(&self, block: HardwareBlock, _: &str, _: &str) -> Option<CapabilityMask> {
        match block {
            HardwareBlock::Gpu => self.gpu,
            HardwareBlock::Display => self.display,
            HardwareBlock::Video => self.video,
            HardwareBlock::Camera => self.camera,
        }
    }
}

// ---------------------------------------------------------------------------
// Static defaults
// ---------------------------------------------------------------------------

/// Hardware versions and build switches used when a probe finds nothing.
///
/// # Example
///
/// ```
/// use gralloc::HardwareTarget;
///
/// const TARGET: HardwareTarget = HardwareTarget::new()
///     .with_display_version(550)
///     .with_video_version(61)
///     .with_gpu_afbc(true)
///     .with_gpu_tiled_headers(true);
///
/// assert_eq!(TARGET.display_version(), 550);
/// assert!(TARGET.gpu_afbc());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct HardwareTarget {
    display_version: u32,
    video_version: u32,
    gpu_afbc: bool,
    gpu_split_block: bool,
    gpu_wide_block: bool,
    gpu_yuv_wide_block: bool,
    gpu_tiled_headers: bool,
    no_external_afbc: bool,
}

impl HardwareTarget {
    /// No display or video block, GPU without AFBC.
    pub const fn new() -> Self {
        Self {
            display_version: 0,
            video_version: 0,
            gpu_afbc: false,
            gpu_split_block: false,
            gpu_wide_block: false,
            gpu_yuv_wide_block: false,
            gpu_tiled_headers: false,
            no_external_afbc: false,
        }
    }

    pub const fn with_display_version(mut self, v: u32) -> Self {
        self.display_version = v;
        self
    }

    pub const fn with_video_version(mut self, v: u32) -> Self {
        self.video_version = v;
        self
    }

    /// GPU supports basic AFBC.
    pub const fn with_gpu_afbc(mut self, v: bool) -> Self {
        self.gpu_afbc = v;
        self
    }

    pub const fn with_gpu_split_block(mut self, v: bool) -> Self {
        self.gpu_split_block = v;
        self
    }

    /// GPU supports wide blocks (implies split block).
    pub const fn with_gpu_wide_block(mut self, v: bool) -> Self {
        self.gpu_wide_block = v;
        self
    }

    /// GPU may use wide blocks for YUV.
    pub const fn with_gpu_yuv_wide_block(mut self, v: bool) -> Self {
        self.gpu_yuv_wide_block = v;
        self
    }

    /// GPU supports tiled headers (implies split and wide block).
    pub const fn with_gpu_tiled_headers(mut self, v: bool) -> Self {
        self.gpu_tiled_headers = v;
        self
    }

    /// Strip AFBC from every block regardless of what it reports.
    pub const fn with_no_external_afbc(mut self, v: bool) -> Self {
        self.no_external_afbc = v;
        self
    }

    pub const fn display_version(&self) -> u32 {
        self.display_version
    }

    pub const fn video_version(&self) -> u32 {
        self.video_version
    }

    pub const fn gpu_afbc(&self) -> bool {
        self.gpu_afbc
    }

    pub const fn no_external_afbc(&self) -> bool {
        self.no_external_afbc
    }

    /// Display defaults: YUV writes never compressed; 500+ basic, 550+ split,
    /// version 71 adds wide blocks and tiled headers.
    pub fn display_defaults(&self) -> CapabilityMask {
        let mut mask = CapabilityMask::AFBC_YUV_NO_WRITE;
        if self.display_version >= 500 {
            mask |= CapabilityMask::OPTIONS_PRESENT | CapabilityMask::AFBC_BASIC;
            if self.display_version >= 550 {
                mask |= CapabilityMask::AFBC_SPLIT_BLOCK;
            }
        }
        if self.display_version == 71 {
            mask |= CapabilityMask::OPTIONS_PRESENT
                | CapabilityMask::AFBC_BASIC
                | CapabilityMask::AFBC_SPLIT_BLOCK
                | CapabilityMask::AFBC_WIDE_BLOCK
                | CapabilityMask::AFBC_TILED_HEADERS
                | CapabilityMask::AFBC_WIDE_BLOCK_YUV_DISABLE;
        }
        mask
    }

    /// GPU defaults from the build switches. Added to whatever the probe
    /// reported when that lacked [`CapabilityMask::OPTIONS_PRESENT`].
    pub fn gpu_defaults(&self) -> CapabilityMask {
        let mut mask = CapabilityMask::empty();
        if !self.gpu_afbc {
            return mask;
        }
        mask |= CapabilityMask::OPTIONS_PRESENT
            | CapabilityMask::AFBC_BASIC
            | CapabilityMask::AFBC_YUV_NO_WRITE;
        if self.gpu_split_block {
            mask |= CapabilityMask::AFBC_SPLIT_BLOCK;
        }
        if self.gpu_wide_block {
            mask |= CapabilityMask::AFBC_SPLIT_BLOCK | CapabilityMask::AFBC_WIDE_BLOCK;
        }
        if !self.gpu_yuv_wide_block {
            mask |= CapabilityMask::AFBC_WIDE_BLOCK_YUV_DISABLE;
        }
        if self.gpu_tiled_headers {
            mask |= CapabilityMask::AFBC_SPLIT_BLOCK
                | CapabilityMask::AFBC_WIDE_BLOCK
                | CapabilityMask::AFBC_TILED_HEADERS;
        }
        mask
    }

    /// Video codec defaults: 500/550 decode basic AFBC but cannot read YUV
    /// AFBC back; 61 adds tiled headers.
    pub fn video_defaults(&self) -> CapabilityMask {
        match self.video_version {
            500 | 550 => {
                CapabilityMask::OPTIONS_PRESENT
                    | CapabilityMask::AFBC_BASIC
                    | CapabilityMask::AFBC_YUV_NO_READ
            }
            61 => {
                CapabilityMask::OPTIONS_PRESENT
                    | CapabilityMask::AFBC_BASIC
                    | CapabilityMask::AFBC_TILED_HEADERS
            }
            _ => CapabilityMask::empty(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolved capability masks, one per hardware block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockCapabilities {
    pub gpu: CapabilityMask,
    pub display: CapabilityMask,
    pub video: CapabilityMask,
    pub camera: CapabilityMask,
}

impl BlockCapabilities {
    pub const fn get(&self, block: HardwareBlock) -> CapabilityMask {
        match block {
            HardwareBlock::Gpu => self.gpu,
            HardwareBlock::Display => self.display,
            HardwareBlock::Video => self.video,
            HardwareBlock::Camera => self.camera,
        }
    }

    /// Query every block once, applying static defaults where the probe
    /// found nothing.
    pub fn resolve(probe: &dyn CapabilityProbe, target: &HardwareTarget) -> Self {
        let query = |block: HardwareBlock| {
            block
                .library_paths()
                .iter()
                .find_map(|path| probe.query(block, path, CAPABILITY_SYMBOL))
        };

        let display = query(HardwareBlock::Display).unwrap_or_else(|| target.display_defaults());

        let mut gpu = query(HardwareBlock::Gpu).unwrap_or_default();
        if !gpu.contains(CapabilityMask::OPTIONS_PRESENT) {
            log::warn!(
                "no GPU capabilities in {GPU_LIBRARY_PATH_VENDOR} or {GPU_LIBRARY_PATH_SYSTEM}, using static configuration"
            );
            gpu |= target.gpu_defaults();
        }

        let video = query(HardwareBlock::Video).unwrap_or_else(|| target.video_defaults());
        let camera = query(HardwareBlock::Camera).unwrap_or_default();

        let mut caps = Self {
            gpu,
            display,
            video,
            camera,
        };
        if target.no_external_afbc {
            caps.gpu.remove(CapabilityMask::AFBC_ENABLE_MASK);
            caps.display.remove(CapabilityMask::AFBC_ENABLE_MASK);
            caps.video.remove(CapabilityMask::AFBC_ENABLE_MASK);
            caps.camera.remove(CapabilityMask::AFBC_ENABLE_MASK);
        }

        log::debug!("GPU format capabilities {:#x}", caps.gpu.bits());
        log::debug!("DPU format capabilities {:#x}", caps.display.bits());
        log::debug!("VPU format capabilities {:#x}", caps.video.bits());
        log::debug!("CAM format capabilities {:#x}", caps.camera.bits());
        caps
    }
}

/// Lazily resolved, process-lifetime capability masks.
///
/// The first caller runs the probe; concurrent callers wait for it and every
/// later call returns the cached masks without probing again.
pub struct CapabilityCache {
    probe: Arc<dyn CapabilityProbe>,
    target: HardwareTarget,
    resolved: OnceLock<BlockCapabilities>,
}

impl CapabilityCache {
    pub fn new(probe: Arc<dyn CapabilityProbe>, target: HardwareTarget) -> Self {
        Self {
            probe,
            target,
            resolved: OnceLock::new(),
        }
    }

    /// A cache that is already resolved to `caps`.
    pub fn preset(caps: BlockCapabilities) -> Self {
        let resolved = OnceLock::new();
        let _ = resolved.set(caps);
        Self {
            probe: Arc::new(NoProbe),
            target: HardwareTarget::new(),
            resolved,
        }
    }

    /// The resolved masks, probing on first use.
    pub fn get(&self) -> &BlockCapabilities {
        self.resolved
            .get_or_init(|| BlockCapabilities::resolve(self.probe.as_ref(), &self.target))
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    pub fn target(&self) -> &HardwareTarget {
        &self.target
    }
}

impl core::fmt::Debug for CapabilityCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CapabilityCache")
            .field("target", &self.target)
            .field("resolved", &self.resolved.get())
            .finish_non_exhaustive()
    }
}
