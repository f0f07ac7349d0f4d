//! CPU access to allocated buffers.
//!
//! Locking validates the access region and the calling process, marks the
//! handle as write owner when CPU writes are requested, and hands out the
//! process's mapping. YUV buffers are described with [`YCbCrLayout`] or the
//! per-component [`FlexLayout`]. Unlocking a write-owned buffer syncs CPU
//! caches.

use std::sync::mpsc::Receiver;

use crate::allocator::Allocator;
use crate::arena::Mapping;
use crate::error::{Error, Result};
use crate::format::{self, FormatId, PixelFormatDescriptor};
use crate::handle::AllocatedBuffer;
use crate::usage::Usage;

/// Rectangle of a buffer, in pixels, that the CPU intends to access.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// The whole of a `width` x `height` buffer.
    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    /// Reject negative or overflowing regions and regions outside a
    /// `width` x `height` buffer.
    pub fn check_within(&self, width: u32, height: u32) -> Result<()> {
        if self.left < 0 || self.top < 0 || self.width < 0 || self.height < 0 {
            log::error!("negative access region {self:?}");
            return Err(Error::InvalidParameters("negative access region"));
        }
        let (Some(right), Some(bottom)) = (
            self.left.checked_add(self.width),
            self.top.checked_add(self.height),
        ) else {
            log::error!("access region {self:?} overflows");
            return Err(Error::InvalidParameters("access region overflows"));
        };
        if right as u32 > width || bottom as u32 > height {
            log::error!("access region {self:?} is outside the {width}x{height} buffer");
            return Err(Error::InvalidParameters("access region outside buffer"));
        }
        Ok(())
    }
}

/// Something to wait on before the CPU may touch a buffer.
pub trait Fence {
    /// Block until signalled.
    fn wait(self);
}

impl Fence for Receiver<()> {
    fn wait(self) {
        // a dropped sender counts as signalled
        let _ = self.recv();
    }
}

/// Check the usage pair passed to a lock: exactly one side is empty and the
/// other asks only for CPU access. Consumers may only read.
pub fn test_lock_usage(producer: Usage, consumer: Usage) -> Result<()> {
    let cpu = Usage::CPU_READ_MASK | Usage::CPU_WRITE_MASK;
    let valid = match (producer.is_empty(), consumer.is_empty()) {
        (true, false) => {
            consumer.intersects(Usage::CPU_READ_MASK) && (consumer - Usage::CPU_READ_MASK).is_empty()
        }
        (false, true) => producer.intersects(cpu) && (producer - cpu).is_empty(),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        log::error!(
            "lock usage must be CPU-only on exactly one side: producer {:#x} consumer {:#x}",
            producer.bits(),
            consumer.bits()
        );
        Err(Error::InvalidParameters("invalid lock usage"))
    }
}

// ---------------------------------------------------------------------------
// YCbCr
// ---------------------------------------------------------------------------

/// Plane offsets of an 8-bit YCbCr buffer, relative to the start of its
/// mapping.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct YCbCrLayout {
    pub mapping: Option<Mapping>,
    pub y: Option<usize>,
    pub cb: Option<usize>,
    pub cr: Option<usize>,
    pub y_stride: u32,
    pub c_stride: u32,
    /// Bytes between consecutive chroma samples.
    pub chroma_step: u32,
}

// ---------------------------------------------------------------------------
// Flex
// ---------------------------------------------------------------------------

/// Which colour model a [`FlexLayout`] describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlexFormat {
    Y,
    YCbCr,
    Rgb,
    Rgba,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlexComponent {
    Y,
    Cb,
    Cr,
    R,
    G,
    B,
    A,
}

/// Where one component lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct FlexPlane {
    /// Byte offset of the top-left sample within the mapping.
    pub offset: usize,
    pub component: FlexComponent,
    /// Bits the sample occupies.
    pub bits_per_component: u32,
    /// Significant bits, stored in the most significant end.
    pub bits_used: u32,
    /// Bytes between horizontally adjacent samples.
    pub h_increment: u32,
    /// Bytes between vertically adjacent samples.
    pub v_increment: u32,
    pub h_subsampling: u32,
    pub v_subsampling: u32,
}

/// Per-component description of an uncompressed buffer.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct FlexLayout {
    pub mapping: Option<Mapping>,
    pub format: FlexFormat,
    pub planes: Vec<FlexPlane>,
}

#[allow(clippy::too_many_arguments)]
const fn plane(
    component: FlexComponent,
    offset: usize,
    bits_per_component: u32,
    bits_used: u32,
    h_increment: u32,
    v_increment: u32,
    h_subsampling: u32,
    v_subsampling: u32,
) -> FlexPlane {
    FlexPlane {
        offset,
        component,
        bits_per_component,
        bits_used,
        h_increment,
        v_increment,
        h_subsampling,
        v_subsampling,
    }
}

fn flex_planes(buffer: &AllocatedBuffer) -> Option<(FlexFormat, Vec<FlexPlane>)> {
    use FlexComponent::{A, B, Cb, Cr, G, R, Y};

    let [p0, p1, p2] = *buffer.planes();
    let (s0, s1, s2) = (p0.byte_stride, p1.byte_stride, p2.byte_stride);
    let (o1, o2) = (p1.offset, p2.offset);

    let layout = match buffer.alloc_format().base() {
        FormatId::Y8 => (FlexFormat::Y, vec![plane(Y, 0, 8, 8, 1, s0, 1, 1)]),
        FormatId::Y16 => (FlexFormat::Y, vec![plane(Y, 0, 16, 16, 2, s0, 1, 1)]),
        FormatId::NV12 => (
            FlexFormat::YCbCr,
            vec![
                plane(Y, 0, 8, 8, 1, s0, 1, 1),
                plane(Cb, o1, 8, 8, 2, s1, 2, 2),
                plane(Cr, o1 + 1, 8, 8, 2, s1, 2, 2),
            ],
        ),
        FormatId::NV21 | FormatId::YCRCB_420_SP => (
            FlexFormat::YCbCr,
            vec![
                plane(Y, 0, 8, 8, 1, s0, 1, 1),
                plane(Cb, o1 + 1, 8, 8, 2, s1, 2, 2),
                plane(Cr, o1, 8, 8, 2, s1, 2, 2),
            ],
        ),
        FormatId::YV12 => (
            FlexFormat::YCbCr,
            vec![
                plane(Y, 0, 8, 8, 1, s0, 1, 1),
                plane(Cb, o2, 8, 8, 1, s2, 2, 2),
                plane(Cr, o1, 8, 8, 1, s1, 2, 2),
            ],
        ),
        FormatId::P010 => (
            FlexFormat::YCbCr,
            vec![
                plane(Y, 0, 16, 10, 2, s0, 1, 1),
                plane(Cb, o1, 16, 10, 4, s1, 2, 2),
                plane(Cr, o1 + 2, 16, 10, 4, s1, 2, 2),
            ],
        ),
        FormatId::P210 => (
            FlexFormat::YCbCr,
            vec![
                plane(Y, 0, 16, 10, 2, s0, 1, 1),
                plane(Cb, o1, 16, 10, 4, s1, 2, 1),
                plane(Cr, o1 + 2, 16, 10, 4, s1, 2, 1),
            ],
        ),
        FormatId::YCBCR_422_I => (
            FlexFormat::YCbCr,
            vec![
                plane(Y, 0, 8, 8, 2, s0, 1, 1),
                plane(Cb, 1, 8, 8, 4, s0, 2, 1),
                plane(Cr, 3, 8, 8, 4, s0, 2, 1),
            ],
        ),
        FormatId::YCBCR_422_SP => (
            FlexFormat::YCbCr,
            vec![
                plane(Y, 0, 8, 8, 1, s0, 1, 1),
                plane(Cb, o1, 8, 8, 2, s1, 2, 1),
                plane(Cr, o1 + 1, 8, 8, 2, s1, 2, 1),
            ],
        ),
        FormatId::Y210 => (
            FlexFormat::YCbCr,
            vec![
                plane(Y, 0, 16, 10, 4, s0, 1, 1),
                plane(Cb, 2, 16, 10, 8, s0, 2, 1),
                plane(Cr, 6, 16, 10, 8, s0, 2, 1),
            ],
        ),
        FormatId::RGBA_16161616 => (
            FlexFormat::Rgba,
            vec![
                plane(R, 0, 16, 16, 8, s0, 1, 1),
                plane(G, 2, 16, 16, 8, s0, 1, 1),
                plane(B, 4, 16, 16, 8, s0, 1, 1),
                plane(A, 6, 16, 16, 8, s0, 1, 1),
            ],
        ),
        FormatId::RGBA_8888 => (
            FlexFormat::Rgba,
            vec![
                plane(R, 0, 8, 8, 4, s0, 1, 1),
                plane(G, 1, 8, 8, 4, s0, 1, 1),
                plane(B, 2, 8, 8, 4, s0, 1, 1),
                plane(A, 3, 8, 8, 4, s0, 1, 1),
            ],
        ),
        FormatId::RGBX_8888 => (
            FlexFormat::Rgb,
            vec![
                plane(R, 0, 8, 8, 4, s0, 1, 1),
                plane(G, 1, 8, 8, 4, s0, 1, 1),
                plane(B, 2, 8, 8, 4, s0, 1, 1),
            ],
        ),
        FormatId::RGB_888 => (
            FlexFormat::Rgb,
            vec![
                plane(R, 0, 8, 8, 3, s0, 1, 1),
                plane(G, 1, 8, 8, 3, s0, 1, 1),
                plane(B, 2, 8, 8, 3, s0, 1, 1),
            ],
        ),
        // planes stay in RGBA order
        FormatId::BGRA_8888 => (
            FlexFormat::Rgba,
            vec![
                plane(R, 2, 8, 8, 4, s0, 1, 1),
                plane(G, 1, 8, 8, 4, s0, 1, 1),
                plane(B, 0, 8, 8, 4, s0, 1, 1),
                plane(A, 3, 8, 8, 4, s0, 1, 1),
            ],
        ),
        _ => return None,
    };
    Some(layout)
}

// ---------------------------------------------------------------------------
// Locking
// ---------------------------------------------------------------------------

fn alloc_format_info(buffer: &AllocatedBuffer) -> Result<&'static PixelFormatDescriptor> {
    format::find(buffer.alloc_format().base()).ok_or_else(|| {
        log::error!("corrupted buffer format {:?}", buffer.alloc_format());
        Error::BadHandle
    })
}

fn set_write_owner(buffer: &mut AllocatedBuffer, usage: Usage) {
    buffer.write_owner = usage.intersects(Usage::CPU_WRITE_MASK);
}

impl Allocator {
    /// Shared checks for every lock entry point.
    fn check_lock(&self, buffer: &AllocatedBuffer, region: Rect) -> Result<()> {
        buffer.validate()?;
        region.check_within(buffer.width(), buffer.height())?;

        let registered =
            buffer.allocating_pid() == self.pid() || buffer.remote_pid() == Some(self.pid());
        if !registered || buffer.mapping().is_none() {
            log::error!(
                "process {} must retain buffer {:#x} before locking it",
                self.pid(),
                buffer.backing_store_id()
            );
            return Err(Error::InvalidParameters("buffer is not retained by this process"));
        }
        if buffer.alloc_format().is_afbc() {
            log::error!("lock is not supported for AFBC buffers ({:?})", buffer.alloc_format());
            return Err(Error::UnsupportedOperation("locking an AFBC buffer"));
        }
        Ok(())
    }

    /// Lock `region` of `buffer` for CPU access. Returns the mapping when
    /// `usage` asks for CPU reads or writes.
    pub fn lock(&self, buffer: &mut AllocatedBuffer, usage: Usage, region: Rect) -> Result<Option<Mapping>> {
        self.check_lock(buffer, region)?;

        let requested = buffer.requested_format();
        if requested == FormatId::YCBCR_420_888.raw() as u64
            || requested == FormatId::YCBCR_422_888.raw() as u64
        {
            log::error!("flexible YCbCr buffers ({requested:#x}) must be locked with lock_ycbcr");
            return Err(Error::InvalidParameters("flexible YCbCr buffer needs lock_ycbcr"));
        }
        if alloc_format_info(buffer)?.is_yuv {
            log::warn!(
                "YUV buffer {:#x} should be locked with lock_flex",
                buffer.backing_store_id()
            );
        }

        set_write_owner(buffer, usage);
        Ok(usage.has_cpu().then(|| buffer.mapping().cloned()).flatten())
    }

    /// Lock an 8-bit YUV buffer and describe its planes.
    pub fn lock_ycbcr(&self, buffer: &mut AllocatedBuffer, usage: Usage, region: Rect) -> Result<YCbCrLayout> {
        self.check_lock(buffer, region)?;
        if !alloc_format_info(buffer)?.is_yuv {
            log::error!("buffer format {:?} is not YUV", buffer.alloc_format());
            return Err(Error::InvalidParameters("buffer format is not YUV"));
        }

        set_write_owner(buffer, usage);
        if !usage.has_cpu() {
            return Ok(YCbCrLayout::default());
        }

        let planes = buffer.planes();
        let mut layout = YCbCrLayout {
            mapping: buffer.mapping().cloned(),
            y: Some(0),
            y_stride: planes[0].byte_stride,
            ..Default::default()
        };
        match buffer.alloc_format().base() {
            FormatId::Y8 | FormatId::Y16 => {}
            FormatId::NV12 => {
                layout.c_stride = planes[1].byte_stride;
                layout.cb = Some(planes[1].offset);
                layout.cr = Some(planes[1].offset + 1);
                layout.chroma_step = 2;
            }
            FormatId::YCRCB_420_SP | FormatId::NV21 => {
                layout.c_stride = planes[1].byte_stride;
                layout.cr = Some(planes[1].offset);
                layout.cb = Some(planes[1].offset + 1);
                layout.chroma_step = 2;
            }
            FormatId::YV12 => {
                layout.c_stride = planes[1].byte_stride;
                layout.cr = Some(planes[1].offset);
                layout.cb = Some(planes[2].offset);
                layout.chroma_step = 1;
            }
            other => {
                log::error!("format {other} cannot be described as YCbCr");
                return Err(Error::InvalidParameters("format has no YCbCr description"));
            }
        }
        Ok(layout)
    }

    /// Number of planes [`Allocator::lock_flex`] describes for `buffer`.
    pub fn num_flex_planes(&self, buffer: &AllocatedBuffer) -> Result<u32> {
        buffer.validate()?;
        if buffer.alloc_format().is_afbc() {
            log::error!("AFBC buffers have no flex layout ({:?})", buffer.alloc_format());
            return Err(Error::UnsupportedOperation("flex layout of an AFBC buffer"));
        }
        let info = alloc_format_info(buffer)?;
        if !info.supports_flex {
            log::error!("format {} has no flex layout", info.id);
            return Err(Error::UnsupportedOperation("format has no flex layout"));
        }
        Ok(info.component_count as u32)
    }

    /// Lock `buffer` and describe each component.
    pub fn lock_flex(&self, buffer: &mut AllocatedBuffer, usage: Usage, region: Rect) -> Result<FlexLayout> {
        self.check_lock(buffer, region)?;
        set_write_owner(buffer, usage);

        let info = alloc_format_info(buffer)?;
        if !info.supports_flex {
            log::error!("format {} has no flex layout", info.id);
            return Err(Error::UnsupportedOperation("format has no flex layout"));
        }
        let (format, planes) = flex_planes(buffer).ok_or_else(|| {
            log::error!("no flex description for format {}", info.id);
            Error::UnsupportedOperation("format has no flex layout")
        })?;
        debug_assert_eq!(planes.len(), info.component_count as usize);
        Ok(FlexLayout {
            mapping: buffer.mapping().cloned(),
            format,
            planes,
        })
    }

    /// Finish CPU access, flushing caches if the CPU wrote.
    pub fn unlock(&self, buffer: &mut AllocatedBuffer) -> Result<()> {
        buffer.validate()?;
        if buffer.is_write_owner() {
            self.arena().sync(&buffer.backing);
        }
        Ok(())
    }

    /// [`Allocator::lock`] after waiting on `fence`.
    pub fn lock_async<F: Fence>(
        &self,
        buffer: &mut AllocatedBuffer,
        usage: Usage,
        region: Rect,
        fence: Option<F>,
    ) -> Result<Option<Mapping>> {
        if let Some(fence) = fence {
            fence.wait();
        }
        self.lock(buffer, usage, region)
    }

    /// [`Allocator::lock_ycbcr`] after waiting on `fence`.
    pub fn lock_ycbcr_async<F: Fence>(
        &self,
        buffer: &mut AllocatedBuffer,
        usage: Usage,
        region: Rect,
        fence: Option<F>,
    ) -> Result<YCbCrLayout> {
        if let Some(fence) = fence {
            fence.wait();
        }
        self.lock_ycbcr(buffer, usage, region)
    }

    /// [`Allocator::lock_flex`] after waiting on `fence`.
    pub fn lock_flex_async<F: Fence>(
        &self,
        buffer: &mut AllocatedBuffer,
        usage: Usage,
        region: Rect,
        fence: Option<F>,
    ) -> Result<FlexLayout> {
        if let Some(fence) = fence {
            fence.wait();
        }
        self.lock_flex(buffer, usage, region)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::mpsc;

    use super::*;
    use crate::arena::HeapArena;
    use crate::config::AllocatorConfig;
    use crate::descriptor::BufferDescriptor;

    const CPU: Usage = Usage::CPU_READ_OFTEN.union(Usage::CPU_WRITE_OFTEN);

    fn setup(format: FormatId, width: u32, height: u32) -> (Allocator, AllocatedBuffer) {
        let alloc = Allocator::new(AllocatorConfig::new(), Arc::new(HeapArena::new())).with_pid(7);
        let desc = BufferDescriptor::new(format.raw() as u64, width, height)
            .with_producer_usage(Usage::CPU_WRITE_OFTEN)
            .with_consumer_usage(Usage::CPU_READ_OFTEN);
        let buffer = alloc.allocate(&[desc]).unwrap().remove(0);
        (alloc, buffer)
    }

    #[test]
    fn region_checks() {
        assert!(Rect::new(0, 0, 64, 64).check_within(64, 64).is_ok());
        assert!(Rect::new(0, 0, 0, 0).check_within(64, 64).is_ok());
        for bad in [
            Rect::new(-1, 0, 4, 4),
            Rect::new(0, 0, 4, -4),
            Rect::new(i32::MAX, 0, 1, 1),
            Rect::new(60, 0, 5, 4),
            Rect::new(0, 63, 4, 2),
        ] {
            assert!(matches!(bad.check_within(64, 64), Err(Error::InvalidParameters(_))), "{bad:?}");
        }
    }

    #[test]
    fn lock_usage_rules() {
        assert!(test_lock_usage(Usage::empty(), Usage::CPU_READ_OFTEN).is_ok());
        assert!(test_lock_usage(Usage::CPU_WRITE_RARELY, Usage::empty()).is_ok());
        assert!(test_lock_usage(CPU, Usage::empty()).is_ok());
        assert!(test_lock_usage(Usage::empty(), Usage::empty()).is_err());
        assert!(test_lock_usage(Usage::CPU_WRITE_OFTEN, Usage::CPU_READ_OFTEN).is_err());
        assert!(test_lock_usage(Usage::empty(), Usage::CPU_WRITE_OFTEN).is_err());
        assert!(test_lock_usage(Usage::GPU_RENDER_TARGET, Usage::empty()).is_err());
        assert!(test_lock_usage(Usage::CPU_WRITE_OFTEN | Usage::GPU_RENDER_TARGET, Usage::empty()).is_err());
    }

    #[test]
    fn lock_sets_write_owner_and_returns_mapping() {
        let (alloc, mut buffer) = setup(FormatId::RGBA_8888, 32, 32);
        let full = Rect::full(32, 32);

        let mapping = alloc.lock(&mut buffer, Usage::CPU_WRITE_OFTEN, full).unwrap().unwrap();
        assert!(buffer.is_write_owner());
        mapping.write(0, &[1, 2, 3, 4]).unwrap();
        alloc.unlock(&mut buffer).unwrap();

        let mapping = alloc.lock(&mut buffer, Usage::CPU_READ_OFTEN, full).unwrap().unwrap();
        assert!(!buffer.is_write_owner());
        let mut px = [0u8; 4];
        mapping.read(0, &mut px).unwrap();
        assert_eq!(px, [1, 2, 3, 4]);

        assert!(alloc.lock(&mut buffer, Usage::GPU_TEXTURE, full).unwrap().is_none());
    }

    #[test]
    fn lock_rejects_region_outside_buffer() {
        let (alloc, mut buffer) = setup(FormatId::RGBA_8888, 32, 32);
        assert!(matches!(
            alloc.lock(&mut buffer, CPU, Rect::new(0, 0, 33, 32)),
            Err(Error::InvalidParameters(_))
        ));
    }

    #[test]
    fn unretained_process_cannot_lock() {
        let (alloc, buffer) = setup(FormatId::RGBA_8888, 32, 32);
        let other = Allocator::new(AllocatorConfig::new(), alloc.arena().clone()).with_pid(8);
        let mut copy = other.import(&buffer).unwrap();
        assert!(other.lock(&mut copy, CPU, Rect::full(32, 32)).is_err());
        other.retain(&mut copy).unwrap();
        assert!(other.lock(&mut copy, CPU, Rect::full(32, 32)).unwrap().is_some());
    }

    #[test]
    fn flexible_ycbcr_needs_lock_ycbcr() {
        let (alloc, mut buffer) = setup(FormatId::YCBCR_420_888, 64, 64);
        assert!(matches!(
            alloc.lock(&mut buffer, CPU, Rect::full(64, 64)),
            Err(Error::InvalidParameters(_))
        ));
        let ycbcr = alloc.lock_ycbcr(&mut buffer, CPU, Rect::full(64, 64)).unwrap();
        let planes = buffer.planes();
        assert_eq!(ycbcr.y, Some(0));
        assert_eq!(ycbcr.cb, Some(planes[1].offset));
        assert_eq!(ycbcr.cr, Some(planes[1].offset + 1));
        assert_eq!(ycbcr.chroma_step, 2);
        assert_eq!(ycbcr.y_stride, planes[0].byte_stride);
        assert_eq!(ycbcr.c_stride, planes[1].byte_stride);
    }

    #[test]
    fn ycbcr_yv12_and_nv21() {
        let (alloc, mut yv12) = setup(FormatId::YV12, 64, 64);
        let l = alloc.lock_ycbcr(&mut yv12, CPU, Rect::full(64, 64)).unwrap();
        assert_eq!(l.cr, Some(yv12.planes()[1].offset));
        assert_eq!(l.cb, Some(yv12.planes()[2].offset));
        assert_eq!(l.chroma_step, 1);

        let (alloc, mut nv21) = setup(FormatId::NV21, 64, 64);
        let l = alloc.lock_ycbcr(&mut nv21, CPU, Rect::full(64, 64)).unwrap();
        assert_eq!(l.cr, Some(nv21.planes()[1].offset));
        assert_eq!(l.cb, Some(nv21.planes()[1].offset + 1));
    }

    #[test]
    fn ycbcr_without_cpu_usage_is_empty() {
        let (alloc, mut buffer) = setup(FormatId::NV12, 64, 64);
        let l = alloc.lock_ycbcr(&mut buffer, Usage::GPU_TEXTURE, Rect::full(64, 64)).unwrap();
        assert!(l.mapping.is_none());
        assert_eq!((l.y, l.cb, l.cr, l.y_stride, l.chroma_step), (None, None, None, 0, 0));
    }

    #[test]
    fn ycbcr_rejects_rgb_and_luma_has_no_chroma() {
        let (alloc, mut rgba) = setup(FormatId::RGBA_8888, 16, 16);
        assert!(alloc.lock_ycbcr(&mut rgba, CPU, Rect::full(16, 16)).is_err());

        let (alloc, mut y8) = setup(FormatId::Y8, 16, 16);
        let l = alloc.lock_ycbcr(&mut y8, CPU, Rect::full(16, 16)).unwrap();
        assert_eq!(l.y, Some(0));
        assert_eq!((l.cb, l.cr, l.c_stride), (None, None, 0));
    }

    #[test]
    fn flex_nv12() {
        let (alloc, mut buffer) = setup(FormatId::NV12, 64, 32);
        assert_eq!(alloc.num_flex_planes(&buffer).unwrap(), 3);
        let flex = alloc.lock_flex(&mut buffer, CPU, Rect::full(64, 32)).unwrap();
        let p1 = buffer.planes()[1];
        assert_eq!(flex.format, FlexFormat::YCbCr);
        assert_eq!(flex.planes[0].component, FlexComponent::Y);
        assert_eq!(flex.planes[1].offset, p1.offset);
        assert_eq!(flex.planes[2].offset, p1.offset + 1);
        assert_eq!(flex.planes[1].h_increment, 2);
        assert_eq!(flex.planes[1].v_increment, p1.byte_stride);
        assert_eq!((flex.planes[2].h_subsampling, flex.planes[2].v_subsampling), (2, 2));
    }

    #[test]
    fn flex_bgra_keeps_rgba_order() {
        let (alloc, mut buffer) = setup(FormatId::BGRA_8888, 16, 16);
        let flex = alloc.lock_flex(&mut buffer, CPU, Rect::full(16, 16)).unwrap();
        let order: Vec<_> = flex.planes.iter().map(|p| (p.component, p.offset)).collect();
        assert_eq!(
            order,
            [
                (FlexComponent::R, 2),
                (FlexComponent::G, 1),
                (FlexComponent::B, 0),
                (FlexComponent::A, 3)
            ]
        );
    }

    #[test]
    fn flex_plane_count_matches_components() {
        for id in [
            FormatId::Y8,
            FormatId::Y16,
            FormatId::NV12,
            FormatId::NV21,
            FormatId::YV12,
            FormatId::P010,
            FormatId::P210,
            FormatId::YCBCR_422_I,
            FormatId::YCBCR_422_SP,
            FormatId::Y210,
            FormatId::RGBA_16161616,
            FormatId::RGBA_8888,
            FormatId::RGBX_8888,
            FormatId::RGB_888,
        ] {
            let (alloc, mut buffer) = setup(id, 64, 64);
            let flex = alloc.lock_flex(&mut buffer, CPU, Rect::full(64, 64)).unwrap();
            assert_eq!(flex.planes.len() as u32, alloc.num_flex_planes(&buffer).unwrap(), "{id}");
        }
    }

    #[test]
    fn no_flex_for_formats_without_it() {
        let (alloc, mut buffer) = setup(FormatId::RGB_565, 16, 16);
        assert!(matches!(
            alloc.num_flex_planes(&buffer),
            Err(Error::UnsupportedOperation(_))
        ));
        assert!(matches!(
            alloc.lock_flex(&mut buffer, CPU, Rect::full(16, 16)),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn async_lock_waits_for_fence() {
        let (alloc, mut buffer) = setup(FormatId::RGBA_8888, 16, 16);
        let (tx, rx) = mpsc::channel();
        let mapping = buffer.mapping().unwrap().clone();
        let writer = std::thread::spawn(move || {
            mapping.write(0, &[9]).unwrap();
            tx.send(()).unwrap();
        });
        let view = alloc
            .lock_async(&mut buffer, Usage::CPU_READ_OFTEN, Rect::full(16, 16), Some(rx))
            .unwrap()
            .unwrap();
        let mut b = [0u8];
        view.read(0, &mut b).unwrap();
        assert_eq!(b, [9]);
        writer.join().unwrap();

        let none: Option<Receiver<()>> = None;
        assert!(alloc.lock_flex_async(&mut buffer, CPU, Rect::full(16, 16), none).is_ok());
    }
}
