//! Format selection.
//!
//! Turns a requested format and usage into an [`InternalFormat`]: the base
//! format to allocate plus the AFBC modifiers every producer and consumer of
//! the buffer agrees on.

use crate::capabilities::{BlockCapabilities, CapabilityMask};
use crate::config::AllocatorConfig;
use crate::error::{Error, Result};
use crate::format::{self, FormatId};
use crate::geometry::checked_align_up;
use crate::internal_format::{AfbcModifiers, FormatKind, InternalFormat};
use crate::usage::{ConsumerRole, ProducerRole, Usage, classify_consumer, classify_producer};

const FEATURES: [(CapabilityMask, AfbcModifiers); 4] = [
    (CapabilityMask::AFBC_BASIC, AfbcModifiers::BASIC),
    (CapabilityMask::AFBC_SPLIT_BLOCK, AfbcModifiers::SPLIT_BLOCK),
    (CapabilityMask::AFBC_WIDE_BLOCK, AfbcModifiers::WIDE_BLOCK),
    (CapabilityMask::AFBC_TILED_HEADERS, AfbcModifiers::TILED_HEADERS),
];

const BASIC_AND_TILED: [(CapabilityMask, AfbcModifiers); 2] = [
    (CapabilityMask::AFBC_BASIC, AfbcModifiers::BASIC),
    (CapabilityMask::AFBC_TILED_HEADERS, AfbcModifiers::TILED_HEADERS),
];

/// Modifiers whose capability bit is present in every mask.
fn common_features(
    masks: &[CapabilityMask],
    features: &[(CapabilityMask, AfbcModifiers)],
) -> AfbcModifiers {
    features
        .iter()
        .filter(|(cap, _)| masks.iter().all(|m| m.contains(*cap)))
        .fold(AfbcModifiers::empty(), |acc, (_, modifier)| acc | *modifier)
}

/// 10-bit and 16-bit RGBA need explicit support from every listed block.
fn pixel_format_supported(base: FormatId, masks: &[CapabilityMask]) -> bool {
    let needed = match base {
        FormatId::RGBA_1010102 => CapabilityMask::PIXFMT_RGBA_1010102,
        FormatId::RGBA_16161616 => CapabilityMask::PIXFMT_RGBA_16161616,
        _ => return true,
    };
    masks.iter().all(|m| m.contains(needed))
}

/// Picks internal formats against a fixed set of resolved capabilities.
#[derive(Clone, Copy, Debug)]
pub struct FormatSelector<'a> {
    caps: &'a BlockCapabilities,
    config: &'a AllocatorConfig,
}

impl<'a> FormatSelector<'a> {
    pub fn new(caps: &'a BlockCapabilities, config: &'a AllocatorConfig) -> Self {
        Self { caps, config }
    }

    pub fn producer(&self, usage: Usage) -> ProducerRole {
        classify_producer(usage)
    }

    pub fn consumer(&self, usage: Usage) -> ConsumerRole {
        classify_consumer(usage, self.caps.display)
    }

    /// Select the internal format for a request. `None` rejects it.
    ///
    /// `pixel_count` is the requested width times height, used by the display
    /// minimum-size check.
    pub fn select(
        &self,
        requested: u64,
        kind: FormatKind,
        usage: Usage,
        pixel_count: u64,
    ) -> Option<InternalFormat> {
        let selected = self.select_inner(requested, kind, usage, pixel_count);
        log::trace!(
            "select_format: requested={requested:#x} usage={:#x} selected={:?}",
            usage.bits(),
            selected
        );
        selected
    }

    fn select_inner(
        &self,
        requested: u64,
        kind: FormatKind,
        usage: Usage,
        pixel_count: u64,
    ) -> Option<InternalFormat> {
        if usage.contains(Usage::PRIVATE_FORMAT) || kind == FormatKind::Internal {
            return decode_internal(requested, kind);
        }

        let base = FormatId::from_raw(requested as u32).map_flexible();
        let producer = self.producer(usage);
        let consumer = self.consumer(usage);

        // software rendering: no compression, depth and stencil allowed
        if producer == ProducerRole::Cpu || consumer == ConsumerRole::Cpu {
            return Some(InternalFormat::uncompressed(base));
        }

        let mut producer_mask = CapabilityMask::all();
        let mut consumer_mask = CapabilityMask::all();

        if usage.contains(Usage::NO_AFBC) {
            if format::is_yuv(base) {
                log::error!(
                    "NO_AFBC usage is invalid for YUV formats (requested {requested:#x}, mapped {base})"
                );
                return None;
            }
            producer_mask.remove(CapabilityMask::AFBC_ENABLE_MASK);
            consumer_mask.remove(CapabilityMask::AFBC_ENABLE_MASK);
        } else if !format::is_afbc_supported(base) {
            producer_mask.remove(CapabilityMask::AFBC_ENABLE_MASK);
            consumer_mask.remove(CapabilityMask::AFBC_ENABLE_MASK);
        } else {
            if matches!(producer, ProducerRole::Gpu | ProducerRole::GpuOrDisplay) {
                self.limit_gpu_producer(base, &mut producer_mask);
            }
            match consumer {
                ConsumerRole::VideoEncoder => self.limit_video_consumer(base, &mut consumer_mask),
                ConsumerRole::GpuOrDisplay | ConsumerRole::DisplayExclusive => {
                    self.limit_display_consumer(base, pixel_count, &mut consumer_mask)
                }
                _ => {}
            }
        }

        let mut selected =
            self.best_format(base, producer, consumer, producer_mask, consumer_mask);

        if base.is_raw_or_luma_only() {
            let producer_ok = matches!(
                producer,
                ProducerRole::Cpu | ProducerRole::Camera | ProducerRole::Unknown
            );
            let consumer_ok = matches!(consumer, ConsumerRole::Cpu | ConsumerRole::Unknown);
            if !producer_ok || !consumer_ok {
                selected = None;
            }
        }

        if base.is_depth_or_stencil() && !depth_stencil_usage_valid(producer, consumer) {
            selected = None;
        }

        if usage.contains(Usage::FRONT_BUFFER) {
            selected = selected.map(|f| self.make_front_buffer_safe(f, producer, consumer));
        }

        selected
    }

    fn limit_gpu_producer(&self, base: FormatId, mask: &mut CapabilityMask) {
        if !format::is_yuv(base) {
            return;
        }
        if self.caps.gpu.contains(CapabilityMask::AFBC_YUV_NO_WRITE) {
            mask.remove(CapabilityMask::AFBC_ENABLE_MASK);
        } else {
            // GPUs writing YUV AFBC only do 16x16, optionally tiled
            mask.remove(CapabilityMask::AFBC_SPLIT_BLOCK | CapabilityMask::AFBC_WIDE_BLOCK);
        }
    }

    fn limit_video_consumer(&self, base: FormatId, mask: &mut CapabilityMask) {
        if !format::is_yuv(base) || self.caps.video.contains(CapabilityMask::AFBC_YUV_NO_READ) {
            mask.remove(CapabilityMask::AFBC_ENABLE_MASK);
        }
    }

    fn limit_display_consumer(&self, base: FormatId, pixel_count: u64, mask: &mut CapabilityMask) {
        if !self.config.afbc_allowed_for_display(pixel_count) {
            mask.remove(CapabilityMask::AFBC_ENABLE_MASK);
        } else if format::is_yuv(base) {
            mask.remove(CapabilityMask::AFBC_SPLIT_BLOCK | CapabilityMask::AFBC_WIDE_BLOCK);
        } else if base == FormatId::RGB_565 {
            mask.remove(CapabilityMask::AFBC_SPLIT_BLOCK);
        }
    }

    /// Intersect block capabilities per producer/consumer pairing. `None`
    /// rejects a pixel format the pairing cannot handle.
    fn best_format(
        &self,
        base: FormatId,
        producer: ProducerRole,
        consumer: ConsumerRole,
        producer_mask: CapabilityMask,
        consumer_mask: CapabilityMask,
    ) -> Option<InternalFormat> {
        let caps = self.caps;
        let mut modifiers = AfbcModifiers::empty();

        if producer == ProducerRole::Unknown && consumer == ConsumerRole::Unknown {
            return Some(InternalFormat::uncompressed(base));
        }

        if producer == ProducerRole::Unknown
            || (producer == ProducerRole::Gpu && caps.gpu.contains(CapabilityMask::OPTIONS_PRESENT))
        {
            let gpu = caps.gpu & producer_mask;
            match consumer {
                ConsumerRole::GpuOrDisplay => {
                    let gpu = gpu & consumer_mask;
                    let dpu = caps.display & consumer_mask;
                    modifiers |= common_features(&[gpu, dpu], &FEATURES);
                    // GPU composition is the fallback, so only the GPU must support it
                    if !pixel_format_supported(base, &[gpu]) {
                        return None;
                    }
                }
                ConsumerRole::GpuExclusive | ConsumerRole::Unknown => {
                    let gpu = gpu & consumer_mask;
                    modifiers |= common_features(&[gpu], &BASIC_AND_TILED);
                    if !pixel_format_supported(base, &[gpu]) {
                        return None;
                    }
                }
                ConsumerRole::VideoEncoder => {
                    let vpu = caps.video & consumer_mask;
                    if matches!(base, FormatId::YV12 | FormatId::NV12) {
                        modifiers |= common_features(&[gpu, vpu], &BASIC_AND_TILED);
                    }
                    if !pixel_format_supported(base, &[gpu, vpu]) {
                        return None;
                    }
                }
                _ => {}
            }
        } else if producer == ProducerRole::VideoDecoder
            && caps.video.contains(CapabilityMask::OPTIONS_PRESENT)
        {
            let vpu = caps.video & producer_mask;
            match consumer {
                ConsumerRole::GpuOrDisplay => {
                    let gpu = caps.gpu & consumer_mask;
                    let dpu = caps.display & consumer_mask;
                    if base == FormatId::YV12 {
                        modifiers |= common_features(&[vpu, gpu, dpu], &BASIC_AND_TILED);
                    }
                    if !pixel_format_supported(base, &[vpu, gpu]) {
                        return None;
                    }
                }
                ConsumerRole::GpuExclusive => {
                    let gpu = caps.gpu & consumer_mask;
                    if base == FormatId::YV12 {
                        modifiers |= common_features(&[gpu, vpu], &BASIC_AND_TILED);
                    }
                    if !pixel_format_supported(base, &[gpu, vpu]) {
                        return None;
                    }
                }
                ConsumerRole::VideoEncoder => {
                    if !pixel_format_supported(base, &[vpu]) {
                        return None;
                    }
                }
                _ => {}
            }
        } else if producer == ProducerRole::DisplayAeu
            && consumer == ConsumerRole::DisplayExclusive
            && caps.display.contains(CapabilityMask::OPTIONS_PRESENT)
        {
            let dpu = caps.display & producer_mask & consumer_mask;
            if dpu.contains(CapabilityMask::AFBC_BASIC) {
                modifiers |= AfbcModifiers::BASIC;
                if dpu.contains(CapabilityMask::AFBC_TILED_HEADERS) {
                    modifiers |= AfbcModifiers::TILED_HEADERS;
                }
            }
        }
        // camera, display and GPU-or-display producers stay uncompressed

        Some(InternalFormat::new(base, modifiers))
    }

    fn make_front_buffer_safe(
        &self,
        format: InternalFormat,
        producer: ProducerRole,
        consumer: ConsumerRole,
    ) -> InternalFormat {
        let mut format = format;
        let gpu_only = matches!(producer, ProducerRole::Unknown | ProducerRole::Gpu)
            && matches!(consumer, ConsumerRole::Unknown | ConsumerRole::GpuExclusive);
        if gpu_only
            && self.caps.gpu.contains(CapabilityMask::AFBC_DOUBLE_BODY)
            && format
                .modifiers()
                .contains(AfbcModifiers::BASIC | AfbcModifiers::TILED_HEADERS)
        {
            format = format
                .with(AfbcModifiers::DOUBLE_BODY)
                .without(AfbcModifiers::WIDE_BLOCK | AfbcModifiers::EXTRA_WIDE_BLOCK);
        }
        if !format.modifiers().contains(AfbcModifiers::DOUBLE_BODY) {
            format = format.strip_modifiers();
        }
        format
    }

    /// Pad dimensions for the selected format before computing geometry.
    ///
    /// Video decoders write one extra superblock row for AFBC 4:2:0; the GPU
    /// pads AFBC buffers to its 16x16 tile. Padding past `u32::MAX` is
    /// rejected.
    pub fn adjust_dimensions(
        &self,
        format: InternalFormat,
        usage: Usage,
        width: u32,
        height: u32,
    ) -> Result<(u32, u32)> {
        let producer = self.producer(usage);
        let afbc = format.modifiers().contains(AfbcModifiers::BASIC);
        let (mut width, mut height) = (width, height);

        if producer == ProducerRole::VideoDecoder && afbc && format.base().is_yuv420_decoder_padded() {
            height = height.checked_add(16).ok_or_else(dimension_overflow)?;
        }
        if matches!(producer, ProducerRole::Gpu | ProducerRole::GpuOrDisplay) && afbc {
            width = align_dimension(width, 16)?;
            height = align_dimension(height, 16)?;
        }
        log::trace!(
            "adjust_dimensions: format={format:?} usage={:#x} alloc {width}x{height}",
            usage.bits()
        );
        Ok((width, height))
    }
}

fn dimension_overflow() -> Error {
    Error::InvalidParameters("buffer dimensions overflow")
}

fn align_dimension(value: u32, align: u32) -> Result<u32> {
    let aligned = checked_align_up(value as u64, align as u64)?;
    u32::try_from(aligned).map_err(|_| dimension_overflow())
}

/// Decode an already-internal format, remapping flexible bases. Unknown
/// bases are rejected.
fn decode_internal(requested: u64, kind: FormatKind) -> Option<InternalFormat> {
    let decoded = match kind {
        FormatKind::Usage => InternalFormat::unwrap_private(requested as u32),
        FormatKind::Internal => InternalFormat::from_raw(requested),
    };
    let base = decoded.base().map_flexible();
    if format::find(base).is_none() {
        log::error!("internal base format {} is not recognized", decoded.base());
        return None;
    }
    Some(InternalFormat::new(base, decoded.modifiers()))
}

/// Depth and stencil need the GPU or CPU on at least one side and nothing
/// but GPU, CPU or unknown on either.
fn depth_stencil_usage_valid(producer: ProducerRole, consumer: ConsumerRole) -> bool {
    matches!(producer, ProducerRole::Gpu | ProducerRole::Cpu | ProducerRole::Unknown)
        && matches!(
            consumer,
            ConsumerRole::GpuExclusive | ConsumerRole::Cpu | ConsumerRole::Unknown
        )
        && !(producer == ProducerRole::Unknown && consumer == ConsumerRole::Unknown)
}
