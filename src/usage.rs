//! Usage flags and producer/consumer role classification.

use crate::capabilities::CapabilityMask;

bitflags::bitflags! {
    /// Producer and consumer usage bits.
    ///
    /// The low 32 bits follow the platform usage numbering. Bits in
    /// [`Usage::PRIVATE_MASK`] are reserved for allocator-specific requests.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Usage: u64 {
        const CPU_READ_RARELY = 0x2;
        const CPU_READ_OFTEN = 0x3;
        const CPU_READ_MASK = 0xF;
        const CPU_WRITE_RARELY = 0x20;
        const CPU_WRITE_OFTEN = 0x30;
        const CPU_WRITE_MASK = 0xF0;
        const GPU_TEXTURE = 0x100;
        const GPU_RENDER_TARGET = 0x200;
        const HW_2D = 0x400;
        const COMPOSER_OVERLAY = 0x800;
        const FRAMEBUFFER = 0x1000;
        const EXTERNAL_DISPLAY = 0x2000;
        const PROTECTED = 0x4000;
        const CURSOR = 0x8000;
        const VIDEO_ENCODER = 0x1_0000;
        const CAMERA_WRITE = 0x2_0000;
        const CAMERA_READ = 0x4_0000;
        const CAMERA_MASK = 0x6_0000;
        const RENDERSCRIPT = 0x10_0000;
        const VIDEO_DECODER = 0x40_0000;
        const SENSOR_DIRECT_DATA = 0x80_0000;
        const GPU_DATA_BUFFER = 0x100_0000;

        /// Request a front-buffer-safe allocation.
        const FRONT_BUFFER = 0x1000_0000;
        const FORCE_BACK_BUFFER = 0x2000_0000;
        /// Pad AFBC headers to four superblocks of width.
        const AFBC_PADDING = 0x4000_0000;
        /// Never compress. Overlaps [`Usage::AFBC_PADDING`].
        const NO_AFBC = 0x6000_0000;
        /// The requested format is a wrapped internal format.
        const PRIVATE_FORMAT = 0x8000_0000;

        /// Two-bit YUV colour-space selector.
        const YUV_COLOR_SPACE = 0x0003_0000_0000_0000;

        const PRIVATE_MASK = 0xffff_0000_f000_0000;
    }
}

const YUV_COLOR_SPACE_SHIFT: u32 = 48;

impl Usage {
    /// Any CPU read or write bit.
    #[inline]
    pub const fn has_cpu(self) -> bool {
        self.intersects(Self::CPU_READ_MASK.union(Self::CPU_WRITE_MASK))
    }

    /// Any usage bit other than CPU and private bits.
    #[inline]
    pub const fn has_hw(self) -> bool {
        !self
            .difference(Self::PRIVATE_MASK)
            .difference(Self::CPU_READ_MASK)
            .difference(Self::CPU_WRITE_MASK)
            .is_empty()
    }

    /// CPU read-often, exactly.
    #[inline]
    pub const fn reads_often(self) -> bool {
        self.intersection(Self::CPU_READ_MASK).bits() == Self::CPU_READ_OFTEN.bits()
    }

    /// The raw 2-bit colour-space selector value.
    #[inline]
    pub const fn yuv_color_space_selector(self) -> u8 {
        ((self.bits() & Self::YUV_COLOR_SPACE.bits()) >> YUV_COLOR_SPACE_SHIFT) as u8
    }

    /// Usage with the colour-space selector set to `selector & 3`.
    pub const fn with_yuv_color_space_selector(self, selector: u8) -> Self {
        let bits = (self.bits() & !Self::YUV_COLOR_SPACE.bits())
            | (((selector & 3) as u64) << YUV_COLOR_SPACE_SHIFT);
        Self::from_bits_retain(bits)
    }
}

/// The block that writes a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProducerRole {
    Cpu,
    Gpu,
    GpuOrDisplay,
    Display,
    /// Display writing back its own output.
    DisplayAeu,
    VideoDecoder,
    Camera,
    Unknown,
}

/// The block that reads a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConsumerRole {
    Cpu,
    GpuOrDisplay,
    GpuExclusive,
    DisplayExclusive,
    VideoEncoder,
    Unknown,
}

/// Classify the producer. The order of checks matters: CPU bits win,
/// multi-bit combinations are tested before single bits.
pub fn classify_producer(usage: Usage) -> ProducerRole {
    let render_compose_encode =
        Usage::GPU_RENDER_TARGET | Usage::COMPOSER_OVERLAY | Usage::VIDEO_ENCODER;
    let decoder_pattern = Usage::GPU_TEXTURE | Usage::COMPOSER_OVERLAY | Usage::EXTERNAL_DISPLAY;
    let compose_encode = Usage::COMPOSER_OVERLAY | Usage::VIDEO_ENCODER;

    if usage.has_cpu() {
        ProducerRole::Cpu
    } else if usage.contains(render_compose_encode) {
        // video encoder is the only consumer, so composer is producing
        ProducerRole::GpuOrDisplay
    } else if usage.contains(Usage::GPU_RENDER_TARGET) {
        ProducerRole::Gpu
    } else if usage.intersects(Usage::CAMERA_MASK) {
        ProducerRole::Camera
    } else if usage.contains(decoder_pattern) {
        ProducerRole::VideoDecoder
    } else if usage.contains(compose_encode) {
        ProducerRole::Display
    } else if usage == Usage::COMPOSER_OVERLAY {
        ProducerRole::DisplayAeu
    } else {
        ProducerRole::Unknown
    }
}

/// Classify the consumer. Texture plus composer only picks the display when
/// the display advertises runtime capabilities.
pub fn classify_consumer(usage: Usage, display: CapabilityMask) -> ConsumerRole {
    if usage.has_cpu() {
        ConsumerRole::Cpu
    } else if usage.contains(Usage::FRAMEBUFFER) {
        ConsumerRole::GpuOrDisplay
    } else if usage.contains(Usage::VIDEO_ENCODER) {
        ConsumerRole::VideoEncoder
    } else if usage.contains(Usage::GPU_TEXTURE | Usage::COMPOSER_OVERLAY)
        && display.contains(CapabilityMask::OPTIONS_PRESENT)
    {
        ConsumerRole::GpuOrDisplay
    } else if usage.contains(Usage::GPU_TEXTURE) {
        ConsumerRole::GpuExclusive
    } else if usage == Usage::COMPOSER_OVERLAY {
        ConsumerRole::DisplayExclusive
    } else {
        ConsumerRole::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_bits_dominate() {
        let usage = Usage::CPU_READ_OFTEN | Usage::GPU_RENDER_TARGET | Usage::FRAMEBUFFER;
        assert_eq!(classify_producer(usage), ProducerRole::Cpu);
        assert_eq!(
            classify_consumer(usage, CapabilityMask::all()),
            ConsumerRole::Cpu
        );
    }

    #[test]
    fn producer_combinations_before_single_bits() {
        let usage = Usage::GPU_RENDER_TARGET | Usage::COMPOSER_OVERLAY | Usage::VIDEO_ENCODER;
        assert_eq!(classify_producer(usage), ProducerRole::GpuOrDisplay);
        assert_eq!(
            classify_producer(Usage::GPU_RENDER_TARGET | Usage::GPU_TEXTURE),
            ProducerRole::Gpu
        );
        assert_eq!(
            classify_producer(Usage::COMPOSER_OVERLAY | Usage::VIDEO_ENCODER),
            ProducerRole::Display
        );
        assert_eq!(classify_producer(Usage::COMPOSER_OVERLAY), ProducerRole::DisplayAeu);
        assert_eq!(classify_producer(Usage::CAMERA_WRITE), ProducerRole::Camera);
    }

    #[test]
    fn stagefright_decoder_pattern() {
        let usage = Usage::GPU_TEXTURE | Usage::COMPOSER_OVERLAY | Usage::EXTERNAL_DISPLAY;
        assert_eq!(classify_producer(usage), ProducerRole::VideoDecoder);
    }

    #[test]
    fn texture_only_is_unknown_producer() {
        assert_eq!(classify_producer(Usage::GPU_TEXTURE), ProducerRole::Unknown);
        assert_eq!(classify_producer(Usage::empty()), ProducerRole::Unknown);
    }

    #[test]
    fn consumer_texture_composer_depends_on_display_caps() {
        let usage = Usage::GPU_TEXTURE | Usage::COMPOSER_OVERLAY;
        assert_eq!(
            classify_consumer(usage, CapabilityMask::OPTIONS_PRESENT),
            ConsumerRole::GpuOrDisplay
        );
        assert_eq!(
            classify_consumer(usage, CapabilityMask::empty()),
            ConsumerRole::GpuExclusive
        );
    }

    #[test]
    fn consumer_single_bits() {
        let none = CapabilityMask::empty();
        assert_eq!(classify_consumer(Usage::FRAMEBUFFER, none), ConsumerRole::GpuOrDisplay);
        assert_eq!(classify_consumer(Usage::VIDEO_ENCODER, none), ConsumerRole::VideoEncoder);
        assert_eq!(
            classify_consumer(Usage::COMPOSER_OVERLAY, none),
            ConsumerRole::DisplayExclusive
        );
        assert_eq!(
            classify_consumer(Usage::GPU_RENDER_TARGET, none),
            ConsumerRole::Unknown
        );
    }

    #[test]
    fn hw_and_cpu_split() {
        let usage = Usage::CPU_WRITE_OFTEN | Usage::FRONT_BUFFER;
        assert!(usage.has_cpu());
        assert!(!usage.has_hw());
        assert!((usage | Usage::GPU_TEXTURE).has_hw());
    }

    #[test]
    fn no_afbc_contains_padding_bit() {
        assert!(Usage::NO_AFBC.contains(Usage::AFBC_PADDING));
        assert!(!Usage::AFBC_PADDING.contains(Usage::NO_AFBC));
    }

    #[test]
    fn color_space_selector_round_trip() {
        let usage = Usage::GPU_TEXTURE.with_yuv_color_space_selector(2);
        assert_eq!(usage.yuv_color_space_selector(), 2);
        assert!(usage.contains(Usage::GPU_TEXTURE));
        assert_eq!(usage.with_yuv_color_space_selector(0).yuv_color_space_selector(), 0);
    }

    #[test]
    fn reads_often_requires_exact_value() {
        assert!(Usage::CPU_READ_OFTEN.reads_often());
        assert!(!Usage::CPU_READ_RARELY.reads_often());
    }
}
