//! Allocator configuration.

use crate::arena::HeapKind;
use crate::capabilities::HardwareTarget;

/// Minimum buffer area, in percent of the display area, for the display to
/// be offered AFBC.
pub const AFBC_MIN_DISPLAY_PERCENT: u64 = 75;

/// Allocator-wide settings.
///
/// # Example
///
/// ```
/// use gralloc::{AllocatorConfig, HardwareTarget};
///
/// let config = AllocatorConfig::new()
///     .with_hardware(HardwareTarget::new().with_display_version(550))
///     .with_display_size(1920, 1080)
///     .with_secure_heap(true);
///
/// assert_eq!(config.display_size(), Some((1920, 1080)));
/// assert!(config.init_afbc_headers());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct AllocatorConfig {
    hardware: HardwareTarget,
    display_size: Option<(u32, u32)>,
    init_afbc_headers: bool,
    secure_heap: bool,
    composer_heap: HeapKind,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocatorConfig {
    /// Bare hardware target and unknown display. Headers are initialized and
    /// there is no secure heap.
    pub const fn new() -> Self {
        Self {
            hardware: HardwareTarget::new(),
            display_size: None,
            init_afbc_headers: true,
            secure_heap: false,
            composer_heap: HeapKind::Compound,
        }
    }

    /// Static defaults used when capability probing finds nothing.
    pub const fn with_hardware(mut self, hardware: HardwareTarget) -> Self {
        self.hardware = hardware;
        self
    }

    /// Display resolution, used to decide whether small buffers are worth
    /// compressing for the display.
    pub const fn with_display_size(mut self, width: u32, height: u32) -> Self {
        self.display_size = Some((width, height));
        self
    }

    /// Write AFBC headers into freshly allocated, unshared buffers.
    pub const fn with_init_afbc_headers(mut self, v: bool) -> Self {
        self.init_afbc_headers = v;
        self
    }

    /// Whether the platform has a secure heap for protected content.
    pub const fn with_secure_heap(mut self, v: bool) -> Self {
        self.secure_heap = v;
        self
    }

    /// Heap preferred for composer buffers that are not video-encoded.
    pub const fn with_composer_heap(mut self, heap: HeapKind) -> Self {
        self.composer_heap = heap;
        self
    }

    pub const fn hardware(&self) -> &HardwareTarget {
        &self.hardware
    }

    pub const fn display_size(&self) -> Option<(u32, u32)> {
        self.display_size
    }

    pub const fn init_afbc_headers(&self) -> bool {
        self.init_afbc_headers
    }

    pub const fn secure_heap(&self) -> bool {
        self.secure_heap
    }

    pub const fn composer_heap(&self) -> HeapKind {
        self.composer_heap
    }

    /// Whether a buffer of `pixels` covers enough of the display for AFBC.
    /// Always true when the display size is unknown.
    pub fn afbc_allowed_for_display(&self, pixels: u64) -> bool {
        match self.display_size {
            Some((w, h)) if w > 0 && h > 0 => {
                pixels.saturating_mul(100) / (w as u64 * h as u64) >= AFBC_MIN_DISPLAY_PERCENT
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AllocatorConfig::default();
        assert_eq!(config.display_size(), None);
        assert!(config.init_afbc_headers());
        assert!(!config.secure_heap());
        assert_eq!(config.composer_heap(), HeapKind::Compound);
        assert_eq!(*config.hardware(), HardwareTarget::new());
    }

    #[test]
    fn display_threshold() {
        let config = AllocatorConfig::new().with_display_size(100, 100);
        assert!(config.afbc_allowed_for_display(7_500));
        assert!(!config.afbc_allowed_for_display(7_499));
        assert!(config.afbc_allowed_for_display(1_000_000));
    }

    #[test]
    fn unknown_display_always_allows() {
        assert!(AllocatorConfig::new().afbc_allowed_for_display(1));
        assert!(
            AllocatorConfig::new()
                .with_display_size(0, 1080)
                .afbc_allowed_for_display(1)
        );
    }
}
