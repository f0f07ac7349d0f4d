//! Internal format encoding.
//!
//! An [`InternalFormat`] packs a base [`FormatId`] into the low 32 bits and
//! AFBC modifier bits ([`AfbcModifiers`]) into the high 32 bits. Clients that
//! can only pass a 32-bit format use the private-format wrapping in
//! [`InternalFormat::unwrap_private`] / [`InternalFormat::wrap_private`].

use core::fmt;

use crate::format::FormatId;

bitflags::bitflags! {
    /// AFBC compression modifiers carried by an internal format.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct AfbcModifiers: u64 {
        /// 16x16 superblocks.
        const BASIC = 1 << 32;
        /// Split-block encoding.
        const SPLIT_BLOCK = 1 << 33;
        /// 32x8 superblocks.
        const WIDE_BLOCK = 1 << 34;
        /// Headers laid out in tiles instead of raster order.
        const TILED_HEADERS = 1 << 35;
        /// 64x4 superblocks.
        const EXTRA_WIDE_BLOCK = 1 << 36;
        /// Two bodies back to back for front-buffer rendering.
        const DOUBLE_BODY = 1 << 37;
    }
}

const FORMAT_MASK: u64 = 0x0000_0000_ffff_ffff;
const MODIFIER_MASK: u64 = 0xffff_ffff_0000_0000;

const WRAP_FORMAT_MASK: u32 = 0x0000_ffff;
const WRAP_MODIFIER_MASK: u32 = 0xffff_0000;
const WRAP_MODIFIER_SHIFT: u32 = 16;

// Fourcc-style formats do not fit in 16 bits; they travel as these aliases.
const WRAP_ALIASES: [(u32, FormatId); 3] = [
    (0x10B, FormatId::YV12),
    (0x10C, FormatId::Y8),
    (0x10D, FormatId::Y16),
];

/// How a requested format value is to be interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FormatKind {
    /// A platform format, subject to format selection.
    #[default]
    Usage,
    /// Already an internal format; used as-is after validation.
    Internal,
}

/// A base format plus AFBC modifiers.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct InternalFormat(u64);

impl InternalFormat {
    /// Combine a base format with modifiers.
    #[inline]
    pub const fn new(base: FormatId, modifiers: AfbcModifiers) -> Self {
        Self(base.raw() as u64 | modifiers.bits())
    }

    /// An uncompressed internal format.
    #[inline]
    pub const fn uncompressed(base: FormatId) -> Self {
        Self(base.raw() as u64)
    }

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn base(self) -> FormatId {
        FormatId::from_raw((self.0 & FORMAT_MASK) as u32)
    }

    /// Modifier bits. Unknown bits are dropped.
    #[inline]
    pub const fn modifiers(self) -> AfbcModifiers {
        AfbcModifiers::from_bits_truncate(self.0 & MODIFIER_MASK)
    }

    /// Whether any AFBC modifier is set.
    #[inline]
    pub const fn is_afbc(self) -> bool {
        !self.modifiers().is_empty()
    }

    /// Same base, with `extra` added.
    #[inline]
    pub const fn with(self, extra: AfbcModifiers) -> Self {
        Self(self.0 | extra.bits())
    }

    /// Same base, with `removed` cleared.
    #[inline]
    pub const fn without(self, removed: AfbcModifiers) -> Self {
        Self(self.0 & !removed.bits())
    }

    /// Same modifiers on a different base.
    #[inline]
    pub const fn with_base(self, base: FormatId) -> Self {
        Self((self.0 & MODIFIER_MASK) | base.raw() as u64)
    }

    /// Drop every modifier.
    #[inline]
    pub const fn strip_modifiers(self) -> Self {
        Self(self.0 & FORMAT_MASK)
    }

    /// Decode a 32-bit private format: base in the low half, modifier bits
    /// 32..48 in the high half.
    pub fn unwrap_private(wrapped: u32) -> Self {
        let low = wrapped & WRAP_FORMAT_MASK;
        let base = WRAP_ALIASES
            .iter()
            .find(|(alias, _)| *alias == low)
            .map_or(FormatId::from_raw(low), |&(_, id)| id);
        let modifiers = ((wrapped & WRAP_MODIFIER_MASK) as u64) << WRAP_MODIFIER_SHIFT;
        Self(base.raw() as u64 | modifiers)
    }

    /// Encode as a 32-bit private format. Returns `None` when the base or
    /// modifiers do not fit.
    pub fn wrap_private(self) -> Option<u32> {
        let base = self.base();
        let low = match WRAP_ALIASES.iter().find(|(_, id)| *id == base) {
            Some(&(alias, _)) => alias,
            None if base.raw() <= WRAP_FORMAT_MASK => base.raw(),
            None => return None,
        };
        let modifiers = self.modifiers().bits() >> WRAP_MODIFIER_SHIFT;
        if modifiers & !(WRAP_MODIFIER_MASK as u64) != 0 {
            return None;
        }
        Some(low | modifiers as u32)
    }
}

impl fmt::Debug for InternalFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalFormat")
            .field("base", &self.base())
            .field("modifiers", &self.modifiers())
            .finish()
    }
}

impl fmt::Display for InternalFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<FormatId> for InternalFormat {
    fn from(base: FormatId) -> Self {
        Self::uncompressed(base)
    }
}
