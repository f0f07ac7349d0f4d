//! Error type shared by allocation, lifetime and access operations.

use crate::arena::HeapKind;

/// Why an allocator operation failed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No allocation type can satisfy the format and usage combination.
    #[error("format {format:#x} is not supported for usage {usage:#x}")]
    UnsupportedFormat {
        /// Requested format, including any modifier bits.
        format: u64,
        usage: u64,
    },
    /// A dimension, region or descriptor field is out of range.
    #[error("invalid parameters: {0}")]
    InvalidParameters(&'static str),
    /// Backing memory could not be obtained.
    #[error("out of memory: {size} bytes from the {heap:?} heap")]
    AllocationExhausted { heap: HeapKind, size: usize },
    /// The request is legal but not implemented for this buffer.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
    /// The handle failed structural validation.
    #[error("bad buffer handle")]
    BadHandle,
}

/// Result alias using [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;
