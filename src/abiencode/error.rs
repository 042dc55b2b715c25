//! Error type and Return values used by the decoder.

use thiserror::Error;

/// Represents all possible errors that can happen while decoding.
///
/// The decoder fails closed: any of these means nothing was returned, there
/// is no partially decoded value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The input ends before the value does.
    #[error("input truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    /// There are bytes left after the value was decoded.
    #[error("{0} trailing bytes after the encoded value")]
    TrailingBytes(usize),
    /// Padding inside the given slot is not all zero, which means the encoding
    /// is not the canonical one.
    #[error("non-zero padding in slot {0}")]
    NonZeroPadding(usize),
    /// A head offset does not point where the canonical layout puts the tail.
    #[error("unexpected offset {got}, expected {expected}")]
    InvalidOffset { expected: usize, got: usize },
    /// Dynamic data is larger than the codec accepts.
    #[error("dynamic data of {0} bytes exceeds the limit")]
    TooLarge(usize),
}

/// Alias for `Result` using the [Error] returned by the decoder.
pub type Result<T> = core::result::Result<T, Error>;
