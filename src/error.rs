use thiserror::Error;

/// Typed failures surfaced at encode/decode call boundaries.
///
/// All three kinds are detected eagerly, before any byte of output is
/// written; a failed call leaves its output buffer untouched. There is no
/// fatal category: every error is local to one call.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Input dimensions violate a tiling/divisibility invariant, or a buffer
    /// size disagrees with its declared metadata.
    #[error("shape error: {0}")]
    Shape(String),
    /// A quantized code exceeds `2^bits - 1`, or a scale tensor matches
    /// neither supported regime.
    #[error("domain error: {0}")]
    Domain(String),
    /// Packer-produced buffer and decoder call disagree on tiling
    /// parameters.
    #[error("precondition violation: {0}")]
    Precondition(String),
}

pub type CodecResult<T> = Result<T, CodecError>;
