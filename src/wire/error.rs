//! Error types for binary frame encoding and decoding

/// Result type for frame decoding
pub type WireResult<T> = Result<T, DecodeError>;

/// Malformed or truncated binary frame
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,

    #[error("truncated frame: {actual} bytes, need at least {required}")]
    Truncated { actual: usize, required: usize },

    #[error("unknown message tag: 0b{tag:08b}")]
    UnknownTag { tag: u8 },

    #[error("frame length {actual} does not match tag 0b{tag:08b} (expected {expected})")]
    LengthMismatch {
        tag: u8,
        expected: usize,
        actual: usize,
    },
}

/// Errors that can occur while building a frame
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("{what} limit exceeded: {actual} > {limit}")]
    LimitExceeded {
        what: &'static str,
        limit: usize,
        actual: usize,
    },
}
