//! Binary wire protocol for game-state traffic.
//!
//! Frames are fixed-layout byte buffers: f64 fields are little-endian IEEE-754,
//! tags and small counters are single bytes. Tags are bit patterns: a shared
//! base bit plus optional field bits, reproduced here as one enum variant per
//! combination actually sent.

pub mod client;
pub mod error;
pub mod server;

pub use client::ClientMessage;
pub use error::{DecodeError, EncodeError, WireResult};
pub use server::ServerMessage;

use bytes::{Buf, BufMut};

use crate::geometry::Vector2;

/// Size of a time-prefixed base frame (f64 time + u8 tag)
pub const BASE_FRAME_LEN: usize = 9;

/// Offset of the tag byte in time-prefixed frames
pub const BASE_TAG_OFFSET: usize = 8;

pub(crate) fn put_vector(buf: &mut impl BufMut, v: Vector2) {
    buf.put_f64_le(v.x);
    buf.put_f64_le(v.y);
}

pub(crate) fn get_vector(buf: &mut impl Buf) -> Vector2 {
    let x = buf.get_f64_le();
    let y = buf.get_f64_le();
    Vector2::new(x, y)
}

/// Check `frame` is exactly `expected` bytes for `tag`
pub(crate) fn expect_len(frame: &[u8], tag: u8, expected: usize) -> WireResult<()> {
    if frame.len() < expected {
        return Err(DecodeError::Truncated {
            actual: frame.len(),
            required: expected,
        });
    }
    if frame.len() != expected {
        return Err(DecodeError::LengthMismatch {
            tag,
            expected,
            actual: frame.len(),
        });
    }
    Ok(())
}
