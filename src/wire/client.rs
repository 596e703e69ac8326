//! Client → server frames

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{expect_len, get_vector, put_vector, DecodeError, WireResult, BASE_FRAME_LEN, BASE_TAG_OFFSET};
use crate::geometry::Vector2;

/// Single-byte score request
pub const TAG_REQUEST_SCORE: u8 = 0b001;
/// Pad movement
pub const TAG_MOVE: u8 = 0b011;
/// Ball report base; never sent without one of the field bits
pub const TAG_BALL: u8 = 0b101;
pub const BIT_BALL_VELOCITY: u8 = 0b1000;
pub const BIT_BALL_POSITION: u8 = 0b10000;

pub const TAG_BALL_VELOCITY: u8 = TAG_BALL | BIT_BALL_VELOCITY;
pub const TAG_BALL_POSITION: u8 = TAG_BALL | BIT_BALL_POSITION;
pub const TAG_BALL_VELOCITY_POSITION: u8 = TAG_BALL | BIT_BALL_VELOCITY | BIT_BALL_POSITION;

const MOVE_LEN: usize = BASE_FRAME_LEN + 16;
const BALL_SINGLE_LEN: usize = BASE_FRAME_LEN + 16;
const BALL_BOTH_LEN: usize = BASE_FRAME_LEN + 32;

/// Messages sent from client to server
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClientMessage {
    /// Pad movement direction
    Move { timestamp: f64, direction: Vector2 },

    /// Ask for the current score
    RequestScore,

    /// Client-side ball velocity report
    BallVelocity { timestamp: f64, velocity: Vector2 },

    /// Client-side ball position report
    BallPosition { timestamp: f64, position: Vector2 },

    /// Client-side velocity and position report
    BallVelocityPosition {
        timestamp: f64,
        velocity: Vector2,
        position: Vector2,
    },
}

impl ClientMessage {
    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Move { .. } => MOVE_LEN,
            Self::RequestScore => 1,
            Self::BallVelocity { .. } | Self::BallPosition { .. } => BALL_SINGLE_LEN,
            Self::BallVelocityPosition { .. } => BALL_BOTH_LEN,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        match *self {
            Self::RequestScore => buf.put_u8(TAG_REQUEST_SCORE),
            Self::Move {
                timestamp,
                direction,
            } => {
                buf.put_f64_le(timestamp);
                buf.put_u8(TAG_MOVE);
                put_vector(&mut buf, direction);
            }
            Self::BallVelocity {
                timestamp,
                velocity,
            } => {
                buf.put_f64_le(timestamp);
                buf.put_u8(TAG_BALL_VELOCITY);
                put_vector(&mut buf, velocity);
            }
            Self::BallPosition {
                timestamp,
                position,
            } => {
                buf.put_f64_le(timestamp);
                buf.put_u8(TAG_BALL_POSITION);
                put_vector(&mut buf, position);
            }
            Self::BallVelocityPosition {
                timestamp,
                velocity,
                position,
            } => {
                buf.put_f64_le(timestamp);
                buf.put_u8(TAG_BALL_VELOCITY_POSITION);
                put_vector(&mut buf, velocity);
                put_vector(&mut buf, position);
            }
        }
        buf.freeze()
    }

    pub fn decode(frame: &[u8]) -> WireResult<Self> {
        match frame.len() {
            0 => return Err(DecodeError::Empty),
            1 => {
                return match frame[0] {
                    TAG_REQUEST_SCORE => Ok(Self::RequestScore),
                    tag => Err(DecodeError::UnknownTag { tag }),
                }
            }
            len if len < BASE_FRAME_LEN => {
                return Err(DecodeError::Truncated {
                    actual: len,
                    required: BASE_FRAME_LEN,
                })
            }
            _ => {}
        }

        let tag = frame[BASE_TAG_OFFSET];
        let expected = match tag {
            TAG_MOVE => MOVE_LEN,
            TAG_BALL_VELOCITY | TAG_BALL_POSITION => BALL_SINGLE_LEN,
            TAG_BALL_VELOCITY_POSITION => BALL_BOTH_LEN,
            _ => return Err(DecodeError::UnknownTag { tag }),
        };
        expect_len(frame, tag, expected)?;

        let mut buf = frame;
        let timestamp = buf.get_f64_le();
        buf.advance(1);

        let msg = match tag {
            TAG_MOVE => Self::Move {
                timestamp,
                direction: get_vector(&mut buf),
            },
            TAG_BALL_VELOCITY => Self::BallVelocity {
                timestamp,
                velocity: get_vector(&mut buf),
            },
            TAG_BALL_POSITION => Self::BallPosition {
                timestamp,
                position: get_vector(&mut buf),
            },
            _ => {
                let velocity = get_vector(&mut buf);
                let position = get_vector(&mut buf);
                Self::BallVelocityPosition {
                    timestamp,
                    velocity,
                    position,
                }
            }
        };
        Ok(msg)
    }
}
