//! Server → client frames

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{
    expect_len, get_vector, put_vector, DecodeError, EncodeError, WireResult, BASE_FRAME_LEN,
    BASE_TAG_OFFSET,
};
use crate::geometry::{Segment, Vector2};

pub const TAG_TICK_CONFIRMATION: u8 = 0b0000_0001;
/// Ball update base; never sent without one of the field bits
pub const TAG_BALL: u8 = 0b0000_0010;
pub const TAG_SCORE: u8 = 0b0000_0100;
pub const TAG_COUNTDOWN: u8 = 0b0000_1000;
pub const TAG_DYNAMIC_SEGMENTS: u8 = 0b0001_0000;
pub const BIT_BALL_VELO_CHANGE: u8 = 0b0010_0000;
pub const BIT_BALL_POS: u8 = 0b0100_0000;

pub const TAG_BALL_VELO_CHANGE: u8 = TAG_BALL | BIT_BALL_VELO_CHANGE;
pub const TAG_BALL_POS: u8 = TAG_BALL | BIT_BALL_POS;

/// Segment records carry their count in a single byte
pub const MAX_SEGMENTS: usize = u8::MAX as usize;
pub const SEGMENT_RECORD_LEN: usize = 32;

const BALL_VELO_CHANGE_LEN: usize = BASE_FRAME_LEN + 24;
const BALL_POS_LEN: usize = BASE_FRAME_LEN + 16;
const SCORE_LEN: usize = BASE_FRAME_LEN + 2;
const COUNTDOWN_LEN: usize = 2;
const SEGMENTS_HEADER_LEN: usize = 2;

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Acknowledges an applied input
    TickConfirmation,

    /// Ball direction or speed changed
    BallVeloChange {
        time: f64,
        velocity: Vector2,
        speed_factor: f64,
    },

    /// Authoritative ball position
    BallPos { time: f64, position: Vector2 },

    Score { time: f64, p1: u8, p2: u8 },

    /// Seconds until the match starts; 0 is the start signal
    Countdown { seconds: u8 },

    /// Moving collision segments (the pad faces)
    DynamicSegments { segments: Vec<Segment> },
}

impl ServerMessage {
    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::TickConfirmation => 1,
            Self::BallVeloChange { .. } => BALL_VELO_CHANGE_LEN,
            Self::BallPos { .. } => BALL_POS_LEN,
            Self::Score { .. } => SCORE_LEN,
            Self::Countdown { .. } => COUNTDOWN_LEN,
            Self::DynamicSegments { segments } => {
                SEGMENTS_HEADER_LEN + SEGMENT_RECORD_LEN * segments.len()
            }
        }
    }

    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        match self {
            Self::TickConfirmation => buf.put_u8(TAG_TICK_CONFIRMATION),
            Self::BallVeloChange {
                time,
                velocity,
                speed_factor,
            } => {
                buf.put_f64_le(*time);
                buf.put_u8(TAG_BALL_VELO_CHANGE);
                put_vector(&mut buf, *velocity);
                buf.put_f64_le(*speed_factor);
            }
            Self::BallPos { time, position } => {
                buf.put_f64_le(*time);
                buf.put_u8(TAG_BALL_POS);
                put_vector(&mut buf, *position);
            }
            Self::Score { time, p1, p2 } => {
                buf.put_f64_le(*time);
                buf.put_u8(TAG_SCORE);
                buf.put_u8(*p1);
                buf.put_u8(*p2);
            }
            Self::Countdown { seconds } => {
                buf.put_u8(TAG_COUNTDOWN);
                buf.put_u8(*seconds);
            }
            Self::DynamicSegments { segments } => {
                let count = u8::try_from(segments.len()).map_err(|_| EncodeError::LimitExceeded {
                    what: "segment count",
                    limit: MAX_SEGMENTS,
                    actual: segments.len(),
                })?;
                buf.put_u8(TAG_DYNAMIC_SEGMENTS);
                buf.put_u8(count);
                for segment in segments {
                    put_vector(&mut buf, segment.a);
                    put_vector(&mut buf, segment.b);
                }
            }
        }
        Ok(buf.freeze())
    }

    pub fn decode(frame: &[u8]) -> WireResult<Self> {
        let Some(&head) = frame.first() else {
            return Err(DecodeError::Empty);
        };

        if let Some(result) = Self::decode_tag_first(head, frame) {
            return result;
        }

        if frame.len() < BASE_FRAME_LEN {
            return Err(match head {
                TAG_TICK_CONFIRMATION | TAG_COUNTDOWN => DecodeError::LengthMismatch {
                    tag: head,
                    expected: if head == TAG_COUNTDOWN { COUNTDOWN_LEN } else { 1 },
                    actual: frame.len(),
                },
                TAG_DYNAMIC_SEGMENTS if frame.len() >= SEGMENTS_HEADER_LEN => {
                    DecodeError::LengthMismatch {
                        tag: head,
                        expected: SEGMENTS_HEADER_LEN + SEGMENT_RECORD_LEN * frame[1] as usize,
                        actual: frame.len(),
                    }
                }
                _ => DecodeError::Truncated {
                    actual: frame.len(),
                    required: BASE_FRAME_LEN,
                },
            });
        }

        let tag = frame[BASE_TAG_OFFSET];
        let expected = match tag {
            TAG_BALL_VELO_CHANGE => BALL_VELO_CHANGE_LEN,
            TAG_BALL_POS => BALL_POS_LEN,
            TAG_SCORE => SCORE_LEN,
            _ => return Err(DecodeError::UnknownTag { tag }),
        };
        expect_len(frame, tag, expected)?;

        let mut buf = frame;
        let time = buf.get_f64_le();
        buf.advance(1);

        let msg = match tag {
            TAG_BALL_VELO_CHANGE => {
                let velocity = get_vector(&mut buf);
                let speed_factor = buf.get_f64_le();
                Self::BallVeloChange {
                    time,
                    velocity,
                    speed_factor,
                }
            }
            TAG_BALL_POS => Self::BallPos {
                time,
                position: get_vector(&mut buf),
            },
            _ => {
                let p1 = buf.get_u8();
                let p2 = buf.get_u8();
                Self::Score { time, p1, p2 }
            }
        };
        Ok(msg)
    }

    /// Frames whose tag is byte 0; `None` when `frame` is not one of them
    fn decode_tag_first(head: u8, frame: &[u8]) -> Option<WireResult<Self>> {
        match head {
            TAG_TICK_CONFIRMATION if frame.len() == 1 => Some(Ok(Self::TickConfirmation)),
            TAG_COUNTDOWN if frame.len() == COUNTDOWN_LEN => Some(Ok(Self::Countdown {
                seconds: frame[1],
            })),
            TAG_DYNAMIC_SEGMENTS if frame.len() >= SEGMENTS_HEADER_LEN => {
                let count = frame[1] as usize;
                if frame.len() != SEGMENTS_HEADER_LEN + SEGMENT_RECORD_LEN * count {
                    return None;
                }
                let mut buf = &frame[SEGMENTS_HEADER_LEN..];
                let segments = (0..count)
                    .map(|_| {
                        let a = get_vector(&mut buf);
                        let b = get_vector(&mut buf);
                        Segment::new(a, b)
                    })
                    .collect();
                Some(Ok(Self::DynamicSegments { segments }))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn segments(n: usize) -> Vec<Segment> {
        (0..n)
            .map(|i| {
                let f = i as f64;
                Segment::new(Vector2::new(f, f + 0.5), Vector2::new(-f, f * 2.0))
            })
            .collect()
    }

    #[test]
    fn countdown_two_seconds() {
        let bytes = ServerMessage::Countdown { seconds: 2 }.encode().unwrap();
        assert_eq!(&bytes[..], &[TAG_COUNTDOWN, 0x02]);
        assert_eq!(
            ServerMessage::decode(&bytes),
            Ok(ServerMessage::Countdown { seconds: 2 })
        );
    }

    #[test]
    fn score_layout() {
        let msg = ServerMessage::Score {
            time: 1234.5,
            p1: 3,
            p2: 5,
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.len(), 11);
        assert_eq!(&bytes[0..8], &1234.5f64.to_le_bytes());
        assert_eq!(bytes[8], TAG_SCORE);
        assert_eq!(bytes[9], 3);
        assert_eq!(bytes[10], 5);
        assert_eq!(ServerMessage::decode(&bytes), Ok(msg));
    }

    #[test]
    fn ball_velo_change_layout() {
        let msg = ServerMessage::BallVeloChange {
            time: 7.0,
            velocity: Vector2::new(1.0, -0.25),
            speed_factor: 1.05,
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.len(), 33);
        assert_eq!(bytes[8], TAG_BALL | BIT_BALL_VELO_CHANGE);
        assert_eq!(&bytes[25..33], &1.05f64.to_le_bytes());
        assert_eq!(ServerMessage::decode(&bytes), Ok(msg));
    }

    #[test]
    fn dynamic_segments_sizes() {
        for n in [0usize, 1, 2, 255] {
            let msg = ServerMessage::DynamicSegments { segments: segments(n) };
            let bytes = msg.encode().unwrap();
            assert_eq!(bytes.len(), 2 + 32 * n);
            assert_eq!(bytes[1] as usize, n);
            assert_eq!(ServerMessage::decode(&bytes), Ok(msg));
        }
    }

    #[test]
    fn dynamic_segments_over_limit() {
        let msg = ServerMessage::DynamicSegments {
            segments: segments(256),
        };
        assert_eq!(
            msg.encode(),
            Err(EncodeError::LimitExceeded {
                what: "segment count",
                limit: 255,
                actual: 256
            })
        );
    }

    #[test]
    fn dynamic_segments_count_mismatch_is_rejected() {
        let bytes = ServerMessage::DynamicSegments {
            segments: segments(3),
        }
        .encode()
        .unwrap();
        assert!(ServerMessage::decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(ServerMessage::decode(&bytes[..2]).is_err());
    }

    #[test]
    fn short_and_unknown_frames() {
        assert_eq!(ServerMessage::decode(&[]), Err(DecodeError::Empty));
        assert_eq!(
            ServerMessage::decode(&[TAG_TICK_CONFIRMATION]),
            Ok(ServerMessage::TickConfirmation)
        );
        assert!(matches!(
            ServerMessage::decode(&[TAG_COUNTDOWN]),
            Err(DecodeError::LengthMismatch { expected: 2, .. })
        ));
        assert_eq!(
            ServerMessage::decode(&[0xAA, 0, 0]),
            Err(DecodeError::Truncated {
                actual: 3,
                required: 9
            })
        );
        let mut frame = vec![0u8; 11];
        frame[8] = 0xEE;
        assert_eq!(
            ServerMessage::decode(&frame),
            Err(DecodeError::UnknownTag { tag: 0xEE })
        );
    }

    fn finite() -> impl Strategy<Value = f64> {
        prop::num::f64::NORMAL | prop::num::f64::ZERO | prop::num::f64::SUBNORMAL
    }

    fn vector() -> impl Strategy<Value = Vector2> {
        (finite(), finite()).prop_map(|(x, y)| Vector2::new(x, y))
    }

    fn message() -> impl Strategy<Value = ServerMessage> {
        prop_oneof![
            Just(ServerMessage::TickConfirmation),
            (finite(), vector(), finite()).prop_map(|(time, velocity, speed_factor)| {
                ServerMessage::BallVeloChange {
                    time,
                    velocity,
                    speed_factor,
                }
            }),
            (finite(), vector()).prop_map(|(time, position)| ServerMessage::BallPos {
                time,
                position
            }),
            (finite(), any::<u8>(), any::<u8>())
                .prop_map(|(time, p1, p2)| ServerMessage::Score { time, p1, p2 }),
            any::<u8>().prop_map(|seconds| ServerMessage::Countdown { seconds }),
            prop::collection::vec((vector(), vector()), 0..8).prop_map(|pairs| {
                ServerMessage::DynamicSegments {
                    segments: pairs.into_iter().map(|(a, b)| Segment::new(a, b)).collect(),
                }
            }),
        ]
    }

    proptest! {
        #[test]
        fn prop_server_roundtrip(msg in message()) {
            let bytes = msg.encode().unwrap();
            prop_assert_eq!(bytes.len(), msg.encoded_len());
            prop_assert_eq!(ServerMessage::decode(&bytes), Ok(msg));
        }

        #[test]
        fn prop_decode_never_panics(frame in prop::collection::vec(any::<u8>(), 0..128)) {
            let _ = ServerMessage::decode(&frame);
        }
    }
}
