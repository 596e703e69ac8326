//! Sending half of a player's WebSocket, shared with the session they play in

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::game::UserId;
use crate::wire::ServerMessage;
use crate::ws::protocol::ServerNotice;

/// Outbound queue depth per connection
pub const OUTBOUND_CAPACITY: usize = 256;

/// WebSocket close code for policy violations
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Something the writer task should put on the socket
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Encoded binary game frame
    Frame(Bytes),
    /// JSON text notice
    Notice(ServerNotice),
    /// Close the socket
    Close { code: u16, reason: String },
}

/// Non-owning handle to a connection.
///
/// Sends never wait: a full or closed queue drops the message. The socket's
/// lifetime belongs to the transport task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub user_id: UserId,
    tx: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(user_id: UserId) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let handle = Self {
            id: Uuid::new_v4(),
            user_id,
            tx,
        };
        (handle, rx)
    }

    /// Queue an already encoded frame
    pub fn send_bytes(&self, frame: Bytes) -> bool {
        self.push(Outbound::Frame(frame))
    }

    pub fn send_message(&self, msg: &ServerMessage) -> bool {
        match msg.encode() {
            Ok(frame) => self.send_bytes(frame),
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "Failed to encode frame");
                false
            }
        }
    }

    pub fn notify(&self, notice: ServerNotice) -> bool {
        self.push(Outbound::Notice(notice))
    }

    /// Ask the transport to close the socket
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.push(Outbound::Close {
            code,
            reason: reason.into(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn push(&self, item: Outbound) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(user_id = %self.user_id, "Outbound queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(user_id = %self.user_id, "Send on closed connection");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_after_receiver_dropped_is_harmless() {
        let (conn, rx) = ConnectionHandle::new(1);
        drop(rx);
        assert!(conn.is_closed());
        assert!(!conn.send_message(&ServerMessage::TickConfirmation));
    }

    #[test]
    fn frames_are_encoded_once_queued() {
        let (conn, mut rx) = ConnectionHandle::new(1);
        assert!(conn.send_message(&ServerMessage::Countdown { seconds: 3 }));
        match rx.try_recv().unwrap() {
            Outbound::Frame(bytes) => assert_eq!(&bytes[..], &[0b1000, 3]),
            other => panic!("unexpected outbound: {other:?}"),
        }
    }
}
