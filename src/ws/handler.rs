//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::game::UserId;
use crate::http::middleware::{verify_jwt, AuthError, AuthenticatedUser};
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;
use crate::wire::ClientMessage;
use crate::ws::connection::{ConnectionHandle, Outbound, CLOSE_POLICY_VIOLATION};
use crate::ws::protocol::ServerNotice;

/// Consecutive undecodable frames tolerated before the socket is closed
pub const MAX_MALFORMED_FRAMES: u32 = 16;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    #[serde(default)]
    pub token: String,
}

/// WebSocket upgrade handler. Rejected tokens still get an upgraded socket
/// so the client can read why before the close frame.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    match verify_jwt(&query.token, &state.config.jwt_secret) {
        Ok(claims) => {
            info!(user_id = %claims.user_id, "WebSocket upgrade for authenticated user");
            let user = AuthenticatedUser::from(claims);
            ws.on_upgrade(move |socket| handle_socket(socket, user, state))
        }
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            ws.on_upgrade(move |socket| reject_socket(socket, e))
        }
    }
}

async fn reject_socket(mut socket: WebSocket, error: AuthError) {
    let notice = ServerNotice::error("unauthorized", error.to_string());
    if let Ok(message) = outbound_message(Outbound::Notice(notice)) {
        let _ = socket.send(message).await;
    }
    let close = Outbound::Close {
        code: CLOSE_POLICY_VIOLATION,
        reason: "unauthorized".to_string(),
    };
    if let Ok(message) = outbound_message(close) {
        let _ = socket.send(message).await;
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, user: AuthenticatedUser, state: AppState) {
    let user_id = user.user_id;
    let (ws_sink, mut ws_stream) = socket.split();
    let (connection, outbound) = ConnectionHandle::new(user_id);
    let connection_id = connection.id;
    info!(user_id = %user_id, connection_id = %connection_id, "New WebSocket connection");

    connection.notify(ServerNotice::Welcome {
        user_id,
        login: user.login,
        server_time: unix_millis(),
    });
    state.matchmaker.connect(connection.clone());

    let mut writer = tokio::spawn(write_loop(user_id, ws_sink, outbound));

    let rate_limiter = PlayerRateLimiter::new();
    let mut malformed = 0u32;

    // Reader loop: WebSocket -> session. Ends when either side goes away.
    loop {
        let result = tokio::select! {
            next = ws_stream.next() => match next {
                Some(result) => result,
                None => break,
            },
            _ = &mut writer => {
                debug!(user_id = %user_id, "Writer finished, closing reader");
                break;
            }
        };

        match result {
            Ok(Message::Binary(data)) => {
                if !rate_limiter.check_input() {
                    debug!(user_id = %user_id, "Rate limited input frame");
                    continue;
                }

                match ClientMessage::decode(&data) {
                    Ok(message) => {
                        malformed = 0;
                        state.matchmaker.route_input(user_id, message);
                    }
                    Err(e) => {
                        malformed += 1;
                        warn!(user_id = %user_id, error = %e, malformed, "Dropping undecodable frame");
                        if malformed > MAX_MALFORMED_FRAMES {
                            connection.close(CLOSE_POLICY_VIOLATION, "too many malformed frames");
                        }
                    }
                }
            }
            Ok(Message::Text(_)) => {
                debug!(user_id = %user_id, "Ignoring text frame");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(user_id = %user_id, "Client initiated close");
                break;
            }
            Err(e) => {
                debug!(user_id = %user_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer.abort();
    state.matchmaker.disconnect(user_id, connection_id);

    info!(user_id = %user_id, connection_id = %connection_id, "WebSocket connection closed");
}

/// Drain the connection's outbound queue onto the socket
async fn write_loop(
    user_id: UserId,
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: tokio::sync::mpsc::Receiver<Outbound>,
) {
    while let Some(item) = outbound.recv().await {
        let closing = matches!(item, Outbound::Close { .. });
        let message = match outbound_message(item) {
            Ok(message) => message,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Failed to serialize notice");
                continue;
            }
        };

        if let Err(e) = sink.send(message).await {
            debug!(user_id = %user_id, error = %e, "WebSocket send failed");
            break;
        }
        if closing {
            break;
        }
    }
}

/// Turn a queued item into the frame that goes on the wire
fn outbound_message(item: Outbound) -> Result<Message, serde_json::Error> {
    Ok(match item {
        Outbound::Frame(bytes) => Message::Binary(bytes.to_vec()),
        Outbound::Notice(notice) => Message::Text(serde_json::to_string(&notice)?),
        Outbound::Close { code, reason } => Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })),
    })
}
