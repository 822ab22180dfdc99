//! WebSocket upgrade handler and per-connection session

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::game::world::JoinError;
use crate::game::player::MoveFlags;
use crate::game::{InputCommand, PlayerCommand, PlayerId, ServerHandle, ShootCommand};
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{parse_client_msg, ClientMsg, ProtocolError, ServerMsg};

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Messages for this client only, merged into the broadcast stream
const DIRECT_CHANNEL_CAPACITY: usize = 16;
/// Time the writer gets to flush a final notice after the reader stops
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Why a connection never got a player
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("No join message within {0:?}")]
    Timeout(Duration),

    #[error("Connection closed before joining")]
    Closed,

    #[error("First message was not a valid join: {0}")]
    InvalidJoin(#[from] ProtocolError),

    #[error("Expected a join message")]
    UnexpectedMessage,

    #[error("WebSocket error: {0}")]
    Socket(#[from] axum::Error),
}

/// Outbound send failure
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("WebSocket send failed: {0}")]
    Socket(#[from] axum::Error),
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let server = state.server.clone();

    let timeout = state.config.net.handshake_timeout;
    let name = match tokio::time::timeout(timeout, await_join(&mut ws_stream)).await {
        Ok(Ok(name)) => name,
        Ok(Err(e)) => {
            debug!(error = %e, "Handshake failed");
            if matches!(e, HandshakeError::InvalidJoin(_) | HandshakeError::UnexpectedMessage) {
                let _ = send_msg(&mut ws_sink, &error_msg("invalid_join", &e)).await;
            }
            let _ = ws_sink.close().await;
            return;
        }
        Err(_) => {
            let e = HandshakeError::Timeout(timeout);
            debug!(error = %e, "Handshake failed");
            let _ = send_msg(&mut ws_sink, &error_msg("handshake_timeout", &e)).await;
            let _ = ws_sink.close().await;
            return;
        }
    };

    // subscribe first so nothing published after the join ack is missed
    let broadcast_rx = server.subscribe();

    let accepted = match server.join(&name).await {
        Ok(accepted) => accepted,
        Err(JoinError::ServerFull { max_players }) => {
            info!(name = %name, max_players, "Join refused, server full");
            let _ = send_msg(&mut ws_sink, &ServerMsg::ServerFull { max_players }).await;
            let _ = ws_sink.close().await;
            return;
        }
        Err(e) => {
            info!(name = %name, error = %e, "Join refused");
            let reject = ServerMsg::JoinRejected {
                reason: e.to_string(),
            };
            let _ = send_msg(&mut ws_sink, &reject).await;
            let _ = ws_sink.close().await;
            return;
        }
    };

    let id = accepted.id;
    let ack = ServerMsg::JoinAck {
        id,
        tick: accepted.tick,
        snapshot: accepted.snapshot.entities.clone(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &ack).await {
        warn!(player_id = %id, error = %e, "Failed to send join ack");
        server.leave(id).await;
        return;
    }

    info!(player_id = %id, name = %name, "Player connected");

    run_session(id, &state, ws_sink, ws_stream, broadcast_rx).await;

    server.leave(id).await;
    info!(player_id = %id, "WebSocket connection closed");
}

/// Wait for the first text frame and require it to be a join
async fn await_join(ws_stream: &mut WsStream) -> Result<String, HandshakeError> {
    while let Some(result) = ws_stream.next().await {
        match result? {
            Message::Text(text) => {
                return match parse_client_msg(&text)? {
                    ClientMsg::Join { name } => Ok(name),
                    _ => Err(HandshakeError::UnexpectedMessage),
                };
            }
            Message::Close(_) => return Err(HandshakeError::Closed),
            _ => {}
        }
    }
    Err(HandshakeError::Closed)
}

/// Run the WebSocket session with read/write split
async fn run_session(
    id: PlayerId,
    state: &AppState,
    mut ws_sink: WsSink,
    mut ws_stream: WsStream,
    mut broadcast_rx: broadcast::Receiver<ServerMsg>,
) {
    let server = &state.server;
    let rate_limiter = PlayerRateLimiter::new(state.config.net.input_rate_limit);
    let (direct_tx, mut direct_rx) = mpsc::channel::<ServerMsg>(DIRECT_CHANNEL_CAPACITY);

    // Spawn writer task: broadcasts and direct replies -> WebSocket
    let mut writer_handle = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                received = broadcast_rx.recv() => match received {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(player_id = %id, lagged_count = n, "Client lagged, skipping {} messages", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(player_id = %id, "Broadcast channel closed");
                        break;
                    }
                },
                direct = direct_rx.recv() => match direct {
                    Some(msg) => msg,
                    None => break,
                },
            };

            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(player_id = %id, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    // Reader loop: WebSocket -> command queue
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    debug!(player_id = %id, "Rate limited input message");
                    continue;
                }

                let msg = match parse_client_msg(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!(player_id = %id, error = %e, "Dropped client message");
                        if !rate_limiter.record_malformed() {
                            warn!(player_id = %id, "Too many malformed messages, closing");
                            let _ = direct_tx.send(error_msg("malformed", &e)).await;
                            break;
                        }
                        continue;
                    }
                };

                if !handle_client_msg(id, msg, server, &direct_tx) {
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                debug!(player_id = %id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(player_id = %id, "Client initiated close");
                break;
            }
            Err(e) => {
                debug!(player_id = %id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // closing the direct channel stops the writer once it has flushed
    drop(direct_tx);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer_handle)
        .await
        .is_err()
    {
        writer_handle.abort();
    }
}

/// Route one validated message. Returns false when the session should end.
fn handle_client_msg(
    id: PlayerId,
    msg: ClientMsg,
    server: &ServerHandle,
    direct_tx: &mpsc::Sender<ServerMsg>,
) -> bool {
    match msg {
        ClientMsg::Input {
            seq,
            move_flags,
            yaw,
            pitch,
            jump,
            dash,
        } => server.push_command(PlayerCommand::Input(InputCommand {
            player_id: id,
            seq,
            move_flags: MoveFlags(move_flags),
            yaw,
            pitch,
            jump,
            dash,
        })),
        ClientMsg::Shoot {
            seq,
            origin_yaw,
            origin_pitch,
        } => server.push_command(PlayerCommand::Shoot(ShootCommand {
            player_id: id,
            seq,
            yaw: origin_yaw,
            pitch: origin_pitch,
        })),
        ClientMsg::Ping { t } => {
            let pong = ServerMsg::Pong {
                t,
                server_time: unix_millis(),
            };
            if direct_tx.try_send(pong).is_err() {
                debug!(player_id = %id, "Pong dropped, writer busy");
            }
        }
        ClientMsg::Join { .. } => {
            debug!(player_id = %id, "Ignoring repeated join");
        }
        ClientMsg::Leave => {
            debug!(player_id = %id, "Client left");
            return false;
        }
    }
    true
}

fn error_msg(code: &str, err: &impl std::fmt::Display) -> ServerMsg {
    ServerMsg::Error {
        code: code.to_string(),
        message: err.to_string(),
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut WsSink, msg: &ServerMsg) -> Result<(), SendError> {
    let json = serde_json::to_string(msg)?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}
