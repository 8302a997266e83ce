//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use glam::DVec3;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{PlayerDirectory, PlayerInput, Transform};
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};
use crate::ws::session::OUTBOUND_BUFFER;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Reconnecting players keep their id; new players get one assigned
    pub player_id: Option<Uuid>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let player_id = query.player_id.unwrap_or_else(Uuid::new_v4);
    info!(player_id = %player_id, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, player_id, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, player_id: Uuid, state: AppState) {
    info!(player_id = %player_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    // Send welcome message
    let welcome = ServerMsg::Welcome {
        player_id,
        world_id: state.default_world.0,
        server_time: unix_millis(),
        tick_rate: state.sim.settings().tick_rate,
    };

    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(player_id = %player_id, error = %e, "Failed to send welcome");
        return;
    }

    // Register the session so the simulation can reach this connection
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
    state
        .sessions
        .register(player_id, state.default_world, state.spawn_point(), out_tx.clone());

    // Run the session with split read/write
    run_session(player_id, &state, ws_sink, ws_stream, out_rx).await;

    // Cleanup on disconnect, unless a newer connection took the player over
    if state.sessions.unregister(player_id, &out_tx) {
        state.sim.on_disconnect(player_id);
    } else {
        debug!(player_id = %player_id, "Session already replaced, skipping cleanup");
    }

    info!(player_id = %player_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    player_id: Uuid,
    state: &AppState,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    mut out_rx: mpsc::Receiver<ServerMsg>,
) {
    let rate_limiter = PlayerRateLimiter::new();

    // Spawn writer task: outbound queue -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(player_id = %player_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> simulation
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_message() {
                    warn!(player_id = %player_id, "Rate limited client message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => dispatch(player_id, state, client_msg),
                    Err(e) => {
                        warn!(player_id = %player_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(player_id = %player_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(player_id = %player_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(player_id = %player_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Abort writer task
    writer_handle.abort();
}

/// Route one client message to the session registry or the simulation
fn dispatch(player_id: Uuid, state: &AppState, msg: ClientMsg) {
    match msg {
        ClientMsg::Hello {
            supports_prediction,
        } => {
            state
                .sessions
                .set_supports_prediction(player_id, supports_prediction);
            if supports_prediction
                && state.config.predict_by_default
                && !state.sim.is_prediction_enabled(player_id)
            {
                state.sim.set_prediction_mode(player_id, true, None, None);
            } else {
                state.sim.flush_client_mode(player_id);
            }
        }
        ClientMsg::Input {
            sequence_id,
            input_bits,
            yaw,
            pitch,
        } => {
            let input = PlayerInput::from_wire(sequence_id, input_bits, yaw, pitch);
            state.sim.handle_input(player_id, input);
        }
        ClientMsg::Move {
            x,
            y,
            z,
            yaw,
            pitch,
        } => {
            let incoming = Transform::new(DVec3::new(x, y, z), yaw, pitch);
            if !incoming.position.is_finite() {
                warn!(player_id = %player_id, "Non-finite move rejected");
                return;
            }
            let accepted = state.sim.filter_engine_move(player_id, incoming);
            state.sessions.apply_transform(player_id, accepted);
            if accepted.position != incoming.position {
                state.sessions.send(
                    player_id,
                    ServerMsg::Position {
                        x: accepted.position.x,
                        y: accepted.position.y,
                        z: accepted.position.z,
                        yaw: accepted.yaw,
                        pitch: accepted.pitch,
                    },
                );
            }
        }
        ClientMsg::SetPrediction {
            enabled,
            controller_id,
            config,
        } => {
            state
                .sim
                .set_prediction_mode(player_id, enabled, controller_id.as_deref(), config);
        }
        ClientMsg::SetGameMode { mode } => {
            if state.sessions.set_game_mode(player_id, mode).is_some() {
                state.sim.on_game_mode_change(player_id, mode);
            }
        }
        ClientMsg::Ping { t } => {
            state.sessions.send(player_id, ServerMsg::Pong { t });
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
