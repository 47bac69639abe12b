//! WebSocket handler for lobby and game frames.
//!
//! DESIGN
//! ======
//! On upgrade, resolves the identity from `?sessionId=` (or mints one),
//! generates a client ID, and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by event name
//! - Notices queued by other connections or the sweeper → forward to client
//!
//! Handler functions are pure business logic: they validate, call into the
//! services, and return an `Outcome`. The dispatch layer owns all outbound
//! concerns: the terminal reply to the sender and notice fan-out.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `connected` with `identity` and `clientId`
//! 2. Client sends `join` to claim a display name; most events need it
//! 3. Each request → handler → Outcome → reply + notices
//! 4. Close → disconnect cleanup (presence, challenges, room) → lobby update

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{Data, ErrorCode, Frame, Status};
use crate::services::board::Position;
use crate::services::matchmaking::{self, ChallengeError, Resolution};
use crate::services::notify::{self, Notice};
use crate::services::registry::RoomLeft;
use crate::services::session::{Departure, GameStatus, Slot};
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what; handlers never send frames directly.
enum Outcome {
    /// Send done+data to sender only.
    Reply(Data),
    /// Reply to sender, then push notices to their audiences.
    ReplyAndNotify { reply: Data, notices: Vec<Notice> },
}

/// Protocol-level failures that are not owned by any service.
#[derive(Debug, thiserror::Error)]
enum GatewayError {
    #[error("join with a display name first")]
    NotRegistered,
    #[error("{0} required")]
    MissingField(&'static str),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
}

impl ErrorCode for GatewayError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotRegistered => "E_NOT_REGISTERED",
            Self::MissingField(_) => "E_MISSING_FIELD",
            Self::UnknownEvent(_) => "E_UNKNOWN_EVENT",
        }
    }
}

/// Per-socket state carried through the dispatch loop.
struct Connection {
    identity: String,
    client_id: Uuid,
    tx: mpsc::Sender<Frame>,
    /// Set once `join` claims a display name.
    registered: bool,
}

impl Connection {
    fn new(identity: String, tx: mpsc::Sender<Frame>) -> Self {
        Self { identity, client_id: Uuid::new_v4(), tx, registered: false }
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = params
        .get("sessionId")
        .map(|s| s.as_str().trim())
        .filter(|s| !s.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_owned);

    ws.on_upgrade(move |socket| run_ws(socket, state, identity))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, identity: String) {
    // Per-connection channel for notices addressed to this identity.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.client_channel_capacity);
    let mut conn = Connection::new(identity, client_tx);

    let welcome = Frame::request("connected", Data::new())
        .with_data("identity", conn.identity.clone())
        .with_data("clientId", conn.client_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(client_id = %conn.client_id, identity = %conn.identity, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        for frame in process_inbound_text(&state, &mut conn, &text).await {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    disconnect(&state, &conn).await;
    info!(client_id = %conn.client_id, identity = %conn.identity, "ws: client disconnected");
}

/// Transport-level disconnect: release presence, drop challenges, and leave
/// or suspend the identity's room. Skipped entirely when a newer socket
/// already backs the identity.
async fn disconnect(state: &AppState, conn: &Connection) {
    if !conn.registered || !state.presence.unregister(&conn.identity, conn.client_id).await {
        return;
    }
    let identity = conn.identity.as_str();
    let mut notices = Vec::new();

    for challenge in state.challenges.drop_for(identity) {
        let other = if challenge.from == identity { &challenge.to } else { &challenge.from };
        notices.push(notify::challenge_expired(other, &challenge.from, &challenge.to));
    }

    if let Some(room_id) = state.registry.find_active_room(identity).await {
        let playing = state
            .registry
            .snapshot(&room_id)
            .await
            .is_some_and(|s| s.game_status == GameStatus::Playing);

        if playing && state.config.reconnect_grace().is_some() {
            match state.registry.mark_disconnected(&room_id, identity, std::time::Instant::now()).await {
                Ok(snapshot) => {
                    info!(%room_id, %identity, "ws: player disconnected, awaiting reconnect");
                    notices.push(notify::room_snapshot("gameStateUpdate", &snapshot));
                }
                Err(e) => warn!(%room_id, %identity, error = %e, "ws: mark disconnected failed"),
            }
        } else {
            match state.registry.leave_room(&room_id, identity).await {
                Ok(left) => notices.extend(leave_notices(&room_id, identity, &left)),
                Err(e) => warn!(%room_id, %identity, error = %e, "ws: leave on disconnect failed"),
            }
        }
    }

    notices.push(notify::online_users(state).await);
    notify::deliver(state, notices).await;
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Keeps websocket transport concerns separate from frame handling, so tests
/// can drive dispatch without a socket.
async fn process_inbound_text(state: &AppState, conn: &mut Connection, text: &str) -> Vec<Frame> {
    let req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(client_id = %conn.client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("error", Data::new())
                .with_data("code", "E_INVALID_FRAME")
                .with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // Stamp the connection identity as `from`; never trust the client's.
    let req = req.with_from(conn.identity.clone());
    info!(client_id = %conn.client_id, id = %req.id, event = %req.event, "ws: recv frame");

    let result = match req.event.as_str() {
        "join" => handle_join(state, conn, &req).await,
        "checkActiveRoom" => handle_check_active_room(state, conn).await,
        "listOnline" => handle_list_online(state).await,
        event => {
            if conn.registered {
                dispatch_registered(state, conn, &req, event).await
            } else {
                Err(req.error_from(&GatewayError::NotRegistered))
            }
        }
    };

    // Apply outcome: the dispatch layer owns all outbound logic.
    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::ReplyAndNotify { reply, notices }) => {
            let sender_frame = req.done_with(reply);
            notify::deliver(state, notices).await;
            vec![sender_frame]
        }
        Err(err_frame) => vec![err_frame],
    }
}

async fn dispatch_registered(
    state: &AppState,
    conn: &Connection,
    req: &Frame,
    event: &str,
) -> Result<Outcome, Frame> {
    match event {
        "sendChallenge" | "sendFriendRequest" => handle_send_challenge(state, conn, req).await,
        "respondChallenge" => handle_respond_challenge(state, conn, req).await,
        "createRoom" => handle_create_room(state, conn, req).await,
        "joinRoom" => handle_join_room(state, conn, req).await,
        "makeMove" => handle_make_move(state, conn, req).await,
        "leaveGame" => handle_leave_game(state, conn, req).await,
        other => Err(req.error_from(&GatewayError::UnknownEvent(other.to_owned()))),
    }
}

// =============================================================================
// LOBBY HANDLERS
// =============================================================================

async fn handle_join(state: &AppState, conn: &mut Connection, req: &Frame) -> Result<Outcome, Frame> {
    let Some(name) = req.str_field("displayName") else {
        return Err(req.error_from(&GatewayError::MissingField("displayName")));
    };

    let stored = state
        .presence
        .register(&conn.identity, name, conn.client_id, conn.tx.clone())
        .await
        .map_err(|e| req.error_from(&e))?;
    conn.registered = true;

    let mut notices = Vec::new();
    let mut reply = Data::new();
    reply.insert("identity".into(), json!(conn.identity));
    reply.insert("displayName".into(), json!(stored));

    // Rejoining a live room resyncs the client.
    if let Some(room_id) = state.registry.find_active_room(&conn.identity).await {
        match state.registry.mark_reconnected(&room_id, &conn.identity).await {
            Ok((slot, snapshot)) => {
                info!(%room_id, identity = %conn.identity, "ws: player rejoined room");
                notices.push(notify::active_room(&conn.identity, Some(&room_id)));
                notices.push(notify::role_assigned(&conn.identity, &room_id, slot));
                notices.push(notify::room_snapshot("gameStateUpdate", &snapshot));
                reply.insert("roomId".into(), json!(room_id));
            }
            Err(e) => warn!(%room_id, identity = %conn.identity, error = %e, "ws: rejoin failed"),
        }
    }

    notices.push(notify::online_users(state).await);
    Ok(Outcome::ReplyAndNotify { reply, notices })
}

async fn handle_check_active_room(state: &AppState, conn: &Connection) -> Result<Outcome, Frame> {
    let room_id = state.registry.find_active_room(&conn.identity).await;
    let mut reply = Data::new();
    reply.insert("roomId".into(), json!(room_id));
    Ok(Outcome::ReplyAndNotify { reply, notices: vec![notify::active_room(&conn.identity, room_id.as_deref())] })
}

async fn handle_list_online(state: &AppState) -> Result<Outcome, Frame> {
    let users = state.presence.list_online().await;
    let mut data = Data::new();
    data.insert("users".into(), json!(users));
    Ok(Outcome::Reply(data))
}

async fn handle_send_challenge(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let Some(target) = req.str_field("target").or_else(|| req.str_field("to")) else {
        return Err(req.error_from(&GatewayError::MissingField("target")));
    };

    matchmaking::send_challenge(state, &conn.identity, target)
        .await
        .map_err(|e| req.error_from(&e))?;

    let name = state
        .presence
        .display_name(&conn.identity)
        .await
        .unwrap_or_else(|| conn.identity.clone());
    let mut data = Data::new();
    data.insert("from".into(), json!(conn.identity));
    data.insert("name".into(), json!(name));

    let mut reply = Data::new();
    reply.insert("target".into(), json!(target));
    Ok(Outcome::ReplyAndNotify { reply, notices: vec![Notice::to_identity(target, "challengeRequest", data)] })
}

async fn handle_respond_challenge(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let Some(from) = req.str_field("from") else {
        return Err(req.error_from(&GatewayError::MissingField("from")));
    };
    let Some(accept) = req.field::<bool>("accept") else {
        return Err(req.error_from(&GatewayError::MissingField("accept")));
    };

    let resolution = match matchmaking::respond_challenge(state, from, &conn.identity, accept).await {
        Ok(resolution) => resolution,
        Err(e) => {
            // A late answer still closes the challenge for the sender.
            if matches!(e, ChallengeError::ChallengeExpired(_)) {
                notify::deliver(state, vec![notify::challenge_expired(from, from, &conn.identity)]).await;
            }
            return Err(req.error_from(&e));
        }
    };

    match resolution {
        Resolution::Declined => {
            let mut data = Data::new();
            data.insert("by".into(), json!(conn.identity));
            Ok(Outcome::ReplyAndNotify {
                reply: Data::new(),
                notices: vec![Notice::to_identity(from, "challengeDeclined", data)],
            })
        }
        Resolution::Accepted { room_id, snapshot } => {
            let mut start = Data::new();
            start.insert("roomId".into(), json!(room_id));
            let notices = vec![
                Notice::to_identity(from, "matchStart", start.clone()),
                Notice::to_identity(conn.identity.clone(), "matchStart", start.clone()),
                notify::role_assigned(from, &room_id, Slot::Slot1),
                notify::role_assigned(&conn.identity, &room_id, Slot::Slot2),
                notify::room_snapshot("gameStateUpdate", &snapshot),
            ];
            Ok(Outcome::ReplyAndNotify { reply: start, notices })
        }
    }
}

// =============================================================================
// GAME HANDLERS
// =============================================================================

async fn handle_create_room(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let name = state
        .presence
        .display_name(&conn.identity)
        .await
        .unwrap_or_else(|| conn.identity.clone());
    let room_id = state
        .registry
        .create_room(&conn.identity, &name)
        .await
        .map_err(|e| req.error_from(&e))?;
    let Some(snapshot) = state.registry.snapshot(&room_id).await else {
        return Err(req.error(format!("room vanished: {room_id}")));
    };

    let mut reply = Data::new();
    reply.insert("roomId".into(), json!(room_id));
    let notices = vec![
        notify::role_assigned(&conn.identity, &room_id, Slot::Slot1),
        notify::room_snapshot("gameStateUpdate", &snapshot),
    ];
    Ok(Outcome::ReplyAndNotify { reply, notices })
}

async fn handle_join_room(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let Some(room_id) = req.room_hint() else {
        return Err(req.error_from(&GatewayError::MissingField("roomId")));
    };
    let name = state
        .presence
        .display_name(&conn.identity)
        .await
        .unwrap_or_else(|| conn.identity.clone());

    let (slot, snapshot) = state
        .registry
        .join_room(&room_id, &conn.identity, &name)
        .await
        .map_err(|e| req.error_from(&e))?;

    let mut reply = Data::new();
    reply.insert("roomId".into(), json!(room_id));
    reply.insert("slot".into(), json!(slot));
    let notices = vec![
        notify::role_assigned(&conn.identity, &room_id, slot),
        notify::room_snapshot("gameStateUpdate", &snapshot),
    ];
    Ok(Outcome::ReplyAndNotify { reply, notices })
}

async fn handle_make_move(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let Some(room_id) = req.room_hint() else {
        return Err(req.error_from(&GatewayError::MissingField("roomId")));
    };
    let Some(from) = req.field::<Position>("from") else {
        return Err(req.error_from(&GatewayError::MissingField("from")));
    };
    let Some(to) = req.field::<Position>("to") else {
        return Err(req.error_from(&GatewayError::MissingField("to")));
    };

    let applied = match state.registry.apply_move(&room_id, &conn.identity, from, to).await {
        Ok(applied) => applied,
        Err(e) => {
            debug!(%room_id, identity = %conn.identity, %from, %to, error = %e, "ws: move rejected");
            return Err(req.error_from(&e));
        }
    };

    let mut notices = vec![notify::room_snapshot("connectionMade", &applied.snapshot)];
    if applied.outcome.finished {
        notices.push(notify::room_snapshot("gameFinished", &applied.snapshot));
    }

    let mut reply = Data::new();
    reply.insert("completed".into(), json!(applied.outcome.completed));
    reply.insert("currentPlayer".into(), json!(applied.outcome.next));
    Ok(Outcome::ReplyAndNotify { reply, notices })
}

async fn handle_leave_game(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let room_id = match req.room_hint() {
        Some(room_id) => room_id,
        None => state
            .registry
            .find_active_room(&conn.identity)
            .await
            .ok_or_else(|| req.error_from(&GatewayError::MissingField("roomId")))?,
    };

    let left = state
        .registry
        .leave_room(&room_id, &conn.identity)
        .await
        .map_err(|e| req.error_from(&e))?;

    let mut notices = leave_notices(&room_id, &conn.identity, &left);
    notices.push(notify::active_room(&conn.identity, None));

    let mut reply = Data::new();
    reply.insert("roomId".into(), json!(room_id));
    Ok(Outcome::ReplyAndNotify { reply, notices })
}

/// Notices for the players left behind when `leaver` exits a room.
fn leave_notices(room_id: &str, leaver: &str, left: &RoomLeft) -> Vec<Notice> {
    let mut notices: Vec<Notice> = left
        .remaining
        .iter()
        .map(|identity| notify::user_left(identity, room_id, leaver))
        .collect();
    if matches!(left.departure, Departure::Forfeit { .. }) {
        notices.push(notify::room_snapshot("gameFinished", &left.snapshot));
    }
    notices
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame
            .data
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let message = frame
            .data
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        warn!(id = %frame.id, event = %frame.event, code, message, "ws: send frame status=Error");
    } else {
        debug!(id = %frame.id, event = %frame.event, status = ?frame.status, "ws: send frame");
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
