//! Notice fan-out for server pushes addressed to an identity, a room, or the
//! whole lobby.
//!
//! Handlers and the sweeper only build `Notice` values; `deliver` resolves
//! each audience to connected identities and queues the frame with
//! `try_send`. A slow or gone client loses that frame and nothing else.

use serde_json::json;

use crate::frame::{Data, Frame, to_data};
use crate::services::session::{Slot, Snapshot};
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    Identity(String),
    /// Everyone seated in the room.
    Room(String),
    /// Every connected identity.
    Lobby,
}

#[derive(Debug, Clone)]
pub struct Notice {
    pub audience: Audience,
    pub frame: Frame,
}

impl Notice {
    #[must_use]
    pub fn to_identity(identity: impl Into<String>, event: &str, data: Data) -> Self {
        Self { audience: Audience::Identity(identity.into()), frame: Frame::request(event, data) }
    }

    #[must_use]
    pub fn to_room(room_id: &str, event: &str, data: Data) -> Self {
        Self {
            audience: Audience::Room(room_id.to_owned()),
            frame: Frame::request(event, data).with_room_id(room_id),
        }
    }

    #[must_use]
    pub fn to_lobby(event: &str, data: Data) -> Self {
        Self { audience: Audience::Lobby, frame: Frame::request(event, data) }
    }
}

/// Queue every notice for its audience.
pub async fn deliver(state: &AppState, notices: Vec<Notice>) {
    for notice in notices {
        match &notice.audience {
            Audience::Identity(identity) => {
                state.presence.notify(identity, &notice.frame).await;
            }
            Audience::Room(room_id) => {
                for identity in state.registry.members(room_id).await {
                    state.presence.notify(&identity, &notice.frame).await;
                }
            }
            Audience::Lobby => {
                state.presence.broadcast(&notice.frame).await;
            }
        }
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

/// Snapshot pushed to the whole room under `event` (`gameStateUpdate`,
/// `connectionMade`, `gameFinished`).
#[must_use]
pub fn room_snapshot(event: &str, snapshot: &Snapshot) -> Notice {
    Notice::to_room(&snapshot.room_id, event, to_data(snapshot))
}

#[must_use]
pub fn active_room(identity: &str, room_id: Option<&str>) -> Notice {
    let mut data = Data::new();
    data.insert("roomId".into(), json!(room_id));
    Notice::to_identity(identity, "activeRoom", data)
}

#[must_use]
pub fn role_assigned(identity: &str, room_id: &str, slot: Slot) -> Notice {
    let mut data = Data::new();
    data.insert("roomId".into(), json!(room_id));
    data.insert("slot".into(), json!(slot));
    let mut notice = Notice::to_identity(identity, "playerRoleAssigned", data);
    notice.frame.room_id = Some(room_id.to_owned());
    notice
}

#[must_use]
pub fn user_left(recipient: &str, room_id: &str, leaver: &str) -> Notice {
    let mut data = Data::new();
    data.insert("roomId".into(), json!(room_id));
    data.insert("identity".into(), json!(leaver));
    let mut notice = Notice::to_identity(recipient, "userLeft", data);
    notice.frame.room_id = Some(room_id.to_owned());
    notice
}

/// A pending challenge ended without an answer.
#[must_use]
pub fn challenge_expired(recipient: &str, from: &str, to: &str) -> Notice {
    let mut data = Data::new();
    data.insert("from".into(), json!(from));
    data.insert("to".into(), json!(to));
    Notice::to_identity(recipient, "challengeExpired", data)
}

/// Current lobby listing for everyone.
pub async fn online_users(state: &AppState) -> Notice {
    let users = state.presence.list_online().await;
    let mut data = Data::new();
    data.insert("users".into(), json!(users));
    Notice::to_lobby("onlineUsers", data)
}

#[cfg(test)]
#[path = "notify_test.rs"]
mod tests;
