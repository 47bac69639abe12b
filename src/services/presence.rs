//! Presence directory. Who is connected and how to reach them.
//!
//! DESIGN
//! ======
//! One entry per identity: its display name, the `client_id` of the socket
//! currently backing it, and that socket's outbound channel. Name claims
//! check uniqueness and insert under the same write lock, so two sockets can
//! never both win the same name.
//!
//! A reconnect registers the identity again and replaces the entry. When the
//! old socket finally closes, its `unregister` carries the stale `client_id`
//! and leaves the new entry alone.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::frame::{ErrorCode, Frame};

pub const MAX_NAME_LEN: usize = 32;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PresenceError {
    #[error("display name already taken: {0}")]
    NameTaken(String),
    #[error("display name must be 1-32 characters")]
    InvalidName,
}

impl ErrorCode for PresenceError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NameTaken(_) => "E_NAME_TAKEN",
            Self::InvalidName => "E_INVALID_NAME",
        }
    }
}

/// Lobby row, as sent in `onlineUsers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub identity: String,
    pub display_name: String,
}

struct PresenceEntry {
    name: String,
    client_id: Uuid,
    tx: mpsc::Sender<Frame>,
}

#[derive(Clone, Default)]
pub struct PresenceDirectory {
    inner: Arc<RwLock<HashMap<String, PresenceEntry>>>,
}

// =============================================================================
// REGISTRATION
// =============================================================================

impl PresenceDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `name` for `identity` and route its notices to `tx`. Returns the
    /// trimmed name actually stored.
    ///
    /// # Errors
    ///
    /// `InvalidName` for empty or overlong names, `NameTaken` if another
    /// connected identity holds the name (case-insensitive).
    pub async fn register(
        &self,
        identity: &str,
        name: &str,
        client_id: Uuid,
        tx: mpsc::Sender<Frame>,
    ) -> Result<String, PresenceError> {
        let name = normalize_name(name)?;
        let folded = name.to_lowercase();

        let mut entries = self.inner.write().await;
        let taken = entries
            .iter()
            .any(|(other, entry)| other != identity && entry.name.to_lowercase() == folded);
        if taken {
            return Err(PresenceError::NameTaken(name));
        }

        let replaced = entries
            .insert(identity.to_owned(), PresenceEntry { name: name.clone(), client_id, tx })
            .is_some();
        info!(%identity, %client_id, display_name = %name, replaced, "presence: registered");
        Ok(name)
    }

    /// Remove `identity` if `client_id` still backs it. Returns whether an
    /// entry was removed.
    pub async fn unregister(&self, identity: &str, client_id: Uuid) -> bool {
        let mut entries = self.inner.write().await;
        let current = entries.get(identity).is_some_and(|e| e.client_id == client_id);
        if !current {
            debug!(%identity, %client_id, "presence: stale unregister ignored");
            return false;
        }
        entries.remove(identity);
        info!(%identity, %client_id, "presence: unregistered");
        true
    }
}

// =============================================================================
// QUERIES
// =============================================================================

impl PresenceDirectory {
    /// Everyone online, sorted by display name then identity.
    pub async fn list_online(&self) -> Vec<OnlineUser> {
        let entries = self.inner.read().await;
        let mut users: Vec<OnlineUser> = entries
            .iter()
            .map(|(identity, entry)| OnlineUser { identity: identity.clone(), display_name: entry.name.clone() })
            .collect();
        users.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then_with(|| a.identity.cmp(&b.identity))
        });
        users
    }

    pub async fn is_online(&self, identity: &str) -> bool {
        self.inner.read().await.contains_key(identity)
    }

    pub async fn display_name(&self, identity: &str) -> Option<String> {
        self.inner.read().await.get(identity).map(|e| e.name.clone())
    }

    /// Which socket currently backs `identity`.
    #[cfg(test)]
    pub async fn client_of(&self, identity: &str) -> Option<Uuid> {
        self.inner.read().await.get(identity).map(|e| e.client_id)
    }
}

// =============================================================================
// DELIVERY
// =============================================================================

impl PresenceDirectory {
    /// Queue a frame for one identity. Returns false if it is offline or its
    /// channel is full or closed.
    pub async fn notify(&self, identity: &str, frame: &Frame) -> bool {
        let entries = self.inner.read().await;
        let Some(entry) = entries.get(identity) else {
            return false;
        };
        let sent = entry.tx.try_send(frame.clone()).is_ok();
        if !sent {
            debug!(%identity, event = %frame.event, "presence: notice dropped");
        }
        sent
    }

    /// Queue a frame for every connected identity. Returns how many accepted it.
    pub async fn broadcast(&self, frame: &Frame) -> usize {
        let entries = self.inner.read().await;
        entries
            .values()
            .filter(|entry| entry.tx.try_send(frame.clone()).is_ok())
            .count()
    }
}

fn normalize_name(raw: &str) -> Result<String, PresenceError> {
    let name = raw.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(PresenceError::InvalidName);
    }
    Ok(name.to_owned())
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
