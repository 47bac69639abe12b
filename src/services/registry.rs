//! Session registry: owns every live game session.
//!
//! DESIGN
//! ======
//! Rooms live in a map of `room_id -> Arc<Mutex<GameSession>>` behind one
//! `RwLock`, alongside the `identity -> room_id` membership map. The outer
//! lock is only held to look up, insert, or remove rooms; all game logic runs
//! under the room's own mutex, so moves in different rooms never contend.
//!
//! LOCK ORDER
//! ==========
//! Registry lock, then room lock. Code holding a room lock never waits on the
//! registry lock: operations that must update memberships after touching a
//! session drop the room guard first.
//!
//! An identity maps to at most one room. The mapping is released when that
//! room's game finishes, while the finished room itself lingers until the
//! sweeper drops it after a grace period.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::frame::ErrorCode;
use crate::services::board::{Grid, Position};
use crate::services::session::{Departure, GameSession, GameStatus, MoveOutcome, SessionError, Slot, Snapshot};

// =============================================================================
// TYPES
// =============================================================================

pub type SharedSession = Arc<Mutex<GameSession>>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{identity} is already in room {room_id}")]
    AlreadyInRoom { identity: String, room_id: String },
    #[error("room not found: {0}")]
    RoomNotFound(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ErrorCode for RegistryError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyInRoom { .. } => "E_ALREADY_IN_ROOM",
            Self::RoomNotFound(_) => "E_ROOM_NOT_FOUND",
            Self::Session(e) => e.error_code(),
        }
    }
}

/// Result of a move accepted by a room.
#[derive(Debug, Clone)]
pub struct MoveApplied {
    pub outcome: MoveOutcome,
    pub snapshot: Snapshot,
}

/// Result of a player leaving a room.
#[derive(Debug, Clone)]
pub struct RoomLeft {
    pub departure: Departure,
    pub snapshot: Snapshot,
    /// Identities still seated, for notification.
    pub remaining: Vec<String>,
}

/// Timing rules applied by `sweep`.
#[derive(Debug, Clone, Copy)]
pub struct SweepPolicy {
    pub waiting_ttl: Duration,
    pub finished_grace: Duration,
    /// `None` when disconnects forfeit immediately.
    pub disconnect_grace: Option<Duration>,
}

/// Something the sweeper did to a room.
#[derive(Debug, Clone)]
pub enum SweepEvent {
    /// A `waiting` room outlived its TTL and was removed.
    Abandoned { room_id: String, identities: Vec<String> },
    /// A disconnected player never came back; the game is over.
    Forfeited { room_id: String, leaver: String, snapshot: Snapshot },
    /// A finished room passed its grace period and was removed.
    Dropped { room_id: String },
}

#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    grid: Grid,
}

#[derive(Default)]
struct RegistryInner {
    rooms: HashMap<String, SharedSession>,
    /// identity -> room it is currently playing in.
    memberships: HashMap<String, String>,
}

// =============================================================================
// LOOKUP
// =============================================================================

impl SessionRegistry {
    #[must_use]
    pub fn new(grid: Grid) -> Self {
        Self { inner: Arc::new(RwLock::new(RegistryInner::default())), grid }
    }

    /// The live room an identity is playing in, if any.
    pub async fn find_active_room(&self, identity: &str) -> Option<String> {
        self.inner.read().await.memberships.get(identity).cloned()
    }

    /// Handle to a room's session. Lock it to read or mutate.
    pub async fn room(&self, room_id: &str) -> Option<SharedSession> {
        self.inner.read().await.rooms.get(room_id).cloned()
    }

    pub async fn snapshot(&self, room_id: &str) -> Option<Snapshot> {
        let room = self.room(room_id).await?;
        let session = room.lock().await;
        Some(session.snapshot())
    }

    /// Identities seated in a room, slot order.
    pub async fn members(&self, room_id: &str) -> Vec<String> {
        let Some(room) = self.room(room_id).await else {
            return Vec::new();
        };
        room.lock().await.identities()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }
}

// =============================================================================
// CREATE / JOIN / LEAVE / DROP
// =============================================================================

impl SessionRegistry {
    /// Open a `waiting` room with `identity` in slot 1.
    ///
    /// # Errors
    ///
    /// `AlreadyInRoom` if the identity is already playing elsewhere.
    pub async fn create_room(&self, identity: &str, name: &str) -> Result<String, RegistryError> {
        let mut inner = self.inner.write().await;
        ensure_free(&inner, identity)?;

        let room_id = inner.unused_room_id();
        let session = GameSession::new(room_id.clone(), self.grid, identity, name);
        inner.rooms.insert(room_id.clone(), Arc::new(Mutex::new(session)));
        inner.memberships.insert(identity.to_owned(), room_id.clone());

        info!(%room_id, %identity, "room created");
        Ok(room_id)
    }

    /// Open a room with both players seated; `first` takes slot 1. Both
    /// checks and both inserts happen under one registry lock.
    ///
    /// # Errors
    ///
    /// `AlreadyInRoom` if either identity is busy, `DuplicateIdentity` if
    /// both are the same identity.
    pub async fn create_match(&self, first: (&str, &str), second: (&str, &str)) -> Result<String, RegistryError> {
        let mut inner = self.inner.write().await;
        ensure_free(&inner, first.0)?;
        ensure_free(&inner, second.0)?;

        let room_id = inner.unused_room_id();
        let mut session = GameSession::new(room_id.clone(), self.grid, first.0, first.1);
        session.add_player(second.0, second.1)?;
        inner.rooms.insert(room_id.clone(), Arc::new(Mutex::new(session)));
        inner.memberships.insert(first.0.to_owned(), room_id.clone());
        inner.memberships.insert(second.0.to_owned(), room_id.clone());

        info!(%room_id, slot1 = %first.0, slot2 = %second.0, "match created");
        Ok(room_id)
    }

    /// Seat `identity` in an existing room.
    ///
    /// # Errors
    ///
    /// `RoomNotFound`, `AlreadyInRoom` (busy elsewhere), or the session's
    /// `SessionFull` / `DuplicateIdentity`.
    pub async fn join_room(&self, room_id: &str, identity: &str, name: &str) -> Result<(Slot, Snapshot), RegistryError> {
        // Reserve the membership, then seat the player without holding the
        // registry lock across the room lock.
        let (room, reserved) = {
            let mut inner = self.inner.write().await;
            let room = inner
                .rooms
                .get(room_id)
                .cloned()
                .ok_or_else(|| RegistryError::RoomNotFound(room_id.to_owned()))?;
            if let Some(current) = inner.memberships.get(identity) {
                if current != room_id {
                    return Err(RegistryError::AlreadyInRoom { identity: identity.to_owned(), room_id: current.clone() });
                }
            }
            let reserved = inner
                .memberships
                .insert(identity.to_owned(), room_id.to_owned())
                .is_none();
            (room, reserved)
        };

        let seated = {
            let mut session = room.lock().await;
            session.add_player(identity, name).map(|slot| (slot, session.snapshot()))
        };

        let mut inner = self.inner.write().await;
        match seated {
            Ok((slot, snapshot)) if inner.rooms.contains_key(room_id) => {
                info!(%room_id, %identity, ?slot, "player joined room");
                Ok((slot, snapshot))
            }
            // Dropped while the seat was being taken; `remove_room` already
            // cleared the reservation.
            Ok(_) => Err(RegistryError::RoomNotFound(room_id.to_owned())),
            Err(e) => {
                if reserved {
                    inner.release(room_id, &[identity.to_owned()]);
                }
                Err(e.into())
            }
        }
    }

    /// Remove `identity` from a room. Mid-game this forfeits; from a
    /// `waiting` room it abandons and drops the room.
    ///
    /// # Errors
    ///
    /// `RoomNotFound`, or `NotSeated` if the identity is not in the room.
    pub async fn leave_room(&self, room_id: &str, identity: &str) -> Result<RoomLeft, RegistryError> {
        let room = self
            .room(room_id)
            .await
            .ok_or_else(|| RegistryError::RoomNotFound(room_id.to_owned()))?;

        let mut session = room.lock().await;
        let departure = session.remove_player(identity)?;
        let snapshot = session.snapshot();
        let remaining: Vec<String> = session
            .identities()
            .into_iter()
            .filter(|id| id != identity)
            .collect();
        let seated = session.identities();
        drop(session);

        let mut inner = self.inner.write().await;
        match departure {
            Departure::Abandoned => {
                inner.remove_room(room_id);
                info!(%room_id, %identity, "waiting room abandoned");
            }
            Departure::Forfeit { winner } => {
                inner.release(room_id, &seated);
                info!(%room_id, %identity, ?winner, "player left mid-game");
            }
            Departure::AlreadyFinished => {
                inner.release(room_id, &[identity.to_owned()]);
            }
        }
        Ok(RoomLeft { departure, snapshot, remaining })
    }

    /// Remove a room and any membership still pointing at it.
    pub async fn drop_room(&self, room_id: &str) -> bool {
        let removed = self.inner.write().await.remove_room(room_id);
        if removed {
            info!(%room_id, "room dropped");
        }
        removed
    }
}

// =============================================================================
// GAMEPLAY
// =============================================================================

impl SessionRegistry {
    /// Apply a move under the room's lock. A finishing move releases both
    /// players' memberships.
    ///
    /// # Errors
    ///
    /// `RoomNotFound`, or the session's validation error.
    pub async fn apply_move(
        &self,
        room_id: &str,
        identity: &str,
        from: Position,
        to: Position,
    ) -> Result<MoveApplied, RegistryError> {
        let room = self
            .room(room_id)
            .await
            .ok_or_else(|| RegistryError::RoomNotFound(room_id.to_owned()))?;

        let mut session = room.lock().await;
        let outcome = session.apply_move(identity, from, to)?;
        let snapshot = session.snapshot();
        let seated = session.identities();
        drop(session);

        if outcome.finished {
            self.inner.write().await.release(room_id, &seated);
            info!(%room_id, winner = ?snapshot.winner, "game finished");
        }
        Ok(MoveApplied { outcome, snapshot })
    }

    /// Flag a seat as disconnected while the reconnect grace runs.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` or `NotSeated`.
    pub async fn mark_disconnected(&self, room_id: &str, identity: &str, now: Instant) -> Result<Snapshot, RegistryError> {
        let room = self
            .room(room_id)
            .await
            .ok_or_else(|| RegistryError::RoomNotFound(room_id.to_owned()))?;
        let mut session = room.lock().await;
        session.mark_disconnected(identity, now)?;
        Ok(session.snapshot())
    }

    /// Restore a seat after its identity rejoins.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` or `NotSeated`.
    pub async fn mark_reconnected(&self, room_id: &str, identity: &str) -> Result<(Slot, Snapshot), RegistryError> {
        let room = self
            .room(room_id)
            .await
            .ok_or_else(|| RegistryError::RoomNotFound(room_id.to_owned()))?;
        let mut session = room.lock().await;
        let slot = session.mark_reconnected(identity)?;
        Ok((slot, session.snapshot()))
    }
}

// =============================================================================
// SWEEP
// =============================================================================

impl SessionRegistry {
    /// Expire stale rooms: abandon old `waiting` rooms, forfeit players whose
    /// reconnect grace ran out, drop `finished` rooms past their grace.
    pub async fn sweep(&self, now: Instant, policy: SweepPolicy) -> Vec<SweepEvent> {
        let rooms: Vec<(String, SharedSession)> = {
            let inner = self.inner.read().await;
            inner
                .rooms
                .iter()
                .map(|(id, room)| (id.clone(), Arc::clone(room)))
                .collect()
        };

        let mut events = Vec::new();
        let mut to_drop = Vec::new();
        let mut to_release: Vec<(String, Vec<String>)> = Vec::new();

        for (room_id, room) in rooms {
            let mut session = room.lock().await;
            match session.status() {
                GameStatus::Waiting => {
                    if now.saturating_duration_since(session.opened_at()) >= policy.waiting_ttl {
                        events.push(SweepEvent::Abandoned { room_id: room_id.clone(), identities: session.identities() });
                        to_drop.push(room_id);
                    }
                }
                GameStatus::Playing => {
                    let Some(grace) = policy.disconnect_grace else {
                        continue;
                    };
                    let Some(leaver) = session.overdue_disconnect(now, grace) else {
                        continue;
                    };
                    if session.remove_player(&leaver).is_ok() {
                        to_release.push((room_id.clone(), session.identities()));
                        events.push(SweepEvent::Forfeited { room_id, leaver, snapshot: session.snapshot() });
                    }
                }
                GameStatus::Finished => {
                    let expired = session
                        .finished_at()
                        .is_some_and(|at| now.saturating_duration_since(at) >= policy.finished_grace);
                    if expired {
                        events.push(SweepEvent::Dropped { room_id: room_id.clone() });
                        to_drop.push(room_id);
                    }
                }
            }
        }

        if !to_release.is_empty() {
            let mut inner = self.inner.write().await;
            for (room_id, seated) in &to_release {
                inner.release(room_id, seated);
            }
        }
        for room_id in &to_drop {
            self.drop_room(room_id).await;
        }
        events
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn ensure_free(inner: &RegistryInner, identity: &str) -> Result<(), RegistryError> {
    match inner.memberships.get(identity) {
        Some(room_id) => Err(RegistryError::AlreadyInRoom { identity: identity.to_owned(), room_id: room_id.clone() }),
        None => Ok(()),
    }
}

impl RegistryInner {
    fn unused_room_id(&self) -> String {
        loop {
            let candidate = generate_room_id();
            if !self.rooms.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Clear memberships of `identities` that still point at `room_id`.
    fn release(&mut self, room_id: &str, identities: &[String]) {
        for identity in identities {
            if self.memberships.get(identity).is_some_and(|r| r == room_id) {
                self.memberships.remove(identity);
            }
        }
    }

    fn remove_room(&mut self, room_id: &str) -> bool {
        self.memberships.retain(|_, r| r != room_id);
        self.rooms.remove(room_id).is_some()
    }
}

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// `room-` followed by 12 random hex characters.
#[must_use]
pub fn generate_room_id() -> String {
    let bytes: [u8; 6] = rand::rng().random();
    format!("room-{}", bytes_to_hex(&bytes))
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
