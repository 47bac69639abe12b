//! One match's canonical state and its transition function.
//!
//! DESIGN
//! ======
//! A session moves `waiting → playing → finished` and is only ever mutated
//! through its own methods. The registry owns every session behind a
//! per-room mutex; transport handlers never touch fields directly.
//!
//! `apply_move` validates in a fixed order and short-circuits on the first
//! failure, so a rejected move never mutates state. Because an accepted edge
//! can never be drawn again, redelivering the same move is rejected as
//! `DuplicateEdge`, which makes move application idempotent.
//!
//! TRADE-OFFS
//! ==========
//! An opponent leaving mid-game ends the match immediately. The optional
//! reconnect grace (`mark_disconnected` / `mark_reconnected`) only delays
//! that forfeit; there is no pause/resume of a match.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::frame::{ErrorCode, now_ms};
use crate::services::board::{EdgeKey, Grid, Position, edge_key, is_square_complete};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("game is not in progress")]
    NotPlaying,
    #[error("not your turn")]
    NotYourTurn,
    #[error("invalid edge {from} -> {to}")]
    InvalidEdge { from: Position, to: Position },
    #[error("edge already drawn")]
    DuplicateEdge,
    #[error("session is full")]
    SessionFull,
    #[error("identity already seated: {0}")]
    DuplicateIdentity(String),
    #[error("identity not seated in this session: {0}")]
    NotSeated(String),
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotPlaying => "E_NOT_PLAYING",
            Self::NotYourTurn => "E_NOT_YOUR_TURN",
            Self::InvalidEdge { .. } => "E_INVALID_EDGE",
            Self::DuplicateEdge => "E_DUPLICATE_EDGE",
            Self::SessionFull => "E_SESSION_FULL",
            Self::DuplicateIdentity(_) => "E_DUPLICATE_IDENTITY",
            Self::NotSeated(_) => "E_NOT_SEATED",
        }
    }
}

/// One of the two fixed player positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Slot1,
    Slot2,
}

impl Slot {
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Slot::Slot1 => Slot::Slot2,
            Slot::Slot2 => Slot::Slot1,
        }
    }

    fn index(self) -> usize {
        match self {
            Slot::Slot1 => 0,
            Slot::Slot2 => 1,
        }
    }

    fn from_index(i: usize) -> Self {
        if i == 0 { Slot::Slot1 } else { Slot::Slot2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Waiting,
    Playing,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Slot1,
    Slot2,
    Tie,
}

impl From<Slot> for Winner {
    fn from(slot: Slot) -> Self {
        match slot {
            Slot::Slot1 => Winner::Slot1,
            Slot::Slot2 => Winner::Slot2,
        }
    }
}

/// An accepted edge, owned by the player who drew it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub from: Position,
    pub to: Position,
    pub player: Slot,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedSquare {
    pub top_left: Position,
    pub player: Slot,
    pub completed_at: i64,
}

/// Occupant of a slot.
#[derive(Debug, Clone)]
struct Seat {
    identity: String,
    name: String,
    connected: bool,
    disconnected_at: Option<Instant>,
}

/// Result of an accepted move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    pub mover: Slot,
    /// Squares completed by this move (zero, one, or two).
    pub completed: Vec<Position>,
    /// Whose turn it is now.
    pub next: Slot,
    pub finished: bool,
}

/// What `remove_player` did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// Left mid-game; the remaining player wins.
    Forfeit { winner: Slot },
    /// Left before an opponent arrived; the room should be dropped.
    Abandoned,
    /// The game was already over.
    AlreadyFinished,
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Canonical client view of a session. Field names and enum strings are part
/// of the wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub room_id: String,
    pub connections: Vec<Connection>,
    pub completed_squares: Vec<CompletedSquare>,
    pub current_player: Slot,
    pub scores: Scores,
    pub game_status: GameStatus,
    pub players: Players,
    pub created_at: i64,
    pub last_move: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Winner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Scores {
    pub slot1: u32,
    pub slot2: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Players {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot1: Option<PlayerInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot2: Option<PlayerInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: String,
    pub name: String,
    pub connected: bool,
}

// =============================================================================
// GAME SESSION
// =============================================================================

#[derive(Debug, Clone)]
pub struct GameSession {
    room_id: String,
    grid: Grid,
    seats: [Option<Seat>; 2],
    /// Accepted edges in insertion order.
    connections: Vec<Connection>,
    edge_keys: HashSet<EdgeKey>,
    completed: Vec<CompletedSquare>,
    completed_keys: HashSet<Position>,
    current: Slot,
    status: GameStatus,
    scores: [u32; 2],
    created_at: i64,
    last_move: Option<i64>,
    winner: Option<Winner>,
    opened_at: Instant,
    finished_at: Option<Instant>,
}

impl GameSession {
    /// Open a session in `waiting` with `identity` in slot 1 and slot 2 empty.
    #[must_use]
    pub fn new(room_id: impl Into<String>, grid: Grid, identity: &str, name: &str) -> Self {
        Self {
            room_id: room_id.into(),
            grid,
            seats: [Some(Seat::new(identity, name)), None],
            connections: Vec::new(),
            edge_keys: HashSet::new(),
            completed: Vec::new(),
            completed_keys: HashSet::new(),
            current: Slot::Slot1,
            status: GameStatus::Waiting,
            scores: [0, 0],
            created_at: now_ms(),
            last_move: None,
            winner: None,
            opened_at: Instant::now(),
            finished_at: None,
        }
    }

    /// Seat a second identity. Filling the last slot starts the game with
    /// slot 1 to move.
    ///
    /// # Errors
    ///
    /// `DuplicateIdentity` if already seated, `SessionFull` if no slot is free.
    pub fn add_player(&mut self, identity: &str, name: &str) -> Result<Slot, SessionError> {
        if self.slot_of(identity).is_some() {
            return Err(SessionError::DuplicateIdentity(identity.to_owned()));
        }
        let Some(index) = self.seats.iter().position(Option::is_none) else {
            return Err(SessionError::SessionFull);
        };
        self.seats[index] = Some(Seat::new(identity, name));

        if self.seats.iter().all(Option::is_some) && self.status == GameStatus::Waiting {
            self.status = GameStatus::Playing;
            self.current = Slot::Slot1;
            self.created_at = now_ms();
        }
        Ok(Slot::from_index(index))
    }

    /// Draw the edge `from`–`to` for `identity`.
    ///
    /// # Errors
    ///
    /// In order: `NotPlaying`, `NotYourTurn`, `InvalidEdge`, `DuplicateEdge`.
    /// State is untouched on error.
    pub fn apply_move(&mut self, identity: &str, from: Position, to: Position) -> Result<MoveOutcome, SessionError> {
        if self.status != GameStatus::Playing {
            return Err(SessionError::NotPlaying);
        }
        let mover = self.current;
        if self.slot_of(identity) != Some(mover) {
            return Err(SessionError::NotYourTurn);
        }
        if !self.grid.is_valid_edge(from, to) {
            return Err(SessionError::InvalidEdge { from, to });
        }
        let key = edge_key(from, to);
        if self.edge_keys.contains(&key) {
            return Err(SessionError::DuplicateEdge);
        }

        let ts = now_ms();
        self.edge_keys.insert(key);
        self.connections.push(Connection { from, to, player: mover, timestamp: ts });
        self.last_move = Some(ts);

        let mut completed = Vec::new();
        for square in self.grid.squares_touching_edge(from, to) {
            if self.completed_keys.contains(&square) || !is_square_complete(square, &self.edge_keys) {
                continue;
            }
            self.completed_keys.insert(square);
            self.completed.push(CompletedSquare { top_left: square, player: mover, completed_at: ts });
            self.scores[mover.index()] += 1;
            completed.push(square);
        }

        // Completing a square earns another move.
        if completed.is_empty() {
            self.current = mover.other();
        }

        let finished = self.completed.len() == self.grid.square_count();
        if finished {
            let winner = self.leader();
            self.finish(winner);
        }

        Ok(MoveOutcome { mover, completed, next: self.current, finished })
    }

    /// Take `identity` out of the match. Mid-game this is a forfeit.
    ///
    /// # Errors
    ///
    /// `NotSeated` if the identity holds no slot.
    pub fn remove_player(&mut self, identity: &str) -> Result<Departure, SessionError> {
        let slot = self
            .slot_of(identity)
            .ok_or_else(|| SessionError::NotSeated(identity.to_owned()))?;
        if let Some(seat) = self.seats[slot.index()].as_mut() {
            seat.connected = false;
        }

        match self.status {
            GameStatus::Playing => {
                let winner = slot.other();
                self.finish(winner.into());
                Ok(Departure::Forfeit { winner })
            }
            GameStatus::Waiting => Ok(Departure::Abandoned),
            GameStatus::Finished => Ok(Departure::AlreadyFinished),
        }
    }

    /// Flag a dropped connection without ending the game. The sweeper
    /// forfeits the slot if it stays disconnected past the grace period.
    ///
    /// # Errors
    ///
    /// `NotSeated` if the identity holds no slot.
    pub fn mark_disconnected(&mut self, identity: &str, now: Instant) -> Result<Slot, SessionError> {
        let slot = self
            .slot_of(identity)
            .ok_or_else(|| SessionError::NotSeated(identity.to_owned()))?;
        if let Some(seat) = self.seats[slot.index()].as_mut() {
            seat.connected = false;
            seat.disconnected_at = Some(now);
        }
        Ok(slot)
    }

    /// Restore a seat after the identity rejoins.
    ///
    /// # Errors
    ///
    /// `NotSeated` if the identity holds no slot.
    pub fn mark_reconnected(&mut self, identity: &str) -> Result<Slot, SessionError> {
        let slot = self
            .slot_of(identity)
            .ok_or_else(|| SessionError::NotSeated(identity.to_owned()))?;
        if let Some(seat) = self.seats[slot.index()].as_mut() {
            seat.connected = true;
            seat.disconnected_at = None;
        }
        Ok(slot)
    }

    /// Identity of a player whose reconnect grace has run out, if any.
    #[must_use]
    pub fn overdue_disconnect(&self, now: Instant, grace: Duration) -> Option<String> {
        if self.status != GameStatus::Playing {
            return None;
        }
        self.seats.iter().flatten().find_map(|seat| {
            let since = seat.disconnected_at?;
            (now.saturating_duration_since(since) >= grace).then(|| seat.identity.clone())
        })
    }

    fn finish(&mut self, winner: Winner) {
        self.status = GameStatus::Finished;
        self.winner = Some(winner);
        self.finished_at = Some(Instant::now());
    }

    fn leader(&self) -> Winner {
        match self.scores[0].cmp(&self.scores[1]) {
            std::cmp::Ordering::Greater => Winner::Slot1,
            std::cmp::Ordering::Less => Winner::Slot2,
            std::cmp::Ordering::Equal => Winner::Tie,
        }
    }
}

// =============================================================================
// ACCESSORS
// =============================================================================

impl GameSession {
    #[must_use]
    pub fn status(&self) -> GameStatus {
        self.status
    }

    #[must_use]
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    #[must_use]
    pub fn finished_at(&self) -> Option<Instant> {
        self.finished_at
    }

    #[must_use]
    pub fn slot_of(&self, identity: &str) -> Option<Slot> {
        self.seats
            .iter()
            .position(|seat| seat.as_ref().is_some_and(|s| s.identity == identity))
            .map(Slot::from_index)
    }

    /// Every seated identity, slot order.
    #[must_use]
    pub fn identities(&self) -> Vec<String> {
        self.seats
            .iter()
            .flatten()
            .map(|seat| seat.identity.clone())
            .collect()
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let info = |slot: Slot| {
            self.seats[slot.index()].as_ref().map(|seat| PlayerInfo {
                id: seat.identity.clone(),
                name: seat.name.clone(),
                connected: seat.connected,
            })
        };
        Snapshot {
            room_id: self.room_id.clone(),
            connections: self.connections.clone(),
            completed_squares: self.completed.clone(),
            current_player: self.current,
            scores: Scores { slot1: self.scores[0], slot2: self.scores[1] },
            game_status: self.status,
            players: Players { slot1: info(Slot::Slot1), slot2: info(Slot::Slot2) },
            created_at: self.created_at,
            last_move: self.last_move,
            winner: self.winner,
        }
    }
}

impl Seat {
    fn new(identity: &str, name: &str) -> Self {
        Self { identity: identity.to_owned(), name: name.to_owned(), connected: true, disconnected_at: None }
    }
}

#[cfg(test)]
impl GameSession {
    pub fn current_player(&self) -> Slot {
        self.current
    }

    pub fn winner(&self) -> Option<Winner> {
        self.winner
    }

    pub fn score(&self, slot: Slot) -> u32 {
        self.scores[slot.index()]
    }

    pub fn edge_count(&self) -> usize {
        self.connections.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Identity seated in `slot`.
    pub fn occupant(&self, slot: Slot) -> Option<&str> {
        self.seats[slot.index()].as_ref().map(|s| s.identity.as_str())
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
