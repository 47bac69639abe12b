//! Challenge lifecycle and match creation.
//!
//! DESIGN
//! ======
//! Pending challenges live in a `ChallengeBook` keyed by `(from, to)`. The
//! book sits behind a `std::sync::Mutex` that is never held across an
//! `.await`; clock-dependent methods have `_at(now)` variants so tests can
//! drive time explicitly.
//!
//! A challenge ends in exactly one way: accepted (a match is created with
//! the sender in slot 1), declined, expired, or dropped because either party
//! disconnected. Accepting also clears every other challenge involving
//! either player, since both are now busy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::info;

use crate::frame::ErrorCode;
use crate::services::registry::RegistryError;
use crate::services::session::Snapshot;
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("{0} is not online")]
    TargetOffline(String),
    #[error("cannot challenge yourself")]
    SelfChallenge,
    #[error("challenge already pending")]
    AlreadyPending,
    #[error("no pending challenge from {0}")]
    ChallengeNotFound(String),
    #[error("challenge from {0} expired")]
    ChallengeExpired(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ErrorCode for ChallengeError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::TargetOffline(_) => "E_TARGET_OFFLINE",
            Self::SelfChallenge => "E_SELF_CHALLENGE",
            Self::AlreadyPending => "E_ALREADY_PENDING",
            Self::ChallengeNotFound(_) => "E_CHALLENGE_NOT_FOUND",
            Self::ChallengeExpired(_) => "E_CHALLENGE_EXPIRED",
            Self::Registry(e) => e.error_code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub from: String,
    pub to: String,
    pub created_at: Instant,
}

impl Challenge {
    #[must_use]
    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        is_expired(self.created_at, now, ttl)
    }
}

fn is_expired(created_at: Instant, now: Instant, ttl: Duration) -> bool {
    now.saturating_duration_since(created_at) >= ttl
}

/// How a response to a challenge played out.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Match created; `from` holds slot 1, `to` slot 2.
    Accepted { room_id: String, snapshot: Snapshot },
    Declined,
}

#[derive(Clone, Default)]
pub struct ChallengeBook {
    inner: Arc<Mutex<HashMap<(String, String), Instant>>>,
}

// =============================================================================
// CHALLENGE BOOK
// =============================================================================

impl ChallengeBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending challenge.
    ///
    /// # Errors
    ///
    /// `AlreadyPending` if the same sender already challenged the same target.
    pub fn insert(&self, from: &str, to: &str) -> Result<(), ChallengeError> {
        self.insert_at(from, to, Instant::now())
    }

    fn insert_at(&self, from: &str, to: &str, now: Instant) -> Result<(), ChallengeError> {
        let mut book = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (from.to_owned(), to.to_owned());
        if book.contains_key(&key) {
            return Err(ChallengeError::AlreadyPending);
        }
        book.insert(key, now);
        Ok(())
    }

    /// Remove and return a pending challenge.
    pub fn take(&self, from: &str, to: &str) -> Option<Challenge> {
        let mut book = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (from.to_owned(), to.to_owned());
        book.remove(&key)
            .map(|created_at| Challenge { from: key.0, to: key.1, created_at })
    }

    #[cfg(test)]
    pub fn contains(&self, from: &str, to: &str) -> bool {
        let book = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        book.contains_key(&(from.to_owned(), to.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove challenges at least `ttl` old as of `now`.
    pub fn expire_at(&self, now: Instant, ttl: Duration) -> Vec<Challenge> {
        self.drain_where(|_, created_at| is_expired(created_at, now, ttl))
    }

    /// Remove every challenge `identity` sent or received.
    pub fn drop_for(&self, identity: &str) -> Vec<Challenge> {
        self.drain_where(|(from, to), _| from == identity || to == identity)
    }

    fn drain_where(&self, pred: impl Fn(&(String, String), Instant) -> bool) -> Vec<Challenge> {
        let mut book = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let doomed: Vec<(String, String)> = book
            .iter()
            .filter(|(key, created_at)| pred(*key, **created_at))
            .map(|(key, _)| key.clone())
            .collect();
        let mut removed: Vec<Challenge> = doomed
            .into_iter()
            .filter_map(|key| {
                let created_at = book.remove(&key)?;
                Some(Challenge { from: key.0, to: key.1, created_at })
            })
            .collect();
        removed.sort_by_key(|c| c.created_at);
        removed
    }
}

// =============================================================================
// COORDINATOR
// =============================================================================

/// Challenge `to` on behalf of `from`.
///
/// # Errors
///
/// `SelfChallenge`, `TargetOffline`, `AlreadyInRoom` if the sender is already
/// playing, or `AlreadyPending`.
pub async fn send_challenge(state: &AppState, from: &str, to: &str) -> Result<(), ChallengeError> {
    if from == to {
        return Err(ChallengeError::SelfChallenge);
    }
    if !state.presence.is_online(to).await {
        return Err(ChallengeError::TargetOffline(to.to_owned()));
    }
    if let Some(room_id) = state.registry.find_active_room(from).await {
        return Err(RegistryError::AlreadyInRoom { identity: from.to_owned(), room_id }.into());
    }
    state.challenges.insert(from, to)?;
    info!(%from, %to, "challenge sent");
    Ok(())
}

/// Answer the challenge `from` sent to `to`. The challenge is consumed
/// whatever the answer, including when it is already past its TTL but the
/// sweeper has not reached it yet.
///
/// # Errors
///
/// `ChallengeNotFound`, `ChallengeExpired`, `TargetOffline` if the sender
/// left, or a registry error if either player is already in a room.
pub async fn respond_challenge(
    state: &AppState,
    from: &str,
    to: &str,
    accept: bool,
) -> Result<Resolution, ChallengeError> {
    let Some(challenge) = state.challenges.take(from, to) else {
        return Err(ChallengeError::ChallengeNotFound(from.to_owned()));
    };
    if challenge.is_expired(Instant::now(), state.config.challenge_ttl) {
        info!(%from, %to, "challenge answered after expiry");
        return Err(ChallengeError::ChallengeExpired(from.to_owned()));
    }
    if !accept {
        info!(%from, %to, "challenge declined");
        return Ok(Resolution::Declined);
    }

    let Some(from_name) = state.presence.display_name(from).await else {
        return Err(ChallengeError::TargetOffline(from.to_owned()));
    };
    let to_name = state
        .presence
        .display_name(to)
        .await
        .unwrap_or_else(|| to.to_owned());

    let room_id = state
        .registry
        .create_match((from, &from_name), (to, &to_name))
        .await?;
    let snapshot = state
        .registry
        .snapshot(&room_id)
        .await
        .ok_or_else(|| RegistryError::RoomNotFound(room_id.clone()))?;

    state.challenges.drop_for(from);
    state.challenges.drop_for(to);
    info!(%from, %to, %room_id, "challenge accepted");
    Ok(Resolution::Accepted { room_id, snapshot })
}

/// Drop challenges past the configured TTL.
pub fn expire_challenges(state: &AppState, now: Instant) -> Vec<Challenge> {
    let expired = state.challenges.expire_at(now, state.config.challenge_ttl);
    for c in &expired {
        info!(from = %c.from, to = %c.to, "challenge expired");
    }
    expired
}

#[cfg(test)]
#[path = "matchmaking_test.rs"]
mod tests;
