//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! handed to the sweeper task. It bundles the four in-memory services:
//! presence, the session registry, the challenge book, and the config they
//! were built from. Each service guards its own data, so cloning the state
//! is cheap and never copies game data.

use crate::config::GameConfig;
use crate::services::matchmaking::ChallengeBook;
use crate::services::presence::PresenceDirectory;
use crate::services::registry::SessionRegistry;

/// Shared application state. Clone is required by Axum; all inner fields
/// are Arc-backed.
#[derive(Clone)]
pub struct AppState {
    pub config: GameConfig,
    pub presence: PresenceDirectory,
    pub registry: SessionRegistry,
    pub challenges: ChallengeBook,
}

impl AppState {
    #[must_use]
    pub fn new(config: GameConfig) -> Self {
        Self {
            config,
            presence: PresenceDirectory::new(),
            registry: SessionRegistry::new(config.grid()),
            challenges: ChallengeBook::new(),
        }
    }
}

#[cfg(test)]
#[path = "state_helpers_test.rs"]
pub mod test_helpers;

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
