//! Server configuration parsed from environment variables.
//!
//! All settings are optional. Unparseable values fall back to their
//! defaults; values that parse but make no sense (a 1-dot grid, a zero TTL,
//! a zero-sized client queue) fail start-up with a `ConfigError`.

use std::time::Duration;

use crate::frame::ErrorCode;
use crate::services::board::Grid;
use crate::services::registry::SweepPolicy;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_GRID_SIZE: u32 = 5;
pub const MIN_GRID_SIZE: u32 = 2;
pub const MAX_GRID_SIZE: u32 = 26;
pub const DEFAULT_CHALLENGE_TTL_SECS: u64 = 60;
pub const DEFAULT_WAITING_ROOM_TTL_SECS: u64 = 300;
pub const DEFAULT_FINISHED_ROOM_GRACE_SECS: u64 = 30;
pub const DEFAULT_DISCONNECT_GRACE_SECS: u64 = 0;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("GRID_SIZE must be between 2 and 26, got {0}")]
    GridSizeOutOfRange(u32),
    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::GridSizeOutOfRange(_) => "E_CONFIG_GRID_SIZE",
            Self::MustBePositive(_) => "E_CONFIG_VALUE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameConfig {
    pub port: u16,
    pub grid_size: u32,
    pub challenge_ttl: Duration,
    pub waiting_room_ttl: Duration,
    pub finished_room_grace: Duration,
    /// Zero means a disconnect forfeits immediately.
    pub disconnect_grace: Duration,
    pub sweep_interval: Duration,
    pub client_channel_capacity: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            grid_size: DEFAULT_GRID_SIZE,
            challenge_ttl: Duration::from_secs(DEFAULT_CHALLENGE_TTL_SECS),
            waiting_room_ttl: Duration::from_secs(DEFAULT_WAITING_ROOM_TTL_SECS),
            finished_room_grace: Duration::from_secs(DEFAULT_FINISHED_ROOM_GRACE_SECS),
            disconnect_grace: Duration::from_secs(DEFAULT_DISCONNECT_GRACE_SECS),
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            client_channel_capacity: DEFAULT_CLIENT_CHANNEL_CAPACITY,
        }
    }
}

impl GameConfig {
    /// Build config from the process environment.
    ///
    /// Optional:
    /// - `PORT`: default 3000
    /// - `GRID_SIZE`: dots per side, default 5
    /// - `CHALLENGE_TTL_SECS`: default 60
    /// - `WAITING_ROOM_TTL_SECS`: default 300
    /// - `FINISHED_ROOM_GRACE_SECS`: default 30
    /// - `DISCONNECT_GRACE_SECS`: default 0
    /// - `SWEEP_INTERVAL_MS`: default 1000
    /// - `CLIENT_CHANNEL_CAPACITY`: default 256
    ///
    /// # Errors
    ///
    /// `GridSizeOutOfRange` or `MustBePositive` for nonsensical values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    ///
    /// # Errors
    ///
    /// See `from_env`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env_parse = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let port = lookup("PORT")
            .and_then(|v| v.trim().parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);

        let grid_size = lookup("GRID_SIZE")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(DEFAULT_GRID_SIZE);
        if !(MIN_GRID_SIZE..=MAX_GRID_SIZE).contains(&grid_size) {
            return Err(ConfigError::GridSizeOutOfRange(grid_size));
        }

        let positive = |key: &'static str, default: u64| -> Result<u64, ConfigError> {
            match env_parse(key, default) {
                0 => Err(ConfigError::MustBePositive(key)),
                v => Ok(v),
            }
        };
        let sweep_ms = positive("SWEEP_INTERVAL_MS", DEFAULT_SWEEP_INTERVAL_MS)?;
        let challenge_secs = positive("CHALLENGE_TTL_SECS", DEFAULT_CHALLENGE_TTL_SECS)?;
        let waiting_secs = positive("WAITING_ROOM_TTL_SECS", DEFAULT_WAITING_ROOM_TTL_SECS)?;

        let capacity = lookup("CLIENT_CHANNEL_CAPACITY")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_CLIENT_CHANNEL_CAPACITY);
        if capacity == 0 {
            return Err(ConfigError::MustBePositive("CLIENT_CHANNEL_CAPACITY"));
        }

        Ok(Self {
            port,
            grid_size,
            challenge_ttl: Duration::from_secs(challenge_secs),
            waiting_room_ttl: Duration::from_secs(waiting_secs),
            finished_room_grace: Duration::from_secs(env_parse(
                "FINISHED_ROOM_GRACE_SECS",
                DEFAULT_FINISHED_ROOM_GRACE_SECS,
            )),
            disconnect_grace: Duration::from_secs(env_parse("DISCONNECT_GRACE_SECS", DEFAULT_DISCONNECT_GRACE_SECS)),
            sweep_interval: Duration::from_millis(sweep_ms),
            client_channel_capacity: capacity,
        })
    }

    #[must_use]
    pub fn grid(&self) -> Grid {
        Grid::new(self.grid_size)
    }

    /// Reconnect grace, or `None` when disconnects forfeit immediately.
    #[must_use]
    pub fn reconnect_grace(&self) -> Option<Duration> {
        (!self.disconnect_grace.is_zero()).then_some(self.disconnect_grace)
    }

    #[must_use]
    pub fn sweep_policy(&self) -> SweepPolicy {
        SweepPolicy {
            waiting_ttl: self.waiting_room_ttl,
            finished_grace: self.finished_room_grace,
            disconnect_grace: self.reconnect_grace(),
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
