//! Background expiry of challenges and rooms.
//!
//! DESIGN
//! ======
//! One task ticks every `SWEEP_INTERVAL_MS`. Each tick expires challenges
//! past their TTL, then asks the registry to sweep rooms, and turns what
//! happened into notices for the affected players. A tick never holds a
//! lock across notice delivery.

use std::time::Instant;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::services::matchmaking;
use crate::services::notify::{self, Notice};
use crate::services::registry::SweepEvent;
use crate::services::session::Snapshot;
use crate::state::AppState;

/// Spawn the background sweep task. Returns a handle for shutdown.
pub fn spawn_sweeper_task(state: AppState) -> JoinHandle<()> {
    let interval = state.config.sweep_interval;
    info!(?interval, "sweeper configured");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            sweep_once(&state, Instant::now()).await;
        }
    })
}

/// Run one sweep at `now` and deliver the resulting notices. Returns the
/// notices for inspection.
pub async fn sweep_once(state: &AppState, now: Instant) -> Vec<Notice> {
    let mut notices = Vec::new();

    for challenge in matchmaking::expire_challenges(state, now) {
        notices.push(notify::challenge_expired(&challenge.from, &challenge.from, &challenge.to));
        notices.push(notify::challenge_expired(&challenge.to, &challenge.from, &challenge.to));
    }

    for event in state.registry.sweep(now, state.config.sweep_policy()).await {
        match event {
            SweepEvent::Abandoned { room_id, identities } => {
                info!(%room_id, "sweeper: waiting room expired");
                for identity in identities {
                    notices.push(notify::active_room(&identity, None));
                }
            }
            SweepEvent::Forfeited { room_id, leaver, snapshot } => {
                info!(%room_id, %leaver, "sweeper: reconnect grace expired");
                for identity in snapshot_members(&snapshot) {
                    if identity != leaver {
                        notices.push(notify::user_left(&identity, &room_id, &leaver));
                    }
                }
                notices.push(notify::room_snapshot("gameFinished", &snapshot));
            }
            SweepEvent::Dropped { room_id } => {
                debug!(%room_id, "sweeper: finished room dropped");
            }
        }
    }

    if !notices.is_empty() {
        let rooms = state.registry.room_count().await;
        debug!(notices = notices.len(), rooms, pending_challenges = state.challenges.len(), "sweep complete");
    }

    notify::deliver(state, notices.clone()).await;
    notices
}

fn snapshot_members(snapshot: &Snapshot) -> Vec<String> {
    [&snapshot.players.slot1, &snapshot.players.slot2]
        .into_iter()
        .flatten()
        .map(|p| p.id.clone())
        .collect()
}

#[cfg(test)]
#[path = "sweeper_test.rs"]
mod tests;
