//! Domain services used by the websocket gateway.
//!
//! ARCHITECTURE
//! ============
//! `board` and `session` are pure game logic. `registry`, `presence`, and
//! `matchmaking` own the shared in-memory state. `notify` fans server pushes
//! out to connections, and `sweeper` expires what nobody cleaned up.

pub mod board;
pub mod matchmaking;
pub mod notify;
pub mod presence;
pub mod registry;
pub mod session;
pub mod sweeper;
