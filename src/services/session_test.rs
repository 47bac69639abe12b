use super::*;
use crate::services::board::square_edges;

fn p(row: i32, col: i32) -> Position {
    Position::new(row, col)
}

fn playing_session(dots: u32) -> GameSession {
    let mut session = GameSession::new("R1", Grid::new(dots), "alice", "Alice");
    session.add_player("bob", "Bob").expect("second player seats");
    session
}

/// Every edge of the grid in row-major order: horizontals, then verticals.
fn all_edges(dots: i32) -> Vec<(Position, Position)> {
    let mut edges = Vec::new();
    for row in 0..dots {
        for col in 0..dots - 1 {
            edges.push((p(row, col), p(row, col + 1)));
        }
    }
    for row in 0..dots - 1 {
        for col in 0..dots {
            edges.push((p(row, col), p(row + 1, col)));
        }
    }
    edges
}

/// Play every edge, always as whoever holds the turn.
fn play_out(session: &mut GameSession, dots: i32) {
    for (from, to) in all_edges(dots) {
        let mover = session.current_player();
        let identity = session.occupant(mover).expect("seat").to_owned();
        session.apply_move(&identity, from, to).expect("edge accepted");
    }
}

// =============================================================================
// create / add_player
// =============================================================================

#[test]
fn new_session_waits_with_one_player() {
    let session = GameSession::new("R1", Grid::new(5), "alice", "Alice");
    assert_eq!(session.status(), GameStatus::Waiting);
    assert_eq!(session.slot_of("alice"), Some(Slot::Slot1));
    assert_eq!(session.occupant(Slot::Slot2), None);
    assert_eq!(session.identities(), vec!["alice".to_string()]);
}

#[test]
fn second_player_starts_game_with_slot1_to_move() {
    let mut session = GameSession::new("R1", Grid::new(5), "alice", "Alice");
    let slot = session.add_player("bob", "Bob").unwrap();
    assert_eq!(slot, Slot::Slot2);
    assert_eq!(session.status(), GameStatus::Playing);
    assert_eq!(session.current_player(), Slot::Slot1);
}

#[test]
fn add_player_rejects_duplicate_identity() {
    let mut session = GameSession::new("R1", Grid::new(5), "alice", "Alice");
    assert_eq!(
        session.add_player("alice", "Alice"),
        Err(SessionError::DuplicateIdentity("alice".into()))
    );
    assert_eq!(session.status(), GameStatus::Waiting);
}

#[test]
fn add_player_rejects_third_player() {
    let mut session = playing_session(5);
    assert_eq!(session.add_player("carol", "Carol"), Err(SessionError::SessionFull));
}

// =============================================================================
// apply_move: validation order
// =============================================================================

#[test]
fn move_before_game_starts_is_not_playing() {
    let mut session = GameSession::new("R1", Grid::new(5), "alice", "Alice");
    assert_eq!(session.apply_move("alice", p(0, 0), p(0, 1)), Err(SessionError::NotPlaying));
}

#[test]
fn not_playing_wins_over_other_failures() {
    let mut session = GameSession::new("R1", Grid::new(5), "alice", "Alice");
    // Wrong identity and a bogus edge: status check still comes first.
    assert_eq!(session.apply_move("mallory", p(0, 0), p(3, 3)), Err(SessionError::NotPlaying));
}

#[test]
fn slot2_moving_out_of_turn_is_rejected_without_mutation() {
    let mut session = playing_session(5);
    let before = session.snapshot();
    assert_eq!(session.apply_move("bob", p(0, 0), p(0, 1)), Err(SessionError::NotYourTurn));
    assert_eq!(session.snapshot(), before);
}

#[test]
fn stranger_cannot_move() {
    let mut session = playing_session(5);
    assert_eq!(session.apply_move("mallory", p(0, 0), p(0, 1)), Err(SessionError::NotYourTurn));
}

#[test]
fn non_adjacent_edge_is_invalid() {
    let mut session = playing_session(5);
    assert_eq!(
        session.apply_move("alice", p(0, 0), p(2, 0)),
        Err(SessionError::InvalidEdge { from: p(0, 0), to: p(2, 0) })
    );
    assert_eq!(session.edge_count(), 0);
    assert_eq!(session.current_player(), Slot::Slot1);
}

#[test]
fn out_of_bounds_and_degenerate_edges_are_invalid() {
    let mut session = playing_session(5);
    for (from, to) in [(p(4, 4), p(4, 5)), (p(-1, 0), p(0, 0)), (p(2, 2), p(2, 2)), (p(0, 0), p(1, 1))] {
        assert!(matches!(
            session.apply_move("alice", from, to),
            Err(SessionError::InvalidEdge { .. })
        ));
    }
}

#[test]
fn duplicate_edge_is_rejected_in_either_direction() {
    let mut session = playing_session(5);
    session.apply_move("alice", p(2, 2), p(2, 3)).unwrap();
    let before = session.snapshot();
    assert_eq!(session.apply_move("bob", p(2, 3), p(2, 2)), Err(SessionError::DuplicateEdge));
    assert_eq!(session.snapshot(), before);
}

#[test]
fn redelivered_move_does_not_double_apply() {
    let mut session = playing_session(5);
    session.apply_move("alice", p(1, 1), p(1, 2)).unwrap();
    let after_first = session.snapshot();

    // Same sender retrying: its turn is over.
    assert!(session.apply_move("alice", p(1, 1), p(1, 2)).is_err());
    assert_eq!(session.snapshot(), after_first);

    // Retry that arrives once it is the sender's turn again.
    session.apply_move("bob", p(3, 3), p(3, 4)).unwrap();
    let after_second = session.snapshot();
    assert_eq!(session.apply_move("alice", p(1, 1), p(1, 2)), Err(SessionError::DuplicateEdge));
    assert_eq!(session.snapshot(), after_second);
}

// =============================================================================
// apply_move: turns and scoring
// =============================================================================

#[test]
fn turn_flips_when_nothing_completes() {
    let mut session = playing_session(5);
    let outcome = session.apply_move("alice", p(0, 0), p(0, 1)).unwrap();
    assert!(outcome.completed.is_empty());
    assert_eq!(outcome.next, Slot::Slot2);
    assert_eq!(session.current_player(), Slot::Slot2);

    session.apply_move("bob", p(4, 0), p(4, 1)).unwrap();
    assert_eq!(session.current_player(), Slot::Slot1);
}

#[test]
fn completing_square_scores_and_keeps_turn() {
    let mut session = playing_session(5);
    session.apply_move("alice", p(0, 0), p(0, 1)).unwrap();
    session.apply_move("bob", p(4, 3), p(4, 4)).unwrap();
    session.apply_move("alice", p(0, 0), p(1, 0)).unwrap();
    session.apply_move("bob", p(4, 0), p(4, 1)).unwrap();
    session.apply_move("alice", p(0, 1), p(1, 1)).unwrap();
    session.apply_move("bob", p(4, 2), p(4, 3)).unwrap();
    assert_eq!(session.completed_count(), 0);

    let outcome = session.apply_move("alice", p(1, 0), p(1, 1)).unwrap();
    assert_eq!(outcome.completed, vec![p(0, 0)]);
    assert_eq!(outcome.next, Slot::Slot1);

    let snap = session.snapshot();
    assert_eq!(snap.completed_squares.len(), 1);
    assert_eq!(snap.completed_squares[0].top_left, p(0, 0));
    assert_eq!(snap.completed_squares[0].player, Slot::Slot1);
    assert_eq!(snap.scores, Scores { slot1: 1, slot2: 0 });
    assert_eq!(snap.current_player, Slot::Slot1);
    assert_eq!(snap.game_status, GameStatus::Playing);
}

#[test]
fn one_edge_can_complete_two_squares() {
    let mut session = playing_session(5);
    // Lay out both squares except the shared middle edge, alternating turns.
    let mut edges: Vec<EdgeKey> = square_edges(p(1, 1)).into_iter().collect();
    edges.extend(square_edges(p(1, 2)));
    let shared = edge_key(p(1, 2), p(2, 2));
    edges.retain(|e| *e != shared);
    edges.sort();
    edges.dedup();
    assert_eq!(edges.len(), 6);

    for edge in edges {
        let mover = session.current_player();
        let who = session.occupant(mover).unwrap().to_owned();
        let outcome = session.apply_move(&who, edge.low(), edge.high()).unwrap();
        assert!(outcome.completed.is_empty());
    }

    let mover = session.current_player();
    let who = session.occupant(mover).unwrap().to_owned();
    let outcome = session.apply_move(&who, p(1, 2), p(2, 2)).unwrap();
    assert_eq!(outcome.completed.len(), 2);
    assert_eq!(session.score(mover), 2);
    assert_eq!(session.current_player(), mover);
}

// =============================================================================
// apply_move: terminal state
// =============================================================================

#[test]
fn full_game_finishes_with_all_squares_and_edges() {
    let mut session = playing_session(5);
    play_out(&mut session, 5);

    let snap = session.snapshot();
    assert_eq!(snap.game_status, GameStatus::Finished);
    assert_eq!(snap.completed_squares.len(), 16);
    assert_eq!(snap.connections.len(), Grid::new(5).max_edges());
    assert_eq!(snap.scores.slot1 + snap.scores.slot2, 16);

    let expected = match snap.scores.slot1.cmp(&snap.scores.slot2) {
        std::cmp::Ordering::Greater => Winner::Slot1,
        std::cmp::Ordering::Less => Winner::Slot2,
        std::cmp::Ordering::Equal => Winner::Tie,
    };
    assert_eq!(snap.winner, Some(expected));
    assert!(session.finished_at().is_some());
}

#[test]
fn no_moves_accepted_after_finish() {
    let mut session = playing_session(3);
    play_out(&mut session, 3);
    let who = session.occupant(session.current_player()).unwrap().to_owned();
    assert_eq!(session.apply_move(&who, p(0, 0), p(0, 1)), Err(SessionError::NotPlaying));
    assert!(session.edge_count() <= Grid::new(3).max_edges());
}

#[test]
fn single_square_board_is_won_by_closer() {
    let mut session = playing_session(2);
    session.apply_move("alice", p(0, 0), p(0, 1)).unwrap();
    session.apply_move("bob", p(1, 0), p(1, 1)).unwrap();
    session.apply_move("alice", p(0, 0), p(1, 0)).unwrap();
    let outcome = session.apply_move("bob", p(0, 1), p(1, 1)).unwrap();
    assert!(outcome.finished);
    assert_eq!(session.winner(), Some(Winner::Slot2));
    assert_eq!(session.status(), GameStatus::Finished);
}

#[test]
fn leader_follows_scores() {
    let mut session = playing_session(5);
    session.scores = [3, 1];
    assert_eq!(session.leader(), Winner::Slot1);
    session.scores = [1, 3];
    assert_eq!(session.leader(), Winner::Slot2);
    session.scores = [2, 2];
    assert_eq!(session.leader(), Winner::Tie);
}

// =============================================================================
// remove_player / reconnect grace
// =============================================================================

#[test]
fn slot1_leaving_mid_game_hands_slot2_the_win() {
    let mut session = playing_session(5);
    session.apply_move("alice", p(0, 0), p(0, 1)).unwrap();

    assert_eq!(session.remove_player("alice"), Ok(Departure::Forfeit { winner: Slot::Slot2 }));
    let snap = session.snapshot();
    assert_eq!(snap.game_status, GameStatus::Finished);
    assert_eq!(snap.winner, Some(Winner::Slot2));
    assert_eq!(snap.players.slot1.map(|p| p.connected), Some(false));
}

#[test]
fn leaving_waiting_room_abandons_it() {
    let mut session = GameSession::new("R1", Grid::new(5), "alice", "Alice");
    assert_eq!(session.remove_player("alice"), Ok(Departure::Abandoned));
    assert_eq!(session.status(), GameStatus::Waiting);
}

#[test]
fn leaving_finished_game_changes_nothing() {
    let mut session = playing_session(5);
    session.remove_player("bob").unwrap();
    assert_eq!(session.remove_player("alice"), Ok(Departure::AlreadyFinished));
    assert_eq!(session.winner(), Some(Winner::Slot1));
}

#[test]
fn remove_unknown_identity_fails() {
    let mut session = playing_session(5);
    assert_eq!(session.remove_player("mallory"), Err(SessionError::NotSeated("mallory".into())));
    assert_eq!(session.status(), GameStatus::Playing);
}

#[test]
fn disconnect_grace_forfeits_only_after_expiry() {
    let mut session = playing_session(5);
    let start = Instant::now();
    session.mark_disconnected("bob", start).unwrap();
    assert_eq!(session.status(), GameStatus::Playing);
    assert_eq!(session.snapshot().players.slot2.map(|p| p.connected), Some(false));

    let grace = Duration::from_secs(10);
    assert_eq!(session.overdue_disconnect(start + Duration::from_secs(5), grace), None);
    assert_eq!(
        session.overdue_disconnect(start + Duration::from_secs(10), grace),
        Some("bob".to_string())
    );
}

#[test]
fn reconnect_clears_disconnect() {
    let mut session = playing_session(5);
    let start = Instant::now();
    session.mark_disconnected("alice", start).unwrap();
    assert_eq!(session.mark_reconnected("alice"), Ok(Slot::Slot1));
    assert_eq!(session.overdue_disconnect(start + Duration::from_secs(60), Duration::from_secs(1)), None);
    assert_eq!(session.snapshot().players.slot1.map(|p| p.connected), Some(true));
}

// =============================================================================
// snapshot wire shape
// =============================================================================

#[test]
fn snapshot_json_field_names_match_client_contract() {
    let mut session = playing_session(5);
    session.apply_move("alice", p(0, 0), p(0, 1)).unwrap();
    let json = serde_json::to_value(session.snapshot()).unwrap();

    assert_eq!(json["roomId"], "R1");
    assert_eq!(json["currentPlayer"], "slot2");
    assert_eq!(json["gameStatus"], "playing");
    assert_eq!(json["scores"], serde_json::json!({"slot1": 0, "slot2": 0}));
    assert_eq!(json["connections"][0]["from"], serde_json::json!({"row": 0, "col": 0}));
    assert_eq!(json["connections"][0]["to"], serde_json::json!({"row": 0, "col": 1}));
    assert_eq!(json["connections"][0]["player"], "slot1");
    assert!(json["connections"][0]["timestamp"].is_i64());
    assert_eq!(json["players"]["slot1"]["id"], "alice");
    assert_eq!(json["players"]["slot2"]["name"], "Bob");
    assert_eq!(json["players"]["slot2"]["connected"], true);
    assert!(json["createdAt"].is_i64());
    assert!(json["lastMove"].is_i64());
    assert!(json.get("winner").is_none());
}

#[test]
fn waiting_snapshot_omits_empty_slot_and_last_move() {
    let session = GameSession::new("R1", Grid::new(5), "alice", "Alice");
    let json = serde_json::to_value(session.snapshot()).unwrap();
    assert_eq!(json["gameStatus"], "waiting");
    assert!(json["players"].get("slot2").is_none());
    assert!(json["lastMove"].is_null());
}

#[test]
fn finished_snapshot_carries_completed_squares_and_winner() {
    let mut session = playing_session(2);
    session.apply_move("alice", p(0, 0), p(0, 1)).unwrap();
    session.apply_move("bob", p(1, 0), p(1, 1)).unwrap();
    session.apply_move("alice", p(0, 0), p(1, 0)).unwrap();
    session.apply_move("bob", p(0, 1), p(1, 1)).unwrap();

    let json = serde_json::to_value(session.snapshot()).unwrap();
    assert_eq!(json["winner"], "slot2");
    assert_eq!(json["gameStatus"], "finished");
    assert_eq!(json["completedSquares"][0]["topLeft"], serde_json::json!({"row": 0, "col": 0}));
    assert_eq!(json["completedSquares"][0]["player"], "slot2");
    assert!(json["completedSquares"][0]["completedAt"].is_i64());
}

#[test]
fn tie_serializes_as_tie() {
    assert_eq!(serde_json::to_value(Winner::Tie).unwrap(), "tie");
}
