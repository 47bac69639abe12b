use super::*;
use crate::config::GameConfig;
use crate::services::session::{GameStatus, Slot};
use crate::state::test_helpers::{register, test_app_state};

// =============================================================================
// CHALLENGE BOOK
// =============================================================================

#[test]
fn identical_challenge_is_already_pending() {
    let book = ChallengeBook::new();
    book.insert("a", "b").unwrap();
    assert_eq!(book.insert("a", "b"), Err(ChallengeError::AlreadyPending));
    // The reverse direction is a different challenge.
    assert!(book.insert("b", "a").is_ok());
    assert_eq!(book.len(), 2);
}

#[test]
fn take_consumes_the_challenge() {
    let book = ChallengeBook::new();
    book.insert("a", "b").unwrap();
    let taken = book.take("a", "b").unwrap();
    assert_eq!((taken.from.as_str(), taken.to.as_str()), ("a", "b"));
    assert!(book.take("a", "b").is_none());
    assert!(book.is_empty());
}

#[test]
fn expire_removes_only_old_challenges() {
    let book = ChallengeBook::new();
    let start = Instant::now();
    book.insert_at("a", "b", start).unwrap();
    book.insert_at("c", "d", start + Duration::from_secs(30)).unwrap();

    let ttl = Duration::from_secs(60);
    assert!(book.expire_at(start + Duration::from_secs(59), ttl).is_empty());

    let expired = book.expire_at(start + Duration::from_secs(60), ttl);
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].from, "a");
    assert!(book.contains("c", "d"));
}

#[test]
fn drop_for_clears_both_directions() {
    let book = ChallengeBook::new();
    book.insert("a", "b").unwrap();
    book.insert("c", "a").unwrap();
    book.insert("c", "d").unwrap();

    let dropped = book.drop_for("a");
    assert_eq!(dropped.len(), 2);
    assert!(!book.contains("a", "b"));
    assert!(!book.contains("c", "a"));
    assert!(book.contains("c", "d"));
}

// =============================================================================
// COORDINATOR
// =============================================================================

#[tokio::test]
async fn send_challenge_validates_target() {
    let state = test_app_state();
    let _a = register(&state, "id-a", "Alice").await;

    assert_eq!(send_challenge(&state, "id-a", "id-a").await, Err(ChallengeError::SelfChallenge));
    assert_eq!(
        send_challenge(&state, "id-a", "id-ghost").await,
        Err(ChallengeError::TargetOffline("id-ghost".into()))
    );

    let _b = register(&state, "id-b", "Bob").await;
    send_challenge(&state, "id-a", "id-b").await.unwrap();
    assert_eq!(send_challenge(&state, "id-a", "id-b").await, Err(ChallengeError::AlreadyPending));
}

#[tokio::test]
async fn busy_sender_cannot_challenge() {
    let state = test_app_state();
    let _a = register(&state, "id-a", "Alice").await;
    let _b = register(&state, "id-b", "Bob").await;
    state.registry.create_room("id-a", "Alice").await.unwrap();

    let err = send_challenge(&state, "id-a", "id-b").await.unwrap_err();
    assert!(matches!(err, ChallengeError::Registry(RegistryError::AlreadyInRoom { .. })));
    assert!(state.challenges.is_empty());
}

#[tokio::test]
async fn accept_creates_match_with_sender_in_slot1() {
    let state = test_app_state();
    let _a = register(&state, "id-a", "Alice").await;
    let _b = register(&state, "id-b", "Bob").await;
    send_challenge(&state, "id-a", "id-b").await.unwrap();

    let Resolution::Accepted { room_id, snapshot } = respond_challenge(&state, "id-a", "id-b", true).await.unwrap()
    else {
        panic!("expected acceptance");
    };
    assert_eq!(snapshot.game_status, GameStatus::Playing);
    assert_eq!(snapshot.current_player, Slot::Slot1);
    assert_eq!(snapshot.players.slot1.as_ref().map(|p| p.name.as_str()), Some("Alice"));
    assert_eq!(snapshot.players.slot2.as_ref().map(|p| p.id.as_str()), Some("id-b"));
    assert_eq!(state.registry.find_active_room("id-a").await, Some(room_id.clone()));
    assert_eq!(state.registry.find_active_room("id-b").await, Some(room_id));
    assert!(state.challenges.is_empty());
}

#[tokio::test]
async fn accept_clears_other_challenges_of_both_players() {
    let state = test_app_state();
    let _a = register(&state, "id-a", "Alice").await;
    let _b = register(&state, "id-b", "Bob").await;
    let _c = register(&state, "id-c", "Carol").await;
    send_challenge(&state, "id-a", "id-b").await.unwrap();
    send_challenge(&state, "id-c", "id-b").await.unwrap();
    send_challenge(&state, "id-a", "id-c").await.unwrap();

    respond_challenge(&state, "id-a", "id-b", true).await.unwrap();
    assert!(state.challenges.is_empty());
}

#[tokio::test]
async fn decline_removes_challenge_without_room() {
    let state = test_app_state();
    let _a = register(&state, "id-a", "Alice").await;
    let _b = register(&state, "id-b", "Bob").await;
    send_challenge(&state, "id-a", "id-b").await.unwrap();

    let res = respond_challenge(&state, "id-a", "id-b", false).await.unwrap();
    assert!(matches!(res, Resolution::Declined));
    assert_eq!(state.registry.room_count().await, 0);
    assert_eq!(
        respond_challenge(&state, "id-a", "id-b", true).await.unwrap_err(),
        ChallengeError::ChallengeNotFound("id-a".into())
    );
}

#[tokio::test]
async fn answering_a_challenge_past_its_ttl_fails() {
    let state = AppState::new(GameConfig { challenge_ttl: Duration::from_millis(50), ..GameConfig::default() });
    let _a = register(&state, "id-a", "Alice").await;
    let _b = register(&state, "id-b", "Bob").await;
    let issued = Instant::now()
        .checked_sub(Duration::from_millis(100))
        .expect("clock past 100ms");
    state.challenges.insert_at("id-a", "id-b", issued).unwrap();

    let err = respond_challenge(&state, "id-a", "id-b", true).await.unwrap_err();
    assert_eq!(err, ChallengeError::ChallengeExpired("id-a".into()));
    assert_eq!(err.error_code(), "E_CHALLENGE_EXPIRED");
    assert!(state.challenges.is_empty());
    assert_eq!(state.registry.room_count().await, 0);
    assert_eq!(state.registry.find_active_room("id-a").await, None);
}

#[tokio::test]
async fn answering_just_inside_the_ttl_still_matches() {
    let state = test_app_state();
    let _a = register(&state, "id-a", "Alice").await;
    let _b = register(&state, "id-b", "Bob").await;
    let issued = Instant::now()
        .checked_sub(Duration::from_millis(100))
        .expect("clock past 100ms");
    state.challenges.insert_at("id-a", "id-b", issued).unwrap();

    let res = respond_challenge(&state, "id-a", "id-b", true).await.unwrap();
    assert!(matches!(res, Resolution::Accepted { .. }));
}

#[tokio::test]
async fn accept_after_sender_left_fails() {
    let state = test_app_state();
    let (client_a, _a) = crate::state::test_helpers::register_client(&state, "id-a", "Alice").await;
    let _b = register(&state, "id-b", "Bob").await;
    send_challenge(&state, "id-a", "id-b").await.unwrap();
    state.presence.unregister("id-a", client_a).await;

    let err = respond_challenge(&state, "id-a", "id-b", true).await.unwrap_err();
    assert_eq!(err, ChallengeError::TargetOffline("id-a".into()));
    assert_eq!(state.registry.room_count().await, 0);
}

#[tokio::test]
async fn accept_when_target_busy_fails_cleanly() {
    let state = test_app_state();
    let _a = register(&state, "id-a", "Alice").await;
    let _b = register(&state, "id-b", "Bob").await;
    send_challenge(&state, "id-a", "id-b").await.unwrap();
    state.registry.create_room("id-b", "Bob").await.unwrap();

    let err = respond_challenge(&state, "id-a", "id-b", true).await.unwrap_err();
    assert!(matches!(err, ChallengeError::Registry(RegistryError::AlreadyInRoom { .. })));
    assert_eq!(state.registry.find_active_room("id-a").await, None);
}

#[tokio::test]
async fn expire_challenges_uses_configured_ttl() {
    let state = test_app_state();
    let _a = register(&state, "id-a", "Alice").await;
    let _b = register(&state, "id-b", "Bob").await;
    send_challenge(&state, "id-a", "id-b").await.unwrap();

    assert!(expire_challenges(&state, Instant::now()).is_empty());
    let later = Instant::now() + state.config.challenge_ttl;
    let expired = expire_challenges(&state, later);
    assert_eq!(expired.len(), 1);
    assert!(state.challenges.is_empty());
}
