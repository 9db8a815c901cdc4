
use courier_server::message::{ClientEvent, ServerEvent};
use courier_server::token_store::InMemoryTokenStore;
use std::sync::Arc;
use std::time::Duration;
use test_utils::{spawn_app, spawn_app_with, test_config, TestClient};
use uuid::Uuid;

#[tokio::test]
async fn handshake_rejects_garbage_token_without_session_state() {
    let app = spawn_app().await;
    let user = Uuid::new_v4();

    let (_client, event) = TestClient::connect_with_token(&app.address, "not-a-token").await;
    match event {
        ServerEvent::Error { code, .. } => assert_eq!(code, "invalid_token"),
        other => panic!("expected error event, got {:?}", other),
    }

    assert_eq!(app.ctx.registry.connection_count(user).await, 0);
}

#[tokio::test]
async fn handshake_rejects_empty_token() {
    let app = spawn_app().await;

    let (_client, event) = TestClient::connect_with_token(&app.address, "").await;
    match event {
        ServerEvent::Error { code, .. } => assert_eq!(code, "authentication_required"),
        other => panic!("expected error event, got {:?}", other),
    }
}

#[tokio::test]
async fn handshake_requires_connect_as_first_event() {
    let app = spawn_app().await;

    let mut client = TestClient::connect(&app.address).await;
    client
        .send(&ClientEvent::JoinConversation {
            conversation_id: "r1".to_string(),
        })
        .await;

    match client.recv().await {
        Some(ServerEvent::Error { code, .. }) => assert_eq!(code, "authentication_required"),
        other => panic!("expected error event, got {:?}", other),
    }
}

#[tokio::test]
async fn silent_client_is_dropped_after_handshake_window() {
    let app = spawn_app().await; // 2s handshake window in test config

    let mut client = TestClient::connect(&app.address).await;
    let event = client.recv_timeout(Duration::from_secs(4)).await;
    match event {
        Some(ServerEvent::Error { code, .. }) => assert_eq!(code, "authentication_required"),
        None => {} // already closed
        other => panic!("expected handshake timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn valid_handshake_acknowledges_and_tracks_the_connection() {
    let app = spawn_app().await;
    let user = Uuid::new_v4();
    let token = app.issue_access(user).await;

    let (_client, event) = TestClient::connect_with_token(&app.address, &token).await;
    match event {
        ServerEvent::ConnectSuccess { user_id, .. } => assert_eq!(user_id, user),
        other => panic!("expected connect:success, got {:?}", other),
    }

    assert_eq!(app.ctx.registry.connection_count(user).await, 1);
}

#[tokio::test]
async fn join_is_rejected_for_non_members_with_no_state_change() {
    let app = spawn_app().await;
    let user = Uuid::new_v4();
    let token = app.issue_access(user).await;

    let (mut client, _) = TestClient::connect_with_token(&app.address, &token).await;
    client
        .send(&ClientEvent::JoinConversation {
            conversation_id: "r1".to_string(),
        })
        .await;

    let event = client
        .expect("membership rejection", |e| {
            matches!(e, ServerEvent::Error { .. })
        })
        .await;
    match event {
        ServerEvent::Error { code, .. } => assert_eq!(code, "not_a_room_member"),
        _ => unreachable!(),
    }

    // The rejected join left no room state behind: sending still fails.
    client
        .send(&ClientEvent::SendMessage {
            conversation_id: "r1".to_string(),
            content: "hi".to_string(),
            reply_to: None,
            attachments: vec![],
        })
        .await;
    let event = client
        .expect("send rejection", |e| matches!(e, ServerEvent::Error { .. }))
        .await;
    match event {
        ServerEvent::Error { code, .. } => assert_eq!(code, "not_a_room_member"),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn message_is_relayed_to_every_room_member_exactly_once() {
    let app = spawn_app().await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    app.directory.add_member("r1", alice).await;
    app.directory.add_member("r1", bob).await;
    app.directory.set_display_name(alice, "alice").await;

    let token_a = app.issue_access(alice).await;
    let token_b = app.issue_access(bob).await;
    let (mut client_a, _) = TestClient::connect_with_token(&app.address, &token_a).await;
    let (mut client_b, _) = TestClient::connect_with_token(&app.address, &token_b).await;

    client_a
        .send(&ClientEvent::JoinConversation {
            conversation_id: "r1".to_string(),
        })
        .await;
    client_b
        .send(&ClientEvent::JoinConversation {
            conversation_id: "r1".to_string(),
        })
        .await;
    // Bob sees his own room-presence event once he is in the roster.
    client_b
        .expect("own join notification", |e| {
            matches!(e, ServerEvent::ConversationPresence { user_id, present: true, .. } if *user_id == bob)
        })
        .await;

    client_a
        .send(&ClientEvent::SendMessage {
            conversation_id: "r1".to_string(),
            content: "hi".to_string(),
            reply_to: None,
            attachments: vec![],
        })
        .await;

    let event = client_b
        .expect("relayed message", |e| matches!(e, ServerEvent::MessageNew(_)))
        .await;
    let payload = match event {
        ServerEvent::MessageNew(payload) => payload,
        _ => unreachable!(),
    };
    assert_eq!(payload.content, "hi");
    assert_eq!(payload.sender_id, alice);
    assert_eq!(payload.sender_name, "alice");
    assert_eq!(payload.conversation_id, "r1");

    // Exactly once: no duplicate delivery follows.
    client_b
        .expect_none("duplicate message", Duration::from_millis(300), |e| {
            matches!(e, ServerEvent::MessageNew(_))
        })
        .await;

    // The sender is a room member too and receives the broadcast.
    client_a
        .expect("sender copy", |e| {
            matches!(e, ServerEvent::MessageNew(p) if p.content == "hi")
        })
        .await;
}

#[tokio::test]
async fn operational_errors_stay_on_the_originating_connection() {
    let app = spawn_app().await;
    let alice = Uuid::new_v4();
    let mallory = Uuid::new_v4();
    app.directory.add_member("r1", alice).await;

    let token_a = app.issue_access(alice).await;
    let token_m = app.issue_access(mallory).await;
    let (mut client_a, _) = TestClient::connect_with_token(&app.address, &token_a).await;
    let (mut client_m, _) = TestClient::connect_with_token(&app.address, &token_m).await;

    client_a
        .send(&ClientEvent::JoinConversation {
            conversation_id: "r1".to_string(),
        })
        .await;

    client_m
        .send(&ClientEvent::SendMessage {
            conversation_id: "r1".to_string(),
            content: "intruding".to_string(),
            reply_to: None,
            attachments: vec![],
        })
        .await;

    let event = client_m
        .expect("rejection", |e| matches!(e, ServerEvent::Error { .. }))
        .await;
    match event {
        ServerEvent::Error { code, .. } => assert_eq!(code, "not_a_room_member"),
        _ => unreachable!(),
    }

    // The failure neither disconnected the socket nor leaked into the room.
    client_a
        .expect_none("leaked event", Duration::from_millis(300), |e| {
            matches!(e, ServerEvent::MessageNew(_) | ServerEvent::Error { .. })
        })
        .await;
    client_m
        .send(&ClientEvent::PresenceUpdate {
            status: courier_server::message::PresenceStatus::Away,
        })
        .await;
    client_m
        .expect("socket still alive", |e| {
            matches!(e, ServerEvent::PresenceUser { user_id, .. } if *user_id == mallory)
        })
        .await;
}

#[tokio::test]
async fn repeated_handshake_failures_lock_the_identifier_out() {
    let mut config = test_config();
    config.auth_rate_limit.max_attempts = 2;
    let app = spawn_app_with(config).await;

    let user = Uuid::new_v4();

    // Tokens signed with a foreign key carry readable claims (so the limiter
    // keys on this user) but fail signature verification.
    let mut foreign_config = test_config();
    foreign_config.jwt_secret = "a-completely-different-secret-0123456789".to_string();
    let foreign = courier_server::auth::TokenService::new(
        &foreign_config,
        Arc::new(InMemoryTokenStore::new()),
    )
    .unwrap();
    let forged = foreign.issue_token_pair(user, "member").await.unwrap();

    for _ in 0..2 {
        let (_client, event) =
            TestClient::connect_with_token(&app.address, &forged.access_token).await;
        match event {
            ServerEvent::Error { code, .. } => assert_eq!(code, "invalid_token"),
            other => panic!("expected error event, got {:?}", other),
        }
    }

    // Even a genuine token is refused while the key is locked out.
    let genuine = app.issue_access(user).await;
    let (_client, event) = TestClient::connect_with_token(&app.address, &genuine).await;
    match event {
        ServerEvent::Error { code, message } => {
            assert_eq!(code, "rate_limited");
            assert!(message.contains("Retry after"));
        }
        other => panic!("expected rate_limited, got {:?}", other),
    }
}
