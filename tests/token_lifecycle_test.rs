
use courier_server::auth::TokenService;
use courier_server::error::AppError;
use courier_server::token_store::{InMemoryTokenStore, TokenStore};
use std::sync::Arc;
use test_utils::test_config;
use uuid::Uuid;

fn service() -> (TokenService, Arc<dyn TokenStore>) {
    let store: Arc<dyn TokenStore> = Arc::new(InMemoryTokenStore::new());
    let tokens = TokenService::new(&test_config(), store.clone()).unwrap();
    (tokens, store)
}

#[tokio::test]
async fn issued_access_token_validates_with_matching_subject() {
    let (tokens, _) = service();
    let user = Uuid::new_v4();

    let pair = tokens.issue_token_pair(user, "member").await.unwrap();
    let claims = tokens.validate_access(&pair.access_token).await.unwrap();

    assert_eq!(claims.sub, user.to_string());
    assert_eq!(claims.role, "member");
    assert!(pair.access_expires_at < pair.refresh_expires_at);
}

#[tokio::test]
async fn issued_refresh_token_validates_against_the_registry() {
    let (tokens, _) = service();
    let user = Uuid::new_v4();

    let pair = tokens.issue_token_pair(user, "member").await.unwrap();
    let claims = tokens.validate_refresh(&pair.refresh_token).await.unwrap();
    assert_eq!(claims.sub, user.to_string());
}

#[tokio::test]
async fn rotation_replay_fails_with_reuse_detected() {
    let (tokens, _) = service();
    let user = Uuid::new_v4();

    let original = tokens.issue_token_pair(user, "member").await.unwrap();
    let rotated = tokens.rotate(&original.refresh_token).await.unwrap();

    // The first rotation succeeded; replaying the original must fail hard.
    let err = tokens.rotate(&original.refresh_token).await.unwrap_err();
    assert!(matches!(err, AppError::RefreshReuseDetected));

    // No information disclosure: the wire rendering matches an ordinary
    // invalid-token rejection.
    let plain = AppError::invalid_token("whatever");
    assert_eq!(err.error_code(), plain.error_code());
    assert_eq!(err.user_message(), plain.user_message());

    // The freshly rotated token still works.
    assert!(tokens.validate_refresh(&rotated.refresh_token).await.is_ok());
    assert!(tokens.rotate(&rotated.refresh_token).await.is_ok());
}

#[tokio::test]
async fn rotation_revokes_the_consumed_token_for_validation_too() {
    let (tokens, _) = service();
    let user = Uuid::new_v4();

    let original = tokens.issue_token_pair(user, "member").await.unwrap();
    tokens.rotate(&original.refresh_token).await.unwrap();

    assert!(tokens.validate_refresh(&original.refresh_token).await.is_err());
}

#[tokio::test]
async fn revoke_all_for_user_invalidates_every_outstanding_refresh_token() {
    let (tokens, _) = service();
    let user = Uuid::new_v4();
    let other = Uuid::new_v4();

    let session_a = tokens.issue_token_pair(user, "member").await.unwrap();
    let session_b = tokens.issue_token_pair(user, "member").await.unwrap();
    let unrelated = tokens.issue_token_pair(other, "member").await.unwrap();

    assert_eq!(tokens.revoke_all_for_user(user).await, 2);

    assert!(tokens.validate_refresh(&session_a.refresh_token).await.is_err());
    assert!(tokens.validate_refresh(&session_b.refresh_token).await.is_err());
    assert!(tokens.rotate(&session_a.refresh_token).await.is_err());
    assert!(tokens.validate_refresh(&unrelated.refresh_token).await.is_ok());
}

#[tokio::test]
async fn revoke_one_invalidates_a_single_session() {
    let (tokens, store) = service();
    let user = Uuid::new_v4();

    let pair = tokens.issue_token_pair(user, "member").await.unwrap();
    let claims = tokens.validate_refresh(&pair.refresh_token).await.unwrap();

    assert!(tokens.revoke_one(&claims.jti).await);
    assert!(tokens.validate_refresh(&pair.refresh_token).await.is_err());
    assert!(store.get(&claims.jti).await.unwrap().revoked);
}

#[tokio::test]
async fn blacklisted_access_token_is_rejected_before_expiry() {
    let (tokens, store) = service();
    let user = Uuid::new_v4();

    let pair = tokens.issue_token_pair(user, "member").await.unwrap();
    let claims = tokens.validate_access(&pair.access_token).await.unwrap();

    tokens.blacklist_access_token(&pair.access_token).await.unwrap();

    assert!(store.is_blacklisted(&claims.jti).await);
    assert!(tokens.validate_access(&pair.access_token).await.is_err());
    // Other tokens for the same user are unaffected.
    let fresh = tokens.issue_token_pair(user, "member").await.unwrap();
    assert!(tokens.validate_access(&fresh.access_token).await.is_ok());
}

#[tokio::test]
async fn tokens_from_a_foreign_key_are_rejected() {
    let (tokens, _) = service();
    let mut foreign_config = test_config();
    foreign_config.jwt_secret = "a-completely-different-secret-0123456789".to_string();
    let foreign =
        TokenService::new(&foreign_config, Arc::new(InMemoryTokenStore::new())).unwrap();

    let user = Uuid::new_v4();
    let forged = foreign.issue_token_pair(user, "member").await.unwrap();

    assert!(tokens.validate_access(&forged.access_token).await.is_err());
    assert!(tokens.validate_refresh(&forged.refresh_token).await.is_err());
}
