//! Integration tests for access token renewal.
//!
//! These tests verify that the AuthSession and TokenRefresher correctly:
//! - Serve a still-valid token without touching the network
//! - Refresh expiring tokens and persist the result
//! - Collapse concurrent refreshes into a single token request
//! - Clear credentials when the token endpoint rejects the refresh token

use std::sync::Arc;

use chrono::{Duration, Utc};
use futures_util::future::join_all;
use tabcal_core::{
    AuthSession, Credential, CredentialRecord, CredentialStore, ErrorKind, MemoryStore,
    ProviderConfig, Secret, StoreKey, TokenError,
};
use wiremock::{
    matchers::{body_string_contains, method, path},
    Mock, MockServer, Request, ResponseTemplate,
};

fn token_response(access_token: &str) -> serde_json::Value {
    serde_json::json!({
        "access_token": access_token,
        "expires_in": 3600,
        "token_type": "Bearer",
        "scope": "https://www.googleapis.com/auth/calendar.readonly"
    })
}

fn stored(access_token: &str, refresh_token: &str, expires_in: Duration) -> CredentialRecord {
    CredentialRecord {
        access_token: Some(Secret::new(access_token)),
        refresh_token: Some(Secret::new(refresh_token)),
        token_expires_at: Some((Utc::now() + expires_in).timestamp_millis()),
        pkce_code_verifier: None,
    }
}

/// Helper to set up a session against a mock token endpoint.
fn setup_session(server: &MockServer, record: CredentialRecord) -> (AuthSession, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::with_record(record));
    let provider = ProviderConfig::google("test-client-id")
        .with_token_url(format!("{}/token", server.uri()));
    (AuthSession::new(store.clone(), provider), store)
}

#[tokio::test]
async fn test_valid_token_makes_no_network_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response("unexpected")))
        .expect(0)
        .mount(&server)
        .await;

    let (session, _) = setup_session(&server, stored("valid", "refresh", Duration::hours(1)));

    for _ in 0..3 {
        let token = session.access_token().await.unwrap();
        assert_eq!(token.expose(), "valid");
    }
}

#[tokio::test]
async fn test_expired_token_is_refreshed_and_persisted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=old-refresh"))
        .and(body_string_contains("client_id=test-client-id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response("new-access")))
        .expect(1)
        .mount(&server)
        .await;

    let (session, store) = setup_session(&server, stored("stale", "old-refresh", -Duration::hours(1)));

    let token = session.access_token().await.unwrap();
    assert_eq!(token.expose(), "new-access");

    let record = store.get(&StoreKey::CREDENTIALS).await.unwrap();
    assert_eq!(record.access_token.unwrap().expose(), "new-access");
    // Not rotated by the server, so the old one is kept
    assert_eq!(record.refresh_token.unwrap().expose(), "old-refresh");

    let expires_at = record.token_expires_at.unwrap();
    let expected = (Utc::now() + Duration::seconds(3600)).timestamp_millis();
    assert!((expected - expires_at).abs() < 10_000);

    // The refreshed token is now served from the store
    let again = session.access_token().await.unwrap();
    assert_eq!(again.expose(), "new-access");
}

#[tokio::test]
async fn test_token_inside_margin_is_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response("new-access")))
        .expect(1)
        .mount(&server)
        .await;

    let (session, _) = setup_session(&server, stored("almost", "refresh", Duration::seconds(30)));

    let token = session.access_token().await.unwrap();
    assert_eq!(token.expose(), "new-access");
}

#[tokio::test]
async fn test_rotated_refresh_token_is_stored() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "new-access",
            "expires_in": 3600,
            "refresh_token": "rotated-refresh"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (session, store) = setup_session(&server, stored("stale", "old-refresh", -Duration::hours(1)));

    session.access_token().await.unwrap();

    let record = store.get(&[StoreKey::RefreshToken]).await.unwrap();
    assert_eq!(record.refresh_token.unwrap().expose(), "rotated-refresh");
}

#[tokio::test]
async fn test_rejected_refresh_clears_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut record = stored("stale", "revoked", -Duration::hours(1));
    record.pkce_code_verifier = Some(Secret::new("leftover"));
    let (session, store) = setup_session(&server, record);

    let err = session.access_token().await.unwrap_err();
    assert!(matches!(err, TokenError::AuthExpired { .. }));
    assert_eq!(err.kind(), ErrorKind::AuthExpired);
    assert!(err.kind().requires_sign_in());

    assert!(store.get(&StoreKey::ALL).await.unwrap().is_empty());

    // With nothing stored the caller is now told to sign in
    let err = session.access_token().await.unwrap_err();
    assert!(matches!(err, TokenError::NotAuthenticated));
}

#[tokio::test]
async fn test_malformed_response_keeps_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let (session, store) = setup_session(&server, stored("stale", "refresh", -Duration::hours(1)));

    let err = session.access_token().await.unwrap_err();
    assert!(matches!(err, TokenError::Protocol { .. }));
    assert_eq!(err.kind(), ErrorKind::NetworkOrProtocol);

    let record = store.get(&StoreKey::CREDENTIALS).await.unwrap();
    assert_eq!(record.refresh_token.unwrap().expose(), "refresh");
}

#[tokio::test]
async fn test_not_authenticated_without_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response("unexpected")))
        .expect(0)
        .mount(&server)
        .await;

    let (session, _) = setup_session(&server, CredentialRecord::new());

    let err = session.access_token().await.unwrap_err();
    assert!(matches!(err, TokenError::NotAuthenticated));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_response("shared-access"))
                .set_delay(std::time::Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (session, _) = setup_session(&server, stored("stale", "refresh", -Duration::hours(1)));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.access_token().await })
        })
        .collect();

    for result in join_all(handles).await {
        let token = result.unwrap().unwrap();
        assert_eq!(token.expose(), "shared-access");
    }
    assert!(!session.refresher().is_refreshing());
}

#[tokio::test]
async fn test_concurrent_callers_share_one_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(serde_json::json!({ "error": "invalid_client" }))
                .set_delay(std::time::Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (session, store) = setup_session(&server, stored("stale", "refresh", -Duration::hours(1)));

    let results = join_all((0..5).map(|_| session.access_token())).await;

    for result in results {
        assert!(matches!(result, Err(TokenError::AuthExpired { .. })));
    }
    assert!(store.get(&StoreKey::ALL).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_new_refresh_after_failed_one() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response("second-try")))
        .expect(1)
        .mount(&server)
        .await;

    let (session, _) = setup_session(&server, stored("stale", "refresh", -Duration::hours(1)));

    assert!(session.access_token().await.is_err());
    assert!(!session.refresher().is_refreshing());

    // The user signs in again
    session
        .store_credential(
            Credential::new("expired", Utc::now() - Duration::minutes(5)).with_refresh_token("fresh"),
        )
        .await
        .unwrap();

    let token = session.access_token().await.unwrap();
    assert_eq!(token.expose(), "second-try");
}

#[tokio::test]
async fn test_store_then_read_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response("unexpected")))
        .expect(0)
        .mount(&server)
        .await;

    let (session, _) = setup_session(&server, CredentialRecord::new());
    let access_token = "ya29.a0AfH6SMB-byte/identical+token==";

    session
        .store_credential(
            Credential::new(access_token, Utc::now() + Duration::hours(1)).with_refresh_token("1//r"),
        )
        .await
        .unwrap();

    let token = session.access_token().await.unwrap();
    assert_eq!(token.expose(), access_token);
}

#[tokio::test]
async fn test_confidential_client_sends_secret_only() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("client_secret=test-secret"))
        .and(|request: &Request| !String::from_utf8_lossy(&request.body).contains("code_verifier"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response("new-access")))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::with_record(stored(
        "stale",
        "refresh",
        -Duration::hours(1),
    )));
    let provider = ProviderConfig::google("test-client-id")
        .with_client_secret("test-secret")
        .with_token_url(format!("{}/token", server.uri()));
    let session = AuthSession::new(store, provider);

    let token = session.access_token().await.unwrap();
    assert_eq!(token.expose(), "new-access");
}

#[tokio::test]
async fn test_out_of_range_lifetime_keeps_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"access_token":"huge","expires_in":9223372036854775807,"token_type":"Bearer"}"#,
            "application/json",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let (session, store) = setup_session(&server, stored("stale", "refresh", -Duration::hours(1)));

    let err = session.access_token().await.unwrap_err();
    assert!(matches!(err, TokenError::Protocol { .. }));
    assert!(!session.refresher().is_refreshing());

    let record = store.get(&StoreKey::CREDENTIALS).await.unwrap();
    assert_eq!(record.access_token.unwrap().expose(), "stale");
    assert_eq!(record.refresh_token.unwrap().expose(), "refresh");
}

#[tokio::test]
async fn test_late_refresh_reuses_settled_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response("refreshed")))
        .expect(1)
        .mount(&server)
        .await;

    let (session, _) = setup_session(&server, stored("stale", "refresh", -Duration::hours(1)));

    let first = session.access_token().await.unwrap();
    assert_eq!(first.expose(), "refreshed");

    // A caller that saw the stale token before the first exchange settled
    let late = session.refresher().refresh().await.unwrap();
    assert_eq!(late.expose(), "refreshed");
}
