//! Discovery and key set caching against a mock identity provider
//!
//! `expect(n)` on each mock is verified when the server drops, so these tests
//! pin the number of upstream fetches.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockIdp, issue};
use psp_auth::testing::{MockToken, SigningKey, TEST_KEY_ID};
use psp_auth::{Auth, AuthConfig, AuthError, CacheConfig, TimeoutConfig};
use serde_json::json;
use wiremock::{
    Mock, ResponseTemplate,
    matchers::{method, path},
};

#[tokio::test]
async fn test_concurrent_cold_cache_fetches_once() {
    let idp = MockIdp::start().await;
    idp.mount_discovery(Some(1)).await;
    idp.mount_jwks(vec![SigningKey::Primary.jwk(TEST_KEY_ID)], Some(1))
        .await;

    let auth = Arc::new(idp.auth());
    let raw = Arc::new(issue(&MockToken::new()));

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let auth = Arc::clone(&auth);
            let raw = Arc::clone(&raw);
            tokio::spawn(async move { auth.validate_token(&raw).await })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
}

#[tokio::test]
async fn test_sequential_requests_reuse_cache() {
    let idp = MockIdp::start().await;
    idp.mount_discovery(Some(1)).await;
    idp.mount_jwks(vec![SigningKey::Primary.jwk(TEST_KEY_ID)], Some(1))
        .await;

    let auth = idp.auth();
    for _ in 0..5 {
        let raw = issue(&MockToken::new());
        auth.validate_token(&raw).await.unwrap();
    }
    auth.userinfo_endpoint().await.unwrap();
    auth.end_session_endpoint().await.unwrap();
}

#[tokio::test]
async fn test_invalidate_caches_refetches() {
    let idp = MockIdp::start().await;
    idp.mount_discovery(Some(2)).await;
    idp.mount_jwks(vec![SigningKey::Primary.jwk(TEST_KEY_ID)], Some(2))
        .await;

    let auth = idp.auth();
    let raw = issue(&MockToken::new());
    auth.validate_token(&raw).await.unwrap();
    auth.invalidate_caches();
    auth.validate_token(&raw).await.unwrap();
}

#[tokio::test]
async fn test_stale_key_set_refetched() {
    let idp = MockIdp::start().await;
    idp.mount_discovery(Some(1)).await;
    idp.mount_jwks(vec![SigningKey::Primary.jwk(TEST_KEY_ID)], Some(3))
        .await;

    let config = AuthConfig {
        cache: CacheConfig {
            keys_ttl: Duration::ZERO,
            ..Default::default()
        },
        ..idp.config()
    };
    let auth = Auth::new(config).unwrap();

    let raw = issue(&MockToken::new());
    for _ in 0..3 {
        auth.validate_token(&raw).await.unwrap();
    }
}

#[tokio::test]
async fn test_failed_discovery_is_not_cached() {
    let idp = MockIdp::start().await;
    Mock::given(method("GET"))
        .and(path(common::DISCOVERY_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&idp.server)
        .await;
    idp.mount_discovery(Some(1)).await;
    idp.mount_jwks(vec![SigningKey::Primary.jwk(TEST_KEY_ID)], Some(1))
        .await;

    let auth = idp.auth();
    let raw = issue(&MockToken::new());

    let err = auth.validate_token(&raw).await.unwrap_err();
    assert!(matches!(err, AuthError::Discovery(msg) if msg.contains("503")));

    assert!(auth.validate_token(&raw).await.is_ok());
}

#[tokio::test]
async fn test_failed_key_fetch_is_not_cached() {
    let idp = MockIdp::start().await;
    idp.mount_discovery(Some(1)).await;
    Mock::given(method("GET"))
        .and(path(common::JWKS_PATH))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .expect(1)
        .mount(&idp.server)
        .await;
    idp.mount_jwks(vec![SigningKey::Primary.jwk(TEST_KEY_ID)], Some(1))
        .await;

    let auth = idp.auth();
    let raw = issue(&MockToken::new());

    let err = auth.validate_token(&raw).await.unwrap_err();
    assert!(matches!(err, AuthError::KeyFetch(msg) if msg.contains("404")));

    assert!(auth.validate_token(&raw).await.is_ok());
}

#[tokio::test]
async fn test_discovery_server_error() {
    let idp = MockIdp::start().await;
    idp.mount_discovery_with(ResponseTemplate::new(500), None)
        .await;

    let auth = idp.auth();
    let err = auth.metadata().await.unwrap_err();
    assert!(matches!(err, AuthError::Discovery(_)));
    assert_eq!(err.status_code(), 502);
    assert!(!err.public_message().contains("127.0.0.1"));
}

#[tokio::test]
async fn test_discovery_missing_field_is_named() {
    let idp = MockIdp::start().await;
    let mut document = idp.discovery_document();
    document.as_object_mut().unwrap().remove("jwks_uri");
    idp.mount_discovery_with(ResponseTemplate::new(200).set_body_json(document), None)
        .await;

    let err = idp.auth().metadata().await.unwrap_err();
    assert!(matches!(err, AuthError::Discovery(msg) if msg.contains("jwks_uri")));
}

#[tokio::test]
async fn test_discovery_invalid_json() {
    let idp = MockIdp::start().await;
    idp.mount_discovery_with(ResponseTemplate::new(200).set_body_string("<html>"), None)
        .await;

    let err = idp.auth().metadata().await.unwrap_err();
    assert!(matches!(err, AuthError::Discovery(_)));
}

#[tokio::test]
async fn test_jwks_without_keys_array() {
    let idp = MockIdp::start().await;
    idp.mount_discovery(None).await;
    idp.mount_jwks_with(
        ResponseTemplate::new(200).set_body_json(json!({"certs": []})),
        None,
    )
    .await;

    let err = idp
        .auth()
        .validate_token(&issue(&MockToken::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::KeyFetch(_)));
}

#[tokio::test]
async fn test_slow_discovery_times_out() {
    let idp = MockIdp::start().await;
    idp.mount_discovery_with(
        ResponseTemplate::new(200)
            .set_body_json(idp.discovery_document())
            .set_delay(Duration::from_secs(3)),
        None,
    )
    .await;

    let config = AuthConfig {
        timeouts: TimeoutConfig {
            connect: Duration::from_secs(1),
            read: Duration::from_millis(300),
        },
        ..idp.config()
    };
    let auth = Auth::new(config).unwrap();

    let err = auth.metadata().await.unwrap_err();
    assert!(matches!(err, AuthError::Discovery(_)), "{err:?}");
}

#[tokio::test]
async fn test_unreachable_provider() {
    // Port 9 (discard) on localhost is not served in the test environment
    let config = AuthConfig::builder(
        "http://127.0.0.1:9/.well-known/openid-configuration",
        common::CLIENT_ID,
    )
    .timeouts(Duration::from_millis(500), Duration::from_millis(500))
    .build()
    .unwrap();
    let auth = Auth::new(config).unwrap();

    let err = auth
        .validate_token(&issue(&MockToken::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Discovery(_)));
    assert!(!err.is_client_error());
}
