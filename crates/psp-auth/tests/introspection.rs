//! Token introspection against a mock identity provider

mod common;

use common::{CLIENT_ID, INTROSPECTION_PATH, MockIdp, bearer, issue};
use psp_auth::testing::MockToken;
use psp_auth::{Auth, AuthConfig, AuthError, IntrospectionMode};
use serde_json::json;
use wiremock::{
    Mock, ResponseTemplate,
    matchers::{body_string_contains, header, method, path},
};

/// `Basic base64("myclient:s3cret")`
const BASIC_CREDENTIALS: &str = "Basic bXljbGllbnQ6czNjcmV0";

async fn mount_introspection(idp: &MockIdp, response: ResponseTemplate, expect: u64) {
    Mock::given(method("POST"))
        .and(path(INTROSPECTION_PATH))
        .and(header("authorization", BASIC_CREDENTIALS))
        .and(body_string_contains("token_type_hint=access_token"))
        .respond_with(response)
        .expect(expect)
        .mount(&idp.server)
        .await;
}

#[tokio::test]
async fn test_active_token() {
    let idp = MockIdp::start_serving().await;
    mount_introspection(
        &idp,
        ResponseTemplate::new(200).set_body_json(json!({
            "active": true,
            "client_id": CLIENT_ID,
            "username": "jandoener123",
            "scope": "openid profile",
        })),
        2,
    )
    .await;

    let auth = idp.auth();
    let raw = issue(&MockToken::new());
    assert!(auth.validate_token_remotely(&raw).await.unwrap());

    let response = auth.introspect(&raw).await.unwrap();
    assert!(response.active);
    assert_eq!(response.username.as_deref(), Some("jandoener123"));
}

#[tokio::test]
async fn test_posts_token_in_form_body() {
    let idp = MockIdp::start_serving().await;
    Mock::given(method("POST"))
        .and(path(INTROSPECTION_PATH))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("token=opaque-token-value"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"active": true})))
        .expect(1)
        .mount(&idp.server)
        .await;

    assert!(
        idp.auth()
            .validate_token_remotely("opaque-token-value")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_inactive_token() {
    let idp = MockIdp::start_serving().await;
    mount_introspection(
        &idp,
        ResponseTemplate::new(200).set_body_json(json!({"active": false})),
        1,
    )
    .await;

    assert!(!idp.auth().validate_token_remotely("revoked").await.unwrap());
}

#[tokio::test]
async fn test_missing_active_is_inactive() {
    let idp = MockIdp::start_serving().await;
    mount_introspection(
        &idp,
        ResponseTemplate::new(200).set_body_json(json!({"client_id": CLIENT_ID})),
        1,
    )
    .await;

    assert!(!idp.auth().validate_token_remotely("t").await.unwrap());
}

#[tokio::test]
async fn test_rejected_credentials() {
    for status in [401u16, 403] {
        let idp = MockIdp::start_serving().await;
        mount_introspection(&idp, ResponseTemplate::new(status), 1).await;

        let err = idp.auth().validate_token_remotely("t").await.unwrap_err();
        assert_eq!(err, AuthError::IntrospectionAuth { status });
        assert_eq!(err.status_code(), 502);
    }
}

#[tokio::test]
async fn test_server_error() {
    let idp = MockIdp::start_serving().await;
    mount_introspection(&idp, ResponseTemplate::new(500), 1).await;

    let err = idp.auth().validate_token_remotely("t").await.unwrap_err();
    assert!(matches!(err, AuthError::IntrospectionHttp(msg) if msg.contains("500")));
}

#[tokio::test]
async fn test_not_cached() {
    let idp = MockIdp::start_serving().await;
    mount_introspection(
        &idp,
        ResponseTemplate::new(200).set_body_json(json!({"active": true})),
        3,
    )
    .await;

    let auth = idp.auth();
    for _ in 0..3 {
        assert!(auth.validate_token_remotely("t").await.unwrap());
    }
}

#[tokio::test]
async fn test_required_mode_rejects_revoked_token() {
    let idp = MockIdp::start_serving().await;
    mount_introspection(
        &idp,
        ResponseTemplate::new(200).set_body_json(json!({"active": false})),
        1,
    )
    .await;

    let config = AuthConfig {
        introspection: IntrospectionMode::Required,
        ..idp.config()
    };
    let auth = Auth::new(config).unwrap();

    let header = bearer(&issue(&MockToken::new()));
    let err = auth.authenticate(Some(&header)).await.unwrap_err();
    assert_eq!(err, AuthError::TokenInactive);
    assert_eq!(err.status_code(), 401);
}

#[tokio::test]
async fn test_required_mode_accepts_active_token() {
    let idp = MockIdp::start_serving().await;
    mount_introspection(
        &idp,
        ResponseTemplate::new(200).set_body_json(json!({"active": true})),
        1,
    )
    .await;

    let config = AuthConfig {
        introspection: IntrospectionMode::Required,
        ..idp.config()
    };
    let auth = Auth::new(config).unwrap();

    let header = bearer(&issue(&MockToken::new()));
    assert!(auth.authenticate(Some(&header)).await.is_ok());
}

#[tokio::test]
async fn test_required_mode_skips_introspection_for_invalid_token() {
    let idp = MockIdp::start_serving().await;
    mount_introspection(
        &idp,
        ResponseTemplate::new(200).set_body_json(json!({"active": true})),
        0,
    )
    .await;

    let config = AuthConfig {
        introspection: IntrospectionMode::Required,
        ..idp.config()
    };
    let auth = Auth::new(config).unwrap();

    let header = bearer(&issue(&MockToken::new().expired()));
    assert!(matches!(
        auth.authenticate(Some(&header)).await,
        Err(AuthError::TokenExpired(_))
    ));
}

#[tokio::test]
async fn test_disabled_mode_never_introspects() {
    let idp = MockIdp::start_serving().await;
    mount_introspection(
        &idp,
        ResponseTemplate::new(200).set_body_json(json!({"active": false})),
        0,
    )
    .await;

    let auth = idp.auth();
    let header = bearer(&issue(&MockToken::new()));
    assert!(auth.authenticate(Some(&header)).await.is_ok());
}
