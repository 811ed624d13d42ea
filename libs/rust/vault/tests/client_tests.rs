//! HTTP broker tests against a mock Vault server.

use std::sync::Arc;
use std::time::Duration;

use auth_vault_client::{
    Broker, BrokerError, HttpBroker, IdentityProof, LifecycleEvent, LifecycleManager, VaultConfig,
};
use rust_common::{Retryable, ShutdownCoordinator};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use test_utils::fixtures::{kv_body, login_body, lookup_body, test_config};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn broker(server: &MockServer) -> HttpBroker {
    HttpBroker::new(&VaultConfig::new(server.uri(), "knox")).unwrap()
}

fn proof() -> IdentityProof {
    IdentityProof {
        role: "knox".into(),
        jwt: SecretString::from("eyJhbGciOiJSUzI1NiJ9.test.sig"),
    }
}

fn token() -> SecretString {
    SecretString::from("hvs.client")
}

#[tokio::test]
async fn test_login_posts_role_and_jwt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/kubernetes/login"))
        .and(body_json(json!({
            "role": "knox",
            "jwt": "eyJhbGciOiJSUzI1NiJ9.test.sig"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body("hvs.client", true, 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let grant = broker(&server)
        .login("kubernetes", &proof())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(grant.client_token.expose_secret(), "hvs.client");
    assert_eq!(grant.accessor, "accessor-hvs.client");
    assert_eq!(grant.lease_duration, Duration::from_secs(3600));
    assert!(grant.renewable);
    assert!(grant.policies.contains(&"microservice".to_string()));
}

#[tokio::test]
async fn test_login_without_auth_block() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/kubernetes/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "auth": null })))
        .mount(&server)
        .await;

    let grant = broker(&server).login("kubernetes", &proof()).await.unwrap();
    assert!(grant.is_none());
}

#[tokio::test]
async fn test_read_secret_sends_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/knox/data/microservice/secret"))
        .and(header("X-Vault-Token", "hvs.client"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(kv_body(&json!({ "password": "s3cret", "user": "app" }), 4)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let record = broker(&server)
        .read_secret(&token(), "knox", "microservice/secret")
        .await
        .unwrap();

    assert_eq!(record.version, Some(4));
    assert!(record.ttl.is_zero());
    let password = record
        .string_field("knox/microservice/secret", "password")
        .unwrap();
    assert_eq!(password.expose_secret(), "s3cret");
}

#[tokio::test]
async fn test_renew_self_sends_increment() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/auth/token/renew-self"))
        .and(header("X-Vault-Token", "hvs.client"))
        .and(body_json(json!({ "increment": 3600 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body("hvs.client", true, 1800)))
        .expect(1)
        .mount(&server)
        .await;

    let grant = broker(&server)
        .renew_self(&token(), Duration::from_secs(3600))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(grant.lease_duration, Duration::from_secs(1800));
}

#[tokio::test]
async fn test_lookup_self_keeps_caller_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/auth/token/lookup-self"))
        .and(header("X-Vault-Token", "hvs.client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(lookup_body(600, false)))
        .mount(&server)
        .await;

    let grant = broker(&server).lookup_self(&token()).await.unwrap().unwrap();

    assert_eq!(grant.client_token.expose_secret(), "hvs.client");
    assert_eq!(grant.lease_duration, Duration::from_secs(600));
    assert!(!grant.renewable);
}

#[tokio::test]
async fn test_status_mapping() {
    let cases: [(u16, &str); 5] = [
        (404, "not found"),
        (403, "permission denied"),
        (429, "rate limited"),
        (503, "unavailable"),
        (400, "rejected"),
    ];

    for (status, expected) in cases {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status).set_body_string("{\"errors\":[]}"))
            .mount(&server)
            .await;

        let err = broker(&server)
            .read_secret(&token(), "knox", "microservice/secret")
            .await
            .unwrap_err();

        let matched = match expected {
            "not found" => matches!(err, BrokerError::SecretNotFound(_)),
            "permission denied" => matches!(err, BrokerError::PermissionDenied(_)),
            "rate limited" => matches!(err, BrokerError::RateLimited),
            "unavailable" => matches!(err, BrokerError::Unavailable(_)),
            _ => matches!(err, BrokerError::Rejected { status: 400, .. }),
        };
        assert!(matched, "status {status} mapped to {err:?}");
        assert_eq!(err.is_retryable(), !matches!(status, 403 | 404));
    }
}

#[tokio::test]
async fn test_malformed_body_is_serialization_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let err = broker(&server)
        .login("kubernetes", &proof())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Serialization(_)));
}

#[tokio::test]
async fn test_unreachable_vault_is_unavailable() {
    let broker = HttpBroker::new(
        &VaultConfig::new("http://127.0.0.1:1", "knox").with_timeout(Duration::from_secs(2)),
    )
    .unwrap();

    let err = broker.lookup_self(&token()).await.unwrap_err();
    assert!(matches!(err, BrokerError::Unavailable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_lifecycle_publishes_credential_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/kubernetes/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body("hvs.session", true, 3600)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/knox/data/microservice/secret"))
        .and(header("X-Vault-Token", "hvs.session"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(kv_body(&json!({ "password": "db-pass" }), 1)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let broker = Arc::new(HttpBroker::new(&config).unwrap());
    let mut manager = LifecycleManager::new(broker, &config);
    let mut handle = manager.handle();
    let mut events = handle.subscribe();

    let shutdown = ShutdownCoordinator::new();
    let signal = shutdown.subscribe();
    let task = tokio::spawn(async move { manager.run(signal).await });

    let credential = handle.changed().await.unwrap();
    assert_eq!(credential.value.expose_secret(), "db-pass");
    assert!(credential.secret_ttl.is_zero());

    loop {
        if let LifecycleEvent::WatchStarted { session_id } = events.recv().await.unwrap() {
            assert_eq!(session_id, credential.session_id);
            break;
        }
    }

    shutdown.trigger();
    assert!(task.await.unwrap().is_ok());
}
