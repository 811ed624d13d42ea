//! Test fixtures with sample data.
//!
//! This module provides pre-built Vault payloads and broker values.

use std::path::PathBuf;
use std::time::Duration;

use auth_vault_client::{AuthGrant, SecretRecord, VaultConfig};
use rust_common::RetryConfig;
use secrecy::SecretString;
use serde_json::{Value, json};

/// Grant as returned by a successful login.
#[must_use]
pub fn grant(token: &str, renewable: bool, lease_secs: u64) -> AuthGrant {
    AuthGrant {
        client_token: SecretString::from(token),
        accessor: format!("accessor-{token}"),
        policies: vec!["default".to_string(), "microservice".to_string()],
        lease_duration: Duration::from_secs(lease_secs),
        renewable,
    }
}

/// Secret record built from a JSON object.
#[must_use]
pub fn secret(data: &Value, ttl_secs: u64) -> SecretRecord {
    SecretRecord {
        data: data.as_object().cloned().unwrap_or_default(),
        ttl: Duration::from_secs(ttl_secs),
        version: Some(1),
    }
}

/// Secret record holding `password`.
#[must_use]
pub fn password_secret(password: &str, ttl_secs: u64) -> SecretRecord {
    secret(&json!({ "password": password }), ttl_secs)
}

/// Write a service account token to a fresh temp file.
///
/// # Panics
///
/// Panics if the temp directory is not writable.
#[must_use]
#[allow(clippy::expect_used)]
pub fn service_account_token(contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("sa-token-{}", uuid::Uuid::new_v4()));
    std::fs::write(&path, contents).expect("temp dir must be writable");
    path
}

/// Configuration pointing at `addr` with a real token file and fast retries.
#[must_use]
pub fn test_config(addr: &str) -> VaultConfig {
    VaultConfig::new(addr, "knox")
        .with_token_path(service_account_token("eyJhbGciOiJSUzI1NiJ9.test.sig"))
        .with_secret("knox", "microservice/secret", "password")
        .with_retry(
            RetryConfig::default()
                .with_unlimited_retries()
                .without_jitter()
                .with_initial_delay(Duration::from_millis(10))
                .with_max_delay(Duration::from_millis(50)),
        )
}

/// Body of a Kubernetes login response.
#[must_use]
pub fn login_body(token: &str, renewable: bool, lease_secs: u64) -> Value {
    json!({
        "request_id": uuid::Uuid::new_v4().to_string(),
        "lease_id": "",
        "renewable": false,
        "lease_duration": 0,
        "data": null,
        "auth": {
            "client_token": token,
            "accessor": format!("accessor-{token}"),
            "policies": ["default", "microservice"],
            "token_policies": ["default", "microservice"],
            "metadata": { "role": "knox", "service_account_name": "microservice" },
            "lease_duration": lease_secs,
            "renewable": renewable
        }
    })
}

/// Body of a KV v2 read response.
#[must_use]
pub fn kv_body(data: &Value, version: u32) -> Value {
    json!({
        "request_id": uuid::Uuid::new_v4().to_string(),
        "lease_id": "",
        "renewable": false,
        "lease_duration": 0,
        "data": {
            "data": data,
            "metadata": {
                "created_time": "2024-05-01T10:00:00.000000Z",
                "deletion_time": "",
                "destroyed": false,
                "version": version
            }
        },
        "auth": null
    })
}

/// Body of a lookup-self response.
#[must_use]
pub fn lookup_body(ttl_secs: u64, renewable: bool) -> Value {
    json!({
        "data": {
            "accessor": "accessor-preissued",
            "policies": ["default"],
            "ttl": ttl_secs,
            "renewable": renewable
        }
    })
}
