//! Secret and session types.
//!
//! Wire structs mirror the JSON Vault returns; the domain types built from
//! them keep tokens and secret values behind [`SecretString`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::SecretError;

/// Machine identity used to log in. Fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Kubernetes auth role name
    pub role: String,
    /// Mount point of the Kubernetes auth method
    pub auth_mount: String,
    /// Service account token path
    pub token_path: PathBuf,
}

/// Login payload built from an [`Identity`].
#[derive(Debug)]
pub struct IdentityProof {
    /// Kubernetes auth role name
    pub role: String,
    /// Service account JWT
    pub jwt: SecretString,
}

/// Token grant returned by login, lookup or renewal.
#[derive(Debug, Clone)]
pub struct AuthGrant {
    /// Vault token
    pub client_token: SecretString,
    /// Token accessor, safe to log
    pub accessor: String,
    /// Attached policies
    pub policies: Vec<String>,
    /// Remaining lease
    pub lease_duration: Duration,
    /// Whether renew-self is allowed
    pub renewable: bool,
}

/// Authenticated session.
///
/// Renewal never mutates a session; [`Session::renewed`] returns a new
/// snapshot carrying the extended lease.
#[derive(Debug, Clone)]
pub struct Session {
    /// Local identifier used in logs and events
    pub id: Uuid,
    /// Vault token
    pub token: SecretString,
    /// Token accessor
    pub accessor: String,
    /// Attached policies
    pub policies: Vec<String>,
    /// Whether the token can be renewed
    pub renewable: bool,
    /// Lease granted at the last login or renewal
    pub lease_duration: Duration,
    /// When the current lease started
    pub leased_at: DateTime<Utc>,
}

impl Session {
    /// Build a fresh session from a login or lookup grant.
    #[must_use]
    pub fn from_grant(grant: AuthGrant) -> Self {
        Self {
            id: Uuid::new_v4(),
            token: grant.client_token,
            accessor: grant.accessor,
            policies: grant.policies,
            renewable: grant.renewable,
            lease_duration: grant.lease_duration,
            leased_at: Utc::now(),
        }
    }

    /// Snapshot of this session after a successful renewal.
    #[must_use]
    pub fn renewed(&self, lease: &LeaseInfo) -> Self {
        Self {
            renewable: lease.renewable,
            lease_duration: lease.lease_duration,
            leased_at: lease.renewed_at,
            ..self.clone()
        }
    }

    /// When the current lease runs out, `None` for tokens without a TTL.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.lease_duration.is_zero() {
            return None;
        }
        chrono::Duration::from_std(self.lease_duration)
            .ok()
            .map(|lease| self.leased_at + lease)
    }
}

/// Lease details reported by a successful renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseInfo {
    /// New lease length
    pub lease_duration: Duration,
    /// Whether further renewal is allowed
    pub renewable: bool,
    /// When the renewal was acknowledged
    pub renewed_at: DateTime<Utc>,
}

/// Secret read from a KV v2 mount. Not cached; each read is a round trip.
#[derive(Clone)]
pub struct SecretRecord {
    /// Secret key/value pairs
    pub data: Map<String, Value>,
    /// TTL of the secret itself, zero when none governs it
    pub ttl: Duration,
    /// KV version
    pub version: Option<u32>,
}

impl fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRecord")
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .field("ttl", &self.ttl)
            .field("version", &self.version)
            .finish()
    }
}

impl SecretRecord {
    /// Typed accessor for a string field.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::FieldMissingOrWrongType`] when the field is
    /// absent or holds anything but a string.
    pub fn string_field(&self, path: &str, field: &str) -> Result<SecretString, SecretError> {
        match self.data.get(field) {
            Some(Value::String(value)) => Ok(SecretString::from(value.clone())),
            other => Err(SecretError::FieldMissingOrWrongType {
                field: field.to_string(),
                path: path.to_string(),
                found: json_type(other),
            }),
        }
    }
}

const fn json_type(value: Option<&Value>) -> &'static str {
    match value {
        None => "missing",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "a boolean",
        Some(Value::Number(_)) => "a number",
        Some(Value::String(_)) => "a string",
        Some(Value::Array(_)) => "an array",
        Some(Value::Object(_)) => "an object",
    }
}

/// Vault auth response (login, renew-self)
#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    /// Missing when Vault had nothing to issue
    #[serde(default)]
    pub auth: Option<AuthData>,
}

/// `auth` block of an auth response
#[derive(Deserialize)]
pub struct AuthData {
    /// Vault token
    pub client_token: String,
    /// Token accessor
    #[serde(default)]
    pub accessor: String,
    /// Attached policies
    #[serde(default)]
    pub policies: Vec<String>,
    /// Lease in seconds
    pub lease_duration: u64,
    /// Whether renew-self is allowed
    pub renewable: bool,
}

impl fmt::Debug for AuthData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthData")
            .field("client_token", &"[REDACTED]")
            .field("accessor", &self.accessor)
            .field("policies", &self.policies)
            .field("lease_duration", &self.lease_duration)
            .field("renewable", &self.renewable)
            .finish()
    }
}

impl From<AuthData> for AuthGrant {
    fn from(auth: AuthData) -> Self {
        Self {
            client_token: SecretString::from(auth.client_token),
            accessor: auth.accessor,
            policies: auth.policies,
            lease_duration: Duration::from_secs(auth.lease_duration),
            renewable: auth.renewable,
        }
    }
}

/// Vault token lookup-self response
#[derive(Debug, Deserialize)]
pub struct LookupResponse {
    /// Missing when the token is unknown
    #[serde(default)]
    pub data: Option<LookupData>,
}

/// `data` block of a lookup-self response
#[derive(Debug, Deserialize)]
pub struct LookupData {
    /// Token accessor
    #[serde(default)]
    pub accessor: String,
    /// Attached policies
    #[serde(default)]
    pub policies: Vec<String>,
    /// Remaining TTL in seconds
    #[serde(default)]
    pub ttl: u64,
    /// Whether renew-self is allowed
    #[serde(default)]
    pub renewable: bool,
}

impl LookupData {
    /// Lookup does not echo the token, the caller supplies it.
    #[must_use]
    pub fn into_grant(self, token: SecretString) -> AuthGrant {
        AuthGrant {
            client_token: token,
            accessor: self.accessor,
            policies: self.policies,
            lease_duration: Duration::from_secs(self.ttl),
            renewable: self.renewable,
        }
    }
}

/// Vault KV v2 response wrapper
#[derive(Debug, Deserialize)]
pub struct KvResponse {
    /// Secret payload, absent for deleted versions
    #[serde(default)]
    pub data: Option<KvData>,
    /// Lease in seconds
    #[serde(default)]
    pub lease_duration: u64,
    /// Auth block, set only when the read minted a token
    #[serde(default)]
    pub auth: Option<AuthData>,
}

/// Data block of a KV v2 read
#[derive(Debug, Deserialize)]
pub struct KvData {
    /// Secret key/value pairs
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    /// Version metadata
    #[serde(default)]
    pub metadata: Option<KvMetadata>,
}

/// KV v2 version metadata
#[derive(Debug, Deserialize)]
pub struct KvMetadata {
    /// Creation time
    #[serde(default)]
    pub created_time: String,
    /// Version number
    pub version: u32,
}

impl KvResponse {
    /// Convert into a [`SecretRecord`].
    ///
    /// The TTL is the lease of the token minted by the read, if any, else the
    /// secret lease. KV v2 reads carry neither, which reports zero.
    #[must_use]
    pub fn into_record(self) -> SecretRecord {
        let ttl = self
            .auth
            .as_ref()
            .map_or(self.lease_duration, |auth| auth.lease_duration);
        let (data, version) = self.data.map_or((Map::new(), None), |kv| {
            (
                kv.data.unwrap_or_default(),
                kv.metadata.map(|meta| meta.version),
            )
        });

        SecretRecord {
            data,
            ttl: Duration::from_secs(ttl),
            version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serde_json::json;

    fn record(data: Value) -> SecretRecord {
        SecretRecord {
            data: data.as_object().cloned().unwrap_or_default(),
            ttl: Duration::ZERO,
            version: Some(1),
        }
    }

    #[test]
    fn test_string_field_present() {
        let secret = record(json!({ "password": "p1" }));
        let value = secret.string_field("microservice/secret", "password").unwrap();
        assert_eq!(value.expose_secret(), "p1");
    }

    #[test]
    fn test_string_field_missing() {
        let secret = record(json!({ "username": "root" }));
        let err = secret
            .string_field("microservice/secret", "password")
            .unwrap_err();
        assert!(matches!(
            err,
            SecretError::FieldMissingOrWrongType { found: "missing", .. }
        ));
    }

    #[test]
    fn test_string_field_wrong_type() {
        let secret = record(json!({ "password": 1234 }));
        let err = secret
            .string_field("microservice/secret", "password")
            .unwrap_err();
        assert!(matches!(
            err,
            SecretError::FieldMissingOrWrongType { found: "a number", .. }
        ));
    }

    #[test]
    fn test_record_debug_hides_values() {
        let secret = record(json!({ "password": "hunter2" }));
        let debug = format!("{secret:?}");
        assert!(debug.contains("password"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_kv_response_without_lease_reports_zero_ttl() {
        let response: KvResponse = serde_json::from_value(json!({
            "request_id": "b0f5",
            "lease_id": "",
            "renewable": false,
            "lease_duration": 0,
            "data": {
                "data": { "password": "p1" },
                "metadata": { "created_time": "2024-01-01T00:00:00Z", "version": 3 }
            }
        }))
        .unwrap();

        let record = response.into_record();
        assert_eq!(record.ttl, Duration::ZERO);
        assert_eq!(record.version, Some(3));
        assert!(record.data.contains_key("password"));
    }

    #[test]
    fn test_session_renewal_is_a_new_snapshot() {
        let session = Session::from_grant(AuthGrant {
            client_token: SecretString::from("t1"),
            accessor: "acc".into(),
            policies: vec!["default".into()],
            lease_duration: Duration::from_secs(3600),
            renewable: true,
        });
        let lease = LeaseInfo {
            lease_duration: Duration::from_secs(1800),
            renewable: true,
            renewed_at: session.leased_at + chrono::Duration::seconds(60),
        };

        let renewed = session.renewed(&lease);
        assert_eq!(renewed.id, session.id);
        assert_eq!(renewed.lease_duration, Duration::from_secs(1800));
        assert_eq!(session.lease_duration, Duration::from_secs(3600));
        assert_eq!(renewed.token.expose_secret(), "t1");
    }

    #[test]
    fn test_expires_at() {
        let mut session = Session::from_grant(AuthGrant {
            client_token: SecretString::from("t1"),
            accessor: String::new(),
            policies: vec![],
            lease_duration: Duration::from_secs(60),
            renewable: false,
        });
        assert_eq!(
            session.expires_at(),
            Some(session.leased_at + chrono::Duration::seconds(60))
        );

        session.lease_duration = Duration::ZERO;
        assert_eq!(session.expires_at(), None);
    }
}
