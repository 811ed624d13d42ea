//! Vault HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::{
    broker::Broker,
    config::VaultConfig,
    error::{BrokerError, VaultResult},
    secrets::{AuthGrant, AuthResponse, IdentityProof, KvResponse, LookupResponse, SecretRecord},
};

/// reqwest-backed [`Broker`] talking to the Vault HTTP API.
pub struct HttpBroker {
    addr: String,
    http: Client,
}

impl HttpBroker {
    /// Create a new Vault client.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Http`] when the HTTP client cannot be built.
    pub fn new(config: &VaultConfig) -> VaultResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(BrokerError::Http)?;

        Ok(Self {
            addr: config.addr.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        token: Option<&SecretString>,
        body: Option<serde_json::Value>,
    ) -> VaultResult<T> {
        let url = format!("{}/v1/{}", self.addr, path);

        let mut request = self.http.request(method, &url);
        if let Some(token) = token {
            request = request.header("X-Vault-Token", token.expose_secret());
        }
        if let Some(b) = body {
            request = request.json(&b);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BrokerError::unavailable(e.to_string()))?;

        let response = check_status(path, response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

async fn check_status(path: &str, response: Response) -> VaultResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    match status.as_u16() {
        404 => Err(BrokerError::not_found(path)),
        403 => Err(BrokerError::PermissionDenied(path.to_string())),
        429 => Err(BrokerError::RateLimited),
        s if s >= 500 => Err(BrokerError::unavailable(format!("Status {status}: {text}"))),
        s => Err(BrokerError::rejected(s, text)),
    }
}

#[async_trait]
impl Broker for HttpBroker {
    #[instrument(skip(self, proof), fields(role = %proof.role))]
    async fn login(&self, mount: &str, proof: &IdentityProof) -> VaultResult<Option<AuthGrant>> {
        let body = serde_json::json!({
            "role": proof.role,
            "jwt": proof.jwt.expose_secret(),
        });

        let response: AuthResponse = self
            .request(Method::POST, &format!("auth/{mount}/login"), None, Some(body))
            .await?;

        Ok(response.auth.map(AuthGrant::from))
    }

    #[instrument(skip_all)]
    async fn lookup_self(&self, token: &SecretString) -> VaultResult<Option<AuthGrant>> {
        let response: LookupResponse = self
            .request(Method::GET, "auth/token/lookup-self", Some(token), None)
            .await?;

        Ok(response.data.map(|data| data.into_grant(token.clone())))
    }

    #[instrument(skip(self, token), fields(increment_secs = increment.as_secs()))]
    async fn renew_self(
        &self,
        token: &SecretString,
        increment: Duration,
    ) -> VaultResult<Option<AuthGrant>> {
        let body = serde_json::json!({ "increment": increment.as_secs() });

        let response: AuthResponse = self
            .request(Method::PUT, "auth/token/renew-self", Some(token), Some(body))
            .await
            .inspect_err(|e| warn!(error = %e, "Token renewal request failed"))?;

        Ok(response.auth.map(AuthGrant::from))
    }

    #[instrument(skip(self, token))]
    async fn read_secret(
        &self,
        token: &SecretString,
        mount: &str,
        path: &str,
    ) -> VaultResult<SecretRecord> {
        debug!("Reading secret");

        let response: KvResponse = self
            .request(Method::GET, &format!("{mount}/data/{path}"), Some(token), None)
            .await?;

        Ok(response.into_record())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_trimmed() {
        let broker = HttpBroker::new(&VaultConfig::new("http://vault:8200/", "knox")).unwrap();
        assert_eq!(broker.addr, "http://vault:8200");
    }
}
