//! Credential gateway client
//!
//! Fetches short-lived session credentials and the wake word engine key from
//! the credential gateway (see [`crate::api`] for the service side).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::{Error, Result};

/// Short-lived, session-scoped secret
#[derive(Debug)]
pub struct EphemeralCredential {
    secret: SecretString,
    expires_at: Option<DateTime<Utc>>,
}

impl EphemeralCredential {
    /// Wrap a secret value
    #[must_use]
    pub const fn new(secret: SecretString, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { secret, expires_at }
    }

    /// The secret value
    #[must_use]
    pub const fn secret(&self) -> &SecretString {
        &self.secret
    }

    /// When the credential stops being accepted, if the gateway said
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

/// Issues credentials on demand
#[async_trait]
pub trait CredentialGateway: Send + Sync {
    /// Request an ephemeral session credential
    ///
    /// `override_key` is a caller-held long-lived key that takes precedence
    /// over the gateway's own key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] when no usable key exists, with the
    /// gateway's explanation
    async fn ephemeral_credential(
        &self,
        override_key: Option<&SecretString>,
    ) -> Result<EphemeralCredential>;

    /// Request the wake word engine access key
    ///
    /// # Errors
    ///
    /// Returns [`Error::DetectorConfig`] if no key is available
    async fn wake_word_key(&self) -> Result<SecretString>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    client_secret: Option<ClientSecret>,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: Option<String>,
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WakeWordKeyResponse {
    access_key: Option<String>,
}

/// [`CredentialGateway`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpCredentialGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCredentialGateway {
    /// Create a client for the gateway at `base_url`
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a client reusing an existing HTTP client
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CredentialGateway for HttpCredentialGateway {
    async fn ephemeral_credential(
        &self,
        override_key: Option<&SecretString>,
    ) -> Result<EphemeralCredential> {
        let mut request = self.client.post(format!("{}/token", self.base_url));
        if let Some(key) = override_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::NegotiationFailed(format!("credential gateway unreachable: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::NegotiationFailed(format!("credential gateway read failed: {e}")))?;

        if !status.is_success() {
            let message = error_message(&body).unwrap_or_else(|| status.to_string());
            tracing::warn!(%status, reason = %message, "credential gateway refused session credential");
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Unauthorized(message),
                _ => Error::NegotiationFailed(message),
            });
        }

        let parsed: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::NegotiationFailed(format!("malformed gateway response: {e}")))?;
        let secret = parsed
            .client_secret
            .as_ref()
            .and_then(|s| s.value.clone())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                Error::NegotiationFailed("gateway response missing client_secret.value".to_string())
            })?;
        let expires_at = parsed
            .client_secret
            .and_then(|s| s.expires_at)
            .and_then(|ts| DateTime::from_timestamp(ts, 0));

        tracing::debug!(?expires_at, "ephemeral credential issued");
        Ok(EphemeralCredential::new(SecretString::from(secret), expires_at))
    }

    async fn wake_word_key(&self) -> Result<SecretString> {
        let response = self
            .client
            .post(format!("{}/wake-word/init", self.base_url))
            .send()
            .await
            .map_err(|e| Error::DetectorConfig(format!("wake word key request failed: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::DetectorConfig(format!("wake word key read failed: {e}")))?;

        if !status.is_success() {
            let message = error_message(&body).unwrap_or_else(|| status.to_string());
            return Err(Error::DetectorConfig(format!(
                "failed to get wake word access key: {message}"
            )));
        }

        let parsed: WakeWordKeyResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::DetectorConfig(format!("malformed wake word key response: {e}")))?;

        parsed
            .access_key
            .filter(|k| !k.is_empty())
            .map(SecretString::from)
            .ok_or_else(|| Error::DetectorConfig("no access key received from gateway".to_string()))
    }
}

/// Pull a human-readable `error` out of a JSON error body
///
/// Accepts both `{"error": "..."}` and `{"error": {"message": "..."}}`.
fn error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    match value.get("error")? {
        serde_json::Value::String(s) => Some(s.clone()),
        other => other
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string),
    }
}
