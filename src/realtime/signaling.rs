//! One-shot offer/answer exchange with the remote endpoint

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use secrecy::ExposeSecret;
use url::Url;

use super::transport::SessionDescription;
use crate::credentials::EphemeralCredential;
use crate::{Error, Result};

/// Exchanges a local offer for the remote answer
#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Post `offer` authenticated by `credential` and return the answer
    ///
    /// # Errors
    ///
    /// Returns [`Error::NegotiationFailed`] if the remote rejects the offer
    async fn exchange(
        &self,
        offer: &SessionDescription,
        credential: &EphemeralCredential,
    ) -> Result<SessionDescription>;
}

/// [`SignalingClient`] over HTTPS
#[derive(Debug, Clone)]
pub struct HttpSignaling {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpSignaling {
    /// Create a client posting to `base_url?model={model}`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `base_url` is not a valid URL
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        Self::with_client(reqwest::Client::new(), base_url, model)
    }

    /// Create a client reusing an existing HTTP client
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `base_url` is not a valid URL
    pub fn with_client(client: reqwest::Client, base_url: &str, model: &str) -> Result<Self> {
        let mut endpoint = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid signaling url {base_url:?}: {e}")))?;
        endpoint.query_pairs_mut().append_pair("model", model);
        Ok(Self { client, endpoint })
    }

    /// Full endpoint including the model query
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl SignalingClient for HttpSignaling {
    async fn exchange(
        &self,
        offer: &SessionDescription,
        credential: &EphemeralCredential,
    ) -> Result<SessionDescription> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(credential.secret().expose_secret())
            .header(CONTENT_TYPE, "application/sdp")
            .body(offer.sdp.clone())
            .send()
            .await
            .map_err(|e| Error::NegotiationFailed(format!("signaling request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::NegotiationFailed(format!("signaling response unreadable: {e}")))?;

        if !status.is_success() {
            return Err(Error::NegotiationFailed(format!(
                "signaling endpoint returned {status}: {}",
                body.trim()
            )));
        }

        if body.trim().is_empty() {
            return Err(Error::NegotiationFailed(
                "signaling endpoint returned an empty answer".to_string(),
            ));
        }

        tracing::debug!(bytes = body.len(), "remote answer received");
        Ok(SessionDescription::answer(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_carries_model() {
        let signaling =
            HttpSignaling::new("https://api.openai.com/v1/realtime", "gpt-4o-realtime").unwrap();
        assert_eq!(
            signaling.endpoint().as_str(),
            "https://api.openai.com/v1/realtime?model=gpt-4o-realtime"
        );
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        let err = HttpSignaling::new("::nope", "m").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
