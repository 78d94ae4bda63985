//! Offer/answer negotiation
//!
//! Runs the fixed establishment sequence: credential, transport and local
//! media, control channel, then the offer/answer exchange. A failure at any
//! step releases whatever was built so nothing partial stays live.

use std::sync::Arc;

use secrecy::SecretString;

use super::signaling::{HttpSignaling, SignalingClient};
use super::transport::{
    ControlChannel, MediaDevices, MediaTrack, PeerTransport, PlaybackSink, SignalReceiver,
    TransportFactory,
};
use crate::config::{DEFAULT_CHANNEL_LABEL, SessionConfig};
use crate::credentials::{CredentialGateway, EphemeralCredential, HttpCredentialGateway};
use crate::{Error, Result};

/// A transport whose remote description has been applied
pub struct Negotiated {
    /// The established transport
    pub transport: Box<dyn PeerTransport>,
    /// The single control channel opened during negotiation
    pub channel: Box<dyn ControlChannel>,
    /// Notifications raised by `channel`
    pub signals: SignalReceiver,
}

impl std::fmt::Debug for Negotiated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiated")
            .field("channel", &self.channel.label())
            .finish_non_exhaustive()
    }
}

/// Establishes sessions with the remote endpoint
pub struct Negotiator {
    gateway: Arc<dyn CredentialGateway>,
    signaling: Arc<dyn SignalingClient>,
    transports: Arc<dyn TransportFactory>,
    media: Arc<dyn MediaDevices>,
    playback: Arc<dyn PlaybackSink>,
    channel_label: String,
    override_key: Option<SecretString>,
}

impl Negotiator {
    /// Create a negotiator from its collaborators
    #[must_use]
    pub fn new(
        gateway: Arc<dyn CredentialGateway>,
        signaling: Arc<dyn SignalingClient>,
        transports: Arc<dyn TransportFactory>,
        media: Arc<dyn MediaDevices>,
        playback: Arc<dyn PlaybackSink>,
    ) -> Self {
        Self {
            gateway,
            signaling,
            transports,
            media,
            playback,
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            override_key: None,
        }
    }

    /// Negotiator talking to the configured gateway and signaling endpoint
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the signaling URL is invalid
    pub fn from_config(
        config: &SessionConfig,
        transports: Arc<dyn TransportFactory>,
        media: Arc<dyn MediaDevices>,
        playback: Arc<dyn PlaybackSink>,
    ) -> Result<Self> {
        let http = reqwest::Client::new();
        let gateway = HttpCredentialGateway::with_client(http.clone(), config.gateway_url.as_str());
        let signaling = HttpSignaling::with_client(http, &config.signaling_url, &config.model)?;

        Ok(Self::new(
            Arc::new(gateway),
            Arc::new(signaling),
            transports,
            media,
            playback,
        )
        .with_channel_label(config.channel_label.as_str())
        .with_override_key(config.api_key.clone()))
    }

    /// Label for the control channel
    #[must_use]
    pub fn with_channel_label(mut self, label: impl Into<String>) -> Self {
        self.channel_label = label.into();
        self
    }

    /// Caller-held long-lived key sent to the gateway as an override
    #[must_use]
    pub fn with_override_key(mut self, key: Option<SecretString>) -> Self {
        self.override_key = key;
        self
    }

    /// Run the full negotiation
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthorized`] if the gateway has no usable key
    /// - [`Error::MediaAccessDenied`] if the microphone is refused
    /// - [`Error::NegotiationFailed`] for any transport or exchange failure
    pub async fn negotiate(&self) -> Result<Negotiated> {
        let credential = self
            .gateway
            .ephemeral_credential(self.override_key.as_ref())
            .await?;
        tracing::debug!("ephemeral credential acquired");

        let mut transport = self
            .transports
            .create()
            .await
            .map_err(|e| as_negotiation_failure("create transport", e))?;
        transport.bind_playback(Arc::clone(&self.playback));

        let track = match self.media.capture_audio().await {
            Ok(track) => track,
            Err(e) => {
                release(transport.as_mut()).await;
                return Err(match e {
                    Error::MediaAccessDenied(_) => e,
                    other => Error::MediaAccessDenied(other.to_string()),
                });
            }
        };
        tracing::debug!(track = track.id(), "microphone acquired");

        match self.establish(transport.as_mut(), track, &credential).await {
            Ok((channel, signals)) => Ok(Negotiated {
                transport,
                channel,
                signals,
            }),
            Err(e) => {
                release(transport.as_mut()).await;
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        transport: &mut dyn PeerTransport,
        track: Box<dyn MediaTrack>,
        credential: &EphemeralCredential,
    ) -> Result<(Box<dyn ControlChannel>, SignalReceiver)> {
        transport
            .add_track(track)
            .await
            .map_err(|e| as_negotiation_failure("add track", e))?;

        let (channel, signals) = transport
            .open_control_channel(&self.channel_label)
            .await
            .map_err(|e| as_negotiation_failure("open control channel", e))?;

        if let Err(e) = self.exchange(transport, credential).await {
            if let Err(close_err) = channel.close().await {
                tracing::warn!(error = %close_err, "failed to close control channel");
            }
            return Err(e);
        }

        Ok((channel, signals))
    }

    async fn exchange(
        &self,
        transport: &mut dyn PeerTransport,
        credential: &EphemeralCredential,
    ) -> Result<()> {
        let offer = transport
            .create_offer()
            .await
            .map_err(|e| as_negotiation_failure("create offer", e))?;
        let local = transport
            .set_local_description(offer)
            .await
            .map_err(|e| as_negotiation_failure("set local description", e))?;

        let answer = self
            .signaling
            .exchange(&local, credential)
            .await
            .map_err(|e| as_negotiation_failure("offer/answer exchange", e))?;

        transport
            .set_remote_description(answer)
            .await
            .map_err(|e| as_negotiation_failure("set remote description", e))
    }
}

/// Stop tracks and close a partially built transport
async fn release(transport: &mut dyn PeerTransport) {
    if let Err(e) = transport.stop_tracks() {
        tracing::warn!(error = %e, "failed to stop tracks during rollback");
    }
    if let Err(e) = transport.close().await {
        tracing::warn!(error = %e, "failed to close transport during rollback");
    }
}

fn as_negotiation_failure(step: &str, err: Error) -> Error {
    match err {
        Error::NegotiationFailed(msg) => Error::NegotiationFailed(format!("{step}: {msg}")),
        other => Error::NegotiationFailed(format!("{step}: {other}")),
    }
}
