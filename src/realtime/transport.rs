//! Transport seam between the orchestrator and the media stack
//!
//! The orchestrator never touches ICE, DTLS or codecs. It drives an opaque
//! [`PeerTransport`] through a fixed negotiation sequence and talks to the
//! remote over the [`ControlChannel`] the transport opens. Embedding
//! applications provide the peer-connection backend through a
//! [`TransportFactory`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;

/// Notification raised by a control channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    /// Channel finished opening and can carry events
    Open,
    /// Text message received from the remote
    Message(String),
    /// Channel closed by either side
    Closed,
    /// Channel failed
    Error(String),
}

/// Sending half of a control channel's signal stream
pub type SignalSender = mpsc::UnboundedSender<ChannelSignal>;

/// Receiving half of a control channel's signal stream
pub type SignalReceiver = mpsc::UnboundedReceiver<ChannelSignal>;

/// Create a signal stream for a newly opened control channel
#[must_use]
pub fn signal_stream() -> (SignalSender, SignalReceiver) {
    mpsc::unbounded_channel()
}

/// Role of a session description in the offer/answer exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionKind {
    /// Local proposal
    Offer,
    /// Remote reply
    Answer,
}

/// Serialized session description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// Offer or answer
    pub kind: DescriptionKind,
    /// Serialized description body
    pub sdp: String,
}

impl SessionDescription {
    /// Local offer
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Remote answer
    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A live outbound capture track
pub trait MediaTrack: Send + Sync {
    /// Track identifier
    fn id(&self) -> &str;

    /// Captured samples since the last call
    ///
    /// Backends should call this continuously; a track only keeps a bounded
    /// window of audio and drops the oldest samples past it.
    fn drain(&self) -> Vec<f32>;

    /// Stop capturing; idempotent
    fn stop(&mut self);

    /// Whether the track is still capturing
    fn is_live(&self) -> bool;
}

/// Local capture devices
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire the microphone
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MediaAccessDenied`] if the device refuses access
    async fn capture_audio(&self) -> Result<Box<dyn MediaTrack>>;
}

/// Destination for inbound remote audio
pub trait PlaybackSink: Send + Sync {
    /// Queue decoded samples for playback
    fn play(&self, samples: &[f32]);
}

/// Ordered, bidirectional message channel parallel to the audio leg
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Channel label
    fn label(&self) -> &str;

    /// Transmit a serialized event
    async fn send(&self, text: String) -> Result<()>;

    /// Close the channel; idempotent
    async fn close(&self) -> Result<()>;
}

/// Opaque audio+control transport to the remote endpoint
///
/// Implementations own any track handed to [`PeerTransport::add_track`] and
/// must stop it on [`PeerTransport::stop_tracks`] or
/// [`PeerTransport::close`], including when `add_track` itself fails.
#[async_trait]
pub trait PeerTransport: Send {
    /// Hand inbound remote media to `sink`
    fn bind_playback(&mut self, sink: Arc<dyn PlaybackSink>);

    /// Attach a local capture track for outbound audio
    async fn add_track(&mut self, track: Box<dyn MediaTrack>) -> Result<()>;

    /// Open the control channel
    async fn open_control_channel(
        &mut self,
        label: &str,
    ) -> Result<(Box<dyn ControlChannel>, SignalReceiver)>;

    /// Produce a local offer
    async fn create_offer(&mut self) -> Result<SessionDescription>;

    /// Apply the local offer and return the finalized description
    async fn set_local_description(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription>;

    /// Apply the remote answer, completing negotiation
    async fn set_remote_description(&mut self, answer: SessionDescription) -> Result<()>;

    /// Stop every outbound media track
    fn stop_tracks(&mut self) -> Result<()>;

    /// Close the transport and release its resources
    async fn close(&mut self) -> Result<()>;
}

/// Builds fresh transports, one per negotiation attempt
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Construct an unconnected transport
    async fn create(&self) -> Result<Box<dyn PeerTransport>>;
}
