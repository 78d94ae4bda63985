//! Realtime voice sessions
//!
//! Negotiates an audio+control transport with the remote AI endpoint, relays
//! control channel events, and ties session lifecycle to the wake word
//! detector.

mod event;
mod negotiator;
mod orchestrator;
mod session;
mod signaling;
mod transport;

pub use event::{CONVERSATION_ITEM_CREATE, Event, EventLog, RESPONSE_CREATE};
pub use negotiator::{Negotiated, Negotiator};
pub use orchestrator::{NegotiationTicket, Orchestrator, OrchestratorHandle, Snapshot};
pub use session::{Session, SessionState};
pub use signaling::{HttpSignaling, SignalingClient};
pub use transport::{
    ChannelSignal, ControlChannel, DescriptionKind, MediaDevices, MediaTrack, PeerTransport,
    PlaybackSink, SessionDescription, SignalReceiver, SignalSender, TransportFactory,
    signal_stream,
};
