//! Vienta - hands-free realtime voice sessions
//!
//! This library provides the pieces of a live voice conversation with a
//! remote realtime AI endpoint:
//! - Session orchestration (negotiation, control channel events, teardown)
//! - Wake word detection as a hands-free session trigger
//! - A credential gateway that keeps long-lived keys on the server
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  detection  ┌──────────────────────────────┐
//! │  Wake Word   ├────────────►│         Orchestrator         │
//! │   Adapter    │             │  session · event log · gen   │
//! └──────────────┘             └──────┬───────────────▲───────┘
//!                                     │ negotiate     │ channel signals
//!                              ┌──────▼───────┐ ┌─────┴────────┐
//!                              │  Negotiator  ├─► PeerTransport │
//!                              └──┬────────┬──┘ └──────────────┘
//!                   credential    │        │ offer/answer
//!                        ┌────────▼──┐  ┌──▼─────────┐
//!                        │  Gateway  │  │ Signaling  │
//!                        └───────────┘  └────────────┘
//! ```

pub mod api;
pub mod config;
pub mod credentials;
pub mod error;
pub mod realtime;
pub mod voice;

pub use config::Config;
pub use credentials::{CredentialGateway, EphemeralCredential, HttpCredentialGateway};
pub use error::{Error, Result};
pub use realtime::{Event, Orchestrator, OrchestratorHandle, SessionState, Snapshot};
pub use voice::{Detection, WakePhase, WakeWordAdapter};
