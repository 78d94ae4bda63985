//! Session state and teardown

use std::fmt;

use serde::Serialize;

use super::transport::{ControlChannel, PeerTransport};
use crate::Error;

/// Lifecycle of the single realtime session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session exists
    #[default]
    Idle,
    /// Offer/answer exchange in flight
    Negotiating,
    /// Control channel open, events flowing
    Active,
    /// Teardown in progress
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Negotiating => "negotiating",
            Self::Active => "active",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// One live or pending conversation
///
/// The transport is held here once negotiation has handed it over. While a
/// negotiation is still in flight the transport belongs to the negotiation
/// task, which releases it itself on failure or cancellation.
#[derive(Default)]
pub struct Session {
    state: SessionState,
    transport: Option<Box<dyn PeerTransport>>,
    channel: Option<Box<dyn ControlChannel>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("transport", &self.transport.is_some())
            .field("channel", &self.channel.as_ref().map(|c| c.label().to_string()))
            .finish()
    }
}

impl Session {
    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "session state");
            self.state = state;
        }
    }

    /// Whether a transport handle is retained
    #[must_use]
    pub const fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Open control channel, if any
    #[must_use]
    pub fn channel(&self) -> Option<&dyn ControlChannel> {
        self.channel.as_deref()
    }

    /// Take ownership of a negotiated transport and its control channel
    pub(crate) fn attach(
        &mut self,
        transport: Box<dyn PeerTransport>,
        channel: Box<dyn ControlChannel>,
    ) {
        self.transport = Some(transport);
        self.channel = Some(channel);
    }

    /// Release everything the session holds and return to Idle
    ///
    /// Every step runs even when an earlier one fails. The collected failures
    /// are returned for logging; the session is Idle regardless.
    pub(crate) async fn teardown(&mut self) -> Vec<Error> {
        let mut failures = Vec::new();

        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                failures.push(e);
            }
        }

        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.stop_tracks() {
                failures.push(e);
            }
            if let Err(e) = transport.close().await {
                failures.push(e);
            }
        }

        self.set_state(SessionState::Idle);
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display_is_lowercase() {
        assert_eq!(SessionState::Negotiating.to_string(), "negotiating");
        assert_eq!(SessionState::Idle.to_string(), "idle");
    }

    #[test]
    fn state_serializes_lowercase() {
        let json = serde_json::to_string(&SessionState::Active).unwrap();
        assert_eq!(json, "\"active\"");
    }

    #[tokio::test]
    async fn teardown_without_transport_is_idle() {
        let mut session = Session::default();
        session.set_state(SessionState::Stopping);

        let failures = session.teardown().await;

        assert!(failures.is_empty());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.has_transport());
    }
}
