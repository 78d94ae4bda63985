//! Session orchestrator
//!
//! [`Orchestrator`] is the single owner of the session, the event log and the
//! wake word adapter. Every transition goes through `&mut self`, so running it
//! inside one task (see [`OrchestratorHandle`]) serializes them.
//!
//! Each negotiation attempt is tagged with a generation. Stopping bumps the
//! generation, and any completion or channel signal carrying an older tag is
//! discarded.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::event::{Event, EventLog};
use super::negotiator::{Negotiated, Negotiator};
use super::session::{Session, SessionState};
use super::transport::{ChannelSignal, SignalReceiver};
use crate::credentials::CredentialGateway;
use crate::voice::{Detection, DetectionSlot, KeywordSpec, ModelSpec, WakeWordAdapter, WakeWordState};
use crate::{Error, Result};

/// Point-in-time view for the UI layer
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Session lifecycle state
    pub session: SessionState,
    /// Wake word detector state
    pub wake_word: WakeWordState,
    /// Event log, newest first
    pub events: Vec<Event>,
    /// Why the last session attempt failed or ended abnormally
    pub last_error: Option<String>,
}

/// Permission to run one negotiation attempt
pub struct NegotiationTicket {
    generation: u64,
    negotiator: Arc<Negotiator>,
}

impl NegotiationTicket {
    /// Generation this attempt belongs to
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Run the negotiation, returning its generation with the outcome
    pub async fn run(self) -> (u64, Result<Negotiated>) {
        let result = self.negotiator.negotiate().await;
        (self.generation, result)
    }
}

/// Realtime session state machine
pub struct Orchestrator {
    session: Session,
    log: EventLog,
    wake: WakeWordAdapter,
    negotiator: Arc<Negotiator>,
    generation: u64,
    pause_wake_word: bool,
    last_error: Option<String>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("session", &self.session)
            .field("events", &self.log.len())
            .field("wake", &self.wake)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an idle orchestrator
    #[must_use]
    pub fn new(negotiator: Negotiator, wake: WakeWordAdapter) -> Self {
        Self {
            session: Session::default(),
            log: EventLog::new(),
            wake,
            negotiator: Arc::new(negotiator),
            generation: 0,
            pause_wake_word: false,
            last_error: None,
        }
    }

    /// Stop listening for the wake phrase while a session is active
    ///
    /// Use this when the platform does not allow the detector and the session
    /// to share the microphone.
    #[must_use]
    pub const fn with_wake_word_pause(mut self, pause: bool) -> Self {
        self.pause_wake_word = pause;
        self
    }

    /// Current session state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.session.state()
    }

    /// The session
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Event log, newest first
    #[must_use]
    pub const fn log(&self) -> &EventLog {
        &self.log
    }

    /// The wake word adapter
    #[must_use]
    pub const fn wake_word(&self) -> &WakeWordAdapter {
        &self.wake
    }

    /// Current negotiation generation
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Why the last session attempt failed or ended abnormally
    ///
    /// Cleared when the next start begins.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Point-in-time view for display
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            session: self.session.state(),
            wake_word: self.wake.state(),
            events: self.log.to_vec(),
            last_error: self.last_error.clone(),
        }
    }

    /// Bring the wake word detector up
    ///
    /// Failures leave the detector unusable but never affect explicit
    /// session starts.
    ///
    /// # Errors
    ///
    /// Returns the detector failure
    pub async fn bootstrap_wake_word(
        &mut self,
        gateway: &dyn CredentialGateway,
        keyword: &KeywordSpec,
        model: &ModelSpec,
    ) -> Result<()> {
        self.wake.bootstrap(gateway, keyword, model).await
    }

    /// Move Idle → Negotiating and hand out the attempt to run
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionBusy`] unless the session is Idle
    pub fn begin_start(&mut self) -> Result<NegotiationTicket> {
        let state = self.session.state();
        if state != SessionState::Idle {
            tracing::warn!(%state, "session start rejected");
            return Err(Error::SessionBusy(state));
        }

        self.generation += 1;
        self.last_error = None;
        self.session.set_state(SessionState::Negotiating);
        tracing::info!(generation = self.generation, "session negotiating");

        Ok(NegotiationTicket {
            generation: self.generation,
            negotiator: Arc::clone(&self.negotiator),
        })
    }

    /// Apply a finished negotiation attempt
    ///
    /// On success the transport is attached and the channel's signal stream
    /// returned; the session stays Negotiating until the channel reports
    /// open.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] if `generation` was superseded; the transport
    ///   is released
    /// - the negotiation error otherwise, after returning to Idle
    pub async fn complete_start(
        &mut self,
        generation: u64,
        result: Result<Negotiated>,
    ) -> Result<SignalReceiver> {
        if generation != self.generation || self.session.state() != SessionState::Negotiating {
            tracing::debug!(
                generation,
                current = self.generation,
                "discarding superseded negotiation"
            );
            if let Ok(negotiated) = result {
                discard(negotiated).await;
            }
            return Err(Error::Cancelled);
        }

        match result {
            Ok(Negotiated {
                transport,
                channel,
                signals,
            }) => {
                self.session.attach(transport, channel);
                tracing::debug!(generation, "remote answer applied");
                Ok(signals)
            }
            Err(e) => {
                tracing::warn!(generation, error = %e, "session negotiation failed");
                self.last_error = Some(e.to_string());
                self.session.set_state(SessionState::Idle);
                Err(e)
            }
        }
    }

    /// React to a control channel notification
    ///
    /// Returns whether the signal stream is still worth reading.
    pub async fn handle_signal(&mut self, generation: u64, signal: ChannelSignal) -> bool {
        if generation != self.generation {
            tracing::debug!(generation, "ignoring signal from superseded session");
            return false;
        }

        match signal {
            ChannelSignal::Open => {
                if self.session.state() == SessionState::Negotiating
                    && self.session.channel().is_some()
                {
                    self.log.clear();
                    self.session.set_state(SessionState::Active);
                    tracing::info!(generation, "session active");

                    if self.pause_wake_word {
                        if let Err(e) = self.wake.stop().await {
                            tracing::warn!(error = %e, "failed to pause wake word detector");
                        }
                    }
                }
                true
            }
            ChannelSignal::Message(raw) => {
                if self.session.state() != SessionState::Active {
                    tracing::debug!("dropping message received before channel open");
                    return true;
                }
                match Event::from_wire(&raw) {
                    Ok(event) => {
                        tracing::trace!(kind = %event.kind, "server event");
                        self.log.record(event);
                    }
                    Err(e) => tracing::warn!(error = %e, "ignoring malformed server event"),
                }
                true
            }
            ChannelSignal::Closed => {
                tracing::info!("control channel closed, ending session");
                self.stop().await;
                false
            }
            ChannelSignal::Error(reason) => {
                tracing::warn!(%reason, "control channel failed, ending session");
                self.stop().await;
                self.last_error = Some(format!("control channel failed: {reason}"));
                false
            }
        }
    }

    /// End the session and return to Idle
    ///
    /// Clears any pending detection, then closes the channel, stops the
    /// outbound tracks and closes the transport. Every step is attempted;
    /// failures are logged. Stopping with no session is a no-op.
    pub async fn stop(&mut self) {
        self.wake.clear_detection();

        let state = self.session.state();
        if state == SessionState::Idle {
            tracing::debug!("stop requested with no session");
            return;
        }

        self.generation += 1;
        self.session.set_state(SessionState::Stopping);
        for e in self.session.teardown().await {
            tracing::warn!(error = %e, "session teardown step failed");
        }
        tracing::info!(from = %state, "session stopped");

        if self.pause_wake_word {
            if let Err(e) = self.wake.resume().await {
                tracing::warn!(error = %e, "failed to resume wake word detector");
            }
        }
    }

    /// Send a client event over the open channel and record it
    ///
    /// Returns the event's id, assigned here if the caller left it empty.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelUnavailable`] unless the session is Active
    /// - the channel's send failure
    pub async fn send_event(&mut self, mut event: Event) -> Result<String> {
        if self.session.state() != SessionState::Active {
            return Err(Error::ChannelUnavailable);
        }
        let Some(channel) = self.session.channel() else {
            return Err(Error::ChannelUnavailable);
        };

        let event_id = event.ensure_id().to_string();
        channel.send(event.to_wire()?).await?;

        tracing::debug!(kind = %event.kind, %event_id, "client event sent");
        self.log.record(event);
        Ok(event_id)
    }

    /// Send a user text turn followed by a response request
    ///
    /// Both events are always attempted, in that order.
    ///
    /// # Errors
    ///
    /// Returns the first send failure
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        let turn = self.send_event(Event::user_text(text)).await;
        let response = self.send_event(Event::response_create()).await;
        turn.and(response).map(|_| ())
    }

    /// Consume the pending detection and decide whether it starts a session
    ///
    /// Detections are acted on only while enabled and Idle; anything else is
    /// dropped.
    pub fn take_wake_trigger(&mut self) -> Option<Detection> {
        let detection = self.wake.take_detection()?;

        if !self.wake.is_enabled() {
            tracing::debug!(label = %detection.label, "wake word ignored while disabled");
            return None;
        }
        let state = self.session.state();
        if state != SessionState::Idle {
            tracing::debug!(label = %detection.label, %state, "wake word ignored while session busy");
            return None;
        }

        tracing::info!(label = %detection.label, score = detection.score, "wake word detected");
        Some(detection)
    }

    /// Flip hands-free activation
    ///
    /// # Errors
    ///
    /// Returns the detector failure; the enabled flag is unchanged then
    pub async fn toggle_wake_word(&mut self) -> Result<bool> {
        let enabled = self.wake.toggle().await?;
        if enabled && self.pause_wake_word && self.session.state() != SessionState::Idle {
            self.wake.stop().await?;
        }
        Ok(enabled)
    }

    /// Stop any session and release the detector
    pub async fn shutdown(&mut self) {
        self.stop().await;
        if let Err(e) = self.wake.release().await {
            tracing::warn!(error = %e, "failed to release wake word detector");
        }
        tracing::info!("orchestrator shut down");
    }
}

/// Release a negotiated transport nobody will use
pub(crate) async fn discard(negotiated: Negotiated) {
    let mut stale = Session::default();
    stale.attach(negotiated.transport, negotiated.channel);
    for e in stale.teardown().await {
        tracing::warn!(error = %e, "failed to release superseded transport");
    }
}

type Completion = (u64, Result<Negotiated>);

enum Command {
    Start(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<()>),
    SendEvent(Event, oneshot::Sender<Result<String>>),
    SendText(String, oneshot::Sender<Result<()>>),
    ToggleWakeWord(oneshot::Sender<Result<bool>>),
    Snapshot(oneshot::Sender<Snapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to an orchestrator running in its own task
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<Command>,
}

impl OrchestratorHandle {
    /// Move `orchestrator` into a new task and return a handle to it
    #[must_use]
    pub fn spawn(orchestrator: Orchestrator) -> (Self, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            slot: orchestrator.wake_word().slot().clone(),
            orchestrator,
            commands: commands_rx,
            done_tx,
            done_rx,
            pending_start: None,
            signals: None,
        };
        let task = tokio::spawn(actor.run());

        (
            Self {
                commands: commands_tx,
            },
            task,
        )
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Start a session; resolves once the remote answer is applied
    ///
    /// # Errors
    ///
    /// - [`Error::SessionBusy`] if a session already exists
    /// - [`Error::Cancelled`] if a stop request superseded the attempt
    /// - the negotiation failure otherwise
    pub async fn start_session(&self) -> Result<()> {
        self.request(Command::Start).await?
    }

    /// Stop the current session, if any
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the orchestrator is gone
    pub async fn stop_session(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    /// Send a client event, returning its id
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelUnavailable`] unless a session is active
    pub async fn send_client_event(&self, event: Event) -> Result<String> {
        self.request(|tx| Command::SendEvent(event, tx)).await?
    }

    /// Send a user text turn and request a response
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelUnavailable`] unless a session is active
    pub async fn send_text_message(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.request(|tx| Command::SendText(text, tx)).await?
    }

    /// Flip hands-free activation, returning the new setting
    ///
    /// # Errors
    ///
    /// Returns the detector failure
    pub async fn toggle_wake_word(&self) -> Result<bool> {
        self.request(Command::ToggleWakeWord).await?
    }

    /// Current session state, wake word state and event log
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the orchestrator is gone
    pub async fn snapshot(&self) -> Result<Snapshot> {
        self.request(Command::Snapshot).await
    }

    /// Stop any session, release the detector and end the task
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the orchestrator is already gone
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await
    }
}

struct Actor {
    orchestrator: Orchestrator,
    commands: mpsc::Receiver<Command>,
    done_tx: mpsc::UnboundedSender<Completion>,
    done_rx: mpsc::UnboundedReceiver<Completion>,
    pending_start: Option<(u64, oneshot::Sender<Result<()>>)>,
    signals: Option<(u64, SignalReceiver)>,
    slot: DetectionSlot,
}

impl Actor {
    async fn run(mut self) {
        tracing::debug!("orchestrator running");

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        self.cancel_pending();
                        self.orchestrator.shutdown().await;
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Some((generation, result)) = self.done_rx.recv() => {
                    self.complete(generation, result).await;
                }
                (generation, signal) = next_signal(&mut self.signals) => {
                    if !self.orchestrator.handle_signal(generation, signal).await {
                        self.signals = None;
                    }
                }
                () = self.slot.published() => {
                    if self.orchestrator.take_wake_trigger().is_some() {
                        match self.orchestrator.begin_start() {
                            Ok(ticket) => self.spawn_negotiation(ticket),
                            Err(e) => tracing::warn!(error = %e, "wake word start failed"),
                        }
                    }
                }
            }
        }

        tracing::debug!("orchestrator task finished");
    }

    /// Returns false once the actor should exit
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start(reply) => match self.orchestrator.begin_start() {
                Ok(ticket) => {
                    self.pending_start = Some((ticket.generation(), reply));
                    self.spawn_negotiation(ticket);
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Stop(reply) => {
                self.stop().await;
                let _ = reply.send(());
            }
            Command::SendEvent(event, reply) => {
                let result = self.orchestrator.send_event(event).await;
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "client event not sent");
                }
                let _ = reply.send(result);
            }
            Command::SendText(text, reply) => {
                let result = self.orchestrator.send_text(&text).await;
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "text turn not sent");
                }
                let _ = reply.send(result);
            }
            Command::ToggleWakeWord(reply) => {
                let _ = reply.send(self.orchestrator.toggle_wake_word().await);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.orchestrator.snapshot());
            }
            Command::Shutdown(reply) => {
                self.cancel_pending();
                self.signals = None;
                self.orchestrator.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn spawn_negotiation(&self, ticket: NegotiationTicket) {
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let completion = ticket.run().await;
            if let Err(mpsc::error::SendError((_, Ok(negotiated)))) = done.send(completion) {
                discard(negotiated).await;
            }
        });
    }

    async fn complete(&mut self, generation: u64, result: Result<Negotiated>) {
        let outcome = self.orchestrator.complete_start(generation, result).await;
        let outcome = match outcome {
            Ok(signals) => {
                self.signals = Some((generation, signals));
                Ok(())
            }
            Err(Error::Cancelled) => return,
            Err(e) => Err(e),
        };

        match self.pending_start.take() {
            Some((pending, reply)) if pending == generation => {
                let _ = reply.send(outcome);
            }
            other => self.pending_start = other,
        }
    }

    fn cancel_pending(&mut self) {
        if let Some((_, reply)) = self.pending_start.take() {
            let _ = reply.send(Err(Error::Cancelled));
        }
    }

    async fn stop(&mut self) {
        self.cancel_pending();
        self.signals = None;
        self.orchestrator.stop().await;
    }
}

/// Next signal from the live channel; pends forever when there is none
async fn next_signal(signals: &mut Option<(u64, SignalReceiver)>) -> (u64, ChannelSignal) {
    match signals {
        Some((generation, rx)) => (
            *generation,
            rx.recv().await.unwrap_or(ChannelSignal::Closed),
        ),
        None => std::future::pending().await,
    }
}
