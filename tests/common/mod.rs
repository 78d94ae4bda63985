//! Shared test utilities
//!
//! In-memory fakes for every seam the orchestrator drives, plus a recorder
//! (`Probe`) the tests inspect afterwards.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::Notify;

use vienta::realtime::{
    ControlChannel, MediaDevices, MediaTrack, Negotiator, PeerTransport, PlaybackSink,
    SessionDescription, SessionState, SignalReceiver, SignalSender, SignalingClient, Snapshot,
    TransportFactory, signal_stream,
};
use vienta::voice::{DetectionSlot, KeywordEngine, KeywordSpec, ModelSpec, WakeWordAdapter};
use vienta::{CredentialGateway, EphemeralCredential, Error, Orchestrator, OrchestratorHandle, Result};

/// Everything the fakes observed
#[derive(Default)]
pub struct Probe {
    pub steps: Mutex<Vec<&'static str>>,
    pub sent: Mutex<Vec<String>>,
    pub signal_tx: Mutex<Option<SignalSender>>,
    pub credentials_issued: AtomicUsize,
    pub transports_created: AtomicUsize,
    pub transports_closed: AtomicUsize,
    pub tracks_stopped: AtomicUsize,
    pub channels_closed: AtomicUsize,
}

impl Probe {
    pub fn step(&self, name: &'static str) {
        self.steps.lock().unwrap().push(name);
    }

    pub fn steps(&self) -> Vec<&'static str> {
        self.steps.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Sender feeding the most recently opened control channel
    pub async fn signals(&self) -> SignalSender {
        for _ in 0..200 {
            if let Some(tx) = self.signal_tx.lock().unwrap().clone() {
                return tx;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no control channel was opened");
    }
}

/// How the fakes should misbehave
#[derive(Debug, Clone, Default)]
pub struct FakeOptions {
    /// Gateway refuses with `Unauthorized`
    pub unauthorized: bool,
    /// Microphone refuses access
    pub deny_media: bool,
    /// Transport step that fails (`"add_track"`, `"open_channel"`, ...)
    pub fail_at: Option<&'static str>,
    /// Signaling waits for `Fakes::gate` before answering
    pub gated: bool,
}

pub struct FakeGateway {
    pub probe: Arc<Probe>,
    pub unauthorized: bool,
    pub wake_word_key: Option<&'static str>,
}

#[async_trait]
impl CredentialGateway for FakeGateway {
    async fn ephemeral_credential(
        &self,
        _override_key: Option<&SecretString>,
    ) -> Result<EphemeralCredential> {
        self.probe.step("credential");
        if self.unauthorized {
            return Err(Error::Unauthorized(
                "No API key available. Please provide your own key or contact the administrator."
                    .to_string(),
            ));
        }
        self.probe.credentials_issued.fetch_add(1, Ordering::SeqCst);
        Ok(EphemeralCredential::new(SecretString::from("ek_test"), None))
    }

    async fn wake_word_key(&self) -> Result<SecretString> {
        self.wake_word_key
            .map(SecretString::from)
            .ok_or_else(|| Error::DetectorConfig("no access key received from gateway".to_string()))
    }
}

pub struct FakeSignaling {
    pub probe: Arc<Probe>,
    pub gate: Option<Arc<Notify>>,
}

#[async_trait]
impl SignalingClient for FakeSignaling {
    async fn exchange(
        &self,
        offer: &SessionDescription,
        _credential: &EphemeralCredential,
    ) -> Result<SessionDescription> {
        self.probe.step("exchange");
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(SessionDescription::answer(format!("answer-to:{}", offer.sdp)))
    }
}

pub struct FakeTrack {
    live: bool,
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> &str {
        "fake-mic"
    }

    fn drain(&self) -> Vec<f32> {
        Vec::new()
    }

    fn stop(&mut self) {
        self.live = false;
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

pub struct FakeMedia {
    pub deny: bool,
}

#[async_trait]
impl MediaDevices for FakeMedia {
    async fn capture_audio(&self) -> Result<Box<dyn MediaTrack>> {
        if self.deny {
            return Err(Error::MediaAccessDenied("permission denied".to_string()));
        }
        Ok(Box::new(FakeTrack { live: true }))
    }
}

pub struct FakeChannel {
    probe: Arc<Probe>,
    closed: AtomicBool,
}

#[async_trait]
impl ControlChannel for FakeChannel {
    fn label(&self) -> &str {
        "oai-events"
    }

    async fn send(&self, text: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ChannelUnavailable);
        }
        self.probe.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.probe.channels_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub struct FakeTransport {
    probe: Arc<Probe>,
    fail_at: Option<&'static str>,
    track: Option<Box<dyn MediaTrack>>,
    closed: bool,
}

impl FakeTransport {
    fn check(&self, step: &'static str) -> Result<()> {
        self.probe.step(step);
        if self.fail_at == Some(step) {
            return Err(Error::NegotiationFailed(format!("{step} refused")));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    fn bind_playback(&mut self, _sink: Arc<dyn PlaybackSink>) {
        self.probe.step("bind_playback");
    }

    async fn add_track(&mut self, track: Box<dyn MediaTrack>) -> Result<()> {
        self.track = Some(track);
        self.check("add_track")
    }

    async fn open_control_channel(
        &mut self,
        _label: &str,
    ) -> Result<(Box<dyn ControlChannel>, SignalReceiver)> {
        self.check("open_channel")?;
        let (tx, rx) = signal_stream();
        *self.probe.signal_tx.lock().unwrap() = Some(tx);
        let channel = FakeChannel {
            probe: Arc::clone(&self.probe),
            closed: AtomicBool::new(false),
        };
        Ok((Box::new(channel), rx))
    }

    async fn create_offer(&mut self) -> Result<SessionDescription> {
        self.check("create_offer")?;
        Ok(SessionDescription::offer("offer"))
    }

    async fn set_local_description(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription> {
        self.check("set_local")?;
        Ok(offer)
    }

    async fn set_remote_description(&mut self, answer: SessionDescription) -> Result<()> {
        assert_eq!(answer.sdp, "answer-to:offer");
        self.check("set_remote")
    }

    fn stop_tracks(&mut self) -> Result<()> {
        if let Some(mut track) = self.track.take() {
            track.stop();
            self.probe.tracks_stopped.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.probe.transports_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub struct FakeTransports {
    pub probe: Arc<Probe>,
    pub fail_at: Option<&'static str>,
}

#[async_trait]
impl TransportFactory for FakeTransports {
    async fn create(&self) -> Result<Box<dyn PeerTransport>> {
        self.probe.transports_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeTransport {
            probe: Arc::clone(&self.probe),
            fail_at: self.fail_at,
            track: None,
            closed: false,
        }))
    }
}

pub struct NoPlayback;

impl PlaybackSink for NoPlayback {
    fn play(&self, _samples: &[f32]) {}
}

/// Switches and counters for [`FakeEngine`]
#[derive(Default)]
pub struct EngineControl {
    pub fail_load: AtomicBool,
    pub fail_init: AtomicBool,
    pub fail_start: AtomicBool,
    pub fail_stop: AtomicBool,
    pub loads: AtomicUsize,
    pub inits: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub releases: AtomicUsize,
}

impl EngineControl {
    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }
}

pub struct FakeEngine(pub Arc<EngineControl>);

fn engine_step(flag: &AtomicBool, counter: &AtomicUsize, what: &str) -> Result<()> {
    counter.fetch_add(1, Ordering::SeqCst);
    if flag.load(Ordering::SeqCst) {
        return Err(Error::DetectorConfig(format!("{what} failed")));
    }
    Ok(())
}

#[async_trait]
impl KeywordEngine for FakeEngine {
    async fn load(&mut self) -> Result<()> {
        self.0.loads.fetch_add(1, Ordering::SeqCst);
        if self.0.fail_load.load(Ordering::SeqCst) {
            return Err(Error::DetectorUnavailable("engine missing".to_string()));
        }
        Ok(())
    }

    async fn init(&mut self, _: &SecretString, _: &KeywordSpec, _: &ModelSpec) -> Result<()> {
        engine_step(&self.0.fail_init, &self.0.inits, "init")
    }

    async fn start(&mut self, _slot: DetectionSlot) -> Result<()> {
        engine_step(&self.0.fail_start, &self.0.starts, "start")
    }

    async fn stop(&mut self) -> Result<()> {
        engine_step(&self.0.fail_stop, &self.0.stops, "stop")
    }

    async fn release(&mut self) -> Result<()> {
        self.0.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn keyword() -> KeywordSpec {
    KeywordSpec {
        label: "vienta".to_string(),
        path: "vienta.rpw".into(),
        sensitivity: 0.5,
    }
}

/// Handles on the fakes behind an orchestrator
pub struct Fakes {
    pub probe: Arc<Probe>,
    pub gate: Arc<Notify>,
    pub engine: Arc<EngineControl>,
}

impl Fakes {
    pub fn gateway(&self) -> FakeGateway {
        FakeGateway {
            probe: Arc::clone(&self.probe),
            unauthorized: false,
            wake_word_key: Some("wk_test"),
        }
    }
}

/// Orchestrator wired to fakes
pub fn orchestrator(options: &FakeOptions) -> (Orchestrator, Fakes) {
    let probe = Arc::new(Probe::default());
    let gate = Arc::new(Notify::new());
    let engine = Arc::new(EngineControl::default());

    let negotiator = Negotiator::new(
        Arc::new(FakeGateway {
            probe: Arc::clone(&probe),
            unauthorized: options.unauthorized,
            wake_word_key: Some("wk_test"),
        }),
        Arc::new(FakeSignaling {
            probe: Arc::clone(&probe),
            gate: options.gated.then(|| Arc::clone(&gate)),
        }),
        Arc::new(FakeTransports {
            probe: Arc::clone(&probe),
            fail_at: options.fail_at,
        }),
        Arc::new(FakeMedia {
            deny: options.deny_media,
        }),
        Arc::new(NoPlayback),
    );
    let wake = WakeWordAdapter::new(Box::new(FakeEngine(Arc::clone(&engine))));

    (
        Orchestrator::new(negotiator, wake),
        Fakes {
            probe,
            gate,
            engine,
        },
    )
}

/// Orchestrator with a listening wake word detector, running in its own task
pub async fn spawn_listening(options: &FakeOptions) -> (OrchestratorHandle, Fakes, DetectionSlot) {
    let (mut orchestrator, fakes) = orchestrator(options);
    orchestrator
        .bootstrap_wake_word(&fakes.gateway(), &keyword(), &ModelSpec::default())
        .await
        .unwrap();
    let slot = orchestrator.wake_word().slot().clone();
    let (handle, _task) = OrchestratorHandle::spawn(orchestrator);
    (handle, fakes, slot)
}

/// Poll until the session reaches `state`
pub async fn wait_for_state(handle: &OrchestratorHandle, state: SessionState) -> Snapshot {
    for _ in 0..200 {
        let snapshot = handle.snapshot().await.unwrap();
        if snapshot.session == state {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session never reached {state}");
}

/// Poll until the event log holds at least `count` events
pub async fn wait_for_events(handle: &OrchestratorHandle, count: usize) -> Snapshot {
    for _ in 0..200 {
        let snapshot = handle.snapshot().await.unwrap();
        if snapshot.events.len() >= count {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("event log never reached {count} events");
}

/// Poll until the snapshot reports a failure
pub async fn wait_for_error(handle: &OrchestratorHandle) -> Snapshot {
    for _ in 0..200 {
        let snapshot = handle.snapshot().await.unwrap();
        if snapshot.last_error.is_some() {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no failure reported");
}

/// Poll until `check` holds
pub async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}
