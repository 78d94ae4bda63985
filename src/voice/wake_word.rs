//! Wake word adapter
//!
//! Wraps a keyword spotter behind a load → init → listen → release
//! lifecycle. Detections land in a depth-one [`DetectionSlot`]: the latest
//! detection replaces any unconsumed one, and the orchestrator takes it when
//! it is ready to act.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::Notify;

use crate::config::WakeWordConfig;
use crate::credentials::CredentialGateway;
use crate::{Error, Result};

/// Lifecycle phase of the detector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WakePhase {
    /// Engine not loaded
    #[default]
    Unloaded,
    /// Engine load in progress
    Loading,
    /// Loaded but not consuming audio
    LoadedIdle,
    /// Consuming microphone audio in the background
    LoadedListening,
    /// Load or configuration failed
    Error,
}

/// A single wake phrase hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// Keyword label that matched
    pub label: String,
    /// Engine confidence
    pub score: f32,
    /// When the hit was published
    pub detected_at: DateTime<Utc>,
}

impl Detection {
    /// A detection stamped with the current time
    #[must_use]
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
            detected_at: Utc::now(),
        }
    }
}

/// Observable detector state
#[derive(Debug, Clone, Serialize)]
pub struct WakeWordState {
    /// Current lifecycle phase
    pub phase: WakePhase,
    /// Whether the user wants the detector listening
    pub enabled: bool,
    /// Unconsumed detection, if any
    pub last_detection: Option<Detection>,
    /// Cause of the last lifecycle failure
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct SlotInner {
    pending: Mutex<Option<Detection>>,
    notify: Notify,
}

/// Depth-one detection queue shared between an engine and the orchestrator
#[derive(Debug, Clone, Default)]
pub struct DetectionSlot {
    inner: Arc<SlotInner>,
}

impl DetectionSlot {
    /// Create an empty slot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a detection, replacing any unconsumed one
    pub fn publish(&self, detection: Detection) {
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.replace(detection) {
            tracing::trace!(label = %previous.label, "unconsumed detection superseded");
        }
        drop(pending);
        self.inner.notify.notify_one();
    }

    /// Take the pending detection
    #[must_use]
    pub fn take(&self) -> Option<Detection> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Copy of the pending detection, left in place
    #[must_use]
    pub fn peek(&self) -> Option<Detection> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop the pending detection
    pub fn clear(&self) {
        let _ = self.take();
    }

    /// Wait until something is published
    ///
    /// A publish with nobody waiting is remembered, so a later call returns
    /// immediately. The slot may already be empty again by then.
    pub async fn published(&self) {
        self.inner.notify.notified().await;
    }
}

/// Which phrase to listen for
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordSpec {
    /// Label reported with detections
    pub label: String,
    /// Engine-specific keyword file
    pub path: PathBuf,
    /// Detection sensitivity (0.0 to 1.0)
    pub sensitivity: f32,
}

/// Acoustic model reference
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSpec {
    /// Model file, when the engine needs one beyond its built-in default
    pub path: Option<PathBuf>,
}

impl From<&WakeWordConfig> for KeywordSpec {
    fn from(config: &WakeWordConfig) -> Self {
        Self {
            label: config.label.clone(),
            path: config.keyword_path.clone(),
            sensitivity: config.sensitivity,
        }
    }
}

impl From<&WakeWordConfig> for ModelSpec {
    fn from(config: &WakeWordConfig) -> Self {
        Self {
            path: config.model_path.clone(),
        }
    }
}

/// A keyword spotting backend
#[async_trait]
pub trait KeywordEngine: Send {
    /// Bring the engine into the runtime
    async fn load(&mut self) -> Result<()>;

    /// Configure the phrase and model
    async fn init(
        &mut self,
        access_key: &SecretString,
        keyword: &KeywordSpec,
        model: &ModelSpec,
    ) -> Result<()>;

    /// Begin consuming audio, publishing hits into `slot`
    async fn start(&mut self, slot: DetectionSlot) -> Result<()>;

    /// Stop consuming audio
    async fn stop(&mut self) -> Result<()>;

    /// Free engine resources
    async fn release(&mut self) -> Result<()>;
}

/// Engine used when no keyword backend is compiled in
#[derive(Debug, Default)]
pub struct DisabledEngine;

#[async_trait]
impl KeywordEngine for DisabledEngine {
    async fn load(&mut self) -> Result<()> {
        Err(Error::DetectorUnavailable(
            "built without the wake-word feature".to_string(),
        ))
    }

    async fn init(&mut self, _: &SecretString, _: &KeywordSpec, _: &ModelSpec) -> Result<()> {
        Ok(())
    }

    async fn start(&mut self, _slot: DetectionSlot) -> Result<()> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Drives a [`KeywordEngine`] through its lifecycle
pub struct WakeWordAdapter {
    engine: Box<dyn KeywordEngine>,
    phase: WakePhase,
    enabled: bool,
    initialized: bool,
    error: Option<String>,
    slot: DetectionSlot,
}

impl std::fmt::Debug for WakeWordAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeWordAdapter")
            .field("phase", &self.phase)
            .field("enabled", &self.enabled)
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}

impl WakeWordAdapter {
    /// Wrap an engine; listening is enabled by default
    #[must_use]
    pub fn new(engine: Box<dyn KeywordEngine>) -> Self {
        Self {
            engine,
            phase: WakePhase::Unloaded,
            enabled: true,
            initialized: false,
            error: None,
            slot: DetectionSlot::new(),
        }
    }

    /// Adapter with no backend; loading always fails
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Box::new(DisabledEngine)).with_enabled(false)
    }

    /// Set the initial listening intent
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Current phase
    #[must_use]
    pub const fn phase(&self) -> WakePhase {
        self.phase
    }

    /// Listening intent
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The slot this adapter's engine publishes into
    #[must_use]
    pub const fn slot(&self) -> &DetectionSlot {
        &self.slot
    }

    /// Snapshot for display
    #[must_use]
    pub fn state(&self) -> WakeWordState {
        WakeWordState {
            phase: self.phase,
            enabled: self.enabled,
            last_detection: self.slot.peek(),
            error: self.error.clone(),
        }
    }

    fn set_phase(&mut self, phase: WakePhase) {
        if self.phase != phase {
            tracing::debug!(from = ?self.phase, to = ?phase, "wake word phase");
            self.phase = phase;
        }
    }

    fn fail(&mut self, err: &Error) {
        tracing::warn!(error = %err, "wake word engine error");
        self.error = Some(err.to_string());
    }

    /// Load the engine; a no-op while loading or loaded
    ///
    /// # Errors
    ///
    /// Returns [`Error::DetectorUnavailable`] if the engine cannot load
    pub async fn load(&mut self) -> Result<()> {
        if matches!(
            self.phase,
            WakePhase::Loading | WakePhase::LoadedIdle | WakePhase::LoadedListening
        ) {
            return Ok(());
        }

        self.set_phase(WakePhase::Loading);
        match self.engine.load().await {
            Ok(()) => {
                self.error = None;
                self.set_phase(WakePhase::LoadedIdle);
                Ok(())
            }
            Err(e) => {
                let err = match e {
                    Error::DetectorUnavailable(_) => e,
                    other => Error::DetectorUnavailable(other.to_string()),
                };
                self.fail(&err);
                self.set_phase(WakePhase::Error);
                Err(err)
            }
        }
    }

    /// Configure the phrase and model; allowed once per load
    ///
    /// # Errors
    ///
    /// Returns [`Error::DetectorConfig`] if the key is missing, the engine is
    /// not loaded and idle, or the engine rejects the configuration
    pub async fn init(
        &mut self,
        access_key: Option<&SecretString>,
        keyword: &KeywordSpec,
        model: &ModelSpec,
    ) -> Result<()> {
        let Some(access_key) = access_key else {
            let err = Error::DetectorConfig("missing wake word access key".to_string());
            self.fail(&err);
            return Err(err);
        };

        if self.phase != WakePhase::LoadedIdle || self.initialized {
            return Err(Error::DetectorConfig(format!(
                "cannot initialize detector in phase {:?}{}",
                self.phase,
                if self.initialized {
                    " (already initialized)"
                } else {
                    ""
                }
            )));
        }

        if let Err(e) = self.engine.init(access_key, keyword, model).await {
            let err = as_config_error(e);
            self.fail(&err);
            return Err(err);
        }

        self.initialized = true;
        tracing::info!(label = %keyword.label, "wake word detector initialized");
        Ok(())
    }

    /// Begin listening; a no-op while already listening
    ///
    /// # Errors
    ///
    /// Returns [`Error::DetectorConfig`] if the detector is not initialized or
    /// the engine fails to start
    pub async fn start(&mut self) -> Result<()> {
        if self.phase == WakePhase::LoadedListening {
            return Ok(());
        }
        if self.phase != WakePhase::LoadedIdle || !self.initialized {
            return Err(Error::DetectorConfig(format!(
                "cannot start detector in phase {:?}",
                self.phase
            )));
        }

        if let Err(e) = self.engine.start(self.slot.clone()).await {
            let err = as_config_error(e);
            self.fail(&err);
            return Err(err);
        }

        self.set_phase(WakePhase::LoadedListening);
        Ok(())
    }

    /// Stop listening; a no-op unless listening
    ///
    /// # Errors
    ///
    /// Returns [`Error::DetectorConfig`] if the engine fails to stop
    pub async fn stop(&mut self) -> Result<()> {
        if self.phase != WakePhase::LoadedListening {
            return Ok(());
        }

        if let Err(e) = self.engine.stop().await {
            let err = as_config_error(e);
            self.fail(&err);
            return Err(err);
        }

        self.set_phase(WakePhase::LoadedIdle);
        Ok(())
    }

    /// Free the engine; the adapter must be loaded again before reuse
    ///
    /// # Errors
    ///
    /// Returns the engine's failure; the adapter is Unloaded regardless
    pub async fn release(&mut self) -> Result<()> {
        if self.phase == WakePhase::Unloaded {
            return Ok(());
        }

        let mut result = Ok(());
        if self.phase == WakePhase::LoadedListening {
            if let Err(e) = self.engine.stop().await {
                tracing::warn!(error = %e, "failed to stop detector before release");
            }
        }
        if let Err(e) = self.engine.release().await {
            tracing::warn!(error = %e, "failed to release detector");
            result = Err(as_config_error(e));
        }

        self.initialized = false;
        self.slot.clear();
        self.set_phase(WakePhase::Unloaded);
        result
    }

    /// Flip the listening intent and follow it with start or stop
    ///
    /// When the detector is not ready to listen only the intent changes. If
    /// the start or stop call fails the intent is left as it was.
    ///
    /// # Errors
    ///
    /// Returns the start/stop failure
    pub async fn toggle(&mut self) -> Result<bool> {
        let enable = !self.enabled;
        let ready = self.initialized
            && matches!(
                self.phase,
                WakePhase::LoadedIdle | WakePhase::LoadedListening
            );

        if ready {
            if enable {
                self.start().await?;
            } else {
                self.stop().await?;
            }
        }

        self.enabled = enable;
        tracing::info!(enabled = enable, "wake word toggled");
        Ok(enable)
    }

    /// Start listening if the intent says so
    ///
    /// # Errors
    ///
    /// Returns the engine's start failure
    pub async fn resume(&mut self) -> Result<()> {
        if self.enabled && self.initialized {
            self.start().await
        } else {
            Ok(())
        }
    }

    /// Load, fetch the engine key from `gateway`, initialize, and start
    /// listening if enabled
    ///
    /// A missing key leaves the detector in the Error phase.
    ///
    /// # Errors
    ///
    /// Returns the first lifecycle failure
    pub async fn bootstrap(
        &mut self,
        gateway: &dyn CredentialGateway,
        keyword: &KeywordSpec,
        model: &ModelSpec,
    ) -> Result<()> {
        self.load().await?;

        let key = match gateway.wake_word_key().await {
            Ok(key) => key,
            Err(e) => {
                let err = as_config_error(e);
                self.fail(&err);
                self.set_phase(WakePhase::Error);
                return Err(err);
            }
        };

        self.init(Some(&key), keyword, model).await?;
        self.resume().await
    }

    /// Take the pending detection
    pub fn take_detection(&self) -> Option<Detection> {
        self.slot.take()
    }

    /// Drop the pending detection
    pub fn clear_detection(&self) {
        self.slot.clear();
    }
}

fn as_config_error(err: Error) -> Error {
    match err {
        Error::DetectorConfig(_) | Error::DetectorUnavailable(_) => err,
        other => Error::DetectorConfig(other.to_string()),
    }
}
