//! Rustpotter keyword engine
//!
//! Listens on a dedicated thread: cpal streams are not `Send`, so the
//! capture and the spotter both live and die on that thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use rustpotter::{Rustpotter, RustpotterConfig, SampleFormat};
use secrecy::SecretString;
use tokio::sync::oneshot;

use super::capture::{AudioCapture, SAMPLE_RATE};
use super::wake_word::{Detection, DetectionSlot, KeywordEngine, KeywordSpec, ModelSpec};
use crate::{Error, Result};

/// How often the listener drains captured audio
const POLL_INTERVAL: Duration = Duration::from_millis(20);

struct Listener {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// [`KeywordEngine`] backed by rustpotter
#[derive(Default)]
pub struct RustpotterEngine {
    keyword: Option<KeywordSpec>,
    listener: Option<Listener>,
}

impl RustpotterEngine {
    /// Create an unloaded engine
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn build_detector(keyword: &KeywordSpec) -> Result<Rustpotter> {
    let mut config = RustpotterConfig::default();
    config.fmt.sample_rate = SAMPLE_RATE as usize;
    config.fmt.channels = 1;
    config.fmt.sample_format = SampleFormat::F32;
    config.detector.threshold = (1.0 - keyword.sensitivity).clamp(0.05, 0.95);

    let mut detector = Rustpotter::new(&config)
        .map_err(|e| Error::DetectorConfig(format!("failed to create detector: {e}")))?;

    let path = keyword.path.to_str().ok_or_else(|| {
        Error::DetectorConfig(format!("keyword path is not utf-8: {}", keyword.path.display()))
    })?;
    detector
        .add_wakeword_from_file(&keyword.label, path)
        .map_err(|e| Error::DetectorConfig(format!("failed to load keyword {path}: {e}")))?;

    Ok(detector)
}

fn listen(
    keyword: &KeywordSpec,
    slot: &DetectionSlot,
    stop: &AtomicBool,
    ready: oneshot::Sender<Result<()>>,
) {
    let setup = build_detector(keyword).and_then(|detector| {
        let mut capture = AudioCapture::new()?;
        capture.start()?;
        Ok((detector, capture))
    });

    let (mut detector, mut capture) = match setup {
        Ok(parts) => {
            let _ = ready.send(Ok(()));
            parts
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let frame = detector.get_samples_per_frame();
    let mut pending: Vec<f32> = Vec::with_capacity(frame * 2);
    tracing::debug!(frame, label = %keyword.label, "wake word listener running");

    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(POLL_INTERVAL);
        pending.extend(capture.take_buffer());

        while pending.len() >= frame {
            let chunk: Vec<f32> = pending.drain(..frame).collect();
            if let Some(hit) = detector.process_f32(&chunk) {
                tracing::info!(label = %hit.name, score = hit.score, "wake word detected");
                slot.publish(Detection::new(hit.name, hit.score));
            }
        }
    }

    capture.stop();
    tracing::debug!("wake word listener stopped");
}

#[async_trait]
impl KeywordEngine for RustpotterEngine {
    async fn load(&mut self) -> Result<()> {
        Rustpotter::new(&RustpotterConfig::default())
            .map(drop)
            .map_err(|e| Error::DetectorUnavailable(e.to_string()))
    }

    async fn init(
        &mut self,
        _access_key: &SecretString,
        keyword: &KeywordSpec,
        model: &ModelSpec,
    ) -> Result<()> {
        if !keyword.path.exists() {
            return Err(Error::DetectorConfig(format!(
                "keyword file not found: {}",
                keyword.path.display()
            )));
        }
        if let Some(path) = &model.path {
            tracing::debug!(path = %path.display(), "rustpotter keywords embed their model; ignoring model path");
        }

        build_detector(keyword)?;
        self.keyword = Some(keyword.clone());
        Ok(())
    }

    async fn start(&mut self, slot: DetectionSlot) -> Result<()> {
        if self.listener.is_some() {
            return Ok(());
        }
        let keyword = self
            .keyword
            .clone()
            .ok_or_else(|| Error::DetectorConfig("engine not initialized".to_string()))?;

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("wake-word".to_string())
            .spawn(move || listen(&keyword, &slot, &thread_stop, ready_tx))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                self.listener = Some(Listener { stop, thread });
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::DetectorConfig(
                "wake word listener exited during startup".to_string(),
            )),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(listener) = self.listener.take() else {
            return Ok(());
        };

        listener.stop.store(true, Ordering::Relaxed);
        tokio::task::spawn_blocking(move || listener.thread.join())
            .await
            .map_err(|e| Error::DetectorConfig(e.to_string()))?
            .map_err(|_| Error::DetectorConfig("wake word listener panicked".to_string()))
    }

    async fn release(&mut self) -> Result<()> {
        self.stop().await?;
        self.keyword = None;
        Ok(())
    }
}
