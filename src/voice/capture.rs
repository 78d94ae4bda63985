//! Audio capture from microphone

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::oneshot;

use crate::realtime::{MediaDevices, MediaTrack};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Most audio held between drains (30 seconds); older samples are dropped
const MAX_BUFFERED_SAMPLES: usize = SAMPLE_RATE as usize * 30;

type SampleBuffer = Arc<Mutex<Vec<f32>>>;

/// Append `data`, discarding the oldest samples beyond `cap`
fn push_bounded(buf: &mut Vec<f32>, data: &[f32], cap: usize) {
    buf.extend_from_slice(data);
    if buf.len() > cap {
        let excess = buf.len() - cap;
        buf.drain(..excess);
    }
}

/// Captures audio from the default input device
///
/// Holds a cpal stream and must stay on the thread that created it.
pub struct AudioCapture {
    config: StreamConfig,
    buffer: SampleBuffer,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        Self::with_buffer(Arc::new(Mutex::new(Vec::new())))
    }

    fn with_buffer(buffer: SampleBuffer) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            config,
            buffer,
            stream: None,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if capture fails
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device".to_string()))?;

        let stream = device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        push_bounded(&mut buf, data, MAX_BUFFERED_SAMPLES);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("audio capture stopped");
        }
    }

    /// Get captured audio buffer and clear it
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }
}

/// Microphone exposed to the session negotiator
///
/// Each acquired track runs its own capture thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct Microphone;

impl Microphone {
    /// Handle to the default input device
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaDevices for Microphone {
    async fn capture_audio(&self) -> Result<Box<dyn MediaTrack>> {
        let track = MicrophoneTrack::open().await.map_err(|e| match e {
            Error::MediaAccessDenied(_) => e,
            other => Error::MediaAccessDenied(other.to_string()),
        })?;
        Ok(Box::new(track))
    }
}

/// Live capture track from the default input device
pub struct MicrophoneTrack {
    id: String,
    buffer: SampleBuffer,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneTrack {
    async fn open() -> Result<Self> {
        let buffer: SampleBuffer = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_buffer = Arc::clone(&buffer);
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let mut capture = match AudioCapture::with_buffer(thread_buffer)
                    .and_then(|mut c| c.start().map(|()| c))
                {
                    Ok(capture) => {
                        let _ = ready_tx.send(Ok(()));
                        capture
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while !thread_stop.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(50));
                }
                capture.stop();
            })?;

        ready_rx
            .await
            .map_err(|_| Error::Audio("capture thread exited during startup".to_string()))??;

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            buffer,
            stop,
            thread: Some(thread),
        })
    }
}

impl MediaTrack for MicrophoneTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn drain(&self) -> Vec<f32> {
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::Relaxed);
        if thread.join().is_err() {
            tracing::warn!(track = %self.id, "capture thread panicked");
        }
        tracing::debug!(track = %self.id, "microphone track stopped");
    }

    fn is_live(&self) -> bool {
        self.thread.is_some()
    }
}

impl Drop for MicrophoneTrack {
    fn drop(&mut self) {
        MediaTrack::stop(self);
    }
}

/// RMS level of a block of samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Convert f32 samples to 16-bit mono WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
