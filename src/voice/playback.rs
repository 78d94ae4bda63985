//! Audio playback to speakers

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use crate::realtime::PlaybackSink;
use crate::{Error, Result};

/// Sample rate of inbound remote audio
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Queued samples waiting for the output callback
type SampleQueue = Arc<Mutex<VecDeque<f32>>>;

/// Pick an output config at [`PLAYBACK_SAMPLE_RATE`], mono preferred
fn output_config(device: &Device) -> Result<StreamConfig> {
    let supports = |channels: u16| {
        move |c: &cpal::SupportedStreamConfigRange| {
            c.channels() == channels
                && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
        }
    };

    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(supports(1))
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(supports(2))
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    Ok(supported
        .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
        .config())
}

/// Streams inbound session audio to the default output device
///
/// The output stream lives on its own thread; [`PlaybackSink::play`] only
/// appends to a shared queue.
pub struct Speaker {
    queue: SampleQueue,
    stop: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Speaker {
    /// Open the default output device and start streaming silence
    ///
    /// # Errors
    ///
    /// Returns error if no output device or config is available
    pub fn new() -> Result<Self> {
        let queue: SampleQueue = Arc::new(Mutex::new(VecDeque::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        let thread_queue = Arc::clone(&queue);
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("speaker".to_string())
            .spawn(move || {
                let stream = match open_stream(thread_queue) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while !thread_stop.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(50));
                }
                drop(stream);
                tracing::debug!("speaker stopped");
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("speaker thread exited during startup".to_string()))??;

        Ok(Self {
            queue,
            stop,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Samples queued but not yet played
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stop the output stream
    pub fn close(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                tracing::warn!("speaker thread panicked");
            }
        }
    }
}

fn open_stream(queue: SampleQueue) -> Result<cpal::Stream> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;
    let config = output_config(&device)?;
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = PLAYBACK_SAMPLE_RATE,
        channels,
        "audio playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
                for frame in data.chunks_mut(channels) {
                    let sample = queue.pop_front().unwrap_or(0.0);
                    frame.fill(sample);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

impl PlaybackSink for Speaker {
    fn play(&self, samples: &[f32]) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(samples.iter().copied());
    }
}

impl Drop for Speaker {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sink that discards inbound audio
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PlaybackSink for NullSink {
    fn play(&self, _samples: &[f32]) {}
}
