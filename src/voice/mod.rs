//! Local audio devices and wake word detection

mod capture;
mod playback;
#[cfg(feature = "wake-word")]
mod spotter;
mod wake_word;

pub use capture::{
    AudioCapture, Microphone, MicrophoneTrack, SAMPLE_RATE, rms_level, samples_to_wav,
};
pub use playback::{NullSink, PLAYBACK_SAMPLE_RATE, Speaker};
#[cfg(feature = "wake-word")]
pub use spotter::RustpotterEngine;
pub use wake_word::{
    Detection, DetectionSlot, DisabledEngine, KeywordEngine, KeywordSpec, ModelSpec, WakePhase,
    WakeWordAdapter, WakeWordState,
};

