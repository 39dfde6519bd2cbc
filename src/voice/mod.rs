//! Audio devices and the realtime transcription adapter
//!
//! Handles microphone capture, reply playback and speech-to-text streaming.

mod capture;
mod playback;
mod resample;
mod scribe;

pub use capture::{
    AudioCapture, CaptureOptions, SAMPLE_RATE, calculate_rms, samples_to_pcm16, samples_to_wav,
};
pub use playback::{CpalOutput, DecodedAudio, decode_mp3, play_blocking};
pub use resample::resample;
pub use scribe::{ScribeSession, parse_message, session_url};
