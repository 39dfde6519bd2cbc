//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::resample::resample;
use crate::conversation::{
    AudioClip, AudioOutput, ClipSource, Event, EventSender, PlaybackEvent, PlaybackHandle,
};
use crate::{Error, Result};

/// Decoded mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Playing time at the native sample rate
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        #[allow(clippy::cast_precision_loss)]
        let secs = self.samples.len() as f64 / f64::from(self.sample_rate);
        Duration::from_secs_f64(secs)
    }
}

/// Plays clips on the default output device
///
/// Each clip is decoded and played on a blocking worker; progress is posted
/// to the orchestrator queue.
#[derive(Debug, Default)]
pub struct CpalOutput;

impl CpalOutput {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AudioOutput for CpalOutput {
    fn play(&self, id: u64, clip: AudioClip, events: EventSender) -> Result<PlaybackHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let task = tokio::task::spawn_blocking(move || {
            let post = |event: PlaybackEvent| {
                if !flag.load(Ordering::SeqCst) {
                    events.send(Event::Playback { id, event });
                }
            };

            let audio = match load_clip(clip).and_then(|bytes| decode_mp3(&bytes)) {
                Ok(audio) => audio,
                Err(e) => {
                    tracing::warn!(id, error = %e, "failed to load clip");
                    post(PlaybackEvent::Failed(e.to_string()));
                    return;
                }
            };

            post(PlaybackEvent::Loaded(audio.duration()));
            match play_blocking(&audio, &flag) {
                Ok(()) => post(PlaybackEvent::Ended),
                Err(e) => post(PlaybackEvent::Failed(e.to_string())),
            }
        });

        Ok(PlaybackHandle::new(stop, Some(task)))
    }
}

fn load_clip(clip: AudioClip) -> Result<Vec<u8>> {
    match clip.source {
        ClipSource::Memory(bytes) => Ok(bytes),
        ClipSource::File(path) => std::fs::read(&path)
            .map_err(|e| Error::Playback(format!("{}: {e}", path.display()))),
    }
}

/// Play samples on the default output device until done or `stop` is set
///
/// # Errors
///
/// Returns error if no output device is available or the stream fails
pub fn play_blocking(audio: &DecodedAudio, stop: &AtomicBool) -> Result<()> {
    if audio.samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let config = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?
        .config();
    let channels = usize::from(config.channels);
    let output_rate = config.sample_rate.0;

    let samples = Arc::new(resample(&audio.samples, audio.sample_rate, output_rate)?);
    let total = samples.len();
    let position = Arc::new(AtomicUsize::new(0));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or(0.0);
                        frame.fill(sample);
                        if pos < samples.len() {
                            pos += 1;
                        }
                    }
                    position.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    tracing::debug!(samples = total, rate = output_rate, "playback started");

    let timeout = audio.duration() + Duration::from_millis(500);
    let start = Instant::now();
    while position.load(Ordering::Relaxed) < total {
        if stop.load(Ordering::SeqCst) {
            tracing::debug!("playback stopped");
            return Ok(());
        }
        if start.elapsed() > timeout {
            tracing::warn!("playback did not drain in time");
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    // Let the device drain its last buffer
    std::thread::sleep(Duration::from_millis(100));
    drop(stream);
    tracing::debug!(samples = total, "playback complete");

    Ok(())
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns `Playback` if the data holds no decodable frames
pub fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0_u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                #[allow(clippy::cast_sign_loss)]
                {
                    sample_rate = frame.sample_rate as u32;
                }
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Playback("no audio frames".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}
