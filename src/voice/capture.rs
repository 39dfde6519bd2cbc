//! Audio capture from microphone

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use crate::transcription::AudioConstraints;
use crate::{Error, Result};

/// Preferred sample rate for speech capture
pub const SAMPLE_RATE: u32 = 16000;

/// Chunks quieter than this are treated as background noise
const NOISE_FLOOR: f32 = 0.005;

/// Peak level automatic gain aims for
const TARGET_PEAK: f32 = 0.7;

/// Upper bound on automatic gain
const MAX_GAIN: f32 = 4.0;

/// Software conditioning applied to captured chunks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureOptions {
    pub noise_gate: bool,
    pub auto_gain: bool,
}

impl From<AudioConstraints> for CaptureOptions {
    fn from(constraints: AudioConstraints) -> Self {
        if constraints.echo_cancellation {
            tracing::debug!("echo cancellation is left to the input device");
        }
        Self {
            noise_gate: constraints.noise_suppression,
            auto_gain: constraints.auto_gain_control,
        }
    }
}

/// Captures mono audio from the default input device
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    options: CaptureOptions,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Open the default input device, at 16 kHz mono when it supports that
    ///
    /// # Errors
    ///
    /// Returns error if no input device can be opened
    pub fn new(options: CaptureOptions) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let preferred = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .map(|c| c.with_sample_rate(SampleRate(SAMPLE_RATE)));

        let config = match preferred {
            Some(supported) => supported.config(),
            None => device
                .default_input_config()
                .map_err(|e| Error::Audio(e.to_string()))?
                .config(),
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            options,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start capturing into the internal buffer
    ///
    /// # Errors
    ///
    /// Returns error if capture fails
    pub fn start(&mut self) -> Result<()> {
        let buffer = Arc::clone(&self.buffer);
        self.start_with(move |chunk| {
            if let Ok(mut buf) = buffer.lock() {
                buf.extend_from_slice(&chunk);
            }
        })
    }

    /// Start capturing, forwarding each conditioned mono chunk to `sink`
    ///
    /// # Errors
    ///
    /// Returns error if capture fails
    pub fn start_streaming(&mut self, sink: mpsc::UnboundedSender<Vec<f32>>) -> Result<()> {
        self.start_with(move |chunk| {
            let _ = sink.send(chunk);
        })
    }

    fn start_with<F>(&mut self, mut on_chunk: F) -> Result<()>
    where
        F: FnMut(Vec<f32>) + Send + 'static,
    {
        if self.stream.is_some() {
            return Ok(());
        }

        let channels = usize::from(self.config.channels);
        let options = self.options;

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mut chunk = downmix(data, channels);
                    condition(&mut chunk, options);
                    on_chunk(chunk);
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
        if let Some(stream) = self.stream.take() {
            drop(stream);
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

    /// Capture sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

/// Average interleaved frames down to mono
#[must_use]
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / channels as f32;
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

/// Apply the noise gate and automatic gain to one chunk
pub fn condition(chunk: &mut [f32], options: CaptureOptions) {
    if chunk.is_empty() {
        return;
    }

    let rms = calculate_rms(chunk);
    if options.noise_gate && rms < NOISE_FLOOR {
        chunk.fill(0.0);
        return;
    }

    if options.auto_gain && rms >= NOISE_FLOOR {
        let peak = chunk.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        if peak > 0.0 {
            let gain = (TARGET_PEAK / peak).clamp(1.0, MAX_GAIN);
            for sample in chunk.iter_mut() {
                *sample = (*sample * gain).clamp(-1.0, 1.0);
            }
        }
    }
}

/// Root mean square energy of a chunk
#[must_use]
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    #[allow(clippy::cast_precision_loss)]
    let mean = sum / samples.len() as f32;
    mean.sqrt()
}

/// Convert f32 samples to 16-bit little-endian PCM
#[must_use]
pub fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| {
            #[allow(clippy::cast_possible_truncation)]
            let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            value.to_le_bytes()
        })
        .collect()
}

/// Convert f32 samples to WAV bytes
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix(&[0.2, 0.4, -1.0, 1.0], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!(mono[1].abs() < 1e-6);
        assert_eq!(downmix(&[0.5, 0.25], 1), vec![0.5, 0.25]);
    }

    #[test]
    fn test_pcm16_is_little_endian() {
        assert_eq!(samples_to_pcm16(&[0.0, 1.0, -1.0]), vec![0, 0, 0xff, 0x7f, 0x01, 0x80]);
    }

    #[test]
    fn test_noise_gate_silences_quiet_chunk() {
        let mut chunk = vec![0.001, -0.002, 0.001];
        condition(
            &mut chunk,
            CaptureOptions {
                noise_gate: true,
                auto_gain: false,
            },
        );
        assert!(chunk.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_auto_gain_is_bounded() {
        let mut chunk = vec![0.1, -0.1, 0.05];
        condition(
            &mut chunk,
            CaptureOptions {
                noise_gate: false,
                auto_gain: true,
            },
        );
        let peak = chunk.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!((peak - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_wav_header() {
        let wav = samples_to_wav(&[0.0; 160], SAMPLE_RATE).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(wav.len(), 44 + 320);
    }

    #[test]
    fn test_rms() {
        assert!(calculate_rms(&[]).abs() < f32::EPSILON);
        assert!((calculate_rms(&[0.5, -0.5]) - 0.5).abs() < 1e-6);
    }
}
