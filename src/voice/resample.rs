//! Sample rate conversion

use crate::{Error, Result};

const CHUNK_SIZE: usize = 1024;

/// Resample mono audio using rubato
///
/// The output has exactly `len * to_rate / from_rate` samples.
///
/// # Errors
///
/// Returns error if the resampler cannot be built or fails
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, 2, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let expected = (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    let delay = resampler.output_delay();

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output = Vec::with_capacity(expected + delay + CHUNK_SIZE);

    // Zero-padded tail plus two silent blocks to flush the filter delay
    let silence = vec![0.0; CHUNK_SIZE];
    let blocks = input
        .chunks(CHUNK_SIZE)
        .chain(std::iter::repeat_n(silence.as_slice(), 2));

    for chunk in blocks {
        let mut block = chunk.to_vec();
        block.resize(CHUNK_SIZE, 0.0);
        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    let mut output: Vec<f32> = output
        .into_iter()
        .skip(delay)
        .take(expected)
        .map(|s| s as f32)
        .collect();
    output.resize(expected, 0.0);
    Ok(output)
}
