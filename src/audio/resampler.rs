//! Sample-rate conversion from the engine's rate to the output device's rate.

use anyhow::{Context, Result};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{Fft, FixedSync, Resampler};

/// Requested input frames per FFT pass.
const CHUNK_SIZE: usize = 1024;

/// Number of sub-chunks for FFT processing (higher = better quality but more CPU).
const SUB_CHUNKS: usize = 2;

/// Resample a whole mono clip.
///
/// The last chunk is zero-padded and the output trimmed back to the clip's length at
/// `to_rate`, so playback duration matches the synthesized duration.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = Fft::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1, FixedSync::Input)
        .context("Failed to create resampler")?;

    let output_frames_max = resampler.output_frames_max();
    let mut output_buffer = vec![0.0f32; output_frames_max];

    let expected_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let mut output = Vec::with_capacity(expected_len + output_frames_max);
    // Non-integer ratios (24 kHz -> 44.1 kHz) round the chunk size up
    let chunk_size = resampler.input_frames_next();
    let mut chunk = vec![0.0f32; chunk_size];

    for input in samples.chunks(chunk_size) {
        chunk[..input.len()].copy_from_slice(input);
        chunk[input.len()..].fill(0.0);

        let input_adapter = InterleavedSlice::new(&chunk, 1, chunk_size).context("Failed to create input adapter")?;
        let mut output_adapter = InterleavedSlice::new_mut(&mut output_buffer, 1, output_frames_max).context("Failed to create output adapter")?;

        let (_, frames_written) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, None)
            .map_err(|e| anyhow::anyhow!("Resampling error: {}", e))?;
        output.extend_from_slice(&output_buffer[..frames_written]);
    }

    output.resize(expected_len, 0.0);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kokoro_rate_to_common_device_rates() {
        let one_second = vec![0.0; 24000];
        assert_eq!(resample(&one_second, 24000, 48000).unwrap().len(), 48000);
        assert_eq!(resample(&one_second, 24000, 44100).unwrap().len(), 44100);
    }

    #[test]
    fn downsampling_keeps_duration() {
        let samples = vec![0.0; 48000];
        assert_eq!(resample(&samples, 48000, 16000).unwrap().len(), 16000);
    }

    #[test]
    fn matching_rates_and_empty_input_pass_through() {
        assert_eq!(resample(&[0.5, -0.5], 24000, 24000).unwrap(), vec![0.5, -0.5]);
        assert!(resample(&[], 24000, 48000).unwrap().is_empty());
    }
}
