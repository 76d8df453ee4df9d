//! Sample-rate conversion for engine output.
//!
//! Band-limited FFT resampling through rubato. Each call builds a fresh
//! resampler, so identical input always produces identical output.

use rubato::{FftFixedIn, Resampler};
use thiserror::Error;

use crate::engine::AudioBuffer;

/// Input frames per FFT block.
const CHUNK_FRAMES: usize = 1024;
const SUB_CHUNKS: usize = 2;

#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("invalid sample rate conversion {from} Hz -> {to} Hz")]
    InvalidRate { from: u32, to: u32 },

    #[error("resampler setup failed: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),

    #[error("resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),
}

/// Converts `buffer` from `from_rate` to `to_rate`, keeping its channel count.
///
/// Equal rates return the buffer untouched.
pub fn resample(buffer: AudioBuffer, from_rate: u32, to_rate: u32) -> Result<AudioBuffer, ResampleError> {
    if from_rate == to_rate {
        return Ok(buffer);
    }
    if from_rate == 0 || to_rate == 0 || buffer.channels == 0 {
        return Err(ResampleError::InvalidRate {
            from: from_rate,
            to: to_rate,
        });
    }
    if buffer.is_empty() {
        return Ok(buffer);
    }

    let channels = buffer.channels;
    let frames_in = buffer.frames();
    let expected = ((frames_in as u64 * to_rate as u64 + from_rate as u64 / 2) / from_rate as u64) as usize;

    let planar = deinterleave(&buffer.samples, channels);
    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_FRAMES, SUB_CHUNKS, channels)?;
    let delay = resampler.output_delay();
    let wanted = expected + delay;
    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(wanted + CHUNK_FRAMES); channels];

    let mut pos = 0;
    while frames_in - pos >= resampler.input_frames_next() {
        let n = resampler.input_frames_next();
        let block: Vec<&[f32]> = planar.iter().map(|c| &c[pos..pos + n]).collect();
        let produced = resampler.process(&block, None)?;
        append(&mut out, produced);
        pos += n;
    }

    if pos < frames_in {
        let tail: Vec<&[f32]> = planar.iter().map(|c| &c[pos..]).collect();
        let produced = resampler.process_partial(Some(tail.as_slice()), None)?;
        append(&mut out, produced);
    }

    // Flush the filter delay with silence until the tail has been emitted.
    while out[0].len() < wanted {
        let produced = resampler.process_partial(None::<&[Vec<f32>]>, None)?;
        if produced[0].is_empty() {
            break;
        }
        append(&mut out, produced);
    }

    for channel in out.iter_mut() {
        channel.drain(..delay.min(channel.len()));
        channel.resize(expected, 0.0);
    }

    Ok(AudioBuffer {
        channels,
        samples: interleave(&out),
    })
}

fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (channel, &sample) in planar.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }
    planar
}

fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let frames = planar.first().map(Vec::len).unwrap_or(0);
    let mut samples = Vec::with_capacity(frames * planar.len());
    for i in 0..frames {
        for channel in planar {
            samples.push(channel[i]);
        }
    }
    samples
}

fn append(out: &mut [Vec<f32>], produced: Vec<Vec<f32>>) {
    for (channel, block) in out.iter_mut().zip(produced) {
        channel.extend_from_slice(&block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frames: usize, rate: u32, freq: f32) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_same_rate_is_identity() {
        let input = AudioBuffer::mono(sine(1500, 24_000, 440.0));
        let output = resample(input.clone(), 24_000, 24_000).unwrap();
        let in_bytes: Vec<u8> = input.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let out_bytes: Vec<u8> = output.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(in_bytes, out_bytes);
        assert_eq!(output.channels, 1);
    }

    #[test]
    fn test_downsample_halves_length() {
        let input = AudioBuffer::mono(sine(4800, 48_000, 440.0));
        let output = resample(input, 48_000, 24_000).unwrap();
        assert_eq!(output.frames(), 2400);
        assert!(output.samples.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_upsample_short_chunk() {
        let input = AudioBuffer::mono(sine(300, 22_050, 300.0));
        let output = resample(input, 22_050, 44_100).unwrap();
        assert_eq!(output.frames(), 600);
    }

    #[test]
    fn test_preserves_channel_count() {
        let left = sine(2000, 44_100, 220.0);
        let right = sine(2000, 44_100, 880.0);
        let samples: Vec<f32> = left.iter().zip(&right).flat_map(|(l, r)| [*l, *r]).collect();
        let output = resample(AudioBuffer { channels: 2, samples }, 44_100, 22_050).unwrap();
        assert_eq!(output.channels, 2);
        assert_eq!(output.frames(), 1000);
        assert_eq!(output.samples.len(), 2000);
    }

    #[test]
    fn test_deterministic() {
        let input = AudioBuffer::mono(sine(3000, 22_050, 523.0));
        let a = resample(input.clone(), 22_050, 24_000).unwrap();
        let b = resample(input, 22_050, 24_000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_rate_rejected() {
        let input = AudioBuffer::mono(vec![0.0; 16]);
        assert!(matches!(
            resample(input, 0, 24_000),
            Err(ResampleError::InvalidRate { .. })
        ));
    }
}
