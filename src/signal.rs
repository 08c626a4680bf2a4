// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! In-memory audio signal in planar format.
//!
//! Planar format stores all samples for channel 0, then all samples for
//! channel 1, etc. This matches the native format of most decoders and of the
//! rubato resampler, so the sampling pipeline never interleaves.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::Rng;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use serde_json::Value;

use crate::decode::DecodeError;

/// Input block size for the sinc resampler.
const INPUT_BLOCK_SIZE: usize = 1024;

/// Loudness reported for an all-zero signal, in dB.
pub const SILENCE_DB: f32 = -120.0;

/// A decoded audio signal plus the metadata carried along with it through the
/// sampling pipeline. Metadata is an ordered string-keyed mapping so that
/// downstream stages stay generic over unknown fields.
#[derive(Debug, Clone)]
pub struct Signal {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
    metadata: BTreeMap<String, Value>,
}

impl Signal {
    /// Creates a signal from planar channel data. All channels must have the
    /// same number of frames.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Signal {
        debug_assert!(
            channels.windows(2).all(|w| w[0].len() == w[1].len()),
            "all channels must have the same frame count"
        );
        Signal {
            channels,
            sample_rate,
            metadata: BTreeMap::new(),
        }
    }

    /// Creates a zero-valued signal of exactly `round(duration * sample_rate)`
    /// frames. Used when sampling sentinel items and when substituting silence
    /// for unreadable audio.
    pub fn zeros(duration: f64, sample_rate: u32, num_channels: usize) -> Signal {
        let frames = (duration * sample_rate as f64).round() as usize;
        Signal::new(vec![vec![0.0; frames]; num_channels], sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of frames (samples per channel).
    pub fn num_frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.num_frames() as f64 / self.sample_rate as f64
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn set_metadata<K: Into<String>>(&mut self, key: K, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Downmixes to mono by averaging all channels. Metadata is preserved.
    pub fn to_mono(self) -> Signal {
        if self.channels.len() <= 1 {
            return self;
        }
        let frames = self.num_frames();
        let scale = 1.0 / self.channels.len() as f32;
        let mut mono = vec![0.0f32; frames];
        for channel in &self.channels {
            for (out, sample) in mono.iter_mut().zip(channel) {
                *out += sample * scale;
            }
        }
        Signal {
            channels: vec![mono],
            sample_rate: self.sample_rate,
            metadata: self.metadata,
        }
    }

    /// Downmixes to mono by picking one channel uniformly at random.
    pub fn to_rand_mono(mut self, rng: &mut StdRng) -> Signal {
        if self.channels.len() <= 1 {
            return self;
        }
        let pick = rng.gen_range(0..self.channels.len());
        let channel = self.channels.swap_remove(pick);
        Signal {
            channels: vec![channel],
            sample_rate: self.sample_rate,
            metadata: self.metadata,
        }
    }

    /// Zero-pads every channel on the trailing edge up to `frames`. Signals
    /// already at least that long are returned unchanged.
    pub fn zero_pad_to(mut self, frames: usize) -> Signal {
        for channel in &mut self.channels {
            if channel.len() < frames {
                channel.resize(frames, 0.0);
            }
        }
        self
    }

    /// Copies `len` frames starting at `start`, clamped to the available
    /// range. Metadata is not carried over.
    pub fn slice_frames(&self, start: usize, len: usize) -> Signal {
        let frames = self.num_frames();
        let start = start.min(frames);
        let end = (start + len).min(frames);
        Signal::new(
            self.channels
                .iter()
                .map(|c| c[start..end].to_vec())
                .collect(),
            self.sample_rate,
        )
    }

    /// RMS loudness over all channels in dB, [`SILENCE_DB`] for silence.
    pub fn loudness_db(&self) -> f32 {
        let total: usize = self.channels.iter().map(|c| c.len()).sum();
        if total == 0 {
            return SILENCE_DB;
        }
        let sum_squares: f32 = self
            .channels
            .iter()
            .flat_map(|c| c.iter())
            .map(|&x| x * x)
            .sum();
        let rms = (sum_squares / total as f32).sqrt();
        if rms <= 0.0 {
            return SILENCE_DB;
        }
        (20.0 * rms.log10()).max(SILENCE_DB)
    }

    /// Resamples to the target rate with a sinc resampler. A no-op when the
    /// rates already match.
    pub fn resample(mut self, target_rate: u32) -> Result<Signal, DecodeError> {
        if target_rate == self.sample_rate || self.channels.is_empty() || self.num_frames() == 0 {
            self.sample_rate = target_rate;
            return Ok(self);
        }

        let source_rate = self.sample_rate;
        let num_channels = self.channels.len();
        let sinc_params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            oversampling_factor: 128,
            interpolation: SincInterpolationType::Linear,
            window: WindowFunction::BlackmanHarris2,
        };
        let mut resampler = SincFixedIn::<f32>::new(
            target_rate as f64 / source_rate as f64,
            1.0,
            sinc_params,
            INPUT_BLOCK_SIZE,
            num_channels,
        )
        .map_err(|_e| DecodeError::ResamplingFailed(source_rate, target_rate))?;

        let mut scratch = resampler.output_buffer_allocate(true);
        let mut output: Vec<Vec<f32>> = vec![Vec::new(); num_channels];
        let frames = self.num_frames();
        let mut pos = 0;

        while frames - pos >= resampler.input_frames_next() {
            let needed = resampler.input_frames_next();
            let chunk: Vec<&[f32]> = self
                .channels
                .iter()
                .map(|c| &c[pos..pos + needed])
                .collect();
            let (frames_in, frames_out) = resampler
                .process_into_buffer(&chunk, &mut scratch, None)
                .map_err(|_e| DecodeError::ResamplingFailed(source_rate, target_rate))?;
            pos += frames_in;
            for (out, produced) in output.iter_mut().zip(&scratch) {
                out.extend_from_slice(&produced[..frames_out]);
            }
        }

        // Feed the remaining partial block, then drain the resampler's
        // internal delay line.
        if pos < frames {
            let chunk: Vec<&[f32]> = self.channels.iter().map(|c| &c[pos..]).collect();
            let (_frames_in, frames_out) = resampler
                .process_partial_into_buffer(Some(&chunk), &mut scratch, None)
                .map_err(|_e| DecodeError::ResamplingFailed(source_rate, target_rate))?;
            for (out, produced) in output.iter_mut().zip(&scratch) {
                out.extend_from_slice(&produced[..frames_out]);
            }
        }
        loop {
            let (_frames_in, frames_out) = resampler
                .process_partial_into_buffer(None::<&[&[f32]]>, &mut scratch, None)
                .map_err(|_e| DecodeError::ResamplingFailed(source_rate, target_rate))?;
            if frames_out == 0 {
                break;
            }
            for (out, produced) in output.iter_mut().zip(&scratch) {
                out.extend_from_slice(&produced[..frames_out]);
            }
        }

        Ok(Signal {
            channels: output,
            sample_rate: target_rate,
            metadata: self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_zeros_shape() {
        let signal = Signal::zeros(0.5, 44100, 2);
        assert_eq!(signal.num_channels(), 2);
        assert_eq!(signal.num_frames(), 22050);
        assert_eq!(signal.sample_rate(), 44100);
        assert_eq!(signal.loudness_db(), SILENCE_DB);
    }

    #[test]
    fn test_to_mono_averages() {
        let signal = Signal::new(vec![vec![1.0, 1.0], vec![0.0, 0.0]], 8000).to_mono();
        assert_eq!(signal.num_channels(), 1);
        assert_eq!(signal.channels()[0], vec![0.5, 0.5]);
    }

    #[test]
    fn test_to_rand_mono_picks_a_channel() {
        let mut rng = StdRng::seed_from_u64(7);
        let signal =
            Signal::new(vec![vec![1.0, 1.0], vec![-1.0, -1.0]], 8000).to_rand_mono(&mut rng);
        assert_eq!(signal.num_channels(), 1);
        let picked = signal.channels()[0][0];
        assert!(picked == 1.0 || picked == -1.0);
    }

    #[test]
    fn test_zero_pad_trailing() {
        let signal = Signal::new(vec![vec![1.0, 2.0]], 8000).zero_pad_to(4);
        assert_eq!(signal.channels()[0], vec![1.0, 2.0, 0.0, 0.0]);

        // Already long enough: unchanged.
        let signal = Signal::new(vec![vec![1.0, 2.0, 3.0]], 8000).zero_pad_to(2);
        assert_eq!(signal.num_frames(), 3);
    }

    #[test]
    fn test_loudness_full_scale() {
        let signal = Signal::new(vec![vec![1.0; 512]], 8000);
        assert!(signal.loudness_db().abs() < 1e-4);
    }

    #[test]
    fn test_resample_length_and_rate() -> Result<(), crate::decode::DecodeError> {
        let frames = 44100;
        let sine: Vec<f32> = (0..frames)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin())
            .collect();
        let signal = Signal::new(vec![sine], 44100).resample(48000)?;
        assert_eq!(signal.sample_rate(), 48000);
        // Sinc resampling has edge transients; the length should land close
        // to the ideal ratio.
        let expected = 48000.0;
        let actual = signal.num_frames() as f64;
        assert!(
            (actual - expected).abs() < 2048.0,
            "expected ~{expected} frames, got {actual}"
        );
        Ok(())
    }

    #[test]
    fn test_resample_same_rate_is_noop() -> Result<(), crate::decode::DecodeError> {
        let signal = Signal::new(vec![vec![0.25; 128]], 16000).resample(16000)?;
        assert_eq!(signal.num_frames(), 128);
        assert_eq!(signal.channels()[0][0], 0.25);
        Ok(())
    }
}
