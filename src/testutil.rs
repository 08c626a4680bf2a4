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
use std::error::Error;
use std::path::Path;

use tracing_subscriber::EnvFilter;

/// Initializes logging for a test. Later calls are no-ops, so any test that
/// exercises a logging path can call this without coordination.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Writes planar f32 channels to a 32-bit float WAV file.
pub fn write_wav(
    path: &Path,
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    let spec = hound::WavSpec {
        channels: channels.len() as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    let frames = channels.first().map(|c| c.len()).unwrap_or(0);
    for frame in 0..frames {
        for channel in &channels {
            writer.write_sample(channel[frame])?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Generates a sine tone.
pub fn sine(frequency: f32, sample_rate: u32, duration: f64, amplitude: f32) -> Vec<f32> {
    let frames = (duration * sample_rate as f64).round() as usize;
    (0..frames)
        .map(|i| {
            amplitude
                * (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32).sin()
        })
        .collect()
}

/// Encodes planar f32 channels as an in-memory 32-bit float WAV.
pub fn wav_bytes(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Vec<u8>, Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("buffer.wav");
    write_wav(&path, channels, sample_rate)?;
    Ok(std::fs::read(&path)?)
}

/// Writes a WAV file whose single channel is a tone, returning its path.
pub fn write_tone(
    dir: &Path,
    name: &str,
    sample_rate: u32,
    duration: f64,
) -> Result<std::path::PathBuf, Box<dyn Error>> {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_wav(&path, vec![sine(440.0, sample_rate, duration, 0.5)], sample_rate)?;
    Ok(path)
}
