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

//! Audio decoding via symphonia, plus excerpt selection.
//!
//! Decode failures are classified structurally (not by matching error message
//! text): [`DecodeError::is_recoverable`] tells callers whether to substitute
//! silence / skip the entry, or to propagate and terminate the run.

use std::fs::File;
use std::path::Path;

use rand::rngs::StdRng;
use rand::Rng;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::IntoSample;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use symphonia::default::{get_codecs, get_probe};

use crate::signal::Signal;

/// Number of random windows tried before giving up on clearing the loudness
/// cutoff (the last window is returned regardless).
const SALIENT_TRIES: usize = 8;

/// Error types for decoding and excerpt selection.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The stream could not be probed or its packets could not be decoded.
    #[error("Corrupt audio stream: {0}")]
    Corrupt(String),

    /// The stream decoded to zero frames.
    #[error("Audio stream is empty")]
    Empty,

    /// The channel layout changed mid-stream.
    #[error("Pathological stream shape: expected {expected} channels, got {got}")]
    PathologicalShape { expected: usize, got: usize },

    #[error("Resampling failed: {0}Hz -> {1}Hz")]
    ResamplingFailed(u32, u32),

    #[error("Audio format error: {0}")]
    Format(#[from] SymphoniaError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DecodeError {
    /// True for failures that are recovered locally (silence substitution in
    /// the offline loader, entry skip in the streaming pipeline). Everything
    /// else propagates and terminates the calling iteration.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DecodeError::Corrupt(_) | DecodeError::Empty | DecodeError::PathologicalShape { .. }
        )
    }
}

/// A fixed-duration window cut from a longer recording, along with the offset
/// (in seconds) it was cut at.
#[derive(Debug, Clone)]
pub struct Excerpt {
    pub signal: Signal,
    pub offset: f64,
}

struct OpenedStream {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    sample_rate: u32,
    n_frames: Option<u64>,
}

/// Decodes an audio file, optionally a fixed window at `offset` seconds of
/// `duration` seconds. The result keeps the source's native rate and layout.
pub fn decode_path(
    path: &Path,
    offset: Option<f64>,
    duration: Option<f64>,
) -> Result<Signal, DecodeError> {
    let mut opened = open_path(path)?;

    if let Some(offset) = offset.filter(|offset| *offset > 0.0) {
        let seek_to = SeekTo::Time {
            time: Time::from(std::time::Duration::from_secs_f64(offset)),
            track_id: Some(opened.track_id),
        };
        opened
            .reader
            .seek(SeekMode::Accurate, seek_to)
            .map_err(|e| DecodeError::Corrupt(format!("seek failed: {}", e)))?;
        opened.decoder.reset();
    }

    let max_frames = duration.map(|d| (d * opened.sample_rate as f64).round() as usize);
    let channels = decode_frames(&mut opened, max_frames)?;
    Ok(Signal::new(channels, opened.sample_rate))
}

/// Decodes an in-memory audio buffer (e.g. an archive entry). The optional
/// extension is used as a format hint.
pub fn decode_bytes(data: Vec<u8>, extension: Option<&str>) -> Result<Signal, DecodeError> {
    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }
    let mss = MediaSourceStream::new(Box::new(std::io::Cursor::new(data)), Default::default());
    let mut opened = open_stream(mss, hint)?;
    let channels = decode_frames(&mut opened, None)?;
    Ok(Signal::new(channels, opened.sample_rate))
}

/// Total duration of an audio file in seconds. Falls back to a full decode
/// when the container does not declare a frame count.
pub fn probe_duration(path: &Path) -> Result<f64, DecodeError> {
    let mut opened = open_path(path)?;
    if let Some(n_frames) = opened.n_frames {
        return Ok(n_frames as f64 / opened.sample_rate as f64);
    }
    let channels = decode_frames(&mut opened, None)?;
    Ok(channels[0].len() as f64 / opened.sample_rate as f64)
}

/// Decodes a `duration`-second window at an offset drawn uniformly from the
/// valid range.
pub fn excerpt(path: &Path, duration: f64, rng: &mut StdRng) -> Result<Excerpt, DecodeError> {
    let total = probe_duration(path)?;
    let upper = total - duration;
    let offset = if upper > 0.0 {
        rng.gen_range(0.0..upper)
    } else {
        0.0
    };
    let signal = decode_path(path, Some(offset), Some(duration))?;
    Ok(Excerpt { signal, offset })
}

/// Searches for a window whose loudness clears `loudness_cutoff` (dB),
/// drawing random offsets. After [`SALIENT_TRIES`] attempts the last window
/// is returned even if it stayed below the cutoff.
pub fn salient_excerpt(
    path: &Path,
    duration: f64,
    loudness_cutoff: f32,
    rng: &mut StdRng,
) -> Result<Excerpt, DecodeError> {
    let mut result = excerpt(path, duration, rng)?;
    for _ in 1..SALIENT_TRIES {
        if result.signal.loudness_db() > loudness_cutoff {
            break;
        }
        result = excerpt(path, duration, rng)?;
    }
    Ok(result)
}

/// Cuts a decoded signal into consecutive `duration`-second windows and keeps
/// the ones clearing `loudness_cutoff`, up to `num_excerpts` (further capped
/// by `max_excerpts`). Returns an empty vec when nothing qualifies.
pub fn salient_excerpts(
    signal: &Signal,
    duration: f64,
    loudness_cutoff: f32,
    num_excerpts: usize,
    max_excerpts: Option<usize>,
) -> Vec<Excerpt> {
    let window = (duration * signal.sample_rate() as f64).round() as usize;
    let frames = signal.num_frames();
    let cap = num_excerpts.min(max_excerpts.unwrap_or(usize::MAX));

    let mut excerpts = Vec::new();
    let mut start = 0;
    while start < frames && excerpts.len() < cap && window > 0 {
        let candidate = signal.slice_frames(start, window);
        if candidate.loudness_db() > loudness_cutoff {
            excerpts.push(Excerpt {
                signal: candidate,
                offset: start as f64 / signal.sample_rate() as f64,
            });
        }
        start += window;
    }
    excerpts
}

fn open_path(path: &Path) -> Result<OpenedStream, DecodeError> {
    // An unopenable path is handled like a corrupt stream so catalogs with a
    // few bad entries do not kill a whole run.
    let file = File::open(path)
        .map_err(|e| DecodeError::Corrupt(format!("{}: {}", path.display(), e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }
    open_stream(mss, hint)
}

fn open_stream(mss: MediaSourceStream, hint: Hint) -> Result<OpenedStream, DecodeError> {
    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();
    let probed = get_probe()
        .format(&hint, mss, &fmt_opts, &meta_opts)
        .map_err(|e| DecodeError::Corrupt(format!("probe failed: {}", e)))?;

    let reader = probed.format;
    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecodeError::Corrupt("no audio track found".to_string()))?;
    let track_id = track.id;
    let params = &track.codec_params;

    let sample_rate = params
        .sample_rate
        .ok_or_else(|| DecodeError::Corrupt("sample rate not specified".to_string()))?;
    let n_frames = params.n_frames;

    let decoder = get_codecs()
        .make(params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Corrupt(format!("decoder init failed: {}", e)))?;

    Ok(OpenedStream {
        reader,
        decoder,
        track_id,
        sample_rate,
        n_frames,
    })
}

/// Decodes packets into planar f32 channels until EOF or `max_frames`.
fn decode_frames(
    opened: &mut OpenedStream,
    max_frames: Option<usize>,
) -> Result<Vec<Vec<f32>>, DecodeError> {
    let mut channels: Vec<Vec<f32>> = Vec::new();

    loop {
        if let Some(max) = max_frames {
            if channels.first().is_some_and(|c| c.len() >= max) {
                break;
            }
        }

        let packet = match opened.reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::ResetRequired) => {
                opened.decoder.reset();
                continue;
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // End of stream.
                break;
            }
            Err(SymphoniaError::DecodeError(_)) => {
                // Some decoders return DecodeError at EOF instead of IoError.
                break;
            }
            Err(e) => return Err(DecodeError::Format(e)),
        };
        if packet.track_id() != opened.track_id {
            continue;
        }

        let decoded = match opened.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::ResetRequired) => {
                opened.decoder.reset();
                continue;
            }
            Err(e) => return Err(DecodeError::Format(e)),
        };

        let got = decoded.spec().channels.count();
        if got == 0 || decoded.frames() == 0 {
            continue;
        }
        if channels.is_empty() {
            channels = vec![Vec::new(); got];
        } else if channels.len() != got {
            return Err(DecodeError::PathologicalShape {
                expected: channels.len(),
                got,
            });
        }
        extend_planar(&mut channels, decoded);
    }

    if channels.first().map(|c| c.len()).unwrap_or(0) == 0 {
        return Err(DecodeError::Empty);
    }
    if let Some(max) = max_frames {
        for channel in &mut channels {
            channel.truncate(max);
        }
    }
    Ok(channels)
}

fn extend_planar(out: &mut [Vec<f32>], decoded: AudioBufferRef) {
    match decoded {
        AudioBufferRef::U8(buf) => extend_typed(out, buf.as_ref()),
        AudioBufferRef::U16(buf) => extend_typed(out, buf.as_ref()),
        AudioBufferRef::U24(buf) => extend_typed(out, buf.as_ref()),
        AudioBufferRef::U32(buf) => extend_typed(out, buf.as_ref()),
        AudioBufferRef::S8(buf) => extend_typed(out, buf.as_ref()),
        AudioBufferRef::S16(buf) => extend_typed(out, buf.as_ref()),
        AudioBufferRef::S24(buf) => extend_typed(out, buf.as_ref()),
        AudioBufferRef::S32(buf) => extend_typed(out, buf.as_ref()),
        AudioBufferRef::F32(buf) => extend_typed(out, buf.as_ref()),
        AudioBufferRef::F64(buf) => extend_typed(out, buf.as_ref()),
    }
}

fn extend_typed<T>(out: &mut [Vec<f32>], buf: &AudioBuffer<T>)
where
    T: symphonia::core::sample::Sample + IntoSample<f32>,
{
    let planes = buf.planes();
    for (channel, plane) in out.iter_mut().zip(planes.planes()) {
        channel.extend(plane.iter().map(|&sample| sample.into_sample()));
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use crate::testutil;

    use super::*;

    #[test]
    fn test_decode_full_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tone.wav");
        testutil::write_wav(&path, vec![testutil::sine(440.0, 8000, 1.0, 0.5)], 8000)?;

        let signal = decode_path(&path, None, None)?;
        assert_eq!(signal.sample_rate(), 8000);
        assert_eq!(signal.num_channels(), 1);
        assert_eq!(signal.num_frames(), 8000);
        Ok(())
    }

    #[test]
    fn test_decode_window_at_offset() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("halves.wav");
        // First second silent, second second full-scale.
        let mut samples = vec![0.0f32; 8000];
        samples.extend(vec![1.0f32; 8000]);
        testutil::write_wav(&path, vec![samples], 8000)?;

        let signal = decode_path(&path, Some(1.0), Some(0.5))?;
        assert_eq!(signal.num_frames(), 4000);
        assert!(signal.channels()[0].iter().all(|&s| s > 0.9));
        Ok(())
    }

    #[test]
    fn test_probe_duration() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tone.wav");
        testutil::write_wav(&path, vec![vec![0.1f32; 12000]], 8000)?;
        assert!((probe_duration(&path)? - 1.5).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_garbage_bytes_are_recoverable() {
        let err = decode_bytes(vec![0x13; 256], Some("wav")).unwrap_err();
        assert!(err.is_recoverable(), "expected recoverable, got {:?}", err);
    }

    #[test]
    fn test_missing_file_is_recoverable() {
        let err = decode_path(Path::new("/does/not/exist.wav"), None, None).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_salient_excerpt_prefers_loud_window() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sparse.wav");
        // Nine seconds of silence, one second of tone at the end.
        let mut samples = vec![0.0f32; 8000 * 9];
        samples.extend(testutil::sine(440.0, 8000, 1.0, 0.8));
        testutil::write_wav(&path, vec![samples], 8000)?;

        let mut rng = StdRng::seed_from_u64(3);
        let excerpt = salient_excerpt(&path, 0.5, -40.0, &mut rng)?;
        assert_eq!(excerpt.signal.num_frames(), 4000);
        // With 8 tries the search is overwhelmingly likely to land in the
        // loud region at least once; the chosen seed does.
        assert!(excerpt.signal.loudness_db() > -40.0);
        Ok(())
    }

    #[test]
    fn test_salient_excerpt_determinism() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tone.wav");
        testutil::write_wav(&path, vec![testutil::sine(220.0, 8000, 3.0, 0.5)], 8000)?;

        let mut rng_a = StdRng::seed_from_u64(11);
        let mut rng_b = StdRng::seed_from_u64(11);
        let a = salient_excerpt(&path, 1.0, -40.0, &mut rng_a)?;
        let b = salient_excerpt(&path, 1.0, -40.0, &mut rng_b)?;
        assert_eq!(a.offset, b.offset);
        assert_eq!(a.signal.channels(), b.signal.channels());
        Ok(())
    }

    #[test]
    fn test_salient_excerpts_fan_out() {
        // Five one-second tiles: loud, silent, loud, silent, loud.
        let mut samples = Vec::new();
        for i in 0..5 {
            if i % 2 == 0 {
                samples.extend(vec![0.5f32; 8000]);
            } else {
                samples.extend(vec![0.0f32; 8000]);
            }
        }
        let signal = Signal::new(vec![samples], 8000);

        let excerpts = salient_excerpts(&signal, 1.0, -40.0, 50, None);
        assert_eq!(excerpts.len(), 3);
        assert_eq!(excerpts[0].offset, 0.0);
        assert_eq!(excerpts[1].offset, 2.0);
        assert_eq!(excerpts[2].offset, 4.0);

        let excerpts = salient_excerpts(&signal, 1.0, -40.0, 50, Some(2));
        assert_eq!(excerpts.len(), 2);

        // Nothing qualifies: zero records.
        let silent = Signal::zeros(5.0, 8000, 1);
        assert!(salient_excerpts(&silent, 1.0, -40.0, 50, None).is_empty());
    }
}
