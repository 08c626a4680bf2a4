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

//! Excerpt sampling from a set of catalogs.
//!
//! An [`AudioLoader`] owns one or more catalogs and draws fixed-duration
//! excerpts from them. All randomness comes from the caller's RNG, so a
//! sampler that seeds per index gets reproducible draws regardless of worker
//! scheduling.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rand::SeedableRng;
use serde_json::json;
use tracing::warn;

use crate::catalog::{Catalog, SENTINEL_PATH};
use crate::decode::{self, DecodeError};
use crate::signal::Signal;
use crate::transform::{Transform, TransformArgs};

/// File (under the OS temp directory) where paths of unreadable audio are
/// recorded for later inspection.
const CORRUPT_LOG_FILE: &str = "trackset_corrupt.txt";

/// How an item is chosen from the loader's catalogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// A specific item, e.g. to mirror another loader's draw across aligned
    /// catalogs. Out-of-range indices resolve to the sentinel.
    Explicit { source_idx: usize, item_idx: usize },

    /// The `idx % num_items`-th entry of the loader's shuffled global index,
    /// guaranteeing full coverage without replacement every `num_items` draws.
    Global(usize),

    /// A weighted draw over sources, then a uniform draw within the source.
    Weighted,
}

/// Shape and selection parameters for one draw.
#[derive(Debug, Clone)]
pub struct SampleSpec {
    /// Target sample rate of the returned signal.
    pub sample_rate: u32,
    /// Excerpt duration in seconds.
    pub duration: f64,
    /// Loudness (dB) an excerpt must clear during the salient search.
    pub loudness_cutoff: f32,
    /// Channel count of silence fills; `1` also downmixes decoded audio.
    pub num_channels: usize,
    /// Forces the excerpt offset (seconds) instead of searching for a salient
    /// window. Used to cut the same window across aligned stems.
    pub offset: Option<f64>,
}

impl Default for SampleSpec {
    fn default() -> SampleSpec {
        SampleSpec {
            sample_rate: 44100,
            duration: 0.5,
            loudness_cutoff: -40.0,
            num_channels: 1,
            offset: None,
        }
    }
}

/// One drawn excerpt plus its provenance.
#[derive(Debug, Clone)]
pub struct Sample {
    pub signal: Signal,
    pub source_idx: usize,
    pub item_idx: usize,
    /// Source the item came from, or `"none"` for sentinel draws.
    pub source: String,
    pub path: String,
    /// Offset (seconds) the excerpt was cut at. `None` only for sentinel
    /// items, which have no backing file.
    pub offset: Option<f64>,
    pub transform_args: Option<TransformArgs>,
}

/// Draws excerpts from a set of catalogs.
pub struct AudioLoader {
    catalogs: Vec<Catalog>,
    weights: Vec<f64>,
    /// Flattened (source_idx, item_idx) pairs over all catalogs, permuted
    /// once at construction when shuffling is on.
    indices: Vec<(usize, usize)>,
    shuffle: bool,
    shuffle_seed: u64,
    transform: Option<Arc<dyn Transform>>,
}

impl AudioLoader {
    /// Creates a loader with uniform source weights and a shuffled global
    /// index (seed 0).
    pub fn new(catalogs: Vec<Catalog>) -> AudioLoader {
        let weights = vec![1.0; catalogs.len()];
        let mut loader = AudioLoader {
            catalogs,
            weights,
            indices: Vec::new(),
            shuffle: true,
            shuffle_seed: 0,
            transform: None,
        };
        loader.reflatten();
        loader
    }

    /// Sets relative source weights for [`Selection::Weighted`]. Invalid
    /// weights (wrong length, non-positive sum) fall back to uniform.
    pub fn with_weights(mut self, weights: Vec<f64>) -> AudioLoader {
        let sum: f64 = weights.iter().sum();
        if weights.len() != self.catalogs.len() || !(sum > 0.0) {
            warn!(
                sources = self.catalogs.len(),
                weights = weights.len(),
                "Ignoring invalid source weights, using uniform"
            );
            return self;
        }
        self.weights = weights;
        self
    }

    /// Controls the global index permutation.
    pub fn with_shuffle(mut self, shuffle: bool, seed: u64) -> AudioLoader {
        self.shuffle = shuffle;
        self.shuffle_seed = seed;
        self.reflatten();
        self
    }

    /// Attaches a per-sample transform whose arguments are drawn with the
    /// caller's RNG.
    pub fn with_transform(mut self, transform: Arc<dyn Transform>) -> AudioLoader {
        self.transform = Some(transform);
        self
    }

    pub fn num_sources(&self) -> usize {
        self.catalogs.len()
    }

    /// Total items across all catalogs; the coverage period of
    /// [`Selection::Global`].
    pub fn num_items(&self) -> usize {
        self.indices.len()
    }

    pub fn catalogs(&self) -> &[Catalog] {
        &self.catalogs
    }

    pub(crate) fn catalog_mut(&mut self, source_idx: usize) -> Option<&mut Catalog> {
        self.catalogs.get_mut(source_idx)
    }

    /// Rebuilds the flattened global index. Must be called after catalogs are
    /// reshaped (e.g. by multitrack alignment) so every slot is reachable.
    pub(crate) fn reflatten(&mut self) {
        self.indices = self
            .catalogs
            .iter()
            .enumerate()
            .flat_map(|(source_idx, catalog)| {
                (0..catalog.len()).map(move |item_idx| (source_idx, item_idx))
            })
            .collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.shuffle_seed);
            self.indices.shuffle(&mut rng);
        }
    }

    /// Draws one excerpt. Sentinel items and unreadable audio both yield
    /// silence of the requested shape; unreadable paths are additionally
    /// logged and noted in the corrupt file under the temp directory.
    pub fn sample(
        &self,
        rng: &mut StdRng,
        spec: &SampleSpec,
        selection: Selection,
    ) -> Result<Sample, DecodeError> {
        let (source_idx, item_idx) = self.select(rng, selection)?;

        let (path, item_metadata) = match self
            .catalogs
            .get(source_idx)
            .and_then(|catalog| catalog.get(item_idx))
        {
            Some(item) => (item.path().to_string(), item.metadata().clone()),
            None => (SENTINEL_PATH.to_string(), BTreeMap::new()),
        };

        let target_frames = (spec.duration * spec.sample_rate as f64).round() as usize;
        let (signal, offset) = if path == SENTINEL_PATH {
            let signal = Signal::zeros(spec.duration, spec.sample_rate, spec.num_channels);
            (signal, None)
        } else {
            match self.load_excerpt(&path, spec, rng) {
                Ok((signal, offset)) => {
                    let signal = if spec.num_channels == 1 {
                        signal.to_mono()
                    } else {
                        signal
                    };
                    let signal = signal
                        .resample(spec.sample_rate)?
                        .zero_pad_to(target_frames)
                        .slice_frames(0, target_frames);
                    (signal, Some(offset))
                }
                Err(e) if e.is_recoverable() => {
                    warn!(path = %path, error = %e, "Substituting silence for unreadable audio");
                    note_corrupt(&path, &e);
                    let signal =
                        Signal::zeros(spec.duration, spec.sample_rate, spec.num_channels);
                    (signal, Some(0.0))
                }
                Err(e) => return Err(e),
            }
        };

        let mut signal = signal;
        for (key, value) in item_metadata {
            signal.set_metadata(key, value);
        }
        if let Some(offset) = offset {
            signal.set_metadata("offset", json!(offset));
        }

        let transform_args = self
            .transform
            .as_ref()
            .map(|transform| transform.instantiate(rng, &signal));

        let source = self
            .catalogs
            .get(source_idx)
            .map(|catalog| catalog.source().to_string())
            .unwrap_or_else(|| SENTINEL_PATH.to_string());

        Ok(Sample {
            signal,
            source_idx,
            item_idx,
            source,
            path,
            offset,
            transform_args,
        })
    }

    fn select(
        &self,
        rng: &mut StdRng,
        selection: Selection,
    ) -> Result<(usize, usize), DecodeError> {
        match selection {
            Selection::Explicit {
                source_idx,
                item_idx,
            } => Ok((source_idx, item_idx)),
            Selection::Global(global_idx) => {
                if self.indices.is_empty() {
                    // No items anywhere; resolve to the sentinel.
                    return Ok((usize::MAX, usize::MAX));
                }
                Ok(self.indices[global_idx % self.indices.len()])
            }
            Selection::Weighted => {
                if self.catalogs.is_empty() {
                    return Ok((usize::MAX, usize::MAX));
                }
                let dist = WeightedIndex::new(&self.weights)
                    .map_err(|e| DecodeError::Corrupt(format!("invalid source weights: {}", e)))?;
                let source_idx = dist.sample(rng);
                let len = self.catalogs[source_idx].len();
                if len == 0 {
                    return Ok((source_idx, usize::MAX));
                }
                Ok((source_idx, rng.gen_range(0..len)))
            }
        }
    }

    fn load_excerpt(
        &self,
        path: &str,
        spec: &SampleSpec,
        rng: &mut StdRng,
    ) -> Result<(Signal, f64), DecodeError> {
        let path = Path::new(path);
        match spec.offset {
            Some(offset) => {
                let signal = decode::decode_path(path, Some(offset), Some(spec.duration))?;
                Ok((signal, offset))
            }
            None => {
                let excerpt =
                    decode::salient_excerpt(path, spec.duration, spec.loudness_cutoff, rng)?;
                Ok((excerpt.signal, excerpt.offset))
            }
        }
    }
}

/// Records an unreadable path in the corrupt log. Logging failures are
/// swallowed; the substitution already happened.
fn note_corrupt(path: &str, error: &DecodeError) {
    let log_path = std::env::temp_dir().join(CORRUPT_LOG_FILE);
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&log_path) {
        let _ = writeln!(file, "{}\t{}", path, error);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::catalog::Item;
    use crate::testutil;

    use super::*;

    fn tone_catalog(
        dir: &Path,
        source: &str,
        names: &[&str],
    ) -> Result<Catalog, Box<dyn std::error::Error>> {
        let mut items = Vec::new();
        for name in names {
            let path = testutil::write_tone(dir, name, 8000, 2.0)?;
            items.push(Item::new(path.to_string_lossy()));
        }
        Ok(Catalog::new(source, items))
    }

    fn spec() -> SampleSpec {
        SampleSpec {
            sample_rate: 8000,
            duration: 0.5,
            ..Default::default()
        }
    }

    #[test]
    fn test_deterministic_draws() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let loader = AudioLoader::new(vec![tone_catalog(dir.path(), "a", &["x.wav", "y.wav"])?]);

        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let a = loader.sample(&mut rng_a, &spec(), Selection::Weighted)?;
        let b = loader.sample(&mut rng_b, &spec(), Selection::Weighted)?;

        assert_eq!(a.path, b.path);
        assert_eq!(a.offset, b.offset);
        assert_eq!(a.signal.channels(), b.signal.channels());
        Ok(())
    }

    #[test]
    fn test_global_selection_covers_all_items() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let loader = AudioLoader::new(vec![
            tone_catalog(dir.path(), "a", &["a/x.wav", "a/y.wav"])?,
            tone_catalog(dir.path(), "b", &["b/z.wav"])?,
        ]);
        assert_eq!(loader.num_items(), 3);

        let mut rng = StdRng::seed_from_u64(0);
        let mut seen = BTreeSet::new();
        for idx in 0..3 {
            let sample = loader.sample(&mut rng, &spec(), Selection::Global(idx))?;
            seen.insert((sample.source_idx, sample.item_idx));
        }
        assert_eq!(seen.len(), 3);

        // Indices past the period wrap around.
        let wrapped = loader.sample(&mut rng, &spec(), Selection::Global(3))?;
        let first = loader.sample(&mut rng, &spec(), Selection::Global(0))?;
        assert_eq!(
            (wrapped.source_idx, wrapped.item_idx),
            (first.source_idx, first.item_idx)
        );
        Ok(())
    }

    #[test]
    fn test_sentinel_yields_exact_silence() -> Result<(), Box<dyn std::error::Error>> {
        let catalog = Catalog::new("a", vec![Item::sentinel()]);
        let loader = AudioLoader::new(vec![catalog]);

        let mut rng = StdRng::seed_from_u64(0);
        let sample = loader.sample(
            &mut rng,
            &SampleSpec {
                sample_rate: 16000,
                duration: 0.25,
                num_channels: 2,
                ..Default::default()
            },
            Selection::Explicit {
                source_idx: 0,
                item_idx: 0,
            },
        )?;

        assert_eq!(sample.path, "none");
        assert_eq!(sample.offset, None);
        assert_eq!(sample.signal.num_channels(), 2);
        assert_eq!(sample.signal.num_frames(), 4000);
        assert!(sample.signal.channels().iter().flatten().all(|&s| s == 0.0));
        assert!(!sample.signal.metadata().contains_key("offset"));
        Ok(())
    }

    #[test]
    fn test_out_of_range_explicit_resolves_to_sentinel(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let loader = AudioLoader::new(vec![tone_catalog(dir.path(), "a", &["x.wav"])?]);

        let mut rng = StdRng::seed_from_u64(0);
        let sample = loader.sample(
            &mut rng,
            &spec(),
            Selection::Explicit {
                source_idx: 5,
                item_idx: 0,
            },
        )?;
        assert_eq!(sample.path, "none");
        assert_eq!(sample.source, "none");
        Ok(())
    }

    #[test]
    fn test_corrupt_file_substitutes_silence() -> Result<(), Box<dyn std::error::Error>> {
        testutil::init_logging();
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.wav");
        std::fs::write(&path, [0x42; 64])?;
        let loader = AudioLoader::new(vec![Catalog::new(
            "a",
            vec![Item::new(path.to_string_lossy())],
        )]);

        let mut rng = StdRng::seed_from_u64(0);
        let sample = loader.sample(&mut rng, &spec(), Selection::Global(0))?;
        assert_eq!(sample.signal.num_frames(), 4000);
        assert!(sample.signal.channels()[0].iter().all(|&s| s == 0.0));
        assert_eq!(sample.offset, Some(0.0));
        assert_eq!(sample.signal.metadata().get("offset"), Some(&json!(0.0)));
        Ok(())
    }

    #[test]
    fn test_short_file_zero_padded_to_exact_length() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        // Half the requested excerpt duration.
        let path = dir.path().join("short.wav");
        testutil::write_wav(&path, vec![testutil::sine(440.0, 8000, 0.25, 0.5)], 8000)?;
        let loader = AudioLoader::new(vec![Catalog::new(
            "a",
            vec![Item::new(path.to_string_lossy())],
        )]);

        let mut rng = StdRng::seed_from_u64(0);
        let sample = loader.sample(&mut rng, &spec(), Selection::Global(0))?;
        assert_eq!(sample.signal.num_frames(), 4000);
        // Decoded audio up front, zero fill on the tail.
        let channel = &sample.signal.channels()[0];
        assert!(channel[..2000].iter().any(|&s| s != 0.0));
        assert!(channel[2000..].iter().all(|&s| s == 0.0));
        assert_eq!(sample.offset, Some(0.0));
        Ok(())
    }

    #[test]
    fn test_weighted_draw_respects_zero_weight() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let loader = AudioLoader::new(vec![
            tone_catalog(dir.path(), "a", &["a/x.wav"])?,
            tone_catalog(dir.path(), "b", &["b/y.wav"])?,
        ])
        .with_weights(vec![1.0, 0.0]);

        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..8 {
            let sample = loader.sample(&mut rng, &spec(), Selection::Weighted)?;
            assert_eq!(sample.source_idx, 0);
        }
        Ok(())
    }

    #[test]
    fn test_forced_offset_and_exact_shape() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let loader = AudioLoader::new(vec![tone_catalog(dir.path(), "a", &["x.wav"])?]);

        let mut rng = StdRng::seed_from_u64(0);
        let sample = loader.sample(
            &mut rng,
            &SampleSpec {
                sample_rate: 8000,
                duration: 0.5,
                offset: Some(1.0),
                ..Default::default()
            },
            Selection::Global(0),
        )?;
        assert_eq!(sample.offset, Some(1.0));
        assert_eq!(sample.signal.num_frames(), 4000);
        assert_eq!(sample.signal.metadata().get("offset"), Some(&json!(1.0)));
        Ok(())
    }

    #[test]
    fn test_csv_metadata_carried_onto_sample() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = testutil::write_tone(dir.path(), "x.wav", 8000, 2.0)?;
        let mut metadata = BTreeMap::new();
        metadata.insert("genre".to_string(), json!("rock"));
        let loader = AudioLoader::new(vec![Catalog::new(
            "a",
            vec![Item::with_metadata(path.to_string_lossy(), metadata)],
        )]);

        let mut rng = StdRng::seed_from_u64(0);
        let sample = loader.sample(&mut rng, &spec(), Selection::Global(0))?;
        assert_eq!(sample.signal.metadata().get("genre"), Some(&json!("rock")));
        Ok(())
    }
}
