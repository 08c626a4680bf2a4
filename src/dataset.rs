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

//! Map-style dataset over one or more named loaders.
//!
//! Every index is its own RNG seed, so `get(idx)` returns the same item no
//! matter which worker evaluates it, in what order, or how often.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::align::{align_catalogs, Matcher};
use crate::decode::DecodeError;
use crate::loader::{AudioLoader, Sample, SampleSpec, Selection};
use crate::transform::{Transform, TransformArgs};

pub mod collate;

/// Sampling parameters shared by every draw of a dataset.
#[derive(Debug, Clone)]
pub struct DatasetOptions {
    pub sample_rate: u32,
    pub duration: f64,
    /// Virtual length of the dataset. Indices are seeds, so this can exceed
    /// the number of underlying items.
    pub n_examples: usize,
    /// Forces every excerpt to this offset instead of a salient search.
    pub offset: Option<f64>,
    pub loudness_cutoff: f32,
    pub num_channels: usize,
    /// Aligns the loaders' catalogs positionally and mirrors the first
    /// loader's draw (item and offset) onto the rest.
    pub aligned: bool,
    /// Visits loaders in a random order per index. Declared order is restored
    /// in the returned item; only the draw order (and with it which loader is
    /// mirrored when aligned) changes.
    pub shuffle_loaders: bool,
    /// Uses each loader's shuffled global index (full coverage every
    /// `num_items` draws) instead of weighted draws with replacement.
    pub without_replacement: bool,
}

impl Default for DatasetOptions {
    fn default() -> DatasetOptions {
        DatasetOptions {
            sample_rate: 44100,
            duration: 0.5,
            n_examples: 1000,
            offset: None,
            loudness_cutoff: -40.0,
            num_channels: 1,
            aligned: false,
            shuffle_loaders: false,
            without_replacement: true,
        }
    }
}

/// One dataset index worth of samples, one per loader, in declared order.
#[derive(Debug, Clone)]
pub struct DatasetItem {
    pub entries: Vec<(String, Sample)>,
    pub idx: usize,
    /// Arguments for the dataset-level transform, drawn against the first
    /// declared loader's signal.
    pub transform_args: Option<TransformArgs>,
}

impl DatasetItem {
    pub fn get(&self, name: &str) -> Option<&Sample> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, sample)| sample)
    }

    /// Collapses a single-loader item into its sample.
    pub fn into_sample(mut self) -> Option<Sample> {
        if self.entries.len() == 1 {
            Some(self.entries.remove(0).1)
        } else {
            None
        }
    }
}

/// A deterministic, index-seeded sampling dataset.
pub struct AudioDataset {
    loaders: Vec<(String, AudioLoader)>,
    options: DatasetOptions,
    transform: Option<Arc<dyn Transform>>,
}

impl AudioDataset {
    pub fn new(loaders: Vec<(String, AudioLoader)>, options: DatasetOptions) -> AudioDataset {
        AudioDataset {
            loaders,
            options,
            transform: None,
        }
    }

    /// Creates the dataset and positionally aligns the loaders' catalogs so
    /// equal indices refer to the same song across stems. Loaders rebuild
    /// their global indices afterwards, since alignment reshapes catalogs.
    pub fn new_aligned(
        mut loaders: Vec<(String, AudioLoader)>,
        options: DatasetOptions,
        matcher: &dyn Matcher,
    ) -> AudioDataset {
        let slots = loaders
            .iter()
            .map(|(_, loader)| loader.num_sources())
            .max()
            .unwrap_or(0);
        for slot in 0..slots {
            let mut catalogs: Vec<_> = loaders
                .iter_mut()
                .filter_map(|(_, loader)| loader.catalog_mut(slot))
                .collect();
            align_catalogs(&mut catalogs, matcher);
        }
        for (_, loader) in &mut loaders {
            loader.reflatten();
        }

        let options = DatasetOptions {
            aligned: true,
            ..options
        };
        AudioDataset::new(loaders, options)
    }

    /// Attaches a dataset-level transform. Its arguments are drawn once per
    /// index against the first declared loader's signal.
    pub fn with_transform(mut self, transform: Arc<dyn Transform>) -> AudioDataset {
        self.transform = Some(transform);
        self
    }

    /// Virtual length.
    pub fn len(&self) -> usize {
        self.options.n_examples
    }

    pub fn is_empty(&self) -> bool {
        self.options.n_examples == 0
    }

    pub fn loaders(&self) -> &[(String, AudioLoader)] {
        &self.loaders
    }

    /// Draws the item for `idx`. The RNG is seeded with `idx`, which makes
    /// this a pure function of the dataset configuration.
    pub fn get(&self, idx: usize) -> Result<DatasetItem, DecodeError> {
        let mut rng = StdRng::seed_from_u64(idx as u64);

        let mut order: Vec<usize> = (0..self.loaders.len()).collect();
        if self.options.shuffle_loaders {
            order.shuffle(&mut rng);
        }

        let spec = SampleSpec {
            sample_rate: self.options.sample_rate,
            duration: self.options.duration,
            loudness_cutoff: self.options.loudness_cutoff,
            num_channels: self.options.num_channels,
            offset: self.options.offset,
        };
        let selection = if self.options.without_replacement {
            Selection::Global(idx)
        } else {
            Selection::Weighted
        };

        let mut drawn: Vec<Option<Sample>> = vec![None; self.loaders.len()];
        let mut first: Option<(usize, usize, Option<f64>)> = None;
        for loader_idx in order {
            let (_, loader) = &self.loaders[loader_idx];
            let sample = match first {
                Some((source_idx, item_idx, offset)) if self.options.aligned => {
                    // Mirror the first draw: same slot, same window.
                    let spec = SampleSpec {
                        offset: offset.or(Some(0.0)),
                        ..spec.clone()
                    };
                    loader.sample(
                        &mut rng,
                        &spec,
                        Selection::Explicit {
                            source_idx,
                            item_idx,
                        },
                    )?
                }
                _ => loader.sample(&mut rng, &spec, selection)?,
            };
            if first.is_none() {
                first = Some((sample.source_idx, sample.item_idx, sample.offset));
            }
            drawn[loader_idx] = Some(sample);
        }

        // Declared order, regardless of the visit order above.
        let entries: Vec<(String, Sample)> = self
            .loaders
            .iter()
            .zip(drawn)
            .filter_map(|((name, _), sample)| sample.map(|sample| (name.clone(), sample)))
            .collect();

        let transform_args = match (&self.transform, entries.first()) {
            (Some(transform), Some((_, sample))) => {
                Some(transform.instantiate(&mut rng, &sample.signal))
            }
            _ => None,
        };

        Ok(DatasetItem {
            entries,
            idx,
            transform_args,
        })
    }
}

/// Concatenation of several datasets, interleaved: index `i` routes to
/// dataset `i % n` at inner index `i / n`.
pub struct ConcatDataset {
    datasets: Vec<AudioDataset>,
}

impl ConcatDataset {
    pub fn new(datasets: Vec<AudioDataset>) -> ConcatDataset {
        ConcatDataset { datasets }
    }

    pub fn len(&self) -> usize {
        self.datasets.iter().map(AudioDataset::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (dataset index, inner index) for a global index.
    pub fn route(&self, idx: usize) -> (usize, usize) {
        let n = self.datasets.len();
        (idx % n, idx / n)
    }

    pub fn get(&self, idx: usize) -> Result<DatasetItem, DecodeError> {
        let (dataset_idx, inner_idx) = self.route(idx);
        self.datasets[dataset_idx].get(inner_idx)
    }
}
