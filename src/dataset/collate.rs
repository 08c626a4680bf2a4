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

//! Batch assembly for dataset items.
//!
//! Collation turns a list of per-index items into column-major batches, one
//! group per loader name, preserving the loaders' declared order.

use crate::loader::Sample;
use crate::signal::Signal;
use crate::transform::TransformArgs;

use super::DatasetItem;

/// Column-major batch of samples drawn from one loader.
#[derive(Debug, Clone, Default)]
pub struct SampleBatch {
    pub signals: Vec<Signal>,
    pub source_idx: Vec<usize>,
    pub item_idx: Vec<usize>,
    pub source: Vec<String>,
    pub path: Vec<String>,
    pub offset: Vec<Option<f64>>,
    pub transform_args: Vec<Option<TransformArgs>>,
}

impl SampleBatch {
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    fn push(&mut self, sample: Sample) {
        self.signals.push(sample.signal);
        self.source_idx.push(sample.source_idx);
        self.item_idx.push(sample.item_idx);
        self.source.push(sample.source);
        self.path.push(sample.path);
        self.offset.push(sample.offset);
        self.transform_args.push(sample.transform_args);
    }
}

/// A collated batch: one [`SampleBatch`] per loader name, plus the dataset
/// indices and dataset-level transform arguments of its items.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub groups: Vec<(String, SampleBatch)>,
    pub idx: Vec<usize>,
    pub transform_args: Vec<Option<TransformArgs>>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.idx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idx.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&SampleBatch> {
        self.groups
            .iter()
            .find(|(group_name, _)| group_name == name)
            .map(|(_, batch)| batch)
    }

    /// The single group of a one-loader batch.
    pub fn flat(&self) -> Option<&SampleBatch> {
        match self.groups.as_slice() {
            [(_, batch)] => Some(batch),
            _ => None,
        }
    }
}

/// Collates items into one batch. Items must come from the same dataset, so
/// their entry names line up.
pub fn collate(items: Vec<DatasetItem>) -> Batch {
    let mut batch = Batch::default();
    for item in items {
        batch.idx.push(item.idx);
        batch.transform_args.push(item.transform_args);
        for (name, sample) in item.entries {
            match batch.groups.iter_mut().find(|(n, _)| *n == name) {
                Some((_, group)) => group.push(sample),
                None => {
                    let mut group = SampleBatch::default();
                    group.push(sample);
                    batch.groups.push((name, group));
                }
            }
        }
    }
    batch
}

/// Collates items into `n_splits` near-equal batches (sizes differ by at most
/// one, larger splits first). Used to shard one logical batch across devices.
pub fn collate_splits(items: Vec<DatasetItem>, n_splits: usize) -> Vec<Batch> {
    if n_splits <= 1 {
        return vec![collate(items)];
    }
    let total = items.len();
    let base = total / n_splits;
    let remainder = total % n_splits;

    let mut batches = Vec::with_capacity(n_splits);
    let mut items = items.into_iter();
    for split in 0..n_splits {
        let take = base + usize::from(split < remainder);
        batches.push(collate(items.by_ref().take(take).collect()));
    }
    batches
}

#[cfg(test)]
mod tests {
    use crate::signal::Signal;

    use super::*;

    fn item(idx: usize, names: &[&str]) -> DatasetItem {
        DatasetItem {
            entries: names
                .iter()
                .map(|name| {
                    (
                        name.to_string(),
                        Sample {
                            signal: Signal::zeros(0.1, 8000, 1),
                            source_idx: 0,
                            item_idx: idx,
                            source: name.to_string(),
                            path: format!("/{}/{}.wav", name, idx),
                            offset: Some(0.0),
                            transform_args: None,
                        },
                    )
                })
                .collect(),
            idx,
            transform_args: None,
        }
    }

    #[test]
    fn test_collate_groups_by_name() {
        let batch = collate(vec![
            item(0, &["vocals", "drums"]),
            item(1, &["vocals", "drums"]),
        ]);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.idx, [0, 1]);
        let names: Vec<&str> = batch.groups.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["vocals", "drums"]);
        let vocals = batch.get("vocals").unwrap();
        assert_eq!(vocals.len(), 2);
        assert_eq!(vocals.item_idx, [0, 1]);
        assert!(batch.flat().is_none());
    }

    #[test]
    fn test_flat_single_group() {
        let batch = collate(vec![item(0, &["vocals"]), item(1, &["vocals"])]);
        assert_eq!(batch.flat().unwrap().len(), 2);
    }

    #[test]
    fn test_collate_splits_near_equal() {
        let items: Vec<DatasetItem> = (0..10).map(|idx| item(idx, &["vocals"])).collect();
        let batches = collate_splits(items, 3);

        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, [4, 3, 3]);
        // Order preserved across splits.
        assert_eq!(batches[0].idx, [0, 1, 2, 3]);
        assert_eq!(batches[2].idx, [7, 8, 9]);
    }
}
