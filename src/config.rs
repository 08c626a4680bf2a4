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

//! YAML definitions for loaders, datasets, and streaming pipelines.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::align::ParentDirMatcher;
use crate::catalog::discovery::{self, DiscoveryError};
use crate::catalog::AUDIO_EXTENSIONS;
use crate::dataset::{AudioDataset, DatasetOptions};
use crate::loader::AudioLoader;
use crate::stream::{ShardOpener, StreamOptions, StreamingDecodePipeline};

/// Error types for configuration parsing and building.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yml::Error),

    #[error("Discovery error: {0}")]
    DiscoveryError(#[from] DiscoveryError),
}

fn default_extensions() -> Vec<String> {
    AUDIO_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

fn default_true() -> bool {
    true
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_duration() -> f64 {
    0.5
}

fn default_stream_duration() -> f64 {
    5.0
}

fn default_n_examples() -> usize {
    1000
}

fn default_stream_examples() -> usize {
    10_000_000
}

fn default_loudness_cutoff() -> f32 {
    -40.0
}

fn default_num_channels() -> usize {
    1
}

fn default_num_excerpts() -> usize {
    50
}

/// A loader definition: where to find audio and how to permute it.
#[derive(Deserialize, Debug, Clone)]
pub struct LoaderDefinition {
    /// Directories to scan or CSV files to read, one catalog each.
    sources: Vec<PathBuf>,
    /// Relative source weights for draws with replacement.
    #[serde(default)]
    weights: Option<Vec<f64>>,
    #[serde(default = "default_extensions")]
    ext: Vec<String>,
    #[serde(default = "default_true")]
    shuffle: bool,
    #[serde(default)]
    shuffle_seed: u64,
}

impl LoaderDefinition {
    /// Discovers the sources and builds the loader.
    pub fn build(&self) -> Result<AudioLoader, ConfigError> {
        let catalogs = discovery::read_sources(&self.sources, &self.ext)?;
        info!(
            sources = catalogs.len(),
            items = catalogs.iter().map(|c| c.len()).sum::<usize>(),
            "Built loader"
        );
        let mut loader =
            AudioLoader::new(catalogs).with_shuffle(self.shuffle, self.shuffle_seed);
        if let Some(weights) = &self.weights {
            loader = loader.with_weights(weights.clone());
        }
        Ok(loader)
    }
}

#[derive(Deserialize, Debug, Clone)]
struct NamedLoaderDefinition {
    name: String,
    #[serde(flatten)]
    loader: LoaderDefinition,
}

/// A dataset definition: named loaders plus sampling parameters.
#[derive(Deserialize, Debug, Clone)]
pub struct DatasetDefinition {
    loaders: Vec<NamedLoaderDefinition>,
    #[serde(default = "default_sample_rate")]
    sample_rate: u32,
    #[serde(default = "default_duration")]
    duration: f64,
    #[serde(default = "default_n_examples")]
    n_examples: usize,
    #[serde(default)]
    offset: Option<f64>,
    #[serde(default = "default_loudness_cutoff")]
    loudness_cutoff: f32,
    #[serde(default = "default_num_channels")]
    num_channels: usize,
    #[serde(default)]
    aligned: bool,
    #[serde(default)]
    shuffle_loaders: bool,
    #[serde(default = "default_true")]
    without_replacement: bool,
}

impl DatasetDefinition {
    pub fn from_path(path: &Path) -> Result<DatasetDefinition, ConfigError> {
        Ok(serde_yml::from_str(&fs::read_to_string(path)?)?)
    }

    /// Discovers all sources and builds the dataset. Aligned datasets use the
    /// parent-directory matcher.
    pub fn build(&self) -> Result<AudioDataset, ConfigError> {
        let mut loaders = Vec::with_capacity(self.loaders.len());
        for definition in &self.loaders {
            loaders.push((definition.name.clone(), definition.loader.build()?));
        }
        let options = DatasetOptions {
            sample_rate: self.sample_rate,
            duration: self.duration,
            n_examples: self.n_examples,
            offset: self.offset,
            loudness_cutoff: self.loudness_cutoff,
            num_channels: self.num_channels,
            aligned: self.aligned,
            shuffle_loaders: self.shuffle_loaders,
            without_replacement: self.without_replacement,
        };
        if self.aligned {
            Ok(AudioDataset::new_aligned(loaders, options, &ParentDirMatcher))
        } else {
            Ok(AudioDataset::new(loaders, options))
        }
    }
}

/// A streaming pipeline definition: shard URLs plus decode parameters. The
/// shard transport is supplied by the caller at build time.
#[derive(Deserialize, Debug, Clone)]
pub struct StreamDefinition {
    urls: Vec<String>,
    #[serde(default = "default_sample_rate")]
    sample_rate: u32,
    #[serde(default = "default_stream_duration")]
    duration: f64,
    #[serde(default = "default_loudness_cutoff")]
    loudness_cutoff: f32,
    #[serde(default = "default_num_channels")]
    num_channels: usize,
    #[serde(default = "default_num_excerpts")]
    num_excerpts: usize,
    #[serde(default)]
    max_excerpts: Option<usize>,
    #[serde(default)]
    random_mono_channel: bool,
    #[serde(default)]
    seed: u64,
    #[serde(default = "default_stream_examples")]
    n_examples: usize,
    #[serde(default)]
    batch_size: Option<usize>,
    #[serde(default)]
    allow_partial: bool,
    #[serde(default = "default_extensions")]
    ext: Vec<String>,
}

impl StreamDefinition {
    pub fn from_path(path: &Path) -> Result<StreamDefinition, ConfigError> {
        Ok(serde_yml::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn build(&self, opener: Arc<dyn ShardOpener>) -> StreamingDecodePipeline {
        let options = StreamOptions {
            sample_rate: self.sample_rate,
            duration: self.duration,
            loudness_cutoff: self.loudness_cutoff,
            num_channels: self.num_channels,
            num_excerpts: self.num_excerpts,
            max_excerpts: self.max_excerpts,
            random_mono_channel: self.random_mono_channel,
            seed: self.seed,
            n_examples: self.n_examples,
            batch_size: self.batch_size,
            allow_partial: self.allow_partial,
            run_transform: false,
            extensions: self.ext.clone(),
        };
        StreamingDecodePipeline::new(self.urls.clone(), opener, options)
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil;

    use super::*;

    #[test]
    fn test_dataset_definition_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let definition: DatasetDefinition = serde_yml::from_str(
            r#"
loaders:
  - name: vocals
    sources:
      - /data/vocals
"#,
        )?;
        assert_eq!(definition.sample_rate, 44100);
        assert_eq!(definition.duration, 0.5);
        assert_eq!(definition.n_examples, 1000);
        assert!(definition.without_replacement);
        assert!(!definition.aligned);
        assert_eq!(definition.loaders[0].loader.ext, default_extensions());
        Ok(())
    }

    #[test]
    fn test_dataset_build_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        for song in ["s1", "s2"] {
            testutil::write_tone(
                &dir.path().join("vocals"),
                &format!("{song}/vocals.wav"),
                8000,
                2.0,
            )?;
        }

        let yaml = format!(
            r#"
loaders:
  - name: vocals
    sources:
      - {}
    ext: [wav]
    shuffle_seed: 3
sample_rate: 8000
duration: 0.5
n_examples: 4
"#,
            dir.path().join("vocals").display()
        );
        let definition: DatasetDefinition = serde_yml::from_str(&yaml)?;
        let dataset = definition.build()?;

        assert_eq!(dataset.len(), 4);
        let item = dataset.get(0)?;
        let sample = item.into_sample().unwrap();
        assert_eq!(sample.signal.sample_rate(), 8000);
        assert_eq!(sample.signal.num_frames(), 4000);
        Ok(())
    }

    #[test]
    fn test_stream_definition_parse() -> Result<(), Box<dyn std::error::Error>> {
        let definition: StreamDefinition = serde_yml::from_str(
            r#"
urls: ["shard-0", "shard-1"]
duration: 2.0
max_excerpts: 4
batch_size: 8
"#,
        )?;
        assert_eq!(definition.urls.len(), 2);
        assert_eq!(definition.duration, 2.0);
        assert_eq!(definition.num_excerpts, 50);
        assert_eq!(definition.max_excerpts, Some(4));
        assert_eq!(definition.batch_size, Some(8));
        assert_eq!(definition.n_examples, 10_000_000);
        Ok(())
    }
}
