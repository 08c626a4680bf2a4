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

//! Deterministic audio excerpt sampling for training data pipelines.
//!
//! trackset turns directories, CSV manifests, and sharded archives of audio
//! into reproducible streams of fixed-duration excerpts. Every dataset index
//! seeds its own RNG, so an index maps to the same excerpt regardless of
//! worker count, evaluation order, or restarts, and checkpointed jobs resume
//! mid-epoch without replaying data.
//!
//! The main entry points:
//!
//! - [`dataset::AudioDataset`], a map-style dataset over one or more named
//!   [`loader::AudioLoader`]s, optionally aligned across multitrack stems.
//! - [`stream::StreamingDecodePipeline`], a sequential pipeline over sharded
//!   `(audio, json)` archives.
//! - [`sampler`], resumable sequential and distributed index samplers.
//! - [`config`], YAML definitions for all of the above.

pub mod align;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod decode;
pub mod loader;
pub mod sampler;
pub mod signal;
pub mod stream;
pub mod transform;

#[cfg(test)]
pub(crate) mod testutil;

pub use catalog::{Catalog, Item};
pub use dataset::{AudioDataset, ConcatDataset, DatasetItem, DatasetOptions};
pub use decode::DecodeError;
pub use loader::{AudioLoader, Sample, SampleSpec, Selection};
pub use signal::Signal;
pub use transform::{Transform, TransformArgs};
