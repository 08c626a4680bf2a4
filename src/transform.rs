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

//! Transform hook points.
//!
//! Samplers draw transform arguments with the per-index RNG so augmentation is
//! as reproducible as excerpt selection. The actual signal processing lives
//! behind [`Transform`]; this crate only schedules it.

use std::collections::BTreeMap;

use rand::rngs::StdRng;

use crate::signal::Signal;

/// Arguments drawn for one application of a transform, keyed by parameter
/// name. Serializable so batches can carry them to a trainer.
pub type TransformArgs = BTreeMap<String, serde_json::Value>;

/// A randomized signal transform. `instantiate` draws the arguments for one
/// application from the caller's RNG; `apply` runs the transform with those
/// arguments. Splitting the two keeps argument drawing deterministic and
/// batchable while letting `apply` run anywhere (or not at all).
pub trait Transform: Send + Sync {
    fn name(&self) -> &str;

    /// Draws arguments for one application. May inspect the signal (e.g. its
    /// duration) to bound the draw.
    fn instantiate(&self, rng: &mut StdRng, signal: &Signal) -> TransformArgs;

    /// Applies the transform with previously drawn arguments.
    fn apply(&self, signal: Signal, args: &TransformArgs) -> Signal;
}
