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

//! Index samplers with mid-epoch resume.
//!
//! Both samplers consume their start index on the first epoch after
//! construction, so a job restored from a checkpoint picks up where it left
//! off and every later epoch runs in full.

use std::mem;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Sequential indices `0..len` with one-time resume.
pub struct ResumableSequentialSampler {
    len: usize,
    start_idx: usize,
}

impl ResumableSequentialSampler {
    /// `start_idx` indices are skipped on the first epoch only.
    pub fn new(len: usize, start_idx: usize) -> ResumableSequentialSampler {
        ResumableSequentialSampler { len, start_idx }
    }

    /// Indices for the next epoch.
    pub fn epoch(&mut self) -> Vec<usize> {
        let start = mem::take(&mut self.start_idx);
        (start.min(self.len)..self.len).collect()
    }
}

/// Deterministically shuffled indices sharded across replicas, with one-time
/// resume. Every replica constructs the same permutation from `seed + epoch`,
/// pads it to a multiple of the replica count by wrapping around, and takes
/// its own stride.
pub struct ResumableDistributedSampler {
    len: usize,
    num_replicas: usize,
    rank: usize,
    shuffle: bool,
    seed: u64,
    epoch: u64,
    start_idx: usize,
}

impl ResumableDistributedSampler {
    /// `start_idx` counts globally consumed indices; each replica skips its
    /// share (`start_idx / num_replicas`) on the first epoch.
    pub fn new(
        len: usize,
        num_replicas: usize,
        rank: usize,
        shuffle: bool,
        seed: u64,
        start_idx: usize,
    ) -> ResumableDistributedSampler {
        ResumableDistributedSampler {
            len,
            num_replicas: num_replicas.max(1),
            rank,
            shuffle,
            seed,
            epoch: 0,
            start_idx: start_idx / num_replicas.max(1),
        }
    }

    /// Indices per replica per full epoch.
    pub fn num_samples(&self) -> usize {
        self.len.div_ceil(self.num_replicas)
    }

    /// Selects the permutation for subsequent epochs. All replicas must set
    /// the same value for their shards to partition the same permutation.
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    /// This replica's indices for the current epoch.
    pub fn epoch(&mut self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.len).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch));
            indices.shuffle(&mut rng);
        }
        // Pad to a multiple of the replica count by wrapping, so every
        // replica sees the same number of indices.
        let total = self.num_samples() * self.num_replicas;
        for i in 0..total - self.len {
            let wrapped = indices[i % self.len.max(1)];
            indices.push(wrapped);
        }

        let skip = mem::take(&mut self.start_idx);
        indices
            .into_iter()
            .skip(self.rank)
            .step_by(self.num_replicas)
            .skip(skip)
            .collect()
    }
}
