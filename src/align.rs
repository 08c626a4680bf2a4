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

//! Positional alignment of multitrack catalogs.
//!
//! Stem catalogs (vocals, drums, bass, ...) discovered from the same corpus
//! must line up item-for-item so that index `i` in every catalog refers to the
//! same song. Songs missing a stem get a sentinel item in that slot, which
//! samples as silence.

use std::path::Path;

use crate::catalog::{Catalog, Item};

/// Decides whether two catalog items refer to the same underlying recording.
pub trait Matcher {
    fn compare(&self, a: &str, b: &str) -> bool;
}

/// Matches items by their parent directory, the usual layout for multitrack
/// corpora (`<song>/vocals.wav`, `<song>/drums.wav`).
pub struct ParentDirMatcher;

impl Matcher for ParentDirMatcher {
    fn compare(&self, a: &str, b: &str) -> bool {
        Path::new(a).parent() == Path::new(b).parent()
    }
}

/// Aligns catalogs positionally against the longest one (ties broken by
/// argument order). At each reference position, a catalog whose item does not
/// match gets a sentinel inserted there; catalogs that run out get sentinels
/// appended. Afterwards every catalog is padded with sentinels to a common
/// length, so equal indices always refer to the same song or to silence.
pub fn align_catalogs(catalogs: &mut [&mut Catalog], matcher: &dyn Matcher) {
    if catalogs.is_empty() {
        return;
    }

    let reference_idx = catalogs
        .iter()
        .enumerate()
        .max_by_key(|(i, c)| (c.len(), std::cmp::Reverse(*i)))
        .map(|(i, _)| i)
        .unwrap_or(0);
    // The reference may itself receive inserts below, so walk a snapshot.
    let reference: Vec<String> = catalogs[reference_idx]
        .iter()
        .map(|item| item.path().to_string())
        .collect();

    for catalog in catalogs.iter_mut() {
        for (i, reference_path) in reference.iter().enumerate() {
            match catalog.get(i) {
                None => catalog.push(Item::sentinel()),
                Some(item) if !matcher.compare(item.path(), reference_path) => {
                    catalog.insert(i, Item::sentinel());
                }
                Some(_) => {}
            }
        }
    }

    let max_len = catalogs.iter().map(|c| c.len()).max().unwrap_or(0);
    for catalog in catalogs.iter_mut() {
        while catalog.len() < max_len {
            catalog.push(Item::sentinel());
        }
    }
}
