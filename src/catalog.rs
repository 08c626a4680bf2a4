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
use std::collections::BTreeMap;

use serde_json::Value;

pub mod discovery;

/// Path value marking an item that has no backing audio file. Sampling a
/// sentinel yields silence of the requested shape instead of a decode.
pub const SENTINEL_PATH: &str = "none";

/// Default audio file extensions recognized by source discovery and the
/// streaming decode pipeline.
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "flac", "mp3", "mp4"];

/// A single record in a catalog: a path plus arbitrary metadata fields
/// (e.g. columns carried over from a CSV source).
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    path: String,
    metadata: BTreeMap<String, Value>,
}

impl Item {
    /// Creates an item with no metadata.
    pub fn new<P: Into<String>>(path: P) -> Item {
        Item {
            path: path.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Creates an item carrying metadata fields.
    pub fn with_metadata<P: Into<String>>(path: P, metadata: BTreeMap<String, Value>) -> Item {
        Item {
            path: path.into(),
            metadata,
        }
    }

    /// Creates the placeholder item used to fill unmatched catalog slots.
    pub fn sentinel() -> Item {
        Item::new(SENTINEL_PATH)
    }

    pub fn is_sentinel(&self) -> bool {
        self.path == SENTINEL_PATH
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }
}

/// An ordered sequence of items belonging to one source. Catalogs are built
/// once (by discovery or by multitrack alignment) and read-only afterwards,
/// which makes concurrent sampling safe without synchronization.
#[derive(Debug, Clone)]
pub struct Catalog {
    source: String,
    items: Vec<Item>,
}

impl Catalog {
    pub fn new<S: Into<String>>(source: S, items: Vec<Item>) -> Catalog {
        Catalog {
            source: source.into(),
            items,
        }
    }

    /// The source this catalog was discovered from (directory or CSV path).
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, item_idx: usize) -> Option<&Item> {
        self.items.get(item_idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.items.iter()
    }

    // Mutators are restricted to the crate: only the multitrack aligner may
    // reshape a catalog, and only before any loader starts sampling from it.
    pub(crate) fn push(&mut self, item: Item) {
        self.items.push(item);
    }

    pub(crate) fn insert(&mut self, item_idx: usize, item: Item) {
        self.items.insert(item_idx, item);
    }
}
