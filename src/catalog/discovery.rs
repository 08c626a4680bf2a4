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

//! Catalog discovery from directories and CSV files.
//!
//! A source is either a directory (scanned recursively for files matching an
//! extension allow-list) or a CSV file with a `path` column; all other CSV
//! columns are carried as item metadata.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use super::{Catalog, Item};

/// Error types for catalog discovery.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("CSV file {0} has no 'path' column")]
    MissingPathColumn(PathBuf),
}

/// Reads each source into a catalog. Directory sources are scanned
/// recursively for files matching the extension allow-list; `.csv` sources
/// are parsed row by row. Entries in `ext` may be plain extensions (`"wav"`,
/// `".flac"`) or file-name suffixes (`"vocals.wav"`).
pub fn read_sources(sources: &[PathBuf], ext: &[String]) -> Result<Vec<Catalog>, DiscoveryError> {
    sources
        .iter()
        .map(|source| {
            let items = if source.extension().is_some_and(|e| e == "csv") {
                read_csv(source)?
            } else {
                let mut items = Vec::new();
                scan_dir(source, ext, &mut items)?;
                // Directory iteration order is filesystem-dependent; sort so
                // catalogs (and the permutations built on them) are stable.
                items.sort_by(|a, b| a.path().cmp(b.path()));
                items
            };
            debug!(
                source = %source.display(),
                items = items.len(),
                "Discovered catalog"
            );
            Ok(Catalog::new(source.to_string_lossy(), items))
        })
        .collect()
}

/// Returns true if the file name matches one of the allow-list entries.
pub fn matches_extension(file_name: &str, ext: &[String]) -> bool {
    ext.iter().any(|e| {
        let e = e.trim_start_matches('.');
        if e.contains('.') {
            file_name.ends_with(e)
        } else {
            Path::new(file_name)
                .extension()
                .is_some_and(|file_ext| file_ext.eq_ignore_ascii_case(e))
        }
    })
}

fn scan_dir(path: &Path, ext: &[String], items: &mut Vec<Item>) -> Result<(), DiscoveryError> {
    for entry in fs::read_dir(path)? {
        let path = entry?.path();

        if path.is_dir() {
            scan_dir(&path, ext, items)?;
            continue;
        }

        let file_name = match path.file_name().and_then(|f| f.to_str()) {
            Some(file_name) => file_name,
            None => continue,
        };
        if matches_extension(file_name, ext) {
            items.push(Item::new(path.to_string_lossy()));
        }
    }

    Ok(())
}

fn read_csv(path: &Path) -> Result<Vec<Item>, DiscoveryError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let path_column = headers
        .iter()
        .position(|h| h == "path")
        .ok_or_else(|| DiscoveryError::MissingPathColumn(path.to_path_buf()))?;

    let mut items = Vec::new();
    for record in reader.records() {
        let record = record?;
        let item_path = record.get(path_column).unwrap_or_default().to_string();
        let metadata: BTreeMap<String, Value> = headers
            .iter()
            .zip(record.iter())
            .filter(|(header, _)| *header != "path")
            .map(|(header, value)| (header.to_string(), Value::String(value.to_string())))
            .collect();
        items.push(Item::with_metadata(item_path, metadata));
    }

    Ok(items)
}
