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

//! Streaming decode pipeline over sharded archives.
//!
//! Shards yield `(key, bytes)` entries; consecutive entries sharing a basename
//! form one record group (`song42.flac` + `song42.json`). Each group fans out
//! into up to `num_excerpts` loudness-qualifying excerpts carrying the group's
//! JSON metadata. Failures are routed through a handler callback so a bad
//! shard or entry can be logged and skipped instead of ending the epoch.

use std::collections::VecDeque;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use tracing::warn;

use crate::catalog::{discovery::matches_extension, AUDIO_EXTENSIONS};
use crate::decode::{self, DecodeError};
use crate::signal::Signal;
use crate::transform::{Transform, TransformArgs};

/// One archive entry: a key (file name within the shard) and its bytes.
#[derive(Debug, Clone)]
pub struct Entry {
    pub key: String,
    pub data: Vec<u8>,
}

impl Entry {
    pub fn new<K: Into<String>>(key: K, data: Vec<u8>) -> Entry {
        Entry {
            key: key.into(),
            data,
        }
    }

    /// Key without its final extension; entries sharing a basename belong to
    /// the same record.
    fn basename(&self) -> &str {
        self.key
            .rsplit_once('.')
            .map(|(base, _)| base)
            .unwrap_or(&self.key)
    }

    fn extension(&self) -> Option<&str> {
        self.key.rsplit_once('.').map(|(_, ext)| ext)
    }
}

/// Error types for the streaming pipeline.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Failed to open shard {url}: {reason}")]
    ShardOpen { url: String, reason: String },

    #[error("Failed to read entry from shard {url}: {reason}")]
    EntryRead { url: String, reason: String },

    #[error("Invalid JSON in entry {key}: {source}")]
    Json {
        key: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Decides whether a stream error is suppressed (continue) or propagated
/// (ends the iteration).
pub type Handler = fn(&StreamError) -> bool;

/// Logs the error and keeps going.
pub fn log_and_continue(error: &StreamError) -> bool {
    warn!(error = %error, "Skipping failed stream element");
    true
}

/// Propagates every error.
pub fn reraise(_error: &StreamError) -> bool {
    false
}

/// Opens a shard URL into a stream of entries. Implementations wrap whatever
/// transport holds the archives (local tar files, object storage, a test
/// fixture in memory).
pub trait ShardOpener: Send + Sync {
    fn open(
        &self,
        url: &str,
    ) -> Result<Box<dyn Iterator<Item = Result<Entry, StreamError>> + Send>, StreamError>;
}

/// Parameters of a streaming pipeline.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub sample_rate: u32,
    /// Excerpt duration in seconds.
    pub duration: f64,
    pub loudness_cutoff: f32,
    pub num_channels: usize,
    /// Maximum qualifying excerpts cut per audio entry.
    pub num_excerpts: usize,
    /// Hard cap applied after the qualification pass.
    pub max_excerpts: Option<usize>,
    /// Downmix by picking a random channel instead of averaging.
    pub random_mono_channel: bool,
    pub seed: u64,
    /// Nominal epoch length reported by `len()`; streaming sources have no
    /// inherent length.
    pub n_examples: usize,
    pub batch_size: Option<usize>,
    /// Emits the trailing partial batch instead of dropping it.
    pub allow_partial: bool,
    /// Eagerly applies the transform instead of only drawing its arguments.
    pub run_transform: bool,
    /// Audio entry extensions.
    pub extensions: Vec<String>,
}

impl Default for StreamOptions {
    fn default() -> StreamOptions {
        StreamOptions {
            sample_rate: 44100,
            duration: 5.0,
            loudness_cutoff: -40.0,
            num_channels: 1,
            num_excerpts: 50,
            max_excerpts: None,
            random_mono_channel: false,
            seed: 0,
            n_examples: 10_000_000,
            batch_size: None,
            allow_partial: false,
            run_transform: false,
            extensions: AUDIO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// One decoded excerpt flowing out of the pipeline.
#[derive(Debug, Clone)]
pub struct StreamRecord {
    pub signal: Signal,
    pub transform_args: Option<TransformArgs>,
}

/// Streaming decode pipeline over a list of shard URLs.
pub struct StreamingDecodePipeline {
    urls: Vec<String>,
    opener: Arc<dyn ShardOpener>,
    options: StreamOptions,
    transform: Option<Arc<dyn Transform>>,
    handler: Handler,
}

impl StreamingDecodePipeline {
    pub fn new(
        urls: Vec<String>,
        opener: Arc<dyn ShardOpener>,
        options: StreamOptions,
    ) -> StreamingDecodePipeline {
        StreamingDecodePipeline {
            urls,
            opener,
            options,
            transform: None,
            handler: log_and_continue,
        }
    }

    pub fn with_transform(mut self, transform: Arc<dyn Transform>) -> StreamingDecodePipeline {
        self.transform = Some(transform);
        self
    }

    pub fn with_handler(mut self, handler: Handler) -> StreamingDecodePipeline {
        self.handler = handler;
        self
    }

    /// Nominal length, for epoch accounting.
    pub fn len(&self) -> usize {
        self.options.n_examples
    }

    pub fn is_empty(&self) -> bool {
        self.options.n_examples == 0
    }

    /// Iterates over decoded records. At most `n_examples` records are
    /// yielded; a propagated error ends the iteration.
    pub fn records(&self) -> Records<'_> {
        Records {
            pipeline: self,
            urls: self.urls.iter(),
            entries: None,
            current_url: String::new(),
            group: Vec::new(),
            queue: VecDeque::new(),
            rng: StdRng::seed_from_u64(self.options.seed),
            emitted: 0,
            fused: false,
        }
    }

    /// Iterates over batches of records. The trailing partial batch is
    /// dropped unless `allow_partial` is set. `batch_size` defaults to 1.
    pub fn batches(&self) -> Batches<'_> {
        Batches {
            records: self.records(),
            batch_size: self.options.batch_size.unwrap_or(1).max(1),
            allow_partial: self.options.allow_partial,
            buffer: Vec::new(),
            done: false,
        }
    }

    /// Decodes one basename group into records. Recoverable decode failures
    /// and groups without JSON metadata produce no records.
    fn process_group(
        &self,
        url: &str,
        group: Vec<Entry>,
        rng: &mut StdRng,
    ) -> Result<Vec<StreamRecord>, StreamError> {
        // A JSON entry is any key containing "json" (".json", ".info.json",
        // ".json.txt"). Most recent one wins; groups without one are dropped.
        let mut json: Option<Value> = None;
        for entry in group.iter().filter(|e| e.key.contains("json")) {
            json = Some(serde_json::from_slice(&entry.data).map_err(|source| {
                StreamError::Json {
                    key: entry.key.clone(),
                    source,
                }
            })?);
        }
        let Some(json) = json else {
            return Ok(Vec::new());
        };

        let Some(audio) = group
            .into_iter()
            .find(|e| matches_extension(&e.key, &self.options.extensions))
        else {
            return Ok(Vec::new());
        };

        let key = audio.key.clone();
        let extension = audio.extension().map(str::to_string);
        let signal = match decode::decode_bytes(audio.data, extension.as_deref()) {
            Ok(signal) => signal,
            Err(e) if e.is_recoverable() => {
                warn!(url = %url, key = %key, error = %e, "Skipping undecodable entry");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let opts = &self.options;
        let target_frames = (opts.duration * opts.sample_rate as f64).round() as usize;
        let excerpts = decode::salient_excerpts(
            &signal,
            opts.duration,
            opts.loudness_cutoff,
            opts.num_excerpts,
            opts.max_excerpts,
        );

        let mut records = Vec::with_capacity(excerpts.len());
        for excerpt in excerpts {
            let signal = if opts.num_channels == 1 {
                if opts.random_mono_channel {
                    excerpt.signal.to_rand_mono(rng)
                } else {
                    excerpt.signal.to_mono()
                }
            } else {
                excerpt.signal
            };
            let mut signal = signal
                .resample(opts.sample_rate)
                .map_err(StreamError::Decode)?
                .zero_pad_to(target_frames)
                .slice_frames(0, target_frames);
            signal.set_metadata("json", json.clone());
            signal.set_metadata("offset", serde_json::json!(excerpt.offset));

            let transform_args = self.transform.as_ref().map(|t| t.instantiate(rng, &signal));
            let signal = match (&self.transform, &transform_args, opts.run_transform) {
                (Some(transform), Some(args), true) => transform.apply(signal, args),
                _ => signal,
            };
            records.push(StreamRecord {
                signal,
                transform_args,
            });
        }
        Ok(records)
    }
}

/// Record iterator over a pipeline. See [`StreamingDecodePipeline::records`].
pub struct Records<'a> {
    pipeline: &'a StreamingDecodePipeline,
    urls: std::slice::Iter<'a, String>,
    entries: Option<Box<dyn Iterator<Item = Result<Entry, StreamError>> + Send>>,
    current_url: String,
    group: Vec<Entry>,
    queue: VecDeque<StreamRecord>,
    rng: StdRng,
    emitted: usize,
    fused: bool,
}

impl Records<'_> {
    /// Runs the handler; returns the error back when it must propagate.
    fn handle(&mut self, error: StreamError) -> Option<StreamError> {
        if (self.pipeline.handler)(&error) {
            None
        } else {
            self.fused = true;
            Some(error)
        }
    }

    fn flush_group(&mut self) -> Option<StreamError> {
        if self.group.is_empty() {
            return None;
        }
        let group = std::mem::take(&mut self.group);
        match self
            .pipeline
            .process_group(&self.current_url, group, &mut self.rng)
        {
            Ok(records) => {
                self.queue.extend(records);
                None
            }
            Err(e) => self.handle(e),
        }
    }
}

impl Iterator for Records<'_> {
    type Item = Result<StreamRecord, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.fused || self.emitted >= self.pipeline.options.n_examples {
                return None;
            }
            if let Some(record) = self.queue.pop_front() {
                self.emitted += 1;
                return Some(Ok(record));
            }

            let Some(entries) = self.entries.as_mut() else {
                // Advance to the next shard.
                let Some(url) = self.urls.next() else {
                    return None;
                };
                self.current_url = url.clone();
                match self.pipeline.opener.open(url) {
                    Ok(entries) => self.entries = Some(entries),
                    Err(e) => {
                        if let Some(e) = self.handle(e) {
                            return Some(Err(e));
                        }
                    }
                }
                continue;
            };

            match entries.next() {
                Some(Ok(entry)) => {
                    let same_group = self
                        .group
                        .last()
                        .is_some_and(|last| last.basename() == entry.basename());
                    if same_group || self.group.is_empty() {
                        self.group.push(entry);
                    } else {
                        let flush = self.flush_group();
                        self.group.push(entry);
                        if let Some(e) = flush {
                            return Some(Err(e));
                        }
                    }
                }
                Some(Err(e)) => {
                    if let Some(e) = self.handle(e) {
                        return Some(Err(e));
                    }
                }
                None => {
                    // Shard exhausted: flush its last group.
                    self.entries = None;
                    if let Some(e) = self.flush_group() {
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}

/// Batch iterator over a pipeline. See [`StreamingDecodePipeline::batches`].
pub struct Batches<'a> {
    records: Records<'a>,
    batch_size: usize,
    allow_partial: bool,
    buffer: Vec<StreamRecord>,
    done: bool,
}

impl Iterator for Batches<'_> {
    type Item = Result<Vec<StreamRecord>, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.records.next() {
                Some(Ok(record)) => {
                    self.buffer.push(record);
                    if self.buffer.len() == self.batch_size {
                        return Some(Ok(std::mem::take(&mut self.buffer)));
                    }
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    if self.allow_partial && !self.buffer.is_empty() {
                        return Some(Ok(std::mem::take(&mut self.buffer)));
                    }
                    return None;
                }
            }
        }
    }
}
