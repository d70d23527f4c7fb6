//! Bounded retry buffer for samples that could not be persisted
//!
//! - Oldest-first queue with a hard entry cap and an age cap
//! - Drop-oldest eviction, reported as a [`DataLossWarning`]
//! - Optional JSON spill file so single-shot runs retry across invocations

use crate::error::{DataLossWarning, PersistenceError};
use crate::models::Sample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default retention period (24 hours)
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Default maximum number of buffered samples
const DEFAULT_MAX_ENTRIES: usize = 1_000;

/// Configuration for the retry buffer
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Maximum number of buffered samples
    pub max_entries: usize,
    /// Maximum time a sample may wait in the buffer
    pub max_age: Duration,
    /// Spill file mirroring the buffer contents (optional)
    pub spill_path: Option<PathBuf>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_age: DEFAULT_MAX_AGE,
            spill_path: None,
        }
    }
}

/// A sample queued after a failed write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct BufferedWrite {
    pub sample: Sample,
    pub buffered_at: DateTime<Utc>,
    pub attempts: u32,
}

/// Oldest-first bounded queue of pending writes
#[derive(Debug)]
pub struct RetryBuffer {
    entries: VecDeque<BufferedWrite>,
    config: BufferConfig,
    /// Contents changed since the last spill
    dirty: bool,
    /// Eviction at load time, reported with the next append
    pending_loss: Option<DataLossWarning>,
}

impl RetryBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            entries: VecDeque::with_capacity(config.max_entries.min(1_000)),
            config,
            dirty: false,
            pending_loss: None,
        }
    }

    /// Create a buffer and reload any entries left in its spill file
    pub fn with_spill(config: BufferConfig) -> Self {
        let mut buffer = Self::new(config);

        if let Some(path) = buffer.config.spill_path.clone() {
            if path.exists() {
                match load_spill(&path) {
                    Ok(entries) => {
                        info!(path = %path.display(), entries = entries.len(), "Loaded buffered samples from spill file");
                        buffer.entries.extend(entries);
                        // Config may have shrunk since the file was written
                        if buffer.entries.len() > buffer.config.max_entries {
                            let excess = buffer.entries.len() - buffer.config.max_entries;
                            let dropped: Vec<_> = buffer.entries.drain(..excess).collect();
                            buffer.dirty = true;
                            buffer.pending_loss = loss_warning(&dropped);
                            warn!(dropped = excess, "Spill file exceeds buffer capacity, dropped oldest entries");
                        }
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to load spill file, starting fresh");
                    }
                }
            }
        }

        buffer
    }

    /// Queue a sample behind everything already buffered.
    ///
    /// Evicts from the front when the entry cap would be exceeded.
    pub fn push(&mut self, sample: Sample, now: DateTime<Utc>) -> Option<DataLossWarning> {
        let mut dropped = Vec::new();
        while !self.entries.is_empty() && self.entries.len() >= self.config.max_entries {
            if let Some(entry) = self.entries.pop_front() {
                dropped.push(entry);
            }
        }

        self.entries.push_back(BufferedWrite {
            sample,
            buffered_at: now,
            attempts: 1,
        });
        self.dirty = true;

        loss_warning(&dropped)
    }

    /// Drop entries older than the age cap
    pub fn expire(&mut self, now: DateTime<Utc>) -> Option<DataLossWarning> {
        let cutoff = chrono::Duration::from_std(self.config.max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))?;

        let mut dropped = Vec::new();
        while let Some(front) = self.entries.front() {
            if front.buffered_at < cutoff {
                if let Some(entry) = self.entries.pop_front() {
                    dropped.push(entry);
                }
            } else {
                break;
            }
        }

        if !dropped.is_empty() {
            self.dirty = true;
        }
        loss_warning(&dropped)
    }

    /// Loss recorded outside an append call, handed out once
    pub fn take_pending_loss(&mut self) -> Option<DataLossWarning> {
        self.pending_loss.take()
    }

    pub(crate) fn front(&self) -> Option<&BufferedWrite> {
        self.entries.front()
    }

    pub(crate) fn pop_front(&mut self) -> Option<BufferedWrite> {
        let entry = self.entries.pop_front();
        if entry.is_some() {
            self.dirty = true;
        }
        entry
    }

    /// Count a failed retry against the oldest entry
    pub(crate) fn record_failed_attempt(&mut self) {
        if let Some(front) = self.entries.front_mut() {
            front.attempts = front.attempts.saturating_add(1);
            self.dirty = true;
        }
    }

    /// Samples currently buffered, oldest first
    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.entries.iter().map(|e| &e.sample)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.config.max_entries
    }

    /// Mirror the buffer to its spill file if it changed.
    ///
    /// An empty buffer removes the file.
    pub fn persist(&mut self) -> Result<(), PersistenceError> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(path) = self.config.spill_path.clone() {
            if self.entries.is_empty() {
                match fs::remove_file(&path) {
                    Ok(()) => debug!(path = %path.display(), "Removed drained spill file"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(PersistenceError::io(path, e)),
                }
            } else {
                save_spill(&path, &self.entries)?;
                debug!(path = %path.display(), entries = self.entries.len(), "Buffer spilled to disk");
            }
        }

        self.dirty = false;
        Ok(())
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            entries: self.entries.len(),
            capacity: self.config.max_entries,
            oldest: self.entries.front().map(|e| e.buffered_at),
            newest: self.entries.back().map(|e| e.buffered_at),
            max_age_seconds: self.config.max_age.as_secs(),
        }
    }
}

/// Buffer statistics
#[derive(Debug, Clone)]
pub struct BufferStats {
    pub entries: usize,
    pub capacity: usize,
    /// When the oldest entry was first buffered
    pub oldest: Option<DateTime<Utc>>,
    /// When the newest entry was first buffered
    pub newest: Option<DateTime<Utc>>,
    pub max_age_seconds: u64,
}

fn loss_warning(dropped: &[BufferedWrite]) -> Option<DataLossWarning> {
    let first = dropped.first()?;
    let last = dropped.last()?;
    Some(DataLossWarning {
        dropped: dropped.len(),
        oldest_dropped: first.sample.timestamp,
        newest_dropped: last.sample.timestamp,
    })
}

/// Write atomically: temp file, fsync, rename
fn save_spill(path: &Path, entries: &VecDeque<BufferedWrite>) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
    }

    let json = serde_json::to_vec(entries)?;

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| PersistenceError::io(&temp_path, e))?;

    file.write_all(&json)
        .map_err(|e| PersistenceError::io(&temp_path, e))?;
    file.sync_all()
        .map_err(|e| PersistenceError::io(&temp_path, e))?;

    fs::rename(&temp_path, path).map_err(|e| PersistenceError::io(path, e))?;
    Ok(())
}

fn load_spill(path: &Path) -> Result<Vec<BufferedWrite>, PersistenceError> {
    let data = fs::read(path).map_err(|e| PersistenceError::io(path, e))?;
    Ok(serde_json::from_slice(&data)?)
}
