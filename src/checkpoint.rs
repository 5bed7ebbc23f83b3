//! Partial-result persistence for long sweeps.
//!
//! After every (model, combination) pair is exhausted across all measures the
//! sweep hands its rows to a [`CheckpointSink`]. [`JsonlCheckpointSink`]
//! appends one JSON line per batch from a background writer thread, holding
//! an exclusive lock on the file for as long as the writer lives.
//! [`Checkpoint::load`] reads such a file back so an interrupted sweep can be
//! resumed.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use fs2::FileExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::table::TableSnapshot;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("checkpoint channel closed")]
    Closed,
    #[error("checkpoint worker failed: {0}")]
    Join(String),
    #[error("checkpoint file {} is locked by another writer", .0.display())]
    Locked(PathBuf),
    #[error("checkpoint belongs to a different sweep (expected {expected}, found {found})")]
    Mismatch { expected: String, found: String },
}

/// Rows of one completed (model, combination) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointBatch {
    pub fingerprint: String,
    pub model: String,
    pub combination: String,
    pub rows: TableSnapshot,
}

pub trait CheckpointSink: Send + Sync {
    fn record(&self, batch: CheckpointBatch) -> Result<(), CheckpointError>;
}

#[derive(Clone)]
pub struct JsonlCheckpointSink {
    sender: mpsc::Sender<CheckpointBatch>,
}

pub struct CheckpointWorker {
    handle: Option<std::thread::JoinHandle<Result<(), CheckpointError>>>,
}

impl CheckpointWorker {
    /// Wait for every queued batch to be flushed. Drop all sink clones first.
    pub fn join(mut self) -> Result<(), CheckpointError> {
        let handle = self.handle.take();
        match handle {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(CheckpointError::Join("checkpoint worker panicked".to_string())),
            },
            None => Ok(()),
        }
    }
}

impl JsonlCheckpointSink {
    /// Start a fresh checkpoint file, truncating any previous content.
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, CheckpointWorker), CheckpointError> {
        let file = open_locked(path.as_ref())?;
        file.set_len(0)?;
        Ok(Self::spawn(file))
    }

    /// Continue an existing checkpoint file (used when resuming). A final
    /// line without its newline is cut off first so new batches start on a
    /// line of their own.
    pub fn append(path: impl AsRef<Path>) -> Result<(Self, CheckpointWorker), CheckpointError> {
        let path = path.as_ref();
        let file = open_locked(path)?;
        let len = file.metadata()?.len();
        let keep = complete_prefix_len(&file, len)?;
        if keep < len {
            warn!(
                path = %path.display(),
                dropped_bytes = len - keep,
                "dropping partial checkpoint line before appending"
            );
            file.set_len(keep)?;
        }
        Ok(Self::spawn(file))
    }

    fn spawn(file: File) -> (Self, CheckpointWorker) {
        let (sender, receiver) = mpsc::channel::<CheckpointBatch>();
        let handle = std::thread::spawn(move || write_checkpoint_loop(file, receiver));
        (
            Self { sender },
            CheckpointWorker {
                handle: Some(handle),
            },
        )
    }
}

impl CheckpointSink for JsonlCheckpointSink {
    fn record(&self, batch: CheckpointBatch) -> Result<(), CheckpointError> {
        self.sender.send(batch).map_err(|_| CheckpointError::Closed)
    }
}

fn open_locked(path: &Path) -> Result<File, CheckpointError> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;
    file.try_lock_exclusive()
        .map_err(|_| CheckpointError::Locked(path.to_path_buf()))?;
    Ok(file)
}

/// Length of the file up to and including its last newline.
fn complete_prefix_len(file: &File, len: u64) -> Result<u64, CheckpointError> {
    const CHUNK: u64 = 4096;
    let mut reader: &File = file;
    let mut buf = vec![0u8; CHUNK as usize];
    let mut end = len;
    while end > 0 {
        let start = end.saturating_sub(CHUNK);
        let chunk = &mut buf[..(end - start) as usize];
        reader.seek(SeekFrom::Start(start))?;
        reader.read_exact(chunk)?;
        if let Some(pos) = chunk.iter().rposition(|b| *b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

fn write_checkpoint_loop(
    file: File,
    receiver: mpsc::Receiver<CheckpointBatch>,
) -> Result<(), CheckpointError> {
    let mut writer = BufWriter::new(file);
    for batch in receiver {
        let line =
            serde_json::to_string(&batch).map_err(|e| CheckpointError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
        // Flushed per batch.
        writer.flush()?;
    }
    writer.flush()?;
    Ok(())
}

/// Completed batches read back from a checkpoint file.
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    fingerprint: Option<String>,
    batches: IndexMap<(String, String), TableSnapshot>,
}

impl Checkpoint {
    /// Read a JSONL checkpoint. A malformed final line (a write cut short by
    /// a crash) is skipped; malformed lines elsewhere are errors. Every batch
    /// must carry the same fingerprint.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;
        let last = lines.iter().rposition(|l| !l.trim().is_empty());

        let mut checkpoint = Checkpoint::default();
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let batch: CheckpointBatch = match serde_json::from_str(line) {
                Ok(batch) => batch,
                Err(e) if Some(idx) == last => {
                    warn!(path = %path.display(), line = idx + 1, error = %e, "skipping truncated checkpoint line");
                    continue;
                }
                Err(e) => {
                    return Err(CheckpointError::Serde(format!("line {}: {e}", idx + 1)));
                }
            };
            checkpoint.insert(batch)?;
        }

        info!(path = %path.display(), batches = checkpoint.len(), "checkpoint loaded");
        Ok(checkpoint)
    }

    pub fn insert(&mut self, batch: CheckpointBatch) -> Result<(), CheckpointError> {
        match &self.fingerprint {
            Some(expected) if *expected != batch.fingerprint => {
                return Err(CheckpointError::Mismatch {
                    expected: expected.clone(),
                    found: batch.fingerprint,
                });
            }
            Some(_) => {}
            None => self.fingerprint = Some(batch.fingerprint.clone()),
        }
        self.batches
            .insert((batch.model, batch.combination), batch.rows);
        Ok(())
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// An empty checkpoint fits any sweep.
    pub fn verify(&self, fingerprint: &str) -> Result<(), CheckpointError> {
        match &self.fingerprint {
            Some(found) if found != fingerprint => Err(CheckpointError::Mismatch {
                expected: fingerprint.to_string(),
                found: found.clone(),
            }),
            _ => Ok(()),
        }
    }

    pub fn get(&self, model: &str, combination: &str) -> Option<&TableSnapshot> {
        self.batches
            .get(&(model.to_string(), combination.to_string()))
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(fingerprint: &str, combination: &str) -> CheckpointBatch {
        CheckpointBatch {
            fingerprint: fingerprint.to_string(),
            model: "mvar".to_string(),
            combination: combination.to_string(),
            rows: TableSnapshot {
                columns: vec!["value".to_string(), "measure".to_string()],
                rows: Vec::new(),
            },
        }
    }

    #[test]
    fn insert_rejects_foreign_fingerprints() {
        let mut checkpoint = Checkpoint::default();
        checkpoint.insert(batch("abc", "coupling=0.1")).unwrap();
        checkpoint.insert(batch("abc", "coupling=0.2")).unwrap();
        assert_eq!(checkpoint.len(), 2);
        assert!(checkpoint.get("mvar", "coupling=0.2").is_some());
        assert!(matches!(
            checkpoint.insert(batch("def", "coupling=0.3")),
            Err(CheckpointError::Mismatch { .. })
        ));
        assert!(checkpoint.verify("abc").is_ok());
        assert!(checkpoint.verify("xyz").is_err());
        assert!(Checkpoint::default().verify("anything").is_ok());
    }
}
