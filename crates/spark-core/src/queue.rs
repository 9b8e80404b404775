//! Event queue (C1): an append-only JSONL file backed by a primary log,
//! an overflow sidecar for lock contention, and a persisted byte cursor.
//!
//! Grounded in the teacher's file-backed, lock-guarded stores
//! (`shadow_store.rs`, `knowledge/store.rs`) generalized to an
//! append-only rotation log, using `FileLock` in place of Sled since Sled
//! has no notion of a byte-offset read cursor.

use crate::error::QueueError;
use crate::lock::FileLock;
use crate::model::Event;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

const PRIMARY_LOCK_TIMEOUT: Duration = Duration::from_millis(50);
const OVERFLOW_LOCK_TIMEOUT: Duration = Duration::from_millis(500);
const TAIL_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct QueueState {
    head_bytes: u64,
}

/// Queue sizing and compaction thresholds. Defaults match the values
/// implied by spec.md §4.1/§4.7 (`max_bytes`/`max_events` rotation,
/// `compact_threshold` prefix rewrite).
#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
    pub max_bytes: u64,
    pub max_events: u64,
    pub compact_threshold: u64,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_bytes: 64 * 1024 * 1024,
            max_events: 200_000,
            compact_threshold: 16 * 1024 * 1024,
        }
    }
}

pub struct EventQueue {
    dir: PathBuf,
    primary: PathBuf,
    overflow: PathBuf,
    state_path: PathBuf,
    primary_lock: PathBuf,
    overflow_lock: PathBuf,
    limits: QueueLimits,
}

impl EventQueue {
    pub fn open(dir: impl Into<PathBuf>, limits: QueueLimits) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            primary: dir.join("events.jsonl"),
            overflow: dir.join("overflow.jsonl"),
            state_path: dir.join("state.json"),
            primary_lock: dir.join("events.lock"),
            overflow_lock: dir.join("overflow.lock"),
            limits,
            dir,
        })
    }

    /// Serializes `event` to one JSON line and writes it to the primary
    /// log, falling back to the overflow sidecar under contention. Never
    /// blocks the caller more than ~550ms; on total failure the event is
    /// dropped and a diagnostic is logged, per spec.
    pub fn capture(&self, event: &Event) -> Result<(), QueueError> {
        let line = serde_json::to_string(event).map_err(|e| {
            QueueError::Corrupt(format!("event did not serialize: {e}"))
        })?;

        let primary_lock = FileLock::acquire(&self.primary_lock, PRIMARY_LOCK_TIMEOUT, Duration::from_secs(60));
        if primary_lock.is_acquired() {
            append_line(&self.primary, &line)?;
            drop(primary_lock);
            let _ = self.rotate_if_needed();
            return Ok(());
        }
        drop(primary_lock);

        tracing::warn!(target: "spark::queue", "primary lock contended, falling back to overflow");
        let overflow_lock = FileLock::acquire(&self.overflow_lock, OVERFLOW_LOCK_TIMEOUT, Duration::from_secs(60));
        if overflow_lock.is_acquired() {
            append_line(&self.overflow, &line)?;
            return Ok(());
        }

        tracing::error!(target: "spark::queue", event_id = %event.id, "queue locked, event dropped");
        Err(QueueError::Locked(format!("both locks busy, dropped event {}", event.id)))
    }

    /// Streams decoded lines from `head_bytes + offset` forward, skipping
    /// corrupt lines (logged, not fatal) and the trailing partial line a
    /// concurrent writer may be mid-append on.
    pub fn read(&self, limit: usize, offset: u64) -> Result<Vec<Event>, QueueError> {
        let state = self.load_state()?;
        self.read_from(state.head_bytes + offset, limit)
    }

    fn read_from(&self, start: u64, limit: usize) -> Result<Vec<Event>, QueueError> {
        let Ok(mut file) = File::open(&self.primary) else { return Ok(Vec::new()) };
        let len = file.metadata()?.len();
        if start >= len {
            return Ok(Vec::new());
        }
        file.seek(SeekFrom::Start(start))?;
        let reader = BufReader::new(file);
        let mut out = Vec::with_capacity(limit.min(1024));
        let mut lines = reader.lines().peekable();
        while let Some(line) = lines.next() {
            if out.len() >= limit {
                break;
            }
            // The last line may be a partial append from a concurrent writer.
            if lines.peek().is_none() {
                break;
            }
            let Ok(line) = line else { continue };
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(ev) => out.push(ev),
                Err(e) => tracing::warn!(target: "spark::queue", error = %e, "skipped corrupt event line"),
            }
        }
        Ok(out)
    }

    /// Reads the last `n` lines via a reverse chunked scan so large files
    /// are never loaded in full just to see recent activity.
    pub fn tail(&self, n: usize) -> Result<Vec<Event>, QueueError> {
        let Ok(mut file) = File::open(&self.primary) else { return Ok(Vec::new()) };
        let len = file.metadata()?.len();
        let mut pos = len;
        let mut buf: Vec<u8> = Vec::new();
        let mut newline_count = 0usize;

        while pos > 0 && newline_count <= n {
            let read_size = TAIL_CHUNK.min(pos as usize);
            pos -= read_size as u64;
            file.seek(SeekFrom::Start(pos))?;
            let mut chunk = vec![0u8; read_size];
            file.read_exact(&mut chunk)?;
            chunk.extend_from_slice(&buf);
            buf = chunk;
            newline_count = buf.iter().filter(|&&b| b == b'\n').count();
        }

        let text = String::from_utf8_lossy(&buf);
        let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..]
            .iter()
            .filter_map(|l| serde_json::from_str::<Event>(l).ok())
            .collect())
    }

    /// Merges overflow into the primary log under the primary lock and
    /// advances the persisted cursor past `n` consumed events. Rewrites
    /// the file to drop the consumed prefix once it crosses
    /// `compact_threshold` and the prefix is at least half the file.
    pub fn consume(&self, n: usize) -> Result<(), QueueError> {
        let lock = FileLock::acquire(&self.primary_lock, Duration::from_millis(500), Duration::from_secs(60));
        if !lock.is_acquired() {
            return Err(QueueError::Locked("consume: primary lock unavailable".into()));
        }

        self.merge_overflow_locked()?;

        let mut state = self.load_state()?;
        let consumed_bytes = self.bytes_for_lines(state.head_bytes, n)?;
        state.head_bytes += consumed_bytes;
        let total_len = fs::metadata(&self.primary).map(|m| m.len()).unwrap_or(0);

        if state.head_bytes >= self.limits.compact_threshold && state.head_bytes * 2 >= total_len {
            self.compact_prefix(state.head_bytes)?;
            state.head_bytes = 0;
        }

        self.save_state(&state)
    }

    fn merge_overflow_locked(&self) -> Result<(), QueueError> {
        if !self.overflow.exists() {
            return Ok(());
        }
        let overflow_lock = FileLock::acquire(&self.overflow_lock, Duration::from_millis(500), Duration::from_secs(60));
        if !overflow_lock.is_acquired() {
            return Ok(());
        }
        let content = fs::read_to_string(&self.overflow)?;
        if !content.is_empty() {
            let mut primary = OpenOptions::new().create(true).append(true).open(&self.primary)?;
            primary.write_all(content.as_bytes())?;
        }
        fs::write(&self.overflow, b"")?;
        Ok(())
    }

    fn bytes_for_lines(&self, start: u64, n: usize) -> Result<u64, QueueError> {
        let Ok(mut file) = File::open(&self.primary) else { return Ok(0) };
        file.seek(SeekFrom::Start(start))?;
        let reader = BufReader::new(file);
        let mut consumed = 0u64;
        for (i, line) in reader.lines().enumerate() {
            if i >= n {
                break;
            }
            let Ok(line) = line else { break };
            consumed += line.len() as u64 + 1; // +1 for the newline
        }
        Ok(consumed)
    }

    fn compact_prefix(&self, head_bytes: u64) -> Result<(), QueueError> {
        let mut file = File::open(&self.primary)?;
        file.seek(SeekFrom::Start(head_bytes))?;
        let mut remainder = Vec::new();
        file.read_to_end(&mut remainder)?;
        let tmp = self.dir.join("events.jsonl.tmp");
        fs::write(&tmp, &remainder)?;
        fs::rename(&tmp, &self.primary)?;
        Ok(())
    }

    /// Keeps the last half of the file when size or count limits are
    /// exceeded. Best-effort: called after every `capture`.
    pub fn rotate_if_needed(&self) -> Result<(), QueueError> {
        let Ok(meta) = fs::metadata(&self.primary) else { return Ok(()) };
        let active_bytes = meta.len();
        let count = self.approx_count()?;
        if active_bytes <= self.limits.max_bytes && count <= self.limits.max_events {
            return Ok(());
        }

        tracing::info!(target: "spark::queue", active_bytes, count, "rotating event queue, keeping last half");
        let content = fs::read_to_string(&self.primary)?;
        let lines: Vec<&str> = content.lines().filter(|l| !l.is_empty()).collect();
        let keep_from = lines.len() / 2;
        let tmp = self.dir.join("events.jsonl.tmp");
        fs::write(&tmp, lines[keep_from..].join("\n") + "\n")?;
        fs::rename(&tmp, &self.primary)?;
        self.save_state(&QueueState::default())?;
        Ok(())
    }

    fn approx_count(&self) -> Result<u64, QueueError> {
        let Ok(file) = File::open(&self.primary) else { return Ok(0) };
        Ok(BufReader::new(file).lines().count() as u64)
    }

    fn load_state(&self) -> Result<QueueState, QueueError> {
        match fs::read_to_string(&self.state_path) {
            Ok(s) => Ok(serde_json::from_str(&s).unwrap_or_default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(QueueState::default()),
            Err(e) => Err(QueueError::Unavailable(e)),
        }
    }

    fn save_state(&self, state: &QueueState) -> Result<(), QueueError> {
        let body = serde_json::to_string(state)
            .map_err(|e| QueueError::Corrupt(format!("state did not serialize: {e}")))?;
        let tmp = self.dir.join("state.json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.state_path)?;
        Ok(())
    }
}

fn append_line(path: &Path, line: &str) -> Result<(), QueueError> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    Ok(())
}

/// Sorts events `High -> Medium -> Low`, stable within each bucket, so
/// important events are processed first even under a partial cycle.
pub fn sort_by_priority(events: &mut [Event]) {
    events.sort_by_key(|e| std::cmp::Reverse(e.priority()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventKind;

    fn ev(n: i64) -> Event {
        Event::new(EventKind::UserPrompt, "s1", n, serde_json::json!({"n": n}))
    }

    #[test]
    fn capture_then_tail_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let q = EventQueue::open(dir.path(), QueueLimits::default()).unwrap();
        for n in 0..5 {
            q.capture(&ev(n)).unwrap();
        }
        let tail = q.tail(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].timestamp, 4);
    }

    #[test]
    fn read_respects_head_cursor_after_consume() {
        let dir = tempfile::tempdir().unwrap();
        let q = EventQueue::open(dir.path(), QueueLimits::default()).unwrap();
        for n in 0..5 {
            q.capture(&ev(n)).unwrap();
        }
        let first = q.read(10, 0).unwrap();
        assert_eq!(first.len(), 4, "last line withheld as possibly-partial");
        q.consume(2).unwrap();
        let rest = q.read(10, 0).unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].timestamp, 2);
    }

    #[test]
    fn rotate_keeps_last_half_over_max_events() {
        let dir = tempfile::tempdir().unwrap();
        let limits = QueueLimits { max_events: 4, ..QueueLimits::default() };
        let q = EventQueue::open(dir.path(), limits).unwrap();
        for n in 0..10 {
            q.capture(&ev(n)).unwrap();
        }
        let all = q.tail(100).unwrap();
        assert!(all.len() <= 5);
    }
}
