//! Ring-bounded JSONL helper shared by the auxiliary files the spec lists
//! in §6: `exposures.jsonl`, `predictions.jsonl`, `outcomes.jsonl`,
//! `contradictions.json`-as-jsonl, and `quarantine/*.jsonl`.
//!
//! Each file is capped at `max_lines`: once the cap is hit the oldest lines
//! are dropped. Writers serialize through a `FileLock` so concurrent
//! producers never interleave partial lines.

use crate::lock::{FileLock, DEFAULT_STALE_AGE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::time::Duration;

const LOCK_TIMEOUT: Duration = Duration::from_millis(200);

/// Appends `value` as one JSON line to `path`, trimming to `max_lines` if
/// the file has grown past the cap. Best-effort: write failures are
/// swallowed after a `tracing::warn!`, matching the fail-silent posture
/// the spec requires for hot-path auxiliary writes.
pub fn append_bounded<T: Serialize>(path: &Path, value: &T, max_lines: usize) {
    let lock_path = lock_path_for(path);
    let lock = FileLock::acquire(&lock_path, LOCK_TIMEOUT, DEFAULT_STALE_AGE);
    if !lock.is_acquired() {
        tracing::warn!(target: "spark::jsonl", path = %path.display(), "append_bounded: lock unavailable, dropping write");
        return;
    }
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let line = match serde_json::to_string(value) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(target: "spark::jsonl", error = %e, "append_bounded: serialize failed");
            return;
        }
    };

    let append_result = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut f| writeln!(f, "{line}"));
    if let Err(e) = append_result {
        tracing::warn!(target: "spark::jsonl", error = %e, path = %path.display(), "append_bounded: write failed");
        return;
    }

    if let Ok(count) = count_lines(path) {
        if count > max_lines {
            trim_to(path, max_lines);
        }
    }
}

/// Reads up to `limit` most-recent entries that deserialize cleanly,
/// skipping malformed lines rather than failing the whole read.
pub fn read_recent<T: DeserializeOwned>(path: &Path, limit: usize) -> Vec<T> {
    let Ok(file) = fs::File::open(path) else { return Vec::new() };
    let lines: Vec<String> = BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .collect();
    lines
        .into_iter()
        .rev()
        .filter_map(|l| serde_json::from_str(&l).ok())
        .take(limit)
        .collect()
}

fn count_lines(path: &Path) -> std::io::Result<usize> {
    let file = fs::File::open(path)?;
    Ok(BufReader::new(file).lines().count())
}

fn trim_to(path: &Path, max_lines: usize) {
    let Ok(file) = fs::File::open(path) else { return };
    let lines: Vec<String> = BufReader::new(file).lines().map_while(Result::ok).collect();
    if lines.len() <= max_lines {
        return;
    }
    let keep = &lines[lines.len() - max_lines..];
    let tmp = path.with_extension("jsonl.tmp");
    if fs::write(&tmp, keep.join("\n") + "\n").is_ok() {
        let _ = fs::rename(&tmp, path);
    }
}

fn lock_path_for(path: &Path) -> std::path::PathBuf {
    path.with_extension(match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{ext}.lock"),
        None => "lock".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Item {
        n: u32,
    }

    #[test]
    fn appends_and_reads_recent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.jsonl");
        for n in 0..5 {
            append_bounded(&path, &Item { n }, 100);
        }
        let recent: Vec<Item> = read_recent(&path, 3);
        assert_eq!(recent, vec![Item { n: 4 }, Item { n: 3 }, Item { n: 2 }]);
    }

    #[test]
    fn trims_to_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.jsonl");
        for n in 0..10 {
            append_bounded(&path, &Item { n }, 4);
        }
        let all: Vec<Item> = read_recent(&path, 100);
        assert_eq!(all.len(), 4);
        assert_eq!(all[0], Item { n: 9 });
    }
}
