use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub fn now_utc_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn utc_compact_string(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Writes `value` as pretty JSON followed by a newline and returns the sha256
/// of the bytes written.
pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<String> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let mut data = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;
    data.push(b'\n');

    let mut file = File::create(path)
        .with_context(|| format!("failed to create json file: {}", path.display()))?;
    file.write_all(&data)
        .with_context(|| format!("failed to write json file: {}", path.display()))?;

    Ok(sha256_hex(&data))
}

pub fn append_json_lines<T: Serialize>(path: &Path, values: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file: {}", path.display()))?;

    for value in values {
        let mut line = serde_json::to_vec(value)
            .with_context(|| format!("failed to serialize log entry: {}", path.display()))?;
        line.push(b'\n');
        file.write_all(&line)
            .with_context(|| format!("failed to append log entry: {}", path.display()))?;
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DirectoryStats {
    pub file_count: usize,
    pub total_bytes: u64,
}

pub fn directory_stats(dir: &Path, extension: &str) -> Result<DirectoryStats> {
    let mut stats = DirectoryStats::default();
    if !dir.exists() {
        return Ok(stats);
    }

    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if !matches {
            continue;
        }

        let metadata = entry
            .metadata()
            .with_context(|| format!("failed to inspect {}", path.display()))?;
        if metadata.is_file() {
            stats.file_count += 1;
            stats.total_bytes += metadata.len();
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_digest_matches_written_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("doc.json");

        let digest = write_json_pretty(&path, &serde_json::json!({"title": "كتاب"}))
            .expect("write should succeed");
        let bytes = fs::read(&path).expect("file should exist");
        assert!(bytes.ends_with(b"\n"));
        assert_eq!(digest, sha256_hex(&bytes));
    }

    #[test]
    fn directory_stats_counts_matching_files_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("1.csv"), "abc").expect("write");
        fs::write(dir.path().join("2.CSV"), "de").expect("write");
        fs::write(dir.path().join("3.json"), "{}").expect("write");

        let stats = directory_stats(dir.path(), "csv").expect("stats");
        assert_eq!(stats.file_count, 2);
        assert_eq!(stats.total_bytes, 5);

        let missing = directory_stats(&dir.path().join("absent"), "csv").expect("stats");
        assert_eq!(missing.file_count, 0);
    }
}
