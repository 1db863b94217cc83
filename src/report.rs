use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::ExportError;
use crate::model::{OutputDigest, OutputStats, RunSummary};
use crate::util::{append_json_lines, directory_stats, now_utc_string};

const FLUSH_EVERY: usize = 64;
const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Succeeded,
    Skipped,
    Failed,
}

/// What one unit of work hands back to the coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub subject: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<u64>,
    #[serde(skip_serializing_if = "is_zero")]
    pub malformed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

impl Outcome {
    pub fn succeeded(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(subject.into(), Status::Succeeded, None, message.into())
    }

    pub fn skipped(subject: impl Into<String>, cause: &ExportError) -> Self {
        Self::new(subject.into(), Status::Skipped, Some(cause.kind()), cause.to_string())
    }

    pub fn failed(subject: impl Into<String>, cause: &ExportError) -> Self {
        Self::new(subject.into(), Status::Failed, Some(cause.kind()), cause.to_string())
    }

    fn new(subject: String, status: Status, reason: Option<&'static str>, message: String) -> Self {
        Self {
            subject,
            status,
            reason,
            message,
            records: None,
            malformed: 0,
            sha256: None,
            issues: Vec::new(),
        }
    }

    pub fn with_records(mut self, records: u64) -> Self {
        self.records = Some(records);
        self
    }

    pub fn with_malformed(mut self, malformed: u64) -> Self {
        self.malformed = malformed;
        self
    }

    pub fn with_sha256(mut self, sha256: String) -> Self {
        self.sha256 = Some(sha256);
        self
    }

    pub fn with_issues(mut self, issues: &[ExportError]) -> Self {
        self.issues = issues.iter().map(ToString::to_string).collect();
        self
    }
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

#[derive(Debug, Serialize)]
struct LogEntry {
    at: String,
    phase: &'static str,
    #[serde(flatten)]
    outcome: Outcome,
}

/// Append-only JSON-lines record of one run. Owned by the coordinator; workers
/// never touch it.
pub struct RunLog {
    phase: &'static str,
    path: PathBuf,
    pending: Vec<LogEntry>,
    summary: RunSummary,
    digests: Vec<OutputDigest>,
    started: Instant,
}

impl RunLog {
    pub fn new(log_dir: &Path, phase: &'static str, stamp: &str) -> Self {
        Self {
            phase,
            path: log_dir.join(format!("{phase}_{stamp}.jsonl")),
            pending: Vec::new(),
            summary: RunSummary::default(),
            digests: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn digests(&self) -> &[OutputDigest] {
        &self.digests
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn record(&mut self, outcome: Outcome) {
        let summary = &mut self.summary;
        summary.total += 1;
        match outcome.status {
            Status::Succeeded => summary.succeeded += 1,
            Status::Skipped => summary.skipped += 1,
            Status::Failed => summary.failed += 1,
        }
        if let Some(reason) = outcome.reason {
            *summary.reasons.entry(reason.to_string()).or_default() += 1;
        }
        summary.records += outcome.records.unwrap_or(0);
        summary.malformed_records += outcome.malformed;

        if let Some(sha256) = &outcome.sha256 {
            self.digests.push(OutputDigest {
                subject: outcome.subject.clone(),
                sha256: sha256.clone(),
            });
        }

        match outcome.status {
            Status::Succeeded => {}
            Status::Skipped => warn!(subject = %outcome.subject, reason = outcome.reason, "{}", outcome.message),
            Status::Failed => error!(subject = %outcome.subject, reason = outcome.reason, "{}", outcome.message),
        }

        if summary.total % PROGRESS_EVERY == 0 {
            let minutes = self.started.elapsed().as_secs_f64() / 60.0;
            let rate = if minutes > 0.0 {
                summary.total as f64 / minutes
            } else {
                0.0
            };
            info!(
                phase = self.phase,
                done = summary.total,
                failed = summary.failed,
                per_minute = %format!("{rate:.1}"),
                "progress"
            );
        }

        self.pending.push(LogEntry {
            at: now_utc_string(),
            phase: self.phase,
            outcome,
        });
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        append_json_lines(&self.path, &self.pending)?;
        self.pending.clear();
        Ok(())
    }

    pub fn log_summary(&self) {
        let summary = &self.summary;
        info!(
            phase = self.phase,
            total = summary.total,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            records = summary.records,
            malformed_records = summary.malformed_records,
            elapsed_seconds = %format!("{:.1}", self.elapsed_seconds()),
            "run summary"
        );
        for (reason, count) in &summary.reasons {
            info!(phase = self.phase, reason = %reason, count, "run summary reason");
        }
    }
}

/// Runs `work` for every book on a dedicated pool. Outcomes stream back over
/// a channel and the calling thread records them, so the log has one writer.
/// A panicking worker becomes a failed outcome for its book.
pub fn run_pool<F>(jobs: Option<usize>, book_ids: &[u64], log: &mut RunLog, work: F) -> Result<()>
where
    F: Fn(u64) -> Outcome + Send + Sync,
{
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(jobs) = jobs {
        builder = builder.num_threads(jobs.max(1));
    }
    let pool = builder.build().context("failed to build worker pool")?;
    info!(threads = pool.current_num_threads(), books = book_ids.len(), "worker pool started");

    let (sender, receiver) = mpsc::channel::<Outcome>();
    thread::scope(|scope| -> Result<()> {
        scope.spawn(move || {
            pool.install(|| {
                book_ids.par_iter().for_each_with(sender, |sender, &book_id| {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(book_id)))
                        .unwrap_or_else(|payload| panicked(book_id, payload.as_ref()));
                    // a closed channel means the coordinator already bailed out
                    let _ = sender.send(outcome);
                });
            });
        });

        for outcome in receiver {
            log.record(outcome);
            if log.pending.len() >= FLUSH_EVERY {
                log.flush()?;
            }
        }
        Ok(())
    })?;

    log.flush()
}

fn panicked(book_id: u64, payload: &(dyn Any + Send)) -> Outcome {
    let message = payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    Outcome::failed(
        format!("book:{book_id}"),
        &ExportError::AssemblyFailure {
            book_id,
            reason: format!("worker panicked: {message}"),
        },
    )
}

/// File count and size of the `extension` files directly inside `dir`.
pub fn output_stats(label: &str, dir: &Path, extension: &str) -> Result<OutputStats> {
    let stats = directory_stats(dir, extension)?;
    Ok(OutputStats {
        label: label.to_string(),
        path: dir.display().to_string(),
        file_count: stats.file_count,
        total_bytes: stats.total_bytes,
        average_bytes: stats
            .total_bytes
            .checked_div(stats.file_count as u64)
            .unwrap_or(0),
    })
}
