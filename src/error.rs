use thiserror::Error;

/// Failure classes of an export run. Only `PrerequisiteMissing` aborts a run;
/// the others are recorded and processing moves on.
#[derive(Debug, Clone, Error)]
pub enum ExportError {
    #[error("missing prerequisites:\n  - {}", .issues.join("\n  - "))]
    PrerequisiteMissing { issues: Vec<String> },
    #[error("index '{index}' segment {segment} is unreadable: {reason}")]
    SegmentUnreadable {
        index: String,
        segment: String,
        reason: String,
    },
    #[error("index '{index}' key '{key}' is not of the form <bookId>-<subId>")]
    MalformedKey { index: String, key: String },
    #[error("no {kind} row for id {id}")]
    MetadataMissing { kind: &'static str, id: String },
    #[error("book {book_id} abandoned: {reason}")]
    AssemblyFailure { book_id: u64, reason: String },
}

impl ExportError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PrerequisiteMissing { .. } => "prerequisite_missing",
            Self::SegmentUnreadable { .. } => "segment_unreadable",
            Self::MalformedKey { .. } => "malformed_key",
            Self::MetadataMissing { .. } => "metadata_missing",
            Self::AssemblyFailure { .. } => "assembly_failure",
        }
    }
}
