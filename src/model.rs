use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const KEY_SEPARATOR: char = '-';
pub const MULTI_VALUE_DELIMITER: &str = ";";

/// `"<entityId>-<subId>"` join key used by the page and title indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompositeKey {
    pub entity_id: u64,
    pub sub_id: u64,
}

impl CompositeKey {
    pub fn new(entity_id: u64, sub_id: u64) -> Self {
        Self { entity_id, sub_id }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (entity, sub) = raw.trim().split_once(KEY_SEPARATOR)?;
        Some(Self {
            entity_id: entity.parse().ok()?,
            sub_id: sub.parse().ok()?,
        })
    }

    /// Lower bound of the key range belonging to `entity_id`.
    pub fn entity_prefix(entity_id: u64) -> String {
        format!("{entity_id}{KEY_SEPARATOR}")
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.entity_id, KEY_SEPARATOR, self.sub_id)
    }
}

/// One stored document: field name to its values, in field-name order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub key: CompositeKey,
    /// Index-internal document position. Only used to break ties.
    pub position: u64,
    pub fields: BTreeMap<String, Vec<String>>,
}

impl StoredRecord {
    pub fn new(key: CompositeKey, position: u64) -> Self {
        Self {
            key,
            position,
            fields: BTreeMap::new(),
        }
    }

    pub fn push_value(&mut self, field: &str, value: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(value.into());
    }

    #[cfg(test)]
    pub fn with_field(mut self, field: &str, value: impl Into<String>) -> Self {
        self.push_value(field, value);
        self
    }

    pub fn first(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of `field` joined with the multi-value delimiter.
    pub fn joined(&self, field: &str) -> Option<String> {
        self.fields
            .get(field)
            .filter(|values| !values.is_empty())
            .map(|values| values.join(MULTI_VALUE_DELIMITER))
    }

    pub fn text(&self, field: &str) -> String {
        self.joined(field).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookPageRecord {
    pub sub_id: u64,
    pub body: String,
    pub footnote: String,
    pub page_number: String,
    pub part: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleRecord {
    pub sub_id: u64,
    pub heading: String,
    /// `"<part>/<pageNumber>"`, carried verbatim.
    pub anchor: Option<String>,
    /// Explicit nesting level, when the source carries one.
    pub level: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorRef {
    pub id: String,
    pub name: String,
    pub death_number: String,
    pub death_text: String,
    pub is_main_author: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookMetadata {
    pub title: String,
    pub book_date: String,
    pub category: CategoryRef,
    pub book_type: String,
    pub printed: String,
    pub pdf_links: serde_json::Value,
    pub meta_data: serde_json::Value,
    pub authors: Vec<AuthorRef>,
    pub book_meta: Vec<String>,
    pub author_meta: Vec<String>,
}

/// One heading and its subheadings. Nesting depth is unbounded; readers using
/// serde_json's default recursion limit of 128 reject forests deeper than
/// about 60 levels and must disable the limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocNode {
    #[serde(rename = "title")]
    pub heading: String,
    #[serde(rename = "page")]
    pub anchor: Option<String>,
    #[serde(rename = "chapters")]
    pub children: Vec<TocNode>,
}

impl TocNode {
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(TocNode::count).sum::<usize>()
    }

    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(TocNode::depth).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub page_id: u64,
    pub page_number: String,
    pub body: String,
    pub footnote: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub part: String,
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookDocument {
    pub book_id: u64,
    pub title: String,
    pub book_date: String,
    pub category: CategoryRef,
    pub book_type: String,
    pub printed: String,
    pub pdf_links: serde_json::Value,
    pub meta_data: serde_json::Value,
    pub authors: Vec<AuthorRef>,
    pub book_meta: Vec<String>,
    pub author_meta: Vec<String>,
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_of_contents: Option<Vec<TocNode>>,
}

impl BookDocument {
    pub fn page_count(&self) -> usize {
        self.parts.iter().map(|part| part.pages.len()).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunPaths {
    pub shamela_path: String,
    pub output_path: String,
    pub log_path: String,
}

/// Totals over every outcome the coordinator recorded in one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub records: u64,
    pub malformed_records: u64,
    /// Error kind to number of outcomes carrying it.
    pub reasons: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputDigest {
    pub subject: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputStats {
    pub label: String,
    pub path: String,
    pub file_count: usize,
    pub total_bytes: u64,
    pub average_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub phase: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub elapsed_seconds: f64,
    pub command: String,
    pub paths: RunPaths,
    pub summary: RunSummary,
    pub outputs: Vec<OutputStats>,
    pub output_hashes: Vec<OutputDigest>,
    pub warnings: Vec<String>,
}
