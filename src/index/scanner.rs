use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tantivy::schema::{Field, IndexRecordOption, OwnedValue, Value};
use tantivy::store::StoreReader;
use tantivy::{DocId, DocSet, Index, InvertedIndexReader, SegmentReader, TERMINATED, TantivyDocument};
use tracing::{debug, info, warn};

use super::{IndexKind, KEY_FIELD};
use crate::error::ExportError;
use crate::model::{CompositeKey, StoredRecord};

/// Number of leading documents inspected to discover the stored field schema.
/// Fields that first appear after this many documents are not exported.
pub const SCHEMA_SAMPLE_LIMIT: usize = 1000;

const STORE_CACHE_BLOCKS: usize = 32;

/// A stored document that has not been resolved to a composite key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub position: u64,
    pub fields: BTreeMap<String, Vec<String>>,
}

/// What the key-field term dictionary says about an index.
#[derive(Debug, Clone, Default)]
pub struct KeyCensus {
    /// Distinct entity ids, ascending.
    pub entity_ids: Vec<u64>,
    /// Malformed key terms with the number of documents carrying each.
    pub malformed: Vec<(String, u64)>,
    /// Live documents that carry no key term at all.
    pub missing_key_docs: u64,
}

impl KeyCensus {
    pub fn malformed_docs(&self) -> u64 {
        self.malformed.iter().map(|(_, docs)| docs).sum::<u64>() + self.missing_key_docs
    }
}

/// Records of one entity plus the stored documents that could not be loaded.
#[derive(Debug, Default)]
pub struct EntityScan {
    pub records: Vec<StoredRecord>,
    pub unreadable: Vec<ExportError>,
}

struct SegmentHandle {
    label: String,
    base_position: u64,
    reader: SegmentReader,
    store: StoreReader,
    keys: Option<Arc<InvertedIndexReader>>,
}

pub struct IndexScanner {
    name: String,
    kind: IndexKind,
    stored_fields: Vec<(Field, String)>,
    segments: Vec<SegmentHandle>,
    schema_fields: Vec<String>,
    unreadable: Vec<ExportError>,
}

impl IndexScanner {
    /// Opens every searchable segment of the index in `dir`. Segments that
    /// cannot be opened are recorded and left out of all scans.
    pub fn open(dir: &Path, kind: IndexKind) -> Result<Self> {
        let name = dir
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or_default()
            .to_string();

        let index = Index::open_in_dir(dir)
            .with_context(|| format!("failed to open index {}", dir.display()))?;
        let schema = index.schema();
        let key_field = schema.get_field(KEY_FIELD).ok();
        let stored_fields = schema
            .fields()
            .filter(|(_, entry)| entry.is_stored())
            .map(|(field, entry)| (field, entry.name().to_string()))
            .collect::<Vec<_>>();

        let segments_meta = index
            .searchable_segments()
            .with_context(|| format!("failed to list segments of {}", dir.display()))?;

        let mut segments = Vec::with_capacity(segments_meta.len());
        let mut unreadable = Vec::new();
        let mut base_position = 0u64;

        for segment in segments_meta {
            let label = segment.id().short_uuid_string();
            let max_doc = u64::from(segment.meta().max_doc());
            let segment_base = base_position;
            base_position += max_doc;

            match open_segment(&segment, key_field) {
                Ok((reader, store, keys)) => segments.push(SegmentHandle {
                    label,
                    base_position: segment_base,
                    reader,
                    store,
                    keys,
                }),
                Err(err) => {
                    let issue = ExportError::SegmentUnreadable {
                        index: name.clone(),
                        segment: label,
                        reason: format!("{err:#}"),
                    };
                    warn!(error = %issue, "skipping segment");
                    unreadable.push(issue);
                }
            }
        }

        let mut scanner = Self {
            name,
            kind,
            stored_fields,
            segments,
            schema_fields: Vec::new(),
            unreadable,
        };
        scanner.schema_fields = scanner.sample_schema();

        info!(
            index = %scanner.name,
            kind = kind.as_str(),
            segments = scanner.segments.len(),
            unreadable_segments = scanner.unreadable.len(),
            fields = scanner.schema_fields.len(),
            "opened index"
        );

        Ok(scanner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    /// Stored field names, sorted, as discovered from the sampled documents.
    pub fn schema_fields(&self) -> &[String] {
        &self.schema_fields
    }

    pub fn unreadable_segments(&self) -> &[ExportError] {
        &self.unreadable
    }

    fn sample_schema(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for document in self.documents().take(SCHEMA_SAMPLE_LIMIT) {
            match document {
                Ok(document) => names.extend(document.fields.into_keys()),
                Err(err) => debug!(index = %self.name, error = %format!("{err:#}"), "schema sample skipped a document"),
            }
        }
        names.into_iter().collect()
    }

    /// Walks the key-field term dictionary of every readable segment.
    pub fn key_census(&self) -> Result<KeyCensus> {
        let mut entity_ids = BTreeSet::new();
        let mut malformed = BTreeMap::<String, u64>::new();
        let mut missing_key_docs = 0u64;

        for segment in &self.segments {
            let live_docs = u64::from(segment.reader.num_docs());
            let Some(keys) = &segment.keys else {
                missing_key_docs += live_docs;
                continue;
            };

            let mut keyed_docs = 0u64;
            let mut stream = keys.terms().stream().with_context(|| {
                format!("failed to stream key terms of {}/{}", self.name, segment.label)
            })?;
            while stream.advance() {
                // doc_freq still includes deleted documents
                let live = if segment.reader.has_deletes() {
                    let mut postings = keys
                        .read_postings_from_terminfo(stream.value(), IndexRecordOption::Basic)
                        .with_context(|| {
                            format!("failed to read key postings of {}/{}", self.name, segment.label)
                        })?;
                    count_live(&mut postings, &segment.reader)
                } else {
                    u64::from(stream.value().doc_freq)
                };
                if live == 0 {
                    continue;
                }
                keyed_docs += live;

                let raw = String::from_utf8_lossy(stream.key());
                match CompositeKey::parse(&raw) {
                    Some(key) => {
                        entity_ids.insert(key.entity_id);
                    }
                    None => {
                        *malformed.entry(raw.into_owned()).or_default() += live;
                    }
                }
            }
            missing_key_docs += live_docs.saturating_sub(keyed_docs);
        }

        for key in malformed.keys() {
            let issue = ExportError::MalformedKey {
                index: self.name.clone(),
                key: key.clone(),
            };
            warn!(error = %issue, "skipping malformed key");
        }
        if missing_key_docs > 0 {
            warn!(index = %self.name, docs = missing_key_docs, "documents without a key field skipped");
        }

        Ok(KeyCensus {
            entity_ids: entity_ids.into_iter().collect(),
            malformed: malformed.into_iter().collect(),
            missing_key_docs,
        })
    }

    /// Collects every record of `entity_id` with a prefix-bounded term scan
    /// per segment. The result is in index order, not sub-id order.
    pub fn scan_entity(&self, entity_id: u64) -> Result<EntityScan> {
        let prefix = CompositeKey::entity_prefix(entity_id);
        let mut scan = EntityScan::default();

        for segment in &self.segments {
            let Some(keys) = &segment.keys else {
                continue;
            };

            let mut stream = keys
                .terms()
                .range()
                .ge(prefix.as_bytes())
                .into_stream()
                .with_context(|| {
                    format!("failed to seek key terms of {}/{}", self.name, segment.label)
                })?;

            while stream.advance() {
                if !stream.key().starts_with(prefix.as_bytes()) {
                    break;
                }
                let raw = String::from_utf8_lossy(stream.key());
                let Some(key) = CompositeKey::parse(&raw).filter(|key| key.entity_id == entity_id)
                else {
                    continue;
                };

                let mut postings = keys
                    .read_postings_from_terminfo(stream.value(), IndexRecordOption::Basic)
                    .with_context(|| format!("failed to read postings for key {raw}"))?;

                let mut doc = postings.doc();
                while doc != TERMINATED {
                    if !is_deleted(&segment.reader, doc) {
                        match self.load_document(segment, doc) {
                            Ok(document) => scan.records.push(StoredRecord {
                                key,
                                position: document.position,
                                fields: document.fields,
                            }),
                            Err(err) => {
                                let issue = ExportError::SegmentUnreadable {
                                    index: self.name.clone(),
                                    segment: segment.label.clone(),
                                    reason: format!("document {doc} with key {key}: {err:#}"),
                                };
                                warn!(error = %issue, "stored document unreadable");
                                scan.unreadable.push(issue);
                            }
                        }
                    }
                    doc = postings.advance();
                }
            }
        }

        Ok(scan)
    }

    /// Lazily walks every live document of every readable segment.
    pub fn documents(&self) -> impl Iterator<Item = Result<RawDocument>> + '_ {
        self.segments.iter().flat_map(move |segment| {
            segment
                .reader
                .doc_ids_alive()
                .map(move |doc| self.load_document(segment, doc))
        })
    }

    fn load_document(&self, segment: &SegmentHandle, doc: DocId) -> Result<RawDocument> {
        let stored: TantivyDocument = segment.store.get(doc).with_context(|| {
            format!("failed to load document {doc} from {}/{}", self.name, segment.label)
        })?;

        let mut fields = BTreeMap::new();
        for (field, name) in &self.stored_fields {
            let values = stored
                .get_all(*field)
                .filter_map(stored_value_text)
                .collect::<Vec<_>>();
            if !values.is_empty() {
                fields.insert(name.clone(), values);
            }
        }

        Ok(RawDocument {
            position: segment.base_position + u64::from(doc),
            fields,
        })
    }
}

fn open_segment(
    segment: &tantivy::Segment,
    key_field: Option<Field>,
) -> Result<(SegmentReader, StoreReader, Option<Arc<InvertedIndexReader>>)> {
    let reader = SegmentReader::open(segment).context("failed to open segment reader")?;
    let store = reader
        .get_store_reader(STORE_CACHE_BLOCKS)
        .context("failed to open document store")?;
    let keys = key_field
        .map(|field| reader.inverted_index(field))
        .transpose()
        .context("failed to open key term dictionary")?;
    Ok((reader, store, keys))
}

fn count_live(postings: &mut impl DocSet, reader: &SegmentReader) -> u64 {
    let mut live = 0u64;
    let mut doc = postings.doc();
    while doc != TERMINATED {
        if !is_deleted(reader, doc) {
            live += 1;
        }
        doc = postings.advance();
    }
    live
}

fn is_deleted(reader: &SegmentReader, doc: DocId) -> bool {
    reader
        .alive_bitset()
        .map(|alive| alive.is_deleted(doc))
        .unwrap_or(false)
}

fn stored_value_text(value: &OwnedValue) -> Option<String> {
    if let Some(text) = value.as_str() {
        return Some(text.to_string());
    }
    if let Some(number) = value.as_u64() {
        return Some(number.to_string());
    }
    if let Some(number) = value.as_i64() {
        return Some(number.to_string());
    }
    if let Some(number) = value.as_f64() {
        return Some(number.to_string());
    }
    value.as_bool().map(|flag| flag.to_string())
}
