use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::warn;

use super::IndexKind;
use super::scanner::RawDocument;
use crate::model::{CompositeKey, MULTI_VALUE_DELIMITER, StoredRecord};
use crate::util::ensure_directory;

const DOC_ID_COLUMN: &str = "DocID";
const BOOK_ID_COLUMN: &str = "BookID";
const FIXED_COLUMNS: usize = 3;

/// Records read back from a per-book intermediate file.
#[derive(Debug, Clone, Default)]
pub struct EntityCsv {
    pub records: Vec<StoredRecord>,
    /// Rows whose position, book id or sub-id column did not parse.
    pub malformed_rows: usize,
}

/// Writes one book's ordered records as `DocID,BookID,<sub-id>,<fields...>`.
pub fn write_entity_csv(
    path: &Path,
    kind: IndexKind,
    entity_id: u64,
    schema_fields: &[String],
    records: &[StoredRecord],
) -> Result<usize> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    let mut header = vec![
        DOC_ID_COLUMN.to_string(),
        BOOK_ID_COLUMN.to_string(),
        kind.sub_id_column().to_string(),
    ];
    header.extend(schema_fields.iter().cloned());
    writer
        .write_record(&header)
        .with_context(|| format!("failed to write header of {}", path.display()))?;

    for record in records {
        let mut row = Vec::with_capacity(header.len());
        row.push(record.position.to_string());
        row.push(entity_id.to_string());
        row.push(record.key.sub_id.to_string());
        row.extend(schema_fields.iter().map(|field| record.text(field)));
        writer
            .write_record(&row)
            .with_context(|| format!("failed to write row to {}", path.display()))?;
    }

    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(records.len())
}

/// Writes a whole non-keyed index as `DocID,<fields...>`.
pub fn write_standard_csv<I>(path: &Path, schema_fields: &[String], documents: I) -> Result<usize>
where
    I: IntoIterator<Item = Result<RawDocument>>,
{
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    let mut header = vec![DOC_ID_COLUMN.to_string()];
    header.extend(schema_fields.iter().cloned());
    writer
        .write_record(&header)
        .with_context(|| format!("failed to write header of {}", path.display()))?;

    let mut written = 0usize;
    for document in documents {
        let document = match document {
            Ok(document) => document,
            Err(err) => {
                warn!(path = %path.display(), error = %format!("{err:#}"), "skipping unreadable document");
                continue;
            }
        };

        let mut row = Vec::with_capacity(header.len());
        row.push(document.position.to_string());
        row.extend(schema_fields.iter().map(|field| {
            document
                .fields
                .get(field)
                .map(|values| values.join(MULTI_VALUE_DELIMITER))
                .unwrap_or_default()
        }));
        writer
            .write_record(&row)
            .with_context(|| format!("failed to write row to {}", path.display()))?;
        written += 1;
    }

    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(written)
}

/// Reads a per-book intermediate file back into keyed records. Empty cells
/// are treated as absent fields.
pub fn read_entity_csv(path: &Path) -> Result<EntityCsv> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let header = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .iter()
        .map(|name| name.trim_start_matches('\u{feff}').to_string())
        .collect::<Vec<_>>();

    if header.len() < FIXED_COLUMNS
        || header[0] != DOC_ID_COLUMN
        || header[1] != BOOK_ID_COLUMN
    {
        bail!(
            "unexpected header in {}: expected {DOC_ID_COLUMN},{BOOK_ID_COLUMN},<sub-id>,...",
            path.display()
        );
    }

    let mut out = EntityCsv::default();
    for row in reader.records() {
        let row = row.with_context(|| format!("failed to read row of {}", path.display()))?;

        let position = row.get(0).and_then(|value| value.trim().parse::<u64>().ok());
        let entity_id = row.get(1).and_then(|value| value.trim().parse::<u64>().ok());
        let sub_id = row.get(2).and_then(|value| value.trim().parse::<u64>().ok());
        let (Some(position), Some(entity_id), Some(sub_id)) = (position, entity_id, sub_id) else {
            out.malformed_rows += 1;
            continue;
        };

        let mut record = StoredRecord::new(CompositeKey::new(entity_id, sub_id), position);
        for (name, value) in header.iter().zip(row.iter()).skip(FIXED_COLUMNS) {
            if !value.is_empty() {
                record.push_value(name, value);
            }
        }
        out.records.push(record);
    }

    Ok(out)
}

/// Reads `key_column -> value_column` pairs from a standard index export,
/// skipping rows where either cell is empty.
pub fn read_meta_csv(
    path: &Path,
    key_column: &str,
    value_column: &str,
) -> Result<HashMap<String, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let header = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .iter()
        .map(|name| name.trim_start_matches('\u{feff}').to_string())
        .collect::<Vec<_>>();

    let (Some(key_idx), Some(value_idx)) = (
        header.iter().position(|name| name == key_column),
        header.iter().position(|name| name == value_column),
    ) else {
        warn!(
            path = %path.display(),
            key_column,
            value_column,
            "meta export lacks expected columns"
        );
        return Ok(HashMap::new());
    };

    let mut out = HashMap::new();
    for row in reader.records() {
        let row = row.with_context(|| format!("failed to read row of {}", path.display()))?;
        let key = row.get(key_idx).unwrap_or_default().trim();
        let value = row.get(value_idx).unwrap_or_default();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        out.insert(key.to_string(), value.to_string());
    }

    Ok(out)
}
