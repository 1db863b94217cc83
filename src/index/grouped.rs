use anyhow::Result;

use super::scanner::{IndexScanner, KeyCensus};
use crate::error::ExportError;
use crate::model::StoredRecord;

/// All records of one entity, ascending by sub-id.
#[derive(Debug, Clone)]
pub struct EntityGroup {
    pub entity_id: u64,
    pub records: Vec<StoredRecord>,
    /// Documents keyed to this entity whose stored fields could not be read.
    pub unreadable: Vec<ExportError>,
}

/// Groups an index's records by entity id. Entities are materialised one at a
/// time; ordering holds within an entity only.
pub struct GroupedExtractor<'a> {
    scanner: &'a IndexScanner,
    census: KeyCensus,
}

impl<'a> GroupedExtractor<'a> {
    pub fn new(scanner: &'a IndexScanner) -> Result<Self> {
        let census = scanner.key_census()?;
        Ok(Self { scanner, census })
    }

    pub fn scanner(&self) -> &'a IndexScanner {
        self.scanner
    }

    pub fn census(&self) -> &KeyCensus {
        &self.census
    }

    pub fn entity_ids(&self) -> &[u64] {
        &self.census.entity_ids
    }

    pub fn group(&self, entity_id: u64) -> Result<EntityGroup> {
        let scan = self.scanner.scan_entity(entity_id)?;
        Ok(EntityGroup {
            entity_id,
            records: order_records(scan.records),
            unreadable: scan.unreadable,
        })
    }
}

/// Stable sort by sub-id; equal sub-ids keep document-position order.
pub fn order_records(mut records: Vec<StoredRecord>) -> Vec<StoredRecord> {
    records.sort_by_key(|record| (record.key.sub_id, record.position));
    records
}
