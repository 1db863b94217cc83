use std::fs;
use std::path::Path;

use tantivy::schema::{Field, STORED, STRING, Schema, TEXT};
use tantivy::indexer::NoMergePolicy;
use tantivy::{Index, IndexWriter, SegmentComponent, TantivyDocument, Term, doc};

use super::*;
use crate::model::{CompositeKey, StoredRecord};

struct PageFields {
    id: Field,
    body: Field,
    foot: Field,
}

fn create_page_index(dir: &Path) -> (Index, PageFields) {
    let mut builder = Schema::builder();
    let id = builder.add_text_field("id", STRING | STORED);
    let body = builder.add_text_field("body", TEXT | STORED);
    let foot = builder.add_text_field("foot", TEXT | STORED);
    let index = Index::create_in_dir(dir, builder.build()).expect("index should be created");
    (index, PageFields { id, body, foot })
}

fn writer(index: &Index) -> IndexWriter<TantivyDocument> {
    index
        .writer_with_num_threads(1, 15_000_000)
        .expect("writer should open")
}

fn bodies(records: &[StoredRecord]) -> Vec<String> {
    records.iter().map(|record| record.text("body")).collect()
}

#[test]
fn scenario_pages_are_ordered_by_sub_id_and_malformed_keys_are_counted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (index, fields) = create_page_index(dir.path());
    let mut writer = writer(&index);

    writer
        .add_document(doc!(fields.id => "7-2", fields.body => "B"))
        .expect("add");
    writer.commit().expect("commit first segment");
    writer
        .add_document(doc!(fields.id => "7-1", fields.body => "A"))
        .expect("add");
    writer
        .add_document(doc!(fields.id => "abc", fields.body => "lost"))
        .expect("add");
    writer
        .add_document(doc!(fields.body => "no key at all"))
        .expect("add");
    writer.commit().expect("commit second segment");
    drop(writer);

    let scanner = IndexScanner::open(dir.path(), IndexKind::Page).expect("scanner should open");
    let extractor = GroupedExtractor::new(&scanner).expect("census should succeed");

    assert_eq!(extractor.entity_ids(), &[7]);
    assert_eq!(extractor.census().malformed, vec![("abc".to_string(), 1)]);
    assert_eq!(extractor.census().missing_key_docs, 1);
    assert_eq!(extractor.census().malformed_docs(), 2);

    let group = extractor.group(7).expect("scan should succeed");
    assert_eq!(bodies(&group.records), vec!["A", "B"]);
    assert!(group.records.iter().all(|record| record.key.entity_id == 7));
    assert!(group.unreadable.is_empty());
}

#[test]
fn prefix_scan_stays_within_entity_and_sorts_numerically() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (index, fields) = create_page_index(dir.path());
    let mut writer = writer(&index);

    for (key, body) in [
        ("7-10", "seven ten"),
        ("7-2", "seven two"),
        ("70-1", "seventy one"),
        ("7-1", "seven one"),
        ("71-4", "seventy-one four"),
        ("6-9", "six nine"),
    ] {
        writer
            .add_document(doc!(fields.id => key, fields.body => body))
            .expect("add");
    }
    writer.commit().expect("commit");
    drop(writer);

    let scanner = IndexScanner::open(dir.path(), IndexKind::Page).expect("scanner should open");
    let extractor = GroupedExtractor::new(&scanner).expect("census should succeed");
    assert_eq!(extractor.entity_ids(), &[6, 7, 70, 71]);

    let group = extractor.group(7).expect("scan should succeed");
    assert_eq!(group.entity_id, 7);
    let sub_ids = group
        .records
        .iter()
        .map(|record| record.key.sub_id)
        .collect::<Vec<_>>();
    assert_eq!(sub_ids, vec![1, 2, 10]);

    assert!(extractor.group(8).expect("scan").records.is_empty());
}

#[test]
fn schema_is_sampled_and_multi_valued_fields_are_kept_as_lists() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (index, fields) = create_page_index(dir.path());
    let mut writer = writer(&index);
    writer
        .add_document(doc!(
            fields.id => "3-1",
            fields.body => "first",
            fields.body => "second",
            fields.foot => "note"
        ))
        .expect("add");
    writer.commit().expect("commit");
    drop(writer);

    let scanner = IndexScanner::open(dir.path(), IndexKind::Page).expect("scanner should open");
    assert_eq!(scanner.schema_fields(), &["body", "foot", "id"]);
    assert!(scanner.unreadable_segments().is_empty());

    let records = scanner.scan_entity(3).expect("scan should succeed").records;
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].fields.get("body"),
        Some(&vec!["first".to_string(), "second".to_string()])
    );
    assert_eq!(records[0].joined("body").as_deref(), Some("first;second"));
    assert_eq!(records[0].first("foot"), Some("note"));
}

#[test]
fn deleted_documents_are_not_scanned() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (index, fields) = create_page_index(dir.path());
    let mut writer = writer(&index);
    for key in ["5-1", "5-2", "5-3"] {
        writer
            .add_document(doc!(fields.id => key, fields.body => key))
            .expect("add");
    }
    writer.commit().expect("commit");
    writer.delete_term(Term::from_field_text(fields.id, "5-2"));
    writer.commit().expect("commit delete");
    drop(writer);

    let scanner = IndexScanner::open(dir.path(), IndexKind::Page).expect("scanner should open");
    let records = scanner.scan_entity(5).expect("scan should succeed").records;
    assert_eq!(bodies(&records).len(), 2);
    assert!(!bodies(&order_records(records)).contains(&"5-2".to_string()));

    let live = scanner.documents().filter(|doc| doc.is_ok()).count();
    assert_eq!(live, 2);
}

#[test]
fn census_counts_only_live_documents() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (index, fields) = create_page_index(dir.path());
    let mut writer = writer(&index);
    writer.set_merge_policy(Box::new(NoMergePolicy));
    writer
        .add_document(doc!(fields.id => "5-1", fields.body => "gone"))
        .expect("add");
    writer
        .add_document(doc!(fields.id => "6-1", fields.body => "kept"))
        .expect("add");
    writer
        .add_document(doc!(fields.id => "abc", fields.body => "gone too"))
        .expect("add");
    writer
        .add_document(doc!(fields.body => "no key at all"))
        .expect("add");
    writer.commit().expect("commit");
    writer.delete_term(Term::from_field_text(fields.id, "5-1"));
    writer.delete_term(Term::from_field_text(fields.id, "abc"));
    writer.commit().expect("commit deletes");
    drop(writer);

    let scanner = IndexScanner::open(dir.path(), IndexKind::Page).expect("scanner should open");
    let census = scanner.key_census().expect("census should succeed");

    assert_eq!(census.entity_ids, vec![6]);
    assert!(census.malformed.is_empty());
    assert_eq!(census.missing_key_docs, 1);
    assert_eq!(census.malformed_docs(), 1);
}

#[test]
fn unreadable_segment_is_reported_and_the_rest_still_scanned() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (index, fields) = create_page_index(dir.path());
    let mut writer = writer(&index);
    writer.set_merge_policy(Box::new(NoMergePolicy));
    writer
        .add_document(doc!(fields.id => "7-1", fields.body => "seven"))
        .expect("add");
    writer.commit().expect("commit first segment");
    writer
        .add_document(doc!(fields.id => "8-1", fields.body => "eight"))
        .expect("add");
    writer.commit().expect("commit second segment");
    drop(writer);

    let segments = index.searchable_segments().expect("segments");
    assert_eq!(segments.len(), 2);
    let terms = segments[0].meta().relative_path(SegmentComponent::Terms);
    drop(segments);
    drop(index);
    fs::remove_file(dir.path().join(terms)).expect("remove term dictionary");

    let scanner = IndexScanner::open(dir.path(), IndexKind::Page).expect("scanner should open");
    assert_eq!(scanner.unreadable_segments().len(), 1);
    assert_eq!(scanner.unreadable_segments()[0].kind(), "segment_unreadable");

    let extractor = GroupedExtractor::new(&scanner).expect("census should succeed");
    assert_eq!(extractor.entity_ids().len(), 1);
    let survivor = extractor.entity_ids()[0];
    assert!(survivor == 7 || survivor == 8);

    let group = extractor.group(survivor).expect("scan should succeed");
    assert_eq!(group.records.len(), 1);
    assert_eq!(scanner.documents().filter(|doc| doc.is_ok()).count(), 1);
}

#[test]
fn order_records_breaks_ties_by_position() {
    let records = vec![
        StoredRecord::new(CompositeKey::new(1, 2), 9).with_field("body", "late"),
        StoredRecord::new(CompositeKey::new(1, 2), 3).with_field("body", "early"),
        StoredRecord::new(CompositeKey::new(1, 1), 20).with_field("body", "first"),
    ];

    let ordered = order_records(records);
    assert_eq!(bodies(&ordered), vec!["first", "early", "late"]);
}

#[test]
fn entity_csv_escapes_quotes_and_reads_back_unicode() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("book_data").join("12.csv");
    let schema = vec!["body".to_string(), "foot".to_string(), "page".to_string()];
    let records = vec![
        StoredRecord::new(CompositeKey::new(12, 1), 4)
            .with_field("body", "قال \"المصنف\", رحمه الله")
            .with_field("foot", "(١) حاشية"),
        StoredRecord::new(CompositeKey::new(12, 2), 5)
            .with_field("body", "a")
            .with_field("body", "b"),
    ];

    let written =
        write_entity_csv(&path, IndexKind::Page, 12, &schema, &records).expect("write should succeed");
    assert_eq!(written, 2);

    let raw = fs::read_to_string(&path).expect("file should exist");
    assert!(raw.starts_with("DocID,BookID,PageID,body,foot,page\n"));
    assert!(raw.contains("\"\"المصنف\"\""));

    let read = read_entity_csv(&path).expect("read should succeed");
    assert_eq!(read.malformed_rows, 0);
    assert_eq!(read.records.len(), 2);
    assert_eq!(read.records[0], records[0]);
    assert_eq!(read.records[1].first("body"), Some("a;b"));
    assert_eq!(read.records[1].first("foot"), None);
}

#[test]
fn entity_csv_rows_with_bad_ids_are_counted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("3.csv");
    fs::write(
        &path,
        "\u{feff}DocID,BookID,PageID,body\n1,3,1,ok\nx,3,2,bad\n2,3,,bad\n",
    )
    .expect("write fixture");

    let read = read_entity_csv(&path).expect("read should succeed");
    assert_eq!(read.records.len(), 1);
    assert_eq!(read.malformed_rows, 2);
    assert_eq!(read.records[0].key, CompositeKey::new(3, 1));
}

#[test]
fn standard_csv_and_meta_lookup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("book.csv");
    let documents = vec![
        Ok(RawDocument {
            position: 0,
            fields: [
                ("id".to_string(), vec!["10".to_string()]),
                ("body_store".to_string(), vec!["line one\rline two".to_string()]),
            ]
            .into_iter()
            .collect(),
        }),
        Ok(RawDocument {
            position: 1,
            fields: [("id".to_string(), vec!["11".to_string()])]
                .into_iter()
                .collect(),
        }),
    ];

    let schema = vec!["body_store".to_string(), "id".to_string()];
    let written = write_standard_csv(&path, &schema, documents).expect("write should succeed");
    assert_eq!(written, 2);

    let meta = read_meta_csv(&path, "id", "body_store").expect("read should succeed");
    assert_eq!(meta.len(), 1);
    assert_eq!(meta.get("10").map(String::as_str), Some("line one\rline two"));
}
