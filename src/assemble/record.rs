use std::collections::HashMap;

use anyhow::Result;
use serde_json::{Map, Value};

use super::book_db::BookStructure;
use super::footnotes::FootnoteSplitter;
use super::metadata::MetadataLookup;
use super::text::TextNormalizer;
use super::toc::{build_toc, classifier_for};
use crate::cli::TocDepthSource;
use crate::error::ExportError;
use crate::model::{
    AuthorRef, BookDocument, BookMetadata, BookPageRecord, CategoryRef, Page, Part, StoredRecord,
    TitleRecord,
};

const BODY_FIELD: &str = "body";
const FOOT_FIELD: &str = "foot";
const PART_FIELD: &str = "part";
const PAGE_FIELD: &str = "page";

#[derive(Debug, Clone)]
pub struct AssemblyOptions {
    pub generate_toc: bool,
    pub toc_depth: TocDepthSource,
    pub toc_level_field: String,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            generate_toc: false,
            toc_depth: TocDepthSource::Parent,
            toc_level_field: "level".to_string(),
        }
    }
}

/// A finished document plus the non-fatal problems met while joining it.
#[derive(Debug, Clone)]
pub struct AssembledBook {
    pub document: BookDocument,
    pub issues: Vec<ExportError>,
}

/// Turns one book's ordered page and title records into its output document.
/// Holds only compiled patterns and options, so one instance serves all
/// workers.
#[derive(Debug, Clone)]
pub struct RecordAssembler {
    options: AssemblyOptions,
    footnotes: FootnoteSplitter,
    markup: TextNormalizer,
}

impl RecordAssembler {
    pub fn new(options: AssemblyOptions) -> Result<Self> {
        Ok(Self {
            options,
            footnotes: FootnoteSplitter::new()?,
            markup: TextNormalizer::new()?,
        })
    }

    pub fn assemble(
        &self,
        book_id: u64,
        pages: &[StoredRecord],
        titles: &[StoredRecord],
        structure: &BookStructure,
        metadata: &dyn MetadataLookup,
    ) -> AssembledBook {
        let (meta, issues) = join_metadata(book_id, metadata);

        let page_records = pages
            .iter()
            .map(|record| self.page_record(record, structure))
            .collect::<Vec<_>>();
        let parts = group_parts(page_records);

        let table_of_contents = self.options.generate_toc.then(|| {
            let title_records = titles
                .iter()
                .map(|record| title_record(record, structure, &self.options.toc_level_field))
                .collect::<Vec<_>>();
            let classifier = classifier_for(self.options.toc_depth, structure);
            build_toc(&title_records, classifier.as_ref())
        });

        AssembledBook {
            document: BookDocument {
                book_id,
                title: meta.title,
                book_date: meta.book_date,
                category: meta.category,
                book_type: meta.book_type,
                printed: meta.printed,
                pdf_links: meta.pdf_links,
                meta_data: meta.meta_data,
                authors: meta.authors,
                book_meta: meta.book_meta,
                author_meta: meta.author_meta,
                parts,
                table_of_contents,
            },
            issues,
        }
    }

    fn page_record(&self, record: &StoredRecord, structure: &BookStructure) -> BookPageRecord {
        let sub_id = record.key.sub_id;
        let slot = structure.page(sub_id);

        let part = slot
            .map(|slot| slot.part.clone())
            .or_else(|| record.first(PART_FIELD).map(|value| value.trim().to_string()))
            .unwrap_or_default();
        let page_number = slot
            .map(|slot| slot.page.clone())
            .filter(|page| !page.is_empty())
            .or_else(|| record.first(PAGE_FIELD).map(|value| value.trim().to_string()))
            .unwrap_or_else(|| sub_id.to_string());

        let (body, footnote) = self
            .footnotes
            .split(&record.text(BODY_FIELD), &record.text(FOOT_FIELD));
        let plain_text = self.options.generate_toc;
        let parent_of = |title_id| structure.parent_or_root(title_id);

        BookPageRecord {
            sub_id,
            body: self.markup.normalize(&body, parent_of, plain_text),
            footnote: self.markup.normalize(&footnote, parent_of, plain_text),
            page_number,
            part,
        }
    }
}

fn title_record(record: &StoredRecord, structure: &BookStructure, level_field: &str) -> TitleRecord {
    let sub_id = record.key.sub_id;
    TitleRecord {
        sub_id,
        heading: record.text(BODY_FIELD),
        anchor: record
            .first(PAGE_FIELD)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or_else(|| structure.title_anchor(sub_id)),
        level: record
            .first(level_field)
            .and_then(|value| value.trim().parse::<i64>().ok()),
    }
}

/// Groups pages by part label in order of first appearance. Page order
/// within a part follows input order.
pub fn group_parts(pages: Vec<BookPageRecord>) -> Vec<Part> {
    let mut parts: Vec<Part> = Vec::new();
    let mut by_label: HashMap<String, usize> = HashMap::new();

    for page in pages {
        let idx = *by_label.entry(page.part.clone()).or_insert_with(|| {
            parts.push(Part {
                part: page.part.clone(),
                pages: Vec::new(),
            });
            parts.len() - 1
        });
        parts[idx].pages.push(Page {
            page_id: page.sub_id,
            page_number: page.page_number,
            body: page.body,
            footnote: page.footnote,
        });
    }

    parts
}

/// Looks up book, category and author rows. Missing rows leave the matching
/// fields empty and are reported as issues.
pub fn join_metadata(book_id: u64, lookup: &dyn MetadataLookup) -> (BookMetadata, Vec<ExportError>) {
    let mut issues = Vec::new();
    let mut meta = BookMetadata {
        pdf_links: Value::Object(Map::new()),
        meta_data: Value::Object(Map::new()),
        book_meta: split_meta_lines(lookup.book_meta(book_id)),
        ..BookMetadata::default()
    };

    let Some(book) = lookup.book(book_id) else {
        issues.push(ExportError::MetadataMissing {
            kind: "book",
            id: book_id.to_string(),
        });
        return (meta, issues);
    };

    meta.title = book.name.clone();
    meta.book_date = book.date.clone();
    meta.book_type = book.book_type.clone();
    meta.printed = book.printed.clone();
    meta.pdf_links = parse_json_field(&book.pdf_links);
    meta.meta_data = parse_json_field(&book.meta_data);

    let category_id = book.category_id.trim();
    if !category_id.is_empty() {
        meta.category.id = category_id.to_string();
        match lookup.category(category_id) {
            Some(category) => {
                meta.category = CategoryRef {
                    id: category_id.to_string(),
                    name: category.name.clone(),
                }
            }
            None => issues.push(ExportError::MetadataMissing {
                kind: "category",
                id: category_id.to_string(),
            }),
        }
    }

    let main_author = book.main_author.trim();
    for author_id in author_ids(&book.authors, main_author) {
        let found = author_id
            .parse::<u64>()
            .ok()
            .and_then(|id| lookup.author(id));
        match found {
            Some(author) => meta.authors.push(AuthorRef {
                id: author_id.clone(),
                name: author.name.clone(),
                death_number: author.death_number.clone(),
                death_text: author.death_text.clone(),
                is_main_author: author_id == main_author,
            }),
            None => issues.push(ExportError::MetadataMissing {
                kind: "author",
                id: author_id,
            }),
        }
    }

    meta.author_meta = split_meta_lines(
        main_author
            .parse::<u64>()
            .ok()
            .and_then(|id| lookup.author_meta(id)),
    );

    (meta, issues)
}

/// Comma separated author ids followed by the main author when it is not
/// already listed. Order is kept, duplicates dropped.
fn author_ids(authors: &str, main_author: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let listed = authors
        .trim()
        .trim_matches(|ch: char| ch == '[' || ch == ']')
        .split(',')
        .map(str::trim);
    for id in listed.chain(std::iter::once(main_author)) {
        if !id.is_empty() && !ids.iter().any(|known| known == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

fn parse_json_field(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(Value::Null) | Err(_) => Value::Object(Map::new()),
        Ok(value) => value,
    }
}

fn split_meta_lines(block: Option<&str>) -> Vec<String> {
    block
        .unwrap_or_default()
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
