use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

use crate::index::read_meta_csv;

const META_KEY_COLUMN: &str = "id";
const META_VALUE_COLUMN: &str = "body_store";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookRow {
    pub name: String,
    pub date: String,
    pub category_id: String,
    pub book_type: String,
    pub printed: String,
    pub authors: String,
    pub main_author: String,
    pub pdf_links: String,
    pub meta_data: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthorRow {
    pub name: String,
    pub death_number: String,
    pub death_text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryRow {
    pub name: String,
}

/// Get-by-id access to book, author and category attributes. Joins are the
/// caller's job.
pub trait MetadataLookup: Sync {
    fn book(&self, book_id: u64) -> Option<&BookRow>;
    fn author(&self, author_id: u64) -> Option<&AuthorRow>;
    fn category(&self, category_id: &str) -> Option<&CategoryRow>;
    fn book_meta(&self, book_id: u64) -> Option<&str>;
    fn author_meta(&self, author_id: u64) -> Option<&str>;
}

/// `master.db` tables plus the `book`/`author` meta text blocks, held in
/// memory and shared read-only by all workers.
#[derive(Debug, Default)]
pub struct MasterCatalog {
    books: HashMap<u64, BookRow>,
    authors: HashMap<u64, AuthorRow>,
    categories: HashMap<String, CategoryRow>,
    book_meta: HashMap<u64, String>,
    author_meta: HashMap<u64, String>,
}

impl MasterCatalog {
    pub fn load(master_db: &Path, book_meta_csv: &Path, author_meta_csv: &Path) -> Result<Self> {
        let connection = Connection::open_with_flags(
            master_db,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open database read-only: {}", master_db.display()))?;

        let mut catalog = Self::from_connection(&connection)?;
        catalog.book_meta = load_meta_blocks(book_meta_csv)?;
        catalog.author_meta = load_meta_blocks(author_meta_csv)?;

        info!(
            books = catalog.books.len(),
            authors = catalog.authors.len(),
            categories = catalog.categories.len(),
            book_meta = catalog.book_meta.len(),
            author_meta = catalog.author_meta.len(),
            "metadata catalog loaded"
        );

        Ok(catalog)
    }

    pub fn from_connection(connection: &Connection) -> Result<Self> {
        let mut catalog = Self::default();

        for row in load_table(connection, "book")? {
            let Some(book_id) = row_id(&row, "book_id") else {
                continue;
            };
            catalog.books.insert(
                book_id,
                BookRow {
                    name: column(&row, "book_name"),
                    date: column(&row, "book_date"),
                    category_id: column(&row, "book_category"),
                    book_type: column(&row, "book_type"),
                    printed: column(&row, "printed"),
                    authors: column(&row, "authors"),
                    main_author: column(&row, "main_author"),
                    pdf_links: column(&row, "pdf_links"),
                    meta_data: column(&row, "meta_data"),
                },
            );
        }

        for row in load_table(connection, "author")? {
            let Some(author_id) = row_id(&row, "author_id") else {
                continue;
            };
            catalog.authors.insert(
                author_id,
                AuthorRow {
                    name: column(&row, "author_name"),
                    death_number: column(&row, "death_number"),
                    death_text: column(&row, "death_text"),
                },
            );
        }

        for row in load_table(connection, "category")? {
            let category_id = column(&row, "category_id");
            if category_id.is_empty() {
                continue;
            }
            catalog.categories.insert(
                category_id,
                CategoryRow {
                    name: column(&row, "category_name"),
                },
            );
        }

        Ok(catalog)
    }

    #[cfg(test)]
    pub fn with_meta(mut self, book_meta: HashMap<u64, String>, author_meta: HashMap<u64, String>) -> Self {
        self.book_meta = book_meta;
        self.author_meta = author_meta;
        self
    }
}

impl MetadataLookup for MasterCatalog {
    fn book(&self, book_id: u64) -> Option<&BookRow> {
        self.books.get(&book_id)
    }

    fn author(&self, author_id: u64) -> Option<&AuthorRow> {
        self.authors.get(&author_id)
    }

    fn category(&self, category_id: &str) -> Option<&CategoryRow> {
        self.categories.get(category_id.trim())
    }

    fn book_meta(&self, book_id: u64) -> Option<&str> {
        self.book_meta.get(&book_id).map(String::as_str)
    }

    fn author_meta(&self, author_id: u64) -> Option<&str> {
        self.author_meta.get(&author_id).map(String::as_str)
    }
}

type Row = HashMap<String, String>;

fn table_exists(connection: &Connection, table: &str) -> Result<bool> {
    let count: i64 = connection.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Reads every row of `table` as column name to text. A missing table yields
/// no rows.
pub(super) fn load_table(connection: &Connection, table: &str) -> Result<Vec<Row>> {
    if !table_exists(connection, table)? {
        warn!(table, "table missing; lookups against it will be empty");
        return Ok(Vec::new());
    }

    let mut statement = connection
        .prepare(&format!("SELECT * FROM \"{table}\""))
        .with_context(|| format!("failed to prepare select on {table}"))?;
    let names = statement
        .column_names()
        .into_iter()
        .map(|name| name.trim_start_matches('\u{feff}').to_string())
        .collect::<Vec<_>>();

    let mut rows = statement.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Row::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            values.insert(name.clone(), sql_value_text(row.get_ref(idx)?));
        }
        out.push(values);
    }

    Ok(out)
}

/// Renders a SQLite value the way it should appear in the output: NULL as
/// empty, integral reals without a fraction.
pub(super) fn sql_value_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(number) => number.to_string(),
        ValueRef::Real(number) if number.fract() == 0.0 && number.is_finite() => {
            format!("{}", number as i64)
        }
        ValueRef::Real(number) => number.to_string(),
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        ValueRef::Blob(_) => String::new(),
    }
}

fn column(row: &Row, name: &str) -> String {
    row.get(name).cloned().unwrap_or_default()
}

fn row_id(row: &Row, name: &str) -> Option<u64> {
    row.get(name).and_then(|value| value.trim().parse().ok())
}

fn load_meta_blocks(path: &Path) -> Result<HashMap<u64, String>> {
    if !path.is_file() {
        return Ok(HashMap::new());
    }

    let raw = read_meta_csv(path, META_KEY_COLUMN, META_VALUE_COLUMN)?;
    Ok(raw
        .into_iter()
        .filter_map(|(key, value)| key.parse::<u64>().ok().map(|id| (id, value)))
        .collect())
}
