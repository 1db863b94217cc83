use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use super::metadata::load_table;

/// Where a page sits in the printed edition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSlot {
    pub part: String,
    pub page: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TitleSlot {
    /// `None` for top-level headings.
    pub parent: Option<u64>,
    pub page_id: Option<u64>,
}

/// Page layout and heading hierarchy of one book, from its own database.
#[derive(Debug, Clone, Default)]
pub struct BookStructure {
    pages: HashMap<u64, PageSlot>,
    titles: HashMap<u64, TitleSlot>,
}

impl BookStructure {
    /// `Ok(None)` when the book has no database. A database that exists but
    /// cannot be read is an error.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }

        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open book database: {}", path.display()))?;

        let structure = Self::from_connection(&connection)
            .with_context(|| format!("failed to read book database: {}", path.display()))?;
        debug!(
            path = %path.display(),
            pages = structure.pages.len(),
            titles = structure.titles.len(),
            "book database loaded"
        );
        Ok(Some(structure))
    }

    pub fn from_connection(connection: &Connection) -> Result<Self> {
        let mut structure = Self::default();

        for row in load_table(connection, "page")? {
            let Some(id) = row.get("id").and_then(|value| value.trim().parse::<u64>().ok()) else {
                continue;
            };
            structure.pages.insert(
                id,
                PageSlot {
                    part: row.get("part").map(|v| v.trim().to_string()).unwrap_or_default(),
                    page: row.get("page").map(|v| v.trim().to_string()).unwrap_or_default(),
                },
            );
        }

        for row in load_table(connection, "title")? {
            let Some(id) = row.get("id").and_then(|value| value.trim().parse::<u64>().ok()) else {
                continue;
            };
            let parent = row
                .get("parent")
                .and_then(|value| value.trim().parse::<u64>().ok())
                .filter(|parent| *parent != 0 && *parent != id);
            let page_id = row
                .get("page")
                .and_then(|value| value.trim().parse::<u64>().ok());
            structure.titles.insert(id, TitleSlot { parent, page_id });
        }

        Ok(structure)
    }

    pub fn page(&self, page_id: u64) -> Option<&PageSlot> {
        self.pages.get(&page_id)
    }

    pub fn title(&self, title_id: u64) -> Option<&TitleSlot> {
        self.titles.get(&title_id)
    }

    /// Parent heading id, `0` when the heading is top-level or unknown.
    pub fn parent_or_root(&self, title_id: u64) -> u64 {
        self.title(title_id)
            .and_then(|slot| slot.parent)
            .unwrap_or(0)
    }

    /// `"<part>/<page>"` for a heading, resolved through the page layout.
    pub fn title_anchor(&self, title_id: u64) -> Option<String> {
        let page_id = self.title(title_id)?.page_id?;
        let slot = self.page(page_id)?;
        Some(format!("{}/{}", slot.part, slot.page))
    }
}
