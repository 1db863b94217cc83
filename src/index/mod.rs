mod grouped;
mod scanner;
mod tabular;
#[cfg(test)]
mod tests;

pub use grouped::{GroupedExtractor, order_records};
pub use scanner::{IndexScanner, RawDocument};
pub use tabular::{read_entity_csv, read_meta_csv, write_entity_csv, write_standard_csv};

/// Field holding the `<bookId>-<subId>` key in the page and title indices.
pub const KEY_FIELD: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Page,
    Title,
    Standard,
}

impl IndexKind {
    pub fn from_dir_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("page") {
            Self::Page
        } else if name.eq_ignore_ascii_case("title") {
            Self::Title
        } else {
            Self::Standard
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Title => "title",
            Self::Standard => "standard",
        }
    }

    /// Header of the sub-id column in per-book intermediate files.
    pub fn sub_id_column(self) -> &'static str {
        match self {
            Self::Page => "PageID",
            Self::Title => "TitleID",
            Self::Standard => "SubID",
        }
    }

    pub fn is_grouped(self) -> bool {
        matches!(self, Self::Page | Self::Title)
    }
}
