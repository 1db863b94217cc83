//! Book assembly: metadata join, page grouping, footnote separation, markup
//! normalisation and table-of-contents construction.

mod book_db;
mod footnotes;
mod metadata;
mod record;
mod text;
mod toc;


pub use book_db::BookStructure;
pub use metadata::MasterCatalog;
pub use record::{AssemblyOptions, RecordAssembler};
