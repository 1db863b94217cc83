use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::{BuildArgs, ExtractArgs, TocDepthSource};
use crate::error::ExportError;

/// Paths inside a Shamela installation.
#[derive(Debug, Clone)]
pub struct ShamelaLayout {
    root: PathBuf,
}

impl ShamelaLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_dir(&self) -> PathBuf {
        self.root.join("database").join("store")
    }

    pub fn master_db(&self) -> PathBuf {
        self.root.join("database").join("master.db")
    }

    pub fn book_db_dir(&self) -> PathBuf {
        self.root.join("database").join("book")
    }

    /// Per-book databases are sharded by the last three digits of the id.
    pub fn book_db_path(&self, book_id: u64) -> PathBuf {
        let digits = book_id.to_string();
        let tail = &digits[digits.len().saturating_sub(3)..];
        self.book_db_dir()
            .join(format!("{tail:0>3}"))
            .join(format!("{book_id}.db"))
    }
}

/// Paths of everything this tool writes.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exported_indices(&self) -> PathBuf {
        self.root.join("exported_indices")
    }

    pub fn book_data_dir(&self) -> PathBuf {
        self.exported_indices().join("book_data")
    }

    pub fn title_data_dir(&self) -> PathBuf {
        self.exported_indices().join("title_data")
    }

    pub fn page_csv(&self, book_id: u64) -> PathBuf {
        self.book_data_dir().join(format!("{book_id}.csv"))
    }

    pub fn title_csv(&self, book_id: u64) -> PathBuf {
        self.title_data_dir().join(format!("title_{book_id}.csv"))
    }

    pub fn standard_csv(&self, index_name: &str) -> PathBuf {
        self.exported_indices().join(format!("{index_name}.csv"))
    }

    pub fn books_json_dir(&self) -> PathBuf {
        self.root.join("books_json")
    }

    pub fn book_json(&self, book_id: u64) -> PathBuf {
        self.books_json_dir().join(format!("{book_id}.json"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSelection {
    All,
    FirstOnly,
    Only(u64),
}

impl BookSelection {
    pub fn from_flags(test_single_book: bool, book_id: Option<u64>) -> Self {
        match (book_id, test_single_book) {
            (Some(id), _) => Self::Only(id),
            (None, true) => Self::FirstOnly,
            (None, false) => Self::All,
        }
    }

    /// Narrows an ascending id list to the selected books.
    pub fn apply(self, ids: Vec<u64>) -> Vec<u64> {
        match self {
            Self::All => ids,
            Self::FirstOnly => ids.into_iter().take(1).collect(),
            Self::Only(wanted) => ids.into_iter().filter(|id| *id == wanted).collect(),
        }
    }

    pub fn is_limited(self) -> bool {
        !matches!(self, Self::All)
    }
}

#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub shamela: ShamelaLayout,
    pub output: OutputLayout,
    pub selection: BookSelection,
    pub jobs: Option<usize>,
}

impl ExtractConfig {
    pub fn from_args(args: &ExtractArgs) -> Result<Self> {
        let config = Self {
            shamela: ShamelaLayout::new(&args.shamela_path),
            output: OutputLayout::new(&args.output_path),
            selection: BookSelection::from_flags(args.test_single_book, args.book_id),
            jobs: args.jobs,
        };
        config.check_prerequisites()?;
        Ok(config)
    }

    fn check_prerequisites(&self) -> Result<()> {
        let mut issues = Vec::new();
        let store_dir = self.shamela.store_dir();

        if !store_dir.is_dir() {
            issues.push(format!("index store not found: {}", store_dir.display()));
        } else if list_subdirectories(&store_dir)?.is_empty() {
            issues.push(format!("no index directories in {}", store_dir.display()));
        } else {
            info!(path = %store_dir.display(), "index store found");
        }

        finish_check(issues)
    }
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub shamela: ShamelaLayout,
    pub output: OutputLayout,
    pub generate_toc: bool,
    pub toc_depth: TocDepthSource,
    pub toc_level_field: String,
    pub selection: BookSelection,
    pub jobs: Option<usize>,
}

impl BuildConfig {
    pub fn from_args(args: &BuildArgs) -> Result<Self> {
        let config = Self {
            shamela: ShamelaLayout::new(&args.shamela_path),
            output: OutputLayout::new(&args.extracted_path),
            generate_toc: args.generate_toc,
            toc_depth: args.toc_depth,
            toc_level_field: args.toc_level_field.trim().to_string(),
            selection: BookSelection::from_flags(args.test_single_book, args.book_id),
            jobs: args.jobs,
        };
        config.check_prerequisites()?;
        Ok(config)
    }

    fn check_prerequisites(&self) -> Result<()> {
        let mut issues = Vec::new();

        let master_db = self.shamela.master_db();
        if master_db.is_file() {
            info!(path = %master_db.display(), "master database found");
        } else {
            issues.push(format!("master database not found: {}", master_db.display()));
        }

        let book_db_dir = self.shamela.book_db_dir();
        if !book_db_dir.is_dir() {
            warn!(
                path = %book_db_dir.display(),
                "book database directory missing; part labels and heading hierarchy will be empty"
            );
        }

        let exported = self.output.exported_indices();
        if !exported.is_dir() {
            issues.push(format!(
                "intermediate directory not found: {} (run `extract` first)",
                exported.display()
            ));
        } else {
            let book_data = self.output.book_data_dir();
            let csv_count = crate::util::directory_stats(&book_data, "csv")?.file_count;
            if csv_count == 0 {
                issues.push(format!(
                    "no per-book page files in {} (run `extract` first)",
                    book_data.display()
                ));
            } else {
                info!(path = %book_data.display(), files = csv_count, "page files found");
            }

            for name in ["book", "author"] {
                let path = self.output.standard_csv(name);
                if !path.is_file() {
                    warn!(path = %path.display(), "meta index export missing; meta blocks will be empty");
                }
            }
        }

        if self.toc_depth == TocDepthSource::Field && self.toc_level_field.is_empty() {
            issues.push("--toc-level-field must not be empty with --toc-depth field".to_string());
        }

        finish_check(issues)
    }
}

fn finish_check(issues: Vec<String>) -> Result<()> {
    if issues.is_empty() {
        return Ok(());
    }
    Err(ExportError::PrerequisiteMissing { issues }.into())
}

pub fn list_subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn book_db_path_uses_zero_padded_last_three_digits() {
        let layout = ShamelaLayout::new("/s");
        assert_eq!(
            layout.book_db_path(7),
            PathBuf::from("/s/database/book/007/7.db")
        );
        assert_eq!(
            layout.book_db_path(12345),
            PathBuf::from("/s/database/book/345/12345.db")
        );
    }

    #[test]
    fn selection_narrows_id_list() {
        let ids = vec![3, 5, 9];
        assert_eq!(BookSelection::All.apply(ids.clone()), vec![3, 5, 9]);
        assert_eq!(BookSelection::FirstOnly.apply(ids.clone()), vec![3]);
        assert_eq!(BookSelection::Only(9).apply(ids.clone()), vec![9]);
        assert!(BookSelection::Only(4).apply(ids).is_empty());
        assert_eq!(
            BookSelection::from_flags(true, Some(5)),
            BookSelection::Only(5)
        );
    }

    #[test]
    fn build_config_reports_every_missing_prerequisite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = BuildArgs {
            shamela_path: dir.path().join("shamela"),
            extracted_path: dir.path().join("out"),
            generate_toc: false,
            toc_depth: TocDepthSource::Parent,
            toc_level_field: "level".to_string(),
            test_single_book: false,
            book_id: None,
            jobs: None,
        };

        let err = BuildConfig::from_args(&args).expect_err("should fail");
        let message = err.to_string();
        assert!(message.contains("master database not found"));
        assert!(message.contains("intermediate directory not found"));
    }
}
