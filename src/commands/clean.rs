use std::fs;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::CleanArgs;
use crate::config::OutputLayout;
use crate::util::directory_stats;

pub fn run(args: CleanArgs) -> Result<()> {
    let output = OutputLayout::new(&args.output_path);
    let book_data = output.book_data_dir();

    if !book_data.is_dir() {
        warn!(path = %book_data.display(), "nothing to clean");
        return Ok(());
    }

    let stats = directory_stats(&book_data, "csv")?;
    if !args.yes {
        bail!(
            "refusing to delete {} ({} page files, {} bytes) without --yes",
            book_data.display(),
            stats.file_count,
            stats.total_bytes
        );
    }

    fs::remove_dir_all(&book_data)
        .with_context(|| format!("failed to delete {}", book_data.display()))?;
    info!(
        path = %book_data.display(),
        files = stats.file_count,
        total_bytes = stats.total_bytes,
        "deleted intermediate page files"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_requires_confirmation_and_removes_only_book_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = OutputLayout::new(dir.path());
        fs::create_dir_all(output.book_data_dir()).expect("mkdir");
        fs::create_dir_all(output.title_data_dir()).expect("mkdir");
        fs::write(output.page_csv(1), "DocID,BookID,PageID\n").expect("write");

        let refused = run(CleanArgs {
            output_path: dir.path().to_path_buf(),
            yes: false,
        });
        assert!(refused.is_err());
        assert!(output.page_csv(1).is_file());

        run(CleanArgs {
            output_path: dir.path().to_path_buf(),
            yes: true,
        })
        .expect("clean should succeed");
        assert!(!output.book_data_dir().exists());
        assert!(output.title_data_dir().is_dir());
    }
}
