use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::assemble::{AssemblyOptions, BookStructure, MasterCatalog, RecordAssembler};
use crate::cli::BuildArgs;
use crate::config::BuildConfig;
use crate::error::ExportError;
use crate::index::{order_records, read_entity_csv};
use crate::model::{RunManifest, RunPaths, StoredRecord, TocNode};
use crate::report::{Outcome, RunLog, output_stats, run_pool};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

/// Read-only state shared by every book worker.
struct BuildContext<'a> {
    config: &'a BuildConfig,
    catalog: &'a MasterCatalog,
    assembler: &'a RecordAssembler,
}

pub fn run(args: BuildArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let stamp = utc_compact_string(started_ts);
    let run_id = format!("build-{stamp}");

    let config = BuildConfig::from_args(&args)?;
    let output = &config.output;
    ensure_directory(&output.books_json_dir())?;
    ensure_directory(&output.log_dir())?;

    info!(
        shamela = %config.shamela.root().display(),
        extracted = %output.root().display(),
        generate_toc = config.generate_toc,
        toc_depth = config.toc_depth.as_str(),
        run_id = %run_id,
        "starting build"
    );

    let catalog = MasterCatalog::load(
        &config.shamela.master_db(),
        &output.standard_csv("book"),
        &output.standard_csv("author"),
    )?;
    let assembler = RecordAssembler::new(AssemblyOptions {
        generate_toc: config.generate_toc,
        toc_depth: config.toc_depth,
        toc_level_field: config.toc_level_field.clone(),
    })?;

    let book_ids = config
        .selection
        .apply(discover_book_ids(&output.book_data_dir())?);
    info!(books = book_ids.len(), "books to build");
    if book_ids.is_empty() {
        warn!(selection = ?config.selection, "no books selected");
    }

    let mut log = RunLog::new(&output.log_dir(), "build", &stamp);
    let context = BuildContext {
        config: &config,
        catalog: &catalog,
        assembler: &assembler,
    };
    run_pool(config.jobs, &book_ids, &mut log, |book_id| {
        build_book(&context, book_id)
    })?;
    log.log_summary();

    let json_stats = output_stats("books_json", &output.books_json_dir(), "json")?;
    info!(
        files = json_stats.file_count,
        total_mb = %format!("{:.2}", json_stats.total_bytes as f64 / (1024.0 * 1024.0)),
        average_kb = %format!("{:.2}", json_stats.average_bytes as f64 / 1024.0),
        "build output"
    );

    let mut output_hashes = log.digests().to_vec();
    output_hashes.sort_by(|a, b| a.subject.cmp(&b.subject));

    let manifest_path = output.log_dir().join(format!("build_run_{stamp}.json"));
    let manifest = RunManifest {
        manifest_version: 1,
        run_id,
        phase: "build".to_string(),
        status: "completed".to_string(),
        started_at,
        updated_at: now_utc_string(),
        elapsed_seconds: log.elapsed_seconds(),
        command: render_build_command(&args),
        paths: RunPaths {
            shamela_path: config.shamela.root().display().to_string(),
            output_path: output.root().display().to_string(),
            log_path: log.path().display().to_string(),
        },
        summary: log.summary().clone(),
        outputs: vec![json_stats],
        output_hashes,
        warnings: Vec::new(),
    };
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote build run manifest");

    Ok(())
}

fn build_book(context: &BuildContext<'_>, book_id: u64) -> Outcome {
    let subject = format!("book:{book_id}");
    match try_build_book(context, book_id) {
        Ok(outcome) => outcome,
        Err(err) => Outcome::failed(
            subject,
            &ExportError::AssemblyFailure {
                book_id,
                reason: format!("{err:#}"),
            },
        ),
    }
}

fn try_build_book(context: &BuildContext<'_>, book_id: u64) -> Result<Outcome> {
    let output = &context.config.output;
    debug!(book_id, "building book");

    let pages = read_entity_csv(&output.page_csv(book_id))?;
    let mut malformed = pages.malformed_rows as u64;
    let (pages, foreign) = split_foreign(pages.records, book_id);
    malformed += foreign;
    let pages = order_records(pages);

    let titles = if context.config.generate_toc {
        let path = output.title_csv(book_id);
        if path.is_file() {
            let titles = read_entity_csv(&path)?;
            malformed += titles.malformed_rows as u64;
            let (titles, foreign) = split_foreign(titles.records, book_id);
            malformed += foreign;
            order_records(titles)
        } else {
            debug!(book_id, path = %path.display(), "no title file");
            Vec::new()
        }
    } else {
        Vec::new()
    };

    let db_path = context.config.shamela.book_db_path(book_id);
    let structure = match BookStructure::load(&db_path)? {
        Some(structure) => structure,
        None => {
            debug!(book_id, path = %db_path.display(), "no book database");
            BookStructure::default()
        }
    };

    let assembled = context
        .assembler
        .assemble(book_id, &pages, &titles, &structure, context.catalog);
    let document = assembled.document;

    let path = output.book_json(book_id);
    let sha256 = write_json_pretty(&path, &document)?;

    let forest = document.table_of_contents.as_deref().unwrap_or_default();
    let toc_nodes = forest.iter().map(TocNode::count).sum::<usize>();
    let toc_levels = forest.iter().map(TocNode::depth).max().unwrap_or(0);
    info!(
        book_id,
        parts = document.parts.len(),
        pages = document.page_count(),
        toc_nodes,
        toc_levels,
        path = %path.display(),
        "built book"
    );

    Ok(Outcome::succeeded(format!("book:{book_id}"), "built")
        .with_records(document.page_count() as u64)
        .with_malformed(malformed)
        .with_sha256(sha256)
        .with_issues(&assembled.issues))
}

/// Separates rows that belong to another book, which a hand-edited or
/// mismatched intermediate file can contain.
fn split_foreign(records: Vec<StoredRecord>, book_id: u64) -> (Vec<StoredRecord>, u64) {
    let total = records.len();
    let own = records
        .into_iter()
        .filter(|record| record.key.entity_id == book_id)
        .collect::<Vec<_>>();
    let foreign = (total - own.len()) as u64;
    (own, foreign)
}

/// Book ids of the per-book page files, ascending.
fn discover_book_ids(book_data: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    let entries = fs::read_dir(book_data)
        .with_context(|| format!("failed to read {}", book_data.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", book_data.display()))?;
        let path = entry.path();
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if !is_csv {
            continue;
        }
        match path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<u64>().ok())
        {
            Some(id) => ids.push(id),
            None => warn!(path = %path.display(), "skipping page file without a numeric book id"),
        }
    }
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

fn render_build_command(args: &BuildArgs) -> String {
    let mut command = vec![
        "shamela-export".to_string(),
        "build".to_string(),
        "--shamela-path".to_string(),
        args.shamela_path.display().to_string(),
        "--extracted-path".to_string(),
        args.extracted_path.display().to_string(),
    ];
    if args.generate_toc {
        command.push("--generate-toc".to_string());
        command.push("--toc-depth".to_string());
        command.push(args.toc_depth.as_str().to_string());
        command.push("--toc-level-field".to_string());
        command.push(args.toc_level_field.clone());
    }
    if args.test_single_book {
        command.push("--test-single-book".to_string());
    }
    if let Some(book_id) = args.book_id {
        command.push("--book-id".to_string());
        command.push(book_id.to_string());
    }
    if let Some(jobs) = args.jobs {
        command.push("--jobs".to_string());
        command.push(jobs.to_string());
    }
    command.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CompositeKey;

    #[test]
    fn book_ids_come_from_numeric_csv_names_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["30.csv", "4.csv", "notes.csv", "12.json", "100.CSV"] {
            fs::write(dir.path().join(name), "DocID,BookID,PageID\n").expect("write");
        }

        let ids = discover_book_ids(dir.path()).expect("discover");
        assert_eq!(ids, vec![4, 30, 100]);
    }

    #[test]
    fn rows_of_other_books_are_counted_not_assembled() {
        let records = vec![
            StoredRecord::new(CompositeKey::new(5, 1), 0),
            StoredRecord::new(CompositeKey::new(6, 1), 1),
            StoredRecord::new(CompositeKey::new(5, 2), 2),
        ];

        let (own, foreign) = split_foreign(records, 5);
        assert_eq!(own.len(), 2);
        assert_eq!(foreign, 1);
    }
}
