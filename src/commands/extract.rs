use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::ExtractArgs;
use crate::config::{ExtractConfig, list_subdirectories};
use crate::error::ExportError;
use crate::index::{GroupedExtractor, IndexKind, IndexScanner, write_entity_csv, write_standard_csv};
use crate::model::{RunManifest, RunPaths};
use crate::report::{Outcome, RunLog, output_stats, run_pool};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

pub fn run(args: ExtractArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let stamp = utc_compact_string(started_ts);
    let run_id = format!("extract-{stamp}");

    let config = ExtractConfig::from_args(&args)?;
    let output = &config.output;
    for dir in [
        output.exported_indices(),
        output.book_data_dir(),
        output.title_data_dir(),
        output.log_dir(),
    ] {
        ensure_directory(&dir)?;
    }

    info!(
        shamela = %config.shamela.root().display(),
        output = %output.root().display(),
        run_id = %run_id,
        "starting extract"
    );
    if config.selection.is_limited() {
        info!(selection = ?config.selection, "test mode: book selection is limited");
    }

    let mut log = RunLog::new(&output.log_dir(), "extract", &stamp);
    let mut warnings = Vec::new();

    for dir in list_subdirectories(&config.shamela.store_dir())? {
        let name = dir
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or_default()
            .to_string();
        let kind = IndexKind::from_dir_name(&name);

        let scanner = match IndexScanner::open(&dir, kind) {
            Ok(scanner) => scanner,
            Err(err) => {
                let issue = ExportError::SegmentUnreadable {
                    index: name.clone(),
                    segment: "*".to_string(),
                    reason: format!("{err:#}"),
                };
                warnings.push(issue.to_string());
                log.record(Outcome::skipped(format!("index:{name}"), &issue));
                continue;
            }
        };

        for issue in scanner.unreadable_segments() {
            warnings.push(issue.to_string());
            log.record(Outcome::skipped(format!("index:{name}"), issue));
        }

        if kind.is_grouped() {
            export_grouped(&config, &scanner, &mut log)?;
        } else {
            export_standard(&config, &scanner, &mut log);
        }
        log.flush()?;
    }

    log.flush()?;
    log.log_summary();

    let outputs = vec![
        output_stats("book_data", &output.book_data_dir(), "csv")?,
        output_stats("title_data", &output.title_data_dir(), "csv")?,
        output_stats("standard_indices", &output.exported_indices(), "csv")?,
    ];
    for stats in &outputs {
        info!(
            label = %stats.label,
            files = stats.file_count,
            total_mb = %format!("{:.2}", stats.total_bytes as f64 / (1024.0 * 1024.0)),
            "extract output"
        );
    }

    let manifest_path = output.log_dir().join(format!("extract_run_{stamp}.json"));
    let manifest = RunManifest {
        manifest_version: 1,
        run_id,
        phase: "extract".to_string(),
        status: "completed".to_string(),
        started_at,
        updated_at: now_utc_string(),
        elapsed_seconds: log.elapsed_seconds(),
        command: render_extract_command(&args),
        paths: RunPaths {
            shamela_path: config.shamela.root().display().to_string(),
            output_path: output.root().display().to_string(),
            log_path: log.path().display().to_string(),
        },
        summary: log.summary().clone(),
        outputs,
        output_hashes: Vec::new(),
        warnings,
    };
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote extract run manifest");

    Ok(())
}

/// Exports a page or title index as one file per book.
fn export_grouped(config: &ExtractConfig, scanner: &IndexScanner, log: &mut RunLog) -> Result<()> {
    let name = scanner.name().to_string();
    let extractor = match GroupedExtractor::new(scanner) {
        Ok(extractor) => extractor,
        Err(err) => {
            let issue = ExportError::SegmentUnreadable {
                index: name.clone(),
                segment: "*".to_string(),
                reason: format!("{err:#}"),
            };
            log.record(Outcome::skipped(format!("index:{name}"), &issue));
            return Ok(());
        }
    };

    let census = extractor.census();
    for (key, docs) in &census.malformed {
        let issue = ExportError::MalformedKey {
            index: name.clone(),
            key: key.clone(),
        };
        log.record(Outcome::skipped(format!("{name}:key:{key}"), &issue).with_malformed(*docs));
    }
    if census.missing_key_docs > 0 {
        let issue = ExportError::MalformedKey {
            index: name.clone(),
            key: "<missing>".to_string(),
        };
        log.record(
            Outcome::skipped(format!("{name}:key:<missing>"), &issue)
                .with_malformed(census.missing_key_docs),
        );
    }

    let book_ids = config.selection.apply(extractor.entity_ids().to_vec());
    info!(
        index = %name,
        entities = extractor.entity_ids().len(),
        malformed_docs = census.malformed_docs(),
        "key census complete"
    );
    if book_ids.is_empty() {
        warn!(index = %name, selection = ?config.selection, "no books to export");
        return Ok(());
    }
    info!(index = %name, books = book_ids.len(), "exporting books");

    run_pool(config.jobs, &book_ids, log, |book_id| {
        export_book(config, &extractor, book_id)
    })
}

fn export_book(config: &ExtractConfig, extractor: &GroupedExtractor<'_>, book_id: u64) -> Outcome {
    let scanner = extractor.scanner();
    let kind = scanner.kind();
    let subject = format!("{}:book:{book_id}", scanner.name());
    let path = match kind {
        IndexKind::Title => config.output.title_csv(book_id),
        _ => config.output.page_csv(book_id),
    };

    let written = extractor.group(book_id).and_then(|group| {
        let records =
            write_entity_csv(&path, kind, group.entity_id, scanner.schema_fields(), &group.records)?;
        Ok((records, group.unreadable))
    });

    match written {
        Ok((records, unreadable)) => {
            info!(
                index = %scanner.name(),
                book_id,
                records,
                unreadable = unreadable.len(),
                path = %path.display(),
                "exported book"
            );
            exported_outcome(subject, records, &unreadable)
        }
        Err(err) => Outcome::failed(
            subject,
            &ExportError::AssemblyFailure {
                book_id,
                reason: format!("{err:#}"),
            },
        ),
    }
}

/// Documents whose stored fields could not be read count as malformed and
/// are listed on the book's log entry.
fn exported_outcome(subject: String, records: usize, unreadable: &[ExportError]) -> Outcome {
    Outcome::succeeded(subject, "exported")
        .with_records(records as u64)
        .with_malformed(unreadable.len() as u64)
        .with_issues(unreadable)
}

/// Exports a non-keyed index as a single file.
fn export_standard(config: &ExtractConfig, scanner: &IndexScanner, log: &mut RunLog) {
    let name = scanner.name();
    let path = config.output.standard_csv(name);
    let subject = format!("index:{name}");

    match write_standard_csv(&path, scanner.schema_fields(), scanner.documents()) {
        Ok(records) => {
            info!(index = %name, records, path = %path.display(), "exported index");
            log.record(Outcome::succeeded(subject, "exported").with_records(records as u64));
        }
        Err(err) => {
            let issue = ExportError::SegmentUnreadable {
                index: name.to_string(),
                segment: "*".to_string(),
                reason: format!("{err:#}"),
            };
            log.record(Outcome::failed(subject, &issue));
        }
    }
}

fn render_extract_command(args: &ExtractArgs) -> String {
    let mut command = vec![
        "shamela-export".to_string(),
        "extract".to_string(),
        "--shamela-path".to_string(),
        args.shamela_path.display().to_string(),
        "--output-path".to_string(),
        args.output_path.display().to_string(),
    ];
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
    use std::fs;
    use std::path::Path;

    use tantivy::schema::{STORED, STRING, Schema, TEXT};
    use tantivy::{Index, IndexWriter, TantivyDocument, doc};

    use super::*;
    use crate::config::{OutputLayout, ShamelaLayout};

    fn write_page_index(dir: &Path, docs: &[(Option<&str>, &str)]) {
        fs::create_dir_all(dir).expect("mkdir");
        let mut builder = Schema::builder();
        let id = builder.add_text_field("id", STRING | STORED);
        let body = builder.add_text_field("body", TEXT | STORED);
        let index = Index::create_in_dir(dir, builder.build()).expect("index should be created");
        let mut writer: IndexWriter<TantivyDocument> = index
            .writer_with_num_threads(1, 15_000_000)
            .expect("writer should open");
        for (key, text) in docs {
            let document = match key {
                Some(key) => doc!(id => *key, body => *text),
                None => doc!(body => *text),
            };
            writer.add_document(document).expect("add");
        }
        writer.commit().expect("commit");
    }

    fn extract_args(shamela: &Path, output: &Path) -> ExtractArgs {
        ExtractArgs {
            shamela_path: shamela.to_path_buf(),
            output_path: output.to_path_buf(),
            test_single_book: false,
            book_id: None,
            jobs: Some(2),
        }
    }

    fn read_manifest(output: &OutputLayout) -> serde_json::Value {
        let path = fs::read_dir(output.log_dir())
            .expect("log dir should exist")
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .find(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("extract_run_"))
            })
            .expect("manifest should be written");
        serde_json::from_str(&fs::read_to_string(path).expect("read manifest"))
            .expect("manifest should be json")
    }

    #[test]
    fn malformed_key_is_counted_once_and_never_exported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let shamela = dir.path().join("shamela");
        let store = ShamelaLayout::new(&shamela).store_dir();
        write_page_index(
            &store.join("page"),
            &[(Some("7-2"), "B"), (Some("7-1"), "A"), (Some("abc"), "lost")],
        );
        // not an index at all: skipped as a whole, the run goes on
        fs::create_dir_all(store.join("broken")).expect("mkdir");

        let out = dir.path().join("out");
        run(extract_args(&shamela, &out)).expect("extract should finish");

        let output = OutputLayout::new(&out);
        let exported = fs::read_dir(output.book_data_dir())
            .expect("book data dir")
            .count();
        assert_eq!(exported, 1);
        let csv = fs::read_to_string(output.page_csv(7)).expect("page file for book 7");
        assert!(csv.contains(",A,") && csv.contains(",B,"));
        assert!(!csv.contains("lost"));

        let summary = &read_manifest(&output)["summary"];
        assert_eq!(summary["malformed_records"], 1);
        assert_eq!(summary["records"], 2);
        assert_eq!(summary["reasons"]["malformed_key"], 1);
        assert_eq!(summary["reasons"]["segment_unreadable"], 1);
    }

    #[test]
    fn unreadable_documents_are_counted_on_the_book_entry() {
        let issue = ExportError::SegmentUnreadable {
            index: "page".to_string(),
            segment: "abcd1234".to_string(),
            reason: "document 3 with key 7-4: checksum mismatch".to_string(),
        };
        let outcome = exported_outcome("page:book:7".to_string(), 5, &[issue]);

        assert_eq!(outcome.records, Some(5));
        assert_eq!(outcome.malformed, 1);
        assert_eq!(outcome.issues.len(), 1);
        assert!(outcome.issues[0].contains("7-4"));

        let dir = tempfile::tempdir().expect("tempdir");
        let mut log = RunLog::new(dir.path(), "extract", "unreadable");
        log.record(outcome);
        assert_eq!(log.summary().records, 5);
        assert_eq!(log.summary().malformed_records, 1);
    }
}
