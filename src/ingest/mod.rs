//! Dump passes over the versioned store.
//!
//! A pass captures its watermark once, then commits every significant dump
//! line in its own transaction. The redirect pass must run before the page
//! pass of the same batch; [`ingest_dumps`] fixes that order.

pub mod error;

use std::io::BufRead;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::dump::{DumpLines, DumpTable, parse_line, qualify_page, qualify_redirect};
use crate::resolve::{PageResolution, resolve_page, resolve_redirect};
use crate::store::{PassStats, RunRecord, StoreBatch, VersionedStore, Watermark};

pub use error::IngestError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    #[serde(flatten)]
    pub run: RunRecord,
    /// An earlier pass over the same table consumed a byte-identical dump.
    pub previously_ingested: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub redirect: Option<PassReport>,
    pub page: PassReport,
}

/// Redirect pass (when a redirect dump is given) followed by the page pass.
pub fn ingest_dumps(
    store: &VersionedStore,
    redirect_dump: Option<&Path>,
    page_dump: &Path,
) -> Result<IngestReport, IngestError> {
    let redirect = match redirect_dump {
        Some(path) => Some(ingest_redirect_dump(store, path)?),
        None => {
            warn!("No redirect dump given; page records can only bind to existing redirect versions");
            None
        }
    };
    let page = ingest_page_dump(store, page_dump)?;
    Ok(IngestReport { redirect, page })
}

pub fn ingest_redirect_dump(
    store: &VersionedStore,
    path: &Path,
) -> Result<PassReport, IngestError> {
    ingest_dump(store, DumpTable::Redirect, path)
}

pub fn ingest_page_dump(store: &VersionedStore, path: &Path) -> Result<PassReport, IngestError> {
    ingest_dump(store, DumpTable::Page, path)
}

pub fn ingest_dump(
    store: &VersionedStore,
    table: DumpTable,
    path: &Path,
) -> Result<PassReport, IngestError> {
    let label = path.to_string_lossy().into_owned();
    let lines = DumpLines::open(path).map_err(|source| IngestError::Open {
        path: label.clone(),
        source,
    })?;
    run_pass(store, table, lines, label)
}

/// Same as [`ingest_dump`] over an already-open reader; `label` names the
/// source in logs and in the run ledger.
pub fn ingest_lines<R: BufRead>(
    store: &VersionedStore,
    table: DumpTable,
    reader: R,
    label: &str,
) -> Result<PassReport, IngestError> {
    run_pass(store, table, DumpLines::new(reader), label.to_string())
}

fn run_pass<R: BufRead>(
    store: &VersionedStore,
    table: DumpTable,
    mut lines: DumpLines<R>,
    label: String,
) -> Result<PassReport, IngestError> {
    let started_at = now_iso8601();
    let watermark = match table {
        DumpTable::Redirect => store.max_redirect_version()?,
        DumpTable::Page => store.max_page_version()?,
    };
    info!(
        table = table.as_str(),
        dump = %label,
        watermark = ?watermark.get(),
        "Starting pass"
    );

    let mut stats = PassStats::default();
    while let Some((line_number, line)) =
        lines.next_line().map_err(|source| IngestError::Read {
            path: label.clone(),
            source,
        })?
    {
        if !table.is_insert_line(&line) {
            continue;
        }
        stats.insert_lines += 1;
        ingest_line(store, table, &line, watermark, &mut stats)
            .map_err(|source| IngestError::at_line(table.as_str(), line_number, source))?;
    }
    stats.lines_read = lines.lines_read() as u64;

    let dump_sha256 = lines.finish_digest();
    let previously_ingested = store.runs_with_digest(table.as_str(), &dump_sha256)? > 0;
    if previously_ingested {
        warn!(
            table = table.as_str(),
            dump = %label,
            sha256 = %dump_sha256,
            "Identical dump was ingested before; versions advanced again"
        );
    }

    let run = RunRecord {
        table: table.as_str().to_string(),
        dump_path: label,
        dump_sha256,
        watermark,
        started_at,
        finished_at: now_iso8601(),
        stats,
    };
    store.record_run(&run)?;

    info!(
        table = table.as_str(),
        lines = stats.lines_read,
        tuples = stats.tuples_seen,
        qualified = stats.rows_qualified,
        written = stats.records_written,
        missing_peers = stats.missing_peers,
        "Pass complete"
    );
    Ok(PassReport {
        run,
        previously_ingested,
    })
}

/// All writes for one dump line, committed together.
fn ingest_line(
    store: &VersionedStore,
    table: DumpTable,
    line: &str,
    watermark: Watermark,
    stats: &mut PassStats,
) -> rusqlite::Result<()> {
    let batch = store.batch()?;
    for fields in parse_line(line, table) {
        stats.tuples_seen += 1;
        match table {
            DumpTable::Redirect => ingest_redirect_tuple(&batch, &fields, watermark, stats)?,
            DumpTable::Page => ingest_page_tuple(&batch, &fields, watermark, stats)?,
        }
    }
    batch.commit()
}

fn ingest_redirect_tuple(
    batch: &StoreBatch<'_>,
    fields: &[&str],
    watermark: Watermark,
    stats: &mut PassStats,
) -> rusqlite::Result<()> {
    let Some(row) = qualify_redirect(fields) else {
        trace!(?fields, "Redirect row filtered");
        return Ok(());
    };
    stats.rows_qualified += 1;
    resolve_redirect(batch, &row, watermark)?;
    stats.records_written += 1;
    Ok(())
}

fn ingest_page_tuple(
    batch: &StoreBatch<'_>,
    fields: &[&str],
    watermark: Watermark,
    stats: &mut PassStats,
) -> rusqlite::Result<()> {
    let Some(row) = qualify_page(fields) else {
        trace!(?fields, "Page row filtered");
        return Ok(());
    };
    stats.rows_qualified += 1;
    match resolve_page(batch, &row, watermark)? {
        PageResolution::Written(_) => stats.records_written += 1,
        PageResolution::MissingPeer {
            page_id,
            wanted_version,
        } => {
            debug!(page_id, wanted_version, "No redirect at wanted version");
            stats.missing_peers += 1;
        }
    }
    Ok(())
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redirect_pass(store: &VersionedStore, dump: &str) -> PassReport {
        ingest_lines(store, DumpTable::Redirect, dump.as_bytes(), "redirect.sql")
            .expect("redirect pass")
    }

    fn page_pass(store: &VersionedStore, dump: &str) -> PassReport {
        ingest_lines(store, DumpTable::Page, dump.as_bytes(), "page.sql").expect("page pass")
    }

    const REDIRECTS: &str = "\
-- MySQL dump
INSERT INTO `redirect` VALUES (10,0,'Ab','',''),(11,0,'Cd','',''),(12,4,'Ef','','');
";

    const PAGES: &str = "\
INSERT INTO `page` VALUES (10,0,'x','',1,0),(11,0,'y','',0,0),(13,0,'z','',1,0);
";

    #[test]
    fn first_redirect_pass_writes_version_zero_once_per_id() {
        let store = VersionedStore::open_in_memory().expect("in-memory sqlite");
        let report = redirect_pass(&store, REDIRECTS);

        assert_eq!(report.run.watermark, Watermark::EMPTY);
        assert_eq!(report.run.stats.lines_read, 2);
        assert_eq!(report.run.stats.insert_lines, 1);
        assert_eq!(report.run.stats.tuples_seen, 3);
        assert_eq!(report.run.stats.rows_qualified, 2);
        assert_eq!(report.run.stats.records_written, 2);
        assert!(!report.previously_ingested);

        let history = store.redirect_history(10).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 0);
        assert_eq!(history[0].target_title, "'Ab'");
        assert!(store.redirect_history(12).expect("history").is_empty());
    }

    #[test]
    fn reingesting_the_same_dump_advances_every_present_id() {
        let store = VersionedStore::open_in_memory().expect("in-memory sqlite");
        redirect_pass(&store, REDIRECTS);
        let second = redirect_pass(&store, REDIRECTS);

        assert_eq!(second.run.watermark, Watermark::at(0));
        assert!(second.previously_ingested);
        let history = store.redirect_history(10).expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].version, 1);
        assert_eq!(history[0].target_title, history[1].target_title);
        assert_eq!(store.count_current_roots().expect("roots"), 2);
    }

    #[test]
    fn page_pass_binds_only_pages_with_redirects() {
        let store = VersionedStore::open_in_memory().expect("in-memory sqlite");
        redirect_pass(&store, REDIRECTS);
        let report = page_pass(&store, PAGES);

        assert_eq!(report.run.stats.tuples_seen, 3);
        assert_eq!(report.run.stats.rows_qualified, 2);
        assert_eq!(report.run.stats.records_written, 1);
        assert_eq!(report.run.stats.missing_peers, 1);

        let page = store.page_at(10, 0).expect("lookup").expect("page 10");
        assert_eq!(page.resolved_title, "'Ab'");
        assert_eq!(page.local_title, "'x'");
        assert_eq!(store.page_at(13, 0).expect("lookup"), None);
    }

    #[test]
    fn page_watermark_is_fixed_for_the_whole_pass() {
        let store = VersionedStore::open_in_memory().expect("in-memory sqlite");
        redirect_pass(
            &store,
            "INSERT INTO `redirect` VALUES (1,0,'a','',''),(2,0,'b','','');\n",
        );
        let report = page_pass(
            &store,
            "INSERT INTO `page` VALUES (1,0,'p','',1);\nINSERT INTO `page` VALUES (2,0,'q','',1);\n",
        );

        assert_eq!(report.run.watermark, Watermark::EMPTY);
        assert_eq!(report.run.stats.records_written, 2);
        assert_eq!(report.run.stats.missing_peers, 0);
        assert!(store.page_at(1, 0).expect("lookup").is_some());
        assert!(store.page_at(2, 0).expect("lookup").is_some());
    }

    #[test]
    fn page_pass_before_redirect_pass_stays_one_batch_behind() {
        let store = VersionedStore::open_in_memory().expect("in-memory sqlite");
        redirect_pass(&store, REDIRECTS);
        page_pass(&store, PAGES);

        let out_of_order = page_pass(&store, PAGES);
        redirect_pass(&store, REDIRECTS);
        assert_eq!(out_of_order.run.stats.records_written, 0);
        assert_eq!(store.page_at(10, 1).expect("lookup"), None);
        assert!(store.redirect_at(10, 1).expect("lookup").is_some());

        let caught_up = page_pass(&store, PAGES);
        assert_eq!(caught_up.run.stats.records_written, 1);
        assert!(store.page_at(10, 1).expect("lookup").is_some());
    }

    #[test]
    fn failing_line_rolls_back_alone_and_reports_its_number() {
        let store = VersionedStore::open_in_memory().expect("in-memory sqlite");
        let dump = "\
INSERT INTO `redirect` VALUES (1,0,'a','','');
INSERT INTO `redirect` VALUES (2,0,'b','',''),(3,0,'c','',''),(3,0,'d','','');
INSERT INTO `redirect` VALUES (4,0,'e','','');
";
        let err = ingest_lines(&store, DumpTable::Redirect, dump.as_bytes(), "redirect.sql")
            .expect_err("duplicate key within first generation");

        assert!(matches!(err, IngestError::Conflict { line: 2, .. }));
        assert_eq!(err.code(), "schema_violation");
        assert!(store.redirect_at(1, 0).expect("lookup").is_some());
        assert_eq!(store.redirect_at(2, 0).expect("lookup"), None);
        assert_eq!(store.redirect_at(4, 0).expect("lookup"), None);
        assert!(store.recent_runs(10).expect("runs").is_empty());
    }

    #[test]
    fn id_reappearing_below_the_watermark_collides_with_its_version_zero() {
        let store = VersionedStore::open_in_memory().expect("in-memory sqlite");
        redirect_pass(&store, "INSERT INTO `redirect` VALUES (1,0,'a','',''),(2,0,'b','','');\n");
        redirect_pass(&store, "INSERT INTO `redirect` VALUES (1,0,'a','','');\n");

        let err = ingest_lines(
            &store,
            DumpTable::Redirect,
            "INSERT INTO `redirect` VALUES (2,0,'b','','');\n".as_bytes(),
            "redirect.sql",
        )
        .expect_err("id 2 restarts at version 0");
        assert_eq!(err.line(), Some(1));
        assert_eq!(err.code(), "schema_violation");
    }

    #[test]
    fn every_page_record_has_a_redirect_at_the_same_version() {
        let store = VersionedStore::open_in_memory().expect("in-memory sqlite");
        let redirect_dumps = [
            "INSERT INTO `redirect` VALUES (1,0,'a','',''),(2,0,'b','',''),(3,0,'c','','');\n",
            "INSERT INTO `redirect` VALUES (1,0,'a2','',''),(2,0,'b','','');\n",
            "INSERT INTO `redirect` VALUES (1,0,'a3','',''),(2,0,'b2','','');\n",
        ];
        let page_dumps = [
            "INSERT INTO `page` VALUES (1,0,'p1','',1),(2,0,'p2','',1),(4,0,'p4','',1);\n",
            "INSERT INTO `page` VALUES (1,0,'p1','',1),(3,0,'p3','',1);\n",
            "INSERT INTO `page` VALUES (1,0,'p1','',1),(2,0,'p2','',1),(3,0,'p3','',1);\n",
        ];
        for (redirects, pages) in redirect_dumps.iter().zip(page_dumps.iter()) {
            redirect_pass(&store, redirects);
            page_pass(&store, pages);
        }

        assert!(store.orphaned_pages().expect("orphans").is_empty());
        for page_id in 1..=4 {
            for page in store.page_history(page_id).expect("history") {
                let redirect = store
                    .redirect_at(page.resolved_source_id, page.version)
                    .expect("lookup")
                    .expect("matching redirect");
                assert_eq!(redirect.target_title, page.resolved_title);
            }
        }
        assert_eq!(store.page_history(1).expect("history").len(), 3);
        assert_eq!(store.page_history(2).expect("history").len(), 2);
        assert!(store.broken_chains().expect("chains").is_empty());
    }

    #[test]
    fn ingest_dumps_runs_redirect_pass_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let redirect_path = dir.path().join("redirect.sql");
        let page_path = dir.path().join("page.sql");
        std::fs::write(&redirect_path, REDIRECTS).expect("write redirect dump");
        std::fs::write(&page_path, PAGES).expect("write page dump");

        let store = VersionedStore::open_in_memory().expect("in-memory sqlite");
        ingest_dumps(&store, Some(&redirect_path), &page_path).expect("first batch");
        let report = ingest_dumps(&store, Some(&redirect_path), &page_path).expect("second batch");

        let redirect = report.redirect.expect("redirect pass ran");
        assert_eq!(redirect.run.watermark, Watermark::at(0));
        assert_eq!(report.page.run.watermark, Watermark::at(0));
        assert_eq!(report.page.run.stats.records_written, 1);
        assert!(store.page_at(10, 1).expect("lookup").is_some());
        assert_eq!(store.recent_runs(10).expect("runs").len(), 4);
    }

    #[test]
    fn page_only_batch_skips_redirect_pass() {
        let dir = tempfile::tempdir().expect("tempdir");
        let page_path = dir.path().join("page.sql");
        std::fs::write(&page_path, PAGES).expect("write page dump");

        let store = VersionedStore::open_in_memory().expect("in-memory sqlite");
        let report = ingest_dumps(&store, None, &page_path).expect("page only");
        assert!(report.redirect.is_none());
        assert_eq!(report.page.run.stats.missing_peers, 2);
    }

    #[test]
    fn missing_dump_file_is_an_open_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = VersionedStore::open_in_memory().expect("in-memory sqlite");
        let err = ingest_redirect_dump(&store, &dir.path().join("absent.sql"))
            .expect_err("missing file");
        assert!(matches!(err, IngestError::Open { .. }));
        assert_eq!(err.code(), "open_error");
    }
}
