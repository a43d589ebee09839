use redirect_ledger::dump::DumpTable;
use redirect_ledger::ingest::{PassReport, ingest_lines};
use redirect_ledger::query::{check_integrity, summary};
use redirect_ledger::store::{VersionedStore, Watermark};

fn redirect_pass(store: &VersionedStore, tuples: &str) -> PassReport {
    let dump = format!("INSERT INTO `redirect` VALUES {tuples};\n");
    ingest_lines(store, DumpTable::Redirect, dump.as_bytes(), "redirect.sql").expect("redirect pass")
}

fn page_pass(store: &VersionedStore, tuples: &str) -> PassReport {
    let dump = format!("INSERT INTO `page` VALUES {tuples};\n");
    ingest_lines(store, DumpTable::Page, dump.as_bytes(), "page.sql").expect("page pass")
}

#[test]
fn pages_ingested_before_any_page_watermark_bind_to_redirect_version_zero() {
    let store = VersionedStore::open_in_memory().expect("in-memory sqlite");
    redirect_pass(&store, "(1,0,'a','','')");
    redirect_pass(&store, "(1,0,'b','','')");
    page_pass(&store, "(1,0,'p','',1)");

    let page = store.page_at(1, 0).expect("lookup").expect("page at v0");
    assert_eq!(page.resolved_title, "'a'");
    assert_eq!(store.max_redirect_version().expect("max"), Watermark::at(1));
}

#[test]
fn page_new_to_a_later_batch_targets_watermark_plus_one() {
    let store = VersionedStore::open_in_memory().expect("in-memory sqlite");
    redirect_pass(&store, "(1,0,'a','',''),(2,0,'b','','')");
    page_pass(&store, "(1,0,'p','',1)");
    redirect_pass(&store, "(1,0,'a','',''),(2,0,'b','','')");
    page_pass(&store, "(1,0,'p','',1),(2,0,'q','',1)");

    assert!(store.page_at(2, 0).expect("lookup").is_none());
    let page = store.page_at(2, 1).expect("lookup").expect("page at v1");
    assert_eq!(page.resolved_source_id, 2);
}

#[test]
fn page_pass_before_redirect_pass_misses_its_peers() {
    let store = VersionedStore::open_in_memory().expect("in-memory sqlite");
    redirect_pass(&store, "(1,0,'a','','')");
    page_pass(&store, "(1,0,'p','',1)");

    let early = page_pass(&store, "(1,0,'p','',1)");
    redirect_pass(&store, "(1,0,'a','','')");

    assert_eq!(early.run.stats.missing_peers, 1);
    assert_eq!(early.run.stats.records_written, 0);
    assert_eq!(store.page_history(1).expect("history").len(), 1);
    assert_eq!(store.latest_redirect_version(1).expect("latest"), Some(1));
}

#[test]
fn id_returning_below_the_watermark_aborts_its_whole_line() {
    let store = VersionedStore::open_in_memory().expect("in-memory sqlite");
    redirect_pass(&store, "(1,0,'a','',''),(2,0,'b','','')");
    redirect_pass(&store, "(1,0,'a','','')");

    let dump = "INSERT INTO `redirect` VALUES (1,0,'a','',''),(2,0,'b','','');\n";
    let err = ingest_lines(&store, DumpTable::Redirect, dump.as_bytes(), "redirect.sql")
        .expect_err("duplicate v0 for id 2");
    assert_eq!(err.code(), "schema_violation");
    assert_eq!(err.line(), Some(1));

    assert_eq!(store.latest_redirect_version(1).expect("latest"), Some(1));
    assert_eq!(store.latest_redirect_version(2).expect("latest"), Some(0));
}

#[test]
fn summary_follows_fresh_maxima_after_cascade_delete() {
    let store = VersionedStore::open_in_memory().expect("in-memory sqlite");
    redirect_pass(&store, "(1,0,'a','','')");
    page_pass(&store, "(1,0,'p','',1)");
    redirect_pass(&store, "(1,0,'a','','')");
    page_pass(&store, "(1,0,'p','',1)");

    let outcome = store
        .delete_redirect(1, 1)
        .expect("delete")
        .expect("redirect existed");
    assert_eq!(outcome.removed_pages.len(), 1);

    let summary = summary(&store).expect("summary");
    assert_eq!(summary.redirect_watermark, Watermark::at(0));
    assert_eq!(summary.page_watermark, Watermark::at(0));
    assert_eq!(summary.current_pages, 1);
    assert_eq!(summary.current_roots, 1);
    assert!(check_integrity(&store).expect("check").is_clean());
}

#[test]
fn deleting_a_middle_version_leaves_a_broken_chain() {
    let store = VersionedStore::open_in_memory().expect("in-memory sqlite");
    redirect_pass(&store, "(1,0,'a','','')");
    redirect_pass(&store, "(1,0,'a','','')");
    store.delete_redirect(1, 0).expect("delete").expect("redirect existed");

    let report = check_integrity(&store).expect("check");
    assert!(report.orphaned_pages.is_empty());
    assert_eq!(report.broken_chains, vec![1]);
    assert!(!report.is_clean());
}

#[test]
fn rerunning_an_identical_dump_is_flagged_but_still_advances() {
    let store = VersionedStore::open_in_memory().expect("in-memory sqlite");
    let first = redirect_pass(&store, "(1,0,'a','','')");
    let second = redirect_pass(&store, "(1,0,'a','','')");

    assert!(!first.previously_ingested);
    assert!(second.previously_ingested);
    assert_eq!(first.run.dump_sha256, second.run.dump_sha256);
    assert_eq!(second.run.watermark, Watermark::at(0));
    assert_eq!(store.latest_redirect_version(1).expect("latest"), Some(1));
}
