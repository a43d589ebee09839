pub mod record;

use std::ops::Deref;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use serde::Serialize;
use tracing::debug;

pub use record::{PageRecord, PassStats, RedirectRecord, RunRecord, Watermark};

const SCHEMA_VERSION: i64 = 1;

/// Result of tearing down one redirect version together with its dependents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeOutcome {
    pub redirect: RedirectRecord,
    pub removed_pages: Vec<PageRecord>,
}

pub struct VersionedStore {
    conn: Connection,
}

impl VersionedStore {
    pub fn open(path: impl AsRef<Path>) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            ",
        )?;

        let version: i64 = self.conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version == 0 {
            self.create_schema_v1()?;
            self.conn
                .execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
        } else if version == SCHEMA_VERSION {
            self.create_schema_v1()?;
        } else {
            return Err(rusqlite::Error::InvalidQuery);
        }
        Ok(())
    }

    fn create_schema_v1(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS redirect (
                source_id INTEGER NOT NULL,
                target_title TEXT NOT NULL CHECK (length(target_title) <= 5),
                version INTEGER NOT NULL CHECK (version >= 0),
                PRIMARY KEY (source_id, version)
            );

            CREATE INDEX IF NOT EXISTS idx_redirect_version ON redirect(version);

            CREATE TABLE IF NOT EXISTS page (
                page_id INTEGER NOT NULL,
                resolved_source_id INTEGER NOT NULL,
                resolved_title TEXT NOT NULL CHECK (length(resolved_title) <= 5),
                local_title TEXT NOT NULL CHECK (length(local_title) <= 5),
                version INTEGER NOT NULL CHECK (version >= 0),
                PRIMARY KEY (page_id, version),
                FOREIGN KEY (resolved_source_id, version)
                    REFERENCES redirect(source_id, version)
            );

            CREATE INDEX IF NOT EXISTS idx_page_version ON page(version);
            CREATE INDEX IF NOT EXISTS idx_page_resolved ON page(resolved_source_id, version);

            CREATE TABLE IF NOT EXISTS ingest_runs (
                run_id INTEGER PRIMARY KEY AUTOINCREMENT,
                table_name TEXT NOT NULL,
                dump_path TEXT NOT NULL,
                dump_sha256 TEXT NOT NULL,
                watermark INTEGER,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                lines_read INTEGER NOT NULL,
                insert_lines INTEGER NOT NULL,
                tuples_seen INTEGER NOT NULL,
                rows_qualified INTEGER NOT NULL,
                records_written INTEGER NOT NULL,
                missing_peers INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ingest_runs_digest ON ingest_runs(table_name, dump_sha256);
            ",
        )?;
        Ok(())
    }

    /// Opens a write scope. Dropping the batch without `commit` rolls it back.
    pub fn batch(&self) -> rusqlite::Result<StoreBatch<'_>> {
        Ok(StoreBatch {
            tx: self.conn.unchecked_transaction()?,
        })
    }

    pub fn max_redirect_version(&self) -> rusqlite::Result<Watermark> {
        Self::max_version_on(&self.conn, "SELECT MAX(version) FROM redirect")
    }

    pub fn max_page_version(&self) -> rusqlite::Result<Watermark> {
        Self::max_version_on(&self.conn, "SELECT MAX(version) FROM page")
    }

    fn max_version_on(conn: &Connection, sql: &str) -> rusqlite::Result<Watermark> {
        let max: Option<u32> = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(Watermark::from(max))
    }

    pub fn redirect_at(
        &self,
        source_id: u32,
        version: u32,
    ) -> rusqlite::Result<Option<RedirectRecord>> {
        Self::redirect_at_on(&self.conn, source_id, version)
    }

    fn redirect_at_on(
        conn: &Connection,
        source_id: u32,
        version: u32,
    ) -> rusqlite::Result<Option<RedirectRecord>> {
        conn.query_row(
            "SELECT source_id, target_title, version
             FROM redirect
             WHERE source_id = ?1 AND version = ?2",
            params![source_id, version],
            redirect_from_row,
        )
        .optional()
    }

    pub fn page_at(&self, page_id: u32, version: u32) -> rusqlite::Result<Option<PageRecord>> {
        Self::page_at_on(&self.conn, page_id, version)
    }

    fn page_at_on(
        conn: &Connection,
        page_id: u32,
        version: u32,
    ) -> rusqlite::Result<Option<PageRecord>> {
        conn.query_row(
            "SELECT page_id, resolved_source_id, resolved_title, local_title, version
             FROM page
             WHERE page_id = ?1 AND version = ?2",
            params![page_id, version],
            page_from_row,
        )
        .optional()
    }

    fn insert_redirect_on(conn: &Connection, record: &RedirectRecord) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO redirect (source_id, target_title, version) VALUES (?1, ?2, ?3)",
            params![record.source_id, record.target_title, record.version],
        )?;
        Ok(())
    }

    fn insert_page_on(conn: &Connection, record: &PageRecord) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO page (page_id, resolved_source_id, resolved_title, local_title, version)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.page_id,
                record.resolved_source_id,
                record.resolved_title,
                record.local_title,
                record.version
            ],
        )?;
        Ok(())
    }

    /// Page records at the current page watermark, read fresh.
    pub fn count_current_pages(&self) -> rusqlite::Result<u64> {
        self.count(
            "SELECT COUNT(*) FROM page
             WHERE version = (SELECT MAX(version) FROM page)",
        )
    }

    /// Redirect records at the current redirect watermark, read fresh.
    pub fn count_current_roots(&self) -> rusqlite::Result<u64> {
        self.count(
            "SELECT COUNT(*) FROM redirect
             WHERE version = (SELECT MAX(version) FROM redirect)",
        )
    }

    /// Redirect ids whose own latest version sits below the global watermark.
    pub fn count_lagging_roots(&self) -> rusqlite::Result<u64> {
        self.count(
            "SELECT COUNT(*) FROM (
                 SELECT source_id, MAX(version) AS latest FROM redirect GROUP BY source_id
             )
             WHERE latest < (SELECT MAX(version) FROM redirect)",
        )
    }

    fn count(&self, sql: &str) -> rusqlite::Result<u64> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn latest_redirect_version(&self, source_id: u32) -> rusqlite::Result<Option<u32>> {
        self.conn.query_row(
            "SELECT MAX(version) FROM redirect WHERE source_id = ?1",
            params![source_id],
            |row| row.get(0),
        )
    }

    pub fn redirect_history(&self, source_id: u32) -> rusqlite::Result<Vec<RedirectRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_id, target_title, version
             FROM redirect
             WHERE source_id = ?1
             ORDER BY version ASC",
        )?;
        let rows = stmt.query_map(params![source_id], redirect_from_row)?;
        rows.collect()
    }

    pub fn page_history(&self, page_id: u32) -> rusqlite::Result<Vec<PageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT page_id, resolved_source_id, resolved_title, local_title, version
             FROM page
             WHERE page_id = ?1
             ORDER BY version ASC",
        )?;
        let rows = stmt.query_map(params![page_id], page_from_row)?;
        rows.collect()
    }

    /// Latest resolution of `page_id` written at or before `version`.
    pub fn page_as_of(&self, page_id: u32, version: u32) -> rusqlite::Result<Option<PageRecord>> {
        self.conn
            .query_row(
                "SELECT page_id, resolved_source_id, resolved_title, local_title, version
                 FROM page
                 WHERE page_id = ?1 AND version <= ?2
                 ORDER BY version DESC
                 LIMIT 1",
                params![page_id, version],
                page_from_row,
            )
            .optional()
    }

    /// Deletes one redirect version and every page resolved against it.
    /// Returns `None` when no such redirect exists.
    pub fn delete_redirect(
        &self,
        source_id: u32,
        version: u32,
    ) -> rusqlite::Result<Option<CascadeOutcome>> {
        let tx = self.conn.unchecked_transaction()?;
        let Some(redirect) = Self::redirect_at_on(tx.deref(), source_id, version)? else {
            return Ok(None);
        };

        let removed_pages = Self::dependents_on(tx.deref(), source_id, version)?;
        tx.execute(
            "DELETE FROM page WHERE resolved_source_id = ?1 AND version = ?2",
            params![source_id, version],
        )?;
        tx.execute(
            "DELETE FROM redirect WHERE source_id = ?1 AND version = ?2",
            params![source_id, version],
        )?;
        tx.commit()?;

        debug!(
            source_id,
            version,
            removed_pages = removed_pages.len(),
            "Redirect deleted with dependents"
        );
        Ok(Some(CascadeOutcome {
            redirect,
            removed_pages,
        }))
    }

    fn dependents_on(
        conn: &Connection,
        source_id: u32,
        version: u32,
    ) -> rusqlite::Result<Vec<PageRecord>> {
        let mut stmt = conn.prepare(
            "SELECT page_id, resolved_source_id, resolved_title, local_title, version
             FROM page
             WHERE resolved_source_id = ?1 AND version = ?2
             ORDER BY page_id ASC",
        )?;
        let rows = stmt.query_map(params![source_id, version], page_from_row)?;
        rows.collect()
    }

    /// Page records with no redirect at the same `(source_id, version)`.
    pub fn orphaned_pages(&self) -> rusqlite::Result<Vec<PageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.page_id, p.resolved_source_id, p.resolved_title, p.local_title, p.version
             FROM page p
             LEFT JOIN redirect r
               ON r.source_id = p.resolved_source_id AND r.version = p.version
             WHERE r.source_id IS NULL
             ORDER BY p.page_id ASC, p.version ASC",
        )?;
        let rows = stmt.query_map([], page_from_row)?;
        rows.collect()
    }

    /// Redirect ids whose versions are not exactly `0..=latest`.
    pub fn broken_chains(&self) -> rusqlite::Result<Vec<u32>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_id FROM redirect
             GROUP BY source_id
             HAVING MAX(version) + 1 != COUNT(*)
             ORDER BY source_id ASC",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect()
    }

    pub fn record_run(&self, run: &RunRecord) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO ingest_runs (
                table_name, dump_path, dump_sha256, watermark, started_at, finished_at,
                lines_read, insert_lines, tuples_seen, rows_qualified, records_written,
                missing_peers
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                run.table,
                run.dump_path,
                run.dump_sha256,
                run.watermark.get(),
                run.started_at,
                run.finished_at,
                run.stats.lines_read as i64,
                run.stats.insert_lines as i64,
                run.stats.tuples_seen as i64,
                run.stats.rows_qualified as i64,
                run.stats.records_written as i64,
                run.stats.missing_peers as i64
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn runs_with_digest(&self, table: &str, dump_sha256: &str) -> rusqlite::Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM ingest_runs WHERE table_name = ?1 AND dump_sha256 = ?2",
            params![table, dump_sha256],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn recent_runs(&self, limit: usize) -> rusqlite::Result<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT table_name, dump_path, dump_sha256, watermark, started_at, finished_at,
                    lines_read, insert_lines, tuples_seen, rows_qualified, records_written,
                    missing_peers
             FROM ingest_runs
             ORDER BY run_id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(RunRecord {
                table: row.get(0)?,
                dump_path: row.get(1)?,
                dump_sha256: row.get(2)?,
                watermark: Watermark::from(row.get::<_, Option<u32>>(3)?),
                started_at: row.get(4)?,
                finished_at: row.get(5)?,
                stats: PassStats {
                    lines_read: row.get::<_, i64>(6)? as u64,
                    insert_lines: row.get::<_, i64>(7)? as u64,
                    tuples_seen: row.get::<_, i64>(8)? as u64,
                    rows_qualified: row.get::<_, i64>(9)? as u64,
                    records_written: row.get::<_, i64>(10)? as u64,
                    missing_peers: row.get::<_, i64>(11)? as u64,
                },
            })
        })?;
        rows.collect()
    }
}

/// One committed unit of ingestion work, scoped to a single transaction.
pub struct StoreBatch<'a> {
    tx: Transaction<'a>,
}

impl StoreBatch<'_> {
    pub fn insert_redirect(&self, record: &RedirectRecord) -> rusqlite::Result<()> {
        VersionedStore::insert_redirect_on(self.tx.deref(), record)
    }

    pub fn insert_page(&self, record: &PageRecord) -> rusqlite::Result<()> {
        VersionedStore::insert_page_on(self.tx.deref(), record)
    }

    pub fn redirect_at(
        &self,
        source_id: u32,
        version: u32,
    ) -> rusqlite::Result<Option<RedirectRecord>> {
        VersionedStore::redirect_at_on(self.tx.deref(), source_id, version)
    }

    pub fn page_at(&self, page_id: u32, version: u32) -> rusqlite::Result<Option<PageRecord>> {
        VersionedStore::page_at_on(self.tx.deref(), page_id, version)
    }

    pub fn commit(self) -> rusqlite::Result<()> {
        self.tx.commit()
    }
}

fn redirect_from_row(row: &Row<'_>) -> rusqlite::Result<RedirectRecord> {
    Ok(RedirectRecord {
        source_id: row.get(0)?,
        target_title: row.get(1)?,
        version: row.get(2)?,
    })
}

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<PageRecord> {
    Ok(PageRecord {
        page_id: row.get(0)?,
        resolved_source_id: row.get(1)?,
        resolved_title: row.get(2)?,
        local_title: row.get(3)?,
        version: row.get(4)?,
    })
}

/// Version after `version`, or a store error once `u32` versions run out.
pub fn successor_version(version: u32) -> rusqlite::Result<u32> {
    version.checked_add(1).ok_or_else(|| {
        rusqlite::Error::ToSqlConversionFailure(
            format!("version {version} has no successor").into(),
        )
    })
}

/// True when the store rejected a write on a key, foreign key or check constraint.
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
