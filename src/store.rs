// src/store.rs
// SQLite persistence for papers, summaries and run rows. The store is the
// single source of truth for "already summarized"; callers never cache
// across runs.
//
// Write semantics:
//   - papers:    INSERT OR IGNORE (re-fetching a seen paper is a no-op)
//   - summaries: plain INSERT; a primary-key hit surfaces as
//                `StoreError::DuplicateSummary` (summaries are immutable)
//   - runs:      upsert keeping the first created_at

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::summary::StructuredSummary;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS papers (
    arxiv_id     TEXT PRIMARY KEY,
    title        TEXT NOT NULL,
    authors      TEXT NOT NULL,
    category     TEXT NOT NULL,
    published_at TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    abs_url      TEXT NOT NULL,
    pdf_url      TEXT NOT NULL,
    abstract     TEXT NOT NULL,
    fetched_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS summaries (
    arxiv_id     TEXT PRIMARY KEY REFERENCES papers(arxiv_id),
    summary_json TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS runs (
    run_date      TEXT PRIMARY KEY,
    status        TEXT NOT NULL DEFAULT 'pending',
    sent_channels TEXT NOT NULL DEFAULT '',
    created_at    TEXT NOT NULL
);
";

/// A fetched arXiv article record, immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paper {
    pub arxiv_id: String,
    pub title: String,
    /// Comma-joined ordered author list.
    pub authors: String,
    pub category: String,
    pub published_at: String,
    pub updated_at: String,
    pub abs_url: String,
    pub pdf_url: String,
    pub abstract_text: String,
    pub fetched_at: String,
}

/// Raw run-ledger row; typed interpretation lives in `crate::ledger`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRow {
    pub run_date: String,
    pub status: String,
    pub sent_channels: String,
    pub created_at: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("summary already exists for {0}")]
    DuplicateSummary(String),
    #[error("invalid stored data: {0}")]
    InvalidData(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (and create if missing) the database file, applying the schema.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::InvalidData(format!("creating {parent:?}: {e}")))?;
            }
        }
        let conn = Connection::open(path)?;
        Self::bootstrap(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let guard = self.conn.lock().expect("store mutex poisoned");
        f(&guard)
    }

    // -- papers --

    /// Insert-or-ignore. Returns true if the paper was newly inserted.
    pub fn insert_paper(&self, paper: &Paper) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO papers
                 (arxiv_id, title, authors, category, published_at,
                  updated_at, abs_url, pdf_url, abstract, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    paper.arxiv_id,
                    paper.title,
                    paper.authors,
                    paper.category,
                    paper.published_at,
                    paper.updated_at,
                    paper.abs_url,
                    paper.pdf_url,
                    paper.abstract_text,
                    paper.fetched_at,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Bulk insert-or-ignore. Returns count of newly inserted papers.
    pub fn insert_papers(&self, papers: &[Paper]) -> StoreResult<usize> {
        let mut inserted = 0;
        for p in papers {
            if self.insert_paper(p)? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Papers fetched on `date` (UTC calendar day of fetched_at) that have no
    /// summary row yet, newest first.
    pub fn pending_papers_for_date(&self, date: &str) -> StoreResult<Vec<Paper>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.arxiv_id, p.title, p.authors, p.category, p.published_at,
                        p.updated_at, p.abs_url, p.pdf_url, p.abstract, p.fetched_at
                 FROM papers p
                 LEFT JOIN summaries s ON p.arxiv_id = s.arxiv_id
                 WHERE s.arxiv_id IS NULL AND date(p.fetched_at) = ?1
                 ORDER BY p.published_at DESC",
            )?;
            let rows = stmt.query_map(params![date], row_to_paper)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    /// All papers lacking a summary, regardless of fetch date.
    pub fn pending_papers(&self) -> StoreResult<Vec<Paper>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.arxiv_id, p.title, p.authors, p.category, p.published_at,
                        p.updated_at, p.abs_url, p.pdf_url, p.abstract, p.fetched_at
                 FROM papers p
                 LEFT JOIN summaries s ON p.arxiv_id = s.arxiv_id
                 WHERE s.arxiv_id IS NULL
                 ORDER BY p.published_at DESC",
            )?;
            let rows = stmt.query_map([], row_to_paper)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    /// Papers fetched on `date` together with their summary, if any.
    /// This is the read surface consumed by the renderer.
    pub fn papers_for_date(
        &self,
        date: &str,
    ) -> StoreResult<Vec<(Paper, Option<StructuredSummary>)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.arxiv_id, p.title, p.authors, p.category, p.published_at,
                        p.updated_at, p.abs_url, p.pdf_url, p.abstract, p.fetched_at,
                        s.summary_json
                 FROM papers p
                 LEFT JOIN summaries s ON p.arxiv_id = s.arxiv_id
                 WHERE date(p.fetched_at) = ?1
                 ORDER BY p.published_at DESC",
            )?;
            let rows = stmt.query_map(params![date], |row| {
                let paper = row_to_paper(row)?;
                let json: Option<String> = row.get(10)?;
                Ok((paper, json))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (paper, json) = row?;
                let summary = match json {
                    Some(s) => Some(StructuredSummary::from_json(&s).map_err(|e| {
                        StoreError::InvalidData(format!(
                            "summary_json for {}: {e}",
                            paper.arxiv_id
                        ))
                    })?),
                    None => None,
                };
                out.push((paper, summary));
            }
            Ok(out)
        })
    }

    // -- summaries --

    pub fn has_summary(&self, arxiv_id: &str) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let row: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM summaries WHERE arxiv_id = ?1",
                    params![arxiv_id],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(row.is_some())
        })
    }

    /// Insert a summary; fails fast with `DuplicateSummary` if one already
    /// exists for this paper. Summaries are never overwritten.
    pub fn insert_summary(
        &self,
        arxiv_id: &str,
        summary: &StructuredSummary,
    ) -> StoreResult<()> {
        self.with_conn(|conn| {
            let res = conn.execute(
                "INSERT INTO summaries (arxiv_id, summary_json, created_at)
                 VALUES (?1, ?2, ?3)",
                params![arxiv_id, summary.to_json(), now_iso()],
            );
            match res {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => {
                    Err(StoreError::DuplicateSummary(arxiv_id.to_string()))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_summary(&self, arxiv_id: &str) -> StoreResult<Option<StructuredSummary>> {
        self.with_conn(|conn| {
            let json: Option<String> = conn
                .query_row(
                    "SELECT summary_json FROM summaries WHERE arxiv_id = ?1",
                    params![arxiv_id],
                    |r| r.get(0),
                )
                .optional()?;
            match json {
                Some(s) => StructuredSummary::from_json(&s)
                    .map(Some)
                    .map_err(|e| StoreError::InvalidData(format!("summary_json: {e}"))),
                None => Ok(None),
            }
        })
    }

    // -- runs --

    pub fn get_run_row(&self, run_date: &str) -> StoreResult<Option<RunRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT run_date, status, sent_channels, created_at
                 FROM runs WHERE run_date = ?1",
                params![run_date],
                |row| {
                    Ok(RunRow {
                        run_date: row.get(0)?,
                        status: row.get(1)?,
                        sent_channels: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Upsert a run row. `created_at` of the first write is preserved.
    pub fn upsert_run_row(
        &self,
        run_date: &str,
        status: &str,
        sent_channels: &str,
    ) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO runs (run_date, status, sent_channels, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(run_date) DO UPDATE SET
                     status = excluded.status,
                     sent_channels = excluded.sent_channels",
                params![run_date, status, sent_channels, now_iso()],
            )?;
            Ok(())
        })
    }
}

fn row_to_paper(row: &rusqlite::Row<'_>) -> rusqlite::Result<Paper> {
    Ok(Paper {
        arxiv_id: row.get(0)?,
        title: row.get(1)?,
        authors: row.get(2)?,
        category: row.get(3)?,
        published_at: row.get(4)?,
        updated_at: row.get(5)?,
        abs_url: row.get(6)?,
        pdf_url: row.get(7)?,
        abstract_text: row.get(8)?,
        fetched_at: row.get(9)?,
    })
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Current UTC time at second precision ("2024-01-05T08:30:00Z"), a format
/// SQLite's date() understands.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Today's UTC calendar date ("2024-01-05"). Run dates use this zone because
/// `fetched_at` is stamped with `now_iso`; a local-time default would put
/// fresh papers under a different date for part of the day.
pub fn today_utc() -> String {
    Utc::now().date_naive().to_string()
}
