//! SQLite result output
//!
//! Results are buffered and inserted into the `crawl_results` table in
//! batched transactions. The table is created if it does not exist, so
//! repeated runs append to the same database.

use crate::crawler::{CrawlOutcome, CrawlResult};
use crate::output::traits::{OutputResult, ResultSink};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// SQL schema for result storage
pub const RESULTS_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS crawl_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    final_url TEXT NOT NULL,
    outcome TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    content_type TEXT NOT NULL,
    content_length INTEGER NOT NULL,
    elapsed_ms INTEGER NOT NULL,
    redirect_count INTEGER NOT NULL,
    retry_count INTEGER NOT NULL,
    error TEXT,
    jsonld TEXT,
    opengraph TEXT,
    meta TEXT,
    fields TEXT,
    body TEXT NOT NULL,
    fetched_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_crawl_results_url ON crawl_results(url);
CREATE INDEX IF NOT EXISTS idx_crawl_results_outcome ON crawl_results(outcome);
"#;

/// Writes results to a SQLite database
pub struct SqliteSink {
    conn: Connection,
    batch_size: usize,
    buffer: Vec<CrawlResult>,
    written: u64,
}

impl SqliteSink {
    /// Opens (or creates) a database file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the database file
    /// * `batch_size` - Results per insert transaction
    pub fn new(path: &Path, batch_size: usize) -> OutputResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        Self::with_connection(conn, batch_size)
    }

    /// Creates an in-memory database (for testing)
    pub fn new_in_memory(batch_size: usize) -> OutputResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, batch_size)
    }

    fn with_connection(conn: Connection, batch_size: usize) -> OutputResult<Self> {
        conn.execute_batch(RESULTS_SCHEMA_SQL)?;
        Ok(Self {
            conn,
            batch_size: batch_size.max(1),
            buffer: Vec::new(),
            written: 0,
        })
    }

    /// Inserts all buffered results in one transaction
    pub fn flush(&mut self) -> OutputResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO crawl_results (
                    url, final_url, outcome, status_code, content_type, content_length,
                    elapsed_ms, redirect_count, retry_count, error, jsonld, opengraph,
                    meta, fields, body, fetched_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            )?;

            for result in &self.buffer {
                let fields = if result.fields.is_empty() {
                    None
                } else {
                    Some(serde_json::to_string(&result.fields)?)
                };

                stmt.execute(params![
                    result.url,
                    result.final_url,
                    result.outcome.to_db_string(),
                    result.status_code,
                    result.content_type,
                    result.content_length as i64,
                    result.elapsed_ms as i64,
                    result.redirect_count,
                    result.retry_count,
                    result.error,
                    json_column(&result.jsonld)?,
                    json_column(&result.opengraph)?,
                    json_column(&result.meta)?,
                    fields,
                    result.body,
                    result.fetched_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;

        tracing::debug!("Committed {} results to SQLite", self.buffer.len());
        self.buffer.clear();
        Ok(())
    }

    /// Counts stored rows by outcome
    pub fn count_by_outcome(&self) -> OutputResult<BTreeMap<CrawlOutcome, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT outcome, COUNT(*) FROM crawl_results GROUP BY outcome")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (outcome, count) = row?;
            match CrawlOutcome::from_db_string(&outcome) {
                Some(outcome) => {
                    counts.insert(outcome, count as u64);
                }
                None => tracing::warn!("Unknown outcome in database: {}", outcome),
            }
        }
        Ok(counts)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn json_column(value: &Option<Value>) -> OutputResult<Option<String>> {
    Ok(match value {
        Some(value) => Some(serde_json::to_string(value)?),
        None => None,
    })
}

impl ResultSink for SqliteSink {
    fn write(&mut self, result: &CrawlResult) -> OutputResult<()> {
        self.buffer.push(result.clone());
        self.written += 1;
        if self.buffer.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn finish(&mut self) -> OutputResult<()> {
        self.flush()
    }

    fn written(&self) -> u64 {
        self.written
    }
}

impl Drop for SqliteSink {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::error!("Failed to flush results on close: {}", e);
        }
    }
}
