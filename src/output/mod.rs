//! Output module for delivering crawl results
//!
//! This module handles:
//! - Streaming results to JSON Lines
//! - Storing results in SQLite
//! - Recording crawl statistics

mod jsonl;
mod sqlite_output;
pub mod stats;
mod traits;

pub use jsonl::JsonLinesSink;
pub use sqlite_output::{SqliteSink, RESULTS_SCHEMA_SQL};
pub use stats::{print_statistics, CrawlStats};
pub use traits::{OutputError, OutputResult, ResultSink};

use crate::config::{OutputConfig, OutputFormat};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;

/// Opens the sink described by the output configuration
///
/// JSON Lines go to `jsonl_path` when set, otherwise to stdout.
///
/// # Returns
///
/// * `Ok(Box<dyn ResultSink>)` - The opened sink
/// * `Err(OutputError)` - The file or database could not be opened
pub fn open_sink(config: &OutputConfig) -> OutputResult<Box<dyn ResultSink>> {
    match config.format {
        OutputFormat::Jsonl => match &config.jsonl_path {
            Some(path) => {
                let file = File::create(path)?;
                Ok(Box::new(JsonLinesSink::new(BufWriter::new(file))))
            }
            None => Ok(Box::new(JsonLinesSink::new(io::stdout()))),
        },
        OutputFormat::Sqlite => Ok(Box::new(SqliteSink::new(
            Path::new(&config.database_path),
            config.batch_size,
        )?)),
    }
}
