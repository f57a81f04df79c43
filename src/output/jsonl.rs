//! JSON Lines output
//!
//! One JSON object per line, flushed after every record so downstream
//! readers see results as soon as they arrive.

use crate::crawler::CrawlResult;
use crate::output::traits::{OutputResult, ResultSink};
use std::io::Write;

/// Writes each result as a single line of JSON
pub struct JsonLinesSink<W: Write> {
    writer: W,
    include_body: bool,
    written: u64,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            include_body: true,
            written: 0,
        }
    }

    /// Drops page bodies from the output, keeping everything else
    pub fn without_body(mut self) -> Self {
        self.include_body = false;
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResultSink for JsonLinesSink<W> {
    fn write(&mut self, result: &CrawlResult) -> OutputResult<()> {
        let mut value = serde_json::to_value(result)?;
        if !self.include_body {
            if let Some(object) = value.as_object_mut() {
                object.remove("body");
            }
        }

        serde_json::to_writer(&mut self.writer, &value)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> OutputResult<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn written(&self) -> u64 {
        self.written
    }
}
