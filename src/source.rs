use crate::models::RawRecord;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::warn;

/// Streaming reader over newline-delimited raw records.
///
/// Malformed lines (bad JSON, records without `uuid`/`origin`) are skipped
/// with a warning; an I/O failure ends the stream.
pub struct RecordReader<R: BufRead> {
    lines: std::io::Lines<R>,
    line_number: u64,
}

impl RecordReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open records file: {}", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = RawRecord;

    fn next(&mut self) -> Option<RawRecord> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Read failed, stopping");
                    return None;
                }
            };
            self.line_number += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawRecord>(trimmed) {
                Ok(record) => return Some(record),
                Err(e) => {
                    warn!(line = self.line_number, error = %e, "Skipping malformed record");
                }
            }
        }
    }
}
