//! Streaming CSV sink.
//!
//! Rows are written as they arrive; nothing is buffered beyond the CSV
//! writer's own I/O buffer. Fields containing a comma, quote or newline are
//! quoted and inner quotes doubled.

use crate::normalize::NormalizedRow;
use crate::types::RecordKind;
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    kind: RecordKind,
    header_written: bool,
    rows_written: usize,
}

impl CsvSink<File> {
    /// Creates (or truncates) the destination file.
    pub fn create(path: impl AsRef<Path>, kind: RecordKind) -> Result<Self, csv::Error> {
        let file = File::create(path)?;
        Ok(Self::new(file, kind))
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(destination: W, kind: RecordKind) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(destination),
            kind,
            header_written: false,
            rows_written: 0,
        }
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    fn ensure_header(&mut self) -> Result<(), csv::Error> {
        if !self.header_written {
            self.writer
                .write_record(NormalizedRow::columns(self.kind))?;
            self.header_written = true;
        }
        Ok(())
    }

    /// Appends one row, writing the header first if this is the first row.
    pub fn write_row(&mut self, row: &NormalizedRow) -> Result<(), csv::Error> {
        debug_assert_eq!(row.kind(), self.kind);
        self.ensure_header()?;
        self.writer.write_record(row.fields())?;
        self.rows_written += 1;
        Ok(())
    }

    /// Pushes buffered rows to the destination.
    pub fn flush(&mut self) -> Result<(), csv::Error> {
        self.writer.flush()?;
        Ok(())
    }

    /// Writes the header if no row did, flushes, and hands back the destination.
    pub fn finish(mut self) -> Result<W, csv::Error> {
        self.ensure_header()?;
        self.writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))
    }
}
