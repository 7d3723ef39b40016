//! Tab-separated text result files.
//!
//! One file per run, named `<base>_<YYYY_MM_DD>-<HH_MM_SS_AMPM>_.txt` from the local
//! time the sink was built. Layout:
//!
//! ```text
//! # free-text plan comment, one "# " line per comment line
//! step    step2   Input - A - Freq    Output - B - Power
//! 0               1                   -3.2
//! ```
//!
//! Every record is flushed before `append` returns.

use crate::sink::ResultSink;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use daq_core::{DaqError, DaqResult, ResultRecord};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// `strftime` pattern for the timestamp part of result file names.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y_%m_%d-%I_%M_%S_%p";

pub const RESULT_EXTENSION: &str = "txt";

/// File name for a run started at `timestamp`.
pub fn result_file_name(base: &str, timestamp: &NaiveDateTime) -> String {
    format!(
        "{}_{}_.{}",
        base,
        timestamp.format(FILE_TIMESTAMP_FORMAT),
        RESULT_EXTENSION
    )
}

fn storage_error(path: &Path, action: &str, e: impl std::fmt::Display) -> DaqError {
    DaqError::Storage(format!("failed to {} '{}': {}", action, path.display(), e))
}

/// Builder for [`TextResultSink`].
#[derive(Debug, Clone)]
pub struct TextResultSinkBuilder {
    output_dir: PathBuf,
    base_name: String,
    delimiter: u8,
    timestamp: Option<NaiveDateTime>,
}

impl Default for TextResultSinkBuilder {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            base_name: "result".to_string(),
            delimiter: b'\t',
            timestamp: None,
        }
    }
}

impl TextResultSinkBuilder {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn base_name(mut self, base: impl Into<String>) -> Self {
        self.base_name = base.into();
        self
    }

    /// Field separator. Tab unless told otherwise.
    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Pin the timestamp used in the file name (defaults to now, local time).
    pub fn timestamp(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Resolve the file path. The file itself is created by [`ResultSink::open`].
    pub fn build(self) -> DaqResult<TextResultSink> {
        if self.base_name.trim().is_empty() {
            return Err(DaqError::Storage("result base name is empty".into()));
        }
        if matches!(self.delimiter, b'"' | b'\n' | b'\r') {
            return Err(DaqError::Storage(format!(
                "unusable delimiter {:?}",
                self.delimiter as char
            )));
        }
        let timestamp = self
            .timestamp
            .unwrap_or_else(|| Local::now().naive_local());
        let path = self
            .output_dir
            .join(result_file_name(&self.base_name, &timestamp));
        Ok(TextResultSink {
            path,
            output_dir: self.output_dir,
            delimiter: self.delimiter,
            columns: Vec::new(),
            writer: None,
            rows: 0,
        })
    }
}

/// Writes one delimited text file per run.
#[derive(Debug)]
pub struct TextResultSink {
    path: PathBuf,
    output_dir: PathBuf,
    delimiter: u8,
    columns: Vec<String>,
    writer: Option<csv::Writer<File>>,
    rows: usize,
}

impl TextResultSink {
    pub fn builder() -> TextResultSinkBuilder {
        TextResultSinkBuilder::default()
    }

    /// Records appended so far.
    pub fn rows_written(&self) -> usize {
        self.rows
    }

    fn flush(&mut self) -> DaqResult<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .map_err(|e| storage_error(&self.path, "flush", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ResultSink for TextResultSink {
    async fn open(&mut self, columns: &[String], comment: &str) -> DaqResult<()> {
        if self.writer.is_some() {
            return Err(DaqError::Storage(format!(
                "'{}' is already open",
                self.path.display()
            )));
        }
        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| storage_error(&self.output_dir, "create directory", e))?;

        // Never clobber an earlier run's file.
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map_err(|e| storage_error(&self.path, "create", e))?;

        for line in comment.lines() {
            writeln!(file, "# {}", line).map_err(|e| storage_error(&self.path, "write", e))?;
        }

        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_writer(file);
        writer
            .write_record(columns)
            .map_err(|e| storage_error(&self.path, "write header to", e))?;
        self.writer = Some(writer);
        self.columns = columns.to_vec();
        self.flush()?;

        info!(path = %self.path.display(), columns = columns.len(), "Result file created");
        Ok(())
    }

    async fn append(&mut self, record: &ResultRecord) -> DaqResult<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            DaqError::Storage(format!("'{}' is not open", self.path.display()))
        })?;
        let row: Vec<String> = self
            .columns
            .iter()
            .map(|c| record.cell_text(c).unwrap_or_default())
            .collect();
        writer
            .write_record(&row)
            .map_err(|e| storage_error(&self.path, "append to", e))?;
        self.flush()?;
        self.rows += 1;
        debug!(step = record.step, "Record appended");
        Ok(())
    }

    async fn finish(&mut self) -> DaqResult<()> {
        self.flush()?;
        if self.writer.take().is_some() {
            info!(path = %self.path.display(), rows = self.rows, "Result file closed");
        }
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use daq_core::Value;

    fn pinned() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .and_then(|d| d.and_hms_opt(14, 7, 9))
            .unwrap()
    }

    fn schema() -> Vec<String> {
        ["step", "step2", "Input - A - Freq", "Output - B - Power"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_result_file_name() {
        assert_eq!(
            result_file_name("scan", &pinned()),
            "scan_2024_03_05-02_07_09_PM_.txt"
        );
        let morning = NaiveDate::from_ymd_opt(2024, 12, 31)
            .and_then(|d| d.and_hms_opt(0, 30, 0))
            .unwrap();
        assert_eq!(
            result_file_name("scan", &morning),
            "scan_2024_12_31-12_30_00_AM_.txt"
        );
    }

    #[tokio::test]
    async fn test_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = TextResultSink::builder()
            .output_dir(dir.path())
            .base_name("scan")
            .timestamp(pinned())
            .build()
            .unwrap();
        sink.open(&schema(), "").await.unwrap();

        let mut record = ResultRecord::new(0);
        record.insert("Input - A - Freq", Value::Double(1.5));
        record.insert("Output - B - Power", Value::Double(-3.25));
        record.insert("Output - B - Unlisted", Value::Double(9.0));
        sink.append(&record).await.unwrap();

        // Output read failed: cell left empty.
        let mut partial = ResultRecord::new(1);
        partial.insert("Input - A - Freq", Value::Double(2.0));
        sink.append(&partial).await.unwrap();

        // Flushed per record, readable before finish.
        let path = sink.path().unwrap().to_path_buf();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "step\tstep2\tInput - A - Freq\tOutput - B - Power\n\
             0\t\t1.5\t-3.25\n\
             1\t\t2\t\n"
        );
        assert_eq!(sink.rows_written(), 2);

        sink.finish().await.unwrap();
        assert!(sink.append(&ResultRecord::new(2)).await.is_err());
    }

    #[tokio::test]
    async fn test_comment_lines_and_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = TextResultSink::builder()
            .output_dir(dir.path().join("nested"))
            .base_name("iv")
            .delimiter(b',')
            .timestamp(pinned())
            .build()
            .unwrap();
        sink.open(&["step".to_string(), "Output - B - Trace".to_string()], "cooldown\nrun 2")
            .await
            .unwrap();

        let mut record = ResultRecord::new(0);
        record.insert("Output - B - Trace", Value::Vector(vec![1.0, 2.0]));
        sink.append(&record).await.unwrap();
        sink.finish().await.unwrap();

        let text = std::fs::read_to_string(sink.path().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# cooldown");
        assert_eq!(lines[1], "# run 2");
        assert_eq!(lines[2], "step,Output - B - Trace");
        // Vector cells contain the delimiter and are quoted.
        assert_eq!(lines[3], "0,\"1,2\"");
    }

    #[tokio::test]
    async fn test_existing_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let builder = TextResultSink::builder()
            .output_dir(dir.path())
            .base_name("scan")
            .timestamp(pinned());

        let mut first = builder.clone().build().unwrap();
        first.open(&schema(), "").await.unwrap();

        let mut second = builder.build().unwrap();
        let err = second.open(&schema(), "").await.unwrap_err();
        assert_eq!(err.kind(), daq_core::ErrorKind::Storage);
    }

    #[test]
    fn test_builder_rejects_bad_settings() {
        assert!(TextResultSink::builder().base_name("  ").build().is_err());
        assert!(TextResultSink::builder().delimiter(b'"').build().is_err());
    }
}
