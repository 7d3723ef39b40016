//! The result sink contract and an in-memory implementation.

use async_trait::async_trait;
use daq_core::{DaqError, DaqResult, ResultRecord};
use std::path::Path;

/// Append-only, column-oriented destination for the records of one run.
///
/// `open` is called exactly once, before the first `append`, and fixes the column
/// order for the lifetime of the sink. Cells of a record whose column is not in the
/// schema are ignored; schema columns missing from a record are written empty.
#[async_trait]
pub trait ResultSink: Send {
    /// Fix the schema and write any header.
    async fn open(&mut self, columns: &[String], comment: &str) -> DaqResult<()>;

    /// Append one record. When this returns `Ok`, the record has been flushed.
    async fn append(&mut self, record: &ResultRecord) -> DaqResult<()>;

    /// Flush and release the underlying resource. Further appends fail.
    async fn finish(&mut self) -> DaqResult<()>;

    /// File backing the sink, if any.
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// Keeps every appended record in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    columns: Option<Vec<String>>,
    comment: String,
    records: Vec<ResultRecord>,
    finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[String] {
        self.columns.as_deref().unwrap_or(&[])
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Rows as they would appear in a text file, one cell per schema column.
    pub fn rows(&self) -> Vec<Vec<String>> {
        self.records
            .iter()
            .map(|record| {
                self.columns()
                    .iter()
                    .map(|c| record.cell_text(c).unwrap_or_default())
                    .collect()
            })
            .collect()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn open(&mut self, columns: &[String], comment: &str) -> DaqResult<()> {
        if self.columns.is_some() {
            return Err(DaqError::Storage("sink is already open".into()));
        }
        self.columns = Some(columns.to_vec());
        self.comment = comment.to_string();
        Ok(())
    }

    async fn append(&mut self, record: &ResultRecord) -> DaqResult<()> {
        if self.columns.is_none() || self.finished {
            return Err(DaqError::Storage("sink is not open".into()));
        }
        self.records.push(record.clone());
        Ok(())
    }

    async fn finish(&mut self) -> DaqResult<()> {
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_core::Value;

    #[tokio::test]
    async fn test_memory_sink_rows_follow_schema() {
        let mut sink = MemorySink::new();
        let columns = vec!["step".to_string(), "step2".to_string(), "Output - B - Power".to_string()];
        sink.open(&columns, "").await.unwrap();

        let mut first = ResultRecord::new(0);
        first.insert("Output - B - Power", Value::Double(-3.5));
        first.insert("Input - A - Unlisted", Value::Double(1.0));
        sink.append(&first).await.unwrap();
        sink.append(&ResultRecord::new(1)).await.unwrap();

        assert_eq!(
            sink.rows(),
            vec![
                vec!["0".to_string(), String::new(), "-3.5".to_string()],
                vec!["1".to_string(), String::new(), String::new()],
            ]
        );
    }

    #[tokio::test]
    async fn test_append_requires_open() {
        let mut sink = MemorySink::new();
        assert!(sink.append(&ResultRecord::new(0)).await.is_err());

        sink.open(&["step".to_string()], "").await.unwrap();
        sink.finish().await.unwrap();
        assert!(sink.append(&ResultRecord::new(0)).await.is_err());
        assert!(sink.is_finished());
    }
}
