//! Result records produced by a run.
//!
//! A record maps column names to user-form values. Column names follow a fixed
//! scheme so sinks and downstream tools can address cells without the plan:
//! `"step"`, `"step2"`, `"Input - <instr> - <quantity>"`, `"Output - <instr> - <quantity>"`.

use crate::value::{QuantityId, Value};
use std::collections::HashMap;

/// 0-based step index column.
pub const STEP_COLUMN: &str = "step";

/// Secondary index column. Part of every schema, currently never written.
pub const STEP2_COLUMN: &str = "step2";

pub fn input_column(id: &QuantityId) -> String {
    format!("Input - {}", id)
}

pub fn output_column(id: &QuantityId) -> String {
    format!("Output - {}", id)
}

/// An output read that failed during a step; its cell is absent from the record.
#[derive(Debug, Clone, PartialEq)]
pub struct CellFailure {
    pub column: String,
    pub error: String,
}

/// One measurement record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultRecord {
    pub step: usize,
    cells: HashMap<String, Value>,
    failures: Vec<CellFailure>,
}

impl ResultRecord {
    pub fn new(step: usize) -> Self {
        Self {
            step,
            ..Default::default()
        }
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.cells.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        column == STEP_COLUMN || self.cells.contains_key(column)
    }

    /// Number of value cells (the step index is not counted).
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn record_failure(&mut self, column: impl Into<String>, error: impl Into<String>) {
        self.failures.push(CellFailure {
            column: column.into(),
            error: error.into(),
        });
    }

    pub fn failures(&self) -> &[CellFailure] {
        &self.failures
    }

    /// Text of a cell as it is written to a result file. `None` when the cell is
    /// missing.
    pub fn cell_text(&self, column: &str) -> Option<String> {
        if column == STEP_COLUMN {
            return Some(self.step.to_string());
        }
        self.cells.get(column).map(Value::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_names() {
        let id = QuantityId::new("A", "Freq");
        assert_eq!(input_column(&id), "Input - A - Freq");
        assert_eq!(output_column(&id), "Output - A - Freq");
    }

    #[test]
    fn test_record_cells_and_failures() {
        let mut record = ResultRecord::new(4);
        record.insert("Output - B - Power", Value::Double(1.5));
        record.record_failure("Output - B - Phase", "timed out");

        assert_eq!(record.cell_text(STEP_COLUMN).as_deref(), Some("4"));
        assert_eq!(record.cell_text("Output - B - Power").as_deref(), Some("1.5"));
        assert!(record.cell_text("Output - B - Phase").is_none());
        assert!(record.cell_text(STEP2_COLUMN).is_none());
        assert_eq!(record.failures().len(), 1);
        assert_eq!(record.len(), 1);
    }
}
