//! Result sinks.
//!
//! The execution engine writes every record of a run to a [`ResultSink`]. The
//! [`TextResultSink`] produces one delimited text file per run; the [`MemorySink`]
//! keeps records in memory.

pub mod sink;
pub mod text_writer;

pub use sink::{MemorySink, ResultSink};
pub use text_writer::{result_file_name, TextResultSink, TextResultSinkBuilder, FILE_TIMESTAMP_FORMAT};
