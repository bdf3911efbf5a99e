//! Streaming CSV codec.
//!
//! - Reading: an incremental, chunk-resumable tokenizer that turns any byte
//!   stream (file, memory buffer, or string) into one header event plus a row
//!   event per record, with cooperative early stop.
//! - Writing: typed column values rendered to delimited text, rotated across
//!   `{prefix}-{N}.csv` files by record count.
//!
//! Data shape:
//! - Reader rows: positional access with `value(idx)` and case-insensitive
//!   named access with `value_named(name)`; misses yield `""`, never an error.
//! - Writer rows: `&[Value]`, one slice per record, validated against the
//!   column set established by the first write.
#![cfg_attr(docsrs, feature(doc_cfg))]
//
mod buffer;
mod event;
mod io;
mod read;
mod scan;
mod schema;
mod value;
mod write;

pub use crate::event::{BatchEvent, HeadEvent, RowEvent, WriteEvent};
pub use crate::io::{build_source, source_from_path, SourceMeta};
pub use crate::read::Reader;
pub use crate::schema::Schema;
pub use crate::value::Value;
pub use crate::write::Writer;

use thiserror::Error;

/// Error type returned by this crate.
///
/// Read-side failures also reach the consumer through the end event's
/// payload; the `read` call returns the same value.
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("a row handler must be set before reading")]
    MissingRowHandler,
    #[error("column separator must not be empty")]
    EmptyColSeparator,
    #[error("row terminator must not be empty")]
    EmptyRowTerminator,
    #[error("header line is empty")]
    EmptyHeader,
    #[error("missing closing quote in header")]
    UnterminatedHeader,
    #[error("duplicate column name {0:?}")]
    DuplicateColumn(String),
    #[error("wrong number of columns for row {0}")]
    ColumnCount(u64),
    #[error("unterminated row {0} at end of input")]
    UnterminatedRow(u64),
    #[error("column names must be set before the first write")]
    MissingColumnNames,
    #[error("row has {got} values but the schema has {expected} columns")]
    RowArity { expected: usize, got: usize },
    #[error("unknown column name {0:?}")]
    UnknownColumn(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type CsvResult<T> = std::result::Result<T, CsvError>;
