//! Events delivered to consumer-supplied handlers.
//!
//! Delivery is synchronous and in order on the calling task. A panic inside a
//! handler is caught, logged, and otherwise ignored: a misbehaving observer
//! must never corrupt the producer's state. The cost is that consumer bugs
//! only surface in the log.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::schema::Schema;

/// Fired once after the header line has been parsed.
pub struct HeadEvent {
    names: Vec<String>,
    /// Clear to stop the read before any rows are delivered.
    pub next: bool,
}

impl HeadEvent {
    pub(crate) fn new(names: Vec<String>) -> Self {
        Self { names, next: true }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Fired once per parsed data row.
pub struct RowEvent {
    row_num: u64,
    values: Vec<String>,
    schema: Arc<Schema>,
    /// Clear to stop the read after this row; the read ends without error.
    pub next: bool,
}

impl RowEvent {
    pub(crate) fn new(row_num: u64, values: Vec<String>, schema: Arc<Schema>) -> Self {
        Self {
            row_num,
            values,
            schema,
            next: true,
        }
    }

    /// 1-based row number within the current read session.
    pub fn row_num(&self) -> u64 {
        self.row_num
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Value at `index`, or `""` when out of range.
    pub fn value(&self, index: usize) -> &str {
        self.values.get(index).map(String::as_str).unwrap_or("")
    }

    /// Value under `name` (case-insensitive), or `""` when unknown.
    pub fn value_named(&self, name: &str) -> &str {
        self.schema
            .lookup(name)
            .map(|i| self.value(i))
            .unwrap_or("")
    }
}

/// Fired per written line, and again when a file closes (rotation or
/// disposal) with the line that triggered it.
#[derive(Debug, Clone)]
pub struct WriteEvent {
    /// Output file index, starting at 1.
    pub file_num: u32,
    /// Data rows written to the current file (the header line not counted).
    pub file_row_num: u64,
    /// Data rows written across the whole session.
    pub source_row_num: u64,
    /// File-name prefix of the session.
    pub prefix: String,
    /// The rendered row, trimmed.
    pub line: String,
}

/// Fired after all rows of one batch call have been appended.
#[derive(Debug)]
pub struct BatchEvent {
    /// Monotonically increasing batch number, starting at 1.
    pub batch_num: u64,
    /// Set to close the writer session once the handler returns.
    pub close: bool,
}

/// Runs a handler, suppressing (but logging) a panic.
pub(crate) fn fire<F: FnOnce()>(handler: &'static str, f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!(handler, "handler panicked; continuing");
    }
}
