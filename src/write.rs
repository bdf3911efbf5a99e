//! Rotating CSV writer.
//!
//! Typed rows are rendered under the column kinds captured from the first
//! row, appended to `{prefix}-{N}.csv` in a target directory, and the file is
//! rotated once the per-file record limit is reached. Alternatively the
//! writer can target one caller-supplied stream; a stream marked not-owned is
//! flushed but never closed.

use std::fs::{self, File};
use std::io::{BufWriter, Write as IoWrite};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use chrono::Local;

use crate::event::{self, BatchEvent, WriteEvent};
use crate::schema::Schema;
use crate::value::{self, FormatOptions, Kind, Value};
use crate::{CsvError, CsvResult};

type WriteLineHandler = Box<dyn FnMut(&WriteEvent) + Send>;
type FileEndHandler = Box<dyn FnMut(&WriteEvent) + Send>;
type BatchEndHandler = Box<dyn FnMut(&mut BatchEvent) + Send>;
type DisposedHandler = Box<dyn FnMut() + Send>;

const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

enum Target {
    Dir {
        dir: PathBuf,
        file: Option<BufWriter<File>>,
    },
    Stream {
        out: Box<dyn IoWrite + Send>,
        owned: bool,
    },
}

#[derive(Debug, Default)]
struct Counters {
    file_num: u32,
    file_row_num: u64,
    source_row_num: u64,
}

/// Streaming CSV writer with builder-style configuration.
///
/// The column set must be supplied with [`Writer::columns`] before the first
/// row. Counters are kept behind a per-instance mutex so the numbers seen by
/// event handlers stay consistent; the byte writes themselves are serialized
/// by `&mut self`.
pub struct Writer {
    col_separator: String,
    row_terminator: String,
    quote: String,
    prefix: String,
    single_file_limit: u64,
    datetime_format: String,
    number_as_text: bool,
    schema: Option<Schema>,
    kinds: Option<Vec<Kind>>,
    header_line: Option<String>,
    target: Target,
    counters: Mutex<Counters>,
    file_end_reported: u32,
    batch_num: u64,
    last_line: String,
    closed: bool,
    on_write_line: Option<WriteLineHandler>,
    on_file_end: Option<FileEndHandler>,
    on_batch_end: Option<BatchEndHandler>,
    on_disposed: Option<DisposedHandler>,
}

impl Writer {
    /// Rotating files named `{prefix}-{N}.csv` under `dir` (created when the
    /// first row is written). The prefix defaults to the local date.
    pub fn to_dir(dir: impl Into<PathBuf>) -> Self {
        Self::with_target(Target::Dir {
            dir: dir.into(),
            file: None,
        })
    }

    /// A single caller-supplied stream. With `owned = false` the stream is
    /// flushed on close but left open for the caller; rotation does not apply.
    pub fn to_stream<W: IoWrite + Send + 'static>(out: W, owned: bool) -> Self {
        Self::with_target(Target::Stream {
            out: Box::new(out),
            owned,
        })
    }

    fn with_target(target: Target) -> Self {
        Self {
            col_separator: ",".to_string(),
            row_terminator: "\r\n".to_string(),
            quote: "\"".to_string(),
            prefix: Local::now().format("%Y%m%d").to_string(),
            single_file_limit: 0,
            datetime_format: DEFAULT_DATETIME_FORMAT.to_string(),
            number_as_text: false,
            schema: None,
            kinds: None,
            header_line: None,
            target,
            counters: Mutex::new(Counters::default()),
            file_end_reported: 0,
            batch_num: 0,
            last_line: String::new(),
            closed: false,
            on_write_line: None,
            on_file_end: None,
            on_batch_end: None,
            on_disposed: None,
        }
    }

    /// Sets the column names; duplicates (case-insensitive) are fatal here,
    /// before any row is written.
    pub fn columns<I, S>(mut self, names: I) -> CsvResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema = Some(Schema::from_names(names)?);
        Ok(self)
    }

    pub fn col_separator(mut self, sep: impl Into<String>) -> Self {
        self.col_separator = sep.into();
        self
    }

    pub fn row_terminator(mut self, term: impl Into<String>) -> Self {
        self.row_terminator = term.into();
        self
    }

    /// Quote string; empty disables quoting.
    pub fn quote(mut self, quote: impl Into<String>) -> Self {
        self.quote = quote.into();
        self
    }

    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        if !prefix.is_empty() {
            self.prefix = prefix;
        }
        self
    }

    /// Records per file before rotation; 0 keeps a single unbounded file.
    pub fn single_file_limit(mut self, limit: u64) -> Self {
        self.single_file_limit = limit;
        self
    }

    /// chrono pattern for date-time columns; an empty pattern is ignored.
    pub fn datetime_format(mut self, format: impl Into<String>) -> Self {
        let format = format.into();
        if !format.is_empty() {
            self.datetime_format = format;
        }
        self
    }

    /// Prefix numeric columns with one tab byte so spreadsheet tools keep
    /// them as text; the reader strips the byte back out.
    pub fn number_as_text(mut self, on: bool) -> Self {
        self.number_as_text = on;
        self
    }

    pub fn on_write_line(mut self, f: impl FnMut(&WriteEvent) + Send + 'static) -> Self {
        self.on_write_line = Some(Box::new(f));
        self
    }

    pub fn on_file_end(mut self, f: impl FnMut(&WriteEvent) + Send + 'static) -> Self {
        self.on_file_end = Some(Box::new(f));
        self
    }

    pub fn on_batch_end(mut self, f: impl FnMut(&mut BatchEvent) + Send + 'static) -> Self {
        self.on_batch_end = Some(Box::new(f));
        self
    }

    pub fn on_disposed(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_disposed = Some(Box::new(f));
        self
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// Appends one row. The first row fixes the per-column kinds for the
    /// session; a value count that differs from the column count rejects the
    /// row. Writing to a closed session is a no-op.
    pub fn write_row(&mut self, values: &[Value]) -> CsvResult<()> {
        if self.closed || values.is_empty() {
            return Ok(());
        }
        let expected = match &self.schema {
            Some(schema) => schema.len(),
            None => return Err(CsvError::MissingColumnNames),
        };
        if values.len() != expected {
            return Err(CsvError::RowArity {
                expected,
                got: values.len(),
            });
        }
        if self.kinds.is_none() {
            self.kinds = Some(values.iter().map(Value::kind).collect());
            self.header_line = Some(self.render_header());
        }
        let kinds = self.kinds.clone().unwrap_or_default();
        let line = self.render_row(values, &kinds);
        self.append_line(&line)
    }

    /// Appends a batch of rows, then fires the batch-end event. Without a
    /// batch-end handler the session closes right after the call; a handler
    /// keeps it open unless it sets the event's `close` flag.
    pub fn write_batch<I>(&mut self, rows: I) -> CsvResult<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[Value]>,
    {
        for row in rows {
            self.write_row(row.as_ref())?;
        }
        self.batch_num += 1;
        let mut ev = BatchEvent {
            batch_num: self.batch_num,
            close: false,
        };
        match &mut self.on_batch_end {
            Some(f) => {
                event::fire("batch_end", || f(&mut ev));
                if ev.close {
                    self.close()?;
                }
            }
            None => self.close()?,
        }
        Ok(())
    }

    /// Finalizes the session: flushes the current target, fires a file-end
    /// event for a file not already reported by rotation, then the disposed
    /// notification. Idempotent.
    pub fn close(&mut self) -> CsvResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match &mut self.target {
            Target::Dir { file, .. } => {
                if let Some(mut f) = file.take() {
                    f.flush()?;
                }
            }
            Target::Stream { out, owned } => {
                out.flush()?;
                if *owned {
                    *out = Box::new(std::io::sink());
                }
            }
        }
        let pending = {
            let c = self.counters();
            c.file_num > 0 && self.file_end_reported != c.file_num
        };
        if pending {
            let ev = self.snapshot();
            self.file_end_reported = ev.file_num;
            if let Some(f) = &mut self.on_file_end {
                event::fire("file_end", || f(&ev));
            }
        }
        if let Some(f) = &mut self.on_disposed {
            event::fire("disposed", || f());
        }
        Ok(())
    }

    fn format_options(&self) -> FormatOptions<'_> {
        FormatOptions {
            sep: &self.col_separator,
            term: &self.row_terminator,
            quote: &self.quote,
            datetime_format: &self.datetime_format,
            number_as_text: self.number_as_text,
        }
    }

    fn render_header(&self) -> String {
        let opts = self.format_options();
        let names = self.schema.as_ref().map(Schema::names).unwrap_or(&[]);
        let cells: Vec<String> = names
            .iter()
            .map(|name| value::quote_text(name, &opts))
            .collect();
        format!("{}{}", cells.join(&self.col_separator), self.row_terminator)
    }

    fn render_row(&self, values: &[Value], kinds: &[Kind]) -> String {
        let opts = self.format_options();
        let cells: Vec<String> = values
            .iter()
            .zip(kinds)
            .map(|(v, kind)| value::format_value(v, *kind, &opts))
            .collect();
        format!("{}{}", cells.join(&self.col_separator), self.row_terminator)
    }

    fn append_line(&mut self, line: &str) -> CsvResult<()> {
        self.last_line = line.trim().to_string();
        let sink = self.prepared_sink()?;
        sink.write_all(line.as_bytes())?;
        let ev = {
            let mut c = self.counters();
            c.file_row_num += 1;
            c.source_row_num += 1;
            WriteEvent {
                file_num: c.file_num,
                file_row_num: c.file_row_num,
                source_row_num: c.source_row_num,
                prefix: self.prefix.clone(),
                line: self.last_line.clone(),
            }
        };
        if let Some(f) = &mut self.on_write_line {
            event::fire("write_line", || f(&ev));
        }
        Ok(())
    }

    /// Opens or rotates the target as needed and returns the byte sink the
    /// pending row goes to. New files start with the header line.
    fn prepared_sink(&mut self) -> CsvResult<&mut (dyn IoWrite + Send)> {
        enum Prep {
            Rotate,
            Open,
            StreamFirst,
            Ready,
        }
        let prep = match &self.target {
            Target::Dir { file: Some(_), .. } => Prep::Rotate,
            Target::Dir { file: None, .. } => Prep::Open,
            Target::Stream { .. } => {
                if self.counters().file_num == 0 {
                    Prep::StreamFirst
                } else {
                    Prep::Ready
                }
            }
        };
        match prep {
            Prep::Rotate => self.rotate_if_needed()?,
            Prep::Open => self.open_next_file()?,
            Prep::StreamFirst => {
                self.counters().file_num = 1;
                let header = self.header_line.clone();
                if let (Target::Stream { out, .. }, Some(header)) = (&mut self.target, header) {
                    out.write_all(header.as_bytes())?;
                }
            }
            Prep::Ready => {}
        }
        match &mut self.target {
            Target::Dir { file: Some(f), .. } => Ok(f),
            Target::Stream { out, .. } => Ok(out.as_mut()),
            Target::Dir { file: None, .. } => {
                Err(CsvError::Io(std::io::Error::other("output file not open")))
            }
        }
    }

    /// Closes the current file and reports it once the per-file record limit
    /// is reached, then opens the next one before the pending row.
    fn rotate_if_needed(&mut self) -> CsvResult<()> {
        if self.single_file_limit == 0
            || self.counters().file_row_num < self.single_file_limit
        {
            return Ok(());
        }
        if let Target::Dir { file, .. } = &mut self.target {
            if let Some(mut f) = file.take() {
                f.flush()?;
            }
        }
        let ev = self.snapshot();
        self.file_end_reported = ev.file_num;
        if let Some(f) = &mut self.on_file_end {
            event::fire("file_end", || f(&ev));
        }
        self.counters().file_row_num = 0;
        self.open_next_file()
    }

    fn open_next_file(&mut self) -> CsvResult<()> {
        let file_num = {
            let mut c = self.counters();
            c.file_num += 1;
            c.file_num
        };
        if let Target::Dir { dir, file } = &mut self.target {
            fs::create_dir_all(&*dir)?;
            let path = dir.join(format!("{}-{}.csv", self.prefix, file_num));
            let mut f = BufWriter::new(File::create(path)?);
            if let Some(header) = &self.header_line {
                f.write_all(header.as_bytes())?;
            }
            *file = Some(f);
        }
        Ok(())
    }

    fn snapshot(&self) -> WriteEvent {
        let c = self.counters();
        WriteEvent {
            file_num: c.file_num,
            file_row_num: c.file_row_num,
            source_row_num: c.source_row_num,
            prefix: self.prefix.clone(),
            line: self.last_line.clone(),
        }
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
