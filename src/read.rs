//! Incremental CSV reader.
//!
//! `Reader` drives a resumable state machine over a byte cache: skip rows,
//! then the header line, then body rows, each phase picking up exactly where
//! the previous chunk left off. Events fire synchronously on the calling task
//! in the order start, head, row*, end; the head and row events carry a
//! `next` flag for cooperative early stop.

use std::path::Path;
use std::sync::Arc;

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::buffer::ByteCache;
use crate::event::{self, HeadEvent, RowEvent};
use crate::scan::{self, TokenMatch};
use crate::schema::Schema;
use crate::value::NUMERIC_TEXT_MARKER;
use crate::{CsvError, CsvResult};

type StartHandler = Box<dyn FnMut() + Send>;
type HeadHandler = Box<dyn FnMut(&mut HeadEvent) + Send>;
type RowHandler = Box<dyn FnMut(&mut RowEvent) + Send>;
type EndHandler = Box<dyn FnMut(Option<&CsvError>) + Send>;

const DEFAULT_BLOCK_SIZE: usize = 4 * 1024;

/// Streaming CSV reader with builder-style configuration.
///
/// A row handler is mandatory; everything else has defaults (`,` separator,
/// `\r\n` terminator, `"` quote, UTF-8). The quote string may be set empty to
/// disable quoting altogether.
pub struct Reader {
    col_separator: String,
    row_terminator: String,
    quote: String,
    skip_rows: u32,
    read_block_size: usize,
    encoding: &'static Encoding,
    on_start: Option<StartHandler>,
    on_head: Option<HeadHandler>,
    on_row: Option<RowHandler>,
    on_end: Option<EndHandler>,
}

impl Default for Reader {
    fn default() -> Self {
        Self {
            col_separator: ",".to_string(),
            row_terminator: "\r\n".to_string(),
            quote: "\"".to_string(),
            skip_rows: 0,
            read_block_size: DEFAULT_BLOCK_SIZE,
            encoding: encoding_rs::UTF_8,
            on_start: None,
            on_head: None,
            on_row: None,
            on_end: None,
        }
    }
}

impl Reader {
    pub fn new() -> Self {
        Self::default()
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

    /// Complete lines to discard before the header is parsed.
    pub fn skip_rows(mut self, rows: u32) -> Self {
        self.skip_rows = rows;
        self
    }

    pub fn read_block_size(mut self, size: usize) -> Self {
        if size > 0 {
            self.read_block_size = size;
        }
        self
    }

    /// Default encoding for the session; a recognized byte-order mark
    /// overrides it once, before any parsing.
    pub fn encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn on_start(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_start = Some(Box::new(f));
        self
    }

    pub fn on_head(mut self, f: impl FnMut(&mut HeadEvent) + Send + 'static) -> Self {
        self.on_head = Some(Box::new(f));
        self
    }

    pub fn on_row(mut self, f: impl FnMut(&mut RowEvent) + Send + 'static) -> Self {
        self.on_row = Some(Box::new(f));
        self
    }

    pub fn on_end(mut self, f: impl FnMut(Option<&CsvError>) + Send + 'static) -> Self {
        self.on_end = Some(Box::new(f));
        self
    }

    /// Reads `source` to exhaustion, firing start, head, row and end events.
    ///
    /// The error of a failed read reaches the end handler and is returned.
    /// A handler panic is suppressed and never aborts the loop.
    pub async fn read<R: AsyncRead + Unpin>(&mut self, source: R) -> CsvResult<()> {
        if let Some(f) = &mut self.on_start {
            event::fire("start", || f());
        }
        let result = self.run(source).await;
        if let Some(f) = &mut self.on_end {
            event::fire("end", || f(result.as_ref().err()));
        }
        result
    }

    /// Reads an in-memory buffer.
    pub async fn read_bytes(&mut self, bytes: &[u8]) -> CsvResult<()> {
        self.read(bytes).await
    }

    /// Reads a string, encoded with the configured encoding first.
    pub async fn read_str(&mut self, text: &str) -> CsvResult<()> {
        let bytes = encode_text(self.encoding, text);
        self.read(bytes.as_slice()).await
    }

    /// Opens and reads a file path; `.gz` and `.zst` are decompressed
    /// transparently.
    pub async fn read_path(&mut self, path: impl AsRef<Path>) -> CsvResult<()> {
        match crate::io::source_from_path(path.as_ref()).await {
            Ok((source, _meta)) => self.read(source).await,
            Err(e) => {
                // The open failed before the read loop; the event contract
                // still holds: start, then end with the error.
                if let Some(f) = &mut self.on_start {
                    event::fire("start", || f());
                }
                if let Some(f) = &mut self.on_end {
                    event::fire("end", || f(Some(&e)));
                }
                Err(e)
            }
        }
    }

    async fn run<R: AsyncRead + Unpin>(&mut self, mut source: R) -> CsvResult<()> {
        if self.on_row.is_none() {
            return Err(CsvError::MissingRowHandler);
        }
        if self.col_separator.is_empty() {
            return Err(CsvError::EmptyColSeparator);
        }
        if self.row_terminator.is_empty() {
            return Err(CsvError::EmptyRowTerminator);
        }

        let mut session = Session::new(self);
        let block_size = self.read_block_size;
        let Reader { on_head, on_row, .. } = self;
        let Some(on_row) = on_row.as_mut() else {
            return Err(CsvError::MissingRowHandler);
        };

        let mut chunk = vec![0u8; block_size];
        loop {
            let n = source.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            session.cache.push(&chunk[..n]);
            if !session.bom_checked {
                // A mark is at most three bytes; defer the sniff until it
                // cannot be split across chunk boundaries.
                if session.cache.len() < 3 {
                    continue;
                }
                session.sniff_bom();
            }
            if let Flow::Stopped = session.advance(on_head, on_row)? {
                return Ok(());
            }
        }

        if !session.bom_checked {
            session.sniff_bom();
        }
        if !session.cache.is_empty() {
            if !session.cache.ends_with(&session.term) {
                let term = session.term.clone();
                session.cache.push(&term);
            }
            if let Flow::Stopped = session.advance(on_head, on_row)? {
                return Ok(());
            }
            if matches!(session.step, Step::ReadingBody) && !session.cache.is_empty() {
                return Err(CsvError::UnterminatedRow(session.row_num + 1));
            }
        }
        Ok(())
    }
}

/// Parser state, strictly forward, scoped to one `read` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    SkippingRows,
    ReadingHeader,
    ReadingBody,
}

enum Flow {
    NeedMore,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closer {
    Sep,
    Term,
}

enum FieldOutcome {
    NeedMore,
    Field {
        value: String,
        next: usize,
        closer: Closer,
    },
}

struct Session {
    sep_str: String,
    term_str: String,
    quote_str: String,
    quote2_str: String,
    sep: Vec<u8>,
    term: Vec<u8>,
    quote: Vec<u8>,
    encoding: &'static Encoding,
    cache: ByteCache,
    step: Step,
    skip_remaining: u32,
    schema: Option<Arc<Schema>>,
    row_num: u64,
    bom_checked: bool,
}

impl Session {
    fn new(reader: &Reader) -> Self {
        let encoding = reader.encoding;
        Self {
            sep: encode_text(encoding, &reader.col_separator),
            term: encode_text(encoding, &reader.row_terminator),
            quote: encode_text(encoding, &reader.quote),
            sep_str: reader.col_separator.clone(),
            term_str: reader.row_terminator.clone(),
            quote_str: reader.quote.clone(),
            quote2_str: reader.quote.repeat(2),
            encoding,
            cache: ByteCache::new(),
            step: if reader.skip_rows > 0 {
                Step::SkippingRows
            } else {
                Step::ReadingHeader
            },
            skip_remaining: reader.skip_rows,
            schema: None,
            row_num: 0,
            bom_checked: false,
        }
    }

    /// Recognizes and strips a UTF-8 / UTF-16BE / UTF-16LE mark, switching
    /// the session encoding once. Token byte sequences are re-derived so a
    /// UTF-16 stream is scanned with UTF-16 separators.
    fn sniff_bom(&mut self) {
        self.bom_checked = true;
        if let Some((encoding, len)) = Encoding::for_bom(self.cache.as_slice()) {
            self.cache.consume(len);
            if encoding != self.encoding {
                self.encoding = encoding;
                self.sep = encode_text(encoding, &self.sep_str);
                self.term = encode_text(encoding, &self.term_str);
                self.quote = encode_text(encoding, &self.quote_str);
            }
        }
    }

    /// Runs the state machine until the cache can make no further progress.
    fn advance(
        &mut self,
        on_head: &mut Option<HeadHandler>,
        on_row: &mut RowHandler,
    ) -> CsvResult<Flow> {
        loop {
            if self.cache.is_empty() {
                return Ok(Flow::NeedMore);
            }
            match self.step {
                Step::SkippingRows => {
                    if !self.skip_lines() {
                        return Ok(Flow::NeedMore);
                    }
                    self.step = Step::ReadingHeader;
                }
                Step::ReadingHeader => {
                    let Some(schema) = self.parse_header()? else {
                        return Ok(Flow::NeedMore);
                    };
                    let schema = Arc::new(schema);
                    self.schema = Some(Arc::clone(&schema));
                    self.step = Step::ReadingBody;
                    let mut ev = HeadEvent::new(schema.names().to_vec());
                    if let Some(f) = on_head {
                        event::fire("head", || f(&mut ev));
                    }
                    if !ev.next {
                        return Ok(Flow::Stopped);
                    }
                }
                Step::ReadingBody => match self.parse_row()? {
                    None => return Ok(Flow::NeedMore),
                    Some((values, consumed)) => {
                        self.cache.consume(consumed);
                        self.row_num += 1;
                        let schema = match &self.schema {
                            Some(s) => Arc::clone(s),
                            None => return Ok(Flow::NeedMore),
                        };
                        let mut ev = RowEvent::new(self.row_num, values, schema);
                        event::fire("row", || on_row(&mut ev));
                        if !ev.next {
                            return Ok(Flow::Stopped);
                        }
                    }
                },
            }
        }
    }

    /// Discards complete lines until the skip count is satisfied.
    fn skip_lines(&mut self) -> bool {
        while self.skip_remaining > 0 {
            match scan::find(self.cache.as_slice(), &self.term, 0) {
                Some(i) => {
                    self.cache.consume(i + self.term.len());
                    self.skip_remaining -= 1;
                }
                None => return false,
            }
        }
        true
    }

    /// Parses the header line into a schema, or `None` when the line is not
    /// complete yet.
    fn parse_header(&mut self) -> CsvResult<Option<Schema>> {
        let (schema, line_len) = {
            let hay = self.cache.as_slice();
            let Some(end) = scan::find(hay, &self.term, 0) else {
                return Ok(None);
            };
            if end == 0 {
                return Err(CsvError::EmptyHeader);
            }
            let line_len = end + self.term.len();
            let line = &hay[..line_len];
            let mut schema = Schema::new();
            let mut pos = 0;
            loop {
                match self.parse_field(line, pos, false) {
                    // The line is complete, so a parked quoted field means
                    // its closing quote never arrives.
                    FieldOutcome::NeedMore => return Err(CsvError::UnterminatedHeader),
                    FieldOutcome::Field { value, next, closer } => {
                        schema.push(value)?;
                        pos = next;
                        if closer == Closer::Term {
                            break;
                        }
                    }
                }
            }
            (schema, line_len)
        };
        self.cache.consume(line_len);
        Ok(Some(schema))
    }

    /// Attempts to assemble one complete row from the cache start.
    ///
    /// All-or-nothing: on insufficient data no partial progress is kept, so
    /// the next attempt re-parses from the last completed-row boundary.
    fn parse_row(&self) -> CsvResult<Option<(Vec<String>, usize)>> {
        let Some(schema) = &self.schema else {
            return Ok(None);
        };
        let cols = schema.len();
        let hay = self.cache.as_slice();
        let mut values = Vec::with_capacity(cols);
        let mut pos = 0;
        for i in 0..cols {
            let last = i + 1 == cols;
            match self.parse_field(hay, pos, true) {
                FieldOutcome::NeedMore => return Ok(None),
                FieldOutcome::Field { value, next, closer } => {
                    if (closer == Closer::Term && !last) || (closer == Closer::Sep && last) {
                        return Err(CsvError::ColumnCount(self.row_num + 1));
                    }
                    values.push(value);
                    pos = next;
                }
            }
        }
        Ok(Some((values, pos)))
    }

    /// Parses the field starting at `pos`, quoted or not.
    fn parse_field(&self, hay: &[u8], pos: usize, strip_marker: bool) -> FieldOutcome {
        if !self.quote.is_empty() {
            match scan::match_at(hay, pos, &self.quote) {
                TokenMatch::Partial => return FieldOutcome::NeedMore,
                TokenMatch::Yes => return self.parse_quoted(hay, pos),
                TokenMatch::No => {}
            }
        }
        self.parse_unquoted(hay, pos, strip_marker)
    }

    fn parse_unquoted(&self, hay: &[u8], pos: usize, strip_marker: bool) -> FieldOutcome {
        let sep_at = scan::find(hay, &self.sep, pos);
        let term_at = scan::find(hay, &self.term, pos);
        let (end, closer) = match (sep_at, term_at) {
            (Some(s), Some(t)) if s <= t => (s, Closer::Sep),
            (_, Some(t)) => (t, Closer::Term),
            (Some(s), None) => (s, Closer::Sep),
            (None, None) => return FieldOutcome::NeedMore,
        };
        let mut bytes = &hay[pos..end];
        if strip_marker && bytes.first() == Some(&NUMERIC_TEXT_MARKER) {
            bytes = &bytes[1..];
        }
        let token_len = match closer {
            Closer::Sep => self.sep.len(),
            Closer::Term => self.term.len(),
        };
        FieldOutcome::Field {
            value: decode_text(self.encoding, bytes),
            next: end + token_len,
            closer,
        }
    }

    /// Scans a quoted field for its unescaped close: `quote+sep` or
    /// `quote+term`, with a doubled quote inside the field read as one
    /// literal quote. A lone quote followed by ordinary bytes is field data.
    fn parse_quoted(&self, hay: &[u8], pos: usize) -> FieldOutcome {
        let qlen = self.quote.len();
        let mut p = pos + qlen;
        loop {
            let Some(q) = scan::find(hay, &self.quote, p) else {
                return FieldOutcome::NeedMore;
            };
            let after = q + qlen;
            match scan::match_at(hay, after, &self.quote) {
                TokenMatch::Partial => return FieldOutcome::NeedMore,
                TokenMatch::Yes => {
                    p = after + qlen;
                    continue;
                }
                TokenMatch::No => {}
            }
            match scan::match_at(hay, after, &self.sep) {
                TokenMatch::Partial => return FieldOutcome::NeedMore,
                TokenMatch::Yes => {
                    return FieldOutcome::Field {
                        value: self.unescape(&hay[pos + qlen..q]),
                        next: after + self.sep.len(),
                        closer: Closer::Sep,
                    };
                }
                TokenMatch::No => {}
            }
            match scan::match_at(hay, after, &self.term) {
                TokenMatch::Partial => return FieldOutcome::NeedMore,
                TokenMatch::Yes => {
                    return FieldOutcome::Field {
                        value: self.unescape(&hay[pos + qlen..q]),
                        next: after + self.term.len(),
                        closer: Closer::Term,
                    };
                }
                TokenMatch::No => {}
            }
            p = after;
        }
    }

    /// Decodes field bytes and collapses doubled quotes to literal quotes.
    fn unescape(&self, bytes: &[u8]) -> String {
        let s = decode_text(self.encoding, bytes);
        if !self.quote2_str.is_empty() && s.contains(&self.quote2_str) {
            s.replace(&self.quote2_str, &self.quote_str)
        } else {
            s
        }
    }
}

/// Encodes configuration text into the session encoding. encoding_rs does
/// not encode into UTF-16, so the two UTF-16 flavors are expanded by hand.
fn encode_text(encoding: &'static Encoding, text: &str) -> Vec<u8> {
    if encoding == UTF_16LE {
        text.encode_utf16().flat_map(u16::to_le_bytes).collect()
    } else if encoding == UTF_16BE {
        text.encode_utf16().flat_map(u16::to_be_bytes).collect()
    } else {
        encoding.encode(text).0.into_owned()
    }
}

fn decode_text(encoding: &'static Encoding, bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    encoding.decode_without_bom_handling(bytes).0.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf16_tokens_are_two_bytes_per_unit() {
        assert_eq!(encode_text(UTF_16LE, ","), vec![0x2C, 0x00]);
        assert_eq!(encode_text(UTF_16BE, ","), vec![0x00, 0x2C]);
        assert_eq!(
            encode_text(UTF_16LE, "\r\n"),
            vec![0x0D, 0x00, 0x0A, 0x00]
        );
        assert_eq!(encode_text(encoding_rs::UTF_8, ",\r\n"), b",\r\n".to_vec());
    }

    #[test]
    fn utf16_round_trips_through_decode() {
        let bytes = encode_text(UTF_16LE, "héllo");
        assert_eq!(decode_text(UTF_16LE, &bytes), "héllo");
    }
}
