//! Typed cell values and their text rendering.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Single byte prefixed to numeric text when the writer's numeric-marker flag
/// is on; the reader strips it from unquoted fields. It forces spreadsheet
/// tools to keep the digits as typed text. No further semantics.
pub(crate) const NUMERIC_TEXT_MARKER: u8 = b'\t';

/// A typed column value supplied to the writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

/// Per-column classification captured from the first row of a session and
/// fixed for its remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Text,
    Number,
    DateTime,
    Other,
}

impl Value {
    pub(crate) fn kind(&self) -> Kind {
        match self {
            Value::Str(_) => Kind::Text,
            Value::Int(_) | Value::Float(_) => Kind::Number,
            Value::DateTime(_) => Kind::DateTime,
            Value::Null | Value::Bool(_) => Kind::Other,
        }
    }

    /// Plain display form, no quoting and no marker.
    fn plain(&self, datetime_format: &str) -> String {
        match self {
            Value::Null => String::new(),
            Value::Str(s) => s.clone(),
            Value::Int(n) => n.to_string(),
            Value::Float(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::DateTime(dt) => dt.format(datetime_format).to_string(),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v.naive_utc())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(i64::from(v))
            }
        })*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

/// Rendering configuration borrowed from the writer.
pub(crate) struct FormatOptions<'a> {
    pub sep: &'a str,
    pub term: &'a str,
    pub quote: &'a str,
    pub datetime_format: &'a str,
    pub number_as_text: bool,
}

/// Renders one value under its column's cached kind. A value that no longer
/// matches the kind falls back to its plain form; reclassification is never
/// attempted mid-session.
pub(crate) fn format_value(value: &Value, kind: Kind, opts: &FormatOptions<'_>) -> String {
    if matches!(value, Value::Null) {
        return String::new();
    }
    match (kind, value) {
        (Kind::Text, Value::Str(s)) => quote_text(s, opts),
        (Kind::Number, Value::Int(_) | Value::Float(_)) => {
            let plain = value.plain(opts.datetime_format);
            if opts.number_as_text {
                format!("{}{plain}", NUMERIC_TEXT_MARKER as char)
            } else {
                plain
            }
        }
        _ => value.plain(opts.datetime_format),
    }
}

/// Text rule: verbatim unless the value contains the separator, the quote, or
/// the terminator, in which case it is wrapped in quotes with every internal
/// quote doubled. An empty quote string disables quoting entirely.
pub(crate) fn quote_text(s: &str, opts: &FormatOptions<'_>) -> String {
    if opts.quote.is_empty() {
        return s.to_string();
    }
    let has_quote = s.contains(opts.quote);
    if !has_quote && !s.contains(opts.sep) && !s.contains(opts.term) {
        return s.to_string();
    }
    let body = if has_quote {
        s.replace(opts.quote, &opts.quote.repeat(2))
    } else {
        s.to_string()
    };
    format!("{q}{body}{q}", q = opts.quote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn opts(number_as_text: bool) -> FormatOptions<'static> {
        FormatOptions {
            sep: ",",
            term: "\r\n",
            quote: "\"",
            datetime_format: "%Y-%m-%d %H:%M:%S%.3f",
            number_as_text,
        }
    }

    #[test]
    fn text_is_quoted_only_when_needed() {
        let o = opts(false);
        assert_eq!(quote_text("plain", &o), "plain");
        assert_eq!(quote_text("a,b", &o), "\"a,b\"");
        assert_eq!(quote_text("say \"hi\"", &o), "\"say \"\"hi\"\"\"");
        assert_eq!(quote_text("two\r\nlines", &o), "\"two\r\nlines\"");
    }

    #[test]
    fn numbers_render_plain_or_marked() {
        let o = opts(false);
        assert_eq!(format_value(&Value::Int(42), Kind::Number, &o), "42");
        let o = opts(true);
        assert_eq!(format_value(&Value::Int(42), Kind::Number, &o), "\t42");
        assert_eq!(format_value(&Value::Float(1.5), Kind::Number, &o), "\t1.5");
    }

    #[test]
    fn datetime_uses_pattern() {
        let o = opts(false);
        let dt = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_milli_opt(10, 30, 0, 123)
            .unwrap();
        assert_eq!(
            format_value(&Value::DateTime(dt), Kind::DateTime, &o),
            "2024-01-15 10:30:00.123"
        );
    }

    #[test]
    fn null_renders_empty_under_any_kind() {
        let o = opts(true);
        for kind in [Kind::Text, Kind::Number, Kind::DateTime, Kind::Other] {
            assert_eq!(format_value(&Value::Null, kind, &o), "");
        }
    }

    #[test]
    fn mismatched_kind_falls_back_to_plain() {
        let o = opts(true);
        // A column classified Number later receiving text renders plain,
        // without quoting and without the marker.
        assert_eq!(
            format_value(&Value::Str("a,b".into()), Kind::Number, &o),
            "a,b"
        );
    }
}
