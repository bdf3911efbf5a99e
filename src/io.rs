//! Source construction: open a path, buffer it, and peel off gzip/zstd
//! before the bytes reach the parser.

use crate::CsvResult;
use async_compression::tokio::bufread::{GzipDecoder, ZstdDecoder};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, BufReader};

/// What is known about a source before parsing it.
#[derive(Debug, Clone)]
pub struct SourceMeta {
    /// e.g. "gzip", "zstd", or empty
    pub content_encoding: String,
    /// just the filename (used for extension fallback)
    pub name_hint: String,
    /// Default character encoding for the read session; a byte-order mark in
    /// the data overrides it.
    pub charset: &'static encoding_rs::Encoding,
}

impl Default for SourceMeta {
    fn default() -> Self {
        Self {
            content_encoding: String::new(),
            name_hint: String::new(),
            charset: encoding_rs::UTF_8,
        }
    }
}

/// From a generic AsyncRead, wrap with optional decompression.
/// Returns an AsyncRead suitable for [`crate::Reader`] plus the meta used.
pub fn build_source<R>(raw: R, meta: SourceMeta) -> (impl AsyncRead + Unpin + Send, SourceMeta)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let normalized = meta.clone();
    let ce = meta.content_encoding.to_ascii_lowercase();

    let is_gzip =
        ce.split(',').any(|s| s.trim() == "gzip") || meta.name_hint.ends_with(".gz");
    let is_zstd =
        ce.split(',').any(|s| s.trim() == "zstd") || meta.name_hint.ends_with(".zst");

    // Larger buffer for fewer syscalls (1 MiB)
    let buf = BufReader::with_capacity(1 << 20, raw);
    let source: Box<dyn AsyncRead + Unpin + Send> = if is_gzip {
        Box::new(GzipDecoder::new(buf))
    } else if is_zstd {
        Box::new(ZstdDecoder::new(buf))
    } else {
        Box::new(buf)
    };

    (source, normalized)
}

/// Build a source from a local file path (lightweight meta from extension).
pub async fn source_from_path(path: &Path) -> CsvResult<(impl AsyncRead + Unpin + Send, SourceMeta)> {
    let file = File::open(path).await?;
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    let mut meta = SourceMeta {
        name_hint: name,
        ..Default::default()
    };
    match path.extension().and_then(|s| s.to_str()).unwrap_or_default() {
        "gz" => meta.content_encoding = "gzip".into(),
        "zst" => meta.content_encoding = "zstd".into(),
        _ => {}
    }

    Ok(build_source(file, meta))
}
