//! I/O utilities for reading exported CSV text and writing CSV output.
//!
//! - **Encoding**: input decoding via `encoding_rs`, defaulting to UTF-8, with
//!   a leading byte-order mark removed.
//! - **stdin/stdout**: the `-` path convention routes through standard streams.
//! - **Writers**: CSV output uses `QuoteStyle::Necessary` so an unquoted empty
//!   field keeps meaning NULL for bulk-copy consumers.

use std::{
    fs::File,
    io::{self, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};

const UTF8_BOM: char = '\u{feff}';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn strip_bom(text: &str) -> &str {
    text.strip_prefix(UTF8_BOM).unwrap_or(text)
}

/// Reads a whole export into memory; `-` reads stdin.
pub fn read_input_text(path: &Path, encoding: &'static Encoding) -> Result<String> {
    let mut bytes = Vec::new();
    if is_dash(path) {
        io::stdin()
            .lock()
            .read_to_end(&mut bytes)
            .context("Reading CSV text from stdin")?;
    } else {
        File::open(path)
            .with_context(|| format!("Opening input file {path:?}"))?
            .read_to_end(&mut bytes)
            .with_context(|| format!("Reading input file {path:?}"))?;
    }
    let text = decode_bytes(&bytes, encoding).with_context(|| format!("Decoding {path:?}"))?;
    Ok(strip_bom(&text).to_string())
}

pub fn csv_writer_builder() -> csv::WriterBuilder {
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(b',')
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    builder
}

pub fn open_csv_writer(path: Option<&Path>) -> Result<csv::Writer<Box<dyn Write>>> {
    let writer: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(io::stdout()),
    };
    Ok(csv_writer_builder().from_writer(writer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_bom_removes_only_leading_mark() {
        assert_eq!(strip_bom("\u{feff}a,b"), "a,b");
        assert_eq!(strip_bom("a,\u{feff}b"), "a,\u{feff}b");
    }

    #[test]
    fn resolve_encoding_rejects_unknown_labels() {
        assert_eq!(resolve_encoding(None).unwrap(), UTF_8);
        assert_eq!(
            resolve_encoding(Some("windows-1256")).unwrap().name(),
            "windows-1256"
        );
        assert!(resolve_encoding(Some("klingon")).is_err());
    }

    #[test]
    fn decode_bytes_reads_legacy_encodings() {
        let latin1 = resolve_encoding(Some("latin1")).unwrap();
        assert_eq!(decode_bytes(b"caf\xe9", latin1).unwrap(), "café");
    }
}
