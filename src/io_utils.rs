//! I/O utilities for reading stored uploads and writing mapped output.
//!
//! All CSV parsing in csv-map-fields flows through this module. It provides:
//!
//! - **Reader construction**: headerless, strict-width readers so a ragged
//!   record surfaces as malformed input.
//! - **Lenient decoding**: fields are decoded with `encoding_rs`; undecodable
//!   byte sequences are dropped instead of failing the read.
//! - **Bounded reads**: [`read_records`] stops after a fixed number of records
//!   so previews cost the same regardless of file size.
//! - **Writer construction**: CSV output to a file or stdout.

use std::{
    fs::File,
    io::{BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};

use crate::error::MapFieldsError;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
const REPLACEMENT_CHARACTER: char = '\u{FFFD}';

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

pub fn open_csv_reader<R>(reader: R) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(DEFAULT_CSV_DELIMITER)
        .double_quote(true)
        .flexible(false);
    builder.from_reader(reader)
}

pub fn open_csv_writer(path: Option<&Path>) -> Result<csv::Writer<Box<dyn Write>>> {
    let base: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(std::io::stdout()),
    };

    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(DEFAULT_CSV_DELIMITER)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    Ok(builder.from_writer(base))
}

/// Decodes `bytes`, dropping any sequence the encoding cannot represent.
pub fn decode_lossy(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        text.chars()
            .filter(|ch| *ch != REPLACEMENT_CHARACTER)
            .collect()
    } else {
        text.into_owned()
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Vec<String> {
    record
        .iter()
        .map(|field| decode_lossy(field, encoding))
        .collect()
}

/// Reads at most `limit` records from `reader`, stopping early at end of input.
pub fn read_records<R>(
    reader: R,
    limit: usize,
    encoding: &'static Encoding,
) -> Result<Vec<Vec<String>>, MapFieldsError>
where
    R: Read,
{
    let mut csv_reader = open_csv_reader(reader);
    let mut rows = Vec::with_capacity(limit);
    let mut record = csv::ByteRecord::new();
    while rows.len() < limit && csv_reader.read_byte_record(&mut record)? {
        rows.push(decode_record(&record, encoding));
    }
    Ok(rows)
}

/// Parses the whole of `reader`, keeping the first `keep` records and
/// returning them with the total record count.
pub fn scan_records<R>(
    reader: R,
    keep: usize,
    encoding: &'static Encoding,
) -> Result<(Vec<Vec<String>>, u64), MapFieldsError>
where
    R: Read,
{
    let mut csv_reader = open_csv_reader(reader);
    let mut rows = Vec::with_capacity(keep);
    let mut record = csv::ByteRecord::new();
    let mut total = 0u64;
    while csv_reader.read_byte_record(&mut record)? {
        if rows.len() < keep {
            rows.push(decode_record(&record, encoding));
        }
        total += 1;
    }
    Ok((rows, total))
}
