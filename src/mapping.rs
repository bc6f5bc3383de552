//! Field mapping over a stored CSV upload.
//!
//! A user declares, per source column, which expected field it feeds. The
//! declaration arrives as a [`Correspondence`] of 1-based positions. From it
//! [`ColumnMapping`] builds three lookup tables that all resolve to the same
//! zero-based source column:
//!
//! - by zero-based field position,
//! - by the literal field text,
//! - by the normalized symbol of that text (see [`normalize_symbol`]).
//!
//! [`MappedFields::rows`] then replays the stored file, yielding one
//! [`MappedRow`] per record that answers lookups through any of those keys.

use std::{
    collections::{BTreeMap, HashMap},
    io::Read,
    sync::OnceLock,
};

use encoding_rs::Encoding;
use regex::Regex;
use serde_json::Value;

use crate::{error::MapFieldsError, io_utils, storage::StoredCsv};

static SEPARATOR_RUNS: OnceLock<Regex> = OnceLock::new();
static NON_SYMBOL_CHARS: OnceLock<Regex> = OnceLock::new();

/// Lower-cases `text`, collapses runs of `-`, whitespace and `/` into `_`,
/// then strips everything outside `[a-zA-Z0-9_]`.
pub fn normalize_symbol(text: &str) -> String {
    let separators = SEPARATOR_RUNS.get_or_init(|| Regex::new(r"[-\s/]+").expect("valid regex"));
    let invalid =
        NON_SYMBOL_CHARS.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_]+").expect("valid regex"));
    let lowered = text.to_lowercase();
    let collapsed = separators.replace_all(&lowered, "_");
    invalid.replace_all(&collapsed, "").into_owned()
}

/// One declared pairing: source column `column` feeds expected field `field`.
/// Both positions are 1-based, as entered by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnAssignment {
    pub column: usize,
    pub field: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Correspondence {
    assignments: Vec<ColumnAssignment>,
}

impl Correspondence {
    /// Both positions of every assignment must be at least 1.
    pub fn new(assignments: Vec<ColumnAssignment>) -> Result<Self, MapFieldsError> {
        if let Some(bad) = assignments
            .iter()
            .find(|assignment| assignment.column == 0 || assignment.field == 0)
        {
            return Err(MapFieldsError::InvalidCorrespondence(format!(
                "column {} => field {}: positions start at 1",
                bad.column, bad.field
            )));
        }
        Ok(Self { assignments })
    }

    pub fn assignments(&self) -> &[ColumnAssignment] {
        &self.assignments
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Parses `(column, field)` text pairs. A blank or `0` field leaves the
    /// column unmapped.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, MapFieldsError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut assignments = Vec::new();
        for (column, field) in pairs {
            let column = parse_position(column, "column")?;
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            let field: usize = field.parse().map_err(|_| {
                MapFieldsError::InvalidCorrespondence(format!(
                    "field position '{field}' for column {column} is not a number"
                ))
            })?;
            if field == 0 {
                continue;
            }
            assignments.push(ColumnAssignment { column, field });
        }
        Ok(Self { assignments })
    }

    /// Reads the submitted mapping parameter group, e.g. `{"1": "2", "2": "1"}`.
    pub fn from_params(value: &Value) -> Result<Self, MapFieldsError> {
        let Value::Object(map) = value else {
            return Err(MapFieldsError::InvalidCorrespondence(
                "mapping parameters must be an object of column => field".to_string(),
            ));
        };
        let mut pairs = Vec::with_capacity(map.len());
        for (column, field) in map {
            let field = match field {
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                Value::Null => String::new(),
                other => {
                    return Err(MapFieldsError::InvalidCorrespondence(format!(
                        "field position for column '{column}' must be a scalar, found {other}"
                    )));
                }
            };
            pairs.push((column.clone(), field));
        }
        Self::from_pairs(pairs.iter().map(|(c, f)| (c.as_str(), f.as_str())))
    }
}

fn parse_position(raw: &str, label: &str) -> Result<usize, MapFieldsError> {
    match raw.trim().parse::<usize>() {
        Ok(position) if position > 0 => Ok(position),
        _ => Err(MapFieldsError::InvalidCorrespondence(format!(
            "{label} position '{raw}' must be a number starting at 1"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingKey<'a> {
    /// Zero-based position in the expected field list.
    Index(usize),
    /// Literal field text.
    Text(&'a str),
    /// Normalized symbol, as produced by [`normalize_symbol`].
    Symbol(&'a str),
}

impl From<usize> for MappingKey<'_> {
    fn from(index: usize) -> Self {
        MappingKey::Index(index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedColumn {
    pub field_index: usize,
    pub text: Option<String>,
    pub symbol: Option<String>,
    pub column: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    by_index: BTreeMap<usize, MappedColumn>,
    by_text: HashMap<String, usize>,
    by_symbol: HashMap<String, usize>,
}

impl ColumnMapping {
    /// Builds the lookup tables. Later assignments to the same field win.
    pub fn build(fields: &[String], correspondence: &Correspondence) -> Self {
        let mut mapping = ColumnMapping::default();
        for assignment in correspondence.assignments() {
            let field_index = assignment.field - 1;
            let column = assignment.column - 1;
            let text = fields.get(field_index).cloned();
            let symbol = text.as_deref().map(normalize_symbol);
            if let Some(text) = &text {
                mapping.by_text.insert(text.clone(), column);
            }
            if let Some(symbol) = &symbol {
                mapping.by_symbol.insert(symbol.clone(), column);
            }
            mapping.by_index.insert(
                field_index,
                MappedColumn {
                    field_index,
                    text,
                    symbol,
                    column,
                },
            );
        }
        mapping
    }

    /// Zero-based source column for `key`, if mapped.
    pub fn column_for(&self, key: MappingKey<'_>) -> Option<usize> {
        match key {
            MappingKey::Index(index) => self.by_index.get(&index).map(|entry| entry.column),
            MappingKey::Text(text) => self.by_text.get(text).copied(),
            MappingKey::Symbol(symbol) => self.by_symbol.get(symbol).copied(),
        }
    }

    pub fn is_mapped(&self, key: MappingKey<'_>) -> bool {
        self.column_for(key).is_some()
    }

    /// Mapped fields ordered by field position.
    pub fn columns(&self) -> impl Iterator<Item = &MappedColumn> {
        self.by_index.values()
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}

/// A stored upload paired with the mapping that addresses its columns.
pub struct MappedFields<'s> {
    source: StoredCsv<'s>,
    mapping: ColumnMapping,
    skip_first_row: bool,
}

impl<'s> MappedFields<'s> {
    pub fn new(
        source: StoredCsv<'s>,
        fields: &[String],
        correspondence: &Correspondence,
        skip_first_row: bool,
    ) -> Self {
        Self {
            source,
            mapping: ColumnMapping::build(fields, correspondence),
            skip_first_row,
        }
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    pub fn skip_first_row(&self) -> bool {
        self.skip_first_row
    }

    pub fn storage_key(&self) -> &str {
        self.source.key()
    }

    pub fn is_mapped(&self, key: MappingKey<'_>) -> bool {
        self.mapping.is_mapped(key)
    }

    /// Starts an independent pass over the stored file.
    pub fn rows(&self) -> Result<MappedRows<'_>, MapFieldsError> {
        let reader = self.source.open()?;
        Ok(MappedRows::new(
            reader,
            &self.mapping,
            self.skip_first_row,
            self.source.encoding(),
        ))
    }
}

pub struct MappedRows<'a> {
    reader: csv::Reader<Box<dyn Read + 'a>>,
    mapping: &'a ColumnMapping,
    record: csv::ByteRecord,
    number: u64,
    skip_first_row: bool,
    encoding: &'static Encoding,
    finished: bool,
}

impl<'a> MappedRows<'a> {
    pub fn new(
        reader: Box<dyn Read + 'a>,
        mapping: &'a ColumnMapping,
        skip_first_row: bool,
        encoding: &'static Encoding,
    ) -> Self {
        Self {
            reader: io_utils::open_csv_reader(reader),
            mapping,
            record: csv::ByteRecord::new(),
            number: 0,
            skip_first_row,
            encoding,
            finished: false,
        }
    }
}

impl<'a> Iterator for MappedRows<'a> {
    type Item = Result<MappedRow<'a>, MapFieldsError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            match self.reader.read_byte_record(&mut self.record) {
                Ok(true) => {}
                Ok(false) => {
                    self.finished = true;
                    return None;
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err.into()));
                }
            }
            self.number += 1;
            if self.skip_first_row && self.number == 1 {
                continue;
            }
            return Some(Ok(MappedRow {
                mapping: self.mapping,
                cells: io_utils::decode_record(&self.record, self.encoding),
                number: self.number,
            }));
        }
        None
    }
}

/// One source record viewed through a [`ColumnMapping`].
#[derive(Debug, Clone)]
pub struct MappedRow<'a> {
    mapping: &'a ColumnMapping,
    cells: Vec<String>,
    number: u64,
}

impl<'a> MappedRow<'a> {
    /// 1-based record number in the source file, counting skipped rows.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Cell for `key`; `None` when unmapped or past the end of the record.
    pub fn get(&self, key: MappingKey<'_>) -> Option<&str> {
        self.mapping
            .column_for(key)
            .and_then(|column| self.cells.get(column))
            .map(String::as_str)
    }

    pub fn get_index(&self, index: usize) -> Option<&str> {
        self.get(MappingKey::Index(index))
    }

    pub fn get_text(&self, text: &str) -> Option<&str> {
        self.get(MappingKey::Text(text))
    }

    pub fn get_symbol(&self, symbol: &str) -> Option<&str> {
        self.get(MappingKey::Symbol(symbol))
    }

    /// `(field position, expected field name, value)` for every mapped field,
    /// in field order. The name is `None` for positions past the expected list.
    pub fn named_values(&self) -> impl Iterator<Item = (usize, Option<&'a str>, Option<&str>)> {
        let mapping: &'a ColumnMapping = self.mapping;
        mapping.columns().map(move |entry| {
            (
                entry.field_index,
                entry.text.as_deref(),
                self.cells.get(entry.column).map(String::as_str),
            )
        })
    }

    pub fn raw(&self) -> &[String] {
        &self.cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn normalize_symbol_collapses_separators_and_strips_punctuation() {
        assert_eq!(normalize_symbol("First Name"), "first_name");
        assert_eq!(normalize_symbol("E-Mail / Address"), "e_mail_address");
        assert_eq!(normalize_symbol("  Amount ($) "), "_amount__");
        assert_eq!(normalize_symbol("Zip\tCode"), "zip_code");
        assert_eq!(normalize_symbol("Résumé"), "rsum");
        assert_eq!(normalize_symbol(""), "");
    }

    #[test]
    fn from_pairs_skips_unmapped_columns() {
        let correspondence =
            Correspondence::from_pairs([("1", "2"), ("2", ""), ("3", "0"), ("4", " 1 ")]).unwrap();
        assert_eq!(
            correspondence.assignments(),
            &[
                ColumnAssignment {
                    column: 1,
                    field: 2
                },
                ColumnAssignment {
                    column: 4,
                    field: 1
                },
            ]
        );
    }

    #[test]
    fn from_pairs_rejects_bad_positions() {
        assert!(matches!(
            Correspondence::from_pairs([("0", "1")]),
            Err(MapFieldsError::InvalidCorrespondence(_))
        ));
        assert!(matches!(
            Correspondence::from_pairs([("a", "1")]),
            Err(MapFieldsError::InvalidCorrespondence(_))
        ));
        assert!(matches!(
            Correspondence::from_pairs([("1", "x")]),
            Err(MapFieldsError::InvalidCorrespondence(_))
        ));
    }

    #[test]
    fn later_assignment_to_same_field_wins() {
        let mapping = ColumnMapping::build(
            &fields(&["Name"]),
            &Correspondence::new(vec![
                ColumnAssignment {
                    column: 1,
                    field: 1,
                },
                ColumnAssignment {
                    column: 3,
                    field: 1,
                },
            ])
            .unwrap(),
        );
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.column_for(MappingKey::Index(0)), Some(2));
        assert_eq!(mapping.column_for(MappingKey::Text("Name")), Some(2));
    }

    #[test]
    fn field_beyond_list_only_maps_by_index() {
        let mapping = ColumnMapping::build(
            &fields(&["Name"]),
            &Correspondence::new(vec![ColumnAssignment {
                column: 2,
                field: 3,
            }])
            .unwrap(),
        );
        assert_eq!(mapping.column_for(MappingKey::Index(2)), Some(1));
        let entry = mapping.columns().next().unwrap();
        assert_eq!(entry.text, None);
        assert_eq!(entry.symbol, None);
    }

    #[test]
    fn zero_positions_are_rejected_before_building() {
        for (column, field) in [(0, 1), (1, 0)] {
            assert!(matches!(
                Correspondence::new(vec![ColumnAssignment { column, field }]),
                Err(MapFieldsError::InvalidCorrespondence(_))
            ));
        }
        assert!(Correspondence::new(Vec::new()).unwrap().is_empty());
    }
}
