//! Plain-text tables for showing previews and expected fields on a terminal.

use std::borrow::Cow;
use std::fmt::Write as _;

const COLUMN_GAP: &str = "  ";

pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(cells.into_iter().map(Into::into).collect());
    }

    /// Renders header, separator and rows. Cells past the header count are
    /// dropped and missing cells render blank.
    pub fn render(&self) -> String {
        let widths = self.widths();
        let mut output = String::new();
        let _ = writeln!(output, "{}", format_line(&self.headers, &widths));
        let separator = widths
            .iter()
            .map(|width| "-".repeat(*width))
            .collect::<Vec<_>>();
        let _ = writeln!(output, "{}", format_line(&separator, &widths));
        for row in &self.rows {
            let _ = writeln!(output, "{}", format_line(row, &widths));
        }
        output
    }

    fn widths(&self) -> Vec<usize> {
        let mut widths = self
            .headers
            .iter()
            .map(|header| char_width(header).max(3))
            .collect::<Vec<_>>();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(char_width(&flatten_whitespace(cell)));
            }
        }
        widths
    }
}

/// Preview records with a leading 1-based record number column.
pub fn preview_table(rows: &[Vec<String>]) -> Table {
    let column_count = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut table = Table::new(
        std::iter::once("#".to_string())
            .chain((1..=column_count).map(|column| format!("column {column}"))),
    );
    for (idx, row) in rows.iter().enumerate() {
        table.push_row(std::iter::once((idx + 1).to_string()).chain(row.iter().cloned()));
    }
    table
}

/// Expected fields numbered the way a mapping is submitted (1-based).
pub fn fields_table(fields: &[(String, usize)]) -> Table {
    let mut table = Table::new(["#", "field"]);
    for (name, idx) in fields {
        table.push_row([(idx + 1).to_string(), name.clone()]);
    }
    table
}

fn format_line(cells: &[String], widths: &[usize]) -> String {
    let mut line = String::new();
    for (idx, width) in widths.iter().enumerate() {
        if idx > 0 {
            line.push_str(COLUMN_GAP);
        }
        let cell = cells
            .get(idx)
            .map(|cell| flatten_whitespace(cell))
            .unwrap_or(Cow::Borrowed(""));
        line.push_str(&cell);
        let padding = width.saturating_sub(char_width(&cell));
        line.push_str(&" ".repeat(padding));
    }
    line.trim_end().to_string()
}

fn char_width(value: &str) -> usize {
    value.chars().count()
}

fn flatten_whitespace(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
