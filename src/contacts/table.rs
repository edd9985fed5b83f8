//! Delimited contact tables backed by the `csv` crate.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use csv::{ReaderBuilder, Trim, WriterBuilder};

use super::ContactsError;

/// A header row plus string cells, as read from a contact file.
///
/// Rows may be shorter or longer than the header; missing cells read as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Build a table from already-split values.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Read a comma-delimited table with a header row from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ContactsError::Io`] if the file cannot be opened, and the
    /// errors of [`Table::from_reader`] otherwise.
    pub fn from_path(path: &Path) -> Result<Self, ContactsError> {
        let file = File::open(path).map_err(|source| ContactsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file)
    }

    /// Parse a comma-delimited table with a header row.
    ///
    /// # Errors
    ///
    /// Returns [`ContactsError::Csv`] on malformed input and
    /// [`ContactsError::MissingHeader`] when there is no header.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ContactsError> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(str::to_owned).collect();
        if headers.iter().all(|h| h.is_empty()) {
            return Err(ContactsError::MissingHeader);
        }

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_owned).collect());
        }

        Ok(Self { headers, rows })
    }

    /// Column names in file order.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Data rows in file order.
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no data rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the first header matching `candidates`, in candidate order.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace.
    pub fn find_column(&self, candidates: &[&str]) -> Option<usize> {
        candidates
            .iter()
            .find_map(|candidate| self.column_index(candidate))
    }

    /// Index of the header equal to `name`, ignoring case.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let wanted = name.trim();
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(wanted))
    }

    /// Cell `col` of `row`, or `""` when the row is short.
    pub fn cell(row: &[String], col: usize) -> &str {
        row.get(col).map_or("", String::as_str)
    }

    /// Write `headers` and `rows` to `path`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns [`ContactsError::Io`] if the file cannot be created and
    /// [`ContactsError::Csv`] if writing fails.
    pub fn write_path(path: &Path, headers: &[String], rows: &[Vec<String>]) -> Result<(), ContactsError> {
        let file = File::create(path).map_err(|source| ContactsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::write_to(file, headers, rows)
    }

    /// Write `headers` and `rows` as comma-delimited text.
    ///
    /// # Errors
    ///
    /// Returns [`ContactsError::Csv`] if serialization or the writer fails.
    pub fn write_to<W: Write>(writer: W, headers: &[String], rows: &[Vec<String>]) -> Result<(), ContactsError> {
        let mut wtr = WriterBuilder::new().flexible(true).from_writer(writer);
        wtr.write_record(headers)?;
        for row in rows {
            wtr.write_record(row)?;
        }
        wtr.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

/// Whether a cell is empty once trimmed, including the literal `nan` left by
/// spreadsheet exports.
pub fn is_blank(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.eq_ignore_ascii_case("nan")
}
