//! Reconciles two contact tables by normalized identity.

use std::collections::HashSet;
use std::path::Path;

use tracing::info;

use super::normalize::{is_phone_column, normalize_phone, EMAIL_COLUMNS, HANDLE_COLUMNS, PHONE_COLUMNS};
use super::table::Table;
use super::ContactsError;

/// Rows of a candidate table that are not already in a base table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupReport {
    /// Header of the candidate table, used when writing `unique_rows`.
    pub headers: Vec<String>,
    /// Candidate rows absent from the base, in candidate order.
    pub unique_rows: Vec<Vec<String>>,
    /// Candidate rows whose identity was already in the base.
    pub duplicate_count: usize,
    /// Base column the identities were taken from.
    pub source_column: String,
}

impl DedupReport {
    /// Write exactly `unique_rows` under the candidate header, replacing `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`ContactsError`] if the file cannot be created or written.
    pub fn write(&self, path: &Path) -> Result<(), ContactsError> {
        Table::write_path(path, &self.headers, &self.unique_rows)
    }
}

/// Computes the part of one contact list not covered by another.
pub struct DedupEngine;

impl DedupEngine {
    /// Return the rows of `candidate` whose identity does not occur in `base`.
    ///
    /// The identity column is the first recognized phone, email or username
    /// header of `base`, else its first column. Phone-family columns compare
    /// digits only; every other column compares trimmed lowercase text.
    pub fn diff(base: &Table, candidate: &Table) -> DedupReport {
        let base_col = Self::identity_column(base);
        let source_column = base
            .headers()
            .get(base_col)
            .cloned()
            .unwrap_or_default();
        let candidate_col = candidate.column_index(&source_column).unwrap_or(0);
        let phone_like = is_phone_column(&source_column);

        let known: HashSet<String> = base
            .rows()
            .iter()
            .map(|row| normalize_cell(Table::cell(row, base_col), phone_like))
            .collect();

        let unique_rows: Vec<Vec<String>> = candidate
            .rows()
            .iter()
            .filter(|row| !known.contains(&normalize_cell(Table::cell(row, candidate_col), phone_like)))
            .cloned()
            .collect();
        let duplicate_count = candidate.len().saturating_sub(unique_rows.len());

        info!(
            column = %source_column,
            candidates = candidate.len(),
            unique = unique_rows.len(),
            duplicates = duplicate_count,
            "dedup finished"
        );

        DedupReport {
            headers: candidate.headers().to_vec(),
            unique_rows,
            duplicate_count,
            source_column,
        }
    }

    fn identity_column(table: &Table) -> usize {
        table
            .find_column(PHONE_COLUMNS)
            .or_else(|| table.find_column(EMAIL_COLUMNS))
            .or_else(|| table.find_column(HANDLE_COLUMNS))
            .unwrap_or(0)
    }
}

fn normalize_cell(value: &str, phone_like: bool) -> String {
    if phone_like {
        normalize_phone(value).unwrap_or_default()
    } else {
        value.trim().to_lowercase()
    }
}
