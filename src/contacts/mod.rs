//! Contact tables: parsing, per-channel normalization, and list reconciliation.
//!
//! A [`table::Table`] is the raw delimited input. [`loader::ContactLoader`]
//! turns it into typed [`Contact`] records for one channel, and
//! [`dedup::DedupEngine`] compares two tables by normalized identity.

pub mod dedup;
pub mod loader;
pub mod normalize;
pub mod table;

use std::path::PathBuf;

pub use dedup::{DedupEngine, DedupReport};
pub use loader::{ContactLoader, RejectedRow};
pub use table::Table;

/// Errors from reading or writing contact tables.
///
/// Only table-level failures surface here. A bad row is a warning, never an error.
#[derive(Debug, thiserror::Error)]
pub enum ContactsError {
    /// The table file could not be opened or created.
    #[error("cannot open {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The delimited content could not be parsed or written.
    #[error("malformed contact table: {0}")]
    Csv(#[from] csv::Error),

    /// The table has no header row.
    #[error("contact table has no header row")]
    MissingHeader,
}

/// A single message recipient.
///
/// Produced by [`ContactLoader`] and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// Channel-specific address: digits-only phone, lowercase email, or raw handle.
    pub identity: String,
    /// Name used for personalization.
    pub display_name: String,
    /// 1-based data row the contact came from.
    pub row_number: usize,
    /// Per-row message that replaces the campaign template, if the table has one.
    pub custom_message: Option<String>,
}

impl Contact {
    /// Build a contact without a per-row message.
    pub fn new(identity: impl Into<String>, display_name: impl Into<String>, row_number: usize) -> Self {
        Self {
            identity: identity.into(),
            display_name: display_name.into(),
            row_number,
            custom_message: None,
        }
    }
}
