//! Turns a [`Table`] into typed [`Contact`] records for one channel.

use std::path::Path;

use tracing::{debug, warn};

use super::normalize::{
    normalize_email, normalize_handle, normalize_phone, EMAIL_COLUMNS, HANDLE_COLUMNS,
    MESSAGE_COLUMN, NAME_COLUMNS, PHONE_COLUMNS,
};
use super::table::{is_blank, Table};
use super::{Contact, ContactsError};
use crate::config::{CampaignConfig, Channel, DEFAULT_ROW_END};

/// Display name used when a row has no usable name.
pub const DEFAULT_NAME: &str = "Friend";

/// Display name for phone rows found without a recognized phone column.
pub const FALLBACK_PHONE_NAME: &str = "Sir/Ma'am";

/// A row that did not become a contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    /// 1-based data row.
    pub row_number: usize,
    /// Why the row was skipped.
    pub reason: String,
}

/// Which columns of a table feed which contact fields.
#[derive(Debug, Clone, Copy)]
struct ColumnPlan {
    identity: usize,
    name: Option<usize>,
    message: Option<usize>,
    identity_fell_back: bool,
}

/// Loads contacts for a single channel with a row window and skip rule.
#[derive(Debug, Clone)]
pub struct ContactLoader {
    channel: Channel,
    row_start: usize,
    row_end: usize,
    skip_prefix: Option<String>,
}

impl ContactLoader {
    /// Loader with the full row window and no skip prefix.
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            row_start: 1,
            row_end: DEFAULT_ROW_END,
            skip_prefix: None,
        }
    }

    /// Loader using the channel, row window and skip prefix of `config`.
    pub fn from_config(config: &CampaignConfig) -> Self {
        Self::new(config.channel)
            .with_rows(config.row_start, config.row_end)
            .with_skip_prefix(config.skip_prefix.clone())
    }

    /// Restrict loading to data rows `start..=end` (1-based).
    #[must_use]
    pub fn with_rows(mut self, start: usize, end: usize) -> Self {
        self.row_start = start;
        self.row_end = end;
        self
    }

    /// Reject phone identities starting with `prefix`.
    #[must_use]
    pub fn with_skip_prefix(mut self, prefix: Option<String>) -> Self {
        self.skip_prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    /// Read `path` and load its contacts.
    ///
    /// # Errors
    ///
    /// Returns a [`ContactsError`] only when the table itself cannot be read
    /// or parsed. Bad rows are skipped with a warning.
    pub fn load_path(&self, path: &Path) -> Result<Vec<Contact>, ContactsError> {
        let table = Table::from_path(path)?;
        Ok(self.load(&table))
    }

    /// Load the contacts of `table`, skipping rows that fail validation.
    pub fn load(&self, table: &Table) -> Vec<Contact> {
        self.load_detailed(table).0
    }

    /// Like [`ContactLoader::load`], also returning the rows that were rejected.
    ///
    /// Rows outside the row window are neither loaded nor reported.
    pub fn load_detailed(&self, table: &Table) -> (Vec<Contact>, Vec<RejectedRow>) {
        let mut contacts = Vec::new();
        let mut rejected = Vec::new();

        let Some(plan) = self.plan_columns(table) else {
            warn!(channel = %self.channel, "contact table has no columns");
            return (contacts, rejected);
        };
        debug!(
            channel = %self.channel,
            identity_column = %table.headers().get(plan.identity).map_or("", String::as_str),
            fell_back = plan.identity_fell_back,
            "planned contact columns"
        );

        for (index, row) in table.rows().iter().enumerate() {
            let row_number = index.saturating_add(1);
            if row_number < self.row_start || row_number > self.row_end {
                continue;
            }
            match self.contact_from_row(row, row_number, plan) {
                Ok(contact) => contacts.push(contact),
                Err(reason) => {
                    warn!(row = row_number, reason = %reason, "skipping contact row");
                    rejected.push(RejectedRow { row_number, reason });
                }
            }
        }

        (contacts, rejected)
    }

    fn plan_columns(&self, table: &Table) -> Option<ColumnPlan> {
        if table.headers().is_empty() {
            return None;
        }
        let candidates = match self.channel {
            Channel::Chat | Channel::Sms => PHONE_COLUMNS,
            Channel::Email => EMAIL_COLUMNS,
            Channel::Messenger => HANDLE_COLUMNS,
        };
        let found = table.find_column(candidates);
        let identity = found.unwrap_or(0);
        let identity_fell_back = found.is_none();

        let name = table.find_column(NAME_COLUMNS).or_else(|| {
            (identity_fell_back && table.headers().len() > 1).then_some(1)
        });
        let message = if self.channel == Channel::Messenger {
            table.column_index(MESSAGE_COLUMN)
        } else {
            None
        };

        Some(ColumnPlan {
            identity,
            name,
            message,
            identity_fell_back,
        })
    }

    fn contact_from_row(
        &self,
        row: &[String],
        row_number: usize,
        plan: ColumnPlan,
    ) -> Result<Contact, String> {
        let raw = Table::cell(row, plan.identity);
        if is_blank(raw) {
            return Err("empty identity".to_owned());
        }

        let identity = match self.channel {
            Channel::Chat | Channel::Sms => {
                let phone =
                    normalize_phone(raw).ok_or_else(|| format!("no digits in phone {raw:?}"))?;
                if let Some(prefix) = &self.skip_prefix {
                    if phone.starts_with(prefix.as_str()) {
                        return Err(format!("phone {phone} starts with skipped prefix {prefix}"));
                    }
                }
                phone
            }
            Channel::Email => {
                normalize_email(raw).ok_or_else(|| format!("invalid email {raw:?}"))?
            }
            Channel::Messenger => {
                normalize_handle(raw).ok_or_else(|| "empty handle".to_owned())?
            }
        };

        let fallback_name = if plan.identity_fell_back
            && matches!(self.channel, Channel::Chat | Channel::Sms)
        {
            FALLBACK_PHONE_NAME
        } else {
            DEFAULT_NAME
        };
        let display_name = plan
            .name
            .map(|col| Table::cell(row, col))
            .filter(|name| !is_blank(name))
            .map_or_else(|| fallback_name.to_owned(), |name| name.trim().to_owned());

        let custom_message = plan
            .message
            .map(|col| Table::cell(row, col))
            .filter(|msg| !is_blank(msg))
            .map(str::to_owned);

        Ok(Contact {
            identity,
            display_name,
            row_number,
            custom_message,
        })
    }
}
