//! Per-channel identity normalization rules.

use std::sync::LazyLock;

use regex::Regex;

use super::table::is_blank;

/// Header names recognized as phone columns, in preference order.
pub const PHONE_COLUMNS: &[&str] = &["phone", "phone_number", "phone_number_e164", "number"];

/// Header names recognized as email columns, in preference order.
pub const EMAIL_COLUMNS: &[&str] = &["email", "email_address", "mail", "recipient"];

/// Header names recognized as chat-handle columns, in preference order.
pub const HANDLE_COLUMNS: &[&str] = &["username", "user", "handle", "profile"];

/// Header names recognized as display-name columns, in preference order.
pub const NAME_COLUMNS: &[&str] = &["name", "contact_name", "fullname", "full_name", "customer_name"];

/// Header of the optional per-row message column.
pub const MESSAGE_COLUMN: &str = "message";

/// `local@domain.tld`: the final label may not contain `@` or `.`.
static EMAIL_SHAPE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@.\s]+$").ok());

/// Strip every non-digit character. Returns `None` when nothing is left.
///
/// Idempotent: normalizing an already-normalized number returns it unchanged.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// Trim and lowercase an address, accepting only the `local@domain.tld` shape.
pub fn normalize_email(raw: &str) -> Option<String> {
    let candidate = raw.trim().to_lowercase();
    let valid = EMAIL_SHAPE
        .as_ref()
        .is_some_and(|re| re.is_match(&candidate));
    valid.then_some(candidate)
}

/// Accept any non-blank handle verbatim, keeping its case.
pub fn normalize_handle(raw: &str) -> Option<String> {
    if is_blank(raw) {
        None
    } else {
        Some(raw.trim().to_owned())
    }
}

/// Whether a header belongs to the phone family.
pub fn is_phone_column(header: &str) -> bool {
    let header = header.trim();
    PHONE_COLUMNS.iter().any(|c| c.eq_ignore_ascii_case(header))
}
