//! Identifier validation for configurable table and schema names
//!
//! History table names are interpolated into SQL, so they must never carry
//! anything but a plain identifier.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{MigrationError, MigrationResult};

const MAX_IDENTIFIER_LEN: usize = 63;

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

const RESERVED_WORDS: &[&str] = &[
    "select", "insert", "update", "delete", "drop", "union", "alter", "create", "table", "from",
    "where", "exec", "execute", "grant", "revoke", "truncate",
];

/// Validate a single SQL identifier
pub fn validate_identifier(name: &str) -> MigrationResult<()> {
    if name.is_empty() {
        return Err(MigrationError::InvalidIdentifier(
            "identifier cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(MigrationError::InvalidIdentifier(format!(
            "identifier '{}' exceeds {} characters",
            name, MAX_IDENTIFIER_LEN
        )));
    }

    if !IDENTIFIER_RE.is_match(name) {
        return Err(MigrationError::InvalidIdentifier(format!(
            "identifier '{}' may only contain letters, digits and underscores",
            name
        )));
    }

    let lower = name.to_lowercase();
    if RESERVED_WORDS.contains(&lower.as_str()) {
        return Err(MigrationError::InvalidIdentifier(format!(
            "identifier '{}' is a reserved word",
            name
        )));
    }

    Ok(())
}

/// Build a `schema.table` reference from already validated parts
pub(crate) fn qualify(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) => format!("{}.{}", schema, table),
        None => table.to_string(),
    }
}
