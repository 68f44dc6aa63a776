//! Table name checks.
//!
//! Table names end up spliced into statement text (see
//! [`crate::backend::quote_ident`]), so every name is screened here first.

use crate::error::{KvError, Result};

/// Table holding the lock record. Hidden from listings.
pub const RESERVED_TABLE: &str = "KVLite";

const DISALLOWED: [char; 5] = [';', '"', '\'', '&', '('];

/// Reject names that are unsafe to splice, and the reserved name unless
/// `allow_reserved` is set.
///
/// SQLite folds ASCII case in identifiers, so `kvlite` and `KVLITE` name the
/// reserved table too and are refused the same way.
pub fn check_table(table: &str, allow_reserved: bool) -> Result<()> {
    if table.is_empty() || table.contains(&DISALLOWED[..]) {
        return Err(KvError::InvalidTableName(table.to_string()));
    }
    if !allow_reserved && is_reserved(table) {
        return Err(KvError::ReservedTable(table.to_string()));
    }
    Ok(())
}

pub fn is_reserved(table: &str) -> bool {
    table.eq_ignore_ascii_case(RESERVED_TABLE)
}
