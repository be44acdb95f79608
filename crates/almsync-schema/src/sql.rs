//! SQL identifier and literal rendering.
//!
//! Table and column names come from the remote schema, so they cannot be bound
//! as statement parameters. Everything that ends up spliced into SQL text goes
//! through the functions here.

use crate::{Result, SchemaError};

/// Entity names that collide with reserved words of the target database.
const RESERVED_ENTITY_NAMES: &[(&str, &str)] = &[("User", "Users")];

/// Table name for an entity, remapping reserved words.
pub fn table_name(entity: &str) -> &str {
    RESERVED_ENTITY_NAMES
        .iter()
        .find(|(reserved, _)| *reserved == entity)
        .map(|(_, safe)| *safe)
        .unwrap_or(entity)
}

/// Name a table or column is stored under.
///
/// Names are folded to lower case, which is what the database does with the
/// unquoted names people type in ad-hoc queries (`select state from defect`).
pub fn storage_name(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> Result<String> {
    if name.is_empty() || name.contains('\0') {
        return Err(SchemaError::InvalidIdentifier(name.to_string()));
    }
    Ok(quoted(name))
}

/// Quoting without validation, for names already checked by [`quote_ident`].
pub(crate) fn quoted(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote a string literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render values as `'a','b','c'` for an `IN (...)` list.
pub fn literal_list<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(|v| quote_literal(v.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}
