//! Validation for values that end up in paths, process names, SQL and config files.
//!
//! An instance name is used verbatim as a directory name, a database name and a
//! process-manager name, so it is held to a strict allow-list instead of being escaped
//! per destination.

use crate::error::ValidationError;

/// Longest accepted instance name (PostgreSQL's identifier limit).
pub const MAX_INSTANCE_NAME_LEN: usize = 63;

/// Validate an instance name against `^[a-z0-9][a-z0-9_-]{0,62}$`.
///
/// The first character must be alphanumeric so a name can never be read as a
/// command-line option by the tools it is passed to.
pub fn validate_instance_name(name: &str) -> Result<(), ValidationError> {
    let invalid = |reason| ValidationError::InstanceName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(ValidationError::Missing("bot_name"));
    }
    if name.len() > MAX_INSTANCE_NAME_LEN {
        return Err(invalid("must be at most 63 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(invalid(
            "only lowercase letters, digits, '_' and '-' are allowed",
        ));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(invalid("must start with a letter or digit"));
    }

    Ok(())
}

/// Reject empty values.
pub fn require_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        Err(ValidationError::Missing(field))
    } else {
        Ok(())
    }
}

/// Reject values containing control characters (newlines would split env-file entries).
pub fn reject_control_chars(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.chars().any(char::is_control) {
        Err(ValidationError::ControlCharacters { field })
    } else {
        Ok(())
    }
}

/// Quote a SQL identifier: `bot-1` -> `"bot-1"`.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a SQL string literal: `o'brien` -> `'o''brien'`.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
