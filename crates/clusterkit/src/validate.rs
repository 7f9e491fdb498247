//! Syntax checks for values that end up verbatim in the bootstrap config.

use crate::error::{Error, Result};

const FORBIDDEN_PATH_CHARS: &[char] = &['\'', '"', '$', '`', ';', '&', '|', '\\'];

/// Validate an absolute directory path.
///
/// Paths must be absolute, must not contain `..` components, and must not
/// contain whitespace, quotes or shell metacharacters.
pub fn path(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::path(field, value, "must not be empty"));
    }
    if !value.starts_with('/') {
        return Err(Error::path(field, value, "must be absolute"));
    }
    if let Some(c) = value
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || FORBIDDEN_PATH_CHARS.contains(c))
    {
        return Err(Error::path(
            field,
            value,
            format!("contains forbidden character {c:?}"),
        ));
    }
    if value.split('/').any(|component| component == "..") {
        return Err(Error::path(field, value, "must not contain '..'"));
    }
    Ok(())
}

/// Validate an SQL-style identifier (database name, segment prefix).
pub fn identifier(field: &str, value: &str) -> Result<()> {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return Err(Error::setting(field, value, "must not be empty"));
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(Error::setting(
            field,
            value,
            "must start with a letter or underscore",
        ));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::setting(
            field,
            value,
            "may only contain letters, digits and underscores",
        ));
    }
    if value.len() > 63 {
        return Err(Error::setting(field, value, "must be at most 63 characters"));
    }
    Ok(())
}

/// Validate a token such as an encoding, locale or shell name.
pub fn token(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::setting(field, value, "must not be empty"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@'))
    {
        return Err(Error::setting(field, value, "contains unsupported characters"));
    }
    Ok(())
}

/// Validate free text written as a quoted value.
pub fn label(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::setting(field, value, "must not be empty"));
    }
    if value.chars().any(char::is_control) {
        return Err(Error::setting(field, value, "contains control characters"));
    }
    Ok(())
}
