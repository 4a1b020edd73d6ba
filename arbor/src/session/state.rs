//! State-key scoping and validation.
//!
//! State keys are plain identifiers, optionally carrying one of three
//! scope prefixes. `temp:` keys live only for the current invocation and
//! are never persisted by a session service.

use crate::error::{AgentError, Result};

/// Prefix selecting application-scoped state.
pub const APP_PREFIX: &str = "app:";
/// Prefix selecting user-scoped state.
pub const USER_PREFIX: &str = "user:";
/// Prefix selecting invocation-temporary state.
pub const TEMP_PREFIX: &str = "temp:";

/// Split a key into its scope prefix (if any) and bare name.
#[must_use]
pub fn split_key(key: &str) -> (Option<&str>, &str) {
    for prefix in [APP_PREFIX, USER_PREFIX, TEMP_PREFIX] {
        if let Some(rest) = key.strip_prefix(prefix) {
            return (Some(prefix), rest);
        }
    }
    (None, key)
}

/// Whether a key selects the invocation-temporary scope.
#[must_use]
pub fn is_temp_key(key: &str) -> bool {
    key.starts_with(TEMP_PREFIX)
}

/// Validate a state key: an identifier, optionally prefixed with `app:`,
/// `user:`, or `temp:`. Any other colon prefix is invalid.
pub fn validate_key(key: &str) -> Result<()> {
    let (prefix, name) = split_key(key);
    if prefix.is_none() && name.contains(':') {
        return Err(AgentError::state(format!(
            "invalid state key scope in '{key}'"
        )));
    }
    if !is_identifier(name) {
        return Err(AgentError::state(format!("invalid state key '{key}'")));
    }
    Ok(())
}

/// Whether a bare name is a valid identifier.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("app:theme"), (Some(APP_PREFIX), "theme"));
        assert_eq!(split_key("user:lang"), (Some(USER_PREFIX), "lang"));
        assert_eq!(split_key("temp:token"), (Some(TEMP_PREFIX), "token"));
        assert_eq!(split_key("plain"), (None, "plain"));
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("name").is_ok());
        assert!(validate_key("app:theme_v2").is_ok());
        assert!(validate_key("bad:scope").is_err());
        assert!(validate_key("1leading_digit").is_err());
        assert!(validate_key("").is_err());
        assert!(validate_key("has space").is_err());
    }
}
