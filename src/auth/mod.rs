pub mod callback;
pub mod credential;
pub mod oauth;
pub mod token_manager;
pub mod token_store;

use crate::error::{IngestError, Result};

/// Read-only mailbox access. Nothing broader is ever requested or accepted.
pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// Scopes this program may hold.
pub const READ_ONLY_SCOPES: &[&str] = &[GMAIL_READONLY_SCOPE];

/// Fails with a configuration error naming the first scope outside [`READ_ONLY_SCOPES`].
pub fn ensure_read_only(scopes: &[String]) -> Result<()> {
    match scopes
        .iter()
        .find(|s| !READ_ONLY_SCOPES.contains(&s.as_str()))
    {
        Some(bad) => Err(IngestError::configuration(format!(
            "scope {bad} is not read-only"
        ))),
        None => Ok(()),
    }
}

pub fn default_scopes() -> Vec<String> {
    vec![GMAIL_READONLY_SCOPE.to_string()]
}
