pub mod client;
pub mod types;

pub const INBOX_LABEL: &str = "INBOX";

/// Headers requested in metadata-only fetches.
pub const METADATA_HEADERS: &[&str] = &["Subject", "From", "Date"];
