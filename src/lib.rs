//! Lists the most recent Gmail inbox messages through the Gmail REST API,
//! authenticating with a read-only OAuth2 installed-application flow.

pub mod auth;
pub mod config;
pub mod error;
pub mod gmail;
pub mod inbox;

pub use error::{IngestError, Result};
