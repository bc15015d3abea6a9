use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{IngestError, Result};

pub const DEFAULT_CREDENTIALS_PATH: &str = "credentials.json";
pub const DEFAULT_TOKEN_PATH: &str = "token.json";
pub const DEFAULT_MAX_RESULTS: u32 = 20;
/// Gmail rejects `maxResults` above this.
pub const MAX_RESULTS_CAP: u32 = 500;
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 120;
pub const MAX_CONCURRENCY: usize = 8;

pub const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Application identity as found in Google's client-secrets file.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientSecrets {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

/// `credentials.json` holds exactly one of these sections.
#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

impl ClientSecrets {
    pub fn load(path: &Path) -> Result<Self> {
        let s = fs::read_to_string(path).map_err(|e| {
            IngestError::configuration(format!(
                "cannot read client configuration {}: {e}",
                path.display()
            ))
        })?;
        Self::parse(&s).map_err(|e| {
            IngestError::configuration(format!("{}: {e}", path.display()))
        })
    }

    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        let file: ClientSecretsFile =
            serde_json::from_str(s).map_err(|e| format!("invalid client secrets JSON: {e}"))?;
        let secrets = file
            .installed
            .or(file.web)
            .ok_or_else(|| "expected an \"installed\" or \"web\" section".to_string())?;
        if secrets.client_id.trim().is_empty() {
            return Err("client_id is empty".to_string());
        }
        Ok(secrets)
    }
}

/// Settings for one listing run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
    pub max_results: u32,
    pub auth_timeout: Duration,
    pub concurrency: usize,
    pub skip_failed: bool,
    pub open_browser: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
            token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
            max_results: DEFAULT_MAX_RESULTS,
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
            concurrency: 1,
            skip_failed: false,
            open_browser: true,
        }
    }
}
