use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gmail_ingest::auth::callback::CancelSignal;
use gmail_ingest::auth::default_scopes;
use gmail_ingest::auth::oauth::GoogleAuthProvider;
use gmail_ingest::auth::token_manager::CredentialManager;
use gmail_ingest::auth::token_store::FileTokenStore;
use gmail_ingest::config::{
    DEFAULT_AUTH_TIMEOUT_SECS, DEFAULT_CREDENTIALS_PATH, DEFAULT_MAX_RESULTS,
    DEFAULT_TOKEN_PATH, MAX_CONCURRENCY, MAX_RESULTS_CAP, Settings,
};
use gmail_ingest::gmail::client::GmailClient;
use gmail_ingest::inbox::{FailurePolicy, InboxLister};

#[derive(Parser)]
#[command(name = "gmail_ingest", version)]
#[command(about = "List date, sender and subject of the most recent Gmail inbox messages", long_about = None)]
struct Cli {
    /// How many inbox messages to list
    #[arg(long, default_value_t = DEFAULT_MAX_RESULTS,
          value_parser = clap::value_parser!(u32).range(0..=MAX_RESULTS_CAP as i64))]
    max_results: u32,

    /// OAuth client configuration downloaded from the Google Cloud console
    #[arg(long, default_value = DEFAULT_CREDENTIALS_PATH)]
    credentials: PathBuf,

    /// Where the access/refresh token is kept between runs
    #[arg(long, default_value = DEFAULT_TOKEN_PATH)]
    token: PathBuf,

    /// Seconds to wait for the browser authorization to complete
    #[arg(long, default_value_t = DEFAULT_AUTH_TIMEOUT_SECS)]
    auth_timeout: u64,

    /// Metadata fetches in flight at once
    #[arg(long, default_value_t = 1,
          value_parser = clap::value_parser!(u64).range(1..=MAX_CONCURRENCY as u64))]
    concurrency: u64,

    /// Leave out messages whose metadata cannot be fetched instead of failing
    #[arg(long)]
    skip_failed: bool,

    /// Only print the authorization URL
    #[arg(long)]
    no_browser: bool,
}

impl From<Cli> for Settings {
    fn from(cli: Cli) -> Self {
        Settings {
            credentials_path: cli.credentials,
            token_path: cli.token,
            max_results: cli.max_results,
            auth_timeout: Duration::from_secs(cli.auth_timeout),
            concurrency: cli.concurrency as usize,
            skip_failed: cli.skip_failed,
            open_browser: !cli.no_browser,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let settings = Settings::from(Cli::parse());

    // Ctrl-C aborts the browser authorization wait; anywhere else it ends the process.
    let cancel = Arc::new(CancelSignal::new());
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            if !cancel.interrupt() {
                std::process::exit(130);
            }
        })
        .context("installing Ctrl-C handler")?;
    }

    // credentials.json is only read if a browser grant turns out to be needed.
    let provider =
        GoogleAuthProvider::new(settings.credentials_path.clone(), settings.auth_timeout, cancel)
            .open_browser(settings.open_browser);
    let manager = CredentialManager::new(FileTokenStore::new(&settings.token_path), provider);
    let credential = manager.obtain_credential(&default_scopes())?;

    let policy = if settings.skip_failed {
        FailurePolicy::Skip
    } else {
        FailurePolicy::Abort
    };
    let lister = InboxLister::new(GmailClient::new(credential.access_token)?)
        .concurrency(settings.concurrency)
        .on_failure(policy);

    let listing = lister.list_recent(settings.max_results)?;
    listing
        .write_to(&mut std::io::stdout().lock())
        .context("writing listing to stdout")?;
    Ok(())
}
