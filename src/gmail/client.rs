use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::thread;
use std::time::Duration;

use crate::error::{IngestError, Result};
use crate::gmail::types::{ListMessagesResponse, Message, MessageMetadata, MessageRef};

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The read-only slice of the mailbox API the lister needs.
pub trait MailApi: Sync {
    fn list_messages(&self, label: &str, max_results: u32) -> Result<Vec<MessageRef>>;
    fn get_metadata(&self, id: &str, headers: &[&str]) -> Result<MessageMetadata>;
}

/// Retries transport errors, 429 and 5xx with doubling backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub struct GmailClient {
    http: Client,
    base_url: String,
    access_token: String,
    retry: RetryPolicy,
}

impl GmailClient {
    pub fn new(access_token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(access_token, GMAIL_API_BASE)
    }

    pub fn with_base_url(access_token: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| IngestError::remote(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn get_json<T: DeserializeOwned>(&self, what: &str, build: impl Fn() -> RequestBuilder) -> Result<T> {
        let mut backoff = self.retry.initial_backoff;
        let attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=attempts {
            let last = attempt == attempts;
            log::debug!("{what}: attempt {attempt}/{attempts}");

            let resp = match build().bearer_auth(&self.access_token).send() {
                Ok(r) => r,
                Err(e) if !last => {
                    log::warn!("{what}: transport error ({e}); retrying in {backoff:?}");
                    thread::sleep(backoff);
                    backoff *= 2;
                    continue;
                }
                Err(e) => return Err(IngestError::remote(format!("{what}: {e}"))),
            };

            let status = resp.status();
            if status.is_success() {
                return resp
                    .json::<T>()
                    .map_err(|e| IngestError::remote(format!("{what}: unreadable response: {e}")));
            }
            if is_retryable(status) && !last {
                log::warn!("{what}: HTTP {status}; retrying in {backoff:?}");
                thread::sleep(backoff);
                backoff *= 2;
                continue;
            }

            let body = resp.text().unwrap_or_default();
            return Err(IngestError::remote(format!("{what}: HTTP {status}: {body}")));
        }

        Err(IngestError::remote(format!("{what}: no attempt made")))
    }
}

impl MailApi for GmailClient {
    fn list_messages(&self, label: &str, max_results: u32) -> Result<Vec<MessageRef>> {
        let url = format!("{}/messages", self.base_url);
        let max = max_results.to_string();
        let resp: ListMessagesResponse = self.get_json("list messages", || {
            self.http
                .get(&url)
                .query(&[("labelIds", label), ("maxResults", max.as_str())])
        })?;
        log::debug!(
            "listed {} messages (estimate {})",
            resp.messages.len(),
            resp.result_size_estimate
        );
        if resp.next_page_token.is_some() {
            log::debug!("more messages available; only the first page is listed");
        }
        Ok(resp.messages)
    }

    fn get_metadata(&self, id: &str, headers: &[&str]) -> Result<MessageMetadata> {
        let url = format!("{}/messages/{}", self.base_url, id);
        let mut query = vec![("format", "metadata")];
        query.extend(headers.iter().map(|h| ("metadataHeaders", *h)));

        let what = format!("get message {id}");
        let msg: Message = self.get_json(&what, || self.http.get(&url).query(&query))?;
        Ok(msg.into())
    }
}
