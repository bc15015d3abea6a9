use std::fmt;
use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::config::MAX_CONCURRENCY;
use crate::error::{IngestError, Result};
use crate::gmail::client::MailApi;
use crate::gmail::types::{MessageMetadata, MessageRef};
use crate::gmail::{INBOX_LABEL, METADATA_HEADERS};

pub const NO_SUBJECT: &str = "(no subject)";

/// One printed row: `- {date} | {from} | {subject}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLine {
    pub date: String,
    pub from: String,
    pub subject: String,
}

impl From<&MessageMetadata> for MessageLine {
    fn from(md: &MessageMetadata) -> Self {
        Self {
            date: md.header("Date").unwrap_or_default().to_string(),
            from: md.header("From").unwrap_or_default().to_string(),
            subject: md.header("Subject").unwrap_or(NO_SUBJECT).to_string(),
        }
    }
}

impl fmt::Display for MessageLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "- {} | {} | {}", self.date, self.from, self.subject)
    }
}

/// What happens when a single metadata fetch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    Abort,
    Skip,
}

/// Result of one listing: how many references the list call returned, and
/// the lines in list order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InboxListing {
    pub found: usize,
    pub lines: Vec<MessageLine>,
}

impl InboxListing {
    pub fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(out, "Found {} messages", self.found)?;
        for line in &self.lines {
            writeln!(out, "{line}")?;
        }
        out.flush()
    }
}

pub struct InboxLister<A> {
    api: A,
    concurrency: usize,
    on_failure: FailurePolicy,
}

impl<A: MailApi> InboxLister<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            concurrency: 1,
            on_failure: FailurePolicy::Abort,
        }
    }

    /// Number of metadata fetches in flight, clamped to `1..=MAX_CONCURRENCY`.
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.clamp(1, MAX_CONCURRENCY);
        self
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    /// List up to `max_results` inbox messages and fetch their headers.
    pub fn list_recent(&self, max_results: u32) -> Result<InboxListing> {
        if max_results == 0 {
            return Ok(InboxListing::default());
        }

        let refs = self.api.list_messages(INBOX_LABEL, max_results)?;
        log::info!("found {} messages", refs.len());

        let fetched = if self.concurrency <= 1 || refs.len() <= 1 {
            refs.iter().map(|r| self.fetch(r)).collect()
        } else {
            self.fetch_concurrent(&refs)
        };

        let mut lines = Vec::with_capacity(refs.len());
        for (r, res) in refs.iter().zip(fetched) {
            match res {
                Ok(md) => lines.push(MessageLine::from(&md)),
                Err(e) if self.on_failure == FailurePolicy::Skip => {
                    log::warn!("skipping message {}: {e}", r.id);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(InboxListing {
            found: refs.len(),
            lines,
        })
    }

    fn fetch(&self, r: &MessageRef) -> Result<MessageMetadata> {
        self.api.get_metadata(&r.id, METADATA_HEADERS)
    }

    /// Workers pull the next index from a shared counter; results land in
    /// their reference's slot so list order survives any completion order.
    fn fetch_concurrent(&self, refs: &[MessageRef]) -> Vec<Result<MessageMetadata>> {
        let next = AtomicUsize::new(0);
        let slots: Vec<Mutex<Option<Result<MessageMetadata>>>> =
            refs.iter().map(|_| Mutex::new(None)).collect();
        let workers = self.concurrency.min(refs.len());

        thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| {
                    loop {
                        let i = next.fetch_add(1, Ordering::SeqCst);
                        if i >= refs.len() {
                            break;
                        }
                        let res = self.fetch(&refs[i]);
                        let failed = res.is_err();
                        if let Ok(mut slot) = slots[i].lock() {
                            *slot = Some(res);
                        }
                        // no point fetching more once the run is doomed
                        if failed && self.on_failure == FailurePolicy::Abort {
                            next.store(refs.len(), Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        slots
            .into_iter()
            .zip(refs)
            .map(|(slot, r)| {
                slot.into_inner().ok().flatten().unwrap_or_else(|| {
                    Err(IngestError::remote(format!(
                        "metadata for message {} was not fetched",
                        r.id
                    )))
                })
            })
            .collect()
    }
}
