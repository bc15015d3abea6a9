use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tiny_http::{Header, Response, Server};
use url::Url;

use crate::error::{IngestError, Result};

const POLL_SLICE: Duration = Duration::from_millis(500);

const SUCCESS_PAGE: &str = "<html><body><h3>Authorization received.</h3>\
    <p>You can close this tab and return to the terminal.</p></body></html>";
const DENIED_PAGE: &str = "<html><body><h3>Authorization was not granted.</h3>\
    <p>You can close this tab.</p></body></html>";
const STATE_MISMATCH_PAGE: &str = "<html><body><h3>Unexpected authorization response.</h3>\
    <p>The state parameter did not match this login attempt.</p></body></html>";

/// Ctrl-C plumbing for the browser wait. Only an interrupt that lands while a
/// wait is in progress cancels it; callers exit the process otherwise.
#[derive(Debug, Default)]
pub struct CancelSignal {
    waiting: AtomicBool,
    cancelled: AtomicBool,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when no wait is running, i.e. nothing was cancelled.
    pub fn interrupt(&self) -> bool {
        if !self.waiting.load(Ordering::SeqCst) {
            return false;
        }
        self.cancelled.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
    }

    fn enter(&self) -> WaitGuard<'_> {
        self.cancelled.store(false, Ordering::SeqCst);
        self.waiting.store(true, Ordering::SeqCst);
        WaitGuard(self)
    }
}

struct WaitGuard<'a>(&'a CancelSignal);

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.waiting.store(false, Ordering::SeqCst);
    }
}

/// What one redirect request to the loopback listener carried.
#[derive(Debug, PartialEq, Eq)]
pub enum Callback {
    Code(String),
    Denied(String),
    StateMismatch,
    /// Favicon fetches and anything else without OAuth parameters.
    Unrelated,
}

/// Classify a request target such as `/?state=..&code=..`.
pub fn parse_callback(target: &str, expected_state: &str) -> Callback {
    let Ok(url) = Url::parse(&format!("http://127.0.0.1{target}")) else {
        return Callback::Unrelated;
    };

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (k, v) in url.query_pairs() {
        match k.as_ref() {
            "code" => code = Some(v.into_owned()),
            "state" => state = Some(v.into_owned()),
            "error" => error = Some(v.into_owned()),
            _ => {}
        }
    }

    if code.is_none() && error.is_none() {
        return Callback::Unrelated;
    }
    if state.as_deref() != Some(expected_state) {
        return Callback::StateMismatch;
    }
    match (code, error) {
        (_, Some(err)) => Callback::Denied(err),
        (Some(code), None) => Callback::Code(code),
        (None, None) => Callback::Unrelated,
    }
}

/// Loopback HTTP listener that receives the provider's redirect.
///
/// Bound before the consent URL is shown, so the redirect can never race the bind.
pub struct CallbackListener {
    server: Server,
    addr: SocketAddr,
}

impl CallbackListener {
    /// Bind on `127.0.0.1` with an ephemeral port.
    pub fn bind() -> Result<Self> {
        Self::bind_port(0)
    }

    pub fn bind_port(port: u16) -> Result<Self> {
        let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
        let server = Server::http(bind_addr).map_err(|e| {
            IngestError::authentication(format!(
                "failed to bind OAuth callback listener on {bind_addr}: {e}"
            ))
        })?;
        let addr = server.server_addr();
        Ok(Self { server, addr })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port())
    }

    /// Block until a matching authorization code arrives, `timeout` elapses,
    /// or `cancel` is interrupted.
    pub fn wait_for_code(
        &self,
        expected_state: &str,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let _waiting = cancel.enter();

        loop {
            if cancel.is_cancelled() {
                return Err(IngestError::authentication("authorization cancelled by user"));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(IngestError::authentication(format!(
                    "no authorization received within {}s",
                    timeout.as_secs()
                )));
            }

            let slice = POLL_SLICE.min(deadline - now);
            let request = match self.server.recv_timeout(slice) {
                Ok(Some(r)) => r,
                Ok(None) => continue,
                Err(e) => {
                    log::debug!("callback listener receive error: {e}");
                    continue;
                }
            };

            let outcome = parse_callback(request.url(), expected_state);
            log::debug!("callback request {:?}", redact(&outcome));
            match outcome {
                Callback::Code(code) => {
                    respond_html(request, SUCCESS_PAGE);
                    return Ok(code);
                }
                Callback::Denied(err) => {
                    respond_html(request, DENIED_PAGE);
                    return Err(IngestError::authentication(format!(
                        "authorization denied: {err}"
                    )));
                }
                Callback::StateMismatch => {
                    log::warn!("ignoring callback with mismatched state");
                    respond_html(request, STATE_MISMATCH_PAGE);
                }
                Callback::Unrelated => {
                    let _ = request.respond(Response::empty(404));
                }
            }
        }
    }
}

fn redact(c: &Callback) -> &'static str {
    match c {
        Callback::Code(_) => "code",
        Callback::Denied(_) => "denied",
        Callback::StateMismatch => "state-mismatch",
        Callback::Unrelated => "unrelated",
    }
}

fn respond_html(request: tiny_http::Request, body: &str) {
    let mut response = Response::from_string(body);
    if let Ok(h) = Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..]) {
        response = response.with_header(h);
    }
    let _ = request.respond(response);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_with_matching_state() {
        assert_eq!(
            parse_callback("/?state=s1&code=4%2F0Ab&scope=x", "s1"),
            Callback::Code("4/0Ab".into())
        );
    }

    #[test]
    fn code_with_wrong_state() {
        assert_eq!(
            parse_callback("/?state=other&code=abc", "s1"),
            Callback::StateMismatch
        );
        assert_eq!(parse_callback("/?code=abc", "s1"), Callback::StateMismatch);
    }

    #[test]
    fn provider_error_is_denied() {
        assert_eq!(
            parse_callback("/?error=access_denied&state=s1", "s1"),
            Callback::Denied("access_denied".into())
        );
    }

    #[test]
    fn interrupt_outside_a_wait_cancels_nothing() {
        let signal = CancelSignal::new();
        assert!(!signal.interrupt());
        assert!(!signal.is_cancelled());
    }

    #[test]
    fn wait_flag_clears_when_guard_drops() {
        let signal = CancelSignal::new();
        {
            let _g = signal.enter();
            assert!(signal.is_waiting());
            assert!(signal.interrupt());
        }
        assert!(!signal.is_waiting());
        assert!(!signal.interrupt());
    }

    #[test]
    fn favicon_is_unrelated() {
        assert_eq!(parse_callback("/favicon.ico", "s1"), Callback::Unrelated);
    }
}
