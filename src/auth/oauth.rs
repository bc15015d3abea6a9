use chrono::{Duration as ChronoDuration, Utc};
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::reqwest::http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::callback::{CallbackListener, CancelSignal};
use crate::auth::credential::Credential;
use crate::auth::ensure_read_only;
use crate::config::{ClientSecrets, GOOGLE_AUTH_URI};
use crate::error::{IngestError, Result};

/// The two ways of getting a fresh credential from the provider.
pub trait AuthProvider {
    /// Non-interactive refresh. `current` must carry a refresh token.
    fn refresh(&self, current: &Credential) -> Result<Credential>;

    /// Interactive consent in the user's browser.
    fn authorize(&self, scopes: &[String]) -> Result<Credential>;
}

/// Google installed-application flow: loopback redirect, PKCE, offline access.
///
/// `credentials.json` is only read when a browser grant is needed; a refresh
/// uses the client identity stored with the token.
pub struct GoogleAuthProvider {
    credentials_path: PathBuf,
    timeout: Duration,
    cancel: Arc<CancelSignal>,
    open_browser: bool,
}

impl GoogleAuthProvider {
    pub fn new(
        credentials_path: impl Into<PathBuf>,
        timeout: Duration,
        cancel: Arc<CancelSignal>,
    ) -> Self {
        Self {
            credentials_path: credentials_path.into(),
            timeout,
            cancel,
            open_browser: true,
        }
    }

    pub fn open_browser(mut self, yes: bool) -> Self {
        self.open_browser = yes;
        self
    }
}

fn oauth_client(
    client_id: &str,
    client_secret: Option<&str>,
    auth_uri: &str,
    token_uri: &str,
) -> Result<BasicClient> {
    let auth_url = AuthUrl::new(auth_uri.to_string())
        .map_err(|e| IngestError::configuration(format!("invalid auth_uri: {e}")))?;
    let token_url = TokenUrl::new(token_uri.to_string())
        .map_err(|e| IngestError::configuration(format!("invalid token_uri: {e}")))?;
    Ok(BasicClient::new(
        ClientId::new(client_id.to_string()),
        client_secret.map(|s| ClientSecret::new(s.to_string())),
        auth_url,
        Some(token_url),
    ))
}

impl AuthProvider for GoogleAuthProvider {
    fn refresh(&self, current: &Credential) -> Result<Credential> {
        let rt = current
            .refresh_token
            .clone()
            .ok_or_else(|| IngestError::authentication("no refresh token to refresh with"))?;

        let token = oauth_client(
            &current.client_id,
            current.client_secret.as_deref(),
            GOOGLE_AUTH_URI,
            &current.token_uri,
        )?
        .exchange_refresh_token(&RefreshToken::new(rt.clone()))
        .request(http_client)
        .map_err(|e| token_error("token refresh", e))?;

        let mut refreshed = credential_from_response(
            &token,
            &current.client_id,
            current.client_secret.as_deref(),
            &current.token_uri,
            &current.scopes,
        )?;
        // Google normally omits the refresh token on refresh.
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(rt);
        }
        Ok(refreshed)
    }

    fn authorize(&self, scopes: &[String]) -> Result<Credential> {
        let secrets = ClientSecrets::load(&self.credentials_path)?;

        // Start listening first so the redirect cannot arrive before the bind.
        let listener = CallbackListener::bind()?;
        let redirect = RedirectUrl::new(listener.redirect_uri())
            .map_err(|e| IngestError::configuration(format!("invalid redirect uri: {e}")))?;

        let client = oauth_client(
            &secrets.client_id,
            secrets.client_secret.as_deref(),
            &secrets.auth_uri,
            &secrets.token_uri,
        )?
        .set_redirect_uri(redirect);
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut req = client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge)
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent");
        for s in scopes {
            req = req.add_scope(Scope::new(s.clone()));
        }
        let (auth_url, csrf) = req.url();

        eprintln!("Please visit this URL to authorize this application:\n{auth_url}");
        if self.open_browser {
            // best-effort: the printed URL is enough
            if let Err(e) = open::that(auth_url.as_str()) {
                log::warn!("could not open browser automatically: {e}");
            }
        }

        log::info!(
            "waiting up to {}s for the authorization redirect on port {}",
            self.timeout.as_secs(),
            listener.port()
        );
        let code = listener.wait_for_code(csrf.secret(), self.timeout, &self.cancel)?;

        let token = client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request(http_client)
            .map_err(|e| token_error("code exchange", e))?;

        credential_from_response(
            &token,
            &secrets.client_id,
            secrets.client_secret.as_deref(),
            &secrets.token_uri,
            scopes,
        )
    }
}

/// Builds the stored shape from a token-endpoint response. The response's own
/// scope list wins over `requested` when present, and must stay read-only.
pub fn credential_from_response(
    token: &BasicTokenResponse,
    client_id: &str,
    client_secret: Option<&str>,
    token_uri: &str,
    requested: &[String],
) -> Result<Credential> {
    let scopes: Vec<String> = match token.scopes() {
        Some(granted) => granted.iter().map(|s| s.as_str().to_string()).collect(),
        None => requested.to_vec(),
    };
    ensure_read_only(&scopes).map_err(|e| {
        IngestError::authentication(format!("provider granted an unexpected scope: {e}"))
    })?;

    let expiry = token
        .expires_in()
        .and_then(|d| ChronoDuration::from_std(d).ok())
        .map(|d| Utc::now() + d);

    Ok(Credential {
        access_token: token.access_token().secret().to_string(),
        refresh_token: token.refresh_token().map(|r| r.secret().to_string()),
        token_uri: token_uri.to_string(),
        client_id: client_id.to_string(),
        client_secret: client_secret.map(String::from),
        scopes,
        expiry,
    })
}

fn token_error<RE>(what: &str, err: RequestTokenError<RE, BasicErrorResponse>) -> IngestError
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(resp) => {
            IngestError::authentication(format!("{what} rejected by provider: {resp}"))
        }
        RequestTokenError::Request(e) => IngestError::remote(format!("{what} failed: {e}")),
        RequestTokenError::Parse(e, _body) => {
            IngestError::remote(format!("{what}: unreadable token response: {e}"))
        }
        RequestTokenError::Other(msg) => IngestError::remote(format!("{what} failed: {msg}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::GMAIL_READONLY_SCOPE;

    fn response(json: &str) -> BasicTokenResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn builds_credential_with_expiry_and_requested_scopes() {
        let token = response(
            r#"{"access_token":"at","token_type":"Bearer","expires_in":3599,"refresh_token":"rt"}"#,
        );
        let c = credential_from_response(
            &token,
            "cid",
            Some("cs"),
            "https://oauth2.googleapis.com/token",
            &[GMAIL_READONLY_SCOPE.to_string()],
        )
        .unwrap();
        assert_eq!(c.access_token, "at");
        assert_eq!(c.refresh_token.as_deref(), Some("rt"));
        assert_eq!(c.client_id, "cid");
        assert_eq!(c.scopes, vec![GMAIL_READONLY_SCOPE.to_string()]);
        assert!(!c.is_expired());
    }

    #[test]
    fn rejects_broader_granted_scope() {
        let token = response(
            r#"{"access_token":"at","token_type":"Bearer","scope":"https://mail.google.com/"}"#,
        );
        let err = credential_from_response(&token, "cid", None, "https://t", &[]).unwrap_err();
        assert!(matches!(err, IngestError::Authentication(_)));
    }
}
