use crate::auth::credential::Credential;
use crate::auth::ensure_read_only;
use crate::auth::oauth::AuthProvider;
use crate::auth::token_store::TokenStore;
use crate::error::Result;

/// Hands out a valid credential: cached, refreshed, or freshly granted.
pub struct CredentialManager<S, P> {
    store: S,
    provider: P,
}

impl<S: TokenStore, P: AuthProvider> CredentialManager<S, P> {
    pub fn new(store: S, provider: P) -> Self {
        Self { store, provider }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Returns a valid credential for `scopes`; refreshes or runs the
    /// interactive grant if needed, and persists whatever it obtained.
    pub fn obtain_credential(&self, scopes: &[String]) -> Result<Credential> {
        ensure_read_only(scopes)?;

        let cached = self.store.load()?.filter(|c| usable_for(c, scopes));

        // 1) cached & not expired
        if let Some(c) = &cached {
            if c.is_valid() {
                log::info!("using cached access token");
                return Ok(c.clone());
            }
        }

        // 2) refresh if possible, otherwise interactive consent
        let fresh = match cached {
            Some(c) if c.can_refresh() => {
                log::info!("access token expired; refreshing");
                self.provider.refresh(&c)?
            }
            _ => {
                log::info!("no usable token; starting interactive authorization");
                self.provider.authorize(scopes)?
            }
        };

        self.store.save(&fresh)?;
        Ok(fresh)
    }
}

/// A stored token is only reused when its scopes are read-only and cover the request.
fn usable_for(c: &Credential, scopes: &[String]) -> bool {
    if ensure_read_only(&c.scopes).is_err() {
        log::warn!("stored token carries a non read-only scope; ignoring it");
        return false;
    }
    if !c.has_scopes(scopes) {
        log::warn!("stored token does not cover the requested scopes; ignoring it");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token_store::MemoryTokenStore;
    use crate::auth::{GMAIL_READONLY_SCOPE, default_scopes};
    use crate::error::IngestError;
    use chrono::{Duration, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProvider {
        calls: Mutex<Vec<&'static str>>,
        fail_refresh: bool,
    }

    impl RecordingProvider {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl AuthProvider for RecordingProvider {
        fn refresh(&self, current: &Credential) -> Result<Credential> {
            self.calls.lock().unwrap().push("refresh");
            if self.fail_refresh {
                return Err(IngestError::authentication("invalid_grant"));
            }
            Ok(Credential {
                access_token: "refreshed".into(),
                expiry: Some(Utc::now() + Duration::hours(1)),
                ..current.clone()
            })
        }

        fn authorize(&self, scopes: &[String]) -> Result<Credential> {
            self.calls.lock().unwrap().push("authorize");
            Ok(Credential {
                access_token: "granted".into(),
                refresh_token: Some("new-refresh".into()),
                scopes: scopes.to_vec(),
                expiry: Some(Utc::now() + Duration::hours(1)),
                ..cred(None, None)
            })
        }
    }

    fn cred(expiry_offset: Option<Duration>, refresh: Option<&str>) -> Credential {
        Credential {
            access_token: "cached".into(),
            refresh_token: refresh.map(String::from),
            token_uri: "https://oauth2.googleapis.com/token".into(),
            client_id: "cid".into(),
            client_secret: Some("cs".into()),
            scopes: vec![GMAIL_READONLY_SCOPE.into()],
            expiry: expiry_offset.map(|d| Utc::now() + d),
        }
    }

    fn manager(
        stored: Option<Credential>,
        provider: RecordingProvider,
    ) -> CredentialManager<MemoryTokenStore, RecordingProvider> {
        CredentialManager::new(MemoryTokenStore::new(stored), provider)
    }

    #[test]
    fn valid_cached_token_makes_no_provider_call() {
        let m = manager(
            Some(cred(Some(Duration::hours(1)), Some("rt"))),
            RecordingProvider::default(),
        );
        let c = m.obtain_credential(&default_scopes()).unwrap();
        assert_eq!(c.access_token, "cached");
        assert!(m.provider().calls().is_empty());
        assert_eq!(m.store().save_count(), 0);
    }

    #[test]
    fn expired_token_with_refresh_only_refreshes() {
        let m = manager(
            Some(cred(Some(-Duration::minutes(5)), Some("rt"))),
            RecordingProvider::default(),
        );
        let c = m.obtain_credential(&default_scopes()).unwrap();
        assert_eq!(c.access_token, "refreshed");
        assert_eq!(c.refresh_token.as_deref(), Some("rt"));
        assert_eq!(m.provider().calls(), vec!["refresh"]);
        assert_eq!(m.store().current().unwrap().access_token, "refreshed");
    }

    #[test]
    fn expired_token_without_refresh_runs_grant() {
        let m = manager(
            Some(cred(Some(-Duration::minutes(5)), None)),
            RecordingProvider::default(),
        );
        let c = m.obtain_credential(&default_scopes()).unwrap();
        assert_eq!(c.access_token, "granted");
        assert_eq!(m.provider().calls(), vec!["authorize"]);
        assert_eq!(m.store().save_count(), 1);
    }

    #[test]
    fn missing_token_runs_grant_and_persists() {
        let m = manager(None, RecordingProvider::default());
        m.obtain_credential(&default_scopes()).unwrap();
        assert_eq!(m.provider().calls(), vec!["authorize"]);
        assert_eq!(
            m.store().current().unwrap().refresh_token.as_deref(),
            Some("new-refresh")
        );
    }

    #[test]
    fn refresh_rejection_is_not_papered_over() {
        let provider = RecordingProvider {
            fail_refresh: true,
            ..Default::default()
        };
        let m = manager(Some(cred(Some(-Duration::minutes(5)), Some("rt"))), provider);
        let err = m.obtain_credential(&default_scopes()).unwrap_err();
        assert!(matches!(err, IngestError::Authentication(_)));
        assert_eq!(m.provider().calls(), vec!["refresh"]);
        assert_eq!(m.store().save_count(), 0);
    }

    #[test]
    fn broad_stored_scope_forces_new_grant() {
        let mut stored = cred(Some(Duration::hours(1)), Some("rt"));
        stored.scopes = vec!["https://mail.google.com/".into()];
        let m = manager(Some(stored), RecordingProvider::default());
        let c = m.obtain_credential(&default_scopes()).unwrap();
        assert_eq!(c.access_token, "granted");
        assert_eq!(c.scopes, default_scopes());
    }

    #[test]
    fn requesting_write_scope_is_refused_before_any_call() {
        let m = manager(None, RecordingProvider::default());
        let err = m
            .obtain_credential(&["https://www.googleapis.com/auth/gmail.modify".to_string()])
            .unwrap_err();
        assert!(matches!(err, IngestError::Configuration(_)));
        assert!(m.provider().calls().is_empty());
    }
}
