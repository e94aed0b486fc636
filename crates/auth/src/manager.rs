use chrono::{Duration, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use workdesk_core::{Credential, Error, Result};

use crate::provider::CredentialProvider;
use crate::store::TokenStore;

struct CacheState {
    credential: Option<Credential>,
    force_refresh: bool,
}

/// One authorization session shared by every service adapter.
///
/// Consent always asks for the union of all adapters' scopes, and callers
/// check a request against the scope set they pass in. Refresh and
/// persist happen under one lock, and a token refreshed by another process in
/// the meantime is adopted instead of being overwritten.
pub struct CredentialStore {
    store: Arc<dyn TokenStore>,
    provider: Arc<dyn CredentialProvider>,
    all_scopes: BTreeSet<String>,
    skew: Duration,
    state: Mutex<CacheState>,
}

impl CredentialStore {
    pub fn new(
        store: Arc<dyn TokenStore>,
        provider: Arc<dyn CredentialProvider>,
        all_scopes: BTreeSet<String>,
        skew: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            all_scopes,
            skew,
            state: Mutex::new(CacheState {
                credential: None,
                force_refresh: false,
            }),
        }
    }

    pub fn all_scopes(&self) -> &BTreeSet<String> {
        &self.all_scopes
    }

    /// A credential covering `required`, refreshed or obtained as needed.
    pub async fn get_valid_credential(
        &self,
        service: &str,
        required: &BTreeSet<String>,
    ) -> Result<Credential> {
        let mut state = self.state.lock().await;

        let current = match state.credential.clone() {
            Some(cached) => cached,
            None => match self.store.load()? {
                Some(persisted) => persisted,
                None => {
                    let obtained = self.consent().await?;
                    state.force_refresh = false;
                    obtained
                }
            },
        };

        let missing = current.missing_scopes(required);
        if !missing.is_empty() {
            debug!(service, missing = ?missing, "Credential lacks scopes");
            state.credential = Some(current);
            return Err(Error::AuthInsufficientScope {
                service: service.to_string(),
                missing,
            });
        }

        if state.force_refresh || current.expires_within(Utc::now(), self.skew) {
            return self.refresh_locked(&mut state, current).await;
        }

        state.credential = Some(current.clone());
        Ok(current)
    }

    /// Mark the cached token stale, e.g. after a remote 401.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.force_refresh = true;
        debug!("Cached credential invalidated");
    }

    /// Current credential without refreshing, obtaining, or caching.
    pub async fn peek(&self) -> Result<Option<Credential>> {
        let state = self.state.lock().await;
        match &state.credential {
            Some(cached) => Ok(Some(cached.clone())),
            None => self.store.load(),
        }
    }

    /// Force a fresh consent for the full scope set.
    pub async fn login(&self) -> Result<Credential> {
        let mut state = self.state.lock().await;
        let credential = self.consent().await?;
        state.credential = Some(credential.clone());
        state.force_refresh = false;
        Ok(credential)
    }

    /// Revoke at the provider (best effort) and forget the token. Returns
    /// whether there was a token to forget.
    pub async fn revoke(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        let current = match state.credential.take() {
            Some(cached) => Some(cached),
            None => self.store.load()?,
        };
        if let Some(credential) = &current {
            if let Err(e) = self.provider.revoke(credential).await {
                warn!(error = %e, "Token revocation failed; deleting local copy anyway");
            }
        }
        self.store.clear()?;
        state.force_refresh = false;
        info!("Credential revoked");
        Ok(current.is_some())
    }

    async fn consent(&self) -> Result<Credential> {
        info!(scopes = self.all_scopes.len(), "Requesting consent");
        let credential = self.provider.obtain(&self.all_scopes).await?;
        self.store.save(&credential)?;
        Ok(credential)
    }

    async fn refresh_locked(&self, state: &mut CacheState, stale: Credential) -> Result<Credential> {
        if let Some(adopted) = self.newer_persisted(&stale)? {
            debug!("Adopting token refreshed elsewhere");
            return Ok(Self::remember(state, adopted));
        }

        if stale.refresh_token.is_none() {
            self.discard(state);
            return Err(Error::AuthExpired(
                "no refresh token; sign in again".to_string(),
            ));
        }

        match self.provider.refresh(&stale).await {
            Ok(fresh) => {
                if let Some(adopted) = self.newer_persisted(&stale)? {
                    debug!("Another refresh won; adopting persisted token");
                    return Ok(Self::remember(state, adopted));
                }
                self.store.save(&fresh)?;
                info!(expiry = %fresh.expiry, "Access token refreshed");
                Ok(Self::remember(state, fresh))
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed; clearing stored credential");
                self.discard(state);
                let detail = match e {
                    Error::AuthExpired(detail) => detail,
                    other => other.to_string(),
                };
                Err(Error::AuthExpired(detail))
            }
        }
    }

    /// The persisted token, if it is a different, later and still valid one.
    fn newer_persisted(&self, stale: &Credential) -> Result<Option<Credential>> {
        let persisted = match self.store.load()? {
            Some(p) => p,
            None => return Ok(None),
        };
        let newer = persisted.access_token != stale.access_token
            && persisted.expiry > stale.expiry
            && !persisted.expires_within(Utc::now(), self.skew);
        Ok(newer.then_some(persisted))
    }

    fn remember(state: &mut CacheState, credential: Credential) -> Credential {
        state.credential = Some(credential.clone());
        state.force_refresh = false;
        credential
    }

    fn discard(&self, state: &mut CacheState) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored credential");
        }
        state.credential = None;
        state.force_refresh = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileTokenStore, MemoryTokenStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct StubProvider {
        obtains: AtomicUsize,
        refreshes: AtomicUsize,
        revokes: AtomicUsize,
        fail_refresh: bool,
        granted: Option<BTreeSet<String>>,
    }

    #[async_trait]
    impl CredentialProvider for StubProvider {
        async fn obtain(&self, scopes: &BTreeSet<String>) -> Result<Credential> {
            let n = self.obtains.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Credential {
                access_token: format!("obtained-{}", n),
                refresh_token: Some("rt".into()),
                expiry: Utc::now() + Duration::hours(1),
                granted_scopes: self.granted.clone().unwrap_or_else(|| scopes.clone()),
            })
        }

        async fn refresh(&self, credential: &Credential) -> Result<Credential> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_refresh {
                return Err(Error::AuthExpired("invalid_grant".into()));
            }
            Ok(Credential {
                access_token: format!("refreshed-{}", n),
                refresh_token: credential.refresh_token.clone(),
                expiry: Utc::now() + Duration::hours(1),
                granted_scopes: credential.granted_scopes.clone(),
            })
        }

        async fn revoke(&self, _credential: &Credential) -> Result<()> {
            self.revokes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn scopes(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn credential(token: &str, expires_in: Duration, scope_list: &[&str]) -> Credential {
        Credential {
            access_token: token.into(),
            refresh_token: Some("rt".into()),
            expiry: Utc::now() + expires_in,
            granted_scopes: scopes(scope_list),
        }
    }

    fn manager(store: Arc<dyn TokenStore>, provider: Arc<StubProvider>) -> CredentialStore {
        CredentialStore::new(store, provider, scopes(&["a", "b"]), Duration::seconds(60))
    }

    #[tokio::test]
    async fn test_consent_when_empty_then_cached() {
        let store = Arc::new(MemoryTokenStore::new());
        let provider = Arc::new(StubProvider::default());
        let creds = manager(store.clone(), provider.clone());

        let first = creds.get_valid_credential("docs", &scopes(&["a"])).await.unwrap();
        assert_eq!(first.access_token, "obtained-1");
        assert_eq!(store.save_count(), 1);

        let second = creds.get_valid_credential("docs", &scopes(&["b"])).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(provider.obtains.load(Ordering::SeqCst), 1);
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_is_persisted_before_return() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let store = Arc::new(FileTokenStore::new(path.clone()));
        store
            .save(&credential("stale", Duration::seconds(-10), &["a", "b"]))
            .unwrap();

        let provider = Arc::new(StubProvider::default());
        let creds = manager(store, provider.clone());
        let fresh = creds.get_valid_credential("docs", &scopes(&["a"])).await.unwrap();
        assert!(fresh.expiry > Utc::now());
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);

        drop(creds);
        let reloaded = FileTokenStore::new(path).load().unwrap().unwrap();
        assert_eq!(reloaded, fresh);
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_store() {
        let store = Arc::new(MemoryTokenStore::with_credential(credential(
            "stale",
            Duration::seconds(-10),
            &["a", "b"],
        )));
        let provider = Arc::new(StubProvider {
            fail_refresh: true,
            ..Default::default()
        });
        let creds = manager(store.clone(), provider.clone());

        let err = creds.get_valid_credential("docs", &scopes(&["a"])).await.unwrap_err();
        assert!(matches!(err, Error::AuthExpired(ref d) if d == "invalid_grant"));
        assert!(store.load().unwrap().is_none());

        // Next request goes back to consent.
        let next = creds.get_valid_credential("docs", &scopes(&["a"])).await.unwrap();
        assert_eq!(next.access_token, "obtained-1");
    }

    #[tokio::test]
    async fn test_missing_refresh_token_expires() {
        let mut stale = credential("stale", Duration::seconds(-10), &["a"]);
        stale.refresh_token = None;
        let store = Arc::new(MemoryTokenStore::with_credential(stale));
        let provider = Arc::new(StubProvider::default());
        let creds = manager(store.clone(), provider.clone());

        let err = creds.get_valid_credential("docs", &scopes(&["a"])).await.unwrap_err();
        assert!(matches!(err, Error::AuthExpired(_)));
        assert!(store.load().unwrap().is_none());
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_insufficient_scope_makes_no_calls() {
        let store = Arc::new(MemoryTokenStore::with_credential(credential(
            "expired",
            Duration::seconds(-10),
            &["a"],
        )));
        let provider = Arc::new(StubProvider::default());
        let creds = manager(store, provider.clone());

        let err = creds
            .get_valid_credential("gmail", &scopes(&["a", "gmail.modify"]))
            .await
            .unwrap_err();
        match err {
            Error::AuthInsufficientScope { service, missing } => {
                assert_eq!(service, "gmail");
                assert_eq!(missing, vec!["gmail.modify".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 0);
        assert_eq!(provider.obtains.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_consent_granting_fewer_scopes_is_checked() {
        let store = Arc::new(MemoryTokenStore::new());
        let provider = Arc::new(StubProvider {
            granted: Some(scopes(&["a"])),
            ..Default::default()
        });
        let creds = manager(store, provider);
        let err = creds.get_valid_credential("x", &scopes(&["b"])).await.unwrap_err();
        assert!(matches!(err, Error::AuthInsufficientScope { .. }));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let store = Arc::new(MemoryTokenStore::with_credential(credential(
            "live",
            Duration::hours(1),
            &["a", "b"],
        )));
        let provider = Arc::new(StubProvider::default());
        let creds = manager(store, provider.clone());

        assert_eq!(
            creds.get_valid_credential("docs", &scopes(&["a"])).await.unwrap().access_token,
            "live"
        );
        creds.invalidate().await;
        let fresh = creds.get_valid_credential("docs", &scopes(&["a"])).await.unwrap();
        assert_eq!(fresh.access_token, "refreshed-1");
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_adopts_token_refreshed_elsewhere() {
        let store = Arc::new(MemoryTokenStore::with_credential(credential(
            "mine",
            Duration::minutes(30),
            &["a", "b"],
        )));
        let provider = Arc::new(StubProvider::default());
        let creds = manager(store.clone(), provider.clone());
        creds.get_valid_credential("docs", &scopes(&["a"])).await.unwrap();

        // Another process writes a newer token.
        store
            .save(&credential("theirs", Duration::hours(2), &["a", "b"]))
            .unwrap();
        creds.invalidate().await;

        let adopted = creds.get_valid_credential("docs", &scopes(&["a"])).await.unwrap();
        assert_eq!(adopted.access_token, "theirs");
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_peek_does_not_obtain() {
        let store = Arc::new(MemoryTokenStore::new());
        let provider = Arc::new(StubProvider::default());
        let creds = manager(store.clone(), provider.clone());
        assert!(creds.peek().await.unwrap().is_none());
        assert_eq!(provider.obtains.load(Ordering::SeqCst), 0);
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_login_and_revoke() {
        let store = Arc::new(MemoryTokenStore::new());
        let provider = Arc::new(StubProvider::default());
        let creds = manager(store.clone(), provider.clone());

        let cred = creds.login().await.unwrap();
        assert_eq!(store.load().unwrap(), Some(cred));

        assert!(creds.revoke().await.unwrap());
        assert_eq!(provider.revokes.load(Ordering::SeqCst), 1);
        assert!(store.load().unwrap().is_none());
        assert!(creds.peek().await.unwrap().is_none());
        assert!(!creds.revoke().await.unwrap());
    }
}
