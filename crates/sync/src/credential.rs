//! OAuth2 credential state for the remote store.
//!
//! ```text
//! Unconfigured --set--> Valid --401 from a call--> Expired --refresh ok--> Valid
//!                                                      \--refresh fails--> Expired
//! ```
//!
//! Expiry is only ever learned from a rejected call, never from the stored
//! expiry timestamp. Credentials are immutable `Arc`s; a refresh swaps in a
//! whole new value under the write lock.

use std::sync::Arc;

use chrono::Utc;
use lifeboat_core::RemoteCredential;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::RemoteError;
use crate::oauth::TokenExchange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialPhase {
    Unconfigured,
    Valid,
    Expired,
}

#[derive(Debug, Clone, Default)]
enum Slot {
    #[default]
    Unconfigured,
    Valid(Arc<RemoteCredential>),
    Expired(Arc<RemoteCredential>),
}

impl Slot {
    fn credential(&self) -> Option<&Arc<RemoteCredential>> {
        match self {
            Slot::Unconfigured => None,
            Slot::Valid(c) | Slot::Expired(c) => Some(c),
        }
    }
}

#[derive(Debug, Default)]
pub struct CredentialCell {
    slot: RwLock<Slot>,
}

impl CredentialCell {
    pub async fn phase(&self) -> CredentialPhase {
        match &*self.slot.read().await {
            Slot::Unconfigured => CredentialPhase::Unconfigured,
            Slot::Valid(_) => CredentialPhase::Valid,
            Slot::Expired(_) => CredentialPhase::Expired,
        }
    }

    /// The credential to attempt a call with; an `Expired` one is still
    /// handed out so the call can fail and drive another refresh.
    pub async fn current(&self) -> Option<Arc<RemoteCredential>> {
        self.slot.read().await.credential().cloned()
    }

    pub async fn set(&self, credential: RemoteCredential) -> Result<(), RemoteError> {
        if credential.access_token.trim().is_empty() {
            return Err(RemoteError::AuthFailure(
                "access token must not be empty".to_owned(),
            ));
        }
        *self.slot.write().await = Slot::Valid(Arc::new(credential));
        Ok(())
    }

    pub async fn clear(&self) {
        *self.slot.write().await = Slot::Unconfigured;
    }

    /// Records that `seen` was rejected. No-op if it was already replaced.
    pub async fn mark_expired(&self, seen: &Arc<RemoteCredential>) {
        let mut slot = self.slot.write().await;
        if let Slot::Valid(current) = &*slot {
            if Arc::ptr_eq(current, seen) {
                *slot = Slot::Expired(current.clone());
            }
        }
    }

    /// Replaces the rejected credential `stale` with a refreshed one.
    ///
    /// The write lock is held across the token request so concurrent callers
    /// that hit the same expiry share one refresh: whoever comes second sees a
    /// different `Valid` credential and simply uses it.
    pub async fn refresh_after(
        &self,
        stale: &Arc<RemoteCredential>,
        tokens: &dyn TokenExchange,
    ) -> Result<Arc<RemoteCredential>, RemoteError> {
        let mut slot = self.slot.write().await;
        let previous = match &*slot {
            Slot::Unconfigured => return Err(RemoteError::NotConfigured),
            Slot::Valid(current) if !Arc::ptr_eq(current, stale) => return Ok(current.clone()),
            Slot::Valid(current) | Slot::Expired(current) => current.clone(),
        };

        let Some(refresh_token) = previous
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
        else {
            *slot = Slot::Expired(previous);
            return Err(RemoteError::AuthFailure(
                "no refresh token available".to_owned(),
            ));
        };

        match tokens.refresh(refresh_token).await {
            Ok(grant) if !grant.access_token.is_empty() => {
                let next = Arc::new(grant.into_credential(previous.refresh_token.clone(), Utc::now()));
                *slot = Slot::Valid(next.clone());
                info!(expiry = ?next.expiry, "remote credential refreshed");
                Ok(next)
            }
            Ok(_) => {
                *slot = Slot::Expired(previous);
                warn!("token refresh returned an empty access token");
                Err(RemoteError::AuthFailure(
                    "token endpoint returned an empty access token".to_owned(),
                ))
            }
            Err(e) => {
                *slot = Slot::Expired(previous);
                warn!(error = %e, "token refresh failed");
                Err(match e {
                    RemoteError::AuthFailure(reason) => RemoteError::AuthFailure(reason),
                    other => RemoteError::AuthFailure(other.to_string()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTokens;
    use crate::oauth::TokenGrant;

    fn cred(access: &str, refresh: Option<&str>) -> RemoteCredential {
        RemoteCredential {
            access_token: access.into(),
            refresh_token: refresh.map(Into::into),
            expiry: None,
        }
    }

    #[tokio::test]
    async fn set_requires_an_access_token() {
        let cell = CredentialCell::default();
        assert_eq!(cell.phase().await, CredentialPhase::Unconfigured);
        assert!(cell.set(cred("  ", Some("r"))).await.is_err());
        assert_eq!(cell.phase().await, CredentialPhase::Unconfigured);

        cell.set(cred("a", Some("r"))).await.unwrap();
        assert_eq!(cell.phase().await, CredentialPhase::Valid);
        cell.clear().await;
        assert!(cell.current().await.is_none());
    }

    #[tokio::test]
    async fn stale_mark_after_swap_is_ignored() {
        let cell = CredentialCell::default();
        cell.set(cred("a", Some("r"))).await.unwrap();
        let first = cell.current().await.unwrap();
        cell.set(cred("b", Some("r"))).await.unwrap();

        cell.mark_expired(&first).await;
        assert_eq!(cell.phase().await, CredentialPhase::Valid);
    }

    #[tokio::test]
    async fn successful_refresh_swaps_and_failed_refresh_stays_expired() {
        let cell = CredentialCell::default();
        cell.set(cred("a0", Some("r"))).await.unwrap();
        let tokens = MemoryTokens::new([
            Ok(TokenGrant {
                access_token: "a1".into(),
                refresh_token: None,
                expires_in: Some(3600),
            }),
            Err(RemoteError::AuthFailure("invalid_grant".into())),
        ]);

        let stale = cell.current().await.unwrap();
        cell.mark_expired(&stale).await;
        assert_eq!(cell.phase().await, CredentialPhase::Expired);

        let fresh = cell.refresh_after(&stale, &tokens).await.unwrap();
        assert_eq!(fresh.access_token, "a1");
        assert_eq!(fresh.refresh_token.as_deref(), Some("r"));
        assert_eq!(cell.phase().await, CredentialPhase::Valid);

        cell.mark_expired(&fresh).await;
        let err = cell.refresh_after(&fresh, &tokens).await.unwrap_err();
        assert_eq!(err, RemoteError::AuthFailure("invalid_grant".into()));
        assert_eq!(cell.phase().await, CredentialPhase::Expired);
        assert_eq!(tokens.calls(), 2);
    }

    #[tokio::test]
    async fn second_refresher_reuses_the_first_result() {
        let cell = CredentialCell::default();
        cell.set(cred("a0", Some("r"))).await.unwrap();
        let tokens = MemoryTokens::new([Ok(TokenGrant {
            access_token: "a1".into(),
            refresh_token: None,
            expires_in: None,
        })]);

        let stale = cell.current().await.unwrap();
        let first = cell.refresh_after(&stale, &tokens).await.unwrap();
        let second = cell.refresh_after(&stale, &tokens).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(tokens.calls(), 1);
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_without_calling_out() {
        let cell = CredentialCell::default();
        cell.set(cred("a0", None)).await.unwrap();
        let tokens = MemoryTokens::new([]);

        let stale = cell.current().await.unwrap();
        assert!(matches!(
            cell.refresh_after(&stale, &tokens).await,
            Err(RemoteError::AuthFailure(_))
        ));
        assert_eq!(cell.phase().await, CredentialPhase::Expired);
        assert_eq!(tokens.calls(), 0);
    }
}
