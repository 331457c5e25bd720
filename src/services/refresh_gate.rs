//! Hands out usable credentials, renewing expired ones on the way.
//!
//! A renewed credential is written back to the store before it is returned.
//! Failures never escape this module: callers get [`Resolution`] (or an
//! `Option` through [`CredentialGate::resolve`]) instead of an error.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::AppError;
use crate::services::credentials::{CredentialBlob, CredentialStatus, CredentialStore};
use crate::services::google_oauth::AuthorizationProvider;
use crate::services::with_timeout;

/// A credential that was valid when resolved, bound to the user it belongs to.
///
/// Passed explicitly into every calendar call so that one user's token can
/// never be picked up by work done for another user.
#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    pub user_id: i64,
    pub blob: CredentialBlob,
}

impl ResolvedCredential {
    pub fn access_token(&self) -> &str {
        &self.blob.access_token
    }
}

#[derive(Debug)]
pub enum Resolution {
    Valid(ResolvedCredential),
    /// The user never completed the handshake.
    Absent,
    /// A credential exists but could not be made usable. `terminal` means the
    /// provider rejected the grant (or there is nothing to refresh with), so
    /// only a new handshake helps.
    RefreshFailed { terminal: bool },
}

impl Resolution {
    pub fn into_valid(self) -> Option<ResolvedCredential> {
        match self {
            Resolution::Valid(cred) => Some(cred),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct CredentialGate {
    store: CredentialStore,
    provider: Arc<dyn AuthorizationProvider>,
    timeout: Duration,
}

impl CredentialGate {
    pub fn new(
        store: CredentialStore,
        provider: Arc<dyn AuthorizationProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            timeout,
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Valid credential or nothing. Every failure reads as "not authenticated".
    pub async fn resolve(&self, user_id: i64) -> Option<ResolvedCredential> {
        self.resolve_detailed(user_id).await.into_valid()
    }

    pub async fn resolve_detailed(&self, user_id: i64) -> Resolution {
        let stored = with_timeout("credential lookup", self.timeout, self.store.get(user_id)).await;

        let blob = match stored {
            Ok(Some(blob)) => blob,
            Ok(None) => return Resolution::Absent,
            Err(AppError::Serialization(_)) => {
                return Resolution::RefreshFailed { terminal: true };
            }
            Err(e) => {
                tracing::warn!("Failed to load credential for user {}: {}", user_id, e);
                return Resolution::RefreshFailed { terminal: false };
            }
        };

        match blob.status_at(Utc::now()) {
            CredentialStatus::Valid => Resolution::Valid(ResolvedCredential { user_id, blob }),
            CredentialStatus::ExpiredTerminal => {
                tracing::info!(
                    "Credential for user {} expired and cannot be refreshed",
                    user_id
                );
                Resolution::RefreshFailed { terminal: true }
            }
            CredentialStatus::ExpiredRefreshable => self.refresh(user_id, &blob).await,
            CredentialStatus::Absent => Resolution::Absent,
        }
    }

    async fn refresh(&self, user_id: i64, blob: &CredentialBlob) -> Resolution {
        let renewed =
            match with_timeout("token refresh", self.timeout, self.provider.refresh(blob)).await {
                Ok(renewed) => renewed,
                Err(e) => {
                    let terminal = matches!(e, AppError::OAuthRevoked(_));
                    tracing::warn!(
                        "Token refresh failed for user {} (terminal: {}): {}",
                        user_id,
                        terminal,
                        e
                    );
                    return Resolution::RefreshFailed { terminal };
                }
            };

        if let Err(e) = with_timeout(
            "credential write-back",
            self.timeout,
            self.store.upsert(user_id, &renewed),
        )
        .await
        {
            // The renewed token only reaches this caller; the next resolve
            // refreshes again from the stored refresh token.
            tracing::warn!(
                "Refreshed credential for user {} could not be persisted: {}",
                user_id,
                e
            );
        } else {
            tracing::debug!("Refreshed and stored credential for user {}", user_id);
        }

        Resolution::Valid(ResolvedCredential {
            user_id,
            blob: renewed,
        })
    }
}
