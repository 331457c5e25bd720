use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::services::credentials::CredentialStore;
use crate::services::google_oauth::AuthorizationProvider;
use crate::services::with_timeout;

/// Google installed-app authorization codes start with this literal.
pub const AUTH_CODE_PREFIX: &str = "4/";

/// Shortest message still treated as an authorization code.
pub const AUTH_CODE_MIN_LEN: usize = 20;

/// Whether a chat message should be routed to [`AuthorizationHandshake::complete`].
///
/// This is a heuristic: any message starting with `4/` that is long enough is
/// taken for a code, so a regular request that happens to start that way goes
/// through the exchange, fails there and is reported back to the user.
pub fn looks_like_auth_code(text: &str) -> bool {
    let text = text.trim();
    text.starts_with(AUTH_CODE_PREFIX) && text.chars().count() >= AUTH_CODE_MIN_LEN
}

/// Stateless authorization flow: produce the consent URL, then trade the
/// one-time code for a credential and store it.
#[derive(Clone)]
pub struct AuthorizationHandshake {
    provider: Arc<dyn AuthorizationProvider>,
    store: CredentialStore,
    timeout: Duration,
}

impl AuthorizationHandshake {
    pub fn new(
        provider: Arc<dyn AuthorizationProvider>,
        store: CredentialStore,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            timeout,
        }
    }

    pub fn begin(&self) -> String {
        self.provider.authorization_url()
    }

    /// Exchange `code` and persist the result for `user_id`. Nothing is stored
    /// when the exchange fails. Reuse of a code is rejected by the provider.
    pub async fn complete(&self, user_id: i64, code: &str) -> AppResult<()> {
        let code = code.trim();
        if code.is_empty() {
            return Err(AppError::BadRequest("empty authorization code".to_string()));
        }

        let blob = with_timeout(
            "authorization code exchange",
            self.timeout,
            self.provider.exchange_code(code),
        )
        .await
        .map_err(|e| {
            tracing::warn!("Authorization code exchange failed for user {}: {}", user_id, e);
            e
        })?;

        with_timeout(
            "credential save",
            self.timeout,
            self.store.upsert(user_id, &blob),
        )
        .await?;

        tracing::info!("User {} completed authorization", user_id);
        Ok(())
    }
}
