use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::config::GoogleConfig;
use crate::error::{AppError, AppResult};
use crate::services::credentials::CredentialBlob;

/// Issues authorization URLs, exchanges one-time codes and refreshes tokens.
#[async_trait]
pub trait AuthorizationProvider: Send + Sync + 'static {
    /// Deterministic for a given configuration.
    fn authorization_url(&self) -> String;

    async fn exchange_code(&self, code: &str) -> AppResult<CredentialBlob>;

    /// Renew an expired blob. `AppError::OAuthRevoked` means the refresh
    /// token itself is no longer accepted.
    async fn refresh(&self, blob: &CredentialBlob) -> AppResult<CredentialBlob>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

pub struct GoogleOAuthClient {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: Vec<String>,
    auth_url: Url,
    token_url: String,
    http: reqwest::Client,
}

impl GoogleOAuthClient {
    pub fn new(config: &GoogleConfig, timeout: Duration) -> AppResult<Self> {
        let auth_url = Url::parse(&config.auth_url)
            .map_err(|e| AppError::Config(format!("invalid GOOGLE_AUTH_URL: {}", e)))?;

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scopes: config.scopes.clone(),
            auth_url,
            token_url: config.token_url.clone(),
            http,
        })
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> AppResult<TokenResponse> {
        let response = self.http.post(&self.token_url).form(params).send().await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                AppError::OAuth(format!("invalid token response: {}", e))
            });
        }

        Err(Self::classify_error(status, &body))
    }

    fn classify_error(status: StatusCode, body: &str) -> AppError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return AppError::RateLimited;
        }
        if status.is_server_error() {
            return AppError::ServiceUnavailable(format!("token endpoint returned {}", status));
        }

        match serde_json::from_str::<TokenErrorResponse>(body) {
            Ok(err) => {
                let detail = match err.error_description {
                    Some(desc) => format!("{}: {}", err.error, desc),
                    None => err.error.clone(),
                };
                if err.error == "invalid_grant" {
                    AppError::OAuthRevoked(detail)
                } else {
                    AppError::OAuth(detail)
                }
            }
            Err(_) => AppError::OAuth(format!("token endpoint returned {}", status)),
        }
    }

    fn granted_scopes(&self, scope: Option<String>) -> Vec<String> {
        match scope {
            Some(s) if !s.trim().is_empty() => s.split_whitespace().map(str::to_string).collect(),
            _ => self.scopes.clone(),
        }
    }
}

#[async_trait]
impl AuthorizationProvider for GoogleOAuthClient {
    fn authorization_url(&self) -> String {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        url.to_string()
    }

    async fn exchange_code(&self, code: &str) -> AppResult<CredentialBlob> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        let token = self.token_request(&params).await?;
        tracing::info!("Exchanged authorization code for tokens");

        let scopes = self.granted_scopes(token.scope);
        Ok(CredentialBlob::issued_at(
            Utc::now(),
            token.access_token,
            token.refresh_token,
            token.expires_in,
            scopes,
        ))
    }

    async fn refresh(&self, blob: &CredentialBlob) -> AppResult<CredentialBlob> {
        let refresh_token = match blob.refresh_token.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => {
                return Err(AppError::OAuthRevoked(
                    "credential has no refresh token".to_string(),
                ))
            }
        };

        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let token = self.token_request(&params).await?;
        tracing::debug!("Refreshed access token");

        // Google usually omits the refresh token on refresh; keep the old one.
        let refresh_token = token
            .refresh_token
            .or_else(|| blob.refresh_token.clone());
        let scopes = match token.scope {
            Some(s) if !s.trim().is_empty() => s.split_whitespace().map(str::to_string).collect(),
            _ => blob.scopes.clone(),
        };

        Ok(CredentialBlob::issued_at(
            Utc::now(),
            token.access_token,
            refresh_token,
            token.expires_in,
            scopes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GoogleOAuthClient {
        let mut config = Config::default().google;
        config.client_id = "client-123".to_string();
        config.client_secret = "secret-456".to_string();
        config.token_url = format!("{}/token", server.uri());
        GoogleOAuthClient::new(&config, Duration::from_secs(5)).unwrap()
    }

    fn expired_blob() -> CredentialBlob {
        CredentialBlob {
            access_token: "old-access".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_at: Some(Utc::now() - chrono::Duration::minutes(1)),
            scopes: vec!["https://www.googleapis.com/auth/calendar".to_string()],
        }
    }

    #[tokio::test]
    async fn authorization_url_is_deterministic_and_complete() {
        let server = MockServer::start().await;
        let client = client_for(&server);

        let first = client.authorization_url();
        assert_eq!(first, client.authorization_url());

        let url = Url::parse(&first).unwrap();
        assert_eq!(url.host_str(), Some("accounts.google.com"));
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "client-123");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["access_type"], "offline");
        assert_eq!(pairs["prompt"], "consent");
        assert_eq!(pairs["scope"], "https://www.googleapis.com/auth/calendar");
        assert_eq!(pairs["redirect_uri"], "http://localhost:8080/oauth/callback");
    }

    #[tokio::test]
    async fn exchange_code_builds_blob() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=validcode123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-1",
                "refresh_token": "refresh-1",
                "expires_in": 3599,
                "scope": "https://www.googleapis.com/auth/calendar",
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let blob = client_for(&server)
            .exchange_code("validcode123")
            .await
            .unwrap();
        assert_eq!(blob.access_token, "access-1");
        assert_eq!(blob.refresh_token.as_deref(), Some("refresh-1"));
        assert!(!blob.is_expired_at(Utc::now()));
    }

    #[tokio::test]
    async fn reused_code_is_rejected_as_revoked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Malformed auth code."
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .exchange_code("4/reused")
            .await
            .unwrap_err();
        match err {
            AppError::OAuthRevoked(msg) => assert!(msg.contains("Malformed auth code")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn refresh_keeps_existing_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-2",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let renewed = client_for(&server).refresh(&expired_blob()).await.unwrap();
        assert_eq!(renewed.access_token, "access-2");
        assert_eq!(renewed.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(renewed.scopes, expired_blob().scopes);
        assert!(!renewed.is_expired_at(Utc::now()));
    }

    #[tokio::test]
    async fn refresh_error_classification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server).refresh(&expired_blob()).await.unwrap_err();
        assert!(err.is_transient());

        let mut no_refresh = expired_blob();
        no_refresh.refresh_token = None;
        let err = client_for(&server).refresh(&no_refresh).await.unwrap_err();
        assert!(matches!(err, AppError::OAuthRevoked(_)));
    }
}
