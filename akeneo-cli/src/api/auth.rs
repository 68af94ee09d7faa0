//! OAuth2 authentication against an Akeneo instance
//!
//! Akeneo's REST API uses the password grant: the client id/secret pair goes
//! into a Basic auth header and the API user's credentials into the form
//! body. Tokens are cached and renewed shortly before they expire.

use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::Deserialize;
use tokio::sync::RwLock;

use super::error::ApiError;
use crate::config::InstanceConfig;

/// Renew the token this long before its actual expiry.
const EXPIRY_MARGIN_SECS: i64 = 300;

/// Response from the `/api/oauth/v1/token` endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct TokenState {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Manages the access token for a single Akeneo instance.
///
/// Shared by reference between the client's calls; interior mutability keeps
/// the renewal invisible to callers.
#[derive(Debug)]
pub struct AuthManager {
    http: reqwest::Client,
    config: InstanceConfig,
    state: RwLock<Option<TokenState>>,
}

impl AuthManager {
    pub fn new(http: reqwest::Client, config: InstanceConfig) -> Self {
        Self {
            http,
            config,
            state: RwLock::new(None),
        }
    }

    /// Return a valid access token, authenticating or renewing if needed.
    pub async fn access_token(&self) -> Result<String, ApiError> {
        {
            let state = self.state.read().await;
            if let Some(token) = state.as_ref() {
                if Utc::now() < token.expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let mut state = self.state.write().await;
        // Another caller may have renewed while we waited for the write lock
        if let Some(token) = state.as_ref() {
            if Utc::now() < token.expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.authenticate().await?;
        let access_token = token.access_token.clone();
        *state = Some(token);
        Ok(access_token)
    }

    async fn authenticate(&self) -> Result<TokenState, ApiError> {
        debug!("authenticating against {}", self.config.host);

        let params = [
            ("grant_type", "password"),
            ("username", self.config.username.as_str()),
            ("password", self.config.password.as_str()),
        ];

        let response = self
            .http
            .post(format!("{}/api/oauth/v1/token", self.config.host))
            .basic_auth(&self.config.client_id, Some(&self.config.secret))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Transport(format!(
                "authentication against {} failed: {} - {}",
                self.config.host, status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Transport(format!("malformed token response: {}", e)))?;

        Ok(TokenState {
            access_token: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        })
    }
}
