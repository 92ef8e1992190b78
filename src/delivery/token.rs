use crate::config::{Config, GmailConfig};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Mutex;
use time::OffsetDateTime;
use tracing::{error, info};
use urlencoding::encode;
use yup_oauth2::error::TokenStorageError;
use yup_oauth2::storage::{TokenInfo, TokenStorage};

/// Token storage backed by the `[gmail_oauth.tokens]` table of the config
/// file. Tokens refreshed by the authenticator are written back there.
pub struct ConfigTokenStore {
    config_path: PathBuf,
    current: Mutex<TokenInfo>,
}

impl ConfigTokenStore {
    /// With no known expiry the stored access token is reported as already
    /// expired, so the first request trades the refresh token for a fresh one.
    pub fn new(
        config_path: impl Into<PathBuf>,
        access_token: String,
        refresh_token: String,
        expires_at: Option<OffsetDateTime>,
    ) -> Self {
        Self {
            config_path: config_path.into(),
            current: Mutex::new(TokenInfo {
                access_token: Some(access_token),
                refresh_token: Some(refresh_token),
                expires_at: Some(expires_at.unwrap_or_else(OffsetDateTime::now_utc)),
                id_token: None,
            }),
        }
    }
}

#[async_trait]
impl TokenStorage for ConfigTokenStore {
    async fn set(&self, _scopes: &[&str], token: TokenInfo) -> Result<(), TokenStorageError> {
        if let Some(access) = &token.access_token {
            Config::update_access_token(&self.config_path, access)
                .map_err(|e| TokenStorageError::Other(e.to_string().into()))?;
            info!(path = %self.config_path.display(), "Refreshed access token saved");
        }

        let mut current = self
            .current
            .lock()
            .map_err(|_| TokenStorageError::Other("token store lock poisoned".into()))?;
        let refresh_token = token.refresh_token.or_else(|| current.refresh_token.take());
        *current = TokenInfo {
            refresh_token,
            ..token
        };
        Ok(())
    }

    async fn get(&self, _scopes: &[&str]) -> Option<TokenInfo> {
        self.current.lock().ok().map(|t| t.clone())
    }
}

#[derive(Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    pub token_type: String,
}

/// Trade the stored refresh token for a new access token.
pub async fn refresh_access_token(
    cfg: &GmailConfig,
) -> Result<TokenResponse, Box<dyn std::error::Error>> {
    let client = reqwest::Client::new();

    let body = format!(
        "client_id={}&client_secret={}&refresh_token={}&grant_type=refresh_token",
        encode(&cfg.client_id),
        encode(&cfg.client_secret),
        encode(&cfg.tokens.refresh_token),
    );

    let resp = client
        .post(&cfg.urls.token_url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(body)
        .send()
        .await?;

    if !resp.status().is_success() {
        let error_text = resp.text().await?;
        error!(response = %error_text, "Token refresh rejected");
        return Err(error_text.into());
    }

    let token_resp: TokenResponse = resp.json().await?;
    info!(expires_in = token_resp.expires_in, kind = %token_resp.token_type, "Access token refreshed");
    Ok(token_resp)
}
