use super::token::{ConfigTokenStore, refresh_access_token};
use super::{Deliver, DeliveryError};
use crate::config::{Config, GmailConfig};
use crate::draft::OutgoingMessage;
use crate::eml;
use async_trait::async_trait;
use google_gmail1::Gmail;
use google_gmail1::api::{Draft, Scope};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use std::env;
use std::io::Cursor;
use std::path::Path;
use time::{Duration, OffsetDateTime};
use tracing::info;
use yup_oauth2::{ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod};

pub type GmailHub = Gmail<HttpsConnector<HttpConnector>>;

/// Saves the exported .eml as a Gmail draft.
pub struct GmailDraftDelivery {
    hub: GmailHub,
    user: String,
}

impl GmailDraftDelivery {
    /// Build an authenticated hub. With `REFRESH=1` the access token is
    /// refreshed first and written back to `config_path`.
    pub async fn connect(
        cfg: &GmailConfig,
        config_path: &Path,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        // Already installed is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let (tok, expires_at) = if env::var("REFRESH").is_ok_and(|v| v == "1") {
            info!("Refreshing Gmail access token");
            let token = refresh_access_token(cfg).await?;
            Config::update_access_token(config_path, &token.access_token)?;
            let expires_at = OffsetDateTime::now_utc() + Duration::seconds(token.expires_in);
            (token.access_token, Some(expires_at))
        } else {
            // Age unknown; the authenticator refreshes it on first use.
            (cfg.tokens.access_token.clone(), None)
        };

        let secret = ApplicationSecret {
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            token_uri: cfg.urls.token_url.clone(),
            auth_uri: cfg.urls.auth_url.clone(),
            redirect_uris: vec!["http://localhost".to_string()],
            project_id: None,
            client_email: None,
            auth_provider_x509_cert_url: None,
            client_x509_cert_url: None,
        };

        let auth =
            InstalledFlowAuthenticator::builder(secret, InstalledFlowReturnMethod::HTTPRedirect)
                .with_storage(Box::new(ConfigTokenStore::new(
                    config_path,
                    tok,
                    cfg.tokens.refresh_token.clone(),
                    expires_at,
                )))
                .build()
                .await?;

        let client =
            hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
                .build(
                    hyper_rustls::HttpsConnectorBuilder::new()
                        .with_webpki_roots()
                        .https_or_http()
                        .enable_http1()
                        .build(),
                );

        Ok(Self {
            hub: Gmail::new(client, auth),
            user: cfg.user.clone(),
        })
    }
}

#[async_trait]
impl Deliver for GmailDraftDelivery {
    fn name(&self) -> &'static str {
        "gmail"
    }

    async fn deliver(&self, message: &OutgoingMessage) -> Result<(), DeliveryError> {
        let raw = eml::render(message);
        let (_, draft) = self
            .hub
            .users()
            .drafts_create(Draft::default(), &self.user)
            .add_scope(Scope::Compose)
            .upload(
                Cursor::new(raw),
                "message/rfc822".parse().expect("static mime type"),
            )
            .await
            .map_err(|e| DeliveryError::Failed(e.to_string()))?;

        info!(user = %self.user, draft_id = ?draft.id, "Gmail draft created");
        Ok(())
    }
}
