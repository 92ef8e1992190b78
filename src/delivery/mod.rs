// src/delivery/mod.rs

mod gmail;
mod outlook;
mod token;

pub use gmail::GmailDraftDelivery;
pub use outlook::OutlookDelivery;

use crate::config::{Backend, Config};
use crate::draft::OutgoingMessage;
use async_trait::async_trait;
use std::path::Path;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("mail client unavailable: {0}")]
    Unavailable(String),

    #[error("mail client failed: {0}")]
    Failed(String),

    #[error("delivery io: {0}")]
    Io(#[from] std::io::Error),
}

/// A way to hand a finished draft to a mail client. Always best-effort:
/// the .eml export never depends on it.
#[async_trait]
pub trait Deliver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, message: &OutgoingMessage) -> Result<(), DeliveryError>;
}

/// Set up the configured backend, or `None` when delivery is off.
pub async fn connect(
    backend: Backend,
    cfg: &Config,
    config_path: &Path,
) -> Result<Option<Box<dyn Deliver>>, DeliveryError> {
    match backend {
        Backend::None => Ok(None),
        Backend::Outlook => Ok(Some(Box::new(OutlookDelivery::default()))),
        Backend::Gmail => {
            let gmail = cfg.gmail.as_ref().ok_or_else(|| {
                DeliveryError::Unavailable("no [gmail_oauth] section in config".to_string())
            })?;
            match GmailDraftDelivery::connect(gmail, config_path).await {
                Ok(d) => Ok(Some(Box::new(d))),
                Err(e) => {
                    warn!(error = %e, "Gmail setup failed");
                    Err(DeliveryError::Unavailable(e.to_string()))
                }
            }
        }
    }
}
