use crate::draft::RECIPIENT;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use toml_edit::{DocumentMut, Item, table, value};
use tracing::info;

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_store_list_path")]
    pub store_list_path: PathBuf,
    #[serde(default = "default_recipient")]
    pub recipient: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub delivery: DeliverySection,
    #[serde(rename = "gmail_oauth", default)]
    pub gmail: Option<GmailConfig>,
}

fn default_store_list_path() -> PathBuf {
    PathBuf::from("data/store_list.xlsx")
}

fn default_recipient() -> String {
    RECIPIENT.to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_list_path: default_store_list_path(),
            recipient: default_recipient(),
            sender: None,
            output_dir: default_output_dir(),
            delivery: DeliverySection::default(),
            gmail: None,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct DeliverySection {
    #[serde(default)]
    pub backend: Backend,
}

/// Which local mail client, if any, gets a pre-filled draft.
#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    None,
    Outlook,
    Gmail,
}

#[derive(Deserialize, Debug)]
pub struct GmailConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_gmail_user")]
    pub user: String,
    pub tokens: Tokens,
    pub urls: AuthUrls,
}

fn default_gmail_user() -> String {
    "me".to_string()
}

#[derive(Deserialize, Debug)]
pub struct Tokens {
    pub refresh_token: String,
    pub access_token: String,
}

#[derive(Deserialize, Debug)]
pub struct AuthUrls {
    pub token_url: String,
    pub auth_url: String,
}

impl Config {
    /// Read the config file; a missing file means all defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No config file; using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn update_access_token(
        path: impl AsRef<Path>,
        new_token: &str,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let content = fs::read_to_string(&path)?;
        let mut doc = content.parse::<DocumentMut>()?;

        doc["gmail_oauth"]["tokens"]["access_token"] = value(new_token);

        fs::write(&path, doc.to_string())?;
        Ok(())
    }

    /// Set a dotted key (`delivery.backend`) in place, keeping the rest of
    /// the file as written. Booleans and integers are stored typed.
    pub fn set_value(
        path: impl AsRef<Path>,
        key: &str,
        raw: &str,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let content = if path.exists() {
            fs::read_to_string(path)?
        } else {
            String::new()
        };
        let mut doc = content.parse::<DocumentMut>()?;

        let new_value = if let Ok(b) = raw.parse::<bool>() {
            value(b)
        } else if let Ok(n) = raw.parse::<i64>() {
            value(n)
        } else {
            value(raw)
        };

        let mut parts: Vec<&str> = key.split('.').filter(|k| !k.is_empty()).collect();
        let leaf = parts.pop().ok_or("empty config key")?;

        let mut item: &mut Item = doc.as_item_mut();
        let mut owner = "";
        for k in parts {
            let tbl = item
                .as_table_like_mut()
                .ok_or_else(|| format!("'{owner}' is not a table"))?;
            if tbl.get(k).is_none() {
                tbl.insert(k, table());
            }
            item = tbl
                .get_mut(k)
                .ok_or_else(|| format!("'{k}' could not be created"))?;
            owner = k;
        }
        item.as_table_like_mut()
            .ok_or_else(|| format!("'{owner}' is not a table"))?
            .insert(leaf, new_value);

        // Reject edits that would leave the file unloadable.
        toml::from_str::<Config>(&doc.to_string())?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, doc.to_string())?;
        info!(key = %key, path = %path.display(), "Config updated");
        Ok(())
    }
}
