// src/app.rs

use crate::composer::{self, ResolvedReply};
use crate::delivery::Deliver;
use crate::draft::{self, DraftError, OutgoingMessage};
use crate::eml;
use crate::pdf_preview::{self, PdfPreview};
use crate::sheet::SheetFormat;
use crate::store_directory::{DirectoryError, StoreDirectory};
use crate::templates::Template;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, info_span, warn};

/// Everything the session knows between commands. Only the store list
/// outlives the process, through its canonical file.
pub struct AppState {
    store_path: PathBuf,
    directory: Option<StoreDirectory>,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Please upload a store list to continue.")]
    NoStoreList,

    #[error(transparent)]
    Draft(#[from] DraftError),
}

/// One invoice and the clerk's choices for it.
pub struct ReplyRequest<'a> {
    pub template: &'a Template,
    pub store_input: Option<&'a str>,
    pub pdf_name: &'a str,
    pub pdf_bytes: &'a [u8],
    pub recipient: &'a str,
    pub sender: Option<String>,
}

pub struct ReplyOutput {
    pub resolved: ResolvedReply,
    pub message: OutgoingMessage,
    pub eml: Vec<u8>,
    pub eml_name: String,
}

impl ReplyOutput {
    /// Write the .eml and, if the draft carries one, the store-list
    /// spreadsheet into `dir`. Returns the written paths.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> std::io::Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let mut written = Vec::with_capacity(2);
        if let Some(sheet) = self.message.spreadsheet() {
            let path = dir.join(&sheet.filename);
            fs::write(&path, &sheet.bytes)?;
            written.push(path);
        }
        let path = dir.join(&self.eml_name);
        fs::write(&path, &self.eml)?;
        written.push(path);

        info!(files = written.len(), dir = %dir.display(), "Reply files written");
        Ok(written)
    }

    /// Write the export files, then hand the draft to `client` if there is
    /// one. A delivery failure is logged; the files stay on disk.
    pub async fn finish(
        &self,
        dir: impl AsRef<Path>,
        client: Option<&dyn Deliver>,
    ) -> std::io::Result<Vec<PathBuf>> {
        let written = self.write_to(dir)?;

        if let Some(client) = client {
            match client.deliver(&self.message).await {
                Ok(()) => info!(backend = client.name(), "Draft delivered to mail client"),
                Err(e) => {
                    warn!(backend = client.name(), error = %e, "Delivery failed; .eml is still saved")
                }
            }
        }
        Ok(written)
    }
}

impl AppState {
    /// Start a session from whatever store list was saved last.
    pub fn open(store_path: impl Into<PathBuf>) -> Result<Self, DirectoryError> {
        let store_path = store_path.into();
        let directory = StoreDirectory::open(&store_path)?;
        Ok(Self {
            store_path,
            directory,
        })
    }

    /// Like `open`, but an unreadable saved list is set aside instead of
    /// blocking the upload that would replace it.
    pub fn open_for_upload(store_path: impl Into<PathBuf>) -> Result<Self, DirectoryError> {
        let store_path = store_path.into();
        let directory = match StoreDirectory::open(&store_path) {
            Ok(directory) => directory,
            Err(DirectoryError::Parse(e)) => {
                warn!(path = %store_path.display(), error = %e, "Saved store list unreadable; it will be replaced");
                None
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            store_path,
            directory,
        })
    }

    pub fn directory(&self) -> Option<&StoreDirectory> {
        self.directory.as_ref()
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Persist `directory` to the canonical slot and make it the active one.
    pub fn replace_directory(
        &mut self,
        directory: StoreDirectory,
    ) -> Result<&StoreDirectory, DirectoryError> {
        directory.persist(&self.store_path)?;
        Ok(&*self.directory.insert(directory))
    }

    /// Parse an uploaded store list and replace the active one. A parse
    /// failure leaves the current directory untouched.
    pub fn upload_store_list(
        &mut self,
        bytes: &[u8],
        format: SheetFormat,
    ) -> Result<&StoreDirectory, DirectoryError> {
        let span = info_span!("upload", bytes = bytes.len(), ?format);
        let _guard = span.enter();

        let directory = StoreDirectory::load(bytes, format)?;
        self.replace_directory(directory)
    }

    /// Compose the reply, assemble the draft and export it.
    pub fn generate_reply(&self, req: ReplyRequest<'_>) -> Result<ReplyOutput, AppError> {
        let span = info_span!("reply", template = req.template.option, pdf = %req.pdf_name);
        let _guard = span.enter();

        let directory = self.directory.as_ref().ok_or(AppError::NoStoreList)?;
        let resolved = composer::compose(req.template, req.store_input, directory);
        let message = draft::assemble(
            &resolved,
            req.template.needs_store,
            req.pdf_bytes,
            req.pdf_name,
            req.template.attach_file,
            req.recipient,
        )?
        .with_sender(req.sender);

        let eml = eml::render(&message);
        info!(outcome = ?resolved.outcome, eml_bytes = eml.len(), "Reply generated");

        Ok(ReplyOutput {
            resolved,
            eml_name: draft::eml_filename(req.pdf_name),
            message,
            eml,
        })
    }
}

/// Page-1 preview; a failure is reported and the interaction carries on.
pub fn preview_invoice(pdf_bytes: &[u8]) -> Option<PdfPreview> {
    match pdf_preview::preview(pdf_bytes) {
        Ok(preview) => Some(preview),
        Err(e) => {
            warn!(error = %e, "Preview skipped");
            None
        }
    }
}
