// src/draft.rs

use crate::composer::ResolvedReply;
use crate::sheet::{SheetError, XLSX_MIME};
use tracing::info;

/// Where every billing reply goes.
pub const RECIPIENT: &str = "DSao@techstyle.com";
pub const PDF_MIME: &str = "application/pdf";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// A reply ready to be exported as an .eml or handed to a mail client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub subject: String,
    pub recipient: String,
    pub sender: Option<String>,
    pub body_text: String,
    pub attachments: Vec<Attachment>,
}

impl OutgoingMessage {
    pub fn with_sender(mut self, sender: Option<String>) -> Self {
        self.sender = sender;
        self
    }

    /// The pieces a scripted mail client needs to pre-fill a draft.
    pub fn subject_and_body(&self) -> (&str, &str) {
        (&self.subject, &self.body_text)
    }

    /// The store-list attachment, if the draft carries one.
    pub fn spreadsheet(&self) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.mime_type == XLSX_MIME)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("store list attachment could not be built: {0}")]
    Spreadsheet(#[from] SheetError),
}

/// `invoice.pdf` -> `invoice`. Names without the suffix are returned whole.
pub fn pdf_base_name(pdf_name: &str) -> &str {
    let split = pdf_name.len().saturating_sub(4);
    match pdf_name.get(split..) {
        Some(ext) if ext.eq_ignore_ascii_case(".pdf") => &pdf_name[..split],
        _ => pdf_name,
    }
}

pub fn spreadsheet_filename(needs_store: bool, pdf_name: &str) -> String {
    let prefix = if needs_store { "filtered" } else { "allstores" };
    format!("{prefix}_{}.xlsx", pdf_base_name(pdf_name))
}

pub fn eml_filename(pdf_name: &str) -> String {
    format!("{}_reply.eml", pdf_base_name(pdf_name))
}

/// Package a resolved reply and the source invoice into one message.
///
/// The store table is attached ahead of the PDF, which is always last.
pub fn assemble(
    resolved: &ResolvedReply,
    template_needs_store: bool,
    pdf_bytes: &[u8],
    pdf_name: &str,
    attach_requested: bool,
    recipient: &str,
) -> Result<OutgoingMessage, DraftError> {
    let mut attachments = Vec::with_capacity(2);

    if attach_requested {
        if let Some(table) = &resolved.attachment {
            attachments.push(Attachment {
                filename: spreadsheet_filename(template_needs_store, pdf_name),
                mime_type: XLSX_MIME.to_string(),
                bytes: table.to_xlsx()?,
            });
        }
    }

    attachments.push(Attachment {
        filename: pdf_name.to_string(),
        mime_type: PDF_MIME.to_string(),
        bytes: pdf_bytes.to_vec(),
    });

    info!(
        pdf = %pdf_name,
        attachments = attachments.len(),
        "Draft assembled"
    );

    Ok(OutgoingMessage {
        subject: format!("Response to: {pdf_name}"),
        recipient: recipient.to_string(),
        sender: None,
        body_text: resolved.body_text.clone(),
        attachments,
    })
}
