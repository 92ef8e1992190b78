// src/pdf_preview.rs

use lopdf::{Document, ObjectId};
use std::panic::{self, AssertUnwindSafe};
use tracing::{info, warn};

/// What page 1 of an invoice looks like, as far as text goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOne {
    Text(String),
    /// Image-only page; nothing to show without OCR.
    ScannedImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfPreview {
    pub pages: usize,
    pub first_page: PageOne,
}

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("Could not generate preview: {0}")]
    Parse(#[from] lopdf::Error),

    #[error("Could not generate preview: document has no pages")]
    NoPages,
}

/// Below this many non-whitespace characters page 1 counts as scanned.
const MIN_TEXT_CHARS: usize = 30;

/// Longest preview handed back to the caller.
pub const PREVIEW_CHARS: usize = 2000;

/// Build a page-1 preview of an uploaded invoice.
pub fn preview(pdf_bytes: &[u8]) -> Result<PdfPreview, PreviewError> {
    let doc = Document::load_mem(pdf_bytes)?;
    let pages = doc.get_pages();
    let Some((&first_no, &first_id)) = pages.iter().next() else {
        return Err(PreviewError::NoPages);
    };

    if page_is_image_only(&doc, first_id) {
        info!(pages = pages.len(), "Page 1 looks scanned / image-only");
        return Ok(PdfPreview {
            pages: pages.len(),
            first_page: PageOne::ScannedImage,
        });
    }

    let text = match doc.extract_text(&[first_no]) {
        Ok(text) if meaningful_chars(&text) >= MIN_TEXT_CHARS => Some(text),
        Ok(_) => fallback_text(pdf_bytes),
        Err(e) => {
            warn!(error = %e, "lopdf text extraction failed; trying pdf-extract");
            fallback_text(pdf_bytes)
        }
    };

    let first_page = match text {
        Some(text) => {
            info!(chars = text.len(), "Page 1 text extracted");
            PageOne::Text(truncate(text.trim(), PREVIEW_CHARS))
        }
        None => PageOne::ScannedImage,
    };

    Ok(PdfPreview {
        pages: pages.len(),
        first_page,
    })
}

/// Whole-document extraction; the first form feed ends page 1.
///
/// pdf-extract panics on some malformed font dictionaries, so the call is
/// isolated and a panic counts as "no text".
fn fallback_text(pdf_bytes: &[u8]) -> Option<String> {
    let extracted = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(pdf_bytes)
    }));
    match extracted {
        Ok(Ok(text)) => {
            let page = text.split('\x0c').next().unwrap_or_default().to_string();
            (meaningful_chars(&page) >= MIN_TEXT_CHARS).then_some(page)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "pdf-extract failed; may be scanned or corrupted");
            None
        }
        Err(_) => {
            warn!("pdf-extract panicked; treating page 1 as having no text");
            None
        }
    }
}

fn meaningful_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

/// A page with XObject images but no Font resources is a scan.
fn page_is_image_only(doc: &Document, page_id: ObjectId) -> bool {
    let Ok(page_dict) = doc.get_dictionary(page_id) else {
        return false;
    };

    let resources = page_dict
        .get(b"Resources")
        .ok()
        .and_then(|r| doc.dereference(r).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok());

    let non_empty = |key: &[u8]| {
        resources
            .and_then(|res| res.get(key).ok())
            .and_then(|o| doc.dereference(o).ok())
            .and_then(|(_, resolved)| resolved.as_dict().ok())
            .is_some_and(|d| !d.is_empty())
    };

    non_empty(b"XObject") && !non_empty(b"Font")
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{Dictionary, Object, Stream, dictionary};

    fn text_ops(text: &str) -> Vec<Operation> {
        vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![50.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ]
    }

    fn one_page_pdf(
        resources: impl FnOnce(&mut Document) -> Dictionary,
        operations: Vec<Operation>,
    ) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let resources = resources(&mut doc);
        let resources_id = doc.add_object(resources);
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn courier_pdf(text: &str) -> Vec<u8> {
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        };
        one_page_pdf(
            |_| dictionary! { "Font" => dictionary! { "F1" => font } },
            text_ops(text),
        )
    }

    #[test]
    fn test_garbage_bytes() {
        assert!(matches!(
            preview(b"this is not a pdf"),
            Err(PreviewError::Parse(_))
        ));
    }

    #[test]
    fn test_text_page_extracted() {
        let pdf = courier_pdf("INVOICE 4411 Store 101 total due 250.00 USD net 30");
        let preview = preview(&pdf).unwrap();
        assert_eq!(preview.pages, 1);
        match preview.first_page {
            PageOne::Text(text) => assert!(text.contains("INVOICE"), "got {text:?}"),
            PageOne::ScannedImage => panic!("expected text on page 1"),
        }
    }

    #[test]
    fn test_image_only_page_is_scanned() {
        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 1,
                "Height" => 1,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![0],
        );
        let pdf = one_page_pdf(
            |doc| {
                let image_id = doc.add_object(image);
                dictionary! { "XObject" => dictionary! { "Im1" => image_id } }
            },
            vec![
                Operation::new("q", vec![]),
                Operation::new("Do", vec!["Im1".into()]),
                Operation::new("Q", vec![]),
            ],
        );
        let preview = preview(&pdf).unwrap();
        assert_eq!(preview.first_page, PageOne::ScannedImage);
    }

    #[test]
    fn test_broken_font_does_not_abort_preview() {
        // No Subtype or BaseFont: the fallback extractor cannot build a font.
        let pdf = one_page_pdf(
            |_| dictionary! { "Font" => dictionary! { "F1" => dictionary! { "Type" => "Font" } } },
            text_ops("hi"),
        );
        let preview = preview(&pdf).unwrap();
        assert_eq!(preview.pages, 1);
        assert_eq!(preview.first_page, PageOne::ScannedImage);
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("März", 2), "Mä…");
        assert_eq!(truncate("ab", 5), "ab");
    }
}
