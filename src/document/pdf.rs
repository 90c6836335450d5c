//! PDF text extraction.

use crate::error::{PodError, Result};
use tracing::{debug, warn};

/// Extract text from PDF bytes, one blank-line separated block per page.
///
/// Pages that fail to decode are skipped with a warning; a document that yields
/// no text at all is an extraction failure.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| PodError::Extraction(format!("Failed to parse PDF: {}", e)))?;

    let mut pages: Vec<u32> = doc.get_pages().keys().cloned().collect();
    pages.sort();

    let mut page_texts = Vec::with_capacity(pages.len());
    for page_num in &pages {
        match doc.extract_text(&[*page_num]) {
            Ok(text) => {
                let cleaned = clean_page_text(&text);
                if !cleaned.is_empty() {
                    page_texts.push(cleaned);
                }
            }
            Err(e) => warn!("Skipping page {}: {}", page_num, e),
        }
    }

    if page_texts.is_empty() {
        return Err(PodError::Extraction(
            "No text content extracted from PDF".to_string(),
        ));
    }

    debug!("Extracted text from {} of {} pages", page_texts.len(), pages.len());
    Ok(page_texts.join("\n\n"))
}

/// Strip NUL bytes and trailing whitespace on each line.
fn clean_page_text(text: &str) -> String {
    text.replace('\0', "")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Document, Object, Stream};

    fn create_pdf(page_texts: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.4");

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut page_ids = Vec::new();
        for text in page_texts {
            let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", text);
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => resources_id,
                "Contents" => content_id,
            });
            page_ids.push(page_id);
        }

        let kids: Vec<Object> = page_ids.iter().map(|&id| id.into()).collect();
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(page_texts.len() as i64),
        });
        for page_id in &page_ids {
            if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(*page_id) {
                dict.set("Parent", pages_id);
            }
        }

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    #[test]
    fn test_pages_become_blocks() {
        let bytes = create_pdf(&["First page text", "Second page text"]);
        let text = extract_pdf_text(&bytes).unwrap();

        assert!(text.contains("First page text"));
        assert!(text.contains("Second page text"));
        assert!(text.contains("\n\n"));
    }

    #[test]
    fn test_invalid_pdf() {
        let result = extract_pdf_text(b"not a pdf");
        assert!(matches!(result, Err(PodError::Extraction(_))));
    }

    #[test]
    fn test_clean_page_text() {
        assert_eq!(clean_page_text("a\0b  \nc \n"), "ab\nc");
    }
}
