use crate::chunking::normalize_whitespace;
use crate::error::IngestError;
use crate::models::PageText;
use lopdf::Document;
use std::path::Path;

/// Produces the ordered, 1-based pages of one document. Empty pages are
/// elided; a document with no readable text at all is a read error.
pub trait DocumentExtractor: Send + Sync {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl DocumentExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::DocumentRead(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::DocumentRead(format!("page {page_no}: {error}")))?;
            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        finish_pages(pages, path)
    }
}

/// UTF-8 text files; form feeds separate pages.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl DocumentExtractor for PlainTextExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let bytes = std::fs::read(path)?;
        let raw = String::from_utf8(bytes).map_err(|error| {
            IngestError::DocumentRead(format!("{} is not utf-8: {error}", path.display()))
        })?;

        let pages = raw
            .split('\u{000c}')
            .enumerate()
            .map(|(index, text)| PageText {
                number: (index + 1) as u32,
                text: text.to_string(),
            })
            .collect();
        finish_pages(pages, path)
    }
}

fn finish_pages(pages: Vec<PageText>, path: &Path) -> Result<Vec<PageText>, IngestError> {
    let pages = pages
        .into_iter()
        .map(|page| PageText {
            number: page.number,
            text: normalize_whitespace(&page.text),
        })
        .filter(|page| !page.text.is_empty())
        .collect::<Vec<_>>();

    if pages.is_empty() {
        return Err(IngestError::DocumentRead(format!(
            "document had no readable page text: {}",
            path.display()
        )));
    }
    Ok(pages)
}

/// Dispatches on file extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExtractor {
    pdf: LopdfExtractor,
    text: PlainTextExtractor,
}

impl DocumentExtractor for DefaultExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => self.pdf.extract_pages(path),
            "txt" | "text" | "md" => self.text.extract_pages(path),
            other => Err(IngestError::DocumentRead(format!(
                "unsupported document type '{other}': {}",
                path.display()
            ))),
        }
    }
}

pub fn extract_page_texts(path: &Path) -> Result<Vec<PageText>, IngestError> {
    DefaultExtractor::default().extract_pages(path)
}
