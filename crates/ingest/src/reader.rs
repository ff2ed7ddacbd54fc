use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::chunk::PageLabel;

/// Text of one PDF page.
#[derive(Debug, Clone)]
pub struct PageText {
    pub page: PageLabel,
    pub text: String,
}

pub struct PdfReader;

impl PdfReader {
    /// `.pdf` files directly inside `dir` (no recursion), in name order.
    pub fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to list directory: {:?}", dir))?;
            if entry.file_type().is_file() && is_pdf(entry.path()) {
                files.push(entry.into_path());
            }
        }

        Ok(files)
    }

    /// Extract text page by page. Pages are numbered from 0 in document order.
    ///
    /// When the page-level pass yields nothing (unusual fonts, broken xref),
    /// the whole document is extracted in one piece and labelled `N/A`.
    pub fn read_pages(path: &Path) -> Result<Vec<PageText>> {
        match Self::read_pages_lopdf(path) {
            Ok(pages) if pages.iter().any(|p| !p.text.trim().is_empty()) => return Ok(pages),
            Ok(_) => tracing::warn!(file = %path.display(), "no text layer found per page, trying whole-document extraction"),
            Err(e) => tracing::warn!(file = %path.display(), error = %e, "page extraction failed, trying whole-document extraction"),
        }

        let text = pdf_extract::extract_text(path)
            .map_err(|e| anyhow!("Failed to extract text from {:?}: {}", path, e))?;
        let text = clean_pdf_text(&text);

        if text.trim().is_empty() {
            anyhow::bail!("No text content could be extracted from {:?}", path);
        }

        Ok(vec![PageText {
            page: PageLabel::Unknown,
            text,
        }])
    }

    fn read_pages_lopdf(path: &Path) -> Result<Vec<PageText>> {
        let doc = lopdf::Document::load(path)
            .with_context(|| format!("Failed to load PDF: {:?}", path))?;

        let mut pages = Vec::new();
        // lopdf keys pages from 1
        for page_number in doc.get_pages().keys().copied() {
            match doc.extract_text(&[page_number]) {
                Ok(text) => pages.push(PageText {
                    page: PageLabel::Number(page_number.saturating_sub(1)),
                    text: clean_pdf_text(&text),
                }),
                Err(e) => {
                    tracing::debug!(file = %path.display(), page = page_number, error = %e, "could not extract page text");
                }
            }
        }

        Ok(pages)
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Normalise characters PDF text layers commonly carry.
fn clean_pdf_text(text: &str) -> String {
    text.replace('\0', "")
        .replace('\u{00A0}', " ") // Non-breaking space
        .replace('\u{2010}', "-") // Hyphen
        .replace('\u{2011}', "-") // Non-breaking hyphen
        .replace('\u{2013}', "-") // En dash
        .replace('\u{2212}', "-") // Minus sign
        .replace('\u{2018}', "'")
        .replace('\u{2019}', "'")
        .replace('\u{201C}', "\"")
        .replace('\u{201D}', "\"")
        .replace('\u{FB01}', "fi")
        .replace('\u{FB02}', "fl")
        .replace('\u{FB00}', "ff")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_pdfs_is_non_recursive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"%PDF-1.5").unwrap();
        std::fs::write(dir.path().join("a.PDF"), b"%PDF-1.5").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("c.pdf"), b"%PDF-1.5").unwrap();

        let files = PdfReader::list_pdfs(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.PDF", "b.pdf"]);
    }

    #[test]
    fn test_clean_pdf_text() {
        assert_eq!(clean_pdf_text("1\u{00A0}234\0 \u{FB01}eld"), "1 234 field");
    }
}
