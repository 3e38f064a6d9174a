//! Text-layer extraction: PDF pages to classified lines and tables.

mod normalize;
mod tables;

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::classify::SectionClassifier;
use crate::error::ExtractionError;
use crate::model::{ExtractedLine, ExtractedTable};
use crate::semantic::normalize_whitespace;

pub use normalize::NormalizationStats;
pub use tables::{TableExtractor, table_extractor_for};

#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    pub lines: Vec<ExtractedLine>,
    pub tables: Vec<ExtractedTable>,
    pub page_count: usize,
    pub normalization: NormalizationStats,
}

/// Source of classified lines and tables for one document.
pub trait DocumentExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractionError>;
}

/// Shells out to poppler's `pdftotext -layout`, which keeps column alignment
/// for table detection.
pub struct PdftotextExtractor {
    classifier: SectionClassifier,
    table_extractor: Box<dyn TableExtractor>,
    max_pages: Option<usize>,
}

impl PdftotextExtractor {
    pub fn new(
        classifier: SectionClassifier,
        table_extractor: Box<dyn TableExtractor>,
        max_pages: Option<usize>,
    ) -> Self {
        Self {
            classifier,
            table_extractor,
            max_pages,
        }
    }
}

impl DocumentExtractor for PdftotextExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractionError> {
        if !path.exists() {
            return Err(ExtractionError::MissingDocument(path.to_path_buf()));
        }

        let pages = run_pdftotext(path, self.max_pages)?;
        Ok(extract_from_pages(
            pages,
            &self.classifier,
            self.table_extractor.as_ref(),
        ))
    }
}

/// Normalises raw page text, then emits classified lines in page/line order
/// and the tables found by `table_extractor`.
pub fn extract_from_pages(
    mut pages: Vec<String>,
    classifier: &SectionClassifier,
    table_extractor: &dyn TableExtractor,
) -> ExtractedDocument {
    let mut stats = NormalizationStats::default();
    normalize::remove_repeated_edge_lines(&mut pages, &mut stats);

    let tables = table_extractor.extract(&pages);

    let mut lines = Vec::<ExtractedLine>::new();
    for (page_index, page) in pages.iter().enumerate() {
        let numbered = page
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, normalize_whitespace(line)))
            .filter(|(_, text)| !text.is_empty())
            .collect::<Vec<(usize, String)>>();

        for (line_number, text) in normalize::merge_hyphenated_lines(numbered, &mut stats) {
            lines.push(ExtractedLine {
                page: page_index + 1,
                line: line_number,
                is_header: classifier.is_header(&text),
                section: classifier.classify(&text),
                text,
            });
        }
    }

    ExtractedDocument {
        lines,
        tables,
        page_count: pages.len(),
        normalization: stats,
    }
}

fn run_pdftotext(
    pdf_path: &Path,
    max_pages: Option<usize>,
) -> Result<Vec<String>, ExtractionError> {
    let mut command = Command::new("pdftotext");
    command
        .arg("-layout")
        .arg("-enc")
        .arg("UTF-8")
        .arg("-f")
        .arg("1");
    if let Some(max_pages) = max_pages {
        command.arg("-l").arg(max_pages.to_string());
    }
    command.arg(pdf_path).arg("-");

    let output = command.output().map_err(|source| ExtractionError::Spawn {
        path: PathBuf::from(pdf_path),
        source,
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExtractionError::ToolFailed {
            path: PathBuf::from(pdf_path),
            stderr: stderr.trim().to_string(),
        });
    }

    let raw = String::from_utf8_lossy(&output.stdout);
    Ok(split_pages(&raw))
}

/// pdftotext separates pages with form feeds and ends with a trailing one.
fn split_pages(raw: &str) -> Vec<String> {
    let mut pages: Vec<String> = raw
        .split('\u{000C}')
        .map(|chunk| chunk.replace('\u{0000}', ""))
        .collect();

    while pages.last().is_some_and(|page| page.trim().is_empty()) {
        pages.pop();
    }

    pages
}

#[cfg(test)]
mod tests {
    use super::tables::{DelimitedTableExtractor, LayoutTableExtractor};
    use super::*;
    use crate::model::SectionCategory;

    #[test]
    fn split_pages_drops_trailing_empty_pages() {
        let pages = split_pages("page one\u{000C}page two\u{000C}\n\u{000C}");
        assert_eq!(pages, vec!["page one", "page two"]);
    }

    #[test]
    fn lines_are_numbered_per_page_and_classified() {
        let classifier = SectionClassifier::new().unwrap();
        let layout = LayoutTableExtractor::new().unwrap();
        let pages = vec![
            "1. Coverage   Details\n\nRoom charges are paid.".to_string(),
            "EXCLUSIONS\nCosmetic treat-\nment is not paid.".to_string(),
        ];

        let document = extract_from_pages(pages, &classifier, &layout);

        assert_eq!(document.page_count, 2);
        assert_eq!(document.lines.len(), 4);

        let first = &document.lines[0];
        assert_eq!((first.page, first.line), (1, 1));
        assert_eq!(first.text, "1. Coverage Details");
        assert!(first.is_header);
        assert_eq!(first.section, SectionCategory::Coverage);

        assert_eq!((document.lines[1].page, document.lines[1].line), (1, 3));

        let merged = &document.lines[3];
        assert_eq!((merged.page, merged.line), (2, 2));
        assert_eq!(merged.text, "Cosmetic treatment is not paid.");
        assert_eq!(document.normalization.dehyphenation_merges, 1);
    }

    #[test]
    fn missing_pdf_is_an_extraction_error() {
        let extractor = PdftotextExtractor::new(
            SectionClassifier::new().unwrap(),
            Box::new(DelimitedTableExtractor),
            None,
        );
        let err = extractor
            .extract(Path::new("/nonexistent/policy.pdf"))
            .unwrap_err();
        assert!(matches!(err, ExtractionError::MissingDocument(_)));
    }
}
