//! Table detection over text-layer pages. Each strategy reports the method
//! name stored with its table chunks; `MultiTableExtractor` stacks strategies
//! for the higher-fidelity tier.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use regex::Regex;

use crate::cli::TableExtractionMode;
use crate::model::ExtractedTable;
use crate::semantic::normalize_whitespace;

/// A table needs a header row plus at least one data row.
const MIN_TABLE_ROWS: usize = 2;
const MIN_TABLE_COLUMNS: usize = 2;

pub trait TableExtractor: Send + Sync {
    fn method(&self) -> &str;

    /// `pages[0]` is page 1. `table_index` restarts at 0 on every page.
    fn extract(&self, pages: &[String]) -> Vec<ExtractedTable>;
}

pub fn table_extractor_for(mode: TableExtractionMode) -> Result<Box<dyn TableExtractor>> {
    let layout = Box::new(LayoutTableExtractor::new()?);
    match mode {
        TableExtractionMode::Simple => Ok(layout),
        TableExtractionMode::Full => Ok(Box::new(MultiTableExtractor::new(vec![
            layout,
            Box::new(DelimitedTableExtractor),
        ]))),
    }
}

/// Column-aligned blocks from `pdftotext -layout`: consecutive lines that split
/// into several cells on tabs or runs of two or more spaces.
#[derive(Debug, Clone)]
pub struct LayoutTableExtractor {
    cell_split: Regex,
}

impl LayoutTableExtractor {
    pub fn new() -> Result<Self> {
        let cell_split =
            Regex::new(r"\t+|\s{2,}").context("failed to compile table cell split regex")?;
        Ok(Self { cell_split })
    }

    fn split_cells(&self, line: &str) -> Option<Vec<String>> {
        let cells = self
            .cell_split
            .split(line.trim())
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(ToOwned::to_owned)
            .collect::<Vec<String>>();
        (cells.len() >= MIN_TABLE_COLUMNS).then_some(cells)
    }
}

impl TableExtractor for LayoutTableExtractor {
    fn method(&self) -> &str {
        "layout"
    }

    fn extract(&self, pages: &[String]) -> Vec<ExtractedTable> {
        let mut tables = Vec::new();
        for (page_index, page) in pages.iter().enumerate() {
            let runs = collect_runs(page, |line| self.split_cells(line), |_| false);
            for (table_index, rows) in runs.into_iter().enumerate() {
                let confidence = column_consistency(&rows);
                tables.push(ExtractedTable {
                    page: page_index + 1,
                    table_index,
                    rows,
                    method: self.method().to_string(),
                    confidence: Some(confidence),
                });
            }
        }
        tables
    }
}

/// Pipe-delimited grids (`a | b | c`). Rule lines such as `|---|---|` are
/// skipped without ending the table.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimitedTableExtractor;

impl DelimitedTableExtractor {
    fn split_cells(line: &str) -> Option<Vec<String>> {
        let trimmed = line.trim();
        if !trimmed.contains('|') {
            return None;
        }

        let mut cells = trimmed
            .split('|')
            .map(|cell| cell.trim().to_string())
            .collect::<Vec<String>>();
        if cells.first().is_some_and(String::is_empty) {
            cells.remove(0);
        }
        if cells.last().is_some_and(String::is_empty) {
            cells.pop();
        }

        let filled = cells.iter().filter(|cell| !cell.is_empty()).count();
        (filled >= MIN_TABLE_COLUMNS).then_some(cells)
    }

    fn is_rule_line(line: &str) -> bool {
        let trimmed = line.trim();
        !trimmed.is_empty()
            && trimmed.contains('-')
            && trimmed
                .chars()
                .all(|character| matches!(character, '-' | '+' | '|' | ':' | '=' | ' '))
    }
}

impl TableExtractor for DelimitedTableExtractor {
    fn method(&self) -> &str {
        "delimited"
    }

    fn extract(&self, pages: &[String]) -> Vec<ExtractedTable> {
        let mut tables = Vec::new();
        for (page_index, page) in pages.iter().enumerate() {
            let runs = collect_runs(page, Self::split_cells, Self::is_rule_line);
            for (table_index, rows) in runs.into_iter().enumerate() {
                tables.push(ExtractedTable {
                    page: page_index + 1,
                    table_index,
                    rows,
                    method: self.method().to_string(),
                    confidence: Some(1.0),
                });
            }
        }
        tables
    }
}

/// Runs every strategy in order and keeps the first copy of tables that more
/// than one strategy finds.
pub struct MultiTableExtractor {
    strategies: Vec<Box<dyn TableExtractor>>,
}

impl MultiTableExtractor {
    pub fn new(strategies: Vec<Box<dyn TableExtractor>>) -> Self {
        Self { strategies }
    }
}

impl TableExtractor for MultiTableExtractor {
    fn method(&self) -> &str {
        "multi"
    }

    fn extract(&self, pages: &[String]) -> Vec<ExtractedTable> {
        let mut seen = HashSet::<String>::new();
        let mut tables = Vec::new();

        for strategy in &self.strategies {
            for table in strategy.extract(pages) {
                let key = normalize_whitespace(&table.flattened_text()).to_lowercase();
                if seen.insert(key) {
                    tables.push(table);
                }
            }
        }

        tables
    }
}

fn collect_runs(
    page: &str,
    split_row: impl Fn(&str) -> Option<Vec<String>>,
    skip_line: impl Fn(&str) -> bool,
) -> Vec<Vec<Vec<String>>> {
    let mut runs = Vec::new();
    let mut current = Vec::<Vec<String>>::new();

    for line in page.lines() {
        if skip_line(line) {
            continue;
        }
        match split_row(line) {
            Some(cells) => current.push(cells),
            None => {
                if current.len() >= MIN_TABLE_ROWS {
                    runs.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
            }
        }
    }

    if current.len() >= MIN_TABLE_ROWS {
        runs.push(current);
    }
    runs
}

/// Share of rows whose cell count equals the most common cell count.
fn column_consistency(rows: &[Vec<String>]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }

    let mut counts = HashMap::<usize, usize>::new();
    for row in rows {
        *counts.entry(row.len()).or_insert(0) += 1;
    }
    let modal = counts.values().copied().max().unwrap_or(0);
    modal as f64 / rows.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT_PAGE: &str = "\
SCHEDULE OF BENEFITS
Benefit            Limit          Waiting period
Hospital room      $5,000         30 days
Day care           $2,000         none

Premiums are payable monthly.";

    #[test]
    fn layout_extractor_finds_aligned_blocks() {
        let extractor = LayoutTableExtractor::new().unwrap();
        let tables = extractor.extract(&[String::new(), LAYOUT_PAGE.to_string()]);

        assert_eq!(tables.len(), 1);
        let table = &tables[0];
        assert_eq!(table.page, 2);
        assert_eq!(table.table_index, 0);
        assert_eq!(table.method, "layout");
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[1], vec!["Hospital room", "$5,000", "30 days"]);
        assert_eq!(table.confidence, Some(1.0));
    }

    #[test]
    fn single_aligned_line_is_not_a_table() {
        let extractor = LayoutTableExtractor::new().unwrap();
        let tables = extractor.extract(&["Name:    John Doe\nPlain text follows.".to_string()]);
        assert!(tables.is_empty());
    }

    #[test]
    fn layout_confidence_drops_with_ragged_rows() {
        let page = "A   B   C\nD   E\nF   G   H\nI   J   K";
        let tables = LayoutTableExtractor::new().unwrap().extract(&[page.to_string()]);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].confidence, Some(0.75));
    }

    #[test]
    fn delimited_extractor_skips_rule_lines() {
        let page = "| Plan | Premium |\n|------|---------|\n| Gold | $120 |\n| Silver | $90 |";
        let tables = DelimitedTableExtractor.extract(&[page.to_string()]);

        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].method, "delimited");
        assert_eq!(
            tables[0].flattened_text(),
            "Plan\tPremium\nGold\t$120\nSilver\t$90"
        );
    }

    #[test]
    fn multi_extractor_keeps_both_methods_without_duplicates() {
        let page = format!(
            "{LAYOUT_PAGE}\n\n| Rider | Cost |\n| Dental | $10 |"
        );
        let pages = vec![page];

        let full = table_extractor_for(TableExtractionMode::Full).unwrap();
        let tables = full.extract(&pages);
        let methods = tables
            .iter()
            .map(|table| table.method.as_str())
            .collect::<Vec<&str>>();
        assert_eq!(methods, vec!["layout", "delimited"]);

        let doubled = MultiTableExtractor::new(vec![
            Box::new(DelimitedTableExtractor),
            Box::new(DelimitedTableExtractor),
        ]);
        assert_eq!(doubled.extract(&pages).len(), 1);
    }
}
