use anyhow::{Context, Result};
use regex::Regex;

use crate::model::SectionCategory;

const SECTION_KEYWORDS: &[&str] = &[
    "policy",
    "coverage",
    "exclusions",
    "terms",
    "conditions",
    "premium",
    "deductible",
    "claim",
    "benefits",
    "limitations",
    "definitions",
    "general conditions",
    "special conditions",
    "schedule",
    "endorsement",
    "rider",
    "clause",
    "provision",
];

// First match wins. "claim coverage" is coverage, "excluded from coverage" is
// coverage too, because coverage terms are checked before exclusion terms.
const CATEGORY_CASCADE: &[(SectionCategory, &[&str])] = &[
    (SectionCategory::Coverage, &["coverage", "cover", "insured"]),
    (
        SectionCategory::Exclusion,
        &["exclusion", "excluded", "not covered"],
    ),
    (
        SectionCategory::Definition,
        &["definition", "defined", "means"],
    ),
    (
        SectionCategory::Condition,
        &["condition", "term", "provision"],
    ),
    (SectionCategory::Premium, &["premium", "payment", "cost"]),
    (
        SectionCategory::Claim,
        &["claim", "claimant", "notification"],
    ),
    (SectionCategory::Schedule, &["schedule", "table", "summary"]),
];

/// Header detection and keyword-cascade categorisation of single lines.
#[derive(Debug, Clone)]
pub struct SectionClassifier {
    numbered_section: Regex,
}

impl SectionClassifier {
    pub fn new() -> Result<Self> {
        let numbered_section = Regex::new(r"^\d+\.?\d*\s+[A-Z]")
            .context("failed to compile numbered section regex")?;
        Ok(Self { numbered_section })
    }

    pub fn is_header(&self, line: &str) -> bool {
        if self.numbered_section.is_match(line) {
            return true;
        }

        let length = line.chars().count();
        if length > 3 && length < 100 && is_all_upper(line) {
            return true;
        }

        let lowered = line.to_lowercase();
        SECTION_KEYWORDS
            .iter()
            .any(|keyword| lowered.contains(keyword))
    }

    pub fn classify(&self, line: &str) -> SectionCategory {
        let lowered = line.to_lowercase();
        CATEGORY_CASCADE
            .iter()
            .find(|(_, terms)| terms.iter().any(|term| lowered.contains(term)))
            .map(|(category, _)| *category)
            .unwrap_or(SectionCategory::General)
    }
}

/// At least one cased character and no lower-case ones.
fn is_all_upper(line: &str) -> bool {
    let mut saw_upper = false;
    for character in line.chars() {
        if character.is_lowercase() {
            return false;
        }
        if character.is_uppercase() {
            saw_upper = true;
        }
    }
    saw_upper
}
