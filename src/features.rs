//! Heuristic signals pulled out of chunk text and stored as retrieval metadata.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use regex::Regex;

use crate::model::FeatureSet;

pub const INSURANCE_TERMS: &[&str] = &[
    "premium",
    "deductible",
    "coverage",
    "exclusion",
    "claim",
    "policyholder",
    "beneficiary",
    "endorsement",
    "rider",
    "underwriting",
    "actuary",
    "indemnity",
    "subrogation",
    "grace period",
    "contestability",
    "incontestability",
];

const LEGAL_TERMS: &[&str] = &["shall", "must", "required", "obligation"];
const SCORE_LEGAL_TERMS: &[&str] = &["shall", "must", "required", "obligation", "liability"];

#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    amount: Regex,
    percentage: Regex,
    date: Regex,
    policy_reference: Regex,
    digit_run: Regex,
}

impl FeatureExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            amount: Regex::new(r"\$[\d,]+(?:\.\d{2})?")
                .context("failed to compile amount regex")?,
            percentage: Regex::new(r"\d+(?:\.\d+)?%")
                .context("failed to compile percentage regex")?,
            date: Regex::new(r"\d{1,2}[/-]\d{1,2}[/-]\d{2,4}")
                .context("failed to compile date regex")?,
            policy_reference: Regex::new(r"[A-Z]{2,}\d{6,}")
                .context("failed to compile policy reference regex")?,
            digit_run: Regex::new(r"\d+").context("failed to compile digit run regex")?,
        })
    }

    pub fn extract(&self, text: &str) -> FeatureSet {
        let lowered = text.to_lowercase();

        let insurance_terms = INSURANCE_TERMS
            .iter()
            .map(|term| (term.to_string(), lowered.matches(term).count()))
            .collect::<BTreeMap<String, usize>>();

        let word_count = text.split_whitespace().count();
        let sentence_count = text.split('.').count();

        FeatureSet {
            insurance_terms,
            amounts: find_all(&self.amount, text),
            percentages: find_all(&self.percentage, text),
            dates: find_all(&self.date, text),
            policy_references: find_all(&self.policy_reference, text),
            word_count,
            sentence_count,
            avg_sentence_length: word_count as f64 / sentence_count.max(1) as f64,
            has_table_data: text.chars().any(|character| character.is_ascii_digit()),
            has_legal_terms: LEGAL_TERMS.iter().any(|term| lowered.contains(term)),
            semantic_score: self.semantic_score(text, &lowered, word_count),
        }
    }

    /// Term density, not a probability: distinct vocabulary hits plus distinct
    /// legal markers plus 0.1 per digit run, divided by word count and capped
    /// at 1.0. Short, term-heavy passages score highest.
    fn semantic_score(&self, text: &str, lowered: &str, word_count: usize) -> f64 {
        let term_score = INSURANCE_TERMS
            .iter()
            .filter(|term| lowered.contains(*term))
            .count() as f64;
        let legal_boost = SCORE_LEGAL_TERMS
            .iter()
            .filter(|term| lowered.contains(*term))
            .count() as f64;
        let numerical_boost = self.digit_run.find_iter(text).count() as f64 * 0.1;

        let score = (term_score + legal_boost + numerical_boost) / word_count.max(1) as f64;
        score.min(1.0)
    }
}

fn find_all(pattern: &Regex, text: &str) -> Vec<String> {
    pattern
        .find_iter(text)
        .map(|found| found.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new().unwrap()
    }

    #[test]
    fn extracts_amounts_percentages_and_dates() {
        let features =
            extractor().extract("The premium is $1,200.50 due by 01/15/2024 (10% surcharge).");

        assert_eq!(features.amounts, vec!["$1,200.50"]);
        assert_eq!(features.percentages, vec!["10%"]);
        assert_eq!(features.dates, vec!["01/15/2024"]);
        assert_eq!(features.insurance_terms["premium"], 1);
        assert_eq!(features.insurance_terms["claim"], 0);
        assert!(features.has_table_data);
        assert!(!features.has_legal_terms);
    }

    #[test]
    fn policy_references_need_letters_then_six_digits() {
        let features = extractor().extract("See policy HL2024001 and ref AB12345, also X1234567.");
        assert_eq!(features.policy_references, vec!["HL2024001"]);
    }

    #[test]
    fn term_counts_are_case_insensitive_substrings() {
        let features =
            extractor().extract("CLAIM forms: each claimant files a Claim. Grace Period applies.");
        assert_eq!(features.insurance_terms["claim"], 3);
        assert_eq!(features.insurance_terms["grace period"], 1);
    }

    #[test]
    fn sentence_statistics_split_on_periods() {
        let features = extractor().extract("One two three. Four five");
        assert_eq!(features.word_count, 5);
        assert_eq!(features.sentence_count, 2);
        assert!((features.avg_sentence_length - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_text_has_no_signals() {
        let features = extractor().extract("");
        assert_eq!(features.word_count, 0);
        assert_eq!(features.sentence_count, 1);
        assert_eq!(features.avg_sentence_length, 0.0);
        assert_eq!(features.semantic_score, 0.0);
        assert!(!features.has_table_data);
    }

    #[test]
    fn legal_language_is_detected() {
        let features = extractor().extract("The insurer SHALL pay within 30 days.");
        assert!(features.has_legal_terms);
    }

    #[test]
    fn semantic_score_is_density_capped_at_one() {
        let extractor = extractor();

        // premium + deductible + shall + two digit runs = 3.2 over five words
        let dense = extractor.extract("premium deductible shall 12 34");
        assert_eq!(dense.word_count, 5);
        assert!((dense.semantic_score - 3.2 / 5.0).abs() < 1e-9);

        let capped = extractor.extract("premium");
        assert_eq!(capped.semantic_score, 1.0);

        let sparse = extractor.extract("the cat sat on the mat");
        assert_eq!(sparse.semantic_score, 0.0);
    }
}
