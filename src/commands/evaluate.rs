use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cli::EvaluateArgs;
use crate::commands::open_store;
use crate::config::manifest_dir;
use crate::model::RetrievalResult;
use crate::retrieval::RetrievalFacade;
use crate::semantic::LocalHashEmbedder;
use crate::store::MetadataFilter;
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationCase {
    pub query: String,
    #[serde(default)]
    pub expected_sections: Vec<String>,
    #[serde(default)]
    pub expected_keywords: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetrievalMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

#[derive(Debug, Clone, Serialize)]
struct CaseEvaluation {
    query: String,
    category: Option<String>,
    #[serde(flatten)]
    metrics: RetrievalMetrics,
    results_count: usize,
    relevant_count: usize,
    top_score: f64,
}

#[derive(Debug, Clone, Serialize)]
struct EvaluationSummary {
    total_queries: usize,
    average_precision: f64,
    average_recall: f64,
    average_f1: f64,
    min_precision: f64,
    max_precision: f64,
    min_recall: f64,
    max_recall: f64,
    min_f1: f64,
    max_f1: f64,
}

#[derive(Debug, Clone, Serialize)]
struct EvaluationReport {
    summary: EvaluationSummary,
    top_k: usize,
    model_id: String,
    detailed_results: Vec<CaseEvaluation>,
    timestamp: String,
}

pub fn run(args: EvaluateArgs) -> Result<()> {
    let cases = load_cases(&args.cases)?;
    let opened = open_store(&args.cache_root, args.db_path.as_ref(), &args.model_id)?;
    let model_id = opened.model.model_id.clone();
    let facade = RetrievalFacade::new(
        Arc::new(LocalHashEmbedder::new(opened.model)),
        Arc::new(opened.store),
    );

    let unfiltered = MetadataFilter::new();
    let mut detailed_results = Vec::with_capacity(cases.len());
    for (index, case) in cases.iter().enumerate() {
        info!(
            case = index + 1,
            total = cases.len(),
            query = %case.query,
            "evaluating query"
        );

        let results = facade
            .query(&case.query, args.top_k, &unfiltered)
            .with_context(|| format!("retrieval failed for query: {}", case.query))?;
        let relevant_count = count_relevant(&results, case);

        detailed_results.push(CaseEvaluation {
            query: case.query.clone(),
            category: case.category.clone(),
            metrics: score_case(relevant_count, results.len(), case),
            results_count: results.len(),
            relevant_count,
            top_score: results
                .first()
                .map(|result| result.similarity_score)
                .unwrap_or(0.0),
        });
    }

    let report = EvaluationReport {
        summary: summarize(&detailed_results),
        top_k: args.top_k,
        model_id,
        detailed_results,
        timestamp: now_utc_string(),
    };

    let report_path = args.report_path.clone().unwrap_or_else(|| {
        manifest_dir(&args.cache_root).join(format!(
            "evaluation_report_{}.json",
            utc_compact_string(Utc::now())
        ))
    });
    write_json_pretty(&report_path, &report)?;

    info!(path = %report_path.display(), "wrote evaluation report");
    info!(
        total_queries = report.summary.total_queries,
        average_precision = report.summary.average_precision,
        average_recall = report.summary.average_recall,
        average_f1 = report.summary.average_f1,
        "evaluation completed"
    );

    Ok(())
}

fn load_cases(path: &Path) -> Result<Vec<EvaluationCase>> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let cases: Vec<EvaluationCase> = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    if cases.is_empty() {
        bail!("no evaluation cases in {}", path.display());
    }
    Ok(cases)
}

/// A result is relevant when its section is expected or its content contains
/// any expected keyword (case-insensitive).
fn count_relevant(results: &[RetrievalResult], case: &EvaluationCase) -> usize {
    let keywords = case
        .expected_keywords
        .iter()
        .map(|keyword| keyword.to_lowercase())
        .collect::<Vec<String>>();

    results
        .iter()
        .filter(|result| {
            let section = result.metadata_str("section_type");
            let content = result.content.to_lowercase();
            case.expected_sections
                .iter()
                .any(|expected| expected == section)
                || keywords.iter().any(|keyword| content.contains(keyword))
        })
        .count()
}

/// Recall is measured against the number of expectations, not the number of
/// relevant chunks in the corpus.
fn score_case(relevant: usize, returned: usize, case: &EvaluationCase) -> RetrievalMetrics {
    if returned == 0 {
        return RetrievalMetrics {
            precision: 0.0,
            recall: 0.0,
            f1_score: 0.0,
        };
    }

    let expectations = case.expected_sections.len() + case.expected_keywords.len();
    let precision = relevant as f64 / returned as f64;
    let recall = relevant as f64 / expectations.max(1) as f64;
    let f1_score = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    RetrievalMetrics {
        precision,
        recall,
        f1_score,
    }
}

fn summarize(cases: &[CaseEvaluation]) -> EvaluationSummary {
    let column = |pick: fn(&RetrievalMetrics) -> f64| {
        cases
            .iter()
            .map(|case| pick(&case.metrics))
            .collect::<Vec<f64>>()
    };
    let precisions = column(|metrics| metrics.precision);
    let recalls = column(|metrics| metrics.recall);
    let f1_scores = column(|metrics| metrics.f1_score);

    EvaluationSummary {
        total_queries: cases.len(),
        average_precision: mean(&precisions),
        average_recall: mean(&recalls),
        average_f1: mean(&f1_scores),
        min_precision: min(&precisions),
        max_precision: max(&precisions),
        min_recall: min(&recalls),
        max_recall: max(&recalls),
        min_f1: min(&f1_scores),
        max_f1: max(&f1_scores),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn min(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::min).unwrap_or(0.0)
}

fn max(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::max).unwrap_or(0.0)
}
