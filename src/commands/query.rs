use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::cli::QueryArgs;
use crate::commands::open_store;
use crate::model::RetrievalResult;
use crate::retrieval::RetrievalFacade;
use crate::semantic::LocalHashEmbedder;
use crate::store::{MetadataFilter, parse_filters};

const PREVIEW_CHARS: usize = 300;

#[derive(Debug, Serialize)]
struct QueryResponse<'a> {
    question: &'a str,
    top_k: usize,
    returned: usize,
    filter: &'a MetadataFilter,
    results: &'a [RetrievalResult],
}

pub fn run(args: QueryArgs) -> Result<()> {
    let filter = parse_filters(&args.filters)?;
    let opened = open_store(&args.cache_root, args.db_path.as_ref(), &args.model_id)?;
    let facade = RetrievalFacade::new(
        Arc::new(LocalHashEmbedder::new(opened.model)),
        Arc::new(opened.store),
    );

    let results = facade
        .query(&args.question, args.top_k, &filter)
        .context("retrieval failed")?;

    info!(
        top_k = args.top_k,
        returned = results.len(),
        filters = filter.len(),
        "query completed"
    );

    if args.json {
        write_json_response(&args.question, args.top_k, &filter, &results)
    } else {
        write_text_response(&args.question, &results)
    }
}

fn write_json_response(
    question: &str,
    top_k: usize,
    filter: &MetadataFilter,
    results: &[RetrievalResult],
) -> Result<()> {
    let response = QueryResponse {
        question,
        top_k,
        returned: results.len(),
        filter,
        results,
    };

    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, &response)
        .context("failed to serialize query json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

fn write_text_response(question: &str, results: &[RetrievalResult]) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(output, "Query: {question}")?;
    if results.is_empty() {
        writeln!(output, "No relevant results found.")?;
        output.flush()?;
        return Ok(());
    }
    writeln!(output, "Results: {}", results.len())?;

    for result in results {
        writeln!(
            output,
            "{}.\t{}\t{}\t{}\tsimilarity={:.3}",
            result.rank,
            result.metadata_str("source_file"),
            result.metadata_str("section_type"),
            result.metadata_str("chunk_type"),
            result.similarity_score
        )?;

        let terms = present_terms(&result.metadata);
        if !terms.is_empty() {
            writeln!(output, "\tterms: {terms}")?;
        }
        writeln!(output, "\t{}", preview(&result.content, PREVIEW_CHARS))?;
    }

    output.flush()?;
    Ok(())
}

/// `term=count` pairs for vocabulary terms that occur in the chunk.
fn present_terms(metadata: &Map<String, Value>) -> String {
    metadata
        .get("insurance_terms")
        .and_then(Value::as_object)
        .map(|terms| {
            terms
                .iter()
                .filter_map(|(term, count)| {
                    count
                        .as_u64()
                        .filter(|count| *count > 0)
                        .map(|count| format!("{term}={count}"))
                })
                .collect::<Vec<String>>()
                .join(", ")
        })
        .unwrap_or_default()
}

fn preview(content: &str, max_chars: usize) -> String {
    let flattened = content.split_whitespace().collect::<Vec<&str>>().join(" ");
    if flattened.chars().count() <= max_chars {
        return flattened;
    }
    let truncated = flattened.chars().take(max_chars).collect::<String>();
    format!("{truncated}...")
}
