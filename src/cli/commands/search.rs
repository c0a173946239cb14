//! Search command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use crate::vector_store::MetadataFilter;
use anyhow::Result;

/// Run the search command.
pub async fn run_search(
    query: &str,
    external_id: Option<&str>,
    limit: usize,
    settings: &Settings,
) -> Result<()> {
    preflight::check(Operation::Search)?;

    let orchestrator = Orchestrator::new(settings)?;
    let filter = match external_id {
        Some(id) => MetadataFilter::external_id(id),
        None => MetadataFilter::new(),
    };

    let spinner = Output::spinner("Searching...");
    let results = orchestrator.search(query, limit, &filter).await;
    spinner.finish_and_clear();

    match results {
        Ok(hits) => {
            if hits.is_empty() {
                Output::warning("No results found matching your query.");
            } else {
                Output::success(&format!("Found {} results", hits.len()));
                for hit in &hits {
                    Output::search_result(hit);
                }
            }
        }
        Err(e) => {
            Output::error(&format!("Search failed: {}", e));
            return Err(e.into());
        }
    }

    Ok(())
}
