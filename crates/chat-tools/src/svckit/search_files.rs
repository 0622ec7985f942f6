//! Search Files Tool
//!
//! Ranked retrieval over the document index.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use chat_core::{ParameterSchema, Result as CoreResult, Tool, ToolCall, ToolResult, ToolSchema};

use super::require_non_blank;
use crate::index::SearchIndex;
use crate::model::SearchReport;

const NAME: &str = "SearchFiles";

/// Most results handed back to the model per search
pub const SEARCH_LIMIT: usize = 5;

#[derive(Deserialize)]
struct Args {
    query: String,
}

/// Tool forwarding a query to the search index
pub struct SearchFilesTool {
    index: Arc<dyn SearchIndex>,
}

impl SearchFilesTool {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: NAME.into(),
            description: "Search for file by its name or part of its content".into(),
            parameters: vec![ParameterSchema::required_string(
                "query",
                "What to look for, in natural language or keywords",
            )],
            category: Some("search".into()),
        }
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let args: Args = call.parse_arguments()?;
        let query = require_non_blank(NAME, "query", &args.query)?;

        let mut hits = match self.index.search(query, SEARCH_LIMIT).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(index = self.index.name(), error = %e, "Search failed");
                return Ok(ToolResult::failure(NAME, format!("Search failed: {e}")));
            }
        };

        // the index may over-deliver; keep the best, ties in index order
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(SEARCH_LIMIT);

        let report = SearchReport::new(query, hits);
        Ok(ToolResult::success(NAME, serde_json::to_string(&report)?))
    }
}
