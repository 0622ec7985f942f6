//! Search Data Model

use serde::{Deserialize, Serialize};

/// One ranked result from the search index
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Document the excerpt came from
    pub source: String,

    /// Relevance, higher is better
    pub score: f64,

    /// Matching passage
    pub excerpt: String,
}

impl SearchHit {
    pub fn new(source: impl Into<String>, score: f64, excerpt: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            score,
            excerpt: excerpt.into(),
        }
    }
}

/// Payload handed back to the model by `SearchFiles`
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchReport {
    pub query: String,
    pub no_result: bool,
    pub results: Vec<SearchHit>,
}

impl SearchReport {
    pub fn new(query: impl Into<String>, results: Vec<SearchHit>) -> Self {
        Self {
            query: query.into(),
            no_result: results.is_empty(),
            results,
        }
    }
}
