//! In-Memory Index
//!
//! Keyword index over a handful of documents. Used when no search service is
//! configured, and in tests.

use async_trait::async_trait;

use super::SearchIndex;
use crate::directory::{DocumentDirectory, FileText};
use crate::error::Result;
use crate::model::SearchHit;

/// Longest excerpt returned per hit, in characters
const EXCERPT_CHARS: usize = 400;

struct Document {
    source: String,
    /// Blank-line separated passages, each kept with its lowercased form
    passages: Vec<(String, String)>,
}

/// Keyword-matching index held in memory
#[derive(Default)]
pub struct MemoryIndex {
    documents: Vec<Document>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document under the given source name
    pub fn add_document(&mut self, source: impl Into<String>, text: &str) {
        let passages = text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| (p.to_string(), p.to_lowercase()))
            .collect();

        self.documents.push(Document {
            source: source.into(),
            passages,
        });
    }

    /// Index every readable text file of a directory
    pub async fn from_directory(directory: &dyn DocumentDirectory) -> Result<Self> {
        let mut index = Self::new();

        for name in directory.list().await? {
            match directory.read(&name).await {
                Ok(FileText::Text(text)) => index.add_document(name, &text),
                Ok(_) => tracing::debug!(file = %name, "Not indexing non-text or oversized file"),
                Err(e) => tracing::warn!(file = %name, error = %e, "Failed to index file"),
            }
        }

        tracing::info!(
            documents = index.len(),
            location = %directory.location(),
            "Built in-memory search index"
        );
        Ok(index)
    }

    /// Number of documents
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

fn excerpt(passage: &str) -> String {
    if passage.chars().count() <= EXCERPT_CHARS {
        return passage.to_string();
    }
    let cut: String = passage.chars().take(EXCERPT_CHARS).collect();
    format!("{cut}...")
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = self
            .documents
            .iter()
            .filter_map(|doc| {
                // best passage of the document
                doc.passages
                    .iter()
                    .map(|(text, lower)| {
                        let matched = terms.iter().filter(|t| lower.contains(t.as_str())).count();
                        (matched, text)
                    })
                    .filter(|(matched, _)| *matched > 0)
                    .max_by_key(|(matched, _)| *matched)
                    .map(|(matched, text)| {
                        let score = matched as f64 / terms.len() as f64;
                        SearchHit::new(doc.source.clone(), score, excerpt(text))
                    })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    fn name(&self) -> &str {
        "MemoryIndex"
    }
}
