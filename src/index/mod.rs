//! Search index abstraction
//!
//! The reconciler talks to the search index only through [`SearchIndex`]. Two
//! implementations ship with the crate: [`ElasticsearchIndex`] over HTTP and
//! [`MemoryIndex`] for local runs and tests.

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Document;

pub mod elasticsearch;
pub mod memory;

pub use elasticsearch::ElasticsearchIndex;
pub use memory::MemoryIndex;

/// Field mappings applied to content indices that have none.
pub const CONTENT_INDEX_MAPPINGS: &str = include_str!("content_index_mappings.json");

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("search index request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("search index returned HTTP {status} for {operation}: {body}")]
    Http {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("bulk {operation} rejected {failed} item(s) in index '{index}': {first_reason}")]
    BulkRejected {
        operation: &'static str,
        index: String,
        failed: usize,
        first_reason: String,
    },
    #[error("unexpected search index response for {operation}: {details}")]
    UnexpectedResponse {
        operation: &'static str,
        details: String,
    },
    #[error("invalid search index configuration: {0}")]
    Configuration(String),
}

/// Operations the reconciler needs from a search index.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Make sure `index` exists with content field mappings.
    async fn ensure_mapping(&self, index: &str) -> Result<(), IndexError>;

    async fn upsert(&self, index: &str, document: &Document) -> Result<(), IndexError>;

    /// Write all documents in one request. An empty slice is a no-op.
    async fn bulk_upsert(&self, index: &str, documents: &[Document]) -> Result<(), IndexError>;

    async fn delete(&self, index: &str, id: &str) -> Result<(), IndexError>;

    /// Delete all ids in one request. An empty slice is a no-op; missing ids are ignored.
    async fn bulk_delete(&self, index: &str, ids: &[String]) -> Result<(), IndexError>;

    /// Every document id currently stored in `index`. A missing index has no ids.
    async fn list_all_ids(&self, index: &str) -> Result<HashSet<String>, IndexError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_mappings_are_valid_json_with_properties() {
        let mappings: serde_json::Value = serde_json::from_str(CONTENT_INDEX_MAPPINGS).unwrap();
        let properties = mappings["properties"].as_object().unwrap();
        assert!(properties.contains_key("id"));
        assert!(properties.contains_key("content"));
    }
}
