//! In-process search index.
//!
//! Keeps documents in a map per index. An index built with [`MemoryIndex::recording`] also logs
//! every write request, which lets tests assert on batch sizes as well as final contents.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{IndexError, SearchIndex};
use crate::domain::Document;

/// A write request received by a [`MemoryIndex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOperation {
    EnsureMapping { index: String },
    Upsert { index: String, count: usize },
    Delete { index: String, count: usize },
}

#[derive(Debug, Default)]
struct Inner {
    indices: HashMap<String, BTreeMap<String, Document>>,
    operations: Vec<IndexOperation>,
}

#[derive(Debug, Default)]
pub struct MemoryIndex {
    inner: Mutex<Inner>,
    record_operations: bool,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// An index that keeps every write request for [`MemoryIndex::operations`]. The log is
    /// never trimmed.
    pub fn recording() -> Self {
        Self {
            record_operations: true,
            ..Self::default()
        }
    }

    /// Stores documents directly, without recording an operation.
    pub fn seed(&self, index: &str, documents: impl IntoIterator<Item = Document>) {
        let mut inner = self.lock();
        let stored = inner.indices.entry(index.to_string()).or_default();
        for document in documents {
            stored.insert(document.id.clone(), document);
        }
    }

    /// Stored documents ordered by id.
    pub fn documents(&self, index: &str) -> Vec<Document> {
        self.lock()
            .indices
            .get(index)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn ids(&self, index: &str) -> Vec<String> {
        self.lock()
            .indices
            .get(index)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Write requests received so far; always empty unless built with [`MemoryIndex::recording`].
    pub fn operations(&self) -> Vec<IndexOperation> {
        self.lock().operations.clone()
    }

    fn record(&self, inner: &mut Inner, operation: IndexOperation) {
        if self.record_operations {
            inner.operations.push(operation);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn ensure_mapping(&self, index: &str) -> Result<(), IndexError> {
        let mut inner = self.lock();
        inner.indices.entry(index.to_string()).or_default();
        self.record(
            &mut inner,
            IndexOperation::EnsureMapping {
                index: index.to_string(),
            },
        );
        Ok(())
    }

    async fn upsert(&self, index: &str, document: &Document) -> Result<(), IndexError> {
        self.bulk_upsert(index, std::slice::from_ref(document)).await
    }

    async fn bulk_upsert(&self, index: &str, documents: &[Document]) -> Result<(), IndexError> {
        if documents.is_empty() {
            return Ok(());
        }
        let mut inner = self.lock();
        let stored = inner.indices.entry(index.to_string()).or_default();
        for document in documents {
            stored.insert(document.id.clone(), document.clone());
        }
        self.record(
            &mut inner,
            IndexOperation::Upsert {
                index: index.to_string(),
                count: documents.len(),
            },
        );
        Ok(())
    }

    async fn delete(&self, index: &str, id: &str) -> Result<(), IndexError> {
        self.bulk_delete(index, &[id.to_string()]).await
    }

    async fn bulk_delete(&self, index: &str, ids: &[String]) -> Result<(), IndexError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut inner = self.lock();
        if let Some(stored) = inner.indices.get_mut(index) {
            for id in ids {
                stored.remove(id);
            }
        }
        self.record(
            &mut inner,
            IndexOperation::Delete {
                index: index.to_string(),
                count: ids.len(),
            },
        );
        Ok(())
    }

    async fn list_all_ids(&self, index: &str) -> Result<HashSet<String>, IndexError> {
        Ok(self
            .lock()
            .indices
            .get(index)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default())
    }
}
