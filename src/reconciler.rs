//! Document Reconciler
//!
//! Makes a content index mirror what a connector currently produces: every streamed document is
//! upserted in bounded batches, then ids that were in the index before the pass but were not
//! produced during it are deleted.

use std::collections::HashSet;
use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::connectors::{ConnectorError, DocumentStream};
use crate::domain::Document;
use crate::index::{IndexError, SearchIndex};
use crate::telemetry::{DOCUMENTS_DELETED_TOTAL, DOCUMENTS_INDEXED_TOTAL};

/// Counts for a finished reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Distinct document ids written during the pass.
    pub indexed: u64,
    pub deleted: u64,
}

#[derive(Debug, Error)]
pub enum ReconcileCause {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

/// A pass that stopped early. Counts cover the writes that succeeded before the failure.
#[derive(Debug, Error)]
#[error("{cause}")]
pub struct ReconcileError {
    pub indexed: u64,
    pub deleted: u64,
    #[source]
    pub cause: ReconcileCause,
}

impl ReconcileError {
    /// A failure before any document was written.
    pub fn new(cause: impl Into<ReconcileCause>) -> Self {
        Self {
            indexed: 0,
            deleted: 0,
            cause: cause.into(),
        }
    }
}

pub struct DocumentReconciler {
    index: Arc<dyn SearchIndex>,
    batch_size: usize,
}

/// Bookkeeping for one pass.
#[derive(Default)]
struct Pass {
    buffer: Vec<Document>,
    indexed_ids: HashSet<String>,
    deleted: u64,
}

impl Pass {
    fn fail(&self, cause: impl Into<ReconcileCause>) -> ReconcileError {
        ReconcileError {
            indexed: self.indexed_ids.len() as u64,
            deleted: self.deleted,
            cause: cause.into(),
        }
    }
}

impl DocumentReconciler {
    pub fn new(index: Arc<dyn SearchIndex>, batch_size: usize) -> Self {
        Self {
            index,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Index every document from `documents` into `index_name` and remove the ids it no longer
    /// contains.
    ///
    /// A stream error or a failed index call stops the pass before the deletion phase, so a
    /// partial listing never removes documents.
    #[instrument(skip(self, documents), fields(batch_size = self.batch_size))]
    pub async fn reconcile(
        &self,
        connector_id: &str,
        index_name: &str,
        mut documents: DocumentStream,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let mut pass = Pass::default();

        self.index
            .ensure_mapping(index_name)
            .await
            .map_err(|e| pass.fail(e))?;

        let existing = self
            .index
            .list_all_ids(index_name)
            .await
            .map_err(|e| pass.fail(e))?;
        debug!(existing = existing.len(), "Loaded existing document ids");

        while let Some(item) = documents.next().await {
            match item {
                Ok(document) => {
                    pass.buffer.push(document);
                    if pass.buffer.len() >= self.batch_size {
                        self.flush(index_name, &mut pass)
                            .await
                            .map_err(|e| pass.fail(e))?;
                    }
                }
                Err(err) => {
                    // Documents received before the failure are still current.
                    if let Err(flush_err) = self.flush(index_name, &mut pass).await {
                        warn!(error = %flush_err, "Failed to flush buffered documents after stream error");
                    }
                    return Err(pass.fail(err));
                }
            }
        }

        self.flush(index_name, &mut pass)
            .await
            .map_err(|e| pass.fail(e))?;

        let mut stale: Vec<String> = existing
            .into_iter()
            .filter(|id| !pass.indexed_ids.contains(id))
            .collect();
        stale.sort();

        for chunk in stale.chunks(self.batch_size) {
            self.index
                .bulk_delete(index_name, chunk)
                .await
                .map_err(|e| pass.fail(e))?;
            pass.deleted += chunk.len() as u64;
            counter!(DOCUMENTS_DELETED_TOTAL).increment(chunk.len() as u64);
        }

        let outcome = ReconcileOutcome {
            indexed: pass.indexed_ids.len() as u64,
            deleted: pass.deleted,
        };
        info!(
            indexed = outcome.indexed,
            deleted = outcome.deleted,
            "Reconciled index with connector documents"
        );
        Ok(outcome)
    }

    async fn flush(&self, index_name: &str, pass: &mut Pass) -> Result<(), IndexError> {
        if pass.buffer.is_empty() {
            return Ok(());
        }

        self.index.bulk_upsert(index_name, &pass.buffer).await?;

        let written = pass.buffer.len() as u64;
        pass.indexed_ids
            .extend(pass.buffer.drain(..).map(|document| document.id));
        counter!(DOCUMENTS_INDEXED_TOTAL).increment(written);
        debug!(written, total = pass.indexed_ids.len(), "Flushed document batch");
        Ok(())
    }
}
