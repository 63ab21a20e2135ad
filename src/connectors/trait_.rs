//! Connector trait definition
//!
//! Defines the interface every data-source connector implements, plus the bounded document
//! stream connectors use to hand documents to the reconciler.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{ConfigurableField, Document};

/// Default number of documents buffered between a producer and the reconciler.
pub const DEFAULT_STREAM_CAPACITY: usize = 100;

/// Connector-specific error types for structured error handling
#[derive(Debug, Clone)]
pub enum ConnectorError {
    /// HTTP error from the upstream data source
    HttpError { status: u16, body: Option<String> },
    /// Network or connectivity error
    NetworkError { details: String, retryable: bool },
    /// Authentication/authorization error
    AuthenticationError { details: String },
    /// Configuration or setup error
    ConfigurationError { details: String },
    /// Health check failed
    HealthCheckFailed {
        display_name: String,
        details: String,
    },
    /// The consumer of a document stream went away
    StreamClosed,
    /// Unknown error
    Unknown { details: String },
}

impl ConnectorError {
    pub fn health_check_failed(display_name: &str, cause: impl std::fmt::Display) -> Self {
        ConnectorError::HealthCheckFailed {
            display_name: display_name.to_string(),
            details: cause.to_string(),
        }
    }
}

impl std::fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectorError::HttpError { status, body } => {
                write!(
                    f,
                    "HTTP error {}: {}",
                    status,
                    body.as_deref().unwrap_or("No body")
                )
            }
            ConnectorError::NetworkError { details, .. } => {
                write!(f, "Network error: {}", details)
            }
            ConnectorError::AuthenticationError { details } => {
                write!(f, "Authentication error: {}", details)
            }
            ConnectorError::ConfigurationError { details } => {
                write!(f, "Configuration error: {}", details)
            }
            ConnectorError::HealthCheckFailed {
                display_name,
                details,
            } => {
                write!(
                    f,
                    "Health check failed for connector {}: {}",
                    display_name, details
                )
            }
            ConnectorError::StreamClosed => write!(f, "Document stream closed by consumer"),
            ConnectorError::Unknown { details } => {
                write!(f, "Unknown error: {}", details)
            }
        }
    }
}

impl std::error::Error for ConnectorError {}

/// Receiving half of a bounded document channel.
///
/// Producers block once `capacity` documents are waiting, so a slow index slows the data
/// source down instead of growing memory.
#[derive(Debug)]
pub struct DocumentStream {
    rx: mpsc::Receiver<Result<Document, ConnectorError>>,
}

/// Sending half of a [`DocumentStream`].
#[derive(Debug, Clone)]
pub struct DocumentSink {
    tx: mpsc::Sender<Result<Document, ConnectorError>>,
}

impl DocumentStream {
    pub fn channel(capacity: usize) -> (DocumentSink, DocumentStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (DocumentSink { tx }, DocumentStream { rx })
    }

    /// A stream over documents that are already in memory.
    pub fn from_documents(documents: Vec<Document>) -> Self {
        let (tx, rx) = mpsc::channel(documents.len().max(1));
        for document in documents {
            // Capacity matches the document count, so this never fails.
            let _ = tx.try_send(Ok(document));
        }
        DocumentStream { rx }
    }

    /// Next document, or `None` once every sink has been dropped.
    pub async fn next(&mut self) -> Option<Result<Document, ConnectorError>> {
        self.rx.recv().await
    }
}

impl DocumentSink {
    /// Sends a document, waiting for buffer space.
    pub async fn send(&self, document: Document) -> Result<(), ConnectorError> {
        self.tx
            .send(Ok(document))
            .await
            .map_err(|_| ConnectorError::StreamClosed)
    }

    /// Reports a production failure; the reconciler stops at this item.
    pub async fn fail(&self, error: ConnectorError) -> Result<(), ConnectorError> {
        self.tx
            .send(Err(error))
            .await
            .map_err(|_| ConnectorError::StreamClosed)
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Registry key this connector is registered under.
    fn service_type(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Configuration fields persisted when the connector is first configured.
    fn configurable_fields(&self) -> Vec<ConfigurableField>;

    /// Verify the data source is reachable.
    async fn health_check(&self) -> Result<(), ConnectorError>;

    /// Start producing every document currently in the data source.
    ///
    /// Implementations typically spawn a producer task that writes into
    /// [`DocumentStream::channel`] and return the receiving half immediately.
    async fn produce_documents(&self) -> Result<DocumentStream, ConnectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn from_documents_yields_in_order_then_ends() {
        let mut stream = DocumentStream::from_documents(vec![
            Document::new("1", "one", "", "https://example.com/1"),
            Document::new("2", "two", "", "https://example.com/2"),
        ]);

        assert_eq!(stream.next().await.unwrap().unwrap().id, "1");
        assert_eq!(stream.next().await.unwrap().unwrap().id, "2");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn empty_stream_ends_immediately() {
        let mut stream = DocumentStream::from_documents(Vec::new());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn sink_reports_closed_stream() {
        let (sink, stream) = DocumentStream::channel(1);
        drop(stream);
        let err = sink
            .send(Document::new("1", "one", "", "https://example.com/1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::StreamClosed));
    }

    #[test]
    fn health_check_message_names_the_connector() {
        let err = ConnectorError::health_check_failed("Example Connector", "timed out");
        assert_eq!(
            err.to_string(),
            "Health check failed for connector Example Connector: timed out"
        );
    }
}
