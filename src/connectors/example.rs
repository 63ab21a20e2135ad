//! Example connector implementation
//!
//! A stub connector that produces a fixed set of documents. Useful for local runs against the
//! in-memory index and as a reference for implementing real connectors.

use std::sync::Arc;

use async_trait::async_trait;

use crate::connectors::{
    Connector, ConnectorError, DEFAULT_STREAM_CAPACITY, DocumentStream, Registry,
};
use crate::domain::{ConfigurableField, ConnectorState, Document};

pub const EXAMPLE_SERVICE_TYPE: &str = "example";

const DEFAULT_DOCUMENT_COUNT: usize = 10;

/// Example stub connector
#[derive(Debug, Clone)]
pub struct ExampleConnector {
    document_count: usize,
}

impl ExampleConnector {
    pub fn new() -> Self {
        Self {
            document_count: DEFAULT_DOCUMENT_COUNT,
        }
    }

    /// Builds the connector from a stored record; `document_count` in the configuration
    /// overrides how many documents are produced.
    pub fn from_state(state: &ConnectorState) -> Result<Self, ConnectorError> {
        let document_count = match state.config_value("document_count") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConnectorError::ConfigurationError {
                    details: format!("document_count must be a non-negative integer, got '{raw}'"),
                })?,
            None => DEFAULT_DOCUMENT_COUNT,
        };
        Ok(Self { document_count })
    }

    fn document(i: usize) -> Document {
        Document::new(
            i.to_string(),
            format!("Example Document {i}"),
            format!("This is the content of example document {i}."),
            format!("https://example.com/{i}"),
        )
    }
}

impl Default for ExampleConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for ExampleConnector {
    fn service_type(&self) -> &str {
        EXAMPLE_SERVICE_TYPE
    }

    fn display_name(&self) -> &str {
        "Example Connector"
    }

    fn configurable_fields(&self) -> Vec<ConfigurableField> {
        vec![ConfigurableField::new("Example Field", "foo").with_default("bar")]
    }

    async fn health_check(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn produce_documents(&self) -> Result<DocumentStream, ConnectorError> {
        let (sink, stream) = DocumentStream::channel(DEFAULT_STREAM_CAPACITY);
        let count = self.document_count;

        tokio::spawn(async move {
            for i in 1..=count {
                if sink.send(Self::document(i)).await.is_err() {
                    tracing::debug!(produced = i - 1, "Document stream closed early");
                    break;
                }
            }
        });

        Ok(stream)
    }
}

/// Register the example connector with the given registry
pub fn register_example_connector(registry: &mut Registry) {
    registry.register(EXAMPLE_SERVICE_TYPE, |state: &ConnectorState| {
        let connector: Arc<dyn Connector> = Arc::new(ExampleConnector::from_state(state)?);
        Ok(connector)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produces_ten_documents_by_default() {
        let connector = ExampleConnector::new();
        let mut stream = connector.produce_documents().await.unwrap();

        let mut ids = Vec::new();
        while let Some(item) = stream.next().await {
            ids.push(item.unwrap().id);
        }

        assert_eq!(ids.len(), 10);
        assert_eq!(ids.first().map(String::as_str), Some("1"));
        assert_eq!(ids.last().map(String::as_str), Some("10"));
    }

    #[test]
    fn declares_one_field_with_default() {
        let fields = ExampleConnector::new().configurable_fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "foo");
        assert_eq!(fields[0].default_value.as_deref(), Some("bar"));
    }

    #[test]
    fn document_count_comes_from_configuration() {
        let mut state = ConnectorState::new("c", "n", "i");
        state.configuration.insert(
            "document_count".to_string(),
            crate::domain::ConfigurationItem {
                label: "Documents".to_string(),
                value: Some("3".to_string()),
            },
        );
        assert_eq!(ExampleConnector::from_state(&state).unwrap().document_count, 3);

        state
            .configuration
            .get_mut("document_count")
            .unwrap()
            .value = Some("many".to_string());
        assert!(ExampleConnector::from_state(&state).is_err());
    }

    #[test]
    fn registers_under_example_service_type() {
        let mut registry = Registry::new();
        register_example_connector(&mut registry);
        assert!(registry.contains(EXAMPLE_SERVICE_TYPE));
    }
}
