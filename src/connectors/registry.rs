//! Connector registry
//!
//! Maps a service type to a factory that builds a connector for a given connector record.
//! Populated once at process start.

use std::collections::HashMap;
use std::sync::Arc;

use crate::connectors::{Connector, ConnectorError};
use crate::domain::ConnectorState;

/// Builds a connector instance from the stored connector record.
pub type ConnectorFactory =
    Arc<dyn Fn(&ConnectorState) -> Result<Arc<dyn Connector>, ConnectorError> + Send + Sync>;

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Connector service type '{name}' not found")]
    ServiceTypeNotFound { name: String },
    #[error("Connector [{connector_id}] has no service type")]
    MissingServiceType { connector_id: String },
    #[error("Failed to build connector '{service_type}': {source}")]
    Construction {
        service_type: String,
        #[source]
        source: ConnectorError,
    },
}

#[derive(Clone, Default)]
pub struct Registry {
    factories: HashMap<String, ConnectorFactory>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every connector that ships with this crate.
    pub fn with_builtin_connectors() -> Self {
        let mut registry = Self::new();
        crate::connectors::example::register_example_connector(&mut registry);
        registry
    }

    /// Register a factory, replacing any previous one for the same service type
    pub fn register<F>(&mut self, service_type: impl Into<String>, factory: F)
    where
        F: Fn(&ConnectorState) -> Result<Arc<dyn Connector>, ConnectorError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(service_type.into(), Arc::new(factory));
    }

    pub fn contains(&self, service_type: &str) -> bool {
        self.factories.contains_key(service_type)
    }

    /// Registered service types, sorted for stable output
    pub fn service_types(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build a connector of `service_type` for `state`
    pub fn get(
        &self,
        service_type: &str,
        state: &ConnectorState,
    ) -> Result<Arc<dyn Connector>, RegistryError> {
        let factory =
            self.factories
                .get(service_type)
                .ok_or_else(|| RegistryError::ServiceTypeNotFound {
                    name: service_type.to_string(),
                })?;

        factory(state).map_err(|source| RegistryError::Construction {
            service_type: service_type.to_string(),
            source,
        })
    }

    /// Build the connector selected by the record's own service type
    pub fn create(&self, state: &ConnectorState) -> Result<Arc<dyn Connector>, RegistryError> {
        let service_type =
            state
                .service_type
                .as_deref()
                .ok_or_else(|| RegistryError::MissingServiceType {
                    connector_id: state.id.clone(),
                })?;
        self.get(service_type, state)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("service_types", &self.service_types())
            .finish()
    }
}
