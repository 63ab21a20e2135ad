//! Connectors module
//!
//! - The `Connector` trait every data source implements
//! - The bounded `DocumentStream` connectors feed documents through
//! - The service-type registry used to build a connector for a stored record
//! - The bundled example connector

pub mod example;
pub mod registry;
pub mod trait_;

pub use example::{EXAMPLE_SERVICE_TYPE, ExampleConnector, register_example_connector};
pub use registry::{ConnectorFactory, Registry, RegistryError};
pub use trait_::{Connector, ConnectorError, DEFAULT_STREAM_CAPACITY, DocumentSink, DocumentStream};
