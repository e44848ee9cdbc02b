//! Hemmer provider for Azure Event Grid system topics.
//!
//! Manages `azurerm_eventgrid_system_topic`: a topic that publishes the
//! events of an existing Azure resource (a storage account, a key vault, a
//! resource group, ...). The provider speaks the Hemmer provider protocol over
//! gRPC and talks to Azure Resource Manager over HTTPS.
//!
//! # Layout
//!
//! - [`server`]: the [`ProviderService`] trait and the gRPC server with the
//!   stdout handshake
//! - [`provider`]: [`EventGridProvider`], dispatching host calls by type name
//! - [`system_topic`]: schema, plan, lifecycle and data source of the resource
//! - [`azure`]: ARM client, long-running operation polling, identifiers
//! - [`config`], [`timeouts`]: provider settings and per-operation deadlines
//! - [`schema`], [`validation`]: schema types and the validator driven by them
//! - [`testing`]: an in-memory ARM fake and a harness for driving providers
//!
//! # Handshake
//!
//! On start the binary prints one line to stdout and serves gRPC on it:
//!
//! ```text
//! HEMMER_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! # Example
//!
//! ```ignore
//! use hemmer_provider_azurerm_eventgrid::{init_logging, serve, EventGridProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!     serve(EventGridProvider::new()).await
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod azure;
pub mod config;
pub mod error;
pub mod logging;
pub mod provider;
pub mod schema;
pub mod server;
pub mod system_topic;
pub mod testing;
pub mod timeouts;
pub mod types;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

pub use config::ProviderConfig;
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default};
pub use provider::EventGridProvider;
pub use schema::ProviderSchema;
pub use server::{serve, serve_with_options, ProviderService, ServeOptions};
pub use system_topic::{SystemTopicResource, SystemTopicState, RESOURCE_TYPE};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};
pub use validation::{validate, validate_result};
