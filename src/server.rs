//! gRPC server for the Hemmer provider protocol.
//!
//! [`ProviderService`] is the seam the provider implements with plain Rust
//! types; [`serve`] wraps it in the generated tonic service, prints the
//! handshake line and runs until SIGTERM or SIGINT.
//!
//! Every handler answers with a response rather than a gRPC status: provider
//! failures travel back as error diagnostics so the host can show them next to
//! the resource they belong to.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::field::Empty;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProviderError;
use crate::generated as proto;
use crate::schema::{Block, BlockNestingMode, Diagnostic, DiagnosticSeverity, ProviderSchema, Schema};
use crate::types::{ImportedResource, PlanResult, ProviderMetadata, HANDSHAKE_PREFIX, PROTOCOL_VERSION};

/// Operations a provider exposes to the host.
///
/// States and configurations are JSON values. A `read` that finds the
/// resource gone returns [`serde_json::Value::Null`] so the host drops it.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    /// Schemas for provider configuration, resources and data sources.
    fn schema(&self) -> ProviderSchema;

    /// Type names and capabilities. Derived from the schema by default.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        let mut resources: Vec<String> = schema.resources.into_keys().collect();
        let mut data_sources: Vec<String> = schema.data_sources.into_keys().collect();
        resources.sort();
        data_sources.sort();
        ProviderMetadata {
            resources,
            data_sources,
            capabilities: Default::default(),
        }
    }

    /// Check provider configuration without applying it.
    async fn validate_provider_config(
        &self,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Apply provider configuration.
    async fn configure(&self, config: serde_json::Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Release whatever `configure` set up.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Check a resource configuration.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Bring a state written by an older schema version up to date.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Plan a create (`prior_state` is `None`), update, or delete
    /// (`proposed_state` is null).
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<serde_json::Value>,
        proposed_state: serde_json::Value,
        config: serde_json::Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a resource from its planned state.
    async fn create(
        &self,
        resource_type: &str,
        planned_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Refresh a resource. Null means it no longer exists.
    async fn read(
        &self,
        resource_type: &str,
        current_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Update a resource in place.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: serde_json::Value,
        planned_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Delete a resource.
    async fn delete(
        &self,
        resource_type: &str,
        current_state: serde_json::Value,
    ) -> Result<(), ProviderError>;

    /// Bring an existing remote object under management.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = id;
        Err(ProviderError::InvalidRequest(format!(
            "import is not supported for {}",
            resource_type
        )))
    }

    /// Check a data source configuration.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (data_source_type, config);
        Ok(vec![])
    }

    /// Read a data source.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let _ = config;
        Err(ProviderError::UnknownDataSource(data_source_type.to_string()))
    }
}

/// Decode a JSON payload. An empty payload is null.
fn decode(bytes: &[u8]) -> Result<serde_json::Value, ProviderError> {
    if bytes.is_empty() {
        return Ok(serde_json::Value::Null);
    }
    Ok(serde_json::from_slice(bytes)?)
}

fn encode(value: &serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

fn diagnostics_to_proto(diagnostics: Vec<Diagnostic>) -> Vec<proto::Diagnostic> {
    diagnostics
        .into_iter()
        .map(|d| proto::Diagnostic {
            severity: match d.severity {
                DiagnosticSeverity::Error => proto::diagnostic::Severity::Error as i32,
                DiagnosticSeverity::Warning => proto::diagnostic::Severity::Warning as i32,
            },
            summary: d.summary,
            detail: d.detail.unwrap_or_default(),
            attribute: d.attribute.unwrap_or_default(),
        })
        .collect()
}

fn error_to_proto(err: &ProviderError) -> Vec<proto::Diagnostic> {
    diagnostics_to_proto(vec![err.to_diagnostic()])
}

/// Turn a validation outcome into response diagnostics, logging either way.
fn validation_response(
    operation: &'static str,
    type_name: &str,
    result: Result<Vec<Diagnostic>, ProviderError>,
) -> Vec<proto::Diagnostic> {
    match result {
        Ok(diagnostics) => {
            let errors = diagnostics.iter().filter(|d| d.is_error()).count();
            if errors > 0 {
                warn!(operation, type_name, errors, "Validation reported errors");
            } else {
                debug!(operation, type_name, "Validation passed");
            }
            diagnostics_to_proto(diagnostics)
        },
        Err(e) => {
            error!(operation, type_name, error = %e, "Validation failed");
            error_to_proto(&e)
        },
    }
}

fn schema_to_proto(schema: &Schema) -> proto::Schema {
    proto::Schema {
        version: schema.version as i64,
        block: Some(block_to_proto(&schema.block)),
    }
}

fn block_to_proto(block: &Block) -> proto::Block {
    let mut attributes: Vec<_> = block.attributes.iter().collect();
    attributes.sort_by(|a, b| a.0.cmp(b.0));
    let mut blocks: Vec<_> = block.blocks.iter().collect();
    blocks.sort_by(|a, b| a.0.cmp(b.0));

    proto::Block {
        attributes: attributes
            .into_iter()
            .map(|(name, attr)| proto::Attribute {
                name: name.clone(),
                r#type: serde_json::to_vec(&attr.attr_type).unwrap_or_default(),
                required: attr.flags.required,
                optional: attr.flags.optional,
                computed: attr.flags.computed,
                sensitive: attr.flags.sensitive,
                description: attr.description.clone().unwrap_or_default(),
                force_new: attr.force_new,
                default_value: attr.default.as_ref().map(encode).unwrap_or_default(),
            })
            .collect(),
        block_types: blocks
            .into_iter()
            .map(|(name, nested)| proto::NestedBlock {
                type_name: name.clone(),
                block: Some(block_to_proto(&nested.block)),
                nesting_mode: match nested.nesting_mode {
                    BlockNestingMode::Single => proto::nested_block::NestingMode::Single as i32,
                    BlockNestingMode::List => proto::nested_block::NestingMode::List as i32,
                },
                min_items: nested.min_items as i32,
                max_items: nested.max_items as i32,
            })
            .collect(),
        description: block.description.clone().unwrap_or_default(),
    }
}

/// Adapter from [`ProviderService`] to the generated service trait.
struct ProviderGrpcService<P: ProviderService> {
    provider: Arc<P>,
}

#[tonic::async_trait]
impl<P: ProviderService> proto::provider_server::Provider for ProviderGrpcService<P> {
    #[instrument(skip_all, name = "grpc.get_metadata")]
    async fn get_metadata(
        &self,
        _request: Request<proto::GetMetadataRequest>,
    ) -> Result<Response<proto::GetMetadataResponse>, Status> {
        let metadata = self.provider.metadata();
        debug!(
            resources = metadata.resources.len(),
            data_sources = metadata.data_sources.len(),
            "GetMetadata"
        );
        Ok(Response::new(proto::GetMetadataResponse {
            server_capabilities: Some(proto::ServerCapabilities {
                plan_destroy: metadata.capabilities.plan_destroy,
            }),
            resources: metadata.resources,
            data_sources: metadata.data_sources,
            diagnostics: vec![],
        }))
    }

    #[instrument(skip_all, name = "grpc.get_schema")]
    async fn get_schema(
        &self,
        _request: Request<proto::GetSchemaRequest>,
    ) -> Result<Response<proto::GetSchemaResponse>, Status> {
        let schema = self.provider.schema();
        debug!(
            resources = schema.resources.len(),
            data_sources = schema.data_sources.len(),
            "GetSchema"
        );
        Ok(Response::new(proto::GetSchemaResponse {
            provider: Some(schema_to_proto(&schema.provider)),
            resources: schema
                .resources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            data_sources: schema
                .data_sources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            diagnostics: vec![],
        }))
    }

    #[instrument(skip_all, name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: Request<proto::ValidateProviderConfigRequest>,
    ) -> Result<Response<proto::ValidateProviderConfigResponse>, Status> {
        let req = request.into_inner();
        let result = match decode(&req.config) {
            Ok(config) => self.provider.validate_provider_config(config).await,
            Err(e) => Err(e),
        };
        Ok(Response::new(proto::ValidateProviderConfigResponse {
            diagnostics: validation_response("ValidateProviderConfig", "provider", result),
        }))
    }

    #[instrument(skip_all, name = "grpc.configure")]
    async fn configure(
        &self,
        request: Request<proto::ConfigureRequest>,
    ) -> Result<Response<proto::ConfigureResponse>, Status> {
        let req = request.into_inner();
        let result = match decode(&req.config) {
            Ok(config) => self.provider.configure(config).await,
            Err(e) => Err(e),
        };
        let diagnostics = match result {
            Ok(diagnostics) => {
                if diagnostics.iter().any(Diagnostic::is_error) {
                    warn!(diagnostics = diagnostics.len(), "Configure rejected");
                } else {
                    info!("Configure completed");
                }
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(error = %e, "Configure failed");
                error_to_proto(&e)
            },
        };
        Ok(Response::new(proto::ConfigureResponse { diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.stop")]
    async fn stop(
        &self,
        _request: Request<proto::StopRequest>,
    ) -> Result<Response<proto::StopResponse>, Status> {
        let error = match self.provider.stop().await {
            Ok(()) => {
                info!("Stop completed");
                String::new()
            },
            Err(e) => {
                error!(error = %e, "Stop failed");
                e.to_string()
            },
        };
        Ok(Response::new(proto::StopResponse { error }))
    }

    #[instrument(skip_all, name = "grpc.validate_resource_config", fields(resource_type = Empty))]
    async fn validate_resource_config(
        &self,
        request: Request<proto::ValidateResourceConfigRequest>,
    ) -> Result<Response<proto::ValidateResourceConfigResponse>, Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = match decode(&req.config) {
            Ok(config) => {
                self.provider
                    .validate_resource_config(&req.resource_type, config)
                    .await
            },
            Err(e) => Err(e),
        };
        Ok(Response::new(proto::ValidateResourceConfigResponse {
            diagnostics: validation_response("ValidateResourceConfig", &req.resource_type, result),
        }))
    }

    #[instrument(skip_all, name = "grpc.upgrade_resource_state", fields(resource_type = Empty))]
    async fn upgrade_resource_state(
        &self,
        request: Request<proto::UpgradeResourceStateRequest>,
    ) -> Result<Response<proto::UpgradeResourceStateResponse>, Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = match decode(&req.raw_state) {
            Ok(state) => {
                self.provider
                    .upgrade_resource_state(&req.resource_type, req.version, state)
                    .await
            },
            Err(e) => Err(e),
        };
        let response = match result {
            Ok(upgraded) => {
                debug!(from_version = req.version, "UpgradeResourceState completed");
                proto::UpgradeResourceStateResponse {
                    upgraded_state: encode(&upgraded),
                    diagnostics: vec![],
                }
            },
            Err(e) => {
                error!(version = req.version, error = %e, "UpgradeResourceState failed");
                proto::UpgradeResourceStateResponse {
                    upgraded_state: vec![],
                    diagnostics: error_to_proto(&e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.plan", fields(resource_type = Empty))]
    async fn plan(
        &self,
        request: Request<proto::PlanRequest>,
    ) -> Result<Response<proto::PlanResponse>, Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());

        let decoded = (|| {
            let prior = if req.prior_state.is_empty() {
                None
            } else {
                Some(decode(&req.prior_state)?)
            };
            Ok::<_, ProviderError>((prior, decode(&req.proposed_state)?, decode(&req.config)?))
        })();
        let result = match decoded {
            Ok((prior, proposed, config)) => {
                debug!(is_create = prior.is_none(), "Planning");
                self.provider
                    .plan(&req.resource_type, prior, proposed, config)
                    .await
            },
            Err(e) => Err(e),
        };

        let response = match result {
            Ok(plan) => {
                info!(
                    changes = plan.changes.len(),
                    requires_replace = plan.requires_replace,
                    "Plan completed"
                );
                proto::PlanResponse {
                    planned_state: encode(&plan.planned_state),
                    changes: plan.changes.into_iter().map(Into::into).collect(),
                    requires_replace: plan.requires_replace,
                    diagnostics: vec![],
                }
            },
            Err(e) => {
                error!(error = %e, "Plan failed");
                proto::PlanResponse {
                    planned_state: vec![],
                    changes: vec![],
                    requires_replace: false,
                    diagnostics: error_to_proto(&e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.create", fields(resource_type = Empty))]
    async fn create(
        &self,
        request: Request<proto::CreateRequest>,
    ) -> Result<Response<proto::CreateResponse>, Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        info!("Create called");
        let result = match decode(&req.planned_state) {
            Ok(planned) => self.provider.create(&req.resource_type, planned).await,
            Err(e) => Err(e),
        };
        let response = match result {
            Ok(state) => {
                info!("Create completed");
                proto::CreateResponse {
                    state: encode(&state),
                    diagnostics: vec![],
                }
            },
            Err(e) => {
                error!(error = %e, "Create failed");
                proto::CreateResponse {
                    state: vec![],
                    diagnostics: error_to_proto(&e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.read", fields(resource_type = Empty))]
    async fn read(
        &self,
        request: Request<proto::ReadRequest>,
    ) -> Result<Response<proto::ReadResponse>, Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = match decode(&req.current_state) {
            Ok(current) => self.provider.read(&req.resource_type, current).await,
            Err(e) => Err(e),
        };
        let response = match result {
            Ok(state) => {
                debug!(absent = state.is_null(), "Read completed");
                proto::ReadResponse {
                    state: encode(&state),
                    diagnostics: vec![],
                }
            },
            Err(e) => {
                error!(error = %e, "Read failed");
                proto::ReadResponse {
                    state: vec![],
                    diagnostics: error_to_proto(&e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.update", fields(resource_type = Empty))]
    async fn update(
        &self,
        request: Request<proto::UpdateRequest>,
    ) -> Result<Response<proto::UpdateResponse>, Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        info!("Update called");
        let result = match (decode(&req.prior_state), decode(&req.planned_state)) {
            (Ok(prior), Ok(planned)) => {
                self.provider
                    .update(&req.resource_type, prior, planned)
                    .await
            },
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        let response = match result {
            Ok(state) => {
                info!("Update completed");
                proto::UpdateResponse {
                    state: encode(&state),
                    diagnostics: vec![],
                }
            },
            Err(e) => {
                error!(error = %e, "Update failed");
                proto::UpdateResponse {
                    state: vec![],
                    diagnostics: error_to_proto(&e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.delete", fields(resource_type = Empty))]
    async fn delete(
        &self,
        request: Request<proto::DeleteRequest>,
    ) -> Result<Response<proto::DeleteResponse>, Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        info!("Delete called");
        let result = match decode(&req.current_state) {
            Ok(current) => self.provider.delete(&req.resource_type, current).await,
            Err(e) => Err(e),
        };
        let diagnostics = match result {
            Ok(()) => {
                info!("Delete completed");
                vec![]
            },
            Err(e) => {
                error!(error = %e, "Delete failed");
                error_to_proto(&e)
            },
        };
        Ok(Response::new(proto::DeleteResponse { diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.import_resource_state", fields(resource_type = Empty, id = Empty))]
    async fn import_resource_state(
        &self,
        request: Request<proto::ImportResourceStateRequest>,
    ) -> Result<Response<proto::ImportResourceStateResponse>, Status> {
        let req = request.into_inner();
        let span = tracing::Span::current();
        span.record("resource_type", req.resource_type.as_str());
        span.record("id", req.id.as_str());
        info!("ImportResourceState called");

        let response = match self
            .provider
            .import_resource(&req.resource_type, &req.id)
            .await
        {
            Ok(imported) => {
                info!(imported = imported.len(), "ImportResourceState completed");
                proto::ImportResourceStateResponse {
                    imported: imported.into_iter().map(Into::into).collect(),
                    diagnostics: vec![],
                }
            },
            Err(e) => {
                error!(error = %e, "ImportResourceState failed");
                proto::ImportResourceStateResponse {
                    imported: vec![],
                    diagnostics: error_to_proto(&e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.validate_data_source_config", fields(data_source_type = Empty))]
    async fn validate_data_source_config(
        &self,
        request: Request<proto::ValidateDataSourceConfigRequest>,
    ) -> Result<Response<proto::ValidateDataSourceConfigResponse>, Status> {
        let req = request.into_inner();
        tracing::Span::current().record("data_source_type", req.data_source_type.as_str());
        let result = match decode(&req.config) {
            Ok(config) => {
                self.provider
                    .validate_data_source_config(&req.data_source_type, config)
                    .await
            },
            Err(e) => Err(e),
        };
        Ok(Response::new(proto::ValidateDataSourceConfigResponse {
            diagnostics: validation_response(
                "ValidateDataSourceConfig",
                &req.data_source_type,
                result,
            ),
        }))
    }

    #[instrument(skip_all, name = "grpc.read_data_source", fields(data_source_type = Empty))]
    async fn read_data_source(
        &self,
        request: Request<proto::ReadDataSourceRequest>,
    ) -> Result<Response<proto::ReadDataSourceResponse>, Status> {
        let req = request.into_inner();
        tracing::Span::current().record("data_source_type", req.data_source_type.as_str());
        let result = match decode(&req.config) {
            Ok(config) => {
                self.provider
                    .read_data_source(&req.data_source_type, config)
                    .await
            },
            Err(e) => Err(e),
        };
        let response = match result {
            Ok(state) => {
                debug!("ReadDataSource completed");
                proto::ReadDataSourceResponse {
                    state: encode(&state),
                    diagnostics: vec![],
                }
            },
            Err(e) => {
                error!(error = %e, "ReadDataSource failed");
                proto::ReadDataSourceResponse {
                    state: vec![],
                    diagnostics: error_to_proto(&e),
                }
            },
        };
        Ok(Response::new(response))
    }
}

/// Options for [`serve_with_options`].
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// How long to wait for in-flight requests after a shutdown signal.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServeOptions {
    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Resolve on SIGTERM or SIGINT (CTRL+C elsewhere).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "Cannot install signal handlers, running until killed");
                    return std::future::pending::<()>().await;
                },
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for CTRL+C, running until killed");
            std::future::pending::<()>().await;
        }
        info!("Received CTRL+C, shutting down");
    }
}

/// Serve `provider` on an ephemeral localhost port.
///
/// Prints `HEMMER_PROVIDER|<version>|<address>` to stdout once listening.
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), Box<dyn std::error::Error>> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// [`serve`] with explicit options.
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    serve_on_listener(provider, listener, addr, options).await
}

/// The handshake line announcing `addr` to the host.
pub fn handshake_line(addr: SocketAddr) -> String {
    format!("{}|{}|{}", HANDSHAKE_PREFIX, PROTOCOL_VERSION, addr)
}

async fn serve_on_listener<P: ProviderService>(
    provider: P,
    listener: TcpListener,
    addr: SocketAddr,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", handshake_line(addr));
    info!(address = %addr, "Provider server starting");

    let provider = Arc::new(provider);
    let service = ProviderGrpcService {
        provider: Arc::clone(&provider),
    };

    let server = Server::builder()
        .add_service(proto::provider_server::ProviderServer::new(service))
        .serve_with_incoming_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(listener),
            wait_for_shutdown_signal(),
        );

    match tokio::time::timeout(options.shutdown_timeout, server).await {
        Ok(Ok(())) => info!("Server shutdown complete"),
        Ok(Err(e)) => {
            error!(error = %e, "Server error");
            return Err(e.into());
        },
        Err(_) => warn!(
            timeout = ?options.shutdown_timeout,
            "Shutdown timeout exceeded, forcing shutdown"
        ),
    }

    if let Err(e) = provider.stop().await {
        warn!(error = %e, "Provider stop returned an error");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::EventGridProvider;
    use crate::system_topic::RESOURCE_TYPE;
    use crate::testing::InMemorySystemTopics;
    use proto::provider_server::Provider;
    use serde_json::json;

    fn service() -> (Arc<InMemorySystemTopics>, ProviderGrpcService<EventGridProvider>) {
        let api = Arc::new(InMemorySystemTopics::new("sub1"));
        let provider = EventGridProvider::with_api(api.clone(), "sub1");
        (
            api,
            ProviderGrpcService {
                provider: Arc::new(provider),
            },
        )
    }

    fn bytes(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_handshake_line() {
        let addr: SocketAddr = "127.0.0.1:50051".parse().unwrap();
        assert_eq!(handshake_line(addr), "HEMMER_PROVIDER|1|127.0.0.1:50051");
    }

    #[test]
    fn test_generated_protocol_layout() {
        use prost::Message;
        use tonic::server::NamedService;

        assert_eq!(
            <proto::provider_server::ProviderServer<ProviderGrpcService<EventGridProvider>> as NamedService>::NAME,
            "hemmer.provider.v1.Provider"
        );

        let response = proto::ReadResponse {
            state: b"null".to_vec(),
            diagnostics: vec![],
        };
        assert_eq!(response.encode_to_vec(), b"\x0a\x04null");

        let request = proto::ReadRequest::decode(&b"\x0a\x03abc\x12\x02{}"[..]).unwrap();
        assert_eq!(request.resource_type, "abc");
        assert_eq!(request.current_state, b"{}");
    }

    #[test]
    fn test_serve_options() {
        assert_eq!(ServeOptions::default().shutdown_timeout, Duration::from_secs(30));
        let options = ServeOptions::default().with_shutdown_timeout(Duration::from_secs(5));
        assert_eq!(options.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_decode() {
        assert_eq!(decode(b"").unwrap(), serde_json::Value::Null);
        assert_eq!(decode(b"null").unwrap(), serde_json::Value::Null);
        assert_eq!(decode(br#"{"a":1}"#).unwrap(), json!({"a": 1}));
        assert!(matches!(decode(b"{"), Err(ProviderError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_get_schema_is_sorted() {
        let (_, service) = service();
        let response = service
            .get_schema(Request::new(proto::GetSchemaRequest {}))
            .await
            .unwrap()
            .into_inner();

        let schema = &response.resources[RESOURCE_TYPE];
        let block = schema.block.as_ref().unwrap();
        let names: Vec<&str> = block.attributes.iter().map(|a| a.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(block
            .block_types
            .iter()
            .any(|b| b.type_name == "identity"
                && b.nesting_mode == proto::nested_block::NestingMode::List as i32
                && b.max_items == 1));
        assert!(response.data_sources.contains_key(RESOURCE_TYPE));
    }

    #[tokio::test]
    async fn test_get_metadata() {
        let (_, service) = service();
        let response = service
            .get_metadata(Request::new(proto::GetMetadataRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.resources, vec![RESOURCE_TYPE.to_string()]);
        assert!(response.server_capabilities.unwrap().plan_destroy);
    }

    #[tokio::test]
    async fn test_read_absent_is_null_state() {
        let (_, service) = service();
        let state = json!({
            "id": "/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.EventGrid/systemTopics/gone",
            "name": "gone",
            "resource_group_name": "rg1"
        });
        let response = service
            .read(Request::new(proto::ReadRequest {
                resource_type: RESOURCE_TYPE.to_string(),
                current_state: bytes(state),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.diagnostics.is_empty());
        assert_eq!(response.state, b"null");
    }

    #[tokio::test]
    async fn test_errors_become_diagnostics() {
        let (_, service) = service();
        let response = service
            .create(Request::new(proto::CreateRequest {
                resource_type: "azurerm_eventgrid_topic".to_string(),
                planned_state: bytes(json!({})),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.state.is_empty());
        assert_eq!(response.diagnostics.len(), 1);
        assert_eq!(
            response.diagnostics[0].severity,
            proto::diagnostic::Severity::Error as i32
        );
        assert!(response.diagnostics[0].summary.contains("azurerm_eventgrid_topic"));
    }

    #[tokio::test]
    async fn test_plan_and_create_over_grpc() {
        let (api, service) = service();
        let config = json!({
            "name": "topic1",
            "resource_group_name": "rg1",
            "location": "West US",
            "source_arm_resource_id": "/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.Storage/storageAccounts/sa1",
            "topic_type": "Microsoft.Storage.StorageAccounts"
        });
        let plan = service
            .plan(Request::new(proto::PlanRequest {
                resource_type: RESOURCE_TYPE.to_string(),
                prior_state: vec![],
                proposed_state: bytes(config.clone()),
                config: bytes(config),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(plan.diagnostics.is_empty());
        assert!(!plan.requires_replace);
        assert!(plan.changes.iter().any(|c| c.path == "name" && c.before.is_empty()));

        let created = service
            .create(Request::new(proto::CreateRequest {
                resource_type: RESOURCE_TYPE.to_string(),
                planned_state: plan.planned_state,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(created.diagnostics.is_empty(), "{:?}", created.diagnostics);
        let state: serde_json::Value = serde_json::from_slice(&created.state).unwrap();
        assert_eq!(state["location"], "westus");
        assert!(api.contains("rg1", "topic1"));
    }

    #[tokio::test]
    async fn test_validate_resource_config_reports_attribute() {
        let (_, service) = service();
        let response = service
            .validate_resource_config(Request::new(proto::ValidateResourceConfigRequest {
                resource_type: RESOURCE_TYPE.to_string(),
                config: bytes(json!({"name": "topic1"})),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response
            .diagnostics
            .iter()
            .any(|d| d.attribute == "resource_group_name"));
    }

    #[tokio::test]
    async fn test_import_over_grpc() {
        let (api, service) = service();
        api.insert_existing("rg1", "topic1");
        let response = service
            .import_resource_state(Request::new(proto::ImportResourceStateRequest {
                resource_type: RESOURCE_TYPE.to_string(),
                id: "/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.EventGrid/systemTopics/topic1".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.imported.len(), 1);
        assert_eq!(response.imported[0].resource_type, RESOURCE_TYPE);
    }
}
