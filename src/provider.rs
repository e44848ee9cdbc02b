//! The Event Grid provider: host-facing operations dispatched by type name.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::azure::SystemTopicsApi;
use crate::config::{provider_config_schema, ProviderConfig};
use crate::error::ProviderError;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::system_topic::{
    self, data_source_schema, resource_schema, SystemTopicResource, SystemTopicState,
    RESOURCE_TYPE,
};
use crate::types::{ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities};
use crate::validation::validate;

type EnvLookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// A configured connection to Azure.
#[derive(Clone)]
struct Connection {
    api: Arc<dyn SystemTopicsApi>,
    subscription_id: String,
    poll_interval: Duration,
}

/// Provider for `azurerm_eventgrid_system_topic`.
pub struct EventGridProvider {
    connection: RwLock<Option<Connection>>,
    /// Client used instead of building one from configuration.
    injected: Option<(Arc<dyn SystemTopicsApi>, String)>,
    env: Box<EnvLookup>,
}

impl Default for EventGridProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl EventGridProvider {
    /// Create an unconfigured provider reading `ARM_*` variables from the process environment.
    pub fn new() -> Self {
        Self {
            connection: RwLock::new(None),
            injected: None,
            env: Box::new(|key| std::env::var(key).ok()),
        }
    }

    /// Create a provider that talks to `api` instead of Azure.
    ///
    /// The provider is usable immediately; a later `configure` only changes
    /// the poll interval.
    pub fn with_api(api: Arc<dyn SystemTopicsApi>, subscription_id: impl Into<String>) -> Self {
        let subscription_id = subscription_id.into();
        Self {
            connection: RwLock::new(Some(Connection {
                api: api.clone(),
                subscription_id: subscription_id.clone(),
                poll_interval: Duration::from_millis(10),
            })),
            injected: Some((api, subscription_id)),
            env: Box::new(|_| None),
        }
    }

    /// Replace the environment lookup used for configuration fallbacks.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Box::new(lookup);
        self
    }

    fn load_config(&self, config: serde_json::Value) -> Result<ProviderConfig, ProviderError> {
        Ok(ProviderConfig::from_value(config)?.with_env_lookup(|key| (self.env)(key)))
    }

    async fn connection(&self) -> Result<Connection, ProviderError> {
        self.connection.read().await.clone().ok_or_else(|| {
            ProviderError::Configuration("provider has not been configured".to_string())
        })
    }

    async fn resource(&self) -> Result<SystemTopicResource, ProviderError> {
        let connection = self.connection().await?;
        Ok(SystemTopicResource::new(
            connection.api,
            connection.poll_interval,
        ))
    }
}

fn check_resource_type(resource_type: &str) -> Result<(), ProviderError> {
    if resource_type == RESOURCE_TYPE {
        Ok(())
    } else {
        Err(ProviderError::UnknownResource(resource_type.to_string()))
    }
}

fn check_data_source_type(data_source_type: &str) -> Result<(), ProviderError> {
    if data_source_type == RESOURCE_TYPE {
        Ok(())
    } else {
        Err(ProviderError::UnknownDataSource(data_source_type.to_string()))
    }
}

#[async_trait::async_trait]
impl ProviderService for EventGridProvider {
    fn schema(&self) -> ProviderSchema {
        ProviderSchema::new()
            .with_provider_config(provider_config_schema())
            .with_resource(RESOURCE_TYPE, resource_schema())
            .with_data_source(RESOURCE_TYPE, data_source_schema())
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            resources: vec![RESOURCE_TYPE.to_string()],
            data_sources: vec![RESOURCE_TYPE.to_string()],
            capabilities: ServerCapabilities { plan_destroy: true },
        }
    }

    async fn validate_provider_config(
        &self,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        match self.load_config(config) {
            Ok(config) => Ok(config.validate()),
            Err(e) => Ok(vec![e.to_diagnostic()]),
        }
    }

    async fn configure(&self, config: serde_json::Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let config = match self.load_config(config) {
            Ok(config) => config,
            Err(e) => return Ok(vec![e.to_diagnostic()]),
        };

        let connection = match &self.injected {
            Some((api, subscription_id)) => Connection {
                api: api.clone(),
                subscription_id: subscription_id.clone(),
                poll_interval: config.poll_interval(),
            },
            None => {
                let diagnostics = config.validate();
                if diagnostics.iter().any(Diagnostic::is_error) {
                    return Ok(diagnostics);
                }
                let client = config.build_client()?;
                Connection {
                    subscription_id: client.subscription_id().to_string(),
                    api: Arc::new(client),
                    poll_interval: config.poll_interval(),
                }
            },
        };

        info!(
            subscription_id = %connection.subscription_id,
            endpoint = config.endpoint(),
            "Provider configured"
        );
        *self.connection.write().await = Some(connection);
        Ok(vec![])
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        if self.injected.is_none() {
            *self.connection.write().await = None;
        }
        debug!("Provider stopped");
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        check_resource_type(resource_type)?;
        Ok(system_topic::validate_config(&config))
    }

    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        check_resource_type(resource_type)?;
        if version > 0 {
            return Err(ProviderError::InvalidRequest(format!(
                "cannot upgrade state from schema version {}",
                version
            )));
        }
        Ok(state)
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<serde_json::Value>,
        proposed_state: serde_json::Value,
        _config: serde_json::Value,
    ) -> Result<PlanResult, ProviderError> {
        check_resource_type(resource_type)?;
        system_topic::plan(prior_state, proposed_state)
    }

    async fn create(
        &self,
        resource_type: &str,
        planned_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        check_resource_type(resource_type)?;
        let planned = SystemTopicState::from_value(planned_state)?;
        self.resource().await?.create(planned).await?.to_value()
    }

    async fn read(
        &self,
        resource_type: &str,
        current_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        check_resource_type(resource_type)?;
        let current = SystemTopicState::from_value(current_state)?;
        match self.resource().await?.read(&current).await? {
            Some(state) => state.to_value(),
            None => Ok(serde_json::Value::Null),
        }
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: serde_json::Value,
        planned_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        check_resource_type(resource_type)?;
        let prior = SystemTopicState::from_value(prior_state)?;
        let planned = SystemTopicState::from_value(planned_state)?;
        self.resource().await?.update(prior, planned).await?.to_value()
    }

    async fn delete(
        &self,
        resource_type: &str,
        current_state: serde_json::Value,
    ) -> Result<(), ProviderError> {
        check_resource_type(resource_type)?;
        let current = SystemTopicState::from_value(current_state)?;
        self.resource().await?.delete(&current).await
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        check_resource_type(resource_type)?;
        let state = self.resource().await?.import(id).await?;
        Ok(vec![ImportedResource::new(RESOURCE_TYPE, state.to_value()?)])
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        check_data_source_type(data_source_type)?;
        Ok(validate(&data_source_schema(), &config))
    }

    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        check_data_source_type(data_source_type)?;
        let connection = self.connection().await?;
        system_topic::read_data_source(connection.api.as_ref(), &connection.subscription_id, config)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        assert_error_contains, assert_has_errors, assert_no_errors, assert_plan_changes_attribute,
        assert_plan_creates, assert_plan_no_changes, assert_plan_replaces,
        assert_plan_updates_in_place, InMemorySystemTopics, ProviderTester, TestError,
    };
    use serde_json::json;

    const SOURCE: &str =
        "/subscriptions/x/resourceGroups/rg1/providers/Microsoft.Storage/storageAccounts/sa1";

    fn topic_config() -> serde_json::Value {
        json!({
            "name": "topic1",
            "resource_group_name": "rg1",
            "source_arm_resource_id": SOURCE,
            "topic_type": "Microsoft.Storage.StorageAccounts",
            "location": "West US"
        })
    }

    fn tester() -> (Arc<InMemorySystemTopics>, ProviderTester<EventGridProvider>) {
        let api = Arc::new(InMemorySystemTopics::new("sub1"));
        let provider = EventGridProvider::with_api(api.clone(), "sub1");
        (api, ProviderTester::new(provider, RESOURCE_TYPE))
    }

    #[test]
    fn test_schema_and_metadata() {
        let (_, tester) = tester();
        let schema = tester.schema();
        assert!(schema.resources.contains_key(RESOURCE_TYPE));
        assert!(schema.data_sources.contains_key(RESOURCE_TYPE));
        assert!(schema.provider.block.attributes.contains_key("subscription_id"));
        assert_eq!(tester.resource_types(), vec![RESOURCE_TYPE.to_string()]);
        assert!(tester.provider().metadata().capabilities.plan_destroy);
    }

    #[tokio::test]
    async fn test_end_to_end_example() {
        let (_, tester) = tester();
        tester
            .configure(json!({"subscription_id": "sub1", "access_token": "token"}))
            .await
            .unwrap();

        let state = tester.lifecycle_create(topic_config()).await.unwrap();
        assert_eq!(state["name"], "topic1");
        assert_eq!(state["resource_group_name"], "rg1");
        assert_eq!(state["source_arm_resource_id"], SOURCE);
        assert_eq!(state["topic_type"], "Microsoft.Storage.StorageAccounts");
        assert_eq!(state["location"], "westus");
        assert!(!state["metric_arm_resource_id"].as_str().unwrap().is_empty());
        assert_eq!(state["identity"], json!([]));
    }

    #[tokio::test]
    async fn test_crud_lifecycle() {
        let (api, tester) = tester();
        let mut updated_config = topic_config();
        updated_config["tags"] = json!({"env": "prod"});
        updated_config["identity"] = json!([{"type": "SystemAssigned"}]);

        let updated = tester
            .lifecycle_crud(topic_config(), updated_config)
            .await
            .unwrap();
        assert_eq!(updated["tags"], json!({"env": "prod"}));
        assert_eq!(updated["identity"][0]["type"], "SystemAssigned");
        assert!(!api.contains("rg1", "topic1"));
    }

    #[tokio::test]
    async fn test_plans() {
        let (_, tester) = tester();
        let plan = tester.plan_create(topic_config()).await.unwrap();
        assert_plan_creates(&plan);

        let state = tester.create(plan.planned_state).await.unwrap();

        let plan = tester.plan_update(state.clone(), topic_config()).await.unwrap();
        assert_plan_no_changes(&plan);

        let mut retagged = topic_config();
        retagged["tags"] = json!({"team": "events"});
        let plan = tester.plan_update(state.clone(), retagged).await.unwrap();
        assert_plan_updates_in_place(&plan);
        assert_plan_changes_attribute(&plan, "tags");

        let mut renamed = topic_config();
        renamed["name"] = json!("topic2");
        let plan = tester.plan_update(state, renamed).await.unwrap();
        assert_plan_replaces(&plan);
    }

    #[tokio::test]
    async fn test_read_absent_returns_null() {
        let (api, tester) = tester();
        let state = tester.lifecycle_create(topic_config()).await.unwrap();
        api.remove("rg1", "topic1");

        assert_eq!(tester.read(state).await.unwrap(), serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_import() {
        let (api, tester) = tester();
        api.insert_existing("rg1", "topic1");

        let imported = tester
            .import_resource("/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.EventGrid/systemTopics/topic1")
            .await
            .unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].resource_type, RESOURCE_TYPE);
        assert_eq!(imported[0].state["name"], "topic1");

        let err = tester.import_resource("not/an/id").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResourceId(_)));
    }

    #[tokio::test]
    async fn test_validate_resource_config() {
        let (_, tester) = tester();
        tester.validate_resource_config(topic_config()).await.unwrap();

        let mut config = topic_config();
        config["name"] = json!("ab");
        match tester.validate_resource_config(config).await {
            Err(TestError::Diagnostics(diagnostics)) => {
                assert_has_errors(&diagnostics);
                assert_error_contains(&diagnostics, "name");
            },
            other => panic!("expected diagnostics, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_resource_type() {
        let (_, tester) = tester();
        let err = tester
            .provider()
            .create("azurerm_eventgrid_topic", topic_config())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
        assert_eq!(err.to_string(), "Unknown resource type: azurerm_eventgrid_topic");

        let err = tester
            .provider()
            .read_data_source("azurerm_eventgrid_topic", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown data source type: azurerm_eventgrid_topic");
    }

    #[tokio::test]
    async fn test_unconfigured_provider() {
        let provider = EventGridProvider::new().with_env_lookup(|_| None);
        let err = provider.read(RESOURCE_TYPE, json!({"id": "x"})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_configure_reports_missing_credentials() {
        let provider = EventGridProvider::new().with_env_lookup(|_| None);
        let diagnostics = provider.configure(json!({})).await.unwrap();
        assert_has_errors(&diagnostics);
        assert_error_contains(&diagnostics, "subscription_id");
        assert!(provider.connection().await.is_err());
    }

    #[tokio::test]
    async fn test_configure_from_environment() {
        let provider = EventGridProvider::new().with_env_lookup(|key| match key {
            "ARM_SUBSCRIPTION_ID" => Some("sub-env".to_string()),
            "ARM_ACCESS_TOKEN" => Some("token".to_string()),
            _ => None,
        });
        let diagnostics = provider.configure(json!({"poll_interval_seconds": 2})).await.unwrap();
        assert_no_errors(&diagnostics);

        let connection = provider.connection().await.unwrap();
        assert_eq!(connection.subscription_id, "sub-env");
        assert_eq!(connection.poll_interval, Duration::from_secs(2));

        provider.stop().await.unwrap();
        assert!(provider.connection().await.is_err());
    }

    #[tokio::test]
    async fn test_upgrade_state_passthrough() {
        let (_, tester) = tester();
        let state = json!({"name": "topic1"});
        assert_eq!(tester.upgrade_resource_state(0, state.clone()).await.unwrap(), state);
        assert!(tester.upgrade_resource_state(3, state).await.is_err());
    }

    #[tokio::test]
    async fn test_data_source() {
        let (api, tester) = tester();
        api.insert_existing("rg1", "topic1");

        tester
            .validate_data_source_config(json!({"name": "topic1", "resource_group_name": "rg1"}))
            .await
            .unwrap();
        let value = tester
            .read_data_source(json!({"name": "topic1", "resource_group_name": "rg1"}))
            .await
            .unwrap();
        assert_eq!(value["topic_type"], "Microsoft.Storage.StorageAccounts");

        let err = tester
            .read_data_source(json!({"name": "missing", "resource_group_name": "rg1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }
}
