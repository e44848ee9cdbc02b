//! Lifecycle of an Event Grid system topic.
//!
//! Create and update share one path: build the request, submit it, wait for
//! the long-running operation, then read the topic back. Read and delete treat
//! a missing topic as an outcome rather than a failure.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{describe, identity, resource_schema, SystemTopicState};
use crate::azure::location::normalize_location;
use crate::azure::{
    tags, wait_for_completion, ArmError, SystemTopic, SystemTopicId, SystemTopicProperties,
    SystemTopicsApi,
};
use crate::error::ProviderError;
use crate::schema::Diagnostic;
use crate::timeouts::{with_deadline, Timeouts, TimeoutsBlock};
use crate::validation::validate;

/// Validate a resource configuration: schema rules, tag limits and timeouts.
pub fn validate_config(config: &serde_json::Value) -> Vec<Diagnostic> {
    let mut diagnostics = validate(&resource_schema(), config);
    if !diagnostics.is_empty() {
        return diagnostics;
    }

    match SystemTopicState::from_value(config.clone()) {
        Ok(state) => {
            diagnostics.extend(tags::validate(&state.tags).into_iter().map(|message| {
                Diagnostic::error("Invalid tags")
                    .with_detail(message)
                    .with_attribute("tags")
            }));
        },
        Err(e) => diagnostics.push(e.to_diagnostic()),
    }
    diagnostics
}

fn ensure_valid(state: &SystemTopicState) -> Result<(), ProviderError> {
    let diagnostics = validate_config(&state.to_value()?);
    if diagnostics.is_empty() {
        return Ok(());
    }
    let details: Vec<String> = diagnostics
        .iter()
        .map(|d| match (&d.attribute, &d.detail) {
            (Some(attr), Some(detail)) => format!("{}: {}", attr, detail),
            (Some(attr), None) => format!("{}: {}", attr, d.summary),
            (None, Some(detail)) => detail.clone(),
            (None, None) => d.summary.clone(),
        })
        .collect();
    Err(ProviderError::Validation(format!(
        "{}: {}",
        state.describe(),
        details.join("; ")
    )))
}

fn api_error(context: String, err: ArmError) -> ProviderError {
    ProviderError::Api {
        status: err.status(),
        message: format!("{}: {}", context, err),
    }
}

fn timeouts_of(state: &SystemTopicState) -> Result<Timeouts, ProviderError> {
    Timeouts::from_block(state.timeouts.as_ref())
}

/// Build the request body for a create or update.
pub fn expand(state: &SystemTopicState) -> SystemTopic {
    SystemTopic {
        location: Some(normalize_location(&state.location)),
        tags: tags::expand(&state.tags),
        identity: Some(identity::expand(&state.identity)),
        properties: Some(SystemTopicProperties {
            source: Some(state.source_arm_resource_id.clone()),
            topic_type: Some(state.topic_type.clone()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Map a remote topic into state.
///
/// `id` and `timeouts` are carried over from the caller; everything else comes
/// from the remote copy.
pub fn flatten(
    id: &SystemTopicId,
    state_id: String,
    topic: &SystemTopic,
    timeouts: Option<TimeoutsBlock>,
) -> SystemTopicState {
    let properties = topic.properties.clone().unwrap_or_default();
    SystemTopicState {
        id: Some(state_id),
        name: topic.name.clone().unwrap_or_else(|| id.name.clone()),
        location: topic
            .location
            .as_deref()
            .map(normalize_location)
            .unwrap_or_default(),
        resource_group_name: id.resource_group.clone(),
        source_arm_resource_id: properties.source.unwrap_or_default(),
        topic_type: properties.topic_type.unwrap_or_default(),
        metric_arm_resource_id: properties.metric_resource_id,
        identity: identity::flatten(topic.identity.as_ref()),
        tags: tags::flatten(topic.tags.as_ref()),
        timeouts,
    }
}

/// Lifecycle operations for system topics against one ARM client.
#[derive(Clone)]
pub struct SystemTopicResource {
    api: Arc<dyn SystemTopicsApi>,
    poll_interval: Duration,
}

impl SystemTopicResource {
    /// Create a resource handler.
    pub fn new(api: Arc<dyn SystemTopicsApi>, poll_interval: Duration) -> Self {
        Self { api, poll_interval }
    }

    /// Create a topic that must not exist yet.
    pub async fn create(&self, planned: SystemTopicState) -> Result<SystemTopicState, ProviderError> {
        let limit = timeouts_of(&planned)?.create;
        let what = format!("creating {}", planned.describe());
        with_deadline(limit, &what, self.create_or_update(planned, true)).await
    }

    /// Update the mutable attributes of an existing topic.
    pub async fn update(
        &self,
        prior: SystemTopicState,
        mut planned: SystemTopicState,
    ) -> Result<SystemTopicState, ProviderError> {
        if planned.id.is_none() {
            planned.id = prior.id;
        }
        let limit = timeouts_of(&planned)?.update;
        let what = format!("updating {}", planned.describe());
        with_deadline(limit, &what, self.create_or_update(planned, false)).await
    }

    /// Submit the topic, wait for it, and read it back.
    ///
    /// With `is_new` set an existing topic of the same name is an
    /// [`ProviderError::AlreadyExists`] and nothing is submitted.
    pub async fn create_or_update(
        &self,
        state: SystemTopicState,
        is_new: bool,
    ) -> Result<SystemTopicState, ProviderError> {
        ensure_valid(&state)?;
        let name = state.name.as_str();
        let resource_group = state.resource_group_name.as_str();
        let description = describe(name, resource_group);

        if is_new {
            debug!(name, resource_group, "Checking for an existing system topic");
            match self.api.get(resource_group, name).await {
                Ok(existing) => {
                    if let Some(id) = existing.id.filter(|id| !id.is_empty()) {
                        return Err(ProviderError::AlreadyExists(format!(
                            "{} already exists with ID {:?}; import it to manage it",
                            description, id
                        )));
                    }
                },
                Err(e) if e.is_not_found() => {},
                Err(e) => {
                    return Err(api_error(
                        format!("checking for presence of existing {}", description),
                        e,
                    ))
                },
            }
        }

        let body = expand(&state);
        info!(
            name,
            resource_group,
            location = body.location.as_deref().unwrap_or_default(),
            topic_type = %state.topic_type,
            "Preparing arguments for system topic creation"
        );

        let mut operation = self
            .api
            .create_or_update(resource_group, name, &body)
            .await
            .map_err(|e| api_error(format!("creating/updating {}", description), e))?;
        wait_for_completion(operation.as_mut(), self.poll_interval)
            .await
            .map_err(|e| {
                api_error(format!("waiting for creation/update of {}", description), e)
            })?;

        let read = self
            .api
            .get(resource_group, name)
            .await
            .map_err(|e| api_error(format!("retrieving {}", description), e))?;
        let id = match read.id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => {
                return Err(ProviderError::InconsistentState(format!(
                    "cannot read {} ID",
                    description
                )))
            },
        };

        let mut state = state;
        state.id = Some(id);
        self.read_remote(&state).await?.ok_or_else(|| {
            ProviderError::InconsistentState(format!("{} disappeared after creation", description))
        })
    }

    /// Refresh a topic from Azure. `None` means it is gone.
    pub async fn read(
        &self,
        state: &SystemTopicState,
    ) -> Result<Option<SystemTopicState>, ProviderError> {
        let limit = timeouts_of(state)?.read;
        let what = format!("reading {}", state.describe());
        with_deadline(limit, &what, self.read_remote(state)).await
    }

    async fn read_remote(
        &self,
        state: &SystemTopicState,
    ) -> Result<Option<SystemTopicState>, ProviderError> {
        let state_id = state
            .id
            .clone()
            .ok_or_else(|| ProviderError::InvalidRequest("state has no ID".to_string()))?;
        let id = SystemTopicId::parse(&state_id)?;

        match self.api.get(&id.resource_group, &id.name).await {
            Ok(topic) => Ok(Some(flatten(&id, state_id, &topic, state.timeouts.clone()))),
            Err(e) if e.is_not_found() => {
                warn!(
                    name = %id.name,
                    resource_group = %id.resource_group,
                    "System topic was not found, removing from state"
                );
                Ok(None)
            },
            Err(e) => Err(api_error(
                format!("making Read request on {}", describe(&id.name, &id.resource_group)),
                e,
            )),
        }
    }

    /// Delete a topic. A topic that is already gone counts as deleted.
    pub async fn delete(&self, state: &SystemTopicState) -> Result<(), ProviderError> {
        let state_id = state
            .id
            .as_deref()
            .ok_or_else(|| ProviderError::InvalidRequest("state has no ID".to_string()))?;
        let id = SystemTopicId::parse(state_id)?;
        let limit = timeouts_of(state)?.delete;
        let description = describe(&id.name, &id.resource_group);
        let what = format!("deleting {}", description);

        with_deadline(limit, &what, async {
            let mut operation = match self.api.delete(&id.resource_group, &id.name).await {
                Ok(operation) => operation,
                Err(e) if e.is_not_found() => {
                    debug!(name = %id.name, resource_group = %id.resource_group, "System topic already gone");
                    return Ok(());
                },
                Err(e) => return Err(api_error(format!("deleting {}", description), e)),
            };

            match wait_for_completion(operation.as_mut(), self.poll_interval).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_not_found() => {
                    debug!(name = %id.name, resource_group = %id.resource_group, "System topic vanished during delete");
                    Ok(())
                },
                Err(e) => Err(api_error(
                    format!("waiting for deletion of {}", description),
                    e,
                )),
            }
        })
        .await
    }

    /// Import an existing topic by ID.
    pub async fn import(&self, id: &str) -> Result<SystemTopicState, ProviderError> {
        let parsed = SystemTopicId::parse(id)?;
        let state = SystemTopicState {
            id: Some(id.to_string()),
            name: parsed.name.clone(),
            resource_group_name: parsed.resource_group.clone(),
            ..Default::default()
        };
        self.read(&state).await?.ok_or_else(|| {
            ProviderError::NotFound(format!(
                "{} does not exist",
                describe(&parsed.name, &parsed.resource_group)
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::ManagedIdentityType;
    use crate::system_topic::IdentityBlock;
    use crate::testing::InMemorySystemTopics;
    use serde_json::json;

    const SOURCE: &str =
        "/subscriptions/x/resourceGroups/rg1/providers/Microsoft.Storage/storageAccounts/sa1";

    fn descriptor() -> SystemTopicState {
        SystemTopicState::from_value(json!({
            "name": "topic1",
            "resource_group_name": "rg1",
            "source_arm_resource_id": SOURCE,
            "topic_type": "Microsoft.Storage.StorageAccounts",
            "location": "West US"
        }))
        .unwrap()
    }

    fn resource(api: &Arc<InMemorySystemTopics>) -> SystemTopicResource {
        SystemTopicResource::new(api.clone(), Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_create_then_read_round_trip() {
        let api = Arc::new(InMemorySystemTopics::new("sub1"));
        let resource = resource(&api);

        let created = resource.create(descriptor()).await.unwrap();
        assert_eq!(
            created.id.as_deref(),
            Some("/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.EventGrid/systemTopics/topic1")
        );
        assert_eq!(created.name, "topic1");
        assert_eq!(created.resource_group_name, "rg1");
        assert_eq!(created.location, "westus");
        assert_eq!(created.source_arm_resource_id, SOURCE);
        assert_eq!(created.topic_type, "Microsoft.Storage.StorageAccounts");
        assert!(created
            .metric_arm_resource_id
            .as_deref()
            .is_some_and(|m| !m.is_empty()));
        assert!(created.identity.is_empty());
        assert!(created.tags.is_empty());

        let read = resource.read(&created).await.unwrap().unwrap();
        assert_eq!(read, created);

        // The request carried an explicit "None" identity
        let sent = api.last_request("rg1", "topic1").unwrap();
        assert_eq!(
            sent.identity.unwrap().identity_type,
            Some(ManagedIdentityType::None)
        );
        assert_eq!(sent.location.as_deref(), Some("westus"));
    }

    #[tokio::test]
    async fn test_create_conflict_issues_no_create_call() {
        let api = Arc::new(InMemorySystemTopics::new("sub1"));
        api.insert_existing("rg1", "topic1");
        let resource = resource(&api);

        let err = resource.create(descriptor()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AlreadyExists(_)), "{:?}", err);
        assert!(err.to_string().contains("\"topic1\""));
        assert!(err.to_string().contains("\"rg1\""));
        assert_eq!(api.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_update_adopts_existing() {
        let api = Arc::new(InMemorySystemTopics::new("sub1"));
        let resource = resource(&api);
        let created = resource.create(descriptor()).await.unwrap();

        let mut planned = created.clone();
        planned.tags.insert("env".into(), "prod".into());
        planned.identity = vec![IdentityBlock {
            identity_type: "SystemAssigned".into(),
            ..Default::default()
        }];

        let updated = resource.update(created.clone(), planned).await.unwrap();
        assert_eq!(api.create_calls(), 2);
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.tags.get("env").map(String::as_str), Some("prod"));
        assert_eq!(updated.identity.len(), 1);
        assert_eq!(updated.identity[0].identity_type, "SystemAssigned");
        assert!(!updated.identity[0].principal_id.is_empty());
        assert!(!updated.identity[0].tenant_id.is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_input_before_calling_out() {
        let api = Arc::new(InMemorySystemTopics::new("sub1"));
        let resource = resource(&api);

        for (field, value) in [
            ("name", json!("a_b")),
            ("topic_type", json!("Microsoft.Nope")),
            ("source_arm_resource_id", json!("not-an-id")),
        ] {
            let mut config = descriptor().to_value().unwrap();
            config[field] = value;
            let err = resource
                .create(SystemTopicState::from_value(config).unwrap())
                .await
                .unwrap_err();
            assert!(matches!(err, ProviderError::Validation(_)), "{}: {:?}", field, err);
            assert!(err.to_string().contains(field));
        }
        assert_eq!(api.get_calls(), 0);
        assert_eq!(api.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_create_missing_id_is_inconsistent() {
        let api = Arc::new(InMemorySystemTopics::new("sub1"));
        api.omit_id_after_create();
        let err = resource(&api).create(descriptor()).await.unwrap_err();
        assert!(matches!(err, ProviderError::InconsistentState(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_create_failed_operation_surfaces() {
        let api = Arc::new(InMemorySystemTopics::new("sub1"));
        api.fail_operations("InvalidSource", "source does not exist");
        let err = resource(&api).create(descriptor()).await.unwrap_err();
        match err {
            ProviderError::Api { message, .. } => {
                assert!(message.contains("\"topic1\""));
                assert!(message.contains("source does not exist"));
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_deadline() {
        let api = Arc::new(InMemorySystemTopics::new("sub1"));
        api.never_finish();
        let mut state = descriptor();
        state.timeouts = Some(TimeoutsBlock {
            create: Some("1m".into()),
            ..Default::default()
        });

        let err = SystemTopicResource::new(api.clone(), Duration::from_secs(5))
            .create(state)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::DeadlineExceeded(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_read_absent() {
        let api = Arc::new(InMemorySystemTopics::new("sub1"));
        let resource = resource(&api);
        let created = resource.create(descriptor()).await.unwrap();
        api.remove("rg1", "topic1");

        assert!(resource.read(&created).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_bad_id() {
        let api = Arc::new(InMemorySystemTopics::new("sub1"));
        let mut state = descriptor();
        state.id = Some("/subscriptions/x/resourceGroups/rg1".into());
        let err = resource(&api).read(&state).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResourceId(_)));
        assert_eq!(api.get_calls(), 0);
    }

    #[tokio::test]
    async fn test_delete() {
        let api = Arc::new(InMemorySystemTopics::new("sub1"));
        let resource = resource(&api);
        let created = resource.create(descriptor()).await.unwrap();

        resource.delete(&created).await.unwrap();
        assert!(!api.contains("rg1", "topic1"));
    }

    #[tokio::test]
    async fn test_delete_not_found_on_submit() {
        let api = Arc::new(InMemorySystemTopics::new("sub1"));
        let mut state = descriptor();
        state.id = Some(SystemTopicId::new("sub1", "rg1", "topic1").to_string());

        resource(&api).delete(&state).await.unwrap();
        assert_eq!(api.delete_calls(), 1);
    }

    #[tokio::test]
    async fn test_delete_not_found_while_waiting() {
        let api = Arc::new(InMemorySystemTopics::new("sub1"));
        let resource = resource(&api);
        let created = resource.create(descriptor()).await.unwrap();
        api.vanish_during_delete();

        resource.delete(&created).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_failure_surfaces() {
        let api = Arc::new(InMemorySystemTopics::new("sub1"));
        let resource = resource(&api);
        let created = resource.create(descriptor()).await.unwrap();
        api.fail_operations("Conflict", "topic has subscriptions");

        let err = resource.delete(&created).await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { .. }));
        assert!(err.to_string().contains("topic has subscriptions"));
    }

    #[tokio::test]
    async fn test_import() {
        let api = Arc::new(InMemorySystemTopics::new("sub1"));
        let resource = resource(&api);
        let created = resource.create(descriptor()).await.unwrap();

        let imported = resource.import(created.id.as_deref().unwrap()).await.unwrap();
        assert_eq!(imported, created);

        let err = resource
            .import("/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.EventGrid/systemTopics/missing")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));

        let err = resource.import("topic1").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResourceId(_)));
    }

    #[test]
    fn test_validate_config_tags() {
        let mut config = descriptor().to_value().unwrap();
        let tags: serde_json::Map<String, serde_json::Value> = (0..51)
            .map(|i| (format!("k{}", i), json!("v")))
            .collect();
        config["tags"] = serde_json::Value::Object(tags);

        let diagnostics = validate_config(&config);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("tags"));
    }
}
