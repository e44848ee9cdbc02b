//! Testing utilities for the Event Grid provider.
//!
//! [`InMemorySystemTopics`] stands in for Azure Resource Manager, so the
//! resource lifecycle can be exercised without credentials or network access.
//! [`ProviderTester`] drives a `ProviderService` for one resource type the
//! way the host would, without spinning up a gRPC server.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hemmer_provider_azurerm_eventgrid::testing::{InMemorySystemTopics, ProviderTester};
//! use hemmer_provider_azurerm_eventgrid::{EventGridProvider, RESOURCE_TYPE};
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create_topic() {
//!     let api = Arc::new(InMemorySystemTopics::new("sub1"));
//!     let tester = ProviderTester::new(EventGridProvider::with_api(api, "sub1"), RESOURCE_TYPE);
//!
//!     let state = tester.lifecycle_create(json!({
//!         "name": "topic1",
//!         "resource_group_name": "rg1",
//!         "location": "West US",
//!         "source_arm_resource_id": "/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.Storage/storageAccounts/sa1",
//!         "topic_type": "Microsoft.Storage.StorageAccounts"
//!     })).await.unwrap();
//!
//!     assert_eq!(state["location"], "westus");
//! }
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::azure::{
    ArmError, IdentityInfo, ManagedIdentityType, Operation, PollState, SystemTopic,
    SystemTopicId, SystemTopicProperties, SystemTopicsApi,
};
use crate::error::ProviderError;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

const SYSTEM_TOPIC_TYPE: &str = "Microsoft.EventGrid/systemTopics";
const FAKE_TENANT_ID: &str = "00000000-0000-0000-0000-0000000000aa";
const POLL_DELAY: Duration = Duration::from_millis(1);

type TopicKey = (String, String);

fn key(resource_group: &str, name: &str) -> TopicKey {
    (resource_group.to_string(), name.to_string())
}

#[derive(Default)]
struct Store {
    topics: BTreeMap<TopicKey, SystemTopic>,
    requests: BTreeMap<TopicKey, SystemTopic>,
    sequence: u64,
    get_calls: usize,
    create_calls: usize,
    delete_calls: usize,
    omit_id_after_create: bool,
    vanish_during_delete: bool,
    never_finish: bool,
    failure: Option<(String, String)>,
}

impl Store {
    fn next_guid(&mut self) -> String {
        self.sequence += 1;
        format!("00000000-0000-0000-0000-{:012}", self.sequence)
    }

    fn operation(&self) -> FakeOperation {
        if self.never_finish {
            return FakeOperation::running_forever();
        }
        match &self.failure {
            Some((code, message)) => FakeOperation::failing(code, message),
            None => FakeOperation::succeeding(),
        }
    }
}

/// An in-memory `Microsoft.EventGrid/systemTopics` API.
///
/// Writes land immediately; the returned operations report one in-progress
/// poll before finishing so callers still go through their polling loop.
pub struct InMemorySystemTopics {
    subscription_id: String,
    store: Mutex<Store>,
}

impl InMemorySystemTopics {
    /// Create an empty fake for `subscription_id`.
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            store: Mutex::new(Store::default()),
        }
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a storage-account topic that was created outside this provider.
    pub fn insert_existing(&self, resource_group: &str, name: &str) {
        let mut store = self.store();
        let metric_resource_id = store.next_guid();
        let topic = SystemTopic {
            id: Some(SystemTopicId::new(&self.subscription_id, resource_group, name).to_string()),
            name: Some(name.to_string()),
            resource_type: Some(SYSTEM_TOPIC_TYPE.to_string()),
            location: Some("westus".to_string()),
            tags: None,
            identity: None,
            properties: Some(SystemTopicProperties {
                provisioning_state: Some("Succeeded".to_string()),
                source: Some(format!(
                    "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Storage/storageAccounts/{}sa",
                    self.subscription_id, resource_group, name
                )),
                topic_type: Some("Microsoft.Storage.StorageAccounts".to_string()),
                metric_resource_id: Some(metric_resource_id),
            }),
        };
        store.topics.insert(key(resource_group, name), topic);
    }

    /// Delete a topic behind the provider's back.
    pub fn remove(&self, resource_group: &str, name: &str) {
        self.store().topics.remove(&key(resource_group, name));
    }

    /// Whether a topic exists.
    pub fn contains(&self, resource_group: &str, name: &str) -> bool {
        self.store().topics.contains_key(&key(resource_group, name))
    }

    /// The most recent create/update body sent for a topic.
    pub fn last_request(&self, resource_group: &str, name: &str) -> Option<SystemTopic> {
        self.store().requests.get(&key(resource_group, name)).cloned()
    }

    /// Number of GET requests served.
    pub fn get_calls(&self) -> usize {
        self.store().get_calls
    }

    /// Number of PUT requests served.
    pub fn create_calls(&self) -> usize {
        self.store().create_calls
    }

    /// Number of DELETE requests served.
    pub fn delete_calls(&self) -> usize {
        self.store().delete_calls
    }

    /// Store topics without an ID so the read after a create comes back incomplete.
    pub fn omit_id_after_create(&self) {
        self.store().omit_id_after_create = true;
    }

    /// Make every later long-running operation end in `Failed`.
    pub fn fail_operations(&self, code: &str, message: &str) {
        self.store().failure = Some((code.to_string(), message.to_string()));
    }

    /// Make every later long-running operation stay in progress.
    pub fn never_finish(&self) {
        self.store().never_finish = true;
    }

    /// Make the topic disappear while a delete is being polled.
    pub fn vanish_during_delete(&self) {
        self.store().vanish_during_delete = true;
    }
}

#[async_trait]
impl SystemTopicsApi for InMemorySystemTopics {
    async fn get(&self, resource_group: &str, name: &str) -> Result<SystemTopic, ArmError> {
        let mut store = self.store();
        store.get_calls += 1;
        store
            .topics
            .get(&key(resource_group, name))
            .cloned()
            .ok_or_else(|| {
                ArmError::not_found(format!(
                    "The Resource '{}/{}' under resource group '{}' was not found.",
                    SYSTEM_TOPIC_TYPE, name, resource_group
                ))
            })
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        topic: &SystemTopic,
    ) -> Result<Box<dyn Operation>, ArmError> {
        let mut store = self.store();
        store.create_calls += 1;
        let topic_key = key(resource_group, name);
        store.requests.insert(topic_key.clone(), topic.clone());

        let operation = store.operation();
        if store.failure.is_some() || store.never_finish {
            return Ok(Box::new(operation));
        }

        let existing = store.topics.get(&topic_key).cloned();
        let existing_properties = existing
            .as_ref()
            .and_then(|t| t.properties.clone())
            .unwrap_or_default();
        let metric_resource_id = match existing_properties.metric_resource_id {
            Some(id) => id,
            None => store.next_guid(),
        };

        let identity = match topic.identity.as_ref().and_then(|i| i.identity_type) {
            Some(ManagedIdentityType::SystemAssigned) => {
                let prior = existing.as_ref().and_then(|t| t.identity.clone());
                let principal_id = match prior.and_then(|i| i.principal_id) {
                    Some(id) => id,
                    None => store.next_guid(),
                };
                Some(IdentityInfo {
                    identity_type: Some(ManagedIdentityType::SystemAssigned),
                    principal_id: Some(principal_id),
                    tenant_id: Some(FAKE_TENANT_ID.to_string()),
                })
            },
            Some(identity_type) => Some(IdentityInfo {
                identity_type: Some(identity_type),
                ..Default::default()
            }),
            None => None,
        };

        let properties = topic.properties.clone().unwrap_or_default();
        let id = if store.omit_id_after_create {
            None
        } else {
            Some(SystemTopicId::new(&self.subscription_id, resource_group, name).to_string())
        };
        let stored = SystemTopic {
            id,
            name: Some(name.to_string()),
            resource_type: Some(SYSTEM_TOPIC_TYPE.to_string()),
            location: topic.location.clone(),
            tags: topic.tags.clone(),
            identity,
            properties: Some(SystemTopicProperties {
                provisioning_state: Some("Succeeded".to_string()),
                source: properties.source,
                topic_type: properties.topic_type,
                metric_resource_id: Some(metric_resource_id),
            }),
        };
        store.topics.insert(topic_key, stored);
        Ok(Box::new(operation))
    }

    async fn delete(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Box<dyn Operation>, ArmError> {
        let mut store = self.store();
        store.delete_calls += 1;
        let topic_key = key(resource_group, name);
        if !store.topics.contains_key(&topic_key) {
            return Err(ArmError::not_found(format!(
                "The Resource '{}/{}' under resource group '{}' was not found.",
                SYSTEM_TOPIC_TYPE, name, resource_group
            )));
        }

        if store.vanish_during_delete {
            store.topics.remove(&topic_key);
            return Ok(Box::new(FakeOperation::vanishing(name)));
        }
        let operation = store.operation();
        if store.failure.is_none() && !store.never_finish {
            store.topics.remove(&topic_key);
        }
        Ok(Box::new(operation))
    }
}

/// A scripted long-running operation.
struct FakeOperation {
    steps: VecDeque<Result<PollState, ArmError>>,
    then: PollState,
}

impl FakeOperation {
    fn succeeding() -> Self {
        Self {
            steps: VecDeque::from([Ok(PollState::Running {
                retry_after: Some(POLL_DELAY),
            })]),
            then: PollState::Done,
        }
    }

    fn failing(code: &str, message: &str) -> Self {
        Self {
            steps: VecDeque::from([
                Ok(PollState::Running {
                    retry_after: Some(POLL_DELAY),
                }),
                Err(ArmError::OperationFailed {
                    status: "Failed".to_string(),
                    code: code.to_string(),
                    message: message.to_string(),
                }),
            ]),
            then: PollState::Done,
        }
    }

    fn running_forever() -> Self {
        Self {
            steps: VecDeque::new(),
            then: PollState::Running { retry_after: None },
        }
    }

    fn vanishing(name: &str) -> Self {
        Self {
            steps: VecDeque::from([Err(ArmError::not_found(format!(
                "system topic {} no longer exists",
                name
            )))]),
            then: PollState::Done,
        }
    }
}

#[async_trait]
impl Operation for FakeOperation {
    async fn poll(&mut self) -> Result<PollState, ArmError> {
        self.steps.pop_front().unwrap_or(Ok(self.then))
    }
}

/// Drives one resource type of a provider the way the host does.
///
/// Every resource and data source call goes to the type given at
/// construction.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
    type_name: String,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a tester for `type_name` on `provider`.
    pub fn new(provider: P, type_name: impl Into<String>) -> Self {
        Self {
            provider,
            type_name: type_name.into(),
        }
    }

    /// The underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Resource type names advertised in metadata.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Validate provider configuration, failing on error diagnostics.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider, failing on error diagnostics.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Validate a resource configuration, failing on error diagnostics.
    pub async fn validate_resource_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(&self.type_name, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a create. The proposed state doubles as the configuration.
    pub async fn plan_create(&self, proposed_state: Value) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(&self.type_name, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan an update from `prior_state`.
    pub async fn plan_update(
        &self,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(
                &self.type_name,
                Some(prior_state),
                proposed_state.clone(),
                proposed_state,
            )
            .await
    }

    /// Plan a delete of `prior_state`.
    pub async fn plan_delete(&self, prior_state: Value) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(&self.type_name, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Create from a planned state.
    pub async fn create(&self, planned_state: Value) -> Result<Value, ProviderError> {
        self.provider.create(&self.type_name, planned_state).await
    }

    /// Refresh a state. Null means the resource is gone.
    pub async fn read(&self, current_state: Value) -> Result<Value, ProviderError> {
        self.provider.read(&self.type_name, current_state).await
    }

    /// Update from `prior_state` to `planned_state`.
    pub async fn update(
        &self,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(&self.type_name, prior_state, planned_state)
            .await
    }

    /// Delete the resource described by `current_state`.
    pub async fn delete(&self, current_state: Value) -> Result<(), ProviderError> {
        self.provider.delete(&self.type_name, current_state).await
    }

    /// Import by ID.
    pub async fn import_resource(&self, id: &str) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(&self.type_name, id).await
    }

    /// Upgrade a state written by schema `version`.
    pub async fn upgrade_resource_state(
        &self,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .upgrade_resource_state(&self.type_name, version, state)
            .await
    }

    /// Validate a data source configuration, failing on error diagnostics.
    pub async fn validate_data_source_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_data_source_config(&self.type_name, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Read the data source of the same type name.
    pub async fn read_data_source(&self, config: Value) -> Result<Value, ProviderError> {
        self.provider.read_data_source(&self.type_name, config).await
    }

    /// Plan, create, then read back. Returns the read state.
    pub async fn lifecycle_create(&self, config: Value) -> Result<Value, ProviderError> {
        let plan = self.plan_create(config).await?;
        let created = self.create(plan.planned_state).await?;
        self.read(created).await
    }

    /// Plan, update, then read back. Returns the read state.
    pub async fn lifecycle_update(
        &self,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self.plan_update(prior_state.clone(), proposed_state).await?;
        let updated = self.update(prior_state, plan.planned_state).await?;
        self.read(updated).await
    }

    /// Plan and perform a delete.
    pub async fn lifecycle_delete(&self, current_state: Value) -> Result<(), ProviderError> {
        self.plan_delete(current_state.clone()).await?;
        self.delete(current_state).await
    }

    /// Create, update, then delete. Returns the state after the update.
    pub async fn lifecycle_crud(
        &self,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, ProviderError> {
        let created = self.lifecycle_create(initial_config).await?;
        let updated = self.lifecycle_update(created, updated_config).await?;
        self.lifecycle_delete(updated.clone()).await?;
        Ok(updated)
    }
}

/// A tester call that failed with diagnostics or a provider error.
#[derive(Debug)]
pub enum TestError {
    /// Error diagnostics were returned.
    Diagnostics(Vec<Diagnostic>),
    /// The provider returned an error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                write!(f, "{} error diagnostic(s)", diags.len())?;
                for diag in diags {
                    write!(f, "; {}", diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

fn changed_paths(plan: &PlanResult) -> Vec<&str> {
    plan.changes.iter().map(|c| c.path.as_str()).collect()
}

/// Assert that a plan creates: it has changes and no replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "expected a create plan, but it has no changes"
    );
    assert!(
        plan.changes.iter().all(|c| c.before.is_none()),
        "expected only added attributes, got {:?}",
        changed_paths(plan)
    );
    assert!(!plan.requires_replace, "expected a create, not a replace");
}

/// Assert that a plan has no changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "expected no changes, got {:?}",
        changed_paths(plan)
    );
}

/// Assert that a plan requires replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "expected a replacement, changes were {:?}",
        changed_paths(plan)
    );
}

/// Assert that a plan changes something without replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "expected an in-place update, but the plan has no changes"
    );
    assert!(
        !plan.requires_replace,
        "expected an in-place update, but the plan replaces"
    );
}

/// Assert that a plan changes `path`.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes.iter().any(|c| c.path == path),
        "expected a change to '{}', changes were {:?}",
        path,
        changed_paths(plan)
    );
}

/// Assert that diagnostics contain no errors.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(|d| &d.summary)
        .collect();
    assert!(errors.is_empty(), "expected no errors, got {:?}", errors);
}

/// Assert that diagnostics contain at least one error.
pub fn assert_has_errors(diagnostics: &[Diagnostic]) {
    assert!(
        diagnostics.iter().any(Diagnostic::is_error),
        "expected at least one error, got none"
    );
}

/// Assert that an error's summary, detail or attribute mentions `substring`.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let matches = |d: &Diagnostic| {
        d.summary.contains(substring)
            || d.detail.as_deref().is_some_and(|s| s.contains(substring))
            || d.attribute.as_deref().is_some_and(|s| s.contains(substring))
    };
    assert!(
        diagnostics
            .iter()
            .any(|d| matches!(d.severity, DiagnosticSeverity::Error) && matches(d)),
        "expected an error mentioning '{}', got {:?}",
        substring,
        diagnostics.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}
