//! The `azurerm_eventgrid_system_topic` resource and data source.
//!
//! A system topic exposes the events of an Azure resource (a storage account,
//! a key vault, a whole subscription, ...) to Event Grid. Everything except
//! `tags` and `identity` is fixed at creation time.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ProviderError;
use crate::schema::{Attribute, Block, NestedBlock, Schema, StringRule};
use crate::timeouts::TimeoutsBlock;

pub mod data_source;
pub mod identity;
pub mod plan;
pub mod resource;

pub use data_source::read_data_source;
pub use plan::plan;
pub use resource::{validate_config, SystemTopicResource};

/// Resource and data source type name.
pub const RESOURCE_TYPE: &str = "azurerm_eventgrid_system_topic";

/// Topic name pattern.
pub const NAME_PATTERN: &str = "^[-a-zA-Z0-9]{3,128}$";

/// Identity types that can be configured.
pub const IDENTITY_TYPES: &[&str] = &["SystemAssigned"];

/// Kinds of source resource a system topic can be attached to.
pub const TOPIC_TYPES: &[&str] = &[
    "Microsoft.AppConfiguration.ConfigurationStores",
    "Microsoft.Communication.CommunicationServices",
    "Microsoft.ContainerRegistry.Registries",
    "Microsoft.Devices.IoTHubs",
    "Microsoft.EventGrid.Domains",
    "Microsoft.EventGrid.Topics",
    "Microsoft.Eventhub.Namespaces",
    "Microsoft.KeyVault.vaults",
    "Microsoft.MachineLearningServices.Workspaces",
    "Microsoft.Maps.Accounts",
    "Microsoft.Media.MediaServices",
    "Microsoft.Resources.ResourceGroups",
    "Microsoft.Resources.Subscriptions",
    "Microsoft.ServiceBus.Namespaces",
    "Microsoft.SignalRService.SignalR",
    "Microsoft.Storage.StorageAccounts",
    "Microsoft.Web.ServerFarms",
    "Microsoft.Web.Sites",
];

/// State of a system topic as exchanged with the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemTopicState {
    /// ARM resource ID; null until created.
    #[serde(default)]
    pub id: Option<String>,
    /// Topic name.
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// Azure region.
    #[serde(default, deserialize_with = "null_as_default")]
    pub location: String,
    /// Resource group containing the topic.
    #[serde(default, deserialize_with = "null_as_default")]
    pub resource_group_name: String,
    /// ARM ID of the resource whose events are published.
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_arm_resource_id: String,
    /// Kind of the source resource.
    #[serde(default, deserialize_with = "null_as_default")]
    pub topic_type: String,
    /// ARM ID for querying the topic's metrics; server-derived.
    #[serde(default)]
    pub metric_arm_resource_id: Option<String>,
    /// Managed identity, at most one entry.
    #[serde(default, deserialize_with = "null_as_default")]
    pub identity: Vec<IdentityBlock>,
    /// Resource tags.
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: BTreeMap<String, String>,
    /// Per-operation deadlines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<TimeoutsBlock>,
}

/// One entry of the `identity` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityBlock {
    /// Identity type, e.g. `SystemAssigned`.
    #[serde(
        rename = "type",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub identity_type: String,
    /// Principal ID of the identity; server-derived.
    #[serde(default, deserialize_with = "null_as_default")]
    pub principal_id: String,
    /// Tenant ID of the identity; server-derived.
    #[serde(default, deserialize_with = "null_as_default")]
    pub tenant_id: String,
}

impl SystemTopicState {
    /// Decode a state or configuration value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ProviderError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Encode for the host.
    pub fn to_value(&self) -> Result<serde_json::Value, ProviderError> {
        Ok(serde_json::to_value(self)?)
    }

    /// How this topic is named in messages.
    pub fn describe(&self) -> String {
        describe(&self.name, &self.resource_group_name)
    }
}

/// `Event Grid System Topic "name" (Resource Group "rg")`.
pub fn describe(name: &str, resource_group: &str) -> String {
    format!(
        "Event Grid System Topic {:?} (Resource Group {:?})",
        name, resource_group
    )
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn identity_block() -> Block {
    Block::new()
        .with_attribute(
            "type",
            Attribute::optional_string()
                .with_description("Type of managed identity. Only SystemAssigned is supported.")
                .with_rule(StringRule::one_of_ignore_case(IDENTITY_TYPES)),
        )
        .with_attribute(
            "principal_id",
            Attribute::computed_string().with_description("Principal ID of the identity"),
        )
        .with_attribute(
            "tenant_id",
            Attribute::computed_string().with_description("Tenant ID of the identity"),
        )
}

fn timeouts_block() -> Block {
    ["create", "read", "update", "delete"]
        .into_iter()
        .fold(Block::new(), |block, op| {
            block.with_attribute(
                op,
                Attribute::optional_string()
                    .with_description(format!("Deadline for {}, e.g. \"30m\"", op))
                    .with_rule(StringRule::Duration),
            )
        })
}

/// Schema of the resource.
pub fn resource_schema() -> Schema {
    Schema::v0()
        .with_description("Manages an Event Grid System Topic")
        .with_attribute(
            "id",
            Attribute::computed_string().with_description("ARM resource ID of the topic"),
        )
        .with_attribute(
            "name",
            Attribute::required_string()
                .with_force_new()
                .with_description("Name of the topic")
                .with_rule(StringRule::NotEmpty)
                .with_rule(StringRule::matches(
                    NAME_PATTERN,
                    "EventGrid Topics name must be 3 - 128 characters long, contain only letters, numbers and hyphens.",
                )),
        )
        .with_attribute(
            "location",
            Attribute::required_string()
                .with_force_new()
                .with_description("Azure region; stored in normalised form"),
        )
        .with_attribute(
            "resource_group_name",
            Attribute::required_string()
                .with_force_new()
                .with_rule(StringRule::ResourceGroupName),
        )
        .with_attribute(
            "source_arm_resource_id",
            Attribute::required_string()
                .with_force_new()
                .with_description("ARM ID of the resource whose events are published")
                .with_rule(StringRule::ResourceId),
        )
        .with_attribute(
            "topic_type",
            Attribute::required_string()
                .with_force_new()
                .with_rule(StringRule::one_of(TOPIC_TYPES)),
        )
        .with_attribute("metric_arm_resource_id", Attribute::computed_string())
        .with_attribute("tags", Attribute::optional_string_map())
        .with_block(
            "identity",
            NestedBlock::list(identity_block()).with_max_items(1),
        )
        .with_block("timeouts", NestedBlock::single(timeouts_block()))
}

/// Schema of the data source: look a topic up by name.
pub fn data_source_schema() -> Schema {
    Schema::v0()
        .with_description("Reads an existing Event Grid System Topic")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "name",
            Attribute::required_string()
                .with_rule(StringRule::NotEmpty)
                .with_rule(StringRule::matches(
                    NAME_PATTERN,
                    "EventGrid Topics name must be 3 - 128 characters long, contain only letters, numbers and hyphens.",
                )),
        )
        .with_attribute(
            "resource_group_name",
            Attribute::required_string().with_rule(StringRule::ResourceGroupName),
        )
        .with_attribute("location", Attribute::computed_string())
        .with_attribute("source_arm_resource_id", Attribute::computed_string())
        .with_attribute("topic_type", Attribute::computed_string())
        .with_attribute("metric_arm_resource_id", Attribute::computed_string())
        .with_attribute("tags", Attribute::computed_string_map())
        .with_block("identity", NestedBlock::list(identity_block()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate;
    use serde_json::json;

    fn config(name: &str) -> serde_json::Value {
        json!({
            "name": name,
            "location": "West US",
            "resource_group_name": "rg1",
            "source_arm_resource_id": "/subscriptions/x/resourceGroups/rg1/providers/Microsoft.Storage/storageAccounts/sa1",
            "topic_type": "Microsoft.Storage.StorageAccounts"
        })
    }

    #[test]
    fn test_name_validation() {
        let schema = resource_schema();
        let longest = "a".repeat(128);
        let too_long = "a".repeat(129);
        for valid in ["topic1", "abc", "my-topic-2", longest.as_str()] {
            assert!(validate(&schema, &config(valid)).is_empty(), "{:?}", valid);
        }
        for invalid in ["", "ab", "a_b", "topic.1", too_long.as_str()] {
            let diagnostics = validate(&schema, &config(invalid));
            assert!(!diagnostics.is_empty(), "{:?} should be rejected", invalid);
            assert!(diagnostics
                .iter()
                .all(|d| d.attribute.as_deref() == Some("name")));
        }
    }

    #[test]
    fn test_topic_type_is_case_sensitive() {
        let schema = resource_schema();
        let mut value = config("topic1");
        value["topic_type"] = json!("microsoft.storage.storageaccounts");
        let diagnostics = validate(&schema, &value);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("topic_type"));
        assert_eq!(TOPIC_TYPES.len(), 18);
    }

    #[test]
    fn test_source_must_be_resource_id() {
        let mut value = config("topic1");
        value["source_arm_resource_id"] = json!("sa1");
        let diagnostics = validate(&resource_schema(), &value);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].attribute.as_deref(),
            Some("source_arm_resource_id")
        );
    }

    #[test]
    fn test_identity_block() {
        let mut value = config("topic1");
        value["identity"] = json!([{"type": "systemassigned"}]);
        assert!(validate(&resource_schema(), &value).is_empty());

        value["identity"] = json!([{"type": "UserAssigned"}]);
        assert_eq!(validate(&resource_schema(), &value).len(), 1);
    }

    #[test]
    fn test_force_new_attributes() {
        assert_eq!(
            resource_schema().force_new_attributes(),
            vec![
                "location",
                "name",
                "resource_group_name",
                "source_arm_resource_id",
                "topic_type"
            ]
        );
    }

    #[test]
    fn test_state_tolerates_nulls() {
        let state = SystemTopicState::from_value(json!({
            "id": null,
            "name": "topic1",
            "location": "westus",
            "resource_group_name": "rg1",
            "source_arm_resource_id": "/subscriptions/x",
            "topic_type": "Microsoft.Resources.Subscriptions",
            "metric_arm_resource_id": null,
            "tags": null,
            "identity": [{"type": "SystemAssigned", "principal_id": null}],
            "timeouts": null
        }))
        .unwrap();
        assert!(state.tags.is_empty());
        assert_eq!(state.identity[0].principal_id, "");
        assert!(state.timeouts.is_none());
    }

    #[test]
    fn test_state_serialization() {
        let state = SystemTopicState {
            name: "topic1".into(),
            resource_group_name: "rg1".into(),
            identity: vec![IdentityBlock {
                identity_type: "SystemAssigned".into(),
                principal_id: "p1".into(),
                tenant_id: "t1".into(),
            }],
            ..Default::default()
        };
        let value = state.to_value().unwrap();
        assert_eq!(value["id"], serde_json::Value::Null);
        assert_eq!(
            value["identity"],
            json!([{"type": "SystemAssigned", "principal_id": "p1", "tenant_id": "t1"}])
        );
        assert!(value.get("timeouts").is_none());
        assert_eq!(
            state.describe(),
            "Event Grid System Topic \"topic1\" (Resource Group \"rg1\")"
        );
    }
}
