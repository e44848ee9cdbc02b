//! Wire models for the `Microsoft.EventGrid/systemTopics` resource.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An Event Grid system topic as returned and accepted by ARM.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemTopic {
    /// Fully qualified resource ID, set by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Resource name, set by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Resource type, set by the server.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    /// Azure region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Resource tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
    /// Managed identity configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityInfo>,
    /// Topic properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<SystemTopicProperties>,
}

impl SystemTopic {
    /// The provisioning state, if the server reported one.
    pub fn provisioning_state(&self) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|p| p.provisioning_state.as_deref())
    }
}

/// Properties of a system topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemTopicProperties {
    /// Provisioning state, set by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
    /// ARM ID of the resource that emits the events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Kind of the source resource, e.g. `Microsoft.Storage.StorageAccounts`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_type: Option<String>,
    /// ARM ID used to query metrics for the topic, set by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_resource_id: Option<String>,
}

/// Managed identity attached to a system topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityInfo {
    /// Identity type.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub identity_type: Option<ManagedIdentityType>,
    /// Principal ID of the system-assigned identity, set by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
    /// Tenant ID of the system-assigned identity, set by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Managed identity types understood by the Event Grid API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagedIdentityType {
    /// No identity.
    None,
    /// Platform-managed identity tied to the topic's lifetime.
    SystemAssigned,
    /// One or more caller-supplied identities.
    UserAssigned,
    /// Both kinds at once.
    #[serde(rename = "SystemAssigned, UserAssigned")]
    SystemAssignedUserAssigned,
    /// Anything this client does not know about.
    #[serde(other)]
    Unknown,
}

impl ManagedIdentityType {
    /// The wire name of this identity type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::SystemAssigned => "SystemAssigned",
            Self::UserAssigned => "UserAssigned",
            Self::SystemAssignedUserAssigned => "SystemAssigned, UserAssigned",
            Self::Unknown => "Unknown",
        }
    }

    /// Parse a configured identity type, ignoring ASCII case.
    pub fn parse(value: &str) -> Option<Self> {
        [
            Self::None,
            Self::SystemAssigned,
            Self::UserAssigned,
            Self::SystemAssignedUserAssigned,
        ]
        .into_iter()
        .find(|t| t.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

/// Status document returned by an `Azure-AsyncOperation` URL.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct OperationStatus {
    #[serde(default)]
    pub(crate) status: String,
    #[serde(default)]
    pub(crate) error: Option<super::error::ErrorDetail>,
}
