//! Plain Rust counterparts of the protocol messages a provider returns.

use serde::{Deserialize, Serialize};

use crate::generated as proto;

/// The protocol version announced in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// First field of the handshake line.
pub const HANDSHAKE_PREFIX: &str = "HEMMER_PROVIDER";

/// A change to one top-level attribute in a plan.
///
/// `before` is `None` for an added attribute and `after` is `None` for a
/// removed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Attribute name.
    pub path: String,
    /// Prior value.
    pub before: Option<serde_json::Value>,
    /// Planned value.
    pub after: Option<serde_json::Value>,
}

impl AttributeChange {
    /// An attribute that is being set.
    pub fn added(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            path: path.into(),
            before: None,
            after: Some(value),
        }
    }

    /// An attribute that is going away.
    pub fn removed(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            path: path.into(),
            before: Some(value),
            after: None,
        }
    }

    /// An attribute whose value changes.
    pub fn modified(
        path: impl Into<String>,
        before: serde_json::Value,
        after: serde_json::Value,
    ) -> Self {
        Self {
            path: path.into(),
            before: Some(before),
            after: Some(after),
        }
    }
}

fn json_bytes(value: Option<serde_json::Value>) -> Vec<u8> {
    value
        .and_then(|v| serde_json::to_vec(&v).ok())
        .unwrap_or_default()
}

impl From<AttributeChange> for proto::AttributeChange {
    fn from(change: AttributeChange) -> Self {
        Self {
            path: change.path,
            before: json_bytes(change.before),
            after: json_bytes(change.after),
        }
    }
}

/// Outcome of planning one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// State the resource will have once applied; null for a delete.
    pub planned_state: serde_json::Value,
    /// Attribute changes, in report order.
    pub changes: Vec<AttributeChange>,
    /// Whether the change can only be made by destroying and recreating.
    pub requires_replace: bool,
}

impl PlanResult {
    /// Nothing to do.
    pub fn no_change(state: serde_json::Value) -> Self {
        Self {
            planned_state: state,
            changes: Vec::new(),
            requires_replace: false,
        }
    }

    /// A plan with changes.
    pub fn with_changes(
        planned_state: serde_json::Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }
}

/// A resource produced by an import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// Resource type name.
    pub resource_type: String,
    /// Full state as a read would return it.
    pub state: serde_json::Value,
}

impl ImportedResource {
    /// Wrap an imported state.
    pub fn new(resource_type: impl Into<String>, state: serde_json::Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

impl From<ImportedResource> for proto::ImportedResource {
    fn from(imported: ImportedResource) -> Self {
        Self {
            resource_type: imported.resource_type,
            state: json_bytes(Some(imported.state)),
        }
    }
}

/// Answer to `GetMetadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// Resource type names.
    pub resources: Vec<String>,
    /// Data source type names.
    pub data_sources: Vec<String>,
    /// Optional protocol features.
    pub capabilities: ServerCapabilities,
}

/// Optional protocol features a provider supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    /// The host may call `Plan` with a null proposed state.
    pub plan_destroy: bool,
}
