//! Plan computation for system topics.

use serde_json::Value;

use super::{identity, resource_schema, SystemTopicState};
use crate::azure::location::{locations_equal, normalize_location};
use crate::error::ProviderError;
use crate::types::{AttributeChange, PlanResult};

/// Attributes compared when planning, in report order.
const PLANNED_ATTRIBUTES: &[&str] = &[
    "name",
    "location",
    "resource_group_name",
    "source_arm_resource_id",
    "topic_type",
    "tags",
    "identity",
    "timeouts",
];

/// Attributes only the server sets.
const COMPUTED_ATTRIBUTES: &[&str] = &["id", "metric_arm_resource_id"];

/// Plan the transition from `prior` to `proposed`.
///
/// A null `proposed` plans a delete and a missing `prior` plans a create.
pub fn plan(prior: Option<Value>, proposed: Value) -> Result<PlanResult, ProviderError> {
    let prior = prior.filter(|v| !v.is_null());
    match (prior, proposed) {
        (None, Value::Null) => Ok(PlanResult::no_change(Value::Null)),
        (Some(prior), Value::Null) => plan_delete(&prior),
        (None, proposed) => plan_create(SystemTopicState::from_value(proposed)?),
        (Some(prior), proposed) => plan_update(
            &SystemTopicState::from_value(prior)?,
            SystemTopicState::from_value(proposed)?,
        ),
    }
}

fn plan_create(mut planned: SystemTopicState) -> Result<PlanResult, ProviderError> {
    planned.id = None;
    planned.metric_arm_resource_id = None;
    planned.location = normalize_location(&planned.location);
    for block in &mut planned.identity {
        block.principal_id.clear();
        block.tenant_id.clear();
    }

    let after = planned.to_value()?;
    let changes = PLANNED_ATTRIBUTES
        .iter()
        .filter_map(|name| {
            after
                .get(*name)
                .filter(|v| is_set(v))
                .map(|v| AttributeChange::added(*name, v.clone()))
        })
        .collect();

    Ok(PlanResult::with_changes(after, changes, false))
}

fn plan_update(
    prior: &SystemTopicState,
    mut planned: SystemTopicState,
) -> Result<PlanResult, ProviderError> {
    planned.id = prior.id.clone();
    planned.metric_arm_resource_id = prior.metric_arm_resource_id.clone();

    if locations_equal(&prior.location, &planned.location) {
        planned.location = prior.location.clone();
    } else {
        planned.location = normalize_location(&planned.location);
    }

    if identity::types_equal(&prior.identity, &planned.identity) {
        planned.identity = prior.identity.clone();
    } else {
        for block in &mut planned.identity {
            block.principal_id.clear();
            block.tenant_id.clear();
        }
    }

    let before = prior.to_value()?;
    let after = planned.to_value()?;
    let changes: Vec<AttributeChange> = PLANNED_ATTRIBUTES
        .iter()
        .filter_map(|name| {
            let old = before.get(*name).cloned().unwrap_or(Value::Null);
            let new = after.get(*name).cloned().unwrap_or(Value::Null);
            if old == new || (!is_set(&old) && !is_set(&new)) {
                None
            } else {
                Some(AttributeChange::modified(*name, old, new))
            }
        })
        .collect();

    if changes.is_empty() {
        return Ok(PlanResult::no_change(after));
    }

    let schema = resource_schema();
    let force_new = schema.force_new_attributes();
    let requires_replace = changes
        .iter()
        .any(|change| force_new.contains(&change.path.as_str()));

    Ok(PlanResult::with_changes(after, changes, requires_replace))
}

fn plan_delete(prior: &Value) -> Result<PlanResult, ProviderError> {
    let changes = COMPUTED_ATTRIBUTES
        .iter()
        .chain(PLANNED_ATTRIBUTES)
        .filter_map(|name| {
            prior
                .get(*name)
                .filter(|v| is_set(v))
                .map(|v| AttributeChange::removed(*name, v.clone()))
        })
        .collect();
    Ok(PlanResult::with_changes(Value::Null, changes, false))
}

fn is_set(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn proposed() -> Value {
        json!({
            "name": "topic1",
            "location": "West US",
            "resource_group_name": "rg1",
            "source_arm_resource_id": "/subscriptions/x/resourceGroups/rg1/providers/Microsoft.Storage/storageAccounts/sa1",
            "topic_type": "Microsoft.Storage.StorageAccounts",
            "tags": {"env": "prod"}
        })
    }

    fn prior() -> Value {
        json!({
            "id": "/subscriptions/x/resourceGroups/rg1/providers/Microsoft.EventGrid/systemTopics/topic1",
            "name": "topic1",
            "location": "westus",
            "resource_group_name": "rg1",
            "source_arm_resource_id": "/subscriptions/x/resourceGroups/rg1/providers/Microsoft.Storage/storageAccounts/sa1",
            "topic_type": "Microsoft.Storage.StorageAccounts",
            "metric_arm_resource_id": "metric-1",
            "identity": [],
            "tags": {"env": "prod"}
        })
    }

    fn paths(plan: &PlanResult) -> Vec<&str> {
        plan.changes.iter().map(|c| c.path.as_str()).collect()
    }

    #[test]
    fn test_plan_create() {
        let mut value = proposed();
        value["id"] = json!("bogus");
        value["identity"] = json!([{"type": "SystemAssigned", "principal_id": "stale"}]);

        let plan = plan(None, value).unwrap();
        assert!(!plan.requires_replace);
        assert_eq!(plan.planned_state["id"], Value::Null);
        assert_eq!(plan.planned_state["metric_arm_resource_id"], Value::Null);
        assert_eq!(plan.planned_state["location"], "westus");
        assert_eq!(plan.planned_state["identity"][0]["principal_id"], "");
        assert_eq!(
            paths(&plan),
            vec![
                "name",
                "location",
                "resource_group_name",
                "source_arm_resource_id",
                "topic_type",
                "tags",
                "identity"
            ]
        );
        assert!(plan.changes.iter().all(|c| c.before.is_none()));
    }

    #[test]
    fn test_plan_no_change_when_location_spelled_differently() {
        let plan = plan(Some(prior()), proposed()).unwrap();
        assert!(plan.changes.is_empty());
        assert!(!plan.requires_replace);
        assert_eq!(plan.planned_state["location"], "westus");
        assert_eq!(plan.planned_state["metric_arm_resource_id"], "metric-1");
        assert_eq!(plan.planned_state["id"], prior()["id"]);
    }

    #[test]
    fn test_plan_tags_update_in_place() {
        let mut value = proposed();
        value["tags"] = json!({"env": "dev"});
        let plan = plan(Some(prior()), value).unwrap();
        assert_eq!(paths(&plan), vec!["tags"]);
        assert!(!plan.requires_replace);
    }

    #[test]
    fn test_plan_force_new_change_requires_replace() {
        let mut value = proposed();
        value["topic_type"] = json!("Microsoft.Web.Sites");
        value["location"] = json!("East US");
        let plan = plan(Some(prior()), value).unwrap();
        assert_eq!(paths(&plan), vec!["location", "topic_type"]);
        assert!(plan.requires_replace);
        assert_eq!(plan.planned_state["location"], "eastus");
    }

    #[test]
    fn test_plan_identity_case_insensitive() {
        let mut before = prior();
        before["identity"] = json!([{"type": "SystemAssigned", "principal_id": "p1", "tenant_id": "t1"}]);
        let mut value = proposed();
        value["identity"] = json!([{"type": "systemassigned"}]);

        let plan = plan(Some(before), value).unwrap();
        assert!(plan.changes.is_empty());
        assert_eq!(plan.planned_state["identity"][0]["principal_id"], "p1");
    }

    #[test]
    fn test_plan_identity_removed() {
        let mut before = prior();
        before["identity"] = json!([{"type": "SystemAssigned", "principal_id": "p1", "tenant_id": "t1"}]);

        let plan = plan(Some(before), proposed()).unwrap();
        assert_eq!(paths(&plan), vec!["identity"]);
        assert!(!plan.requires_replace);
        assert_eq!(plan.planned_state["identity"], json!([]));
    }

    #[test]
    fn test_plan_delete() {
        let plan = plan(Some(prior()), Value::Null).unwrap();
        assert_eq!(plan.planned_state, Value::Null);
        assert!(plan.changes.iter().all(|c| c.after.is_none()));
        assert_eq!(
            paths(&plan),
            vec![
                "id",
                "metric_arm_resource_id",
                "name",
                "location",
                "resource_group_name",
                "source_arm_resource_id",
                "topic_type",
                "tags"
            ]
        );
    }

    #[test]
    fn test_plan_nothing() {
        let plan = plan(Some(Value::Null), Value::Null).unwrap();
        assert!(plan.changes.is_empty());
        assert_eq!(plan.planned_state, Value::Null);
    }
}
