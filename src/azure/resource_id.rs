//! Azure Resource Manager resource identifiers.
//!
//! An ARM ID is a `/`-separated list of key/value pairs:
//!
//! ```text
//! /subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}
//! ```
//!
//! [`ResourceId`] parses any such ID; [`SystemTopicId`] narrows it to an Event
//! Grid system topic and can format itself back.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ProviderError;

/// Resource provider namespace that owns system topics.
pub const EVENTGRID_NAMESPACE: &str = "Microsoft.EventGrid";

/// Path key of a system topic below the Event Grid namespace.
pub const SYSTEM_TOPICS_KEY: &str = "systemTopics";

/// A parsed ARM resource ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    /// Subscription the resource lives in.
    pub subscription_id: String,
    /// Resource group, absent for subscription-level IDs.
    pub resource_group: Option<String>,
    /// Resource provider namespace, e.g. `Microsoft.Storage`.
    pub provider: Option<String>,
    /// Remaining key/value segments in order, e.g. `[("storageAccounts", "sa1")]`.
    pub path: Vec<(String, String)>,
}

impl ResourceId {
    /// Parse an ARM resource ID.
    pub fn parse(input: &str) -> Result<Self, ProviderError> {
        let trimmed = input.trim_matches('/');
        if input.trim().is_empty() || trimmed.is_empty() {
            return Err(ProviderError::InvalidResourceId(
                "resource ID cannot be empty".to_string(),
            ));
        }
        if !input.starts_with('/') {
            return Err(invalid(input, "must start with '/'"));
        }

        let segments: Vec<&str> = trimmed.split('/').collect();
        if segments.len() % 2 != 0 {
            return Err(invalid(input, "the number of path segments is not divisible by 2"));
        }

        let mut subscription_id = None;
        let mut resource_group = None;
        let mut provider = None;
        let mut path = Vec::new();

        for pair in segments.chunks(2) {
            let (key, value) = (pair[0], pair[1]);
            if key.is_empty() || value.is_empty() {
                return Err(invalid(input, "contains an empty segment"));
            }
            if key.eq_ignore_ascii_case("subscriptions") && subscription_id.is_none() {
                subscription_id = Some(value.to_string());
            } else if key.eq_ignore_ascii_case("resourceGroups") && resource_group.is_none() {
                resource_group = Some(value.to_string());
            } else if key.eq_ignore_ascii_case("providers") && provider.is_none() {
                provider = Some(value.to_string());
            } else {
                path.push((key.to_string(), value.to_string()));
            }
        }

        let subscription_id =
            subscription_id.ok_or_else(|| invalid(input, "no subscription ID was found"))?;

        Ok(Self {
            subscription_id,
            resource_group,
            provider,
            path,
        })
    }
}

fn invalid(input: &str, reason: &str) -> ProviderError {
    ProviderError::InvalidResourceId(format!("{:?}: {}", input, reason))
}

/// The ID of an Event Grid system topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemTopicId {
    /// Subscription the topic lives in.
    pub subscription_id: String,
    /// Resource group containing the topic.
    pub resource_group: String,
    /// Topic name.
    pub name: String,
}

impl SystemTopicId {
    /// Create a new system topic ID.
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            name: name.into(),
        }
    }

    /// Parse a system topic ID, rejecting IDs of any other resource type.
    pub fn parse(input: &str) -> Result<Self, ProviderError> {
        let id = ResourceId::parse(input)?;

        let resource_group = id
            .resource_group
            .ok_or_else(|| invalid(input, "no resource group was found"))?;

        match id.provider.as_deref() {
            Some(ns) if ns.eq_ignore_ascii_case(EVENTGRID_NAMESPACE) => {},
            _ => {
                return Err(invalid(
                    input,
                    &format!("expected provider namespace {}", EVENTGRID_NAMESPACE),
                ))
            },
        }

        let name = match id.path.as_slice() {
            [(key, name)] if key == SYSTEM_TOPICS_KEY => name.clone(),
            _ => {
                return Err(invalid(
                    input,
                    &format!("expected a single {:?} segment", SYSTEM_TOPICS_KEY),
                ))
            },
        };

        Ok(Self {
            subscription_id: id.subscription_id,
            resource_group,
            name,
        })
    }
}

impl fmt::Display for SystemTopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}/providers/{}/{}/{}",
            self.subscription_id,
            self.resource_group,
            EVENTGRID_NAMESPACE,
            SYSTEM_TOPICS_KEY,
            self.name
        )
    }
}

/// Check a resource group name.
///
/// Names are 1-90 characters of letters, digits, underscores, hyphens,
/// periods and parentheses, and cannot end in a period.
pub fn validate_resource_group_name(name: &str) -> Result<(), String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"^[-\w._()]+$").expect("valid pattern"));

    if name.is_empty() {
        return Err("resource group name cannot be blank".to_string());
    }
    if name.chars().count() > 90 {
        return Err("resource group name can be at most 90 characters".to_string());
    }
    if !pattern.is_match(name) {
        return Err(
            "resource group name can only contain letters, digits, underscores, hyphens, periods and parentheses"
                .to_string(),
        );
    }
    if name.ends_with('.') {
        return Err("resource group name cannot end with a period".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STORAGE_ID: &str =
        "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/rg1/providers/Microsoft.Storage/storageAccounts/sa1";

    #[test]
    fn test_parse_resource_id() {
        let id = ResourceId::parse(STORAGE_ID).unwrap();
        assert_eq!(id.subscription_id, "00000000-0000-0000-0000-000000000000");
        assert_eq!(id.resource_group.as_deref(), Some("rg1"));
        assert_eq!(id.provider.as_deref(), Some("Microsoft.Storage"));
        assert_eq!(
            id.path,
            vec![("storageAccounts".to_string(), "sa1".to_string())]
        );
    }

    #[test]
    fn test_parse_subscription_and_resource_group_ids() {
        let id = ResourceId::parse("/subscriptions/x").unwrap();
        assert_eq!(id.subscription_id, "x");
        assert!(id.resource_group.is_none());

        let id = ResourceId::parse("/subscriptions/x/resourcegroups/rg1").unwrap();
        assert_eq!(id.resource_group.as_deref(), Some("rg1"));
    }

    #[test]
    fn test_parse_rejects_malformed_ids() {
        for input in [
            "",
            "   ",
            "/",
            "subscriptions/x",
            "/subscriptions",
            "/subscriptions/x/resourceGroups",
            "/subscriptions//resourceGroups/rg1",
            "/resourceGroups/rg1/providers/Microsoft.Storage",
        ] {
            let err = ResourceId::parse(input).unwrap_err();
            assert!(
                matches!(err, ProviderError::InvalidResourceId(_)),
                "{:?} gave {:?}",
                input,
                err
            );
        }
    }

    #[test]
    fn test_system_topic_id_round_trip() {
        let id = SystemTopicId::new("sub1", "rg1", "topic1");
        let formatted = id.to_string();
        assert_eq!(
            formatted,
            "/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.EventGrid/systemTopics/topic1"
        );
        assert_eq!(SystemTopicId::parse(&formatted).unwrap(), id);
    }

    #[test]
    fn test_system_topic_id_accepts_lowercase_namespace() {
        let id = SystemTopicId::parse(
            "/subscriptions/sub1/resourceGroups/rg1/providers/microsoft.eventgrid/systemTopics/topic1",
        )
        .unwrap();
        assert_eq!(id.name, "topic1");
    }

    #[test]
    fn test_system_topic_id_rejects_other_resources() {
        assert!(SystemTopicId::parse(STORAGE_ID).is_err());
        assert!(SystemTopicId::parse("/subscriptions/sub1/resourceGroups/rg1").is_err());
        assert!(SystemTopicId::parse(
            "/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.EventGrid/topics/t1"
        )
        .is_err());
        assert!(SystemTopicId::parse(
            "/subscriptions/sub1/providers/Microsoft.EventGrid/systemTopics/t1"
        )
        .is_err());
        assert!(SystemTopicId::parse(
            "/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.EventGrid/systemTopics/t1/eventSubscriptions/s1"
        )
        .is_err());
    }

    #[test]
    fn test_validate_resource_group_name() {
        assert!(validate_resource_group_name("rg1").is_ok());
        assert!(validate_resource_group_name("my_rg-(prod).1").is_ok());
        assert!(validate_resource_group_name("").is_err());
        assert!(validate_resource_group_name("rg.").is_err());
        assert!(validate_resource_group_name("rg/1").is_err());
        assert!(validate_resource_group_name(&"a".repeat(90)).is_ok());
        assert!(validate_resource_group_name(&"a".repeat(91)).is_err());
    }
}
