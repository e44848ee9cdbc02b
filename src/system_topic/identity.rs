//! Managed identity conversion.

use super::IdentityBlock;
use crate::azure::{IdentityInfo, ManagedIdentityType};

/// Build the request identity from the configured block.
///
/// No identity, or one without a type, is sent as an explicit `None` type so
/// that removing the block turns the identity off remotely.
pub fn expand(blocks: &[IdentityBlock]) -> IdentityInfo {
    let identity_type = blocks
        .first()
        .map(|b| b.identity_type.trim())
        .filter(|t| !t.is_empty())
        .and_then(ManagedIdentityType::parse)
        .unwrap_or(ManagedIdentityType::None);

    IdentityInfo {
        identity_type: Some(identity_type),
        principal_id: None,
        tenant_id: None,
    }
}

/// Turn the remote identity into state.
///
/// Only `SystemAssigned` can be configured, so only it is recorded. Any other
/// remote kind, including `None`, becomes an empty list, never a single entry
/// with blank fields or a type the schema rejects.
pub fn flatten(identity: Option<&IdentityInfo>) -> Vec<IdentityBlock> {
    match identity {
        Some(identity) if identity.identity_type == Some(ManagedIdentityType::SystemAssigned) => {
            vec![IdentityBlock {
                identity_type: ManagedIdentityType::SystemAssigned.as_str().to_string(),
                principal_id: identity.principal_id.clone().unwrap_or_default(),
                tenant_id: identity.tenant_id.clone().unwrap_or_default(),
            }]
        },
        _ => Vec::new(),
    }
}

/// Whether two configured identity types mean the same thing.
pub fn types_equal(a: &[IdentityBlock], b: &[IdentityBlock]) -> bool {
    expand(a).identity_type == expand(b).identity_type
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(identity_type: &str) -> IdentityBlock {
        IdentityBlock {
            identity_type: identity_type.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_expand_absent_is_none() {
        assert_eq!(expand(&[]).identity_type, Some(ManagedIdentityType::None));
        assert_eq!(expand(&[block("")]).identity_type, Some(ManagedIdentityType::None));
    }

    #[test]
    fn test_expand_system_assigned() {
        let identity = expand(&[block("systemAssigned")]);
        assert_eq!(identity.identity_type, Some(ManagedIdentityType::SystemAssigned));
        assert!(identity.principal_id.is_none());
        assert!(identity.tenant_id.is_none());
    }

    #[test]
    fn test_flatten_none() {
        assert!(flatten(None).is_empty());
        assert!(flatten(Some(&IdentityInfo::default())).is_empty());
        assert!(flatten(Some(&IdentityInfo {
            identity_type: Some(ManagedIdentityType::None),
            principal_id: Some("ignored".into()),
            tenant_id: None,
        }))
        .is_empty());
    }

    #[test]
    fn test_flatten_system_assigned() {
        let flattened = flatten(Some(&IdentityInfo {
            identity_type: Some(ManagedIdentityType::SystemAssigned),
            principal_id: Some("p1".into()),
            tenant_id: Some("t1".into()),
        }));
        assert_eq!(
            flattened,
            vec![IdentityBlock {
                identity_type: "SystemAssigned".into(),
                principal_id: "p1".into(),
                tenant_id: "t1".into(),
            }]
        );
    }

    #[test]
    fn test_flatten_skips_kinds_that_cannot_be_configured() {
        for identity_type in [
            ManagedIdentityType::UserAssigned,
            ManagedIdentityType::SystemAssignedUserAssigned,
            ManagedIdentityType::Unknown,
        ] {
            let flattened = flatten(Some(&IdentityInfo {
                identity_type: Some(identity_type),
                principal_id: Some("p1".into()),
                tenant_id: Some("t1".into()),
            }));
            assert!(flattened.is_empty(), "{:?} should not be recorded", identity_type);
        }
    }

    #[test]
    fn test_flatten_pending_ids_are_blank() {
        let flattened = flatten(Some(&IdentityInfo {
            identity_type: Some(ManagedIdentityType::SystemAssigned),
            principal_id: None,
            tenant_id: None,
        }));
        assert_eq!(flattened[0].principal_id, "");
        assert_eq!(flattened[0].tenant_id, "");
    }

    #[test]
    fn test_types_equal_ignores_case() {
        assert!(types_equal(&[block("SystemAssigned")], &[block("systemassigned")]));
        assert!(types_equal(&[], &[block("None")]));
        assert!(!types_equal(&[], &[block("SystemAssigned")]));
    }
}
