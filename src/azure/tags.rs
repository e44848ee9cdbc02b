//! Resource tags.
//!
//! Tags are a flat string-to-string map on both sides, so expansion and
//! flattening only have to deal with absence. The limits enforced by
//! [`validate`] are the ones ARM applies server-side.

use std::collections::BTreeMap;

/// Maximum number of tags on one resource.
pub const MAX_TAGS: usize = 50;

/// Maximum length of a tag key.
pub const MAX_KEY_LENGTH: usize = 512;

/// Maximum length of a tag value.
pub const MAX_VALUE_LENGTH: usize = 256;

/// Convert configured tags into the request representation.
///
/// An empty map is still sent so that removing the last tag clears it remotely.
pub fn expand(tags: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    Some(tags.clone())
}

/// Convert remote tags back into state; absent tags become an empty map.
pub fn flatten(tags: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
    tags.cloned().unwrap_or_default()
}

/// Check tags against ARM limits, returning one message per violation.
pub fn validate(tags: &BTreeMap<String, String>) -> Vec<String> {
    let mut errors = Vec::new();

    if tags.len() > MAX_TAGS {
        errors.push(format!(
            "a maximum of {} tags can be applied to each resource, got {}",
            MAX_TAGS,
            tags.len()
        ));
    }

    for (key, value) in tags {
        if key.chars().count() > MAX_KEY_LENGTH {
            errors.push(format!(
                "the maximum length for a tag key is {} characters: {:?} is {} characters",
                MAX_KEY_LENGTH,
                key,
                key.chars().count()
            ));
        }
        if value.chars().count() > MAX_VALUE_LENGTH {
            errors.push(format!(
                "the maximum length for a tag value is {} characters: the value for {:?} is {} characters",
                MAX_VALUE_LENGTH,
                key,
                value.chars().count()
            ));
        }
    }

    errors
}
