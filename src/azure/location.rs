//! Azure location normalisation.

/// Normalise an Azure location to its canonical short form.
///
/// `"West US"`, `"westus"` and `"WestUS"` all become `"westus"`.
pub fn normalize_location(location: &str) -> String {
    location
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Whether two locations name the same region.
pub fn locations_equal(a: &str, b: &str) -> bool {
    normalize_location(a) == normalize_location(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_location() {
        assert_eq!(normalize_location("West US"), "westus");
        assert_eq!(normalize_location("westus"), "westus");
        assert_eq!(normalize_location("UK South 2"), "uksouth2");
        assert_eq!(normalize_location("global"), "global");
    }

    #[test]
    fn test_locations_equal() {
        assert!(locations_equal("West Europe", "westeurope"));
        assert!(!locations_equal("West Europe", "northeurope"));
    }
}
