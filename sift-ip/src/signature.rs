//! Filter signature computation
//!
//! A filter signature is the canonical string form of a set of filter
//! descriptors, used as the per-image sub-key in the result cache and for
//! subscription matching. Two filter sets that normalize to the same
//! signature are cache-equivalent.
//!
//! Normalization rules:
//! - empty descriptors are skipped
//! - descriptors with the custom prefix are passed through verbatim
//! - all other descriptors are given a trailing period and lower-cased
//! - the normalized set is sorted and joined with a single space
//!
//! The result is a pure, deterministic function of the input set,
//! independent of element order.

/// Reserved prefix marking a session-specific filter descriptor
///
/// Custom descriptors are exempt from normalization and subject to looser
/// subscription-matching rules.
pub const CUSTOM_PREFIX: &str = "custom_";

/// Compute the canonical signature for a set of filter descriptors
pub fn filter_signature(filters: &[String]) -> String {
    let mut formatted: Vec<String> = filters
        .iter()
        .filter(|f| !f.is_empty())
        .map(|f| {
            if f.starts_with(CUSTOM_PREFIX) {
                f.clone()
            } else {
                let mut s = f.clone();
                if !s.ends_with('.') {
                    s.push('.');
                }
                s.to_lowercase()
            }
        })
        .collect();

    formatted.sort();
    formatted.join(" ")
}

/// True if any descriptor in the set carries the custom prefix
pub fn has_custom_filter(filters: &[String]) -> bool {
    filters.iter().any(|f| f.starts_with(CUSTOM_PREFIX))
}

/// Normalize a filter set for subscription matching
///
/// Matching normalization differs from signature normalization: trailing
/// periods are stripped rather than added, so `"Dogs."` and `"dogs"`
/// compare equal. Returns the sorted normalized set.
pub fn normalize_for_match(filters: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = filters
        .iter()
        .map(|f| f.to_lowercase().trim_end_matches('.').to_string())
        .collect();
    normalized.sort();
    normalized
}

/// Extract the intervention-type fragment from a custom descriptor
///
/// Custom descriptors have the shape `custom_<type>_<detail...>`; the
/// second underscore-separated segment names the intervention type
/// (e.g. `"cartoonish"` from `"custom_cartoonish_f3a1"`). Returns `None`
/// for descriptors without one.
pub fn custom_intervention_type(descriptor: &str) -> Option<&str> {
    let mut parts = descriptor.split('_');
    match (parts.next(), parts.next()) {
        (Some("custom"), Some(kind)) if !kind.is_empty() => Some(kind),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(filters: &[&str]) -> String {
        filter_signature(&filters.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn signature_is_order_independent() {
        assert_eq!(sig(&["dogs", "cats"]), sig(&["cats", "dogs"]));
    }

    #[test]
    fn signature_normalizes_case_and_trailing_period() {
        assert_eq!(sig(&["Dogs"]), "dogs.");
        assert_eq!(sig(&["dogs."]), "dogs.");
        assert_eq!(sig(&["DOGS."]), sig(&["dogs"]));
    }

    #[test]
    fn signature_joins_sorted_with_single_space() {
        assert_eq!(sig(&["spiders", "blood"]), "blood. spiders.");
    }

    #[test]
    fn custom_descriptors_pass_through_verbatim() {
        assert_eq!(sig(&["custom_Cartoonish_AB12"]), "custom_Cartoonish_AB12");
        // No trailing period added, no lowercasing
        assert_ne!(sig(&["custom_X"]), "custom_x.");
    }

    #[test]
    fn empty_descriptors_are_skipped() {
        assert_eq!(sig(&["", "dogs", ""]), "dogs.");
        assert_eq!(sig(&[]), "");
        assert_eq!(sig(&["", ""]), "");
    }

    #[test]
    fn match_normalization_strips_trailing_periods() {
        let a = normalize_for_match(&["Dogs.".to_string(), "CATS".to_string()]);
        let b = normalize_for_match(&["cats.".to_string(), "dogs".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn custom_type_fragment_extraction() {
        assert_eq!(
            custom_intervention_type("custom_cartoonish_f3a1"),
            Some("cartoonish")
        );
        assert_eq!(custom_intervention_type("custom_blur"), Some("blur"));
        assert_eq!(custom_intervention_type("dogs."), None);
        assert_eq!(custom_intervention_type("custom_"), None);
    }

    #[test]
    fn has_custom_filter_detects_prefix() {
        assert!(has_custom_filter(&["custom_blur_1".to_string()]));
        assert!(!has_custom_filter(&["dogs.".to_string()]));
    }
}
