//! Capability tag normalization and matching
//!
//! Host capabilities and job requirements both pass through
//! [`normalize_capabilities`]; there is no other path into a
//! [`CapabilitySet`] on the coordinator.

use std::collections::BTreeSet;

/// Ordered, deduplicated set of capability tags
pub type CapabilitySet = BTreeSet<String>;

/// Normalize raw tags: trim, lowercase, drop blanks, dedupe, sort
pub fn normalize_capabilities<I, S>(tags: I) -> CapabilitySet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|tag| tag.as_ref().trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Check that every required tag is offered
pub fn has_capabilities(offered: &CapabilitySet, required: &CapabilitySet) -> bool {
    required.is_subset(offered)
}
