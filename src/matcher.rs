//! Predicate deciding which ways seed the extraction.

use crate::model::Tags;

/// Selects the ways whose surroundings get extracted.
pub trait WayMatcher: Sync {
    fn matches(&self, tags: &Tags) -> bool;
}

/// Matches ways carrying one fixed `key=value` tag.
pub struct TagMatcher {
    key: String,
    value: String,
}

impl TagMatcher {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn golf_courses() -> Self {
        Self::new("leisure", "golf_course")
    }
}

impl WayMatcher for TagMatcher {
    fn matches(&self, tags: &Tags) -> bool {
        tags.iter().any(|(k, v)| *k == self.key && *v == self.value)
    }
}
