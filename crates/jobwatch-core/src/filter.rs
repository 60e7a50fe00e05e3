//! Exclusion and keyword-match rules over listing text.

use crate::SearchProfile;

/// Upper bound on keywords attached to a single record.
pub const MAX_MATCHED_KEYWORDS: usize = 3;

#[derive(Debug, Clone)]
pub struct KeywordFilter {
    keywords: Vec<(String, String)>,
    excludes: Vec<String>,
}

impl KeywordFilter {
    pub fn new(profile: &SearchProfile) -> Self {
        Self {
            keywords: profile
                .keywords()
                .iter()
                .map(|k| (k.clone(), k.to_lowercase()))
                .collect(),
            excludes: profile
                .exclude_keywords()
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
        }
    }

    /// True when any exclude keyword appears anywhere in the listing text.
    pub fn is_excluded(&self, title: &str, description: Option<&str>) -> bool {
        let text = haystack(title, description);
        self.excludes.iter().any(|needle| text.contains(needle))
    }

    /// Configured keywords present in the listing text, in configured order, capped.
    pub fn matched_keywords(&self, title: &str, description: Option<&str>) -> Vec<String> {
        let text = haystack(title, description);
        self.keywords
            .iter()
            .filter(|(_, lower)| text.contains(lower.as_str()))
            .map(|(original, _)| original.clone())
            .take(MAX_MATCHED_KEYWORDS)
            .collect()
    }
}

fn haystack(title: &str, description: Option<&str>) -> String {
    format!("{} {}", title, description.unwrap_or_default()).to_lowercase()
}
