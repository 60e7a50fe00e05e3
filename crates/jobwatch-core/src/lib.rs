//! Core domain model for jobwatch: listings, records, search profile and cycle results.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod filter;
pub mod normalize;

pub use filter::{KeywordFilter, MAX_MATCHED_KEYWORDS};
pub use normalize::{normalize, resolve_url, NormalizationError, NormalizeContext};

pub const CRATE_NAME: &str = "jobwatch-core";

/// Company sentinel used when a listing does not name its employer.
pub const UNKNOWN_COMPANY: &str = "Unknown Company";

/// Job sites with a registered adapter.
///
/// Declaration order is the default polling priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceId {
    JobsAt,
    KarriereAt,
    IndeedAt,
    Linkedin,
}

impl SourceId {
    pub const ALL: [SourceId; 4] = [
        SourceId::JobsAt,
        SourceId::KarriereAt,
        SourceId::IndeedAt,
        SourceId::Linkedin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceId::JobsAt => "jobs-at",
            SourceId::KarriereAt => "karriere-at",
            SourceId::IndeedAt => "indeed-at",
            SourceId::Linkedin => "linkedin",
        }
    }

    /// Human-facing site name used in notifications.
    pub fn display_name(self) -> &'static str {
        match self {
            SourceId::JobsAt => "jobs.at",
            SourceId::KarriereAt => "karriere.at",
            SourceId::IndeedAt => "indeed.at",
            SourceId::Linkedin => "linkedin.com",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown source `{0}`")]
pub struct UnknownSource(pub String);

impl FromStr for SourceId {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        SourceId::ALL
            .into_iter()
            .find(|id| id.as_str() == wanted || id.display_name() == wanted)
            .ok_or_else(|| UnknownSource(s.to_string()))
    }
}

/// Loosely-typed extraction of a single listing from a source page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawListing {
    pub title_text: Option<String>,
    pub company_text: Option<String>,
    pub location_text: Option<String>,
    pub href_text: Option<String>,
    pub posted_text: Option<String>,
    pub extra_text: Option<String>,
}

/// Normalized listing that has not been through the dedup store yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDraft {
    pub source: SourceId,
    pub search_keyword: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub url: String,
    pub posted_date: String,
    pub description: Option<String>,
}

impl JobDraft {
    /// Stamps the draft at insertion time.
    pub fn into_record(self, matched_keywords: Vec<String>, found_at: DateTime<Utc>) -> JobRecord {
        JobRecord {
            title: self.title,
            company: self.company,
            location: self.location,
            url: self.url,
            source: self.source,
            posted_date: self.posted_date,
            matched_keywords,
            found_at,
        }
    }
}

/// Canonical unit of output. `url` is the identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub title: String,
    pub company: String,
    pub location: String,
    pub url: String,
    pub source: SourceId,
    pub posted_date: String,
    pub matched_keywords: Vec<String>,
    pub found_at: DateTime<Utc>,
}

/// Keyword/location profile a deployment searches for. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SearchProfile {
    keywords: Vec<String>,
    locations: Vec<String>,
    exclude_keywords: Vec<String>,
}

impl SearchProfile {
    /// Builds a profile, dropping blank entries and case-insensitive repeats while
    /// keeping the first occurrence in place.
    pub fn new(
        keywords: impl IntoIterator<Item = String>,
        locations: impl IntoIterator<Item = String>,
        exclude_keywords: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            keywords: ordered_set(keywords),
            locations: ordered_set(locations),
            exclude_keywords: ordered_set(exclude_keywords),
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn locations(&self) -> &[String] {
        &self.locations
    }

    pub fn exclude_keywords(&self) -> &[String] {
        &self.exclude_keywords
    }
}

fn ordered_set(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .filter(|v| seen.insert(v.to_lowercase()))
        .collect()
}

/// How a finished poll cycle ended. A cycle in flight is only visible as the
/// pending `run_cycle` future.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Completed,
    PartiallyFailed,
}

/// Per-source bookkeeping for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceTally {
    pub keywords_attempted: usize,
    pub listings_seen: usize,
    pub new_records: usize,
    pub errors: usize,
    pub excluded: usize,
    pub already_seen: usize,
    pub invalid: usize,
    pub store_failures: usize,
    pub rate_limited: bool,
}

/// Outcome of one full pass over all sources and keywords.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleResult {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: CycleState,
    pub interrupted: bool,
    pub per_source_counts: BTreeMap<SourceId, usize>,
    pub tallies: BTreeMap<SourceId, SourceTally>,
    pub records: Vec<JobRecord>,
}

impl CycleResult {
    pub fn total_new(&self) -> usize {
        self.records.len()
    }

    pub fn total_errors(&self) -> usize {
        self.tallies.values().map(|t| t.errors).sum()
    }

    /// Records grouped by source, preserving the order sources were polled in.
    pub fn records_by_source(&self) -> Vec<(SourceId, Vec<&JobRecord>)> {
        let mut groups: Vec<(SourceId, Vec<&JobRecord>)> = Vec::new();
        for record in &self.records {
            match groups.iter_mut().find(|(source, _)| *source == record.source) {
                Some((_, items)) => items.push(record),
                None => groups.push((record.source, vec![record])),
            }
        }
        groups
    }
}
