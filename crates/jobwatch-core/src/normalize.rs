//! Maps raw source extractions onto the canonical record shape.

use thiserror::Error;
use url::Url;

use crate::{JobDraft, RawListing, SourceId, UNKNOWN_COMPANY};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("listing from {source_id} has no title")]
    MissingTitle { source_id: SourceId },
    #[error("listing `{title}` from {source_id} has no link")]
    MissingHref { source_id: SourceId, title: String },
}

/// Source facts the normalizer needs besides the raw listing itself.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    pub source: SourceId,
    pub base_origin: &'a str,
    pub default_region: &'a str,
    pub posted_hint: &'a str,
    /// Configured locations, used to backfill a missing location from the listing text.
    pub known_locations: &'a [String],
}

pub fn normalize(
    raw: &RawListing,
    ctx: &NormalizeContext<'_>,
    keyword: &str,
) -> Result<JobDraft, NormalizationError> {
    let title = clean(raw.title_text.as_deref()).ok_or(NormalizationError::MissingTitle {
        source_id: ctx.source,
    })?;
    let href = raw
        .href_text
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| NormalizationError::MissingHref {
            source_id: ctx.source,
            title: title.clone(),
        })?;

    let description = clean(raw.extra_text.as_deref());
    let location = clean(raw.location_text.as_deref())
        .or_else(|| backfill_location(&title, description.as_deref(), ctx.known_locations))
        .unwrap_or_else(|| ctx.default_region.to_string());

    Ok(JobDraft {
        source: ctx.source,
        search_keyword: keyword.to_string(),
        url: resolve_url(href, ctx.base_origin),
        company: clean(raw.company_text.as_deref()).unwrap_or_else(|| UNKNOWN_COMPANY.to_string()),
        posted_date: clean(raw.posted_text.as_deref()).unwrap_or_else(|| ctx.posted_hint.to_string()),
        title,
        location,
        description,
    })
}

/// Turns a scraped href into an absolute URL.
///
/// Root-relative paths are joined onto `base_origin`, scheme-less hosts get `https://`,
/// anything already carrying a scheme and host passes through.
pub fn resolve_url(href: &str, base_origin: &str) -> String {
    let href = href.trim();
    if let Some(rest) = href.strip_prefix("//") {
        return format!("https://{rest}");
    }
    if href.starts_with('/') {
        return format!("{}{}", base_origin.trim_end_matches('/'), href);
    }
    match Url::parse(href) {
        Ok(parsed) if parsed.has_host() => href.to_string(),
        _ => format!("https://{href}"),
    }
}

fn clean(value: Option<&str>) -> Option<String> {
    let collapsed = value?.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn backfill_location(title: &str, description: Option<&str>, known: &[String]) -> Option<String> {
    let haystack = format!("{} {}", title, description.unwrap_or_default()).to_lowercase();
    known
        .iter()
        .find(|loc| haystack.contains(&loc.to_lowercase()))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://example.at";

    fn ctx(locations: &[String]) -> NormalizeContext<'_> {
        NormalizeContext {
            source: SourceId::JobsAt,
            base_origin: BASE,
            default_region: "Austria",
            posted_hint: "Today",
            known_locations: locations,
        }
    }

    fn raw(title: &str, href: &str) -> RawListing {
        RawListing {
            title_text: Some(title.to_string()),
            href_text: Some(href.to_string()),
            ..RawListing::default()
        }
    }

    #[test]
    fn root_relative_href_gets_source_origin() {
        assert_eq!(resolve_url("/jobs/123", BASE), "https://example.at/jobs/123");
        assert_eq!(resolve_url("/jobs/123", "https://example.at/"), "https://example.at/jobs/123");
    }

    #[test]
    fn schemeless_href_gets_https() {
        assert_eq!(resolve_url("example.at/jobs/123", BASE), "https://example.at/jobs/123");
        assert_eq!(resolve_url("//cdn.example.at/j/9", BASE), "https://cdn.example.at/j/9");
    }

    #[test]
    fn absolute_href_passes_through() {
        let href = "http://at.indeed.com/viewjob?jk=abc&from=serp";
        assert_eq!(resolve_url(href, BASE), href);
    }

    #[test]
    fn collapses_whitespace_and_applies_sentinels() {
        let listing = RawListing {
            title_text: Some("  Junior\n   Data   Engineer ".into()),
            company_text: Some("   ".into()),
            href_text: Some(" /jobs/7 ".into()),
            ..RawListing::default()
        };
        let draft = normalize(&listing, &ctx(&[]), "data engineer").unwrap();
        assert_eq!(draft.title, "Junior Data Engineer");
        assert_eq!(draft.company, UNKNOWN_COMPANY);
        assert_eq!(draft.location, "Austria");
        assert_eq!(draft.posted_date, "Today");
        assert_eq!(draft.url, "https://example.at/jobs/7");
        assert_eq!(draft.search_keyword, "data engineer");
    }

    #[test]
    fn missing_location_is_backfilled_from_known_locations() {
        let locations = vec!["Graz".to_string(), "Linz".to_string()];
        let mut listing = raw("Process Engineer", "/jobs/1");
        listing.extra_text = Some("Production site near LINZ, shift work".into());
        let draft = normalize(&listing, &ctx(&locations), "process engineer").unwrap();
        assert_eq!(draft.location, "Linz");
    }

    #[test]
    fn empty_title_or_href_is_rejected() {
        let err = normalize(&raw(" \n ", "/jobs/1"), &ctx(&[]), "iot").unwrap_err();
        assert_eq!(err, NormalizationError::MissingTitle { source_id: SourceId::JobsAt });

        let mut no_href = raw("IoT Developer", "");
        assert!(matches!(
            normalize(&no_href, &ctx(&[]), "iot"),
            Err(NormalizationError::MissingHref { .. })
        ));
        no_href.href_text = None;
        assert!(normalize(&no_href, &ctx(&[]), "iot").is_err());
    }
}
