//! Source adapter contract and the per-site HTML listing adapters.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use jobwatch_core::{RawListing, SourceId};
use jobwatch_storage::{FetchError, HttpFetcher};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "jobwatch-adapters";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    Timeout,
    Network,
    HttpStatus(u16),
    ParseFailure,
}

impl fmt::Display for SourceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceErrorKind::Timeout => f.write_str("timeout"),
            SourceErrorKind::Network => f.write_str("network"),
            SourceErrorKind::HttpStatus(status) => write!(f, "http {status}"),
            SourceErrorKind::ParseFailure => f.write_str("parse failure"),
        }
    }
}

/// Failure of one `search` call. Always recoverable at the cycle level.
#[derive(Debug, Error)]
#[error("{source_id} search for `{keyword}` failed ({kind}): {message}")]
pub struct SourceError {
    pub kind: SourceErrorKind,
    pub source_id: SourceId,
    pub keyword: String,
    pub message: String,
}

impl SourceError {
    pub fn new(
        kind: SourceErrorKind,
        source_id: SourceId,
        keyword: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            source_id,
            keyword: keyword.to_string(),
            message: message.into(),
        }
    }

    pub fn from_fetch(source_id: SourceId, keyword: &str, err: FetchError) -> Self {
        let kind = match &err {
            FetchError::Timeout { .. } => SourceErrorKind::Timeout,
            FetchError::HttpStatus { status, .. } => SourceErrorKind::HttpStatus(*status),
            FetchError::Request(_) => SourceErrorKind::Network,
        };
        Self::new(kind, source_id, keyword, err.to_string())
    }

    /// The site answered 429; further calls this cycle would only make it worse.
    pub fn is_rate_limited(&self) -> bool {
        self.kind == SourceErrorKind::HttpStatus(429)
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid selector `{selector}`: {message}")]
    Selector { selector: String, message: String },
}

/// Per-call knobs supplied by configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    pub results_per_keyword: usize,
    pub region: String,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            results_per_keyword: 2,
            region: "Austria".to_string(),
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> SourceId;

    /// Scheme and host that root-relative links on this site resolve against.
    fn base_origin(&self) -> &str;

    /// Posting date reported when the page does not carry one.
    fn posted_hint(&self) -> &str {
        "Recent"
    }

    fn search_url(&self, keyword: &str, region: &str) -> String;

    fn request_headers(&self) -> &[(&'static str, &'static str)] {
        &[]
    }

    /// Extracts listings from a search results page. Items missing fields are still
    /// returned; dropping them is the normalizer's call.
    fn parse(&self, html: &str) -> Result<Vec<RawListing>, AdapterError>;

    async fn search(
        &self,
        http: &HttpFetcher,
        keyword: &str,
        options: &SearchOptions,
    ) -> Result<Vec<RawListing>, SourceError> {
        let source_id = self.source_id();
        let url = self.search_url(keyword, &options.region);
        let page = http
            .fetch_text(source_id.as_str(), &url, self.request_headers())
            .await
            .map_err(|e| SourceError::from_fetch(source_id, keyword, e))?;

        let mut listings = self.parse(&page.body).map_err(|e| {
            SourceError::new(SourceErrorKind::ParseFailure, source_id, keyword, e.to_string())
        })?;
        debug!(
            source = %source_id,
            keyword,
            status = %page.status,
            final_url = %page.final_url,
            parsed = listings.len(),
            "parsed search page"
        );
        listings.truncate(options.results_per_keyword);
        Ok(listings)
    }
}

/// Selector fallbacks for one site. For each field the first selector yielding a
/// non-empty value wins.
#[derive(Debug)]
pub struct SiteSelectors {
    pub item: &'static [&'static str],
    pub title: &'static [&'static str],
    pub link: &'static [&'static str],
    pub company: &'static [&'static str],
    pub location: &'static [&'static str],
    pub posted: &'static [&'static str],
    pub extra: &'static [&'static str],
}

#[derive(Clone, Copy)]
struct HtmlListingAdapter {
    source_id: SourceId,
    base_origin: &'static str,
    posted_hint: &'static str,
    search_url: fn(&str, &str) -> String,
    headers: &'static [(&'static str, &'static str)],
    selectors: &'static SiteSelectors,
}

#[async_trait]
impl SourceAdapter for HtmlListingAdapter {
    fn source_id(&self) -> SourceId {
        self.source_id
    }

    fn base_origin(&self) -> &str {
        self.base_origin
    }

    fn posted_hint(&self) -> &str {
        self.posted_hint
    }

    fn search_url(&self, keyword: &str, region: &str) -> String {
        (self.search_url)(keyword, region)
    }

    fn request_headers(&self) -> &[(&'static str, &'static str)] {
        self.headers
    }

    fn parse(&self, html: &str) -> Result<Vec<RawListing>, AdapterError> {
        parse_listings(self.selectors, html)
    }
}

struct CompiledSelectors {
    item: Vec<Selector>,
    title: Vec<Selector>,
    link: Vec<Selector>,
    company: Vec<Selector>,
    location: Vec<Selector>,
    posted: Vec<Selector>,
    extra: Vec<Selector>,
}

fn compile(selectors: &[&str]) -> Result<Vec<Selector>, AdapterError> {
    selectors
        .iter()
        .map(|s| {
            Selector::parse(s).map_err(|e| AdapterError::Selector {
                selector: s.to_string(),
                message: e.to_string(),
            })
        })
        .collect()
}

impl CompiledSelectors {
    fn new(site: &SiteSelectors) -> Result<Self, AdapterError> {
        Ok(Self {
            item: compile(site.item)?,
            title: compile(site.title)?,
            link: compile(site.link)?,
            company: compile(site.company)?,
            location: compile(site.location)?,
            posted: compile(site.posted)?,
            extra: compile(site.extra)?,
        })
    }
}

fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn first_text(item: ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
    selectors.iter().find_map(|sel| {
        item.select(sel)
            .find_map(|node| text_or_none(&node.text().collect::<String>()))
    })
}

fn first_attr(item: ElementRef<'_>, selectors: &[Selector], attr: &str) -> Option<String> {
    selectors.iter().find_map(|sel| {
        item.select(sel)
            .find_map(|node| node.value().attr(attr).and_then(text_or_none))
    })
}

pub fn parse_listings(site: &SiteSelectors, html: &str) -> Result<Vec<RawListing>, AdapterError> {
    let compiled = CompiledSelectors::new(site)?;
    let document = Html::parse_document(html);

    let items: Vec<ElementRef<'_>> = compiled
        .item
        .iter()
        .map(|sel| document.select(sel).collect::<Vec<_>>())
        .find(|found| !found.is_empty())
        .unwrap_or_default();

    Ok(items
        .into_iter()
        .map(|item| RawListing {
            title_text: first_text(item, &compiled.title),
            company_text: first_text(item, &compiled.company),
            location_text: first_text(item, &compiled.location),
            href_text: first_attr(item, &compiled.link, "href"),
            posted_text: first_attr(item, &compiled.posted, "datetime")
                .or_else(|| first_text(item, &compiled.posted)),
            extra_text: first_text(item, &compiled.extra),
        })
        .collect())
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.trim().as_bytes()).collect()
}

static JOBS_AT_SELECTORS: SiteSelectors = SiteSelectors {
    item: &["article.c-jobitem", "div.c-jobitem"],
    title: &["h2", "h3"],
    link: &["a[href]"],
    company: &["span.company", ".c-jobitem__company"],
    location: &["span.location", ".c-jobitem__location"],
    posted: &["time"],
    extra: &[".c-jobitem__snippet"],
};

static KARRIERE_AT_SELECTORS: SiteSelectors = SiteSelectors {
    item: &["article.m-jobItem", "div.m-jobsListItem"],
    title: &["h2", "h3"],
    link: &["a[href]"],
    company: &["span.company", ".m-jobItem__company"],
    location: &["span.location", ".m-jobItem__location"],
    posted: &["time", ".m-jobItem__date"],
    extra: &[".m-jobItem__snippet"],
};

static INDEED_AT_SELECTORS: SiteSelectors = SiteSelectors {
    item: &["div.job_seen_beacon", "td.resultContent"],
    title: &["h2.jobTitle", "h2"],
    link: &["h2.jobTitle a[href]", "a[href]"],
    company: &["span.companyName", "span[data-testid=\"company-name\"]"],
    location: &["div.companyLocation", "div[data-testid=\"text-location\"]"],
    posted: &["span.date"],
    extra: &["div.job-snippet"],
};

static LINKEDIN_SELECTORS: SiteSelectors = SiteSelectors {
    item: &["div.base-card"],
    title: &["h3.base-search-card__title"],
    link: &["a.base-card__full-link"],
    company: &["h4.base-search-card__subtitle"],
    location: &["span.job-search-card__location"],
    posted: &["time"],
    extra: &[],
};

fn jobs_at_search_url(keyword: &str, _region: &str) -> String {
    format!("https://www.jobs.at/stellenangebote/{}", encode(keyword))
}

fn karriere_at_search_url(keyword: &str, _region: &str) -> String {
    format!("https://www.karriere.at/jobs/{}", encode(keyword))
}

fn indeed_at_search_url(keyword: &str, region: &str) -> String {
    format!(
        "https://at.indeed.com/jobs?q={}&l={}&sort=date&fromage=1",
        encode(keyword),
        encode(region)
    )
}

fn linkedin_search_url(keyword: &str, region: &str) -> String {
    format!(
        "https://www.linkedin.com/jobs/search?keywords={}&location={}&f_TPR=r86400",
        encode(keyword),
        encode(region)
    )
}

pub fn jobs_at_adapter() -> impl SourceAdapter {
    HtmlListingAdapter {
        source_id: SourceId::JobsAt,
        base_origin: "https://www.jobs.at",
        posted_hint: "Today",
        search_url: jobs_at_search_url,
        headers: &[],
        selectors: &JOBS_AT_SELECTORS,
    }
}

pub fn karriere_at_adapter() -> impl SourceAdapter {
    HtmlListingAdapter {
        source_id: SourceId::KarriereAt,
        base_origin: "https://www.karriere.at",
        posted_hint: "Today",
        search_url: karriere_at_search_url,
        headers: &[],
        selectors: &KARRIERE_AT_SELECTORS,
    }
}

pub fn indeed_at_adapter() -> impl SourceAdapter {
    HtmlListingAdapter {
        source_id: SourceId::IndeedAt,
        base_origin: "https://at.indeed.com",
        posted_hint: "Recent",
        search_url: indeed_at_search_url,
        headers: &[],
        selectors: &INDEED_AT_SELECTORS,
    }
}

pub fn linkedin_adapter() -> impl SourceAdapter {
    HtmlListingAdapter {
        source_id: SourceId::Linkedin,
        base_origin: "https://www.linkedin.com",
        posted_hint: "Recent",
        search_url: linkedin_search_url,
        headers: &[
            ("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
            ("Accept-Language", "en-US,en;q=0.5"),
        ],
        selectors: &LINKEDIN_SELECTORS,
    }
}

pub fn adapter_for_source(source_id: SourceId) -> Arc<dyn SourceAdapter> {
    match source_id {
        SourceId::JobsAt => Arc::new(jobs_at_adapter()),
        SourceId::KarriereAt => Arc::new(karriere_at_adapter()),
        SourceId::IndeedAt => Arc::new(indeed_at_adapter()),
        SourceId::Linkedin => Arc::new(linkedin_adapter()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_urls_encode_keywords_like_form_data() {
        let jobs = jobs_at_adapter();
        assert_eq!(
            jobs.search_url("data scientist", "Austria"),
            "https://www.jobs.at/stellenangebote/data+scientist"
        );
        let indeed = indeed_at_adapter();
        assert_eq!(
            indeed.search_url("C++ developer", "Lower Austria"),
            "https://at.indeed.com/jobs?q=C%2B%2B+developer&l=Lower+Austria&sort=date&fromage=1"
        );
        let linkedin = linkedin_adapter();
        assert!(linkedin
            .search_url("ML engineer", "Austria")
            .ends_with("keywords=ML+engineer&location=Austria&f_TPR=r86400"));
    }

    #[test]
    fn registry_covers_every_source() {
        for id in SourceId::ALL {
            let adapter = adapter_for_source(id);
            assert_eq!(adapter.source_id(), id);
            assert!(adapter.base_origin().starts_with("https://"));
        }
        assert_eq!(adapter_for_source(SourceId::Linkedin).request_headers().len(), 2);
    }

    #[test]
    fn items_missing_fields_are_kept_for_the_normalizer() {
        let html = r#"
            <div class="base-card"><h3 class="base-search-card__title">IoT Engineer</h3></div>
            <div class="base-card"><a class="base-card__full-link" href="https://x/1"></a></div>
        "#;
        let listings = linkedin_adapter().parse(html).unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].title_text.as_deref(), Some("IoT Engineer"));
        assert_eq!(listings[0].href_text, None);
        assert_eq!(listings[1].title_text, None);
        assert_eq!(listings[1].href_text.as_deref(), Some("https://x/1"));
    }

    #[test]
    fn page_without_listings_parses_to_nothing() {
        let listings = karriere_at_adapter()
            .parse("<html><body><p>Keine Treffer</p></body></html>")
            .unwrap();
        assert!(listings.is_empty());
    }

    #[test]
    fn bad_selector_is_a_parse_error() {
        static BROKEN: SiteSelectors = SiteSelectors {
            item: &["div..broken"],
            title: &[],
            link: &[],
            company: &[],
            location: &[],
            posted: &[],
            extra: &[],
        };
        assert!(matches!(
            parse_listings(&BROKEN, "<div></div>"),
            Err(AdapterError::Selector { .. })
        ));
    }

    #[test]
    fn fetch_errors_map_onto_source_error_kinds() {
        let err = SourceError::from_fetch(
            SourceId::Linkedin,
            "data analyst",
            FetchError::HttpStatus {
                status: 429,
                url: "https://www.linkedin.com/jobs/search".into(),
            },
        );
        assert_eq!(err.kind, SourceErrorKind::HttpStatus(429));
        assert!(err.is_rate_limited());
        assert_eq!(err.keyword, "data analyst");

        let timeout = SourceError::from_fetch(
            SourceId::JobsAt,
            "iot",
            FetchError::Timeout { url: "https://www.jobs.at".into() },
        );
        assert_eq!(timeout.kind, SourceErrorKind::Timeout);
        assert!(!timeout.is_rate_limited());
        assert!(timeout.to_string().contains("jobs-at search for `iot` failed (timeout)"));
    }
}
