use std::path::{Path, PathBuf};

use jobwatch_adapters::{adapter_for_source, SourceAdapter};
use jobwatch_core::{normalize, JobDraft, NormalizeContext, RawListing, SourceId, UNKNOWN_COMPANY};

fn fixture_path(source: SourceId) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(source.as_str())
        .join("listing.html")
}

fn parse_fixture(source: SourceId) -> (Vec<RawListing>, std::sync::Arc<dyn SourceAdapter>) {
    let adapter = adapter_for_source(source);
    let html = std::fs::read_to_string(fixture_path(source)).expect("read fixture");
    let listings = adapter.parse(&html).expect("parse fixture");
    (listings, adapter)
}

fn normalize_all(source: SourceId, keyword: &str) -> Vec<Option<JobDraft>> {
    let (listings, adapter) = parse_fixture(source);
    let locations = vec!["Wien".to_string(), "Graz".to_string()];
    let ctx = NormalizeContext {
        source,
        base_origin: adapter.base_origin(),
        default_region: "Austria",
        posted_hint: adapter.posted_hint(),
        known_locations: &locations,
    };
    listings
        .iter()
        .map(|raw| normalize(raw, &ctx, keyword).ok())
        .collect()
}

#[test]
fn jobs_at_fixture_parses_with_fallback_selectors() {
    let drafts = normalize_all(SourceId::JobsAt, "data analyst");
    assert_eq!(drafts.len(), 3);

    let first = drafts[0].as_ref().expect("first listing normalizes");
    assert_eq!(first.title, "Data Analyst (m/w/d)");
    assert_eq!(first.company, "Wiener Stadtwerke");
    assert_eq!(first.url, "https://www.jobs.at/j/data-analyst-wien-101");
    assert_eq!(first.posted_date, "Today");
    assert_eq!(
        first.description.as_deref(),
        Some("Reporting mit Power BI und SQL im Bereich Energie.")
    );

    let second = drafts[1].as_ref().expect("h3 title fallback");
    assert_eq!(second.title, "Junior Data Scientist");
    assert_eq!(second.company, UNKNOWN_COMPANY);
    assert_eq!(second.location, "Graz");
    assert_eq!(second.url, "https://www.jobs.at/j/junior-data-scientist-102");

    assert!(drafts[2].is_none(), "listing without a link is dropped");
}

#[test]
fn karriere_at_fixture_resolves_relative_links_and_dates() {
    let drafts = normalize_all(SourceId::KarriereAt, "software engineer");
    let drafts: Vec<JobDraft> = drafts.into_iter().flatten().collect();
    assert_eq!(drafts.len(), 3);
    assert_eq!(drafts[0].url, "https://www.karriere.at/jobs/7810123");
    assert_eq!(drafts[0].posted_date, "2026-03-02");
    assert_eq!(drafts[1].url, "https://www.karriere.at/jobs/7810456");
    assert_eq!(drafts[1].posted_date, "Today");
    assert_eq!(drafts[2].location, "Pasching");
}

#[test]
fn indeed_fixture_handles_both_card_layouts() {
    let (listings, _) = parse_fixture(SourceId::IndeedAt);
    assert_eq!(listings.len(), 2);
    assert_eq!(listings[0].href_text.as_deref(), Some("/rc/clk?jk=a1b2c3&fccid=f00"));
    assert_eq!(listings[0].posted_text.as_deref(), Some("Heute"));
    assert_eq!(
        listings[0].extra_text.as_deref(),
        Some("SPS Programmierung mit TIA Portal")
    );
    assert_eq!(
        listings[1].company_text.as_deref(),
        Some("B&R Industrial Automation")
    );
    assert_eq!(listings[1].location_text.as_deref(), Some("Eggelsberg"));

    let drafts = normalize_all(SourceId::IndeedAt, "automation engineer");
    let first = drafts[0].as_ref().unwrap();
    assert_eq!(first.url, "https://at.indeed.com/rc/clk?jk=a1b2c3&fccid=f00");
    assert_eq!(first.title, "Automation Engineer");
}

#[test]
fn linkedin_fixture_trims_card_text() {
    let drafts = normalize_all(SourceId::Linkedin, "ML engineer");
    let first = drafts[0].as_ref().unwrap();
    assert_eq!(first.title, "ML Engineer");
    assert_eq!(first.company, "Anyline");
    assert_eq!(first.location, "Vienna, Vienna, Austria");
    assert_eq!(first.posted_date, "2026-03-01");
    assert_eq!(
        first.url,
        "https://at.linkedin.com/jobs/view/ml-engineer-at-anyline-3901"
    );

    let second = drafts[1].as_ref().unwrap();
    assert_eq!(second.company, UNKNOWN_COMPANY);
    assert_eq!(second.location, "Austria");
    assert_eq!(second.posted_date, "Recent");
}
