//! Text rendering for cycle summaries and the status/stats commands.
//!
//! All output is Telegram-flavoured HTML; scraped text is escaped before it is embedded.

use std::fmt::Write as _;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use jobwatch_core::{CycleResult, JobRecord, SourceId};
use jobwatch_storage::{DedupStore, StoreError};

/// Listings shown per source in a summary before collapsing into "... and N more".
pub const MAX_LISTED_PER_SOURCE: usize = 3;

/// Days covered by the stats report.
pub const STATS_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessagePolicy {
    /// Send a short notice when a cycle found nothing new.
    pub notify_when_empty: bool,
    /// Send one detailed message per source in addition to the summary.
    pub per_source_details: bool,
}

impl Default for MessagePolicy {
    fn default() -> Self {
        Self {
            notify_when_empty: true,
            per_source_details: false,
        }
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Messages to deliver for one finished cycle, in send order. At most one summary is
/// produced no matter how many records the cycle found.
pub fn cycle_messages(
    result: &CycleResult,
    policy: &MessagePolicy,
    next_check: Option<DateTime<Utc>>,
) -> Vec<String> {
    if result.records.is_empty() {
        if policy.notify_when_empty && !result.interrupted {
            return vec![empty_cycle_notice(result, next_check)];
        }
        return Vec::new();
    }

    let mut messages = vec![summary(result)];
    if policy.per_source_details {
        messages.extend(
            result
                .records_by_source()
                .into_iter()
                .map(|(source, records)| source_details(source, &records)),
        );
    }
    messages
}

fn summary(result: &CycleResult) -> String {
    let total = result.total_new();
    let mut text = format!(
        "<b>{total} new job{} found</b>\n",
        if total == 1 { "" } else { "s" }
    );

    for (source, records) in result.records_by_source() {
        let _ = write!(
            text,
            "\n<b>{}</b> ({})\n",
            escape_html(&source.display_name().to_uppercase()),
            records.len()
        );
        for record in records.iter().take(MAX_LISTED_PER_SOURCE) {
            push_listing(&mut text, record);
        }
        if records.len() > MAX_LISTED_PER_SOURCE {
            let _ = writeln!(text, "... and {} more", records.len() - MAX_LISTED_PER_SOURCE);
        }
    }

    let failing: Vec<String> = result
        .tallies
        .iter()
        .filter(|(_, tally)| tally.errors > 0)
        .map(|(source, tally)| format!("{} ({})", source.display_name(), tally.errors))
        .collect();
    if !failing.is_empty() {
        let _ = write!(text, "\nSources with errors: {}\n", failing.join(", "));
    }

    let _ = write!(text, "\nFound at {}", result.finished_at.format("%H:%M UTC"));
    text
}

fn push_listing(text: &mut String, record: &JobRecord) {
    let _ = write!(
        text,
        "• <b>{}</b> at {}\n  {} | {}\n  <a href=\"{}\">Apply</a>\n",
        escape_html(&record.title),
        escape_html(&record.company),
        escape_html(&record.location),
        escape_html(&record.posted_date),
        escape_html(&record.url),
    );
}

fn source_details(source: SourceId, records: &[&JobRecord]) -> String {
    let mut text = format!(
        "<b>{}</b>: {} new\n\n",
        escape_html(source.display_name()),
        records.len()
    );
    for record in records {
        push_listing(&mut text, record);
        if !record.matched_keywords.is_empty() {
            let _ = writeln!(
                text,
                "  Matched: {}",
                escape_html(&record.matched_keywords.join(", "))
            );
        }
        text.push('\n');
    }
    text.trim_end().to_string()
}

fn empty_cycle_notice(result: &CycleResult, next_check: Option<DateTime<Utc>>) -> String {
    let mut text = format!(
        "<b>No new jobs</b>\nChecked at {}",
        result.finished_at.format("%H:%M UTC")
    );
    if result.total_errors() > 0 {
        let _ = write!(text, "\n{} searches failed", result.total_errors());
    }
    if let Some(next) = next_check {
        let _ = write!(text, "\nNext check at {}", next.format("%H:%M UTC"));
    }
    text
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN))
}

fn source_label(slug: &str) -> String {
    slug.parse::<SourceId>()
        .map(|s| s.display_name().to_string())
        .unwrap_or_else(|_| slug.to_string())
}

pub async fn status_text(store: &dyn DedupStore, now: DateTime<Utc>) -> Result<String, StoreError> {
    let total = store.total().await?;
    let today: u64 = store
        .count_by_source(Some(start_of_day(now)))
        .await?
        .iter()
        .map(|c| c.count)
        .sum();
    let by_source = store.count_by_source(None).await?;

    let mut text = format!(
        "<b>Job watch status</b>\nTotal jobs seen: {total}\nFound today: {today}\n"
    );
    if !by_source.is_empty() {
        text.push_str("\n<b>By source</b>\n");
        for row in by_source {
            let _ = writeln!(text, "• {}: {}", escape_html(&source_label(&row.source)), row.count);
        }
    }
    Ok(text.trim_end().to_string())
}

pub async fn stats_text(store: &dyn DedupStore, now: DateTime<Utc>) -> Result<String, StoreError> {
    let since = start_of_day(now) - Duration::days(STATS_WINDOW_DAYS - 1);
    let by_day = store.count_by_day(since).await?;
    let by_source = store.count_by_source(Some(since)).await?;

    let mut text = format!("<b>Last {STATS_WINDOW_DAYS} days</b>\n");
    if by_day.is_empty() {
        text.push_str("No jobs found in this period.");
        return Ok(text);
    }
    for row in &by_day {
        let _ = writeln!(text, "• {}: {}", row.day, row.count);
    }
    text.push_str("\n<b>By source</b>\n");
    for row in by_source {
        let _ = writeln!(text, "• {}: {}", escape_html(&source_label(&row.source)), row.count);
    }
    Ok(text.trim_end().to_string())
}
