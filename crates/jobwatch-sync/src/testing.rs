//! Fakes shared by the unit tests in this crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use jobwatch_adapters::{
    AdapterError, SearchOptions, SourceAdapter, SourceError, SourceErrorKind,
};
use jobwatch_core::{JobRecord, RawListing, SourceId};
use jobwatch_storage::{
    DayCount, DedupStore, HttpClientConfig, HttpFetcher, MemoryDedupStore, SourceCount,
    StoreError,
};

use crate::clock::Clock;
use crate::notify::{NotifyError, Notifier};
use crate::orchestrator::{DelayRange, SourcePlan};

pub const KEYWORDS: [&str; 3] = ["data analyst", "ML engineer", "robotics engineer"];

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap()
}

pub fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(RecordingClock::default())
}

pub fn test_http() -> Arc<HttpFetcher> {
    Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap())
}

pub fn listing(title: &str, href: &str) -> RawListing {
    RawListing {
        title_text: Some(title.to_string()),
        company_text: Some("ACME".to_string()),
        href_text: Some(href.to_string()),
        ..RawListing::default()
    }
}

pub fn failing(
    kind: SourceErrorKind,
) -> impl Fn(&str, usize) -> Result<Vec<RawListing>, SourceErrorKind> + Send + Sync + 'static {
    move |_: &str, _: usize| Err(kind)
}

/// Plan over the first `keywords` of [`KEYWORDS`] with no delays.
pub fn plan(adapter: Arc<ScriptedAdapter>, keywords: usize) -> SourcePlan {
    SourcePlan {
        adapter,
        keywords: KEYWORDS.iter().take(keywords).map(|k| k.to_string()).collect(),
        options: SearchOptions::default(),
        delay: DelayRange::new(Duration::ZERO, Duration::ZERO),
    }
}

type Script = dyn Fn(&str, usize) -> Result<Vec<RawListing>, SourceErrorKind> + Send + Sync;

/// Adapter whose search results come from a closure of `(keyword, call_index)`.
pub struct ScriptedAdapter {
    source: SourceId,
    origin: String,
    script: Box<Script>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    pub fn new(
        source: SourceId,
        script: impl Fn(&str, usize) -> Result<Vec<RawListing>, SourceErrorKind>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            source,
            origin: format!("https://{}.test", source.as_str()),
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn source_id(&self) -> SourceId {
        self.source
    }

    fn base_origin(&self) -> &str {
        &self.origin
    }

    fn search_url(&self, keyword: &str, _region: &str) -> String {
        format!("{}/search?q={keyword}", self.origin)
    }

    fn parse(&self, _html: &str) -> Result<Vec<RawListing>, AdapterError> {
        Ok(Vec::new())
    }

    async fn search(
        &self,
        _http: &HttpFetcher,
        keyword: &str,
        options: &SearchOptions,
    ) -> Result<Vec<RawListing>, SourceError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(keyword.to_string());
            calls.len() - 1
        };
        match (self.script)(keyword, index) {
            Ok(mut listings) => {
                listings.truncate(options.results_per_keyword);
                Ok(listings)
            }
            Err(kind) => Err(SourceError::new(kind, self.source, keyword, "scripted failure")),
        }
    }
}

/// Clock frozen at [`fixed_now`] that records requested sleeps and returns at once.
#[derive(Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    fn now(&self) -> DateTime<Utc> {
        fixed_now()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Memory store whose first `failures` inserts error out.
pub struct FlakyStore {
    inner: MemoryDedupStore,
    failures: usize,
    transient: bool,
    attempts: AtomicUsize,
}

impl FlakyStore {
    /// Fails with an exhausted pool, which is worth retrying.
    pub fn failing_inserts(failures: usize) -> Self {
        Self {
            inner: MemoryDedupStore::new(),
            failures,
            transient: true,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Fails with an error a second attempt cannot fix.
    pub fn rejecting_inserts() -> Self {
        Self {
            transient: false,
            ..Self::failing_inserts(usize::MAX)
        }
    }

    pub fn insert_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DedupStore for FlakyStore {
    async fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn exists(&self, url: &str) -> Result<bool, StoreError> {
        self.inner.exists(url).await
    }

    async fn insert_if_absent(&self, record: &JobRecord) -> Result<bool, StoreError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            let err = if self.transient {
                sqlx::Error::PoolTimedOut
            } else {
                sqlx::Error::RowNotFound
            };
            return Err(StoreError::Database(err));
        }
        self.inner.insert_if_absent(record).await
    }

    async fn total(&self) -> Result<u64, StoreError> {
        self.inner.total().await
    }

    async fn count_by_source(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SourceCount>, StoreError> {
        self.inner.count_by_source(since).await
    }

    async fn count_by_day(&self, since: DateTime<Utc>) -> Result<Vec<DayCount>, StoreError> {
        self.inner.count_by_day(since).await
    }
}

/// Notifier that keeps every message, optionally failing all sends.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(text.to_string());
        if self.fail {
            return Err(NotifyError::Rejected {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(())
    }
}
