//! One poll cycle: every enabled source, every configured keyword, in order.
//!
//! Sources are polled strictly one after another so each site only ever sees a single
//! request in flight from us. A failing source never aborts the cycle; it is counted,
//! logged and skipped.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use jobwatch_adapters::{adapter_for_source, SearchOptions, SourceAdapter};
use jobwatch_core::{
    normalize, CycleResult, CycleState, JobRecord, KeywordFilter, NormalizeContext, RawListing,
    SearchProfile, SourceId, SourceTally,
};
use jobwatch_storage::{DedupStore, HttpFetcher, StoreError};
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::clock::{Clock, StopSignal};
use crate::config::SourceConfig;

/// Politeness pause between two keyword searches on the same source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayRange {
    min: Duration,
    max: Duration,
}

impl DelayRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    pub fn from_secs_f64(min: f64, max: f64) -> Self {
        let secs = |v: f64| Duration::from_secs_f64(if v.is_finite() { v.max(0.0) } else { 0.0 });
        Self::new(secs(min), secs(max))
    }

    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let secs = rand::thread_rng().gen_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Everything needed to poll one source during a cycle.
#[derive(Clone)]
pub struct SourcePlan {
    pub adapter: Arc<dyn SourceAdapter>,
    pub keywords: Vec<String>,
    pub options: SearchOptions,
    pub delay: DelayRange,
}

impl SourcePlan {
    pub fn from_config(config: &SourceConfig, profile: &SearchProfile) -> Self {
        Self::with_adapter(adapter_for_source(config.source), config, profile)
    }

    pub fn with_adapter(
        adapter: Arc<dyn SourceAdapter>,
        config: &SourceConfig,
        profile: &SearchProfile,
    ) -> Self {
        let limit = config.keyword_limit.unwrap_or(usize::MAX);
        Self {
            adapter,
            keywords: profile.keywords().iter().take(limit).cloned().collect(),
            options: SearchOptions {
                results_per_keyword: config.results_per_keyword,
                region: config.default_region.clone(),
            },
            delay: DelayRange::from_secs_f64(config.min_delay_secs, config.max_delay_secs),
        }
    }

    pub fn source_id(&self) -> SourceId {
        self.adapter.source_id()
    }
}

pub struct PollOrchestrator {
    profile: SearchProfile,
    filter: KeywordFilter,
    sources: Vec<SourcePlan>,
    http: Arc<HttpFetcher>,
    store: Arc<dyn DedupStore>,
    clock: Arc<dyn Clock>,
    stop: StopSignal,
    running: Mutex<()>,
}

impl PollOrchestrator {
    pub fn new(
        profile: SearchProfile,
        sources: Vec<SourcePlan>,
        http: Arc<HttpFetcher>,
        store: Arc<dyn DedupStore>,
        clock: Arc<dyn Clock>,
        stop: StopSignal,
    ) -> Self {
        Self {
            filter: KeywordFilter::new(&profile),
            profile,
            sources,
            http,
            store,
            clock,
            stop,
            running: Mutex::new(()),
        }
    }

    pub fn sources(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.sources.iter().map(SourcePlan::source_id)
    }

    /// Runs one full cycle. Concurrent callers are serialized: a second call waits for
    /// the first to finish and then runs its own cycle.
    pub async fn run_cycle(&self) -> CycleResult {
        let _guard = self.running.lock().await;
        let cycle_id = Uuid::new_v4();
        let span = info_span!("poll_cycle", %cycle_id);
        self.poll_all(cycle_id).instrument(span).await
    }

    async fn poll_all(&self, cycle_id: Uuid) -> CycleResult {
        let started_at = self.clock.now();
        info!(sources = self.sources.len(), "poll cycle started");

        let mut records = Vec::new();
        let mut tallies: BTreeMap<SourceId, SourceTally> = BTreeMap::new();
        let mut interrupted = false;

        'sources: for plan in &self.sources {
            let source = plan.source_id();
            let tally = tallies.entry(source).or_default();

            for (index, keyword) in plan.keywords.iter().enumerate() {
                if index > 0 && !self.stop.is_stopped() {
                    tokio::select! {
                        _ = self.clock.sleep(plan.delay.sample()) => {}
                        _ = self.stop.stopped() => {}
                    }
                }
                if self.stop.is_stopped() {
                    warn!(source = %source, "stop requested; abandoning the rest of the cycle");
                    interrupted = true;
                    break 'sources;
                }

                tally.keywords_attempted += 1;
                match plan.adapter.search(&self.http, keyword, &plan.options).await {
                    Ok(listings) => {
                        tally.listings_seen += listings.len();
                        for raw in listings {
                            if let Some(record) = self.admit(&raw, plan, keyword, tally).await {
                                records.push(record);
                            }
                        }
                    }
                    Err(err) => {
                        tally.errors += 1;
                        warn!(source = %source, keyword = %keyword, kind = %err.kind, error = %err, "search failed");
                        if err.is_rate_limited() {
                            tally.rate_limited = true;
                            warn!(source = %source, "rate limited; skipping remaining keywords this cycle");
                            break;
                        }
                    }
                }
            }

            info!(
                source = %source,
                new = tally.new_records,
                errors = tally.errors,
                excluded = tally.excluded,
                already_seen = tally.already_seen,
                "source polled"
            );
        }

        // Sources the cycle never reached still report zero.
        let per_source_counts: BTreeMap<SourceId, usize> = self
            .sources()
            .map(|source| {
                let new = tallies.get(&source).map_or(0, |t| t.new_records);
                (source, new)
            })
            .collect();

        let failed = interrupted
            || tallies
                .values()
                .any(|t| t.errors > 0 || t.store_failures > 0);
        let outcome = if failed {
            CycleState::PartiallyFailed
        } else {
            CycleState::Completed
        };

        let result = CycleResult {
            cycle_id,
            started_at,
            finished_at: self.clock.now(),
            outcome,
            interrupted,
            per_source_counts,
            tallies,
            records,
        };
        info!(
            new = result.total_new(),
            errors = result.total_errors(),
            outcome = ?result.outcome,
            "poll cycle finished"
        );
        result
    }

    /// Normalize, filter and claim one listing. Returns the record only if this call
    /// created it in the store.
    async fn admit(
        &self,
        raw: &RawListing,
        plan: &SourcePlan,
        keyword: &str,
        tally: &mut SourceTally,
    ) -> Option<JobRecord> {
        let ctx = NormalizeContext {
            source: plan.source_id(),
            base_origin: plan.adapter.base_origin(),
            default_region: &plan.options.region,
            posted_hint: plan.adapter.posted_hint(),
            known_locations: self.profile.locations(),
        };
        let draft = match normalize(raw, &ctx, keyword) {
            Ok(draft) => draft,
            Err(err) => {
                tally.invalid += 1;
                debug!(error = %err, "dropping listing");
                return None;
            }
        };

        let description = draft.description.as_deref();
        if self.filter.is_excluded(&draft.title, description) {
            tally.excluded += 1;
            debug!(title = %draft.title, keyword = %draft.search_keyword, "excluded by profile");
            return None;
        }

        match self.store.exists(&draft.url).await {
            Ok(true) => {
                tally.already_seen += 1;
                debug!(url = %draft.url, keyword = %draft.search_keyword, "already seen");
                return None;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, url = %draft.url, "membership check failed; relying on insert")
            }
        }

        let matched = self.filter.matched_keywords(&draft.title, description);
        let record = draft.into_record(matched, self.clock.now());
        match self.insert_with_retry(&record).await {
            Ok(true) => {
                tally.new_records += 1;
                Some(record)
            }
            Ok(false) => {
                tally.already_seen += 1;
                None
            }
            Err(err) => {
                tally.store_failures += 1;
                error!(error = %err, url = %record.url, "could not record listing; it will be retried next cycle");
                None
            }
        }
    }

    async fn insert_with_retry(&self, record: &JobRecord) -> Result<bool, StoreError> {
        match self.store.insert_if_absent(record).await {
            Ok(created) => Ok(created),
            Err(err) if err.is_transient() => {
                warn!(error = %err, url = %record.url, "insert failed; retrying once");
                self.store.insert_if_absent(record).await
            }
            Err(err) => Err(err),
        }
    }
}
