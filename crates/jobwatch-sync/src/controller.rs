//! Lifecycle of the poller: warm-up, an immediate first cycle, then fixed-interval
//! cycles interleaved with on-demand ones until stopped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jobwatch_core::CycleResult;
use jobwatch_storage::DedupStore;
use tokio::sync::{mpsc, watch};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::clock::{Clock, StopSignal};
use crate::notify::Notifier;
use crate::orchestrator::PollOrchestrator;
use crate::report::{self, MessagePolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Stopped,
    Running { interval: Duration },
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub interval: Duration,
    pub warmup: Duration,
    pub messages: MessagePolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2 * 60 * 60),
            warmup: Duration::from_secs(30),
            messages: MessagePolicy::default(),
        }
    }
}

/// What happened to one cycle's notifications.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub result: CycleResult,
    pub messages: usize,
    pub delivered: usize,
}

pub struct CycleController {
    orchestrator: Arc<PollOrchestrator>,
    store: Arc<dyn DedupStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: ControllerConfig,
    stop: StopSignal,
    state: watch::Sender<ControllerState>,
}

impl CycleController {
    pub fn new(
        orchestrator: Arc<PollOrchestrator>,
        store: Arc<dyn DedupStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: ControllerConfig,
        stop: StopSignal,
    ) -> Self {
        let (state, _) = watch::channel(ControllerState::Stopped);
        Self {
            orchestrator,
            store,
            notifier,
            clock,
            config,
            stop,
            state,
        }
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    /// Runs until the stop signal fires. Only a store that cannot be initialized is
    /// fatal; everything that goes wrong inside a cycle is logged and survived.
    pub async fn run(&self, mut triggers: mpsc::Receiver<()>) -> Result<()> {
        self.store.init().await.context("initializing dedup store")?;
        let step = chrono::Duration::from_std(self.config.interval)
            .context("poll interval out of range")?;

        self.state.send_replace(ControllerState::Running {
            interval: self.config.interval,
        });
        info!(
            interval_secs = self.config.interval.as_secs(),
            warmup_secs = self.config.warmup.as_secs(),
            sources = ?self.orchestrator.sources().collect::<Vec<_>>(),
            "job watch started"
        );

        let warmed_up = tokio::select! {
            _ = self.stop.stopped() => false,
            _ = self.clock.sleep(self.config.warmup) => true,
        };

        if warmed_up {
            let mut next_due = self.clock.now() + step;
            self.run_and_deliver("startup", Some(next_due)).await;

            let mut triggers_open = true;
            loop {
                let wait = (next_due - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    biased;
                    _ = self.stop.stopped() => break,
                    request = triggers.recv(), if triggers_open => match request {
                        // On-demand cycles leave the schedule where it was.
                        Some(()) => {
                            self.run_and_deliver("on_demand", Some(next_due)).await;
                        }
                        None => triggers_open = false,
                    },
                    _ = self.clock.sleep(wait) => {
                        next_due += step;
                        let now = self.clock.now();
                        if next_due <= now {
                            warn!("poll schedule fell behind; skipping missed slots");
                            next_due = now + step;
                        }
                        self.run_and_deliver("scheduled", Some(next_due)).await;
                    }
                }
                if self.stop.is_stopped() {
                    break;
                }
            }
        }

        self.state.send_replace(ControllerState::Stopped);
        info!("job watch stopped");
        Ok(())
    }

    /// One cycle outside the schedule, delivered like any other. No next-check time is
    /// announced.
    pub async fn run_cycle_now(&self) -> CycleReport {
        self.run_and_deliver("manual", None).await
    }

    async fn run_and_deliver(
        &self,
        reason: &'static str,
        next_check: Option<DateTime<Utc>>,
    ) -> CycleReport {
        info!(reason, "running poll cycle");
        let result = self.orchestrator.run_cycle().await;
        let messages = report::cycle_messages(&result, &self.config.messages, next_check);

        let mut delivered = 0;
        for message in &messages {
            match self.notifier.send(message).await {
                Ok(()) => delivered += 1,
                // Records stay marked as seen; a failed send is not retried.
                Err(err) => error!(
                    cycle_id = %result.cycle_id,
                    error = %err,
                    "notification failed"
                ),
            }
        }

        info!(
            cycle_id = %result.cycle_id,
            new = result.total_new(),
            messages = messages.len(),
            delivered,
            "cycle delivered"
        );
        CycleReport {
            messages: messages.len(),
            delivered,
            result,
        }
    }
}

/// Daily stats report on a cron schedule (6-field, seconds first), if configured.
pub async fn maybe_build_summary_scheduler(
    cron: Option<&str>,
    store: Arc<dyn DedupStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
) -> Result<Option<JobScheduler>> {
    let Some(cron) = cron else {
        return Ok(None);
    };

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let store = store.clone();
        let notifier = notifier.clone();
        let clock = clock.clone();
        Box::pin(async move {
            let text = match report::stats_text(store.as_ref(), clock.now()).await {
                Ok(text) => text,
                Err(err) => {
                    error!(error = %err, "daily report query failed");
                    return;
                }
            };
            if let Err(err) = notifier.send(&text).await {
                error!(error = %err, "daily report delivery failed");
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
