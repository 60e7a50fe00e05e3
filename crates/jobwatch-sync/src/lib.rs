//! Poll orchestration, scheduling and notification for jobwatch.

pub mod clock;
pub mod commands;
pub mod config;
pub mod controller;
pub mod notify;
pub mod orchestrator;
pub mod report;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use jobwatch_storage::{
    DedupStore, HttpClientConfig, HttpFetcher, MemoryDedupStore, SqliteDedupStore,
};
use tokio::sync::mpsc;
use tokio_cron_scheduler::JobScheduler;
use tracing::{info, warn};

pub use clock::{stop_on_ctrl_c, Clock, StopSignal, SystemClock, TokioClock};
pub use commands::{Command, CommandHandler, CommandReply, CycleTrigger, TriggerOutcome};
pub use config::{ConfigError, SourceConfig, TelegramConfig, WatchConfig, WatchProfile};
pub use controller::{ControllerConfig, ControllerState, CycleController, CycleReport};
pub use notify::{LogNotifier, Notifier, NotifyError, TelegramNotifier};
pub use orchestrator::{DelayRange, PollOrchestrator, SourcePlan};
pub use report::MessagePolicy;

pub const CRATE_NAME: &str = "jobwatch-sync";

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Keep seen URLs in memory and log notifications instead of sending them.
    pub dry_run: bool,
}

/// Fully wired poller: store, sources, notifier, controller and command handler.
pub struct WatchService {
    pub config: WatchConfig,
    pub store: Arc<dyn DedupStore>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub controller: Arc<CycleController>,
    pub commands: Arc<CommandHandler>,
    pub stop: StopSignal,
    triggers: Option<mpsc::Receiver<()>>,
}

impl WatchService {
    pub async fn build(config: WatchConfig, options: BuildOptions) -> Result<Self> {
        let profile = WatchProfile::load(&config.profile_path).await?;

        let store: Arc<dyn DedupStore> = if options.dry_run {
            Arc::new(MemoryDedupStore::new())
        } else {
            connect_store(&config).await?
        };

        let http = Arc::new(
            HttpFetcher::new(HttpClientConfig {
                timeout: config.http_timeout,
                user_agents: profile.user_agents.clone(),
                ..Default::default()
            })
            .context("building http client")?,
        );

        let notifier: Arc<dyn Notifier> = match (&config.telegram, options.dry_run) {
            (Some(telegram), false) => Arc::new(
                TelegramNotifier::new(telegram, config.http_timeout)
                    .context("building telegram client")?,
            ),
            (None, false) => {
                warn!("TELEGRAM_TOKEN/TELEGRAM_CHAT_ID not set; notifications go to the log");
                Arc::new(LogNotifier)
            }
            (_, true) => Arc::new(LogNotifier),
        };

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let stop = StopSignal::new();
        let search = profile.search_profile();
        let plans = profile
            .enabled_sources()
            .map(|source| SourcePlan::from_config(source, &search))
            .collect();
        let orchestrator = Arc::new(PollOrchestrator::new(
            search,
            plans,
            http,
            store.clone(),
            clock.clone(),
            stop.clone(),
        ));

        let controller = Arc::new(CycleController::new(
            orchestrator,
            store.clone(),
            notifier.clone(),
            clock.clone(),
            ControllerConfig {
                interval: config.interval,
                warmup: config.warmup,
                messages: MessagePolicy {
                    notify_when_empty: config.notify_when_empty,
                    per_source_details: config.per_source_messages,
                },
            },
            stop.clone(),
        ));

        let (trigger, triggers) = commands::trigger_channel();
        let commands = Arc::new(CommandHandler::new(store.clone(), trigger, clock.clone()));

        info!(
            profile = %config.profile_path.display(),
            dry_run = options.dry_run,
            "job watch service assembled"
        );
        Ok(Self {
            config,
            store,
            notifier,
            clock,
            controller,
            commands,
            stop,
            triggers: Some(triggers),
        })
    }

    /// Receiver for on-demand cycle requests. Handed out once, to whoever runs the
    /// controller loop.
    pub fn take_triggers(&mut self) -> Option<mpsc::Receiver<()>> {
        self.triggers.take()
    }

    pub async fn summary_scheduler(&self) -> Result<Option<JobScheduler>> {
        controller::maybe_build_summary_scheduler(
            self.config.summary_cron.as_deref(),
            self.store.clone(),
            self.notifier.clone(),
            self.clock.clone(),
        )
        .await
    }
}

pub async fn connect_store(config: &WatchConfig) -> Result<Arc<dyn DedupStore>> {
    let store = SqliteDedupStore::connect(&config.database_url)
        .await
        .with_context(|| format!("opening dedup store {}", config.database_url))?;
    Ok(Arc::new(store))
}

/// Connects and brings the schema up to date.
pub async fn open_store(config: &WatchConfig) -> Result<Arc<dyn DedupStore>> {
    let store = connect_store(config).await?;
    store.init().await.context("initializing dedup store")?;
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn builds_from_shipped_profile_in_dry_run() {
        let config = WatchConfig {
            profile_path: std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../jobwatch.yaml"),
            ..WatchConfig::default()
        };
        let mut service = WatchService::build(config, BuildOptions { dry_run: true })
            .await
            .unwrap();
        assert!(service.take_triggers().is_some());
        assert!(service.take_triggers().is_none());
        assert_eq!(service.controller.state(), ControllerState::Stopped);
        assert!(service.summary_scheduler().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_store_creates_schema() {
        let dir = tempdir().unwrap();
        let config = WatchConfig {
            database_url: format!("sqlite://{}", dir.path().join("jobs.db").display()),
            ..WatchConfig::default()
        };
        let store = open_store(&config).await.unwrap();
        assert_eq!(store.total().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_profile_is_an_error() {
        let config = WatchConfig {
            profile_path: "/nonexistent/jobwatch.yaml".into(),
            ..WatchConfig::default()
        };
        let err = WatchService::build(config, BuildOptions::default()).await;
        assert!(err.is_err());
    }
}
