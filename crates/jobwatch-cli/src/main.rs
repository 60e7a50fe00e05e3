use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use jobwatch_sync::{report, stop_on_ctrl_c, BuildOptions, WatchConfig, WatchService};
use jobwatch_web::AppState;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "jobwatch")]
#[command(about = "Polls job boards and notifies about new listings")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Poll on a schedule until interrupted (default).
    Run {
        /// Keep seen URLs in memory and log notifications instead of sending them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Run a single cycle, deliver its notifications and exit.
    Once {
        #[arg(long)]
        dry_run: bool,
    },
    /// Create or upgrade the dedup store schema.
    Migrate,
    Status,
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = WatchConfig::from_env();

    match cli.command.unwrap_or(Commands::Run { dry_run: false }) {
        Commands::Run { dry_run } => run(config, dry_run).await?,
        Commands::Once { dry_run } => {
            let service = WatchService::build(config, BuildOptions { dry_run }).await?;
            service
                .store
                .init()
                .await
                .context("initializing dedup store")?;
            let report = service.controller.run_cycle_now().await;
            println!(
                "cycle complete: cycle_id={} outcome={:?} new={} errors={} delivered={}/{}",
                report.result.cycle_id,
                report.result.outcome,
                report.result.total_new(),
                report.result.total_errors(),
                report.delivered,
                report.messages
            );
        }
        Commands::Migrate => {
            jobwatch_sync::open_store(&config).await?;
            println!("dedup store ready: {}", config.database_url);
        }
        Commands::Status => {
            let store = jobwatch_sync::open_store(&config).await?;
            println!("{}", report::status_text(store.as_ref(), Utc::now()).await?);
        }
        Commands::Stats => {
            let store = jobwatch_sync::open_store(&config).await?;
            println!("{}", report::stats_text(store.as_ref(), Utc::now()).await?);
        }
    }

    Ok(())
}

fn init_tracing() {
    let log_format = std::env::var("JOBWATCH_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jobwatch=info"));

    match log_format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .init(),
    }
}

async fn run(config: WatchConfig, dry_run: bool) -> Result<()> {
    let mut service = WatchService::build(config, BuildOptions { dry_run }).await?;
    let triggers = service
        .take_triggers()
        .context("trigger receiver already taken")?;
    tokio::spawn(stop_on_ctrl_c(service.stop.clone()));

    let web = service.config.web_port.map(|port| {
        let state = AppState::new(service.commands.clone(), service.controller.subscribe());
        let stop = service.stop.clone();
        tokio::spawn(async move {
            if let Err(err) = jobwatch_web::serve(port, state, stop).await {
                error!(error = %err, "command server failed");
            }
        })
    });

    let mut scheduler = service.summary_scheduler().await?;
    if let Some(sched) = &scheduler {
        sched.start().await.context("starting summary scheduler")?;
        info!("daily summary scheduled");
    }

    let outcome = service.controller.run(triggers).await;
    // The controller may have failed before anyone asked it to stop.
    service.stop.stop();

    if let Some(sched) = scheduler.as_mut() {
        if let Err(err) = sched.shutdown().await {
            warn!(error = %err, "summary scheduler did not shut down cleanly");
        }
    }
    if let Some(handle) = web {
        if let Err(err) = handle.await {
            error!(error = %err, "command server task panicked");
        }
    }
    outcome
}
