//! HTTP surface for operator commands.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use jobwatch_sync::{Command, CommandHandler, ControllerState, StopSignal, TriggerOutcome};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

pub const CRATE_NAME: &str = "jobwatch-web";

#[derive(Clone)]
pub struct AppState {
    pub commands: Arc<CommandHandler>,
    pub controller: watch::Receiver<ControllerState>,
}

impl AppState {
    pub fn new(commands: Arc<CommandHandler>, controller: watch::Receiver<ControllerState>) -> Self {
        Self {
            commands,
            controller,
        }
    }
}

#[derive(Debug, Serialize)]
struct CommandResponse {
    command: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    trigger: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    text: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(help_handler))
        .route("/health", get(health_handler))
        .route("/help", get(help_handler))
        .route("/status", get(status_handler))
        .route("/stats", get(stats_handler))
        .route("/check", post(check_handler))
        .route("/command", post(command_handler))
        .with_state(Arc::new(state))
}

/// Serves until `stop` fires.
pub async fn serve(port: u16, state: AppState, stop: StopSignal) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding command server to port {port}"))?;
    info!(port, "command server listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move { stop.stopped().await })
        .await?;
    Ok(())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let body = match *state.controller.borrow() {
        ControllerState::Running { interval } => {
            json!({ "state": "running", "interval_secs": interval.as_secs() })
        }
        ControllerState::Stopped => json!({ "state": "stopped" }),
    };
    Json(body).into_response()
}

async fn help_handler(State(state): State<Arc<AppState>>) -> Response {
    respond(&state, Command::Help).await
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    respond(&state, Command::Status).await
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    respond(&state, Command::Stats).await
}

async fn check_handler(State(state): State<Arc<AppState>>) -> Response {
    respond(&state, Command::Check).await
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CommandRequest>,
) -> Response {
    match request.text.parse::<Command>() {
        Ok(command) => respond(&state, command).await,
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn respond(state: &AppState, command: Command) -> Response {
    let reply = match state.commands.handle(command).await {
        Ok(reply) => reply,
        Err(err) => return server_error(err.into()),
    };

    let (status, trigger) = match reply.trigger {
        None => (StatusCode::OK, None),
        Some(TriggerOutcome::Queued) => (StatusCode::ACCEPTED, Some("queued")),
        Some(TriggerOutcome::AlreadyQueued) => (StatusCode::OK, Some("already_queued")),
        Some(TriggerOutcome::ControllerStopped) => {
            (StatusCode::SERVICE_UNAVAILABLE, Some("controller_stopped"))
        }
    };
    (
        status,
        Json(CommandResponse {
            command: command.to_string(),
            text: reply.text,
            trigger,
        }),
    )
        .into_response()
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %err, "command failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}
