//! Operator commands (`/status`, `/stats`, `/check`, `/help`) independent of transport.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use jobwatch_storage::{DedupStore, StoreError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::clock::Clock;
use crate::report;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Status,
    Stats,
    Check,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown command `{0}`")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    /// Accepts `status`, `/status` and `/status@SomeBot`, case-insensitively.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let word = input.split_whitespace().next().unwrap_or_default();
        let name = word.trim_start_matches('/');
        let name = name.split('@').next().unwrap_or_default();
        match name.to_ascii_lowercase().as_str() {
            "status" => Ok(Command::Status),
            "stats" => Ok(Command::Stats),
            "check" => Ok(Command::Check),
            "help" | "start" => Ok(Command::Help),
            _ => Err(UnknownCommand(input.trim().to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Command::Status => "status",
            Command::Stats => "stats",
            Command::Check => "check",
            Command::Help => "help",
        })
    }
}

pub fn help_text() -> String {
    [
        "<b>Job watch commands</b>",
        "/status - totals and per-source counts",
        "/stats - jobs found over the last 7 days",
        "/check - run a poll cycle now",
        "/help - this message",
    ]
    .join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Queued,
    /// A manual cycle is already waiting; requests coalesce.
    AlreadyQueued,
    ControllerStopped,
}

/// Handle for requesting an out-of-schedule cycle.
#[derive(Debug, Clone)]
pub struct CycleTrigger {
    tx: mpsc::Sender<()>,
}

/// At most one pending request is buffered.
pub fn trigger_channel() -> (CycleTrigger, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (CycleTrigger { tx }, rx)
}

impl CycleTrigger {
    pub fn request(&self) -> TriggerOutcome {
        match self.tx.try_send(()) {
            Ok(()) => TriggerOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(())) => TriggerOutcome::AlreadyQueued,
            Err(mpsc::error::TrySendError::Closed(())) => TriggerOutcome::ControllerStopped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub text: String,
    pub trigger: Option<TriggerOutcome>,
}

pub struct CommandHandler {
    store: Arc<dyn DedupStore>,
    trigger: CycleTrigger,
    clock: Arc<dyn Clock>,
}

impl CommandHandler {
    pub fn new(store: Arc<dyn DedupStore>, trigger: CycleTrigger, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            trigger,
            clock,
        }
    }

    pub async fn handle(&self, command: Command) -> Result<CommandReply, StoreError> {
        info!(%command, "operator command");
        let now = self.clock.now();
        let reply = match command {
            Command::Status => CommandReply {
                text: report::status_text(self.store.as_ref(), now).await?,
                trigger: None,
            },
            Command::Stats => CommandReply {
                text: report::stats_text(self.store.as_ref(), now).await?,
                trigger: None,
            },
            Command::Help => CommandReply {
                text: help_text(),
                trigger: None,
            },
            Command::Check => {
                let outcome = self.trigger.request();
                let text = match outcome {
                    TriggerOutcome::Queued => "Manual check queued. Results follow shortly.",
                    TriggerOutcome::AlreadyQueued => "A manual check is already queued.",
                    TriggerOutcome::ControllerStopped => "The poller is not running.",
                };
                CommandReply {
                    text: text.to_string(),
                    trigger: Some(outcome),
                }
            }
        };
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixed_clock;
    use jobwatch_storage::MemoryDedupStore;

    #[test]
    fn parses_chat_style_commands() {
        assert_eq!("/status".parse::<Command>().unwrap(), Command::Status);
        assert_eq!("/Stats@JobWatchBot".parse::<Command>().unwrap(), Command::Stats);
        assert_eq!("check now".parse::<Command>().unwrap(), Command::Check);
        assert_eq!("/start".parse::<Command>().unwrap(), Command::Help);
        assert_eq!(
            "/apply".parse::<Command>(),
            Err(UnknownCommand("/apply".to_string()))
        );
        assert!("".parse::<Command>().is_err());
    }

    #[tokio::test]
    async fn check_requests_coalesce_until_consumed() {
        let (trigger, mut rx) = trigger_channel();
        let handler = CommandHandler::new(Arc::new(MemoryDedupStore::new()), trigger, fixed_clock());

        let first = handler.handle(Command::Check).await.unwrap();
        assert_eq!(first.trigger, Some(TriggerOutcome::Queued));
        let second = handler.handle(Command::Check).await.unwrap();
        assert_eq!(second.trigger, Some(TriggerOutcome::AlreadyQueued));

        rx.recv().await.unwrap();
        let third = handler.handle(Command::Check).await.unwrap();
        assert_eq!(third.trigger, Some(TriggerOutcome::Queued));

        drop(rx);
        let closed = handler.handle(Command::Check).await.unwrap();
        assert_eq!(closed.trigger, Some(TriggerOutcome::ControllerStopped));
    }

    #[tokio::test]
    async fn status_on_empty_store() {
        let (trigger, _rx) = trigger_channel();
        let handler = CommandHandler::new(Arc::new(MemoryDedupStore::new()), trigger, fixed_clock());
        let reply = handler.handle(Command::Status).await.unwrap();
        assert!(reply.text.contains("Total jobs seen: 0"));
        assert_eq!(reply.trigger, None);
    }
}
