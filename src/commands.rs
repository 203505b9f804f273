//! Operator command surface.
//!
//! Commands arrive as text lines from the console or from the operator's
//! chat and are processed one at a time, in arrival order. `/parse` runs the
//! backfill inline, so later commands wait until it finishes. `/start`
//! launches the dispatcher in the background so `/stop` stays responsive.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::audience::{AudienceStore, RecipientId};
use crate::control::{Controller, ScanTransition, StartRefusal};
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::ingest::{run_backfill, Pipeline};
use crate::platform::{ChatClient, RoomId};

/// How long shutdown waits for a stopped dispatch run to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Every command the surface understands.
pub const ALL_COMMANDS: [Command; 6] = [
    Command::Parse,
    Command::Start,
    Command::Stop,
    Command::Check,
    Command::Reset,
    Command::Exit,
];

/// Operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Enable scanning and backfill the room history.
    Parse,
    /// Notify the audience.
    Start,
    /// Disable scanning and sending.
    Stop,
    /// Report both flags.
    Check,
    /// Empty the audience.
    Reset,
    /// Disconnect and terminate.
    Exit,
}

impl Command {
    /// The exact token that selects this command.
    pub fn token(self) -> &'static str {
        match self {
            Self::Parse => "/parse",
            Self::Start => "/start",
            Self::Stop => "/stop",
            Self::Check => "/check",
            Self::Reset => "/reset",
            Self::Exit => "/exit",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Command parsing failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The token is not one of [`ALL_COMMANDS`].
    #[error("unknown command: {0:?}")]
    Unknown(String),
}

impl FromStr for Command {
    type Err = CommandError;

    /// Exact, case-sensitive match on the trimmed line.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        ALL_COMMANDS
            .into_iter()
            .find(|c| c.token() == token)
            .ok_or_else(|| CommandError::Unknown(token.to_owned()))
    }
}

/// Comma-separated command list for prompts and error replies.
pub fn command_list() -> String {
    ALL_COMMANDS
        .iter()
        .map(|c| c.token())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Where a command came from, and therefore where its reply goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Local console; replies go to stdout.
    Console,
    /// Operator chat; replies are sent back to this chat id.
    Chat(i64),
}

/// One raw command line waiting to be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInput {
    /// Text as typed.
    pub line: String,
    /// Reply destination.
    pub origin: Origin,
}

/// Acknowledgement for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Message shown to the operator.
    pub text: String,
    /// The process should terminate after delivering this reply.
    pub exit: bool,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            exit: false,
        }
    }
}

/// Executes operator commands against the controller, pipeline and dispatcher.
pub struct CommandSurface {
    controller: Arc<Controller>,
    pipeline: Arc<Pipeline>,
    dispatcher: Arc<Dispatcher>,
    audience: Arc<AudienceStore>,
    room: RoomId,
    dispatch_task: Option<JoinHandle<DispatchOutcome>>,
}

impl CommandSurface {
    /// Wire the surface to the core components.
    pub fn new(
        controller: Arc<Controller>,
        pipeline: Arc<Pipeline>,
        dispatcher: Arc<Dispatcher>,
        audience: Arc<AudienceStore>,
        room: RoomId,
    ) -> Self {
        Self {
            controller,
            pipeline,
            dispatcher,
            audience,
            room,
            dispatch_task: None,
        }
    }

    /// Parse and run one command line.
    pub async fn execute(&mut self, line: &str) -> Reply {
        info!(command = line.trim(), "received command");
        match line.parse::<Command>() {
            Ok(command) => self.handle(command).await,
            Err(e) => {
                warn!(error = %e, "rejected operator input");
                Reply::text(format!(
                    "Unknown command: {}. Available: {}",
                    line.trim(),
                    command_list()
                ))
            }
        }
    }

    /// Run a parsed command.
    pub async fn handle(&mut self, command: Command) -> Reply {
        match command {
            Command::Parse => self.parse().await,
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::Check => self.check().await,
            Command::Reset => self.reset().await,
            Command::Exit => {
                info!("shutting down on operator request");
                Reply {
                    text: "Shutting down.".to_owned(),
                    exit: true,
                }
            }
        }
    }

    async fn parse(&mut self) -> Reply {
        if self.controller.begin_scan() == ScanTransition::AlreadyScanning {
            info!("scanning already active");
            return Reply::text("Scanning is already active.");
        }

        match run_backfill(&self.pipeline, self.room).await {
            Ok(report) => Reply::text(format!(
                "Scanning started. Backfill: {} messages scanned, {} matched, {} new recipients, {} failed.",
                report.scanned, report.matched, report.added, report.failed
            )),
            Err(e) => {
                warn!(error = %e, "backfill skipped, scanning live messages only");
                Reply::text(format!("Scanning started. Backfill skipped: {e}"))
            }
        }
    }

    fn start(&mut self) -> Reply {
        // A stopped run keeps going until its in-flight send and retries end.
        let winding_down = self
            .dispatch_task
            .as_ref()
            .is_some_and(|task| !task.is_finished());
        if winding_down && self.controller.is_scanning() && !self.controller.is_sending() {
            info!("start refused, previous dispatch run is still stopping");
            return Reply::text("Previous sending run is still stopping. Try /start again shortly.");
        }

        match self.controller.begin_sending() {
            Err(StartRefusal::NotScanning) => {
                info!("start refused, scanning is not active");
                Reply::text("Start parsing first with /parse.")
            }
            Err(StartRefusal::AlreadySending) => {
                info!("start ignored, sending already active");
                Reply::text("Sending is already active.")
            }
            Ok(ticket) => {
                let dispatcher = Arc::clone(&self.dispatcher);
                self.dispatch_task = Some(tokio::spawn(async move { dispatcher.run(ticket).await }));
                Reply::text("Sending started.")
            }
        }
    }

    fn stop(&mut self) -> Reply {
        if self.controller.stop() {
            Reply::text("Scanning and sending stopped.")
        } else {
            Reply::text("Neither scanning nor sending is active.")
        }
    }

    async fn check(&self) -> Reply {
        let state = self.controller.state();
        let recipients = self.audience.len().await;
        info!(scanning = state.scanning, sending = state.sending, recipients, "status requested");
        Reply::text(format!(
            "Scanning: {}. Sending: {}. Audience: {recipients} recipients.",
            if state.scanning { "active" } else { "inactive" },
            if state.sending { "active" } else { "inactive" },
        ))
    }

    async fn reset(&self) -> Reply {
        match self.audience.clear().await {
            Ok(()) => Reply::text("Audience cleared."),
            Err(e) => {
                warn!(error = %e, "failed to reset audience");
                Reply::text(format!("Failed to clear audience: {e}"))
            }
        }
    }

    /// Wait for the most recent dispatch run to end and return its outcome.
    pub async fn join_dispatch(&mut self) -> Option<DispatchOutcome> {
        let task = self.dispatch_task.take()?;
        match task.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(error = %e, "dispatch task ended abnormally");
                None
            }
        }
    }

    /// Stop everything and give an in-flight dispatch run a short grace period.
    pub async fn shutdown(&mut self) {
        self.controller.stop();
        let Some(mut task) = self.dispatch_task.take() else {
            return;
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            warn!("dispatch run did not stop in time, aborting");
            task.abort();
        }
    }
}

/// Process command inputs until `/exit` or until every input source closes.
///
/// Console replies are printed to stdout; chat replies are sent back through
/// `client`.
pub async fn serve(
    surface: &mut CommandSurface,
    inputs: &mut mpsc::Receiver<CommandInput>,
    client: &dyn ChatClient,
) {
    while let Some(input) = inputs.recv().await {
        let reply = surface.execute(&input.line).await;
        deliver_reply(client, input.origin, &reply.text).await;
        if reply.exit {
            break;
        }
    }
    surface.shutdown().await;
}

async fn deliver_reply(client: &dyn ChatClient, origin: Origin, text: &str) {
    match origin {
        Origin::Console => println!("{text}"),
        Origin::Chat(chat) => {
            if let Err(e) = client.send_message(RecipientId(chat), text).await {
                warn!(chat, error = %e, "failed to deliver command reply");
            }
        }
    }
}
