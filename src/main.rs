//! Herald command-line entry point.
//!
//! `herald run` (the default) connects to Telegram, starts the live listener
//! and serves operator commands from the console and the operator chat.
//! `herald audience` inspects or clears the persisted audience offline.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;

use herald::audience::{self, AudienceStore};
use herald::commands::{self, CommandSurface};
use herald::config::HeraldConfig;
use herald::console;
use herald::control::Controller;
use herald::dispatch::Dispatcher;
use herald::ingest::{spawn_live_listener, Pipeline};
use herald::logging;
use herald::matcher::Matcher;
use herald::platform::telegram::TelegramClient;
use herald::platform::ChatClient;

/// Queue depth for operator commands from all transports.
const COMMAND_BUFFER: usize = 32;

#[derive(Debug, Parser)]
#[command(name = "herald", version, about = "Keyword audience collector and notifier")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Connect, listen to the room and serve operator commands.
    Run,
    /// Inspect or clear the persisted audience without connecting.
    Audience {
        /// Audience file; defaults to the configured path.
        #[arg(long)]
        file: Option<PathBuf>,
        #[command(subcommand)]
        action: AudienceAction,
    },
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum AudienceAction {
    /// Print every recipient id, one per line.
    List,
    /// Print the number of recipients.
    Count,
    /// Remove every recipient.
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = HeraldConfig::load().context("failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Audience { file, action } => {
            logging::init_cli(&config.log_level);
            config.log_origin();
            let path = file.unwrap_or(config.paths.audience_file);
            audience_command(path, action).await
        }
    }
}

async fn run(config: HeraldConfig) -> Result<()> {
    config.validate()?;
    let _logging = logging::init_service(&config.paths.logs_dir, &config.log_level)?;
    config.log_origin();
    info!(version = env!("CARGO_PKG_VERSION"), "herald starting");

    let room = config.telegram.room_id;
    let (commands_tx, mut commands_rx) = mpsc::channel(COMMAND_BUFFER);

    let client: Arc<dyn ChatClient> = Arc::new(TelegramClient::new(
        config.telegram_settings()?,
        commands_tx.clone(),
    ));
    client
        .connect()
        .await
        .context("failed to connect to Telegram")?;
    client
        .get_room(room)
        .await
        .context("invalid room id or the bot has no access to the room")?;

    let audience = Arc::new(AudienceStore::open(&config.paths.audience_file).await);
    let controller = Arc::new(Controller::new());
    let matcher = Matcher::new(&config.matcher.keyword)?;
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&client),
        matcher,
        Arc::clone(&audience),
        config.ingest.settings(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&client),
        Arc::clone(&audience),
        Arc::clone(&controller),
        config.dispatch.settings(),
    ));

    let live = client
        .subscribe(room)
        .await
        .context("failed to subscribe to room messages")?;
    let listener = spawn_live_listener(Arc::clone(&pipeline), Arc::clone(&controller), live);

    console::spawn_console(commands_tx).context("failed to start console reader")?;

    let mut surface = CommandSurface::new(
        Arc::clone(&controller),
        pipeline,
        dispatcher,
        audience,
        room,
    );
    info!(room, keyword = %config.matcher.keyword, "herald ready");

    tokio::select! {
        () = commands::serve(&mut surface, &mut commands_rx, client.as_ref()) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    surface.shutdown().await;
    listener.abort();
    client.disconnect().await;
    info!("herald stopped");
    Ok(())
}

async fn audience_command(path: PathBuf, action: AudienceAction) -> Result<()> {
    match action {
        AudienceAction::List => {
            for id in audience::load_from(&path).await? {
                println!("{id}");
            }
        }
        AudienceAction::Count => {
            println!("{}", audience::load_from(&path).await?.len());
        }
        AudienceAction::Clear => {
            AudienceStore::open(&path).await.clear().await?;
            println!("Audience cleared: {}", path.display());
        }
    }
    Ok(())
}
