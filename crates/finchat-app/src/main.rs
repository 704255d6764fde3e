//! finchat binary: composition root for the terminal chat client.
//!
//! 1. Load configuration from TOML
//! 2. Open the SQLite key-value store and scope it to the user
//! 3. Build the backend (HTTP, or scripted with `--offline`)
//! 4. Restore history and run the stdin loop

mod cli;
mod render;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use finchat_chat::{ChatBackend, ConversationController, HttpBackend, ScriptedBackend};
use finchat_core::config::FinchatConfig;
use finchat_storage::{PersistenceGateway, SqliteStore};

use cli::CliArgs;

const HELP: &str = "Commands: /retry  /clear  /history  /help  /quit";

/// Print each assistant message as it lands in the store.
async fn print_replies(mut rx: tokio::sync::watch::Receiver<finchat_chat::Snapshot>) {
    let mut last_seen = rx.borrow_and_update().last().map(|m| m.id);
    while rx.changed().await.is_ok() {
        let snapshot = rx.borrow_and_update().clone();
        for message in render::unseen(&snapshot, last_seen)
            .iter()
            .filter(|m| !m.is_user)
        {
            println!("{}", render::format_message(message));
        }
        last_seen = snapshot.last().map(|m| m.id);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let config = FinchatConfig::load_or_default(&config_file);

    // Tracing: --log-level > RUST_LOG > config. Logs go to stderr.
    let filter = match args.resolve_log_level() {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting finchat v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let data_dir = args.resolve_data_dir(&config.general.data_dir);
    let db_path = data_dir.join(&config.storage.database_file);
    let store = Arc::new(SqliteStore::open(&db_path)?);

    let gateway = Arc::new(PersistenceGateway::new(store));
    match args.resolve_user() {
        Some(user) => {
            tracing::info!(user = %user, "User context established");
            gateway.set_user(Some(user));
        }
        None => tracing::warn!("No user context; conversation will not be saved"),
    }

    // Backend.
    let backend: Arc<dyn ChatBackend> = if args.offline {
        tracing::info!("Offline mode: using scripted assistant");
        Arc::new(ScriptedBackend::new())
    } else {
        let endpoint = args.resolve_endpoint(&config.backend.endpoint);
        tracing::info!(endpoint = %endpoint, "Using HTTP backend");
        Arc::new(HttpBackend::new(
            endpoint,
            Duration::from_secs(config.backend.timeout_secs),
        )?)
    };

    let controller = ConversationController::new(backend, gateway, &config.chat);
    let restored = controller.restore_history()?;
    for message in controller.messages().iter() {
        println!("{}", render::format_message(message));
    }
    if restored == 0 {
        println!("Ask me anything about your finances. {}", HELP);
    }

    let printer = tokio::spawn(print_replies(controller.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/help" => println!("{}", HELP),
            "/history" => {
                for message in controller.messages().iter() {
                    println!("{}", render::format_message(message));
                }
            }
            "/clear" => match controller.clear_history() {
                Ok(()) => println!("History cleared."),
                Err(e) => eprintln!("error: {}", e),
            },
            "/retry" => match controller.retry_last_message().await {
                Ok(Some(_)) => {}
                Ok(None) => println!("Nothing to retry."),
                Err(e) => eprintln!("error: {}", e),
            },
            text => {
                if let Err(e) = controller.submit(text).await {
                    eprintln!("error: {}", e);
                }
            }
        }
        tokio::task::yield_now().await;
    }

    printer.abort();
    tracing::info!("finchat shutting down");
    Ok(())
}
