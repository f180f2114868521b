use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use herder::config::{self, Config};
use herder::integrations::claude::{hook_input::HookInput, HookContext, HookEvent};
use herder::integrations::github::GitHubClient;
use herder::poller::StatusPoller;
use herder::sessions::{spawn_summary_logger, spawn_sweeper, SessionStore};
use herder::socket::{client, SocketListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "herder")]
#[command(about = "Tracks AI coding-agent sessions and the CI status of their pull requests")]
#[command(version)]
struct Args {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Socket path, overriding the config file
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon (default)
    Serve,
    /// Hook handler, called by Claude Code hooks
    #[command(hide = true)]
    Hook {
        #[arg(long, value_enum)]
        event: HookEvent,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Hooks skip logging setup and never fail loudly
    if let Some(Command::Hook { event }) = args.command {
        run_hook(event, args.config, args.socket).await;
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("herder=info".parse()?),
        )
        .init();

    let mut config = config::load(args.config.as_deref())?;
    if let Some(socket) = args.socket {
        config.socket.path = socket;
    }

    serve(config).await
}

async fn run_hook(event: HookEvent, config_path: Option<PathBuf>, socket: Option<PathBuf>) {
    let socket_path = socket.unwrap_or_else(|| {
        config::load(config_path.as_deref())
            .map(|c| c.socket.path)
            .unwrap_or_else(|_| config::default_socket_path())
    });

    let input = HookInput::from_stdin();
    let Some(context) = HookContext::resolve(input.as_ref(), |key| std::env::var(key).ok()) else {
        return;
    };

    // A missing daemon must not block the agent
    let _ = client::send_event(&socket_path, &context.into_event(event)).await;
}

async fn serve(config: Config) -> Result<()> {
    let github = GitHubClient::from_config(&config.github).await?;
    if !github.is_authenticated() {
        tracing::info!("No GitHub token found, using unauthenticated API access");
    }

    let store = Arc::new(SessionStore::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    match SocketListener::bind(config.socket.path.clone()) {
        Ok(listener) => {
            let store = Arc::clone(&store);
            let shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(listener.run(store, shutdown)));
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                path = %config.socket.path.display(),
                "Socket listener unavailable, events will not be received"
            );
        }
    }

    tasks.push(spawn_sweeper(
        Arc::clone(&store),
        config.sessions.sweep_policy(),
        shutdown_rx.clone(),
    ));

    let poller = StatusPoller::new(Arc::clone(&store), Arc::new(github))
        .with_max_concurrent(config.polling.max_concurrent);
    tasks.push(poller.spawn(
        Duration::from_secs(config.polling.initial_delay_secs),
        Duration::from_secs(config.polling.interval_secs),
        shutdown_rx.clone(),
    ));

    tasks.push(spawn_summary_logger(Arc::clone(&store), shutdown_rx));

    tracing::info!("herder running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");

    shutdown_tx.send_replace(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }

    Ok(())
}
