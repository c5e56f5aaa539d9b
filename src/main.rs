//! Threadbot CLI entry point.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use threadbot::config::Config;
use threadbot::session::manager::SessionManager;
use threadbot::session::monitor::{BackgroundCleanup, SessionMonitor};
use threadbot::session::persist::RedbSessionStore;
use threadbot::session::worktree::GitWorktrees;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Parser)]
#[command(name = "threadbot", version)]
#[command(about = "Chat-thread orchestrator for an assistant CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (optional)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Start the orchestrator (default when no subcommand is given)
    Start {
        /// Log to stdout instead of the rolling file
        #[arg(short, long)]
        foreground: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let foreground = match cli.command {
        Some(Command::Start { foreground }) => foreground,
        None => true,
    };
    init_tracing(&config, cli.debug, foreground)?;

    let runtime = tokio::runtime::Runtime::new().context("failed to build tokio runtime")?;
    runtime.block_on(run(config))
}

fn init_tracing(config: &Config, debug: bool, foreground: bool) -> anyhow::Result<()> {
    let filter = if debug {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("threadbot=debug,info"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("threadbot=info,warn"))
    };

    if foreground {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .init();
    } else {
        std::fs::create_dir_all(config.log_dir()).context("failed to create log directory")?;
        let appender = tracing_appender::rolling::daily(config.log_dir(), "threadbot.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        // Leak the guard so the writer lives for the whole process.
        std::mem::forget(guard);
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .compact(),
            )
            .init();
    }
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "threadbot starting");

    let store = Arc::new(
        RedbSessionStore::open(&config.store_path())
            .context("failed to open the session store")?,
    );
    let manager = SessionManager::new(config.clone(), store, Arc::new(GitWorktrees));
    manager.restore_persisted().await;

    // Platform adapters register here; they ship as separate crates that
    // implement `threadbot::platform::Platform`.
    if manager.platform_count() == 0 {
        tracing::warn!("no platform adapters registered; sessions cannot start");
    }
    manager.run().await?;

    let monitor = SessionMonitor::new(manager.clone()).start(std::time::Duration::from_secs(
        config.session.monitor_interval_secs,
    ));
    let cleanup = BackgroundCleanup::new(manager.clone()).start(std::time::Duration::from_secs(
        config.cleanup.interval_minutes * 60,
    ));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("ctrl-c received, shutting down gracefully");

    monitor.abort();
    cleanup.abort();
    manager.shutdown(true).await;
    Ok(())
}
