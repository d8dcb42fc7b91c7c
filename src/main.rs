use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wayback_relay::collect::{Slot, Slots};
use wayback_relay::config::Config;
use wayback_relay::dispatch::{DispatchError, Dispatcher};
use wayback_relay::ingest::{Ingestor, MastodonSource, MessageSource, TelegramSource};
use wayback_relay::publish::{render_plain, GitHubIssues, Publisher, TelegramChannel};

#[derive(Parser)]
#[command(name = "wayback-relay")]
#[command(about = "Archive links to several web archives at once")]
#[command(version)]
struct Cli {
    /// Slots to use instead of the configured ones (e.g. ia,is)
    #[arg(long, global = true, value_delimiter = ',')]
    slots: Option<Vec<Slot>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen on every configured chat platform
    Serve,

    /// Archive URLs and print the results
    Archive {
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Look up existing archives of URLs
    Playback {
        #[arg(required = true)]
        urls: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    init_tracing()?;

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(slots) = cli.slots {
        if let Some(slot) = slots.iter().find(|s| !s.is_writable()) {
            bail!("{slot} is lookup only and cannot be enabled for archiving");
        }
        config.slots = Slot::WRITABLE
            .into_iter()
            .map(|slot| (slot, slots.contains(&slot)))
            .collect::<Slots>();
    }
    config.validate().context("Invalid configuration")?;

    if config.bundle_enabled {
        tokio::fs::create_dir_all(&config.work_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create work directory: {}",
                    config.work_dir.display()
                )
            })?;
    }

    let dispatcher = Arc::new(Dispatcher::from_config(&config)?);

    let result = match cli.command {
        Commands::Serve => serve(&config, Arc::clone(&dispatcher)).await,
        Commands::Archive { urls } => match dispatcher.wayback(&urls, &config.slots).await {
            Ok(batch) => {
                print!("{}", render_plain(&batch.collects));
                Ok(())
            }
            Err(e) => report_failure(e),
        },
        Commands::Playback { urls } => match dispatcher.playback(&urls).await {
            Ok(collects) => {
                print!("{}", render_plain(&collects));
                Ok(())
            }
            Err(e) => report_failure(e),
        },
    };

    dispatcher.shutdown().await;
    result
}

/// Print whatever a failed batch collected, then fail.
fn report_failure(e: DispatchError) -> Result<()> {
    if !e.partial().is_empty() {
        print!("{}", render_plain(e.partial()));
    }
    Err(e.into())
}

async fn serve(config: &Config, dispatcher: Arc<Dispatcher>) -> Result<()> {
    info!(slots = ?config.enabled_slots(), "Starting wayback-relay");

    let mut sources: Vec<Arc<dyn MessageSource>> = Vec::new();
    let mut publishers: Vec<Arc<dyn Publisher>> = Vec::new();

    if let Some(token) = config.telegram_token.as_deref() {
        let source = TelegramSource::new(&config.endpoints.telegram_api, token)?;
        if let Some(channel) = config.telegram_channel.as_deref() {
            info!(channel = %channel, "Publishing to Telegram channel");
            publishers.push(Arc::new(TelegramChannel::new(source.bot().clone(), channel)));
        }
        sources.push(Arc::new(source));
    }

    if let (Some(server), Some(token)) = (
        config.mastodon_server.as_deref(),
        config.mastodon_access_token.as_deref(),
    ) {
        sources.push(Arc::new(MastodonSource::new(server, token)?));
    }

    if let Some((owner, repo, token)) = config.github_target() {
        info!(owner = %owner, repo = %repo, "Publishing to GitHub issues");
        publishers.push(Arc::new(GitHubIssues::new(
            &config.endpoints.github_api,
            owner,
            repo,
            token,
        )?));
    }

    if sources.is_empty() {
        bail!("No message source configured; set TELEGRAM_TOKEN or MASTODON_SERVER");
    }

    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();
    for source in sources {
        let ingestor = publishers.iter().fold(
            Ingestor::new(source, Arc::clone(&dispatcher), config),
            |ingestor, publisher| ingestor.with_publisher(Arc::clone(publisher)),
        );
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            ingestor.run(shutdown).await;
        }));
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down...");
    shutdown.cancel();

    // Each loop waits for its own archive cycles, bounded by SHUTDOWN_GRACE_SECS.
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Ingestion task failed: {e}");
        }
    }

    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,wayback_relay=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    // Logs go to stderr so archive/playback output stays clean
    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
