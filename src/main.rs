//! # MGreen Notify — Scheduled Telegram Delivery
//!
//! Runs the notification pipeline of the MGreen microgreen platform:
//! a durable queue between the producing API and a scheduling consumer
//! that forwards messages to Telegram, honoring per-message `deliver_at`.
//!
//! Usage:
//!   mgreen init                                     # Write a default config file
//!   mgreen consume                                  # Run the scheduling consumer
//!   mgreen publish --to 42 --message "hi"           # Enqueue one message
//!   mgreen publish --to 42 --message "hi" --in-secs 5
//!   mgreen broadcast --message "harvest ready"      # Fan out to all recipients
//!   mgreen recipients                               # List registered recipients

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use mgreen_channels::TelegramSink;
use mgreen_core::{MGreenConfig, RecipientDirectory};
use mgreen_notify::{SchedulingConsumer, SqliteDirectory, broadcast};
use mgreen_queue::{Producer, SqliteQueue};

#[derive(Parser)]
#[command(name = "mgreen", version, about = "🌱 MGreen — Scheduled Telegram notifications")]
struct Cli {
    /// Config file path (default: ~/.mgreen/config.toml)
    #[arg(long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file if none exists.
    Init,
    /// Run the scheduling consumer until ctrl-c.
    Consume,
    /// Enqueue one message.
    Publish {
        /// Telegram chat id
        #[arg(long)]
        to: i64,
        /// Message text
        #[arg(long)]
        message: String,
        /// Deliver this many seconds from now (default: immediately)
        #[arg(long)]
        in_secs: Option<i64>,
    },
    /// Fan one message out to every registered recipient.
    Broadcast {
        /// Message text
        #[arg(long)]
        message: String,
        /// Deliver this many seconds from now (default: immediately)
        #[arg(long)]
        in_secs: Option<i64>,
    },
    /// List registered recipients.
    Recipients,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "mgreen=debug" } else { "mgreen=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    // Init runs before any config load — its whole point is that the
    // file may not exist yet.
    if let Command::Init = cli.command {
        let path = match &cli.config {
            Some(p) => std::path::PathBuf::from(expand_path(p)),
            None => MGreenConfig::default_path(),
        };
        if path.exists() {
            println!("Config already exists at {}", path.display());
        } else {
            MGreenConfig::default().save_to(&path)?;
            println!("Wrote default config to {}", path.display());
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => MGreenConfig::load_from(Path::new(&expand_path(path)))?,
        None => MGreenConfig::load()?,
    };

    let queue = Arc::new(SqliteQueue::open(Path::new(&expand_path(
        &config.queue.db_path,
    )))?);

    match cli.command {
        Command::Init => {}
        Command::Consume => {
            if config.telegram.bot_token.is_empty() {
                anyhow::bail!("No Telegram bot token configured (telegram.bot_token)");
            }
            let sink = Arc::new(TelegramSink::new(
                config.telegram.clone(),
                Duration::from_secs(config.delivery.send_timeout_secs),
            ));
            let me = sink.get_me().await?;
            tracing::info!(
                "Telegram bot: @{} ({})",
                me.username.as_deref().unwrap_or("unknown"),
                me.first_name
            );

            let consumer = Arc::new(SchedulingConsumer::new(
                queue,
                sink,
                &config.queue,
                config.delivery.clone(),
            ));

            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        tracing::info!("Shutdown requested");
                        let _ = shutdown_tx.send(true);
                    }
                    Err(e) => {
                        // Dropping the sender would read as shutdown to the
                        // consumer, so hold it and keep running.
                        tracing::warn!("Ctrl-c handler unavailable: {e}");
                        std::future::pending::<()>().await;
                    }
                }
            });

            consumer.run(shutdown_rx).await?;
        }
        Command::Publish { to, message, in_secs } => {
            let deliver_at = in_secs.map(|s| chrono::Utc::now() + chrono::Duration::seconds(s));
            let mut producer = Producer::new(queue, &config.queue.topic);
            producer.start().await?;
            let offset = producer.publish(to, &message, deliver_at).await?;
            producer.stop().await;
            println!("Queued at offset {offset}");
        }
        Command::Broadcast { message, in_secs } => {
            let deliver_at = in_secs.map(|s| chrono::Utc::now() + chrono::Duration::seconds(s));
            let directory =
                SqliteDirectory::open(Path::new(&expand_path(&config.directory.db_path)))?;
            let mut producer = Producer::new(queue, &config.queue.topic);
            producer.start().await?;
            let count = broadcast(&producer, &directory, &message, deliver_at).await?;
            producer.stop().await;
            println!("Queued for {count} recipients");
        }
        Command::Recipients => {
            let directory =
                SqliteDirectory::open(Path::new(&expand_path(&config.directory.db_path)))?;
            let recipients = directory.list_recipients().await?;
            if recipients.is_empty() {
                println!("No registered recipients");
            } else {
                for r in recipients {
                    println!("{:>6}  user {:>6}  telegram {}", r.id, r.user_id, r.telegram_id);
                }
            }
        }
    }

    Ok(())
}
