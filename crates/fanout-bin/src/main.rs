//! Fanout daemon - outbox relay, deduplicating consumer, and push delivery.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fanout_core::{init_logging, Config, Paths};

/// Fanout daemon command-line interface.
#[derive(Parser)]
#[command(name = "fanoutd")]
#[command(about = "Notification fan-out daemon: outbox relay with exactly-once delivery")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Base directory for runtime files (socket, database, config). Defaults to ~/.fanoutd
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Run,
    /// Check daemon status and pipeline counters
    Status,
    /// Append a change event to the outbox log (exercises the pipeline)
    Emit {
        /// Recipient user id
        #[arg(long)]
        user_id: String,
        /// Notification body
        #[arg(long)]
        body: String,
        /// Aggregate the event belongs to (defaults to the user id)
        #[arg(long)]
        aggregate_id: Option<String>,
        /// Domain event name
        #[arg(long, default_value = "notification.created")]
        event_type: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;

    match cli.command {
        Some(Commands::Run) | None => {
            app::run_daemon(config, paths).await?;
        }
        Some(Commands::Status) => {
            app::check_status(&paths).await?;
        }
        Some(Commands::Emit {
            user_id,
            body,
            aggregate_id,
            event_type,
        }) => {
            app::emit_event(&paths, &user_id, &body, aggregate_id.as_deref(), &event_type)?;
        }
    }

    Ok(())
}
