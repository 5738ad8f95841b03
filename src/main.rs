//! Command-line interface for chunk-dump
//!
//! # Usage Examples
//!
//! ```bash
//! # Plan only: print the chunk count per table
//! chunk-dump --databases sakila --destination /backups/sakila --dry-run
//!
//! # Consistent dump of every database with 16 workers
//! chunk-dump --all-databases --threads 16 --chunk-size 50000 \
//!   --destination /backups/full --get-slave-status --execute
//!
//! # Non-locking dump of a single table
//! chunk-dump --tables app.events --lock-tables=false --consistent=false \
//!   --destination /backups/events --execute
//! ```
//!
//! Logging follows `RUST_LOG` when set, otherwise `--debug` / `--quiet`.

use chunk_dump::{run, DumpArgs};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chunk-dump")]
#[command(version)]
#[command(about = "Parallel, consistent, chunked MySQL dumps")]
#[command(long_about = None)]
struct Cli {
    #[command(flatten)]
    args: DumpArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.args.log_level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let dry_run = cli.args.dry_run && !cli.args.execute;

    tokio::select! {
        result = run(cli.args) => match result {
            Ok(summary) => {
                if dry_run {
                    print!("{summary}");
                }
            }
            Err(e) => {
                eprintln!("Error: {e:#}");
                std::process::exit(1);
            }
        },
        _ = shutdown_signal() => {
            tracing::error!("Interrupted, open transactions are abandoned");
            std::process::exit(130);
        }
    }
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
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
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
