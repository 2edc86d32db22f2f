//! # docsync CLI
//!
//! ```bash
//! docsync --config ./config/docsync.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsync sync full` | Re-index every file and capture a cursor |
//! | `docsync sync incremental` | Apply changes since the stored cursor |
//! | `docsync list` | Print the files under the configured root |
//! | `docsync status` | Connection check and cursor presence |
//! | `docsync cursor show` | Print the stored cursor |
//! | `docsync cursor reset` | Delete the cursor, forcing a full sync next |
//! | `docsync search "<query>"` | Nearest chunks for a query |
//! | `docsync serve` | HTTP control surface and background scheduler |

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use docsync::commands;
use docsync::config::load_config;
use docsync::search::DEFAULT_K;
use tracing_subscriber::EnvFilter;

/// docsync keeps a vector index in step with a SharePoint document library.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docsync.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "docsync", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync in the foreground and print its stats.
    Sync {
        #[command(subcommand)]
        mode: SyncMode,
    },

    /// List the files under the configured root folder.
    ///
    /// Walks the folder tree the same way a full sync does, without
    /// downloading anything.
    List,

    /// Check the connection to SharePoint and report cursor presence.
    Status,

    /// Inspect or reset the change-feed cursor.
    Cursor {
        #[command(subcommand)]
        action: CursorAction,
    },

    /// Search the vector index.
    Search {
        /// The search query string.
        query: String,

        /// Number of results.
        #[arg(long, default_value_t = DEFAULT_K)]
        k: usize,

        /// Only return chunks of this file.
        #[arg(long)]
        file_id: Option<String>,
    },

    /// Start the HTTP control surface and, if enabled, the scheduler.
    Serve,
}

#[derive(Subcommand)]
enum SyncMode {
    /// Re-index every file under the root.
    Full,
    /// Apply changes since the stored cursor.
    Incremental,
}

#[derive(Subcommand)]
enum CursorAction {
    /// Print the stored cursor.
    Show,
    /// Delete the stored cursor. The next scheduled run will be a full sync.
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docsync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Sync { mode } => match mode {
            SyncMode::Full => commands::run_sync(&cfg, true).await?,
            SyncMode::Incremental => commands::run_sync(&cfg, false).await?,
        },
        Commands::List => commands::run_list(&cfg).await?,
        Commands::Status => commands::run_status(&cfg).await?,
        Commands::Cursor { action } => match action {
            CursorAction::Show => commands::run_cursor_show(&cfg)?,
            CursorAction::Reset => commands::run_cursor_reset(&cfg)?,
        },
        Commands::Search { query, k, file_id } => {
            commands::run_search(&cfg, &query, k, file_id.as_deref()).await?
        }
        Commands::Serve => commands::run_serve(&cfg).await?,
    }

    Ok(())
}
