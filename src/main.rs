use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use receipt_scanner::commands::{self, receipts::FilterArgs};
use receipt_scanner::db::Database;
use receipt_scanner::models::Currency;
use receipt_scanner::services::connectivity::{ConnectivityProbe, HttpProbe};
use receipt_scanner::services::gemini::{GeminiConfig, GeminiExtractor, DEFAULT_BASE_URL};
use receipt_scanner::services::state::AppState;

#[derive(Parser, Debug)]
#[command(
    name = "receipts",
    version,
    about = "Scan receipts with AI, track expenses, and export your data"
)]
struct Cli {
    /// Database file (defaults to the user data directory)
    #[arg(long, env = "RECEIPTS_DB", global = true)]
    db: Option<PathBuf>,

    /// Treat the network as unavailable; uploads are queued for later sync
    #[arg(long, global = true)]
    offline: bool,

    /// Gemini API key (falls back to API_KEY)
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan one receipt image, or several as a bulk upload
    Scan {
        /// Image files or directories of images
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Currency hint for the extraction (defaults to the configured currency)
        #[arg(long)]
        currency: Option<Currency>,

        /// Show the extracted receipt without saving it
        #[arg(long)]
        no_save: bool,
    },

    /// Sync receipts that were saved while offline
    Sync,

    /// Keep running and sync whenever connectivity returns
    Watch {
        /// Seconds between connectivity checks
        #[arg(long, default_value_t = 30)]
        interval: u64,
    },

    /// List saved receipts with totals
    List {
        #[command(flatten)]
        filter: FilterArgs,

        /// Split the total between this many people
        #[arg(long, default_value_t = 1)]
        split: u32,
    },

    /// Delete a saved receipt
    Delete { id: i64 },

    /// Export an expense summary of synced receipts
    Export {
        /// Output file (defaults to expense_summary_<date>.txt)
        #[arg(long)]
        out: Option<PathBuf>,

        #[command(flatten)]
        filter: FilterArgs,

        #[arg(long, default_value_t = 1)]
        split: u32,
    },

    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    /// Show persisted settings
    Show,
    /// Change a setting (default_currency, gemini_model)
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let db_path = match cli.db.clone() {
        Some(path) => path,
        None => default_db_path()?,
    };
    let db = Database::new(db_path)?;

    if let Command::Settings(command) = &cli.command {
        return match command {
            SettingsCommand::Show => commands::settings::show(&db),
            SettingsCommand::Set { key, value } => commands::settings::set(&db, key, value),
        };
    }

    let settings = db.load_settings();
    let api_key = cli.api_key.clone().or_else(|| std::env::var("API_KEY").ok());
    let config = GeminiConfig::new(api_key, settings.gemini_model.clone());
    let extractor = GeminiExtractor::new(config)?;

    let probe: Option<Arc<dyn ConnectivityProbe>> = if cli.offline {
        None
    } else {
        Some(Arc::new(HttpProbe::new(DEFAULT_BASE_URL, Duration::from_secs(5))?))
    };
    let state = AppState::new(Box::new(db), settings, Arc::new(extractor), !cli.offline, probe);

    match cli.command {
        Command::Scan {
            paths,
            currency,
            no_save,
        } => {
            sync_on_start(&state).await?;
            let currency = currency.unwrap_or(state.settings.default_currency);
            commands::scan::scan(&state, &paths, currency, !no_save).await
        }
        Command::Sync => {
            state.refresh_connectivity().await;
            let outcome = state.coordinator.sync_pending().await?;
            println!("{}", commands::describe_sync(&outcome));
            Ok(())
        }
        Command::Watch { interval } => state.watch(Duration::from_secs(interval.max(1))).await,
        Command::List { filter, split } => commands::receipts::list(&state, &filter, split),
        Command::Delete { id } => commands::receipts::delete(&state, id),
        Command::Export { out, filter, split } => {
            commands::receipts::export(&state, out, &filter, split)
        }
        Command::Settings(_) => Ok(()),
    }
}

async fn sync_on_start(state: &AppState) -> Result<()> {
    state.refresh_connectivity().await;
    let outcome = state.coordinator.sync_on_startup().await?;
    tracing::info!("{}", commands::describe_sync(&outcome));
    Ok(())
}

fn default_db_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| anyhow!("Could not determine the user data directory, pass --db"))?
        .join("receipt-scanner");
    std::fs::create_dir_all(&data_dir)?;
    Ok(data_dir.join("receipts.sqlite"))
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
