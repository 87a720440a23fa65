use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fatura_fetch::accounts::{AccountSource, FileAccountSource, PostgrestAccountSource};
use fatura_fetch::clock::{Clock, SystemClock};
use fatura_fetch::config::{AccountSourceKind, ResolvedConfig};
use fatura_fetch::debug::DebugRecorder;
use fatura_fetch::downstream::DownstreamScript;
use fatura_fetch::eligibility::eligible_targets;
use fatura_fetch::models::Account;
use fatura_fetch::orchestrator::Orchestrator;
use fatura_fetch::portal::chrome::ChromePortal;
use fatura_fetch::prompt::TerminalPrompter;
use fatura_fetch::storage::{BlobStore, DedupStore, SupabaseStorage};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "fatura-fetch")]
#[command(about = "Retrieve monthly utility invoices from the distributor portal")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "fatura-fetch.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Retrieve today's eligible invoices for every account
    Run {
        /// Hand CAPTCHAs to the operator instead of failing the account
        #[arg(long)]
        interactive: bool,

        /// Force a headless browser
        #[arg(long, conflicts_with = "headed")]
        headless: bool,

        /// Force a visible browser window
        #[arg(long)]
        headed: bool,

        /// Only run accounts with this name (repeatable)
        #[arg(long = "account", value_name = "NAME")]
        accounts: Vec<String>,

        /// Do not run the document-processing script afterwards
        #[arg(long)]
        skip_downstream: bool,
    },
    /// List targets eligible today, without opening a browser
    Eligible {
        /// Only show accounts with this name (repeatable)
        #[arg(long = "account", value_name = "NAME")]
        accounts: Vec<String>,
    },
    /// Show current configuration
    Config,
}

#[derive(Serialize)]
struct EligibleOutput {
    account: String,
    targets: Vec<EligibleTarget>,
}

#[derive(Serialize)]
struct EligibleTarget {
    uc: String,
    day_of_month: Option<u32>,
    tolerance_days: u32,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,chromiumoxide=warn,chromiumoxide::conn=off,chromiumoxide::handler=off")
    });
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true).json())
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal in production.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = ResolvedConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config: {}", cli.config.display()))?;

    match cli.command {
        Command::Run {
            interactive,
            headless,
            headed,
            accounts,
            skip_downstream,
        } => {
            if headless {
                config.config.portal.headless = true;
            } else if headed || interactive {
                config.config.portal.headless = false;
            }

            let storage = open_storage(&config)?;
            let accounts = filter_accounts(load_accounts(&config).await?, &accounts);
            tracing::info!(accounts = accounts.len(), bucket = storage.bucket(), "Loaded accounts");

            let mut debug = DebugRecorder::new(&config.debug_dir);
            if config.config.debug.mirror_to_storage {
                debug = debug.with_mirror(Arc::clone(&storage));
            }

            let portal = ChromePortal::new(config.config.portal.clone(), config.config.timeouts.clone())
                .with_prompter(Arc::new(TerminalPrompter))
                .interactive(interactive);

            let orchestrator = Orchestrator::new(
                Arc::new(portal),
                DedupStore::new(Arc::clone(&storage)),
                debug,
                config.tz,
            );
            let mut report = orchestrator.run(&accounts).await;

            let downstream = &config.config.downstream;
            if downstream.enabled && !skip_downstream {
                let script = DownstreamScript::from_config(downstream);
                report.downstream = Some(script.run(&report.month, storage.bucket()).await);
            }

            tracing::info!(
                uploaded = report.uploaded_count(),
                failed = report.failed_count(),
                fatal = report.fatal_count(),
                "Run complete"
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Eligible { accounts } => {
            let accounts = filter_accounts(load_accounts(&config).await?, &accounts);
            let today = SystemClock.today_in(config.tz);
            let output: Vec<EligibleOutput> = accounts
                .iter()
                .map(|account| EligibleOutput {
                    account: account.name.clone(),
                    targets: eligible_targets(account, today)
                        .into_iter()
                        .map(|t| EligibleTarget {
                            uc: t.uc.to_string(),
                            day_of_month: t.day,
                            tolerance_days: t.tolerance_days,
                        })
                        .collect(),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Config => {
            println!("Config file: {}", cli.config.display());
            println!("Debug directory: {}", config.debug_dir.display());
            if let Some(path) = &config.accounts_file {
                println!("Accounts file: {}", path.display());
            }
            println!();
            print!("{}", toml::to_string_pretty(&config.config)?);
        }
    }

    Ok(())
}

fn open_storage(config: &ResolvedConfig) -> Result<Arc<dyn BlobStore>> {
    let storage = &config.config.storage;
    let store = SupabaseStorage::new(
        storage.url()?,
        storage.bucket()?,
        storage.service_key()?,
        config.config.timeouts.http,
    )?;
    Ok(Arc::new(store))
}

async fn load_accounts(config: &ResolvedConfig) -> Result<Vec<Account>> {
    let source: Box<dyn AccountSource> = match config.config.accounts.source {
        AccountSourceKind::Postgrest => {
            let storage = &config.config.storage;
            Box::new(PostgrestAccountSource::new(
                storage.url()?,
                storage.service_key()?,
                config.config.accounts.accounts_table.clone(),
                config.config.accounts.targets_table.clone(),
                config.config.timeouts.http,
            )?
            .with_active_column(config.config.accounts.active_column.clone()))
        }
        AccountSourceKind::File => {
            let path = config
                .accounts_file
                .clone()
                .context("accounts.source is \"file\" but accounts.path is not set")?;
            Box::new(FileAccountSource::new(path))
        }
    };
    source.load().await.context("Failed to load accounts")
}

fn filter_accounts(accounts: Vec<Account>, names: &[String]) -> Vec<Account> {
    if names.is_empty() {
        return accounts;
    }
    accounts
        .into_iter()
        .filter(|a| names.iter().any(|n| n.eq_ignore_ascii_case(&a.name)))
        .collect()
}
