//! MakerVault sync - command-line front end for the catalog synchronizer.
//!
//! Runs a one-off sync, audits stored files, or keeps syncing on an interval
//! until interrupted.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vault_core::catalog::payload::parse_timestamp;
use vault_core::config::default_storage_root;
use vault_core::{
    check_integrity, synchronize_managed, CatalogSettings, CatalogStore, RemoteCatalogClient,
    Scheduler, StopSignal, StorageConfig, SyncConfig, SyncOptions, SyncReport, Synchronizer,
};

#[derive(Parser, Debug)]
#[command(name = "vault-sync")]
#[command(about = "Synchronize a remote model catalog into local storage")]
struct Args {
    /// SQLite database file
    #[arg(long, global = true, default_value = StorageConfig::DEFAULT_DATABASE_PATH)]
    db: PathBuf,

    /// Directory that receives downloaded attachments
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    /// Catalog base URL (overrides MAKERWORLD_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Catalog username (overrides MAKERWORLD_USERNAME)
    #[arg(long, global = true)]
    username: Option<String>,

    /// Catalog password (overrides MAKERWORLD_PASSWORD)
    #[arg(long, global = true)]
    password: Option<String>,

    /// Bearer token (overrides MAKERWORLD_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Log level: error, warn, info, debug or trace
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one synchronization pass
    Sync {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Verify stored attachments against their recorded checksums
    CheckIntegrity,
    /// Synchronize on a fixed interval until interrupted
    Schedule {
        #[command(flatten)]
        run: RunArgs,

        /// Minutes between runs
        #[arg(long, default_value_t = SyncConfig::DEFAULT_INTERVAL.as_secs() / 60)]
        interval_minutes: u64,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Number of listing pages to walk
    #[arg(long, default_value_t = SyncConfig::DEFAULT_PAGES)]
    pages: u32,

    /// Entries per listing page
    #[arg(long, default_value_t = SyncConfig::DEFAULT_PER_PAGE)]
    per_page: u32,

    /// Only sync entries updated after this timestamp (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_parser = parse_updated_after)]
    updated_after: Option<DateTime<Utc>>,

    /// Persist metadata only; skip attachment downloads
    #[arg(long)]
    no_download: bool,

    /// Concurrent model workers per page
    #[arg(long, default_value_t = SyncConfig::DEFAULT_CONCURRENCY)]
    concurrency: usize,
}

fn parse_updated_after(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    parse_timestamp(&serde_json::Value::String(value.to_string()))
        .ok_or_else(|| format!("invalid timestamp: {}", value))
}

impl Args {
    fn storage_root(&self) -> PathBuf {
        self.storage.clone().unwrap_or_else(default_storage_root)
    }

    fn settings(&self) -> CatalogSettings {
        CatalogSettings::from_env().with_overrides(
            self.base_url.clone(),
            self.username.clone(),
            self.password.clone(),
            self.token.clone(),
        )
    }

    fn sync_options(&self, run: &RunArgs) -> SyncOptions {
        SyncOptions {
            pages: run.pages,
            per_page: run.per_page,
            updated_after: run.updated_after,
            download_files: !run.no_download,
            storage_root: self.storage_root(),
            concurrency: run.concurrency,
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    if std::env::var_os("RUST_LOG").is_some() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(false)
            .compact()
            .init();
        return Ok(());
    }

    let level = Level::from_str(level).with_context(|| format!("invalid log level: {}", level))?;
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();
    Ok(())
}

fn print_report(report: &SyncReport) {
    println!(
        "pages={} persisted={} skipped={} downloaded={} reused={} download_failures={} removed={}{}",
        report.pages_fetched,
        report.models_persisted,
        report.models_skipped,
        report.attachments_downloaded,
        report.attachments_reused,
        report.download_failures,
        report.attachments_removed,
        if report.stopped { " (stopped)" } else { "" }
    );
}

async fn run_sync(args: &Args, run: &RunArgs, store: CatalogStore) -> Result<()> {
    let options = args.sync_options(run);
    let stop = StopSignal::new();

    let interrupt = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight models");
            interrupt.stop();
        }
    });

    let report = synchronize_managed(args.settings(), store, &options, Some(stop))
        .await
        .context("synchronization failed")?;
    print_report(&report);
    Ok(())
}

fn run_check_integrity(args: &Args, store: &CatalogStore) -> Result<()> {
    let report = check_integrity(store, args.storage_root())?;
    println!(
        "checked={} passed={} findings={}",
        report.checked,
        report.passed,
        report.findings.len()
    );
    for finding in &report.findings {
        println!("{}\t{}\t{}", finding.attachment_id, finding.path.display(), finding.error);
    }
    if !report.is_clean() {
        bail!("{} attachments failed verification", report.findings.len());
    }
    Ok(())
}

async fn run_schedule(
    args: &Args,
    run: &RunArgs,
    store: CatalogStore,
    interval_minutes: u64,
) -> Result<()> {
    if interval_minutes == 0 {
        bail!("--interval-minutes must be at least 1");
    }
    let client = Arc::new(RemoteCatalogClient::new(args.settings())?);
    let synchronizer = Arc::new(Synchronizer::new(client.clone(), store));
    let interval = Duration::from_secs(interval_minutes * 60);
    let scheduler = Scheduler::new(synchronizer, args.sync_options(run), interval);

    scheduler.start();
    info!("Scheduled sync every {} minutes; press Ctrl-C to stop", interval_minutes);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping scheduler");
    scheduler.stop();
    while scheduler.is_running() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    client.close();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let store = CatalogStore::new(&args.db)
        .with_context(|| format!("failed to open database {}", args.db.display()))?;
    info!("Using database {}", args.db.display());

    match &args.command {
        Command::Sync { run } => run_sync(&args, run, store).await,
        Command::CheckIntegrity => run_check_integrity(&args, &store),
        Command::Schedule {
            run,
            interval_minutes,
        } => run_schedule(&args, run, store, *interval_minutes).await,
    }
}
