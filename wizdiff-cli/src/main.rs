//! wizdiff — patch-distribution change monitor.
//!
//! Supports:
//! - Cold-start bootstrap against the current revision (`bootstrap`)
//! - The update poll loop (`run`)
//! - Inspecting local inventory state (`info`)

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use wizdiff_core::{
    archive, manifest, ArchiveEntry, Config, DiffEngine, InventoryStore, LoggingNotifier, Notifier,
    PatchDirectory, Revision,
};
use wizdiff_notify::WebhookNotifier;

#[derive(Parser, Debug)]
#[command(name = "wizdiff")]
#[command(author = "wizdiff contributors")]
#[command(version = "0.1.0")]
#[command(about = "Monitors a remote game patch distribution service for content revisions")]
struct Cli {
    /// Path to the sqlite inventory database.
    #[arg(long, global = true, default_value = "wizdiff.db")]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cold-start: record the current revision and ingest its full
    /// manifest and archive inventory without emitting any deltas.
    Bootstrap,

    /// Run the poll loop: repeatedly check for a new revision and, when
    /// found, emit deltas to the configured notifier.
    Run {
        /// Seconds to sleep between ticks when no new revision is found.
        #[arg(long)]
        sleep_time: Option<u64>,
        /// Discord-compatible webhook URL to post delta messages to.
        #[arg(long)]
        webhook: Option<String>,
        /// Optional thread id to scope webhook posts to.
        #[arg(long)]
        thread: Option<String>,
        /// Delete the prior revision's inventory once a new one commits.
        #[arg(long)]
        delete_old_revisions: bool,
    },

    /// Display the locally recorded inventory state.
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wizdiff=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Bootstrap => cmd_bootstrap(&cli.db_path).await,
        Commands::Run { sleep_time, webhook, thread, delete_old_revisions } => {
            cmd_run(&cli.db_path, sleep_time, webhook, thread, delete_old_revisions).await
        }
        Commands::Info => cmd_info(&cli.db_path).await,
    }
}

fn load_config(db_path: &Path) -> Result<Config> {
    let sidecar = db_path.with_extension("config.json");
    Ok(Config::load_or_default(&sidecar)?)
}

async fn cmd_bootstrap(db_path: &Path) -> Result<()> {
    if db_path.exists() {
        return Err(anyhow!("database already exists at {db_path:?}; bootstrap is only for cold start"));
    }

    let config = load_config(db_path)?;
    let directory = PatchDirectory::new(config.patch_directory_host.clone(), config.patch_directory_port);
    let client = wizdiff_core::http::build_client()?;

    println!("Resolving patch directory...");
    let (manifest_url, asset_base_url) = directory.get_patch_urls().await?;
    let revision = wizdiff_core::extract_revision_tag(&manifest_url)?;
    println!("Current revision: {revision}");

    let store = InventoryStore::open(db_path).context("opening inventory store")?;
    store.add_revision(&Revision { name: revision.clone(), observed_at: chrono::Utc::now().timestamp() })?;

    println!("Fetching manifest...");
    let manifest_bytes = wizdiff_core::http::fetch(&client, &manifest_url).await?;
    let tables = manifest::parse_manifest(&manifest_bytes)?;
    let records = manifest::file_records(&tables)?;

    let archive_count = records.iter().filter(|r| r.name.ends_with(".wad")).count();
    println!("Ingesting {} top-level files ({} archives)...", records.len(), archive_count);

    for record in &records {
        store.add_versioned_file(&wizdiff_core::VersionedFile {
            crc: record.crc,
            size: record.size,
            revision: revision.clone(),
            name: record.name.clone(),
        })?;

        if record.name.ends_with(".wad") {
            let archive_url = join_url(&asset_base_url, &record.name);
            let header_url = format!("{archive_url}.hdr.gz");
            let header_bytes = wizdiff_core::http::fetch_archive_journal_header(&client, &header_url).await?;
            let journal = archive::parse_archive_journal(&header_bytes)?;

            for entry in &journal.entries {
                store.add_archive_entry(&ArchiveEntry {
                    file_offset: entry.file_offset,
                    crc: entry.crc,
                    size: entry.size,
                    compressed_size: entry.compressed_size,
                    is_compressed: entry.is_compressed,
                    revision: revision.clone(),
                    name: entry.name.clone(),
                    archive_name: record.name.clone(),
                })?;
            }
        }
    }

    println!("Bootstrap complete. Run `wizdiff run` to begin polling for changes.");
    Ok(())
}

fn join_url(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}

async fn cmd_run(
    db_path: &Path,
    sleep_time: Option<u64>,
    webhook: Option<String>,
    thread: Option<String>,
    delete_old_revisions: bool,
) -> Result<()> {
    if !db_path.exists() {
        println!("No database found at {db_path:?}; run `wizdiff bootstrap` first.");
        return Err(anyhow!("missing database at {db_path:?}"));
    }

    let config = load_config(db_path)?;
    let sleep_time = Duration::from_secs(sleep_time.unwrap_or(config.sleep_time));

    let store = Arc::new(InventoryStore::open(db_path).context("opening inventory store")?);
    let client = wizdiff_core::http::build_client()?;

    let notifier: Arc<dyn Notifier> = match webhook {
        Some(url) => Arc::new(WebhookNotifier::new(url, thread)),
        None => Arc::new(LoggingNotifier),
    };

    let directory = PatchDirectory::new(config.patch_directory_host.clone(), config.patch_directory_port);
    let engine = DiffEngine::new(store, client.clone(), notifier);
    let lifecycle = wizdiff_core::Lifecycle::new(directory, client, engine, delete_old_revisions);

    println!("Starting poll loop (sleep_time = {}s)...", sleep_time.as_secs());
    lifecycle.run_forever(sleep_time).await
}

async fn cmd_info(db_path: &Path) -> Result<()> {
    if !db_path.exists() {
        println!("No database found at {db_path:?}.");
        return Ok(());
    }

    let store = InventoryStore::open(db_path).context("opening inventory store")?;
    match store.latest_revision()? {
        Some(revision) => {
            println!("Database:       {db_path:?}");
            println!("Latest revision: {}", revision.name);
            println!("Observed at:     {}", revision.observed_at);
            let files = store.all_versioned_files_for(&revision.name)?;
            let archive_count = files.iter().filter(|f| f.name.ends_with(".wad")).count();
            println!("Top-level files: {} ({} archives)", files.len(), archive_count);
        }
        None => {
            println!("Database exists but has no recorded revisions.");
        }
    }
    Ok(())
}
