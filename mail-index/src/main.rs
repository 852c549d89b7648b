//! Operator tool for the mail search index
//!
//! # Usage
//!
//! ```bash
//! # Generate key material for a test mailbox
//! mail-index keygen
//!
//! # Run one sync cycle from a JSON mailbox dump
//! mail-index sync --user alice@example.com --mailbox dump.json --key <base64>
//!
//! # Keep indexing in the background until Ctrl-C
//! mail-index run --user alice@example.com --mailbox dump.json --key <base64>
//!
//! # Query the index
//! mail-index search --user alice@example.com "quarterly report" --label INBOX --unread
//!
//! # Show coverage
//! mail-index status --user alice@example.com
//! ```

use anyhow::Context;
use base64::{engine::general_purpose, Engine as _};
use clap::{Parser, Subcommand};
use mail_index::config::Config;
use mail_index::crypto::aead::generate_key;
use mail_index::crypto::{AeadDecryptor, KeyMaterial};
use mail_index::progress::ProgressState;
use mail_index::remote::StaticMailboxSource;
use mail_index::store::{IndexStore, StoreProvider, TantivyStoreProvider};
use mail_index::sync::SyncEngine;
use mail_index::{MailSearch, SearchFilters};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mail-index")]
#[command(about = "Build and query a local search index of an encrypted mailbox", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print fresh base64 key material
    Keygen,
    /// Run one sync cycle against a mailbox dump
    Sync {
        #[arg(long)]
        user: String,
        /// JSON array of thread bundles
        #[arg(long)]
        mailbox: PathBuf,
        /// Base64 key material
        #[arg(long)]
        key: String,
    },
    /// Index continuously and report progress until Ctrl-C
    Run {
        #[arg(long)]
        user: String,
        #[arg(long)]
        mailbox: PathBuf,
        #[arg(long)]
        key: String,
    },
    /// Search the index
    Search {
        #[arg(long)]
        user: String,
        query: String,
        /// Required system label (repeatable)
        #[arg(long = "label")]
        labels: Vec<String>,
        /// Required user label (repeatable)
        #[arg(long = "user-label")]
        user_labels: Vec<String>,
        /// Only unread messages
        #[arg(long)]
        unread: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show index coverage
    Status {
        #[arg(long)]
        user: String,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path)),
        None => Ok(Config::default()),
    }
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("mail_index={}", config.logging.level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config);

    let provider = TantivyStoreProvider::new(&config.storage.index_root);

    match cli.command {
        Commands::Keygen => {
            let key = generate_key()?;
            println!("{}", general_purpose::STANDARD.encode(key));
        }
        Commands::Sync { user, mailbox, key } => {
            let keys = KeyMaterial::from_base64(&key)?;
            let remote = Arc::new(StaticMailboxSource::from_json_file(&mailbox)?);
            let store = provider.open(&user).await?;

            let engine = SyncEngine::new(
                store.clone(),
                remote,
                Arc::new(AeadDecryptor::new()),
                keys,
                config.sync_settings(),
            );
            let report = engine.run_cycle(&CancellationToken::new()).await;
            store.terminate().await?;

            println!(
                "desc: {} pages, {} documents, {} skipped ({:?})",
                report.desc.pages, report.desc.documents, report.desc.skipped, report.desc.outcome
            );
            println!(
                "asc:  {} pages, {} documents, {} skipped ({:?})",
                report.asc.pages, report.asc.documents, report.asc.skipped, report.asc.outcome
            );
            if !report.is_completed() {
                anyhow::bail!("Sync cycle did not complete");
            }
        }
        Commands::Run { user, mailbox, key } => {
            let keys = KeyMaterial::from_base64(&key)?;
            let remote = Arc::new(StaticMailboxSource::from_json_file(&mailbox)?);
            let search = MailSearch::new(
                Arc::new(provider),
                remote,
                Arc::new(AeadDecryptor::new()),
                &config,
            );

            search.start_indexing(&user, keys).await?;
            info!("Indexing {} (Ctrl-C to stop)", user);

            let mut ticker = tokio::time::interval(config.poll_interval());
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = ticker.tick() => match search.progress().await {
                        ProgressState::Indexing(snapshot) | ProgressState::Complete(snapshot) => info!(
                            "{}% ({}/{} threads)",
                            snapshot.percent,
                            snapshot.num_threads_indexed,
                            snapshot.num_indexable_threads
                        ),
                        state => info!("Progress: {:?}", state),
                    },
                }
            }

            search.stop_indexing().await?;
        }
        Commands::Search {
            user,
            query,
            labels,
            user_labels,
            unread,
            limit,
        } => {
            let store = provider.open(&user).await?;
            let filters = SearchFilters {
                system_labels: labels,
                user_labels,
                read: unread.then_some(false),
                limit,
                ..Default::default()
            };

            let ids = store.query(&query, &filters).await?;
            store.terminate().await?;
            for id in &ids {
                println!("{}", id);
            }
            info!("{} results", ids.len());
        }
        Commands::Status { user } => {
            let store = provider.open(&user).await?;
            let metadata = store.metadata().await?;
            let documents = store.document_count().await?;
            store.terminate().await?;

            println!("Index: {:?}", provider.user_dir(&user)?);
            println!("Documents: {}", documents);
            match (metadata.oldest_indexed_timestamp, metadata.newest_indexed_timestamp) {
                (Some(oldest), Some(newest)) => println!(
                    "Coverage: {} .. {}",
                    format_timestamp(oldest),
                    format_timestamp(newest)
                ),
                _ => println!("Coverage: none"),
            }
            if let Some(point) = &metadata.desc_resume {
                println!("Older mail resumes at cursor {}", point.cursor);
            }
            if let Some(point) = &metadata.asc_resume {
                println!("Newer mail resumes at cursor {}", point.cursor);
            }
        }
    }

    Ok(())
}

fn format_timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}
