//! blobsync CLI - Command line interface for blobsync
//!
//! Lists, fetches and publishes blobs against a configured backend. Results
//! are printed to stdout as JSON; logs go to stderr (filter with `RUST_LOG`).

use blobsync::{BlobKey, ContentStore, FetchOutcome, LocalContentIndex, Store, StoreConfig};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "blobsync")]
#[command(about = "Dedup-aware blob sync between object storage and local mirrors")]
#[command(version)]
struct Cli {
    /// Path to a JSON backend config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use a local directory as the backend
    #[arg(long, conflicts_with_all = ["config", "endpoint"])]
    root: Option<PathBuf>,

    /// S3-compatible endpoint URL
    #[arg(long, requires = "bucket", conflicts_with = "config")]
    endpoint: Option<String>,

    /// Bucket name (with --endpoint)
    #[arg(long, requires = "endpoint")]
    bucket: Option<String>,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// List keys under a prefix
    List {
        /// Key prefix
        #[arg(default_value = "")]
        prefix: String,
    },

    /// Show the content digest of a blob
    Digest {
        /// The blob key
        key: String,
    },

    /// Download a blob into a directory
    Fetch {
        /// The blob key
        key: String,
        /// Destination directory (the blob lands at DEST/KEY)
        dest: PathBuf,
        /// Directory of local files to reuse by content
        #[arg(short, long)]
        index_dir: Option<PathBuf>,
        /// Transfer even when the destination already holds the content
        #[arg(long)]
        overwrite: bool,
    },

    /// Download every blob under a prefix
    FetchAll {
        /// Key prefix
        prefix: String,
        /// Destination directory
        dest: PathBuf,
        /// Directory of local files to reuse by content
        #[arg(short, long)]
        index_dir: Option<PathBuf>,
        /// Transfer even when the destination already holds the content
        #[arg(long)]
        overwrite: bool,
    },

    /// Upload a file, or a directory recursively
    Publish {
        /// Local file or directory
        path: PathBuf,
        /// Target key (key prefix for a directory)
        key: String,
        /// Upload even when the key already holds the content
        #[arg(long)]
        overwrite: bool,
    },

    /// Print the digest index of a local directory
    Index {
        /// Directory to scan
        dir: PathBuf,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blobsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        tracing::error!("{:#}", e);
        output(
            &cli.format,
            &serde_json::json!({
                "status": "error",
                "message": format!("{:#}", e)
            }),
        );
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    // Only commands that talk to a backend need one configured
    let store = || -> anyhow::Result<ContentStore<Box<dyn Store>>> {
        Ok(ContentStore::new(open_store(cli)?))
    };

    match &cli.command {
        Commands::Index { dir } => {
            let index = LocalContentIndex::scan(dir)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "count": index.len(),
                    "index": index
                }),
            );
        }

        Commands::List { prefix } => {
            let mut keys = store()?.list(prefix)?;
            keys.sort();
            output(
                &cli.format,
                &serde_json::json!({
                    "count": keys.len(),
                    "keys": keys
                }),
            );
        }

        Commands::Digest { key } => {
            let key = BlobKey::new(key);
            let digest = store()?.remote_digest(&key)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "key": key,
                    "digest": digest
                }),
            );
        }

        Commands::Fetch {
            key,
            dest,
            index_dir,
            overwrite,
        } => {
            let index = load_index(index_dir.as_deref())?;
            let outcome = store()?.fetch(&BlobKey::new(key), dest, &index, *overwrite)?;
            output(&cli.format, &fetch_json(&outcome));
        }

        Commands::FetchAll {
            prefix,
            dest,
            index_dir,
            overwrite,
        } => {
            let index = load_index(index_dir.as_deref())?;
            let report = store()?.fetch_all(prefix, dest, &index, *overwrite)?;
            let status = if report.is_complete() { "ok" } else { "partial" };
            let failed: Vec<_> = report
                .failed
                .iter()
                .map(|(key, e)| serde_json::json!({ "key": key, "error": e.to_string() }))
                .collect();
            output(
                &cli.format,
                &serde_json::json!({
                    "status": status,
                    "transferred": report.transferred(),
                    "copied": report.copied(),
                    "unchanged": report.unchanged(),
                    "failed": failed
                }),
            );
            if !report.is_complete() {
                std::process::exit(2);
            }
        }

        Commands::Publish {
            path,
            key,
            overwrite,
        } => {
            let store = store()?;
            if path.is_dir() {
                let report = store.publish_dir(path, key, *overwrite)?;
                let status = if report.is_complete() { "ok" } else { "partial" };
                let failed: Vec<_> = report
                    .failed
                    .iter()
                    .map(|(path, e)| {
                        serde_json::json!({
                            "path": path.display().to_string(),
                            "error": e.to_string()
                        })
                    })
                    .collect();
                output(
                    &cli.format,
                    &serde_json::json!({
                        "status": status,
                        "uploaded": report.uploaded(),
                        "unchanged": report.unchanged(),
                        "failed": failed
                    }),
                );
                if !report.is_complete() {
                    std::process::exit(2);
                }
            } else {
                let outcome = store.publish_from_path(key, path, *overwrite)?;
                let mut value = serde_json::to_value(&outcome)?;
                value["status"] = "ok".into();
                output(&cli.format, &value);
            }
        }
    }

    Ok(())
}

/// Resolve the backend: --config, then --root, then --endpoint/--bucket,
/// then the environment
fn open_store(cli: &Cli) -> anyhow::Result<Box<dyn Store>> {
    let config = if let Some(path) = &cli.config {
        StoreConfig::load(path)?
    } else if let Some(root) = &cli.root {
        StoreConfig::local(root.clone())
    } else if let (Some(endpoint), Some(bucket)) = (&cli.endpoint, &cli.bucket) {
        StoreConfig::remote(endpoint.clone(), bucket.clone())
    } else {
        StoreConfig::from_env()?.ok_or_else(|| {
            anyhow::anyhow!(
                "No backend configured: pass --config, --root or --endpoint/--bucket, \
                 or set BLOBSYNC_LOCAL_ROOT / BLOBSYNC_ENDPOINT"
            )
        })?
    };
    Ok(config.build()?)
}

fn load_index(dir: Option<&Path>) -> anyhow::Result<LocalContentIndex> {
    match dir {
        Some(dir) => Ok(LocalContentIndex::scan(dir)?),
        None => Ok(LocalContentIndex::new()),
    }
}

fn fetch_json(outcome: &FetchOutcome) -> serde_json::Value {
    let path = outcome.path().display().to_string();
    match outcome {
        FetchOutcome::Transferred { .. } => serde_json::json!({
            "status": "ok",
            "outcome": "transferred",
            "path": path
        }),
        FetchOutcome::Copied { source, .. } => serde_json::json!({
            "status": "ok",
            "outcome": "copied",
            "path": path,
            "source": source.display().to_string()
        }),
        FetchOutcome::Unchanged { .. } => serde_json::json!({
            "status": "ok",
            "outcome": "unchanged",
            "path": path
        }),
    }
}

fn output(format: &OutputFormat, value: &serde_json::Value) {
    match format {
        OutputFormat::Json => println!("{}", value),
        OutputFormat::Text => println!(
            "{}",
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        ),
    }
}
