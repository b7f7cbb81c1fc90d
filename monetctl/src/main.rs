//! `monetctl`: inspect and reconcile a Monet catalog from the shell.

#![allow(missing_docs)]

mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use monet_config::{BackendConfig, ConfigLoader, PostgresConfig};
use monet_core::{CatalogError, MetadataStore, Projection};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status when a sync walked the tree but some paths failed to register.
const EXIT_PARTIAL_SYNC: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "monetctl")]
#[command(about = "Look up, sync and audit records in the Monet file catalog")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
struct GlobalArgs {
    /// Catalog config file (TOML or JSON); overrides MONET_CONFIG_PATH
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// PostgreSQL connection string; overrides the configured backend
    #[arg(long, global = true, conflicts_with = "memory")]
    database_url: Option<String>,

    /// Use a throwaway in-memory store
    #[arg(long, global = true)]
    memory: bool,

    /// Skip loading `.env`
    #[arg(long, global = true)]
    no_dotenv: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the validated record for a path
    Get {
        path: PathBuf,
        /// Dotted field path to leave out (repeatable), e.g. metadata.scaled
        #[arg(long = "exclude", value_name = "FIELD")]
        exclude: Vec<String>,
        /// Do not sync the containing directory when the path is unknown
        #[arg(long)]
        no_sync: bool,
    },
    /// Report whether a record is stored for a path
    Exists { path: PathBuf },
    /// Register every unknown path under a directory
    Sync { root: PathBuf },
    /// List stored paths under a directory that no longer exist on disk
    Orphans { root: PathBuf },
    /// Print the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,catalog::sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.global.config {
        loader = loader.with_config_path(path);
    }
    if cli.global.no_dotenv {
        loader = loader.without_dotenv();
    }
    let mut config = loader
        .load()
        .context("failed to load catalog configuration")?
        .config;

    if cli.global.memory {
        config.backend = BackendConfig::Memory;
    } else if let Some(url) = cli.global.database_url.clone() {
        match &mut config.backend {
            BackendConfig::Postgres(pg) => pg.url = url,
            BackendConfig::Memory => {
                config.backend = BackendConfig::Postgres(PostgresConfig {
                    url,
                    ..PostgresConfig::default()
                })
            }
        }
    }

    if let Command::Config = cli.command {
        output::print_json(&config)?;
        return Ok(ExitCode::SUCCESS);
    }

    let store = MetadataStore::connect(config)
        .await
        .context("failed to open metadata store")?;
    let outcome = run(&store, cli.command).await;
    store.close().await;
    outcome
}

async fn run(store: &MetadataStore, command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Get {
            path,
            exclude,
            no_sync,
        } => {
            let projection = Projection::excluding(exclude);
            match store.get_with(&path, &projection, !no_sync).await? {
                Some(record) => {
                    output::print_record(&record)?;
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    warn!(path = %path.display(), "no record for path");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Exists { path } => {
            let exists = store.exists(&path).await?;
            output::print_json(&serde_json::json!({
                "path": path,
                "exists": exists,
            }))?;
            Ok(if exists {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Sync { root } => {
            let report = store.sync(&root).await?;
            store.flush().await;
            info!(
                root = %report.root.display(),
                registered = report.registered,
                failures = report.failures.len(),
                "sync finished"
            );
            output::print_json(&report)?;
            match report.into_result() {
                Ok(_) => Ok(ExitCode::SUCCESS),
                Err(CatalogError::PartialSync(_)) => Ok(ExitCode::from(EXIT_PARTIAL_SYNC)),
                Err(other) => Err(other.into()),
            }
        }
        Command::Orphans { root } => {
            let orphans = store.orphans(&root).await?;
            output::print_json(&orphans)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Config => Ok(ExitCode::SUCCESS),
    }
}
