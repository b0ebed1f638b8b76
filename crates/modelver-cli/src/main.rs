//! modelver - Model template versioning CLI
//!
//! Creates, inspects and deletes templates and template versions directly in
//! the store. A running `modelver-daemon` numbers new versions and updates
//! template status.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modelver_core::config::ModelverConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

use commands::template::TemplateCommand;
use commands::version::VersionCommand;

/// modelver - manage model templates and their versions
#[derive(Parser, Debug)]
#[command(name = "modelver")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (used for the store path)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the store database file (`SQLite`)
    #[arg(long, env = "MODELVER_STORE")]
    store: Option<PathBuf>,

    /// Namespace to operate in
    #[arg(short, long, global = true, default_value = commands::DEFAULT_NAMESPACE)]
    namespace: String,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage model templates
    Template(TemplateCommand),

    /// Manage model template versions
    Version(VersionCommand),
}

impl Cli {
    fn store_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.store {
            return Ok(path.clone());
        }
        let config = match &self.config {
            Some(path) => ModelverConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => ModelverConfig::default(),
        };
        Ok(config.store.path)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let path = cli.store_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = commands::open_store(&path)?;
    tracing::debug!(path = %path.display(), "store opened");

    match &cli.command {
        Commands::Template(cmd) => commands::template::run(cmd, &store, &cli.namespace, cli.json),
        Commands::Version(cmd) => commands::version::run(cmd, &store, &cli.namespace, cli.json),
    }
}
