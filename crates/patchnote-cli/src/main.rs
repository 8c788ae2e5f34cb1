//! `patchnote`: ingest product changelogs into a deduplicated update store.
//!
//! # Usage
//!
//! ```text
//! patchnote seed                      # create products from [[products]]
//! patchnote run                       # one batch over every active product
//! patchnote run cursor zed --json     # selected products, JSON report
//! patchnote updates cursor --limit 5
//! patchnote serve                     # JSON API on host:port
//! ```

mod commands;
mod config;
mod sources;
mod summarizers;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "patchnote", version, about = "Changelog ingestion with freshness dedup")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, value_name = "FILE", default_value = "patchnote.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run one ingestion batch.
  Run {
    /// Products to run; all active products when omitted.
    slugs: Vec<String>,

    /// Print the batch report as JSON.
    #[arg(long)]
    json: bool,

    /// Override `batch.concurrency`.
    #[arg(long)]
    concurrency: Option<usize>,
  },

  /// Create or refresh the products listed in the configuration.
  Seed,

  /// List tracked products.
  Products {
    /// Only active products.
    #[arg(long)]
    active: bool,
  },

  /// Show recent updates for a product, newest first.
  Updates {
    slug: String,

    #[arg(short = 'n', long, default_value_t = 10)]
    limit: usize,

    #[arg(long)]
    json: bool,
  },

  /// Recompute the freshness ledger from stored update records.
  RebuildLedger,

  /// Serve the JSON API.
  Serve,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let mut cfg = AppConfig::load(&cli.config)?;

  match cli.command {
    Command::Run { slugs, json, concurrency } => {
      if let Some(n) = concurrency {
        cfg.batch.concurrency = n;
        cfg.validate()?;
      }
      commands::run(&cfg, slugs, json).await
    }
    Command::Seed => commands::seed(&cfg).await,
    Command::Products { active } => commands::products(&cfg, active).await,
    Command::Updates { slug, limit, json } => commands::updates(&cfg, &slug, limit, json).await,
    Command::RebuildLedger => commands::rebuild_ledger(&cfg).await,
    Command::Serve => commands::serve(&cfg).await,
  }
}
