#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the harvester scrape engine.
//!
//! Uses `indicatif-log-bridge` (via [`progress::init_logger`]) to route `log`
//! output through `indicatif::MultiProgress` so that log lines and progress
//! bars never fight for the terminal.

mod progress;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use harvester_orchestrator::{BatchOrchestrator, OrchestratorConfig};
use harvester_scheduler::Scheduler;
use harvester_snapshot::{FileSnapshotStore, SnapshotStore};
use harvester_source::registry::{self, enabled_sources, filter_from_env, parse_filter};
use harvester_source::source_def::SourceDefinition;
use harvester_source::{SourceDefError, SourceRegistry};
use tokio_util::sync::CancellationToken;

use crate::progress::IndicatifProgress;

#[derive(Parser)]
#[command(name = "harvester", about = "Multi-source scrape orchestration engine")]
struct Cli {
    /// Engine settings TOML file (retry timing, concurrency, start delay)
    #[arg(long, global = true)]
    engine_config: Option<PathBuf>,
    /// Directory of extra source definitions; overrides embedded ones by id
    #[arg(long, global = true)]
    sources_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all configured sources
    Sources,
    /// Run every enabled source once and print the report as JSON
    Run {
        /// Comma-separated list of source IDs (overrides `HARVESTER_SOURCES` env var)
        #[arg(long)]
        sources: Option<String>,
        /// Snapshot file to commit the items to
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Re-run enabled sources on a fixed interval until Ctrl-C
    Schedule {
        /// Seconds between run starts (at least 1)
        #[arg(long, default_value = "3600", value_parser = clap::value_parser!(u64).range(1..))]
        interval_secs: u64,
        /// Snapshot file each run is committed to
        #[arg(long)]
        snapshot: PathBuf,
        /// Comma-separated list of source IDs (overrides `HARVESTER_SOURCES` env var)
        #[arg(long)]
        sources: Option<String>,
    },
    /// Summarize the stored snapshot
    Snapshot {
        /// Snapshot file to read
        #[arg(long)]
        snapshot: PathBuf,
    },
}

/// Embedded definitions merged with those in `sources_dir`.
fn load_definitions(sources_dir: Option<&Path>) -> Result<Vec<SourceDefinition>, SourceDefError> {
    let embedded = registry::all_sources();
    let Some(dir) = sources_dir else {
        return Ok(embedded);
    };
    Ok(registry::merge(embedded, registry::load_dir(dir)?))
}

/// Applies the `--sources` flag, falling back to `HARVESTER_SOURCES`.
fn select(definitions: Vec<SourceDefinition>, flag: Option<&str>) -> Vec<SourceDefinition> {
    let filter = flag.map(parse_filter).or_else(filter_from_env);
    enabled_sources(definitions, filter.as_deref())
}

fn build_orchestrator(
    cli: &Cli,
    flag: Option<&str>,
) -> Result<BatchOrchestrator, Box<dyn std::error::Error>> {
    let config = match &cli.engine_config {
        Some(path) => OrchestratorConfig::load(path)?,
        None => OrchestratorConfig::default(),
    };
    let definitions = select(load_definitions(cli.sources_dir.as_deref())?, flag);
    if definitions.is_empty() {
        return Err("no sources selected".into());
    }
    log::info!(
        "Using {} source(s): {}",
        definitions.len(),
        definitions
            .iter()
            .map(SourceDefinition::id)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let registry = SourceRegistry::from_definitions(&definitions)?;
    Ok(BatchOrchestrator::new(Arc::new(registry), config))
}

/// Cancels `token` on the first Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling run (partial results are kept)");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = progress::init_logger();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Sources => {
            let definitions = load_definitions(cli.sources_dir.as_deref())?;
            println!("{:<20} {:<16} {:<32} URL", "ID", "STRATEGY", "NAME");
            println!("{}", "-".repeat(100));
            for def in &definitions {
                println!(
                    "{:<20} {:<16} {:<32} {}",
                    def.id(),
                    def.strategy(),
                    def.name(),
                    def.base_url()
                );
            }
        }
        Commands::Run { sources, snapshot } => {
            let orchestrator = build_orchestrator(&cli, sources.as_deref())?;
            let progress = IndicatifProgress::sources_bar(&multi, "Sources");
            let orchestrator = orchestrator.with_progress(progress);

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            let outcome = orchestrator.run(&cancel).await?;

            if let Some(path) = snapshot {
                let store = FileSnapshotStore::open(path).await?;
                store
                    .put(outcome.items, outcome.report.completed_at, None)
                    .await?;
                log::info!("Snapshot written to {}", path.display());
            }

            println!("{}", serde_json::to_string_pretty(&outcome.report)?);
        }
        Commands::Schedule {
            interval_secs,
            snapshot,
            sources,
        } => {
            let orchestrator = build_orchestrator(&cli, sources.as_deref())?;
            let store = FileSnapshotStore::open(snapshot).await?;
            let scheduler = Scheduler::new(Arc::new(orchestrator), Arc::new(store));

            let handle = scheduler.start(Duration::from_secs(*interval_secs), None)?;
            tokio::signal::ctrl_c().await?;
            log::info!("Stopping scheduler; press Ctrl-C again to cancel the active run");

            let canceller = handle.canceller();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() && canceller.cancel() {
                    log::warn!("Active run cancelled");
                }
            });

            let counters = handle.counters();
            handle.stop().await;
            log::info!(
                "Scheduler finished: {} runs, {} skipped ticks",
                counters.runs_started,
                counters.ticks_skipped
            );
        }
        Commands::Snapshot { snapshot } => {
            let store = FileSnapshotStore::open(snapshot).await?;
            let Some(current) = store.get() else {
                println!("No snapshot at {}", snapshot.display());
                return Ok(());
            };

            let mut per_source: BTreeMap<&str, usize> = BTreeMap::new();
            for item in &current.items {
                *per_source.entry(item.source.as_str()).or_default() += 1;
            }

            println!("Completed: {}", current.completed_at);
            match current.next_run_at {
                Some(next) => println!("Next run:  {next}"),
                None => println!("Next run:  (scheduler stopped)"),
            }
            println!("Items:     {}", current.items.len());
            for (source, count) in &per_source {
                println!("  {source:<20} {count}");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_dir_overrides_embedded_definitions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("crates_io.toml"),
            r#"
            id = "crates_io"
            name = "Local mirror"
            [fetcher]
            type = "json_paginated"
            url = "http://localhost:8080/crates"
            "#,
        )
        .unwrap();

        let defs = load_definitions(Some(dir.path())).unwrap();
        let crates = defs.iter().find(|d| d.id() == "crates_io").unwrap();
        assert_eq!(crates.base_url(), "http://localhost:8080/crates");
        assert_eq!(defs.len(), registry::all_sources().len());
    }

    #[test]
    fn schedule_rejects_zero_interval() {
        let parsed = Cli::try_parse_from([
            "harvester",
            "schedule",
            "--interval-secs",
            "0",
            "--snapshot",
            "snap.json",
        ]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from([
            "harvester",
            "schedule",
            "--interval-secs",
            "5",
            "--snapshot",
            "snap.json",
        ])
        .unwrap();
        assert!(matches!(
            parsed.command,
            Commands::Schedule {
                interval_secs: 5,
                ..
            }
        ));
    }

    #[test]
    fn flag_selects_sources() {
        let defs = select(registry::all_sources(), Some("hacker_news"));
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].id(), "hacker_news");
    }
}
