//! CLI smoke entry point.
//!
//! # Responsibility
//! - Open a store from config or flags and verify core wiring.
//! - Run the add/query/update/delete round trip against it.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use recordstore_core::{
    init_logging, AppConfig, Entity, LoggingConfig, Predicate, RecordRepository, SortSpec,
    SqliteStore,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "recordstore", version, about = "Record store smoke check")]
struct Cli {
    /// TOML config with `[store]` and optional `[logging]` sections.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Database file; overrides the config. In-memory when absent.
    #[arg(long)]
    db: Option<PathBuf>,
    /// Absolute directory for log files; overrides the config.
    #[arg(long)]
    log_dir: Option<PathBuf>,
    #[arg(long)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the core version and the store's registered entities.
    Ping,
    /// Run the add/query/update/delete round trip.
    Demo,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Note {
    title: String,
    body: String,
}

impl Entity for Note {
    const ENTITY_NAME: &'static str = "Note";

    fn validate(&self) -> Result<(), String> {
        if self.title.is_empty() {
            return Err("title cannot be empty".to_string());
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    if let Some(logging) = &config.logging {
        init_logging(logging).context("failed to start logging")?;
    }

    let store = SqliteStore::open(&config.store).context("failed to open store")?;
    store.register::<Note>()?;

    match cli.command {
        Command::Ping => {
            println!("recordstore_core version={}", recordstore_core::core_version());
            println!("store={} entities={}", store.name(), store.entity_names().join(","));
        }
        Command::Demo => run_demo(&store)?,
    }
    Ok(())
}

fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.store.path = Some(db.clone());
    }
    if let Some(dir) = &cli.log_dir {
        config
            .logging
            .get_or_insert_with(|| {
                LoggingConfig::new(recordstore_core::default_log_level(), dir.clone())
            })
            .dir = dir.clone();
    }
    if let Some(level) = &cli.log_level {
        match &mut config.logging {
            Some(logging) => logging.level = level.clone(),
            None => bail!("--log-level requires --log-dir or a [logging] section"),
        }
    }
    Ok(config)
}

fn run_demo(store: &SqliteStore) -> Result<()> {
    let notes = RecordRepository::<Note>::try_new(store)?;

    let id = notes.add(|note| {
        note.title = "A".to_string();
        note.body = "first draft".to_string();
    })?;
    info!("event=demo_add module=cli status=ok record={id}");

    let found = notes.query(&Predicate::eq("title", "A"), None)?;
    println!("query title=A -> {}", found.len());

    let updated = notes.update_first(&Predicate::eq("title", "A"), |note| {
        note.title = "B".to_string()
    })?;
    println!("update_first title=A -> {updated}");

    let sorted = notes.query(&Predicate::True, Some(&SortSpec::new().ascending("title")))?;
    for note in &sorted {
        println!("  {} title={} body={}", note.id(), note.title, note.body);
    }

    let deleted = notes.delete_all(&Predicate::eq("title", "B"))?;
    let remaining = notes.query(&Predicate::eq("title", "B"), None)?.len();
    println!("delete_all title=B -> {deleted}, remaining={remaining}");

    if remaining != 0 {
        bail!("demo left {remaining} record(s) behind");
    }
    Ok(())
}
