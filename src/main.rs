//! Rulebook Index CLI
//!
//! # Commands
//!
//! - `add`: register a source
//! - `index`: run the indexing pipeline over a source's text
//! - `status`: show a source's index status, stats and last error
//! - `list`: list registered sources
//! - `show`: dump derived pages, sections, chunks, tables or datasets
//! - `delete`: remove a source and everything derived from it
//! - `recover`: fail runs abandoned in the `indexing` state

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use miette::{miette, IntoDiagnostic, Result, WrapErr};
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use rulebook_index::config::AppConfig;
use rulebook_index::database::{Database, RulesIndexOps, SourceOps, SourceRecord, SourceType};
use rulebook_index::ingestion::{IndexOutcome, RulesIndexer, SourceInput};

/// Rulebook Index - turns extracted rulebook text into a searchable rules index
#[derive(Parser)]
#[command(name = "rulebook-index")]
#[command(version)]
#[command(about = "Index tabletop wargame rulebooks into pages, sections, chunks, tables and datasets")]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (defaults to ~/.config/rulebook-index/config.toml)
    #[arg(long, global = true, env = "RULEBOOK_INDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Override the data directory holding the database and logs
    #[arg(long, global = true, env = "RULEBOOK_INDEX_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new source
    Add {
        title: String,
        /// Campaign the source belongs to
        #[arg(long)]
        campaign: Option<String>,
        /// pdf, pasted_text or external_json
        #[arg(long = "type", default_value = "pasted_text")]
        source_type: String,
        /// Tag to attach (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Index a source from a text or JSON file (stdin when no file is given)
    Index {
        id: String,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Show index status of a source
    Status { id: String },
    /// List sources
    List {
        #[arg(long)]
        campaign: Option<String>,
    },
    /// Dump derived entities of a source as JSON
    Show {
        id: String,
        #[arg(value_enum)]
        what: ShowTarget,
    },
    /// Delete a source and its derived index
    Delete { id: String },
    /// Fail index runs that have held the lease too long
    Recover,
}

#[derive(Clone, Copy, ValueEnum)]
enum ShowTarget {
    Pages,
    Sections,
    Chunks,
    Tables,
    Datasets,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, ignored_config) = match &cli.config {
        Some(path) => (AppConfig::load_from(path).into_diagnostic()?, None),
        None => AppConfig::load(),
    };
    if let Some(dir) = cli.data_dir.clone() {
        config.data.data_dir = Some(dir);
    }
    let data_dir = config.data_dir();

    let _log_guard = rulebook_index::core::logging::init(&data_dir);
    info!(version = rulebook_index::VERSION, data_dir = %data_dir.display(), "rulebook-index starting");
    if let Some(e) = ignored_config {
        warn!(error = %e, "Ignoring config file, using defaults");
    }
    config
        .indexing
        .validate()
        .map_err(|msg| miette!("invalid [indexing] config: {msg}"))?;

    let db = Database::new(&data_dir)
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("opening database in {}", data_dir.display()))?;

    let result = run(cli.command, &db, config).await;
    db.close().await;
    result
}

async fn run(command: Commands, db: &Database, config: AppConfig) -> Result<()> {
    match command {
        Commands::Add {
            title,
            campaign,
            source_type,
            tags,
        } => {
            let kind: SourceType = source_type.parse().map_err(|e: String| miette!(e))?;
            let source = SourceRecord::new(campaign, kind, title, &tags);
            db.create_source(&source).await.into_diagnostic()?;
            println!("{}", source.id);
        }
        Commands::Index { id, file } => {
            let source = db.require_source(&id).await.into_diagnostic()?;
            let text = read_input(file).await?;
            let input = match source.kind() {
                Ok(SourceType::ExternalJson) => SourceInput::Json(text),
                _ => SourceInput::Text(text),
            };

            let indexer = RulesIndexer::new(db.clone(), config.indexing);
            match indexer.index_source(&id, input).await? {
                IndexOutcome::Indexed { generation, stats } => {
                    print_json(&json!({ "status": "indexed", "generation": generation, "stats": stats }))?;
                }
                IndexOutcome::Failed(error) => {
                    print_json(&json!({ "status": "failed", "error": error }))?;
                    return Err(miette!("indexing failed at stage {}: {}", error.stage, error.message));
                }
            }
        }
        Commands::Status { id } => {
            let source = db.require_source(&id).await.into_diagnostic()?;
            let counts = db.index_counts(&id).await.into_diagnostic()?;
            print_json(&json!({
                "id": source.id,
                "title": source.title,
                "status": source.index_status,
                "generation": source.index_generation,
                "lastIndexedAt": source.last_indexed_at,
                "stats": source.stats().into_diagnostic()?,
                "lastError": source.error().into_diagnostic()?,
                "storedRows": counts,
            }))?;
        }
        Commands::List { campaign } => {
            let sources = db.list_sources(campaign.as_deref()).await.into_diagnostic()?;
            for source in sources {
                println!("{}\t{}\t{}\t{}", source.id, source.index_status, source.source_type, source.title);
            }
        }
        Commands::Show { id, what } => {
            db.require_source(&id).await.into_diagnostic()?;
            let value = match what {
                ShowTarget::Pages => serde_json::to_value(db.list_pages(&id).await.into_diagnostic()?),
                ShowTarget::Sections => serde_json::to_value(db.list_sections(&id).await.into_diagnostic()?),
                ShowTarget::Chunks => serde_json::to_value(db.list_chunks(&id).await.into_diagnostic()?),
                ShowTarget::Tables => serde_json::to_value(db.list_tables(&id).await.into_diagnostic()?),
                ShowTarget::Datasets => {
                    let mut datasets = Vec::new();
                    for dataset in db.list_datasets(&id).await.into_diagnostic()? {
                        let rows = db.list_dataset_rows(&dataset.id).await.into_diagnostic()?;
                        datasets.push(json!({ "dataset": dataset, "rows": rows }));
                    }
                    Ok(Value::Array(datasets))
                }
            }
            .into_diagnostic()?;
            print_json(&value)?;
        }
        Commands::Delete { id } => {
            if !db.delete_source(&id).await.into_diagnostic()? {
                return Err(miette!("Source not found: {id}"));
            }
            println!("deleted {id}");
        }
        Commands::Recover => {
            let indexer = RulesIndexer::new(db.clone(), config.indexing);
            for id in indexer.recover_stale().await? {
                println!("{id}");
            }
        }
    }
    Ok(())
}

async fn read_input(file: Option<PathBuf>) -> Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .into_diagnostic()
            .wrap_err_with(|| format!("reading {}", path.display())),
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .into_diagnostic()
                .wrap_err("reading stdin")?;
            Ok(text)
        }
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}
