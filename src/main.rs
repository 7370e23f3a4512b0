use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use balam::config::Config;
use balam::dataset::jsonl;
use balam::dataset::{
    ImageItem, ImagePrediction, MediaRecord, VideoItem, VideoPrediction,
};
use balam::db::models::{MediaKind, NewObservationMethod};
use balam::db::Database;
use balam::output::terminal;
use balam::pipeline::info::{ExecutionParams, PipelineFamily};
use balam::pipeline::observations::StoreRequest;
use balam::pipeline::{events, info as pipeline_info, observations, retrieval, MediaScope};
use balam::sequence::DEFAULT_MIN_INTERVAL_SECS;

/// Balam: data access for camera-trap inference pipelines.
///
/// Reads media that still needs inference, writes predictions back as
/// observations, and groups image bursts into sequence events.
#[derive(Parser)]
#[command(name = "balam", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Project / site / media kind selection shared by most commands.
#[derive(clap::Args)]
struct ScopeArgs {
    /// Project title (e.g. "SiPeCaM")
    #[arg(long)]
    project: String,

    /// Site identifier
    #[arg(long)]
    site: String,

    /// Media kind: image or video
    #[arg(long, default_value = "image")]
    kind: MediaKind,
}

#[derive(clap::Args)]
struct PipelineArgs {
    /// Pipeline name
    #[arg(long)]
    pipeline: String,

    /// Pipeline version
    #[arg(long = "pipeline-version")]
    pipeline_version: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Show system status (backend, row counts, projects)
    Status,

    /// List media a pipeline has not processed yet (JSON Lines)
    Pending {
        #[command(flatten)]
        scope: ScopeArgs,

        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Write the dataset here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List observations a pipeline already stored (JSON Lines)
    Processed {
        #[command(flatten)]
        scope: ScopeArgs,

        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Write the dataset here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Group new images into sequences and store them as events
    Sequences {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Gap in seconds above which a new sequence starts
        #[arg(long, default_value_t = DEFAULT_MIN_INTERVAL_SECS)]
        min_interval: f64,

        /// Only print the grouped dataset; store nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Store predictions from a JSON Lines file as observations
    StoreObservations {
        /// Project title
        #[arg(long)]
        project: String,

        /// Media kind of the predictions: image or video
        #[arg(long, default_value = "image")]
        kind: MediaKind,

        /// Predictions file (one JSON object per line)
        #[arg(long)]
        input: PathBuf,

        /// Video dataset the predictions refer to (fills in their items)
        #[arg(long)]
        videos: Option<PathBuf>,

        /// Pipeline name; omit for human annotations
        #[arg(long, requires = "pipeline_version")]
        pipeline: Option<String>,

        /// Pipeline version
        #[arg(long = "pipeline-version", requires = "pipeline")]
        pipeline_version: Option<String>,
    },

    /// Delete a pipeline's observations and processed marks for a site
    DeleteObservations {
        #[command(flatten)]
        scope: ScopeArgs,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Register or inspect inference pipelines
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },

    /// Manage observation methods
    Method {
        #[command(subcommand)]
        command: MethodCommands,
    },
}

#[derive(Subcommand)]
enum PipelineCommands {
    /// Register a pipeline version with its execution parameters
    Register {
        #[arg(long)]
        name: String,

        #[arg(long = "pipeline-version")]
        pipeline_version: String,

        /// Pipeline family the parameters belong to
        #[arg(long, value_enum)]
        family: PipelineFamily,

        /// Execution parameters as a JSON object, or @path to a JSON file
        #[arg(long)]
        params: String,

        #[arg(long, default_value = "")]
        url_repo_model: String,

        #[arg(long, default_value = "")]
        comments: String,
    },

    /// Show a registered pipeline
    Show {
        #[arg(long)]
        name: String,

        #[arg(long = "pipeline-version")]
        pipeline_version: String,

        /// Also validate the parameters against this family
        #[arg(long, value_enum)]
        family: Option<PipelineFamily>,
    },
}

#[derive(Subcommand)]
enum MethodCommands {
    /// Add an observation method (e.g. "machine" or "human")
    Add {
        name: String,

        #[arg(long)]
        description: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (or the file BALAM_DOTENV_PATH points to); silently ignore if missing
    match std::env::var("BALAM_DOTENV_PATH") {
        Ok(path) => {
            dotenvy::from_path(&path).with_context(|| format!("Failed to load env file {path}"))?;
        }
        Err(_) => {
            let _ = dotenvy::dotenv();
        }
    }

    // Logs go to stderr so JSON Lines on stdout stay clean
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("balam=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Init => {
            info!("Initializing Balam database...");
            let db = init_database(&config).await?;
            let table_count = db.table_count().await?;
            if config.uses_postgres() {
                println!("Database initialized on PostgreSQL");
            } else {
                println!("Database initialized at: {}", config.db_path);
            }
            println!("Tables created: {table_count}");
            println!("\nNext: register observation methods");
            println!("  balam method add machine && balam method add human");
        }

        Commands::Status => {
            let db = open_database(&config).await?;
            let backend = if config.uses_postgres() {
                balam::status::Backend::Postgres
            } else {
                balam::status::Backend::Sqlite(&config.db_path)
            };
            balam::status::show(&db, backend, &config).await?;
        }

        Commands::Pending {
            scope,
            pipeline,
            output,
        } => {
            let db = open_database(&config).await?;
            let settings = config.projects.get(&scope.project)?;
            let media_scope = MediaScope::new(&scope.project, &scope.site);
            let (name, version) = (&pipeline.pipeline, &pipeline.pipeline_version);
            match scope.kind {
                MediaKind::Image => {
                    let items: Vec<ImageItem> =
                        retrieval::media_to_process(&db, settings, &media_scope, name, version)
                            .await?;
                    emit(output.as_deref(), &items)?;
                }
                MediaKind::Video => {
                    let items: Vec<VideoItem> =
                        retrieval::media_to_process(&db, settings, &media_scope, name, version)
                            .await?;
                    emit(output.as_deref(), &items)?;
                }
            }
        }

        Commands::Processed {
            scope,
            pipeline,
            output,
        } => {
            let db = open_database(&config).await?;
            let settings = config.projects.get(&scope.project)?;
            let media_scope = MediaScope::new(&scope.project, &scope.site);
            let (name, version) = (&pipeline.pipeline, &pipeline.pipeline_version);
            match scope.kind {
                MediaKind::Image => {
                    let preds: Vec<ImagePrediction> =
                        retrieval::processed_media(&db, settings, &media_scope, name, version)
                            .await?;
                    emit(output.as_deref(), &preds)?;
                }
                MediaKind::Video => {
                    let preds: Vec<VideoPrediction> =
                        retrieval::processed_media(&db, settings, &media_scope, name, version)
                            .await?;
                    emit(output.as_deref(), &preds)?;
                }
            }
        }

        Commands::Sequences {
            scope,
            min_interval,
            dry_run,
        } => {
            let db = open_database(&config).await?;
            let settings = config.projects.get(&scope.project)?;
            let media_scope = MediaScope::new(&scope.project, &scope.site);

            if dry_run && scope.kind == MediaKind::Video {
                eprintln!("{} videos have no sequences", "Dry run:".bold());
            } else if dry_run {
                let mut items: Vec<ImageItem> =
                    retrieval::new_media(&db, settings, &media_scope).await?;
                items.retain(|item| item.media().date_captured.is_some());
                let count = balam::dataset::assign_sequences(&mut items, min_interval)?;
                eprintln!("{} {count} sequences (not stored)", "Dry run:".bold());
                emit(None, &items)?;
            } else {
                let summary = events::store_sequences(
                    &db,
                    settings,
                    &media_scope,
                    scope.kind,
                    min_interval,
                )
                .await?;
                terminal::display_sequence_summary(&summary);
            }
        }

        Commands::StoreObservations {
            project,
            kind,
            input,
            videos,
            pipeline,
            pipeline_version,
        } => {
            let db = open_database(&config).await?;
            let settings = config.projects.get(&project)?;
            let request = StoreRequest {
                project: project.clone(),
                pipeline: pipeline.zip(pipeline_version),
                username: config.require_username()?.to_string(),
            };

            let summary = match kind {
                MediaKind::Image => {
                    let preds: Vec<ImagePrediction> = jsonl::read_file(&input)?;
                    observations::store_observations(&db, settings, &request, &preds).await?
                }
                MediaKind::Video => {
                    let mut preds: Vec<VideoPrediction> = jsonl::read_file(&input)?;
                    if let Some(videos_path) = videos {
                        let videos: Vec<VideoItem> = jsonl::read_file(&videos_path)?;
                        let matched = balam::dataset::attach_video_items(&mut preds, &videos);
                        info!(matched, total = preds.len(), "Attached video items");
                    }
                    observations::store_observations(&db, settings, &request, &preds).await?
                }
            };
            terminal::display_store_summary(&summary);
        }

        Commands::DeleteObservations { scope, pipeline } => {
            let db = open_database(&config).await?;
            let media_scope = MediaScope::new(&scope.project, &scope.site);
            let summary = observations::delete_observation_products(
                &db,
                &media_scope,
                scope.kind,
                &pipeline.pipeline,
                &pipeline.pipeline_version,
            )
            .await?;
            terminal::display_delete_summary(&summary);
        }

        Commands::Pipeline { command } => {
            let db = open_database(&config).await?;
            match command {
                PipelineCommands::Register {
                    name,
                    pipeline_version,
                    family,
                    params,
                    url_repo_model,
                    comments,
                } => {
                    let raw = read_json_arg(&params)?;
                    let params = ExecutionParams::parse(family, &raw)
                        .with_context(|| format!("Parameters don't fit the {family:?} family"))?;
                    let id = pipeline_info::register_pipeline(
                        &db,
                        &name,
                        &pipeline_version,
                        &params,
                        &url_repo_model,
                        &comments,
                    )
                    .await?;
                    println!(
                        "{} {name}@{pipeline_version} ({id})",
                        "Registered".green().bold()
                    );
                }
                PipelineCommands::Show {
                    name,
                    pipeline_version,
                    family,
                } => match family {
                    Some(family) => {
                        let loaded =
                            pipeline_info::load_pipeline(&db, &name, &pipeline_version, family)
                                .await?;
                        terminal::display_pipeline(&loaded.info);
                        println!(
                            "  Parameters valid for {:?} (min stored score {:.2})",
                            loaded.params.family(),
                            loaded.params.min_score_of_stored_dets()
                        );
                    }
                    None => match db.pipeline_info(&name, &pipeline_version).await? {
                        Some(info) => terminal::display_pipeline(&info),
                        None => println!("No pipeline {name}@{pipeline_version} registered."),
                    },
                },
            }
        }

        Commands::Method { command } => {
            let db = open_database(&config).await?;
            match command {
                MethodCommands::Add { name, description } => {
                    let id = db
                        .insert_observation_method(&NewObservationMethod {
                            id: uuid::Uuid::new_v4(),
                            name: name.clone(),
                            description,
                        })
                        .await?;
                    println!("{} observation method '{name}' ({id})", "Added".green().bold());
                }
            }
        }
    }

    Ok(())
}

/// Write a dataset as JSON Lines and say where it went.
fn emit<R: MediaRecord + serde::Serialize>(output: Option<&std::path::Path>, records: &[R]) -> Result<()> {
    jsonl::write_output(output, records)?;
    if let Some(path) = output {
        terminal::display_media_preview(
            &format!("Wrote {}", path.display()),
            records.iter().map(MediaRecord::media),
            10,
        );
    }
    Ok(())
}

/// A JSON value given inline or as `@path`.
fn read_json_arg(arg: &str) -> Result<serde_json::Value> {
    let raw = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read parameters from {path}"))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&raw).context("Parameters are not valid JSON")
}

/// Select the database backend based on configuration.
///
/// When DATABASE_URL is set and points to PostgreSQL, uses the Postgres backend
/// (requires the `postgres` feature). Otherwise, falls back to SQLite.
async fn open_database(config: &Config) -> Result<Arc<dyn Database>> {
    if config.uses_postgres() {
        return connect_postgres(config).await;
    }
    open_sqlite(config)
}

/// Initialize the database (create if needed).
async fn init_database(config: &Config) -> Result<Arc<dyn Database>> {
    if config.uses_postgres() {
        return connect_postgres(config).await;
    }
    #[cfg(feature = "sqlite")]
    {
        balam::db::initialize_sqlite(&config.db_path)
    }
    #[cfg(not(feature = "sqlite"))]
    anyhow::bail!("No DATABASE_URL set and the 'sqlite' feature is not compiled in.")
}

#[cfg(feature = "sqlite")]
fn open_sqlite(config: &Config) -> Result<Arc<dyn Database>> {
    balam::db::open_sqlite(&config.db_path)
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_config: &Config) -> Result<Arc<dyn Database>> {
    anyhow::bail!("No DATABASE_URL set and the 'sqlite' feature is not compiled in.")
}

#[cfg(feature = "postgres")]
async fn connect_postgres(config: &Config) -> Result<Arc<dyn Database>> {
    info!("Using PostgreSQL backend");
    let url = config.database_url.as_deref().unwrap_or_default();
    balam::db::connect_postgres(url).await
}

#[cfg(not(feature = "postgres"))]
async fn connect_postgres(_config: &Config) -> Result<Arc<dyn Database>> {
    anyhow::bail!(
        "DATABASE_URL points to PostgreSQL but the 'postgres' feature is not compiled in.\n\
         Rebuild with: cargo build --features postgres"
    )
}
