//! mirrordb CLI - local mirror of a server-defined object schema

use clap::{Parser, Subcommand};
use mirrordb::config::{self, MirrorConfig};
use mirrordb::query::FilterTriple;
use mirrordb::remote::JsonDirSource;
use mirrordb::schema::SchemaDescription;
use mirrordb::session::Session;
use mirrordb::storage::SqliteStore;
use mirrordb::sync::{CheckpointPolicy, SyncEngine, SyncOutcome};
use mirrordb::ui::{self, Icons, Spinner, SyncProgress};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "mirrordb")]
#[command(version)]
#[command(about = "Local relational mirror of a server-defined object schema")]
#[command(long_about = r#"
mirrordb keeps an on-device SQLite copy of remote, dynamically typed data:
  • Derives tables from the remote schema and resets types whose tables drifted
  • Pulls changes incrementally from a checkpoint, or in full
  • Queries the local copy with field filters

Example usage:
  mirrordb init --source ./feed
  mirrordb sync --type Task
  mirrordb query --type Task --filter 'tags=["urgent"]'
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file
    Init {
        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Directory served as the remote source
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Local schema description (JSON); fetched from the source otherwise
        #[arg(long)]
        schema: Option<PathBuf>,

        /// When a sync run stores its checkpoint (on_start, on_completion)
        #[arg(long)]
        checkpoint_policy: Option<CheckpointPolicy>,

        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Create or verify local tables, resyncing types whose tables drifted
    Prepare,

    /// Pull changes for one entity type
    Sync {
        /// Entity type name
        #[arg(short = 't', long = "type")]
        entity: String,

        /// Ignore the checkpoint and pull everything
        #[arg(long)]
        full: bool,
    },

    /// Drop the local tables of one entity type and pull it in full
    Reset {
        /// Entity type name
        #[arg(short = 't', long = "type")]
        entity: String,
    },

    /// Query the local mirror
    Query {
        /// Entity type name
        #[arg(short = 't', long = "type")]
        entity: String,

        /// Filter as field<op>value, e.g. title=foo or tags=["a","b"]
        #[arg(short, long)]
        filter: Vec<String>,

        /// Print the number of matches only
        #[arg(long)]
        count: bool,

        /// Print the generated SQL and parameters
        #[arg(long)]
        sql: bool,

        /// Maximum number of results
        #[arg(short, long, default_value = "20")]
        limit: u64,
    },

    /// Show statistics about the local mirror
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);

    match cli.command {
        Commands::Init {
            database,
            source,
            schema,
            checkpoint_policy,
            force,
        } => {
            let cwd = std::env::current_dir()?;
            let database = database.unwrap_or_else(|| config::default_database_path_in(&cwd));
            let config = MirrorConfig {
                database: Some(database.display().to_string()),
                schema: schema.map(|p| p.display().to_string()),
                source: Some(source.unwrap_or_else(|| PathBuf::from(".")).display().to_string()),
                checkpoint_policy,
                ..MirrorConfig::default()
            };
            config::write_config(&config_path, &config, force)?;
            config::ensure_db_dir(&database)?;
            ui::success(&format!("Wrote {}", config_path.display()));
        }

        Commands::Prepare => {
            let session = open_session(&config_path).await?;
            let spinner = Spinner::new("Preparing local tables");
            let report = session.prepare().await?;
            spinner.finish_with_message("Done");
            ui::prepare_report(&report);

            if report.has_drift() {
                let engine = SyncEngine::new(session.clone());
                for outcome in engine.resync_drifted(&report).await? {
                    if let SyncOutcome::Completed(report) = outcome {
                        ui::sync_report(&report);
                    }
                }
            }
        }

        Commands::Sync { entity, full } => {
            let session = open_session(&config_path).await?;
            session.prepare().await?;
            let engine = SyncEngine::new(session);

            ui::header(&format!("Syncing {}", entity));
            let (progress, tx) = SyncProgress::new(&entity);
            engine.subscribe(tx);
            let outcome = engine.update(&entity, full).await;
            drop(engine);
            progress.finish();

            match outcome? {
                SyncOutcome::Completed(report) => ui::sync_report(&report),
                SyncOutcome::AlreadyRunning => ui::warn(&format!("{} is already syncing", entity)),
            }
        }

        Commands::Reset { entity } => {
            let session = open_session(&config_path).await?;
            session.prepare().await?;
            let engine = SyncEngine::new(session);

            ui::header(&format!("Resetting {}", entity));
            let (progress, tx) = SyncProgress::new(&entity);
            engine.subscribe(tx);
            let outcome = engine.reset(&entity).await;
            drop(engine);
            progress.finish();

            if let SyncOutcome::Completed(report) = outcome? {
                ui::sync_report(&report);
            }
        }

        Commands::Query {
            entity,
            filter,
            count,
            sql,
            limit,
        } => {
            let session = open_session(&config_path).await?;
            session.prepare().await?;
            let triples = filter
                .iter()
                .map(|f| FilterTriple::parse(f))
                .collect::<mirrordb::Result<Vec<_>>>()?;

            if sql {
                let query = session.query_for(&entity, &triples)?.limit(limit, 0);
                let rendered = if count {
                    query.render_count(session.catalog())?
                } else {
                    query.render(session.catalog())?
                };
                println!("{}", rendered.sql);
                println!("{} {:?}", ui::dim("params:"), rendered.params);
            } else if count {
                let n = session.count(&entity, &triples).await?;
                println!("{} {} {}", Icons::SEARCH, n, ui::dim("matches"));
            } else {
                let found = session.find(&entity, &triples, Some(limit)).await?;
                let mut rows = Vec::with_capacity(found.len());
                for instance in &found {
                    if let JsonValue::Object(row) = session.stored_json(instance).await? {
                        rows.push(row);
                    }
                }
                if rows.is_empty() {
                    println!("∅ No matches.");
                } else {
                    println!("{}", ui::rows_table(&rows));
                }
            }
            session.teardown();
        }

        Commands::Stats => {
            let (config, database) = resolve_config(&config_path)?;
            let session = build_session(&config, &database).await?;
            session.prepare().await?;
            let stats = session.stats().await?;

            println!("{} mirrordb statistics ({})", Icons::STATS, database.display());
            println!("{}", ui::stats_table(&stats));
            ui::summary_row("total rows", &stats.total_rows().to_string());
        }
    }

    Ok(())
}

fn resolve_config(config_path: &Path) -> anyhow::Result<(MirrorConfig, PathBuf)> {
    let config = config::load_config(Some(config_path))?.unwrap_or_default();
    let database = match &config.database {
        Some(path) => PathBuf::from(path),
        None => config::default_database_path_in(&std::env::current_dir()?),
    };
    Ok((config, database))
}

async fn open_session(config_path: &Path) -> anyhow::Result<Arc<Session>> {
    let (config, database) = resolve_config(config_path)?;
    build_session(&config, &database).await
}

async fn build_session(config: &MirrorConfig, database: &Path) -> anyhow::Result<Arc<Session>> {
    config::ensure_db_dir(database)?;
    tracing::debug!("Opening {}", database.display());
    let store = SqliteStore::open(database)?;
    let remote = Arc::new(JsonDirSource::new(config.source.as_deref().unwrap_or(".")));
    let options = config.to_options();

    let session = match &config.schema {
        Some(schema) => {
            let description = SchemaDescription::load(Path::new(schema))?;
            Session::from_description(&description, store, remote, options)?
        }
        None => Session::bootstrap(store, remote, options).await?,
    };
    Ok(Arc::new(session))
}
