//! # Building Assistant CLI (`bldg`)
//!
//! The `bldg` binary is the operator's interface to the building
//! operations assistant: index setup, document ingestion, retrieval,
//! grounded answers, equipment health, the tool-using agent and the HTTP
//! server.
//!
//! ## Usage
//!
//! ```bash
//! bldg --config ./config/bldg.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bldg init` | Create the local index and the `sensor_history` table |
//! | `bldg serve` | Start the HTTP API |
//! | `bldg ingest <paths...>` | Ingest PDF and CSV files (directories are walked) |
//! | `bldg query "<text>"` | Show the nearest chunks for a query |
//! | `bldg ask "<question>"` | Grounded answer with citations |
//! | `bldg health <equipment_id>` | Live readings and failure probability |
//! | `bldg agent "<question>"` | Let the tool-using agent answer |
//! | `bldg load-sensors <csv>` | Load sensor history into the SQL database |
//! | `bldg migrate-index` | Copy the local index into pgvector |
//!
//! ## Examples
//!
//! ```bash
//! # Ingest the maintenance manuals
//! bldg ingest ./manuals --config ./config/bldg.toml
//!
//! # Check retrieval before asking the model
//! bldg query "chiller condenser cleaning interval" -k 3
//!
//! # Ask the agent something that needs live data
//! bldg agent "Is HVAC-01 likely to fail soon?"
//! ```

use anyhow::Result;
use building_assistant::{
    config, db::SqlDatabase, embedding, error::AssistantError, ingest, logging, migrate, sensors,
    server, services::Services, store,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Building operations assistant: document Q&A, equipment health and a
/// tool-using agent over your building's manuals and sensor data.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/bldg.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "bldg", version, about = "Smart building operations assistant")]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/bldg.toml`. When the file does not exist the
    /// built-in defaults (plus environment overrides) are used.
    #[arg(long, global = true, default_value = "./config/bldg.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the vector index and the sensor history table.
    ///
    /// Idempotent; running it twice is safe.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Ingest PDF and CSV files.
    ///
    /// Directories are walked recursively. Other file types are reported
    /// and skipped; one failing file does not stop the run.
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Show the chunks nearest to a query, without calling the LLM.
    Query {
        text: String,

        /// Number of chunks to return (defaults to `[retrieval].default_k`).
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Answer a question from the ingested documents.
    Ask {
        question: String,

        /// Number of chunks to ground the answer on.
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Print live readings and the failure probability for one unit.
    Health {
        /// Equipment identifier, e.g. `HVAC-01`.
        equipment_id: String,
    },

    /// Answer a question with the tool-using agent.
    Agent { question: String },

    /// Load a sensor history CSV into the `sensor_history` table.
    ///
    /// Expected columns: `timestamp`, `equipment_id`, `temperature`,
    /// `vibration`, `pressure`. Rows already present are skipped.
    LoadSensors {
        /// CSV file to load.
        csv: PathBuf,
    },

    /// Copy every entry of the local index into the pgvector table.
    ///
    /// Requires `store.postgres_url` (or `PG_CONN`).
    MigrateIndex,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("info");

    let cli = Cli::parse();
    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest { paths } => {
            let services = Services::from_config(&cfg).await?;
            ingest::run_ingest(&services.assistant, &paths).await?;
        }
        Commands::Query { text, k } => {
            let services = Services::from_config(&cfg).await?;
            let assistant = &services.assistant;
            let hits = assistant
                .similarity_search(&text, assistant.effective_k(k))
                .await?;

            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                let snippet: String = hit.chunk.text.chars().take(200).collect();
                println!("[{}] {}", i + 1, snippet.replace('\n', " "));
            }
        }
        Commands::Ask { question, k } => {
            let services = Services::from_config(&cfg).await?;
            let response = services
                .assistant
                .answer(&question, k, services.llm.as_ref())
                .await?;

            println!("{}", response.answer);
            if !response.citations.is_empty() {
                println!();
                println!("Sources:");
                for c in &response.citations {
                    if c.page >= 0 {
                        println!("  - {} (page {}): {}", c.source, c.page, c.snippet);
                    } else {
                        println!("  - {}: {}", c.source, c.snippet);
                    }
                }
            }
        }
        Commands::Health { equipment_id } => {
            let services = Services::from_config(&cfg).await?;
            let Some(readings) = services
                .sensors
                .fetch(&equipment_id)
                .await?
                .filter(|r| !r.is_empty())
            else {
                return Err(AssistantError::UnknownEquipment(equipment_id).into());
            };

            let report = serde_json::json!({
                "equipment_id": equipment_id,
                "sensors": readings,
                "failure_probability": services.predictor.predict(&readings),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Agent { question } => {
            let services = Services::from_config(&cfg).await?;
            let outcome = services.agent().run(&question).await?;
            tracing::info!(steps = outcome.steps, "agent finished");
            println!("{}", outcome.answer);
        }
        Commands::LoadSensors { csv } => {
            let db = SqlDatabase::connect(&cfg.sql.url, false).await?;
            let inserted = sensors::load_history_csv(&db, &csv).await?;
            db.close().await;
            println!("Inserted {} rows into sensor_history table", inserted);
        }
        Commands::MigrateIndex => {
            let provider = embedding::create_provider(&cfg.embedding)?;
            let copied = store::migrate_to_pgvector(&cfg, provider.as_ref()).await?;
            println!("Migrated {} chunks to pgvector", copied);
        }
    }

    Ok(())
}
