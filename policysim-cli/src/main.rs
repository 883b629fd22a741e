//! policysim CLI - Run agent evaluation experiments from the command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use policysim_core::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "policysim")]
#[command(about = "Policy-driven simulation harness for conversational agents", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the workspace layout
    Init {
        /// Workspace root
        #[arg(short, long, env = "POLICYSIM_OUTPUT")]
        output: PathBuf,
    },
    /// List datasets in a workspace, newest first
    Datasets {
        /// Workspace root
        #[arg(short, long, env = "POLICYSIM_OUTPUT")]
        output: PathBuf,
    },
    /// Run an experiment with file-backed collaborators
    Run {
        /// Configuration file; defaults to policysim.toml and POLICYSIM_ variables
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Workspace root
        #[arg(short, long, env = "POLICYSIM_OUTPUT")]
        output: PathBuf,

        /// Dataset name or "latest"; overrides the configured selector
        #[arg(short, long)]
        dataset: Option<String>,

        /// Policy graph used when the workspace has no catalogue yet
        #[arg(long)]
        catalogue_file: Option<PathBuf>,

        /// Scenarios used when a new dataset has to be synthesized
        #[arg(long)]
        records_file: Option<PathBuf>,

        /// Recorded conversations replayed by the dialogue driver
        #[arg(long)]
        transcripts_file: PathBuf,
    },
    /// Version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let run_log = RunLog::new();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(run_log.clone()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("policysim {}", env!("CARGO_PKG_VERSION"));
            println!("policysim-core {}", policysim_core::VERSION);
        }
        Commands::Init { output } => {
            let workspace = Workspace::ensure(&output)?;
            println!("Workspace: {}", workspace.root().display());
            println!("  catalogue:   {}", workspace.catalogue_dir().display());
            println!("  datasets:    {}", workspace.datasets_dir().display());
            println!("  experiments: {}", workspace.experiments_dir().display());
            println!(
                "Catalogue cached: {}",
                if workspace.catalogue_cached() { "yes" } else { "no" }
            );
        }
        Commands::Datasets { output } => {
            let workspace = Workspace::ensure(&output)?;
            let entries = DatasetManager::for_workspace(&workspace, "dataset")
                .list()
                .await?;
            if entries.is_empty() {
                println!("No datasets in {}", workspace.datasets_dir().display());
            }
            for entry in entries {
                match entry.created_at {
                    Some(at) => println!("{}  ({})", entry.name, at),
                    None => println!("{}", entry.name),
                }
            }
        }
        Commands::Run {
            config,
            output,
            dataset,
            catalogue_file,
            records_file,
            transcripts_file,
        } => {
            let config = match config {
                Some(path) => SimulatorConfig::from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => SimulatorConfig::load()?,
            };
            config.validate()?;

            let workspace = Workspace::ensure(&output)?;
            let catalogue = match catalogue_file {
                Some(path) if workspace.catalogue_cached() => {
                    tracing::warn!(
                        file = %path.display(),
                        "Catalogue already cached in workspace; ignoring policy graph file"
                    );
                    StaticCatalogueGenerator::default()
                }
                Some(path) => StaticCatalogueGenerator::from_file(&path)
                    .with_context(|| format!("reading policy graph {}", path.display()))?,
                None if workspace.catalogue_cached() => StaticCatalogueGenerator::default(),
                None => anyhow::bail!(
                    "no catalogue in {}; pass --catalogue-file to build one",
                    workspace.catalogue_dir().display()
                ),
            };
            let records = match records_file {
                Some(path) => RecordFileDatasetGenerator::from_file(&path)
                    .with_context(|| format!("reading scenarios {}", path.display()))?,
                None => RecordFileDatasetGenerator::default(),
            };
            let dialog = ScriptedDialogDriver::from_file(&transcripts_file)
                .with_context(|| format!("reading transcripts {}", transcripts_file.display()))?;

            let collaborators = Collaborators {
                catalogue: Arc::new(catalogue),
                dataset: Arc::new(records),
                dialog: Arc::new(dialog),
            };

            tracing::info!(
                workspace = %workspace.root().display(),
                environment = %config.environment.name,
                "Starting run"
            );
            let mut executor =
                SimulatorExecutor::new(config, &output, collaborators, run_log).await?;
            if let Some(selector) = dataset {
                tracing::info!(dataset = %selector, "Using dataset from command line");
                executor
                    .load_dataset(&DatasetSelector::parse(Some(selector.as_str())))
                    .await?;
            }

            let summary = executor.run_simulation().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
