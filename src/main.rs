//! deck-orchestrator
//!
//! Applies a deck plan to a remote presentation:
//!
//! ```text
//! --plan file (CollaboratorResult<DeckPlan>)
//!     → DeckPlan::to_jobs (text-replace job, image-replace job)
//!     → FallbackController::execute per job
//!     → BatchResults printed as JSON
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use clap::Parser;

use deck_orchestrator::collaborator::{Collaborator, PlanFile};
use deck_orchestrator::config::loader::apply_env_overrides;
use deck_orchestrator::config::watcher::ConfigWatcher;
use deck_orchestrator::config::{load_config, validate_config, ConfigError, ExecutionMode, OrchestratorConfig};
use deck_orchestrator::observability::{logging, metrics};
use deck_orchestrator::{FallbackController, OrchestratorContext};

#[derive(Parser)]
#[command(name = "deck-orchestrator")]
#[command(about = "Apply a deck plan to a remote presentation", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON file holding a collaborator result with the deck plan.
    #[arg(short, long)]
    plan: PathBuf,

    /// Execution mode for this run: auto, concurrent or sequential.
    #[arg(short, long)]
    mode: Option<ExecutionMode>,

    /// Reload concurrency settings when the config file changes.
    #[arg(short, long, requires = "config")]
    watch: bool,
}

fn resolve_config(path: Option<&Path>) -> Result<OrchestratorConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => {
            let mut config = OrchestratorConfig::default();
            apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
            validate_config(&config).map_err(ConfigError::Validation)?;
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(cli.config.as_deref())?;

    logging::init_logging(&config.observability.log_level);
    tracing::info!("deck-orchestrator v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    tracing::info!(
        max_concurrency = config.concurrency.max_concurrency,
        execution_mode = %config.concurrency.execution_mode,
        force_sequential = config.concurrency.force_sequential,
        pool_size = config.pool.size,
        "Configuration loaded"
    );

    let requests_per_item = config.concurrency.requests_per_item;
    let ctx = Arc::new(OrchestratorContext::from_config(config)?);

    // Keep the watcher alive for the whole run.
    let _watcher = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, mut updates) = ConfigWatcher::new(path, ctx.config().clone());
            let handle = watcher.run()?;
            let live = ctx.clone();
            tokio::spawn(async move {
                while let Some(next) = updates.recv().await {
                    if let Err(e) = live.apply_config(&next) {
                        tracing::error!(error = %e, "Reloaded config rejected");
                    }
                }
            });
            Some(handle)
        }
        _ => None,
    };

    let plan = PlanFile::new(&cli.plan).invoke(()).await.into_result()?;
    tracing::info!(
        document_id = %plan.document_id,
        text_tokens = plan.text.len(),
        image_tokens = plan.images.len(),
        "Deck plan loaded"
    );

    let controller = FallbackController::new(ctx);
    let mut results = Vec::new();
    for job in plan.to_jobs(requests_per_item) {
        results.push(controller.execute(&job, cli.mode).await);
    }

    println!("{}", serde_json::to_string_pretty(&results)?);

    if results.iter().all(|r| r.success) {
        Ok(())
    } else {
        Err("one or more work items failed".into())
    }
}
