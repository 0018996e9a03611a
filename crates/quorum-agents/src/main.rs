use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use coordination::ensemble::EnsembleConfig;
use quorum_agents::cli::{Args, Command};
use quorum_agents::config::AppConfig;
use quorum_agents::operator::ConsoleOperator;
use quorum_agents::runner;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(
        models = config.models.len(),
        cloud = config.cloud.len(),
        scan = config.fleet.scan_enabled,
        tools = config.tools.enabled,
        "quorum-agents starting"
    );

    match args.command {
        Command::Ask {
            question,
            quorum,
            no_refine,
        } => {
            let defaults = EnsembleConfig::default();
            let ensemble = EnsembleConfig {
                quorum: quorum.unwrap_or(defaults.quorum),
                refine: !no_refine,
            };
            let operator = Arc::new(ConsoleOperator::new());
            let outcome = runner::run_ask(&config, operator, &question, ensemble).await?;
            print!("{}", runner::render_outcome(&outcome));
        }
        Command::Fleet => {
            let report = runner::run_fleet(&config).await?;
            print!("{}", runner::render_report(&report));
        }
        Command::Tools => {
            let gateway = runner::http_gateway(&config)?;
            let catalog = runner::run_tools(&gateway).await?;
            print!("{}", runner::render_catalog(&catalog));
        }
        Command::Eval { queries, out } => {
            let rows = runner::run_eval(&config, &queries, &out).await?;
            info!(rows, out = %out.display(), "Evaluation written");
        }
        Command::Capacity { model, out, steps } => {
            let rows = runner::run_capacity(&config, &model, &out, steps).await?;
            info!(rows, model = %model, out = %out.display(), "Capacity probe written");
        }
    }

    Ok(())
}
