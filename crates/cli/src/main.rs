mod batch;
mod cli;
mod config;
mod metrics;
mod retry;
mod server;
#[cfg(test)]
mod test_support;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::batch::{JobOutcome, Pipeline};
use crate::cli::{Cli, Commands, RunArgs, ServeArgs};
use crate::config::AppConfig;

#[tokio::main]
async fn main() {
    // Load .env before clap reads env fallbacks
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match dotenv {
        Ok(path) => debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Failed to load .env"),
    }

    if let Err(err) = run(cli).await {
        error!("{}", err);
        for cause in err.chain().skip(1) {
            error!("  caused by: {}", cause);
        }
        std::process::exit(1);
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run(args) => run_reports(args).await,
        Commands::Serve(args) => serve(args).await,
    }
}

async fn run_reports(args: RunArgs) -> Result<()> {
    let config = AppConfig::from_args(&args.config)?;
    let pipeline = Pipeline::from_config(config)?;

    let discovery = pipeline.config().batch.discovery();
    let outcomes = pipeline.run_batch(&args.path, discovery, print_outcome).await?;

    let stats = pipeline.stats().snapshot();
    info!(
        directories = outcomes.len(),
        completed = stats.directories_processed,
        skipped = stats.directories_skipped,
        failed = stats.directories_failed,
        questions = stats.questions_asked,
        values_found = stats.values_found,
        service_failures = stats.service_failures,
        "Run complete"
    );
    Ok(())
}

fn print_outcome(outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Completed {
            name,
            output,
            answers_log,
            table,
        } => {
            println!("\n=== {} ===", name);
            print!("{}", table);
            println!("Results saved to {}", output.display());
            if let Some(log) = answers_log {
                println!("Answers saved to {}", log.display());
            }
        }
        JobOutcome::Skipped { name, reason } => {
            println!("\n=== {} ===\nSkipped: {}", name, reason);
        }
        JobOutcome::Failed { name, error } => {
            println!("\n=== {} ===\nFailed: {}", name, error);
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = AppConfig::from_args(&args.config)?;
    let pipeline = Arc::new(Pipeline::from_config(config)?);
    server::serve(pipeline, args.bind).await
}
