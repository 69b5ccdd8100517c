//! `econ-classify`: command-line entry point for the classification
//! pipeline. Loads layered configuration, wires up structured logging from
//! `RUST_LOG`, and dispatches to `run-pipeline` or `review-all`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use econ_classify_core::config::Config;
use econ_classify_core::error::Error;
use econ_classify_core::pipeline::Pipeline;
use econ_classify_core::{PipelineExecution, StageSummary};
use econ_classify_core::stages::CancellationToken;

#[derive(Parser)]
#[command(name = "econ-classify")]
#[command(about = "Batch classification pipeline for economic indicators")]
struct Cli {
    /// Path to a TOML config file. Falls back to built-in defaults plus
    /// environment variables when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run every stage without calling an LLM provider: Router, Specialist,
    /// and Orientation are synthesized locally.
    #[arg(long, global = true)]
    dry_run: bool,

    /// SQLite database path. Overrides `database.path` and `CLASSIFY_DB`.
    #[arg(long, global = true, env = "CLASSIFY_DB")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run Router, Specialist, Validation, Orientation, and Flagging (and
    /// Review, unless `--dry-run`) over the indicators currently in storage.
    RunPipeline {
        /// Reuse an existing execution_id instead of generating a fresh one.
        #[arg(long)]
        execution_id: Option<String>,

        /// Only process the first N indicators in storage.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Re-review every flagged classification from a prior execution.
    ReviewAll {
        /// The execution_id whose flagged rows should be re-reviewed.
        #[arg(long)]
        execution_id: String,

        /// Record every decision as `escalate` without applying fixes.
        #[arg(long)]
        flag_only: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return ExitCode::from(3);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Cancelled) => {
            println!("execution cancelled");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let mut config = Config::load_unvalidated(cli.config.as_deref())?;
    if cli.dry_run {
        config.dry_run = true;
    }
    if let Some(db) = cli.db {
        config.database.path = db;
    }
    config.validate()?;

    let pipeline = Pipeline::new(config)?;

    match cli.command {
        Commands::RunPipeline { execution_id, limit } => {
            let cancellation = CancellationToken::new();
            let ctrl_c_token = cancellation.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("received interrupt, finishing in-flight requests...");
                    ctrl_c_token.cancel();
                }
            });

            let execution = pipeline.run_pipeline(execution_id, limit, cancellation).await?;
            print_execution_summary(&execution);
        }
        Commands::ReviewAll { execution_id, flag_only } => {
            let summary = pipeline.review_all(&execution_id, flag_only).await?;
            print_stage_summary("review-all", &summary);
        }
    }

    Ok(())
}

const STAGE_ORDER: [&str; 6] =
    ["router", "specialist", "validation", "orientation", "flagging", "review"];

fn print_execution_summary(execution: &PipelineExecution) {
    println!("execution_id: {}", execution.execution_id);
    println!("dry_run: {}", execution.dry_run);
    println!(
        "{:<12} {:>10} {:>10} {:>10} {:>10} {:>9} {:>8} {:>10} {:>10}",
        "stage", "processed", "successful", "failed", "flagged", "reviewed", "fixed", "escalated", "elapsed_ms"
    );
    for stage in STAGE_ORDER {
        let Some(summary) = execution.stage_counts.get(stage) else { continue };
        println!(
            "{:<12} {:>10} {:>10} {:>10} {:>10} {:>9} {:>8} {:>10} {:>10}",
            stage,
            summary.processed,
            summary.successful,
            summary.failed,
            summary.flagged,
            summary.reviewed,
            summary.fixed,
            summary.escalated,
            summary.elapsed_ms,
        );
    }
    println!(
        "totals: api_calls={} input_tokens={} output_tokens={} estimated_cost={:.4}",
        execution.api_calls, execution.input_tokens, execution.output_tokens, execution.cost_estimate,
    );
}

fn print_stage_summary(label: &str, summary: &StageSummary) {
    println!(
        "{label}: processed={} successful={} flagged={} reviewed={} fixed={} escalated={} \
         elapsed_ms={} api_calls={} input_tokens={} output_tokens={} estimated_cost={:.4}",
        summary.processed,
        summary.successful,
        summary.flagged,
        summary.reviewed,
        summary.fixed,
        summary.escalated,
        summary.elapsed_ms,
        summary.api_calls,
        summary.input_tokens,
        summary.output_tokens,
        summary.estimated_cost,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clap_parses_run_pipeline_with_options() {
        let cli = Cli::try_parse_from([
            "econ-classify",
            "--dry-run",
            "run-pipeline",
            "--limit",
            "10",
        ])
        .expect("parse run-pipeline");
        assert!(cli.dry_run);
        assert!(matches!(cli.command, Commands::RunPipeline { limit: Some(10), .. }));
    }

    #[test]
    fn clap_requires_execution_id_for_review_all() {
        assert!(Cli::try_parse_from(["econ-classify", "review-all"]).is_err());
        let cli = Cli::try_parse_from(["econ-classify", "review-all", "--execution-id", "exec-1"])
            .expect("parse review-all");
        assert!(matches!(cli.command, Commands::ReviewAll { flag_only: false, .. }));
    }
}
