//! Gantry command line: run a declarative generation plan against the
//! built-in agents and print the terminal report.

use anyhow::Context;
use clap::{Parser, Subcommand};
use gantry_core::{GantryError, Plan, PlanInput};
use gantry_orchestrator::{Orchestrator, Report, RunStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gantry", about = "Gantry — declarative project-generation workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan file and print the terminal report
    Run {
        /// Path to the plan file (TOML)
        plan: PathBuf,
        /// Print the report as JSON instead of text
        #[arg(long)]
        json: bool,
        /// Bound the number of steps executing at once
        #[arg(long)]
        max_concurrency: Option<usize>,
    },
    /// Validate a plan file (ids, references, cycles) without executing
    Check {
        /// Path to the plan file (TOML)
        plan: PathBuf,
    },
    /// List the built-in agents and their capabilities
    Agents,
}

async fn load_plan(path: &Path) -> anyhow::Result<PlanInput> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read plan file '{}'", path.display()))?;
    let input: PlanInput = toml::from_str(&raw)
        .with_context(|| format!("failed to parse plan file '{}'", path.display()))?;
    Ok(input)
}

fn print_report(report: &Report, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("plan: {} ({})", report.plan_name, report.plan_id);
    println!("status: {:?}", report.status);
    println!(
        "steps: {} total, {} succeeded, {} failed, {} skipped",
        report.total_steps, report.steps_succeeded, report.steps_failed, report.steps_skipped
    );
    println!(
        "attempts: {} ({} steps retried)",
        report.total_attempts, report.steps_retried
    );
    println!(
        "validation: {} run, {} auto-corrections",
        report.validations_run, report.auto_corrections_applied
    );
    println!("duration: {}ms", report.duration_ms);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            plan,
            json,
            max_concurrency,
        } => {
            let input = load_plan(&plan).await?;

            let mut orchestrator = Orchestrator::new();
            if let Some(limit) = max_concurrency {
                orchestrator = orchestrator.with_max_concurrency(limit);
            }
            let orchestrator = Arc::new(orchestrator);
            gantry_agents::register_builtins(&orchestrator)?;

            let plan_id = orchestrator.create_project(input).await?;
            info!(plan_id = %plan_id, "executing workflow");

            // Ctrl-C stops new dispatch; in-flight steps finish and the
            // report still prints.
            let canceller = {
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        let _ = orchestrator.cancel_workflow(plan_id).await;
                    }
                })
            };
            let report = orchestrator.execute_workflow(plan_id).await?;
            canceller.abort();

            print_report(&report, json)?;
            match report.status {
                RunStatus::Succeeded => {}
                RunStatus::Cancelled => return Err(GantryError::WorkflowCancelled.into()),
                status => anyhow::bail!("workflow finished with status {status:?}"),
            }
        }
        Commands::Check { plan } => {
            let input = load_plan(&plan).await?;
            let validated = Plan::from_input(input)?;
            println!(
                "plan '{}' is valid: {} steps, no cycles",
                validated.name,
                validated.step_count()
            );
        }
        Commands::Agents => {
            let orchestrator = Orchestrator::new();
            gantry_agents::register_builtins(&orchestrator)?;
            let mut index: Vec<(String, Vec<String>)> =
                orchestrator.registry().capability_index().into_iter().collect();
            index.sort();
            for (capability, agents) in index {
                println!("{capability}: {}", agents.join(", "));
            }
        }
    }

    Ok(())
}
