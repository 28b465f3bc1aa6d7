use chrono::{DateTime, TimeDelta, Utc};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use tagsched::config::SchedulerConfig;
use tagsched::definition::{load_catalog, JobCatalog};
use tagsched::leadership::LeaderFlag;
use tagsched::node::{dispatch_standalone, Node};
use tagsched::scheduler::{JobAssigner, JobLedger, Placement};
use tagsched::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "tagsched")]
#[command(version)]
#[command(about = "Cron-style job scheduling with tag-based admission rules")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Validate a job definition file
    Check {
        #[command(flatten)]
        jobs: JobsArgs,
    },

    /// Show the upcoming deadlines of one job
    Next {
        #[command(flatten)]
        jobs: JobsArgs,

        /// Job name
        #[arg(long)]
        job: String,

        /// Reference instant (RFC 3339), defaults to now
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// Number of deadlines to list
        #[arg(long, default_value = "5")]
        count: usize,
    },

    /// Dry-run one planning pass against an empty ledger
    Plan {
        #[command(flatten)]
        jobs: JobsArgs,

        /// Cluster nodes (comma-separated)
        #[arg(long, value_delimiter = ',')]
        nodes: Vec<String>,

        /// Planning instant (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Run the scheduler loop as a standalone leader
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct JobsArgs {
    /// JSON file with job definitions
    #[arg(long, short = 'j')]
    jobs: PathBuf,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// JSON file with job definitions
    #[arg(long, short = 'j')]
    jobs: PathBuf,

    /// Identifier of this node
    #[arg(long, default_value = "node1")]
    node_id: String,

    /// Other cluster nodes (comma-separated)
    #[arg(long, value_delimiter = ',')]
    nodes: Vec<String>,

    /// Planning interval in milliseconds
    #[arg(long, default_value = "1000")]
    tick_ms: u64,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct CheckOutput {
    accepted: Vec<JobSummary>,
    rejected: Vec<String>,
}

#[derive(Serialize)]
struct JobSummary {
    name: String,
    job_type: String,
    schedule: String,
    tags: Vec<String>,
    rules: Vec<String>,
}

#[derive(Serialize)]
struct NextOutput {
    job: String,
    deadlines: Vec<DateTime<Utc>>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: &Path) -> Result<(JobCatalog, Vec<String>), Box<dyn std::error::Error>> {
    let (catalog, rejected) = load_catalog(path)?;
    Ok((catalog, rejected.iter().map(ToString::to_string).collect()))
}

fn summarize(catalog: &JobCatalog) -> Vec<JobSummary> {
    catalog
        .jobs()
        .map(|job| JobSummary {
            name: job.name().to_string(),
            job_type: job.definition.job_type.to_string(),
            schedule: job.schedule.kind().to_string(),
            tags: job.definition.tags.iter().cloned().collect(),
            rules: job.rules.iter().map(ToString::to_string).collect(),
        })
        .collect()
}

// =============================================================================
// Command Handlers
// =============================================================================

fn handle_check(args: &JobsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (catalog, rejected) = load(&args.jobs)?;
    let accepted = summarize(&catalog);
    let failed = rejected.len();

    match args.output {
        OutputFormat::Json => {
            let output = CheckOutput { accepted, rejected };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("{:<24} {:<8} {:<10} RULES", "JOB", "TYPE", "SCHEDULE");
            println!("{}", "-".repeat(70));
            for job in &accepted {
                println!(
                    "{:<24} {:<8} {:<10} {}",
                    job.name,
                    job.job_type,
                    job.schedule,
                    job.rules.join(", ")
                );
            }
            if !rejected.is_empty() {
                println!();
                println!("Rejected:");
                for reason in &rejected {
                    println!("  {}", reason);
                }
            }
        }
    }

    if failed == 0 {
        Ok(())
    } else {
        Err(format!("{} job definition(s) rejected", failed).into())
    }
}

fn handle_next(
    args: &JobsArgs,
    job: &str,
    from: Option<DateTime<Utc>>,
    count: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let (catalog, _) = load(&args.jobs)?;
    let compiled = catalog
        .get(job)
        .ok_or_else(|| format!("unknown job {:?}", job))?;

    let mut schedule = compiled.schedule.clone();
    let mut reference = from.unwrap_or_else(Utc::now);
    let mut deadlines = Vec::with_capacity(count);
    while deadlines.len() < count {
        let Some(deadline) = schedule.get_next_deadline(reference) else {
            break;
        };
        deadlines.push(deadline);
        reference = deadline + TimeDelta::minutes(1);
    }

    match args.output {
        OutputFormat::Json => {
            let output = NextOutput {
                job: job.to_string(),
                deadlines,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            if deadlines.is_empty() {
                println!("{} will not run again.", job);
            }
            for deadline in &deadlines {
                println!("{}", deadline.format("%Y-%m-%d %H:%M %a"));
            }
        }
    }
    Ok(())
}

fn handle_plan(
    args: &JobsArgs,
    nodes: &[String],
    at: Option<DateTime<Utc>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (catalog, _) = load(&args.jobs)?;
    let mut ledger = JobLedger::new(catalog);
    let mut assigner = JobAssigner::new(u64::MAX);
    for node in nodes {
        assigner.register_node(node);
    }

    let placements = assigner.plan(&mut ledger, at.unwrap_or_else(Utc::now));

    match args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&placements)?);
        }
        OutputFormat::Table => {
            if placements.is_empty() {
                println!("Nothing to place.");
            } else {
                println!("{:<24} {:<16} {:<18} INSTANCE", "JOB", "NODE", "RUN AT");
                println!("{}", "-".repeat(96));
                for p in &placements {
                    println!(
                        "{:<24} {:<16} {:<18} {}",
                        p.job,
                        p.node,
                        p.run_at.format("%Y-%m-%d %H:%M"),
                        p.instance_id
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_scheduler(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (catalog, rejected) = load(&args.jobs)?;
    for reason in &rejected {
        tracing::warn!(reason = %reason, "Job definition rejected");
    }

    let mut config = SchedulerConfig::new(args.node_id).with_jobs_path(args.jobs);
    config.tick_interval_ms = args.tick_ms;
    for node in args.nodes {
        config = config.with_node(node);
    }
    let buffer = config.event_buffer;

    tracing::info!(
        node_id = %config.node_id,
        nodes = ?config.initial_nodes(),
        jobs = catalog.len(),
        "Starting scheduler"
    );

    let shutdown = install_shutdown_handler();
    // Standalone mode: no election, this node always leads.
    let node = Node::new(config, catalog, LeaderFlag::new(true));
    let (event_tx, event_rx) = mpsc::channel(buffer);
    let (placement_tx, placement_rx) = mpsc::channel::<Placement>(buffer);
    let dispatcher = tokio::spawn(dispatch_standalone(placement_rx, event_tx));

    node.run(event_rx, placement_tx, shutdown).await;
    dispatcher.await?;
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging();

    match args.command {
        Commands::Check { jobs } => handle_check(&jobs)?,
        Commands::Next {
            jobs,
            job,
            from,
            count,
        } => handle_next(&jobs, &job, from, count)?,
        Commands::Plan { jobs, nodes, at } => handle_plan(&jobs, &nodes, at)?,
        Commands::Run(run_args) => run_scheduler(run_args).await?,
    }

    Ok(())
}
