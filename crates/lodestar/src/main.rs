mod config;

use clap::{Args, Parser, Subcommand};
use lodestar_scheduler::scheduler::{SchedulerConfig, DEFAULT_SCHEDULER_NAME};
use lodestar_scheduler::{
    AlgorithmRegistry, ApiClient, GenericScheduler, InMemoryCluster, PodResult,
    ScheduleOutcome, Scheduler, TieBreak,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "lodestar", about = "Lodestar pod scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Continuously schedule pending pods against an API server
    Run {
        /// Base URL of the API server
        #[arg(long, env = "LODESTAR_API_SERVER", default_value = "http://127.0.0.1:6443")]
        api_server: String,
        /// Milliseconds between scheduling cycles
        #[arg(
            long,
            env = "LODESTAR_INTERVAL_MS",
            default_value_t = 1000,
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        interval_ms: u64,
        #[command(flatten)]
        algorithm: AlgorithmArgs,
    },
    /// Schedule the pending pods of a snapshot file once and print the placements
    Schedule {
        /// YAML or JSON file with `nodes` and `pods` lists
        #[arg(long)]
        snapshot: PathBuf,
        #[command(flatten)]
        algorithm: AlgorithmArgs,
    },
}

#[derive(Args)]
struct AlgorithmArgs {
    /// Policy file (YAML or JSON); the default predicates and priorities are used without one
    #[arg(long, env = "LODESTAR_POLICY")]
    policy: Option<PathBuf>,
    /// Only pods naming this scheduler are picked up
    #[arg(long, env = "LODESTAR_SCHEDULER_NAME", default_value = DEFAULT_SCHEDULER_NAME)]
    scheduler_name: String,
    /// How to choose among equally scored nodes: random or lexicographic
    #[arg(long, env = "LODESTAR_TIE_BREAK", default_value_t = TieBreak::Random)]
    tie_break: TieBreak,
}

impl AlgorithmArgs {
    fn build(&self) -> miette::Result<GenericScheduler> {
        let policy = config::load_policy(self.policy.as_deref())?;
        let algorithm = GenericScheduler::from_policy(&policy, &AlgorithmRegistry::new())?;
        Ok(algorithm)
    }

    fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            scheduler_name: self.scheduler_name.clone(),
            tie_break: self.tie_break,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            api_server,
            interval_ms,
            algorithm,
        } => run_scheduler(&api_server, interval_ms, &algorithm).await,
        Commands::Schedule {
            snapshot,
            algorithm,
        } => run_once(&snapshot, &algorithm).await,
    }
}

/// Poll the API server and bind pending pods until ctrl-c
async fn run_scheduler(
    api_server: &str,
    interval_ms: u64,
    args: &AlgorithmArgs,
) -> miette::Result<()> {
    info!("Starting lodestar scheduler against {}", api_server);

    let algorithm = args.build()?;
    let client = Arc::new(ApiClient::new(api_server));
    let scheduler = Scheduler::new(
        algorithm,
        client.clone(),
        client,
        SchedulerConfig {
            schedule_interval: Duration::from_millis(interval_ms),
            ..args.scheduler_config()
        },
    );

    let token = CancellationToken::new();

    let scheduler_token = token.clone();
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler.run(scheduler_token).await {
            error!("Scheduler error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down...");
    token.cancel();

    if let Err(e) = scheduler_handle.await {
        error!("Scheduler task panicked: {}", e);
    }

    Ok(())
}

/// One scheduling cycle over an in-memory snapshot
async fn run_once(snapshot: &std::path::Path, args: &AlgorithmArgs) -> miette::Result<()> {
    let snapshot = config::load_snapshot(snapshot)?;
    let algorithm = args.build()?;

    let cluster = InMemoryCluster::new(snapshot.nodes, snapshot.pods);
    let scheduler = Scheduler::new(
        algorithm,
        Arc::new(cluster.clone()),
        Arc::new(cluster),
        args.scheduler_config(),
    );

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let results = scheduler.schedule_cycle(&token).await?;
    if results.is_empty() {
        println!("no pending pods");
    }
    for result in &results {
        println!("{}", describe(result));
    }

    Ok(())
}

fn describe(result: &PodResult) -> String {
    match &result.outcome {
        Ok(ScheduleOutcome::Scheduled { node_name, score }) => {
            format!("{} -> {} (score {})", result.pod, node_name, score)
        }
        Ok(ScheduleOutcome::Unschedulable(fit_error)) => {
            format!("{} unschedulable: {}", result.pod, fit_error)
        }
        Err(e) => format!("{} failed: {}", result.pod, e),
    }
}
