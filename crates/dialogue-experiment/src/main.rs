//! Dialogue experiment CLI.
//!
//! Commands:
//! - pair: run a single matched pair and print both trajectories' metrics
//! - batch: run many pairs and save aggregated results
//! - recompute: rebuild metrics and statistics from a saved result file

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

use trajectory_kernel::{MetricResult, MetricsConfig, Provocation, SchedulerConfig};

use dialogue_experiment::aggregate::{AggregateError, ExperimentStats, MetricAggregate};
use dialogue_experiment::experiment::{agent_roster, ExperimentRunner, ExperimentRunnerConfig};
use dialogue_experiment::pair::PairResult;
use dialogue_experiment::results::ExperimentResult;
use dialogue_experiment::vllm_client::VllmClient;

/// Generate a timestamped output path from the given path.
/// e.g., "results.json" -> "results-20260108-010530.json"
fn timestamped_path(path: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("results");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("json");
    let parent = path.parent().unwrap_or(std::path::Path::new("."));
    parent.join(format!("{}-{}.{}", stem, timestamp, ext))
}

#[derive(Parser)]
#[command(name = "dialogue-experiment")]
#[command(version)]
#[command(about = "Matched-pair dialogue trajectory experiments")]
struct Cli {
    /// vLLM host URL for chat completions
    #[arg(long = "vllm-host", env = "VLLM_HOST", default_value = "http://localhost:8000")]
    vllm_host: String,

    /// Host for the embedding endpoint (defaults to the vLLM host)
    #[arg(long = "embedding-host", env = "EMBEDDING_HOST")]
    embedding_host: Option<String>,

    /// Embedding model name
    #[arg(long, default_value = "BAAI/bge-small-en-v1.5")]
    embedding_model: String,

    /// Model serving every agent in the single condition
    #[arg(long, default_value = "Qwen/Qwen2.5-1.5B")]
    single_model: String,

    /// Models spread round-robin across agents in the multi condition
    #[arg(
        long,
        default_value = "Qwen/Qwen2.5-0.5B,Qwen/Qwen2.5-1.5B,Qwen/Qwen2.5-3B",
        value_delimiter = ','
    )]
    multi_models: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Subcommand)]
enum Commands {
    /// Run a single matched pair
    Pair {
        /// Provocation id recorded in results
        #[arg(long, default_value = "p0")]
        provocation_id: String,

        /// Provocation text that opens both dialogues
        #[arg(
            long,
            default_value = "A long-standing assumption in your field has just been overturned. What now?"
        )]
        provocation: String,

        /// Random seed shared by both conditions
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Turns per session
        #[arg(long, default_value = "21")]
        max_turns: usize,

        /// Number of agents in the ensemble
        #[arg(long, default_value = "7")]
        agents: usize,

        /// Agent that deterministically opens both dialogues
        #[arg(long)]
        fixed_opening_agent: Option<String>,
    },

    /// Run a batch of matched pairs and save aggregated results
    Batch {
        /// Provocation id recorded in results
        #[arg(long, default_value = "p0")]
        provocation_id: String,

        /// Provocation text that opens every dialogue
        #[arg(
            long,
            default_value = "A long-standing assumption in your field has just been overturned. What now?"
        )]
        provocation: String,

        /// First seed; pair k runs with seed base_seed + k
        #[arg(long = "base-seed", default_value = "42")]
        base_seed: u64,

        /// Number of matched pairs
        #[arg(long, default_value = "8")]
        pairs: usize,

        /// Turns per session
        #[arg(long, default_value = "21")]
        max_turns: usize,

        /// Number of agents in the ensemble
        #[arg(long, default_value = "7")]
        agents: usize,

        /// Agent that deterministically opens every dialogue
        #[arg(long)]
        fixed_opening_agent: Option<String>,

        /// Output file for results
        #[arg(long, default_value = "results.json")]
        output: PathBuf,
    },

    /// Rebuild metrics and statistics from a saved result file
    Recompute {
        /// Previously saved results file
        #[arg(long)]
        input: PathBuf,

        /// Where to write the recomputed results (defaults to a
        /// timestamped sibling of the input)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    match cli.command.clone() {
        Commands::Pair {
            provocation_id,
            provocation,
            seed,
            max_turns,
            agents,
            fixed_opening_agent,
        } => {
            let config = build_config(&cli, agents, max_turns, fixed_opening_agent);
            check_server(&config.vllm_host).await;

            let runner = ExperimentRunner::new(config);
            let provocation = Provocation::new(provocation_id, provocation);
            let result = runner.run(&provocation, &[seed], None).await?;

            let pair = &result.pairs[0];
            println!("\n=== Matched Pair ===");
            println!("Provocation: {}", pair.provocation_id);
            println!("Seed: {}", pair.seed);
            print_pair(pair);
        }

        Commands::Batch {
            provocation_id,
            provocation,
            base_seed,
            pairs,
            max_turns,
            agents,
            fixed_opening_agent,
            output,
        } => {
            let config = build_config(&cli, agents, max_turns, fixed_opening_agent);
            check_server(&config.vllm_host).await;

            let runner = ExperimentRunner::new(config);
            let provocation = Provocation::new(provocation_id, provocation);
            let seeds: Vec<u64> = (0..pairs as u64).map(|k| base_seed + k).collect();
            let result = runner.run(&provocation, &seeds, None).await?;

            let output_path = timestamped_path(&output);
            result.save(&output_path)?;

            println!("\n=== Experiment Complete ===");
            println!("Pairs: {}", result.pairs.len());
            let aborted = result
                .pairs
                .iter()
                .flat_map(|p| [&p.single_session, &p.multi_session])
                .filter(|s| s.terminal.is_aborted())
                .count();
            if aborted > 0 {
                println!("Aborted sessions (partial data kept): {aborted}");
            }
            println!("Results saved to: {}", output_path.display());
            if let Some(stats) = &result.stats {
                print_stats(stats);
            }
        }

        Commands::Recompute { input, output } => {
            let mut result = ExperimentResult::load(&input)?;
            result.recompute_metrics(&MetricsConfig::default());

            let output_path = output.unwrap_or_else(|| timestamped_path(&input));
            result.save(&output_path)?;

            println!("\n=== Recompute Complete ===");
            println!("Pairs: {}", result.pairs.len());
            println!("Results saved to: {}", output_path.display());
            if let Some(stats) = &result.stats {
                print_stats(stats);
            }
        }
    }

    Ok(())
}

fn build_config(
    cli: &Cli,
    agents: usize,
    max_turns: usize,
    fixed_opening_agent: Option<String>,
) -> ExperimentRunnerConfig {
    ExperimentRunnerConfig {
        vllm_host: cli.vllm_host.clone(),
        embedding_host: cli
            .embedding_host
            .clone()
            .unwrap_or_else(|| cli.vllm_host.clone()),
        embedding_model: cli.embedding_model.clone(),
        single_model: cli.single_model.clone(),
        multi_models: cli.multi_models.clone(),
        agents: agent_roster(agents),
        max_turns,
        scheduler: SchedulerConfig {
            fixed_opening_agent,
            ..SchedulerConfig::default()
        },
        ..ExperimentRunnerConfig::default()
    }
}

async fn check_server(host: &str) {
    if !VllmClient::new(host).health_check().await {
        warn!(host = host, "vLLM server is not answering health checks");
    }
}

fn format_metric(metric: &MetricResult) -> String {
    match metric {
        Ok(v) => format!("{v:>9.4}"),
        Err(e) => format!("undefined ({e})"),
    }
}

fn format_delta(delta: Option<f64>) -> String {
    match delta {
        Some(v) => format!("{v:>+9.4}"),
        None => "undefined".to_string(),
    }
}

fn print_pair(pair: &PairResult) {
    println!(
        "Single session: {} turns, terminal: {:?}",
        pair.single_session.turns.len(),
        pair.single_session.terminal
    );
    println!(
        "Multi session:  {} turns, terminal: {:?}",
        pair.multi_session.turns.len(),
        pair.multi_session.terminal
    );

    println!("\n{:>15} {:>24} {:>24} {:>12}", "Metric", "Single", "Multi", "Delta");
    let rows = [
        (
            "mean_velocity",
            &pair.single_metrics.mean_velocity,
            &pair.multi_metrics.mean_velocity,
            pair.deltas.mean_velocity,
        ),
        (
            "curvature",
            &pair.single_metrics.curvature,
            &pair.multi_metrics.curvature,
            pair.deltas.curvature,
        ),
        (
            "dfa_alpha",
            &pair.single_metrics.dfa_alpha,
            &pair.multi_metrics.dfa_alpha,
            pair.deltas.dfa_alpha,
        ),
        (
            "entropy_shift",
            &pair.single_metrics.entropy_shift,
            &pair.multi_metrics.entropy_shift,
            pair.deltas.entropy_shift,
        ),
    ];
    for (name, single, multi, delta) in rows {
        println!(
            "{:>15} {:>24} {:>24} {:>12}",
            name,
            format_metric(single),
            format_metric(multi),
            format_delta(delta)
        );
    }
}

fn print_stats(stats: &ExperimentStats) {
    println!("\nAggregate statistics (multi − single):");
    let rows: [(&str, &MetricAggregate); 4] = [
        ("mean_velocity", &stats.mean_velocity),
        ("curvature", &stats.curvature),
        ("dfa_alpha", &stats.dfa_alpha),
        ("entropy_shift", &stats.entropy_shift),
    ];
    for (name, agg) in rows {
        let mean = agg
            .mean_delta
            .map(|m| format!("{m:+.4}"))
            .unwrap_or_else(|| "undefined".to_string());
        match &agg.test {
            Ok(test) => println!(
                "  {:>15}: n={}, mean={}, sd={:.4}, {:?}={:.3}, p={:.4}, d={:.3}",
                name,
                agg.n,
                mean,
                agg.std_dev.unwrap_or(f64::NAN),
                test.kind,
                test.statistic,
                test.p_value,
                test.effect_size
            ),
            Err(AggregateError::InsufficientSample { .. }) => println!(
                "  {:>15}: n={}, mean={} (point estimate only, n<2)",
                name, agg.n, mean
            ),
            Err(e) => println!("  {:>15}: n={}, mean={} ({})", name, agg.n, mean, e),
        }
    }
}
