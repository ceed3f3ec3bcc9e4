//! ORDO CLI
//!
//! Runs multi-rank ordering simulations and prints the agreed order.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, bail};
use ordo_coordinator::Mode;
use ordo_sim::{Jitter, SeedSource, SimConfig, SimHarness, SimReport, SimSeed};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ordo")]
#[command(about = "ORDO - leaderless ordering of namespace operations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run ranks on threads over an in-process bus and compare their orders
    Simulate {
        /// JSON simulation config; flags override its values
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of ranks
        #[arg(short, long)]
        ranks: Option<usize>,
        /// Submission mode (voted or broadcast)
        #[arg(short, long)]
        mode: Option<Mode>,
        /// Time window in microseconds
        #[arg(short, long)]
        window_us: Option<u64>,
        /// Operations per rank before the collective close
        #[arg(short, long)]
        ops: Option<usize>,
        /// Jitter seed: a number, `random`, or any string to hash
        #[arg(short, long)]
        seed: Option<SimSeed>,
        /// Maximum per-message delay in microseconds
        #[arg(short, long)]
        jitter_us: Option<u64>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ordo=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Simulate {
            config,
            ranks,
            mode,
            window_us,
            ops,
            seed,
            jitter_us,
            json,
        } => {
            let mut sim = match config {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .wrap_err_with(|| format!("reading {}", path.display()))?;
                    SimConfig::from_json(&text)
                        .wrap_err_with(|| format!("parsing {}", path.display()))?
                }
                None => SimConfig::default(),
            };
            if let Some(ranks) = ranks {
                sim.ranks = ranks;
            }
            if let Some(mode) = mode {
                sim.mode = mode;
            }
            if let Some(window_us) = window_us {
                sim.time_window_us = window_us;
            }
            if let Some(ops) = ops {
                sim.ops_per_rank = ops;
            }
            if let Some(seed) = seed {
                sim.seed = seed;
            }
            if let Some(jitter_us) = jitter_us {
                sim.jitter = Jitter::up_to(jitter_us);
            }
            if sim.seed.source == SeedSource::Random {
                tracing::info!(seed = sim.seed.seed, "drew random seed");
            }

            let report = SimHarness::new(sim)?.run()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }

            if !report.converged() {
                tracing::warn!("ranks disagree on execution order");
                bail!("ranks diverged");
            }
            Ok(())
        }
    }
}

fn print_report(report: &SimReport) {
    let config = &report.config;
    println!(
        "{} ranks, {} mode, window {}us, {} ops/rank, seed {}, jitter <= {}us",
        config.ranks,
        config.mode,
        config.time_window_us,
        config.ops_per_rank,
        config.seed.seed,
        config.jitter.max_us
    );
    println!();
    println!("{:<8} {:>9} {:>7} {:>13} {:>9}", "rank", "committed", "denied", "close retries", "executed");
    for rank in &report.ranks {
        println!(
            "{:<8} {:>9} {:>7} {:>13} {:>9}",
            rank.rank.to_string(),
            rank.committed,
            rank.denied,
            rank.close_retries,
            rank.executed.len()
        );
    }

    println!();
    println!("agreed order:");
    for (seq, entry) in report.reference_order().iter().enumerate() {
        println!(
            "{:>4}  t={:<16} id={:<4} tag={}",
            seq, entry.created_at, entry.id, entry.tag
        );
    }
    println!();
    println!("converged: {}", if report.converged() { "yes" } else { "NO" });
}
