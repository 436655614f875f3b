use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Relay - an asynchronous work bridge for single-threaded interpreters", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Worker thread count (overrides config file and env vars)
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the effective configuration as TOML
    Config,

    /// Run hashing jobs through the worker pool and report throughput
    Bench {
        /// Number of work items to create
        #[arg(long, default_value = "1000")]
        jobs: usize,

        /// SHA-256 rounds per job
        #[arg(long, default_value = "1000")]
        compute_iterations: usize,

        /// Extra bytes hashed per round
        #[arg(long, default_value = "0")]
        payload_size: usize,

        /// Cancel every Nth job right after queueing it
        #[arg(long)]
        cancel_every: Option<usize>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Install the stderr subscriber; `RUST_LOG` wins over `filter`
pub fn init_tracing(filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// Run the CLI by parsing process arguments
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli)
}

/// Run the CLI with provided arguments (for embedders that filter args)
pub fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::try_parse_from(args)?;
    run_cli_with_args(cli)
}

fn run_cli_with_args(cli: Cli) -> Result<()> {
    use crate::benchmark;

    // Load and validate configuration before executing any command
    let config = Config::builder()
        .config_path(cli.config)
        .worker_threads(cli.workers)
        .build()?;

    init_tracing(&config.logging.filter);

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }

        Commands::Bench {
            jobs,
            compute_iterations,
            payload_size,
            cancel_every,
            json,
        } => {
            let params = benchmark::BenchmarkParams {
                jobs,
                compute_iterations,
                payload_size,
                cancel_every,
            };

            let report = benchmark::run_benchmark(&config, &params)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                benchmark::display_report(&report);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bench_args() {
        let cli = Cli::try_parse_from([
            "relay",
            "--workers",
            "2",
            "bench",
            "--jobs",
            "10",
            "--cancel-every",
            "3",
            "--json",
        ])
        .unwrap();

        assert_eq!(cli.workers, Some(2));
        let Commands::Bench {
            jobs,
            compute_iterations,
            cancel_every,
            json,
            ..
        } = cli.command
        else {
            unreachable!("Expected bench command");
        };
        assert_eq!(jobs, 10);
        assert_eq!(compute_iterations, 1000);
        assert_eq!(cancel_every, Some(3));
        assert!(json);
    }

    #[test]
    fn test_global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["relay", "config", "--config", "relay.toml"]).unwrap();

        assert!(matches!(cli.command, Commands::Config));
        assert_eq!(cli.config, Some(PathBuf::from("relay.toml")));
    }

    #[test]
    fn test_bench_end_to_end() {
        let args = ["relay", "--workers", "2", "bench", "--jobs", "4", "--compute-iterations", "5", "--json"]
            .map(String::from)
            .to_vec();

        run_cli_from_args(args).unwrap();
    }
}
