//! Qubee - conversation simulation
//!
//! Runs scripted two-party conversations against the session engine over a
//! channel that can lose, reorder, duplicate and tamper with envelopes.

use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};

use qubee_logging::{LogConfig, QubeeSubscriberBuilder};
use qubee_simulation::{RunConfig, Simulation, scenarios};
use qubee_storage::SessionStore;

#[derive(Parser)]
#[command(
    name = "qubee-sim",
    about = "Hybrid double-ratchet conversations over a hostile channel",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML file with [engine], [channel] and [logging] sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the canonical Alice/Bob exchange with out-of-order delivery
    AliceBob,

    /// Run a random conversation over a lossy, reordering, tampering channel
    Hostile {
        /// Number of ticks to run
        #[arg(short, long)]
        ticks: Option<u64>,

        /// Probability a message is lost
        #[arg(long)]
        loss: Option<f64>,

        /// Probability a message has a bit flipped
        #[arg(long)]
        tamper: Option<f64>,

        /// Probability a message is delivered twice
        #[arg(long)]
        duplicate: Option<f64>,

        /// Probability a message is delayed
        #[arg(long)]
        reorder: Option<f64>,

        /// Seed for a reproducible run
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Tamper with every message for a burst, then carry on cleanly
    Tamper {
        /// Ticks in the tampered burst
        #[arg(short, long, default_value = "10")]
        burst: u64,
    },

    /// Restart Bob halfway through, reloading sessions from disk
    Restart {
        /// Directory for the session databases (a temporary one by default)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RunConfig::from_file(path)?,
        None => RunConfig::default(),
    };

    let logging = if cli.verbose {
        LogConfig::development()
    } else {
        config.logging.clone()
    };
    let _log_guard = QubeeSubscriberBuilder::new().with_config(logging).try_init()?;

    match cli.command {
        Commands::AliceBob => {
            let sim = scenarios::run_alice_bob_scenario(&config.engine).await?;
            report(&sim)
        }
        Commands::Hostile {
            ticks,
            loss,
            tamper,
            duplicate,
            reorder,
            seed,
        } => {
            let channel = &mut config.channel;
            if let Some(ticks) = ticks {
                channel.ticks = ticks;
            }
            if let Some(p) = loss {
                channel.loss_probability = p;
            }
            if let Some(p) = tamper {
                channel.tamper_probability = p;
            }
            if let Some(p) = duplicate {
                channel.duplicate_probability = p;
            }
            if let Some(p) = reorder {
                channel.reorder_probability = p;
            }
            if seed.is_some() {
                channel.seed = seed;
            }

            let sim = scenarios::run_hostile_channel_scenario(config.channel, &config.engine).await?;
            report(&sim)
        }
        Commands::Tamper { burst } => {
            let sim = scenarios::run_tamper_scenario(&config.engine, burst).await?;
            report(&sim)
        }
        Commands::Restart { data_dir } => {
            // Held until the run ends so the databases stay on disk meanwhile
            let scratch = tempfile::tempdir()?;
            let dir = data_dir.unwrap_or_else(|| scratch.path().to_path_buf());
            std::fs::create_dir_all(&dir)?;

            let sim = scenarios::run_restart_scenario(config.channel, &config.engine, &dir).await?;
            report(&sim)
        }
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn report<S: SessionStore>(sim: &Simulation<S>) -> anyhow::Result<()> {
    println!("\n=== Final Statistics ===");
    println!("{}", sim.summary());

    if sim.violations.is_empty() {
        println!("All delivery guarantees held");
        Ok(())
    } else {
        for violation in &sim.violations {
            eprintln!("  violation: {}", violation);
        }
        bail!("{} guarantee violation(s)", sim.violations.len())
    }
}
