use clap::{Parser, Subcommand};
use parley::ParleyConfig;
use parley::observability::init_tracing;
use std::path::PathBuf;
use std::time::Duration;

mod agents;

use agents::{DemoOptions, Directory, run_demo};

#[derive(Parser, Debug)]
#[command(name = "parley", version)]
#[command(about = "Parley CLI - message-driven agents with single-flight worker startup")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run gateway, registry and workers in-process and fire concurrent chat events
    Demo {
        /// Platform name the events come from
        #[arg(long, default_value = "telegram")]
        platform: String,
        /// Number of distinct users
        #[arg(long, default_value_t = 1)]
        users: usize,
        /// Events fired at once for every user
        #[arg(long, default_value_t = 8)]
        events: usize,
        /// Simulated worker boot time (e.g. "200ms", "1s")
        #[arg(long, default_value = "200ms", value_parser = humantime::parse_duration)]
        launch_delay: Duration,
        /// Users the registry refuses
        #[arg(long)]
        blocked: Vec<String>,
        /// Users whose registration is still in progress
        #[arg(long)]
        pending: Vec<String>,
    },
    /// Validate a configuration file
    CheckConfig {
        /// Path to the TOML file
        path: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> ParleyConfig {
    match path {
        Some(path) => match ParleyConfig::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("❌ {e}");
                std::process::exit(1);
            }
        },
        None => ParleyConfig::default(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref());

    if let Err(e) = init_tracing(&config.observability) {
        eprintln!("Logging disabled: {e}");
    }

    match cli.command {
        Commands::Demo {
            platform,
            users,
            events,
            launch_delay,
            blocked,
            pending,
        } => {
            let options = DemoOptions {
                platform,
                users,
                events_per_user: events,
                launch_delay,
                directory: Directory {
                    blocked: blocked.into_iter().collect(),
                    pending: pending.into_iter().collect(),
                },
            };
            match run_demo(&config, options).await {
                Ok(report) => {
                    match serde_json::to_string_pretty(&report) {
                        Ok(json) => println!("{json}"),
                        Err(e) => tracing::error!(error = %e, "Could not render report"),
                    }
                    if !report.completed {
                        std::process::exit(1);
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Demo failed");
                    std::process::exit(1);
                }
            }
        }
        Commands::CheckConfig { path } => match ParleyConfig::load_from_file(&path) {
            Ok(config) => {
                println!("✅ {} is valid", path.display());
                match serde_json::to_string_pretty(&config) {
                    Ok(json) => println!("{json}"),
                    Err(e) => tracing::error!(error = %e, "Could not render config"),
                }
            }
            Err(e) => {
                eprintln!("❌ {e}");
                std::process::exit(1);
            }
        },
    }
}
