mod cli;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use log::{debug, error};
use plexus_core::RuntimeConfig;

/// Plexus: plugin lifecycle runtime
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Simple ping command for testing
    #[arg(long)]
    ping: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Runtime configuration file (.json, .yaml, .toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the load order of the manifests in the given directories
    Order {
        /// Directories holding *.plugin.json manifests (default: plugin_dirs from the configuration)
        dirs: Vec<PathBuf>,
    },
    /// Check that every declared dependency is present and version-compatible
    Check { dirs: Vec<PathBuf> },
    /// Load, initialize and then shut down every plugin
    Run { dirs: Vec<PathBuf> },
    /// Print the SHA-256 digest of a plugin file
    Digest { file: PathBuf },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    if args.ping {
        println!("pong");
        return ExitCode::SUCCESS;
    }

    init_logging(args.verbose);

    let config = match &args.config {
        Some(path) => match RuntimeConfig::load(path).await {
            Ok(config) => config,
            Err(e) => {
                error!("{}", e);
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => RuntimeConfig::default(),
    };
    debug!("Effective configuration: {:?}", config);

    let outcome = match args.command {
        Some(Commands::Order { dirs }) => cli::order(&config, dirs).await,
        Some(Commands::Check { dirs }) => cli::check(&config, dirs).await,
        Some(Commands::Run { dirs }) => cli::run(&config, dirs).await,
        Some(Commands::Digest { file }) => cli::digest(&file).await,
        None => {
            let mut command = CliArgs::command();
            if let Err(e) = command.print_help() {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
            println!();
            return ExitCode::SUCCESS;
        }
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
