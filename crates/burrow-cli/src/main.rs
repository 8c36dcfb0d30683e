#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod logging;

use burrow_core::Config;
use clap::Parser;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "burrow")]
#[command(author, version, about = "Resolve dependencies and lay out node_modules", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Resolve dependencies, write the lockfile and plan the node_modules layout
    Install {
        /// Fail if the lockfile is missing or out of date
        #[arg(long)]
        frozen_lockfile: bool,

        /// Install a single version of every package
        #[arg(long)]
        flat: bool,

        /// Lay packages out here instead of <cwd>/node_modules
        #[arg(long, value_name = "PATH")]
        modules_folder: Option<PathBuf>,

        /// Package cache directory
        #[arg(long, value_name = "PATH")]
        cache_folder: Option<PathBuf>,

        /// Registry base URL
        #[arg(long, value_name = "URL")]
        registry: Option<String>,

        /// Maximum concurrent downloads
        #[arg(long, value_name = "N")]
        network_concurrency: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::new(cwd.clone())
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    logging::init(config.verbosity, config.json_logs);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(cli.json),
        Some(Commands::Install {
            frozen_lockfile,
            flat,
            modules_folder,
            cache_folder,
            registry,
            network_concurrency,
        }) => {
            let span = tracing::info_span!("install", cmd = "install", cwd = %cwd.display());
            let _guard = span.enter();
            let args = commands::install::InstallArgs {
                frozen_lockfile,
                flat,
                modules_folder,
                cache_folder,
                registry,
                network_concurrency,
            };
            commands::install::run(config, args, cli.json)
        }
    }
}
