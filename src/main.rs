//! `foxyblox` CLI: local operator tooling for the storage engine.

use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use foxyblox::config::{Config, DEFAULT_CONFIG_PATH};
use foxyblox::error::FoxyError;
use foxyblox::System;

#[derive(Parser)]
#[command(name = "foxyblox", about = "A RAID-4-style content-redundant file storage engine")]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a local file as `user/filename`.
    Save {
        user: String,
        filename: String,
        #[arg(long)]
        from: PathBuf,
    },
    /// Reconstruct `user/filename` to a local path.
    Get {
        user: String,
        filename: String,
        #[arg(long)]
        to: PathBuf,
    },
    /// Remove `user/filename` from storage.
    Delete { user: String, filename: String },
    /// Audit and repair every known user's index parity.
    CheckDbParity,
    /// Create the on-disk directory skeleton described by the config.
    InitLocal,
    /// Write a default config file if one does not already exist.
    CreateConfigFile,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), FoxyError> {
    match cli.command {
        Command::CreateConfigFile => {
            if cli.config.exists() {
                return Err(FoxyError::input(format!("{} already exists", cli.config.display())));
            }
            Config::default_local().save(&cli.config)
        }
        Command::InitLocal => {
            let cfg = Config::load_or_create(&cli.config)?;
            cfg.init_local_dirs()
        }
        Command::Save { user, filename, from } => {
            let cfg = Config::load_or_create(&cli.config)?;
            let system = System::open(&cfg)?;
            let file = File::open(&from).map_err(|e| FoxyError::io(from.clone(), e))?;
            system.add(&user, &filename, file)
        }
        Command::Get { user, filename, to } => {
            let cfg = Config::load_or_create(&cli.config)?;
            let system = System::open(&cfg)?;
            system.get(&user, &filename, &to).map(|_| ())
        }
        Command::Delete { user, filename } => {
            let cfg = Config::load_or_create(&cli.config)?;
            let system = System::open(&cfg)?;
            system.delete(&user, &filename).map(|_| ())
        }
        Command::CheckDbParity => {
            let cfg = Config::load_or_create(&cli.config)?;
            let system = System::open(&cfg)?;
            let reports = foxyblox::audit::run_once(system.layout(), system.index())?;
            for (user, report) in reports {
                match report.repaired {
                    Some(bucket) => println!("{user}: repaired bucket {bucket}"),
                    None => println!("{user}: ok ({} buckets checked)", report.checked),
                }
            }
            Ok(())
        }
    }
}
