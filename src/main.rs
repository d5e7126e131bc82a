//! codexctl - firmware update orchestrator for reMarkable tablets
//!
//! Resolves a firmware version against the version catalog, downloads and
//! verifies the artifact, and drives the device's update engine over SSH
//! (or directly when running on the tablet).

mod archive;
mod catalog;
mod commands;
mod compat;
mod config;
mod device;
mod download;
mod engine;
mod error;
mod hardware;
mod logging;
mod prompt;
mod server;
mod utils;
mod version;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::ConnectOptions;
use crate::hardware::HardwareClass;
use crate::prompt::ConsolePrompter;

#[derive(Parser)]
#[command(name = "codexctl")]
#[command(about = "Install, download and restore reMarkable firmware", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Device address (defaults to the USB address when not on the device)
    #[arg(long, short = 'a', global = true)]
    address: Option<String>,

    /// SSH password or path to a private key; a single space for none
    #[arg(long, short = 'p', visible_alias = "auth", global = true)]
    password: Option<String>,

    /// SSH port
    #[arg(long, global = true, default_value_t = config::device::SSH_PORT)]
    port: u16,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a version (`latest`, `toltec`, a version number) or a firmware file
    Install {
        target: String,

        /// Address the device should use to reach this machine (legacy engine only)
        #[arg(long)]
        host: Option<String>,
    },

    /// Download the firmware file for a version
    Download {
        version: String,

        /// Hardware to download for (rm1, rm2, rmpp, rmppm)
        #[arg(long)]
        hardware: HardwareClass,

        /// Folder to download to
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Show the installed version and update state of the device
    Status,

    /// Switch the device back to the previously installed version
    Restore,

    /// List known versions
    List {
        #[arg(long)]
        hardware: Option<HardwareClass>,
    },
}

async fn run(cli: Cli) -> Result<()> {
    let options = ConnectOptions {
        address: cli.address,
        port: cli.port,
        auth: cli.password,
    };
    let mut prompter = ConsolePrompter::stdin();

    match cli.command {
        Commands::Install { target, host } => {
            commands::install(&target, host, &options, &mut prompter).await?
        }
        Commands::Download {
            version,
            hardware,
            out,
        } => {
            commands::download(&version, hardware, out).await?;
        }
        Commands::Status => commands::status(&options, &mut prompter).await?,
        Commands::Restore => commands::restore(&options, &mut prompter).await?,
        Commands::List { hardware } => commands::list(hardware).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    log_debug!("main", "codexctl {}", env!("CARGO_PKG_VERSION"));
    log_debug!(
        "main",
        "OS: {} {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
