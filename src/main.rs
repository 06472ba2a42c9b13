// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use mpm::{
    conf::config::{CONFIG_FILE_DEFAULT, Config},
    core::ServiceController,
    ipc::client::RpcClient,
    utils,
};

use cli::{Cli, Commands};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn load_config(cli: &Cli) -> Result<Config> {
    if let Some(config_path) = &cli.config {
        return Config::from_file(config_path);
    }
    match Config::load_default() {
        Ok(config) => Ok(config),
        Err(e) => {
            if Path::new(CONFIG_FILE_DEFAULT).exists() {
                eprintln!("Error loading config: {:#}", e);
            }
            Ok(Config::default())
        }
    }
}

fn client(config: &Config) -> RpcClient {
    RpcClient::from_channel_file(&config.channel_file())
}

fn serve(config: Config) -> Result<()> {
    let _log_guard = utils::init_logging(config.verbose, config.log_file.as_deref())?;
    tracing::info!("Media Provider Manager starting...");
    if !utils::is_root() {
        tracing::warn!("Not running as root; package queries and the run directory may be unavailable.");
    }

    let controller = ServiceController::new(config)
        .open_store()?
        .load_rules()?
        .start_channel()?;

    tracing::info!(">> Service operational.");
    controller.wait();
    Ok(())
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli)?;
    config.merge_with_cli(cli.data_dir.clone(), cli.run_dir.clone(), cli.verbose);

    match &cli.command {
        None | Some(Commands::Serve) => serve(config),
        Some(Commands::GenConfig { output }) => Config::default().save_to_file(output),
        Some(Commands::ShowConfig) => {
            println!("{}", serde_json::to_string(&config)?);
            Ok(())
        }
        Some(Commands::Usage { table, packages }) => {
            let counts = client(&config)
                .package_usage_times(table, packages.clone())
                .context("Failed to query usage counts")?;
            println!("{}", serde_json::to_string(&counts)?);
            Ok(())
        }
        Some(Commands::Clear) => {
            client(&config)
                .clear_all_tables()
                .context("Failed to clear usage records")?;
            println!("Usage records cleared.");
            Ok(())
        }
        Some(Commands::Version) => {
            let version = client(&config)
                .module_version()
                .context("Failed to reach the manager service")?;
            println!("{}", version);
            Ok(())
        }
    }
}

fn main() {
    if let Err(e) = run() {
        log::error!("Fatal Error: {:#}", e);
        eprintln!("Fatal Error: {:#}", e);
        std::process::exit(1);
    }
}
