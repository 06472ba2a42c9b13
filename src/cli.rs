// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mpm::conf::config::CONFIG_FILE_DEFAULT;

#[derive(Parser, Debug)]
#[command(name = "mpm", version, about = "Media Provider Manager service")]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,
    #[arg(short = 'r', long = "run-dir")]
    pub run_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the manager service (default)
    Serve,
    GenConfig {
        #[arg(short = 'o', long = "output", default_value = CONFIG_FILE_DEFAULT)]
        output: PathBuf,
    },
    ShowConfig,
    /// Output per-package usage counts in JSON format
    Usage {
        #[arg(short = 't', long = "table", default_value = "insert")]
        table: String,
        packages: Vec<String>,
    },
    /// Remove every usage record
    Clear,
    /// Print the version code reported by the running service
    Version,
}
