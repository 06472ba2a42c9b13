// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fs_extra::dir::CopyOptions;
use zip::{CompressionMethod, ZipWriter, write::FileOptions};

const MODULE_ID: &str = "media-provider-manager";
const BINARY_NAME: &str = "mpm";

#[derive(Parser)]
#[command(name = "xtask")]
struct Xtask {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the binary and pack the flashable module zip
    Package {
        #[arg(long, default_value = "aarch64-linux-android")]
        target: String,
        #[arg(long)]
        debug: bool,
    },
}

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn build(root: &Path, target: &str, debug: bool) -> Result<PathBuf> {
    let mut cmd = Command::new(std::env::var("CARGO").unwrap_or_else(|_| "cargo".into()));
    cmd.current_dir(root)
        .args(["build", "--package", "media-provider-manager", "--bin", BINARY_NAME, "--target", target]);
    if !debug {
        cmd.arg("--release");
    }
    let status = cmd.status().context("Failed to run cargo build")?;
    if !status.success() {
        bail!("cargo build failed");
    }
    let profile = if debug { "debug" } else { "release" };
    Ok(root.join("target").join(target).join(profile).join(BINARY_NAME))
}

fn zip_dir(src: &Path, dest: &Path) -> Result<()> {
    let file = File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);

    let mut stack = vec![src.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries: Vec<_> = fs::read_dir(&dir)?.collect::<std::io::Result<_>>()?;
        entries.sort_by_key(|e| e.path());
        for entry in entries {
            let path = entry.path();
            let name = path
                .strip_prefix(src)?
                .to_string_lossy()
                .replace('\\', "/");
            if path.is_dir() {
                zip.add_directory(format!("{}/", name), options)?;
                stack.push(path);
            } else {
                zip.start_file(name, options)?;
                let mut buf = Vec::new();
                File::open(&path)?.read_to_end(&mut buf)?;
                zip.write_all(&buf)?;
            }
        }
    }
    zip.finish()?;
    Ok(())
}

fn package(target: &str, debug: bool) -> Result<()> {
    let root = project_root();
    let binary = build(&root, target, debug)?;

    let out_dir = root.join("output");
    let staging = out_dir.join(MODULE_ID);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let options = CopyOptions::new().content_only(true).overwrite(true);
    fs_extra::dir::copy(root.join("module"), &staging, &options)
        .context("Failed to stage module files")?;
    fs::copy(&binary, staging.join(BINARY_NAME))
        .with_context(|| format!("Failed to copy {}", binary.display()))?;

    let zip_path = out_dir.join(format!("{}.zip", MODULE_ID));
    zip_dir(&staging, &zip_path)?;
    println!("Module packed: {}", zip_path.display());
    Ok(())
}

fn main() -> Result<()> {
    match Xtask::parse().command {
        Commands::Package { target, debug } => package(&target, debug),
    }
}
