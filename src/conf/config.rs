// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    core::{
        classifier::{UriTableEntry, default_uri_table},
        paths::StorageLayout,
    },
    defs, utils,
};

pub use crate::defs::CONFIG_FILE_DEFAULT;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub verbose: bool,
    pub data_dir: PathBuf,
    pub run_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    pub storage_root: String,
    pub storage_aliases: Vec<String>,
    pub packages_list: PathBuf,
    pub writer_queue_capacity: usize,
    pub writer_batch_size: usize,
    pub uri_table: Vec<UriTableEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbose: false,
            data_dir: PathBuf::from(defs::BASE_DIR),
            run_dir: PathBuf::from(defs::RUN_DIR),
            log_file: Some(PathBuf::from(defs::DAEMON_LOG_FILE)),
            storage_root: defs::EXTERNAL_STORAGE_ROOT.to_string(),
            storage_aliases: defs::EXTERNAL_STORAGE_ALIASES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            packages_list: PathBuf::from(defs::PACKAGES_LIST_FILE),
            writer_queue_capacity: defs::DEFAULT_WRITER_QUEUE_CAPACITY,
            writer_batch_size: defs::DEFAULT_WRITER_BATCH_SIZE,
            uri_table: default_uri_table(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn load_default() -> Result<Self> {
        Self::from_file(CONFIG_FILE_DEFAULT)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            utils::ensure_dir_exists(dir)?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        utils::atomic_write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    pub fn merge_with_cli(
        &mut self,
        data_dir: Option<PathBuf>,
        run_dir: Option<PathBuf>,
        verbose: bool,
    ) {
        if let Some(dir) = data_dir {
            self.data_dir = dir;
        }
        if let Some(dir) = run_dir {
            self.run_dir = dir;
        }
        if verbose {
            self.verbose = true;
        }
    }

    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(&self.storage_root, self.storage_aliases.iter().cloned())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(defs::DATABASE_FILE_NAME)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.run_dir.join(defs::SOCKET_FILE_NAME)
    }

    pub fn channel_file(&self) -> PathBuf {
        self.run_dir.join(defs::CHANNEL_FILE_NAME)
    }
}
