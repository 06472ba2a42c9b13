// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Facade serving the settings UI.
//!
//! Every method validates its input before touching the package manager,
//! the config directory or the record store.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{
    core::{
        packages::{PackageDescriptor, PackageSource},
        paths::StorageLayout,
        records::{OperationKind, RecordStore},
        rules::{RuleEngine, RuleSet, SettingsDocument},
    },
    defs,
    error::ServiceError,
    utils,
};

/// Owner of a persisted config blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumer {
    Settings,
    Preferences,
}

impl Consumer {
    pub fn from_id(who: i32) -> Result<Self, ServiceError> {
        match who {
            0 => Ok(Consumer::Settings),
            1 => Ok(Consumer::Preferences),
            other => Err(ServiceError::UnknownConsumer(other)),
        }
    }

    fn file_name(self) -> &'static str {
        match self {
            Consumer::Settings => "settings.json",
            Consumer::Preferences => "preferences.json",
        }
    }
}

pub struct ManagerService {
    layout: StorageLayout,
    config_dir: PathBuf,
    rules: Arc<RuleEngine>,
    records: RecordStore,
    packages: Box<dyn PackageSource>,
    write_lock: Mutex<()>,
}

impl ManagerService {
    pub fn new(
        layout: StorageLayout,
        data_dir: &Path,
        rules: Arc<RuleEngine>,
        records: RecordStore,
        packages: Box<dyn PackageSource>,
    ) -> Self {
        Self {
            layout,
            config_dir: data_dir.join(defs::CONFIG_BLOB_DIR_NAME),
            rules,
            records,
            packages,
            write_lock: Mutex::new(()),
        }
    }

    /// Installs the persisted settings into the rule engine.
    ///
    /// A missing settings blob installs an empty rule set.
    pub fn load_settings(&self) -> Result<usize, ServiceError> {
        let doc = match self.read_config(0)? {
            Some(blob) => SettingsDocument::parse(&blob)?,
            None => SettingsDocument::default(),
        };
        let rules = RuleSet::compile(&doc, &self.layout)?;
        let count = rules.len();
        self.rules.install(rules);
        Ok(count)
    }

    pub fn module_version(&self) -> i32 {
        defs::MODULE_VERSION_CODE
    }

    /// Installed packages of `user_id` that are enabled.
    pub fn installed_packages(&self, user_id: i32) -> Result<Vec<PackageDescriptor>, ServiceError> {
        validate_user_id(user_id)?;
        Ok(self
            .packages
            .installed_packages(user_id)?
            .into_iter()
            .filter(|p| p.enabled)
            .collect())
    }

    /// Descriptor of an installed, enabled package.
    pub fn package_info(
        &self,
        name: &str,
        flags: i32,
        user_id: i32,
    ) -> Result<Option<PackageDescriptor>, ServiceError> {
        validate_user_id(user_id)?;
        validate_package(name)?;
        Ok(self
            .packages
            .package_info(name, flags, user_id)?
            .filter(|p| p.enabled))
    }

    pub fn read_config(&self, who: i32) -> Result<Option<String>, ServiceError> {
        let consumer = Consumer::from_id(who)?;
        match fs::read_to_string(self.blob_path(consumer)) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ServiceError::StorageUnavailable(format!(
                "failed to read {:?} config: {}",
                consumer, e
            ))),
        }
    }

    /// Persists `blob`; settings are validated and installed as rules.
    ///
    /// Invalid settings are rejected before anything is written.
    pub fn write_config(&self, who: i32, blob: &str) -> Result<(), ServiceError> {
        let consumer = Consumer::from_id(who)?;
        if blob.len() > defs::MAX_CONFIG_BLOB_BYTES {
            return Err(ServiceError::ConfigTooLarge {
                max_bytes: defs::MAX_CONFIG_BLOB_BYTES,
                actual_bytes: blob.len(),
            });
        }

        let compiled = match consumer {
            Consumer::Settings => Some(RuleSet::compile(
                &SettingsDocument::parse(blob)?,
                &self.layout,
            )?),
            Consumer::Preferences => None,
        };

        let _guard = self.write_lock.lock();
        utils::ensure_dir_exists(&self.config_dir)
            .and_then(|_| utils::atomic_write(self.blob_path(consumer), blob))
            .map_err(|e| ServiceError::StorageUnavailable(format!("{:#}", e)))?;

        if let Some(rules) = compiled {
            self.rules.install(rules);
        }
        log::info!("{:?} config updated ({} bytes)", consumer, blob.len());
        Ok(())
    }

    pub fn usage_counts(
        &self,
        table: &str,
        packages: Vec<String>,
    ) -> Result<HashMap<String, u64>, ServiceError> {
        let kind = OperationKind::from_table_id(table)
            .ok_or_else(|| ServiceError::UnknownTable(table.to_string()))?;
        if packages.len() > defs::MAX_USAGE_QUERY_PACKAGES {
            return Err(ServiceError::InvalidArgument(format!(
                "at most {} packages per query, got {}",
                defs::MAX_USAGE_QUERY_PACKAGES,
                packages.len()
            )));
        }
        for name in &packages {
            validate_package(name)?;
        }
        Ok(self.records.usage_counts(kind, packages)?)
    }

    pub fn clear_all_tables(&self) -> Result<(), ServiceError> {
        self.records.clear_all()?;
        log::info!("all usage records cleared");
        Ok(())
    }

    fn blob_path(&self, consumer: Consumer) -> PathBuf {
        self.config_dir.join(consumer.file_name())
    }
}

fn validate_user_id(user_id: i32) -> Result<(), ServiceError> {
    if (0..=defs::MAX_USER_ID).contains(&user_id) {
        Ok(())
    } else {
        Err(ServiceError::InvalidArgument(format!(
            "user id out of range: {}",
            user_id
        )))
    }
}

fn validate_package(name: &str) -> Result<(), ServiceError> {
    utils::validate_package_name(name).map_err(|e| ServiceError::InvalidArgument(e.to_string()))
}
