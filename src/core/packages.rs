// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    collections::HashSet,
    fs,
    path::PathBuf,
    process::{Command, Stdio},
};

use serde::{Deserialize, Serialize};

use crate::{defs, error::ServiceError};

const PER_USER_RANGE: u32 = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    pub package_name: String,
    pub uid: u32,
    pub enabled: bool,
    pub debuggable: bool,
}

/// Platform package manager as seen by the manager service.
pub trait PackageSource: Send + Sync {
    fn installed_packages(&self, user_id: i32) -> Result<Vec<PackageDescriptor>, ServiceError>;

    fn package_info(
        &self,
        name: &str,
        _flags: i32,
        user_id: i32,
    ) -> Result<Option<PackageDescriptor>, ServiceError> {
        Ok(self
            .installed_packages(user_id)?
            .into_iter()
            .find(|p| p.package_name == name))
    }
}

/// Reads `packages.list` and asks `pm` for the disabled set.
pub struct SystemPackages {
    packages_list: PathBuf,
    pm_command: Vec<String>,
}

impl Default for SystemPackages {
    fn default() -> Self {
        Self::new(defs::PACKAGES_LIST_FILE)
    }
}

impl SystemPackages {
    pub fn new(packages_list: impl Into<PathBuf>) -> Self {
        Self {
            packages_list: packages_list.into(),
            pm_command: vec!["pm".to_string()],
        }
    }

    /// Program and leading arguments used in place of `pm`.
    pub fn with_pm_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pm_command = command.into_iter().map(Into::into).collect();
        self
    }

    /// `None` when `pm` cannot be run; callers then treat everything as enabled.
    fn disabled_packages(&self, user_id: i32) -> Option<HashSet<String>> {
        let (program, leading) = self.pm_command.split_first()?;
        let output = Command::new(program)
            .args(leading)
            .args(["list", "packages", "-d", "--user"])
            .arg(user_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        match output {
            Ok(output) if output.status.success() => {
                Some(parse_pm_list(&String::from_utf8_lossy(&output.stdout)))
            }
            Ok(output) => {
                log::warn!(
                    "pm list packages failed ({}): {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                None
            }
            Err(e) => {
                log::warn!("pm unavailable, assuming every package is enabled: {}", e);
                None
            }
        }
    }
}

impl PackageSource for SystemPackages {
    fn installed_packages(&self, user_id: i32) -> Result<Vec<PackageDescriptor>, ServiceError> {
        let content = fs::read_to_string(&self.packages_list).map_err(|e| {
            ServiceError::PackageManager(format!(
                "failed to read {}: {}",
                self.packages_list.display(),
                e
            ))
        })?;
        let disabled = self.disabled_packages(user_id).unwrap_or_default();

        Ok(parse_packages_list(&content, user_id)
            .into_iter()
            .map(|mut p| {
                p.enabled = !disabled.contains(&p.package_name);
                p
            })
            .collect())
    }
}

/// `<name> <uid> <debuggable> <data dir> <seinfo> <gids>...`, one per line.
fn parse_packages_list(content: &str, user_id: i32) -> Vec<PackageDescriptor> {
    let user_base = u32::try_from(user_id)
        .unwrap_or_default()
        .saturating_mul(PER_USER_RANGE);
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?;
            let app_id = fields.next()?.parse::<u32>().ok()? % PER_USER_RANGE;
            let debuggable = fields.next() == Some("1");
            Some(PackageDescriptor {
                package_name: name.to_string(),
                uid: user_base.saturating_add(app_id),
                enabled: true,
                debuggable,
            })
        })
        .collect()
}

fn parse_pm_list(output: &str) -> HashSet<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = "\
com.android.shell 2000 0 /data/user_de/0/com.android.shell platform:privapp 3003
com.example.camera 10123 1 /data/user/0/com.example.camera default:targetSdkVersion=34 3003
broken-line
com.example.old 10200 0 /data/user/0/com.example.old default 3003
";

    #[test]
    fn parses_uids_per_user() {
        let packages = parse_packages_list(LIST, 10);
        assert_eq!(packages.len(), 3);
        assert_eq!(packages[1].package_name, "com.example.camera");
        assert_eq!(packages[1].uid, 1_010_123);
        assert!(packages[1].debuggable);
        assert!(!packages[0].debuggable);
    }

    #[test]
    fn missing_pm_treats_all_as_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("packages.list");
        fs::write(&list, LIST).unwrap();

        let source =
            SystemPackages::new(&list).with_pm_command([dir.path().join("no-such-pm").display().to_string()]);
        let packages = source.installed_packages(0).unwrap();
        assert_eq!(packages.len(), 3);
        assert!(packages.iter().all(|p| p.enabled));
    }

    #[test]
    fn pm_disabled_set_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("packages.list");
        fs::write(&list, LIST).unwrap();
        let pm = dir.path().join("pm");
        fs::write(&pm, "echo package:com.example.old\n").unwrap();

        let source = SystemPackages::new(&list).with_pm_command(["sh".to_string(), pm.display().to_string()]);
        let old = source.package_info("com.example.old", 0, 0).unwrap().unwrap();
        assert!(!old.enabled);
        let camera = source.package_info("com.example.camera", 0, 0).unwrap().unwrap();
        assert!(camera.enabled);
        assert_eq!(source.package_info("com.absent", 0, 0).unwrap(), None);
    }

    #[test]
    fn unreadable_list_is_a_package_manager_error() {
        let source = SystemPackages::new("/nonexistent/packages.list").with_pm_command(["/nonexistent/pm"]);
        assert!(matches!(
            source.installed_packages(0),
            Err(ServiceError::PackageManager(_))
        ));
    }
}
