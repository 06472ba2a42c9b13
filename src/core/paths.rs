// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Lexical path handling for the emulated external storage volume.
//!
//! Nothing here touches the filesystem: interception runs inline on the
//! caller's binder thread and must not block on I/O.

use crate::defs;

/// Case-insensitive, separator-aware prefix test.
///
/// `parent` is a prefix of `child` when they are equal or `child` continues
/// with `/` right after `parent`.
pub fn starts_with(parent: &str, child: &str) -> bool {
    let parent = parent.trim_end_matches('/').to_ascii_lowercase();
    let child = child.to_ascii_lowercase();
    if parent.is_empty() {
        return child.starts_with('/');
    }
    child == parent
        || (child.starts_with(&parent)
            && child.get(parent.len()..).is_some_and(|rest| rest.starts_with('/')))
}

/// Resolves `.`/`..` and repeated separators of an absolute path.
///
/// Returns `None` for relative or empty input. `..` never climbs above `/`.
pub fn normalize(path: &str) -> Option<String> {
    if !path.starts_with('/') {
        return None;
    }
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    Some(format!("/{}", parts.join("/")))
}

/// Joins `relative` below `base` and normalizes the result.
pub fn join(base: &str, relative: &str) -> Option<String> {
    normalize(&format!("{}/{}", base, relative))
}

pub fn file_name(path: &str) -> Option<&str> {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
}

/// Root and alias mount points of the primary external volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: String,
    aliases: Vec<String>,
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new(
            defs::EXTERNAL_STORAGE_ROOT,
            defs::EXTERNAL_STORAGE_ALIASES.iter().map(|s| s.to_string()),
        )
    }
}

impl StorageLayout {
    pub fn new<I, S>(root: &str, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let root = normalize(root).unwrap_or_else(|| defs::EXTERNAL_STORAGE_ROOT.to_string());
        let aliases = aliases
            .into_iter()
            .filter_map(|a| normalize(&a.into()))
            .filter(|a| a != "/" && *a != root)
            .collect();
        Self { root, aliases }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Normalizes `path` and rewrites a leading alias to the storage root.
    pub fn canonicalize(&self, path: &str) -> Option<String> {
        let normalized = normalize(path)?;
        for alias in &self.aliases {
            if starts_with(alias, &normalized)
                && let Some(rest) = normalized.get(alias.len()..)
            {
                return normalize(&format!("{}{}", self.root, rest));
            }
        }
        Some(normalized)
    }

    /// Path of `canonical` relative to the root, if it lies below it.
    pub fn relative_to_root<'a>(&self, canonical: &'a str) -> Option<&'a str> {
        if !starts_with(&self.root, canonical) {
            return None;
        }
        canonical
            .get(self.root.len()..)
            .map(|rest| rest.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_respects_separator_boundary() {
        assert!(starts_with("/sdcard/A", "/sdcard/A"));
        assert!(starts_with("/sdcard/A", "/sdcard/A/B/file.jpg"));
        assert!(starts_with("/sdcard/A/", "/sdcard/a/b"));
        assert!(!starts_with("/sdcard/A", "/sdcard/AB/file.jpg"));
        assert!(starts_with("/", "/anything"));
    }

    #[test]
    fn normalize_collapses_dots_and_separators() {
        assert_eq!(normalize("/a//b/./c/").as_deref(), Some("/a/b/c"));
        assert_eq!(normalize("/a/b/../c").as_deref(), Some("/a/c"));
        assert_eq!(normalize("/../../etc").as_deref(), Some("/etc"));
        assert_eq!(normalize("relative/path"), None);
    }

    #[test]
    fn aliases_map_onto_root() {
        let layout = StorageLayout::default();
        assert_eq!(
            layout.canonicalize("/sdcard/DCIM/a.jpg").as_deref(),
            Some("/storage/emulated/0/DCIM/a.jpg")
        );
        assert_eq!(
            layout.canonicalize("/storage/emulated/0/Download").as_deref(),
            Some("/storage/emulated/0/Download")
        );
        assert_eq!(
            layout.canonicalize("/sdcardx/a").as_deref(),
            Some("/sdcardx/a")
        );
    }

    #[test]
    fn relative_to_root_strips_prefix() {
        let layout = StorageLayout::new("/sdcard", Vec::<String>::new());
        assert_eq!(layout.relative_to_root("/sdcard/Hidden"), Some("Hidden"));
        assert_eq!(layout.relative_to_root("/sdcard"), Some(""));
        assert_eq!(layout.relative_to_root("/data/media"), None);
        assert_eq!(file_name("/sdcard/Hidden/x.jpg"), Some("x.jpg"));
    }
}
