// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{collections::BTreeMap, sync::OnceLock};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    core::{
        paths::{self, StorageLayout},
        records::OperationKind,
    },
    defs,
    error::ClassifyError,
};

static AND_REGEX: OnceLock<Regex> = OnceLock::new();
static EQ_TERM_REGEX: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Images,
    Video,
    Audio,
    Downloads,
    Files,
    Generic,
    MediaScanner,
}

/// One row of the URI match table.
///
/// `path` lists the segments after the volume name. `#` matches a numeric
/// id segment and `*` matches any single segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UriTableEntry {
    pub path: String,
    pub category: Category,
}

impl UriTableEntry {
    fn new(path: &str, category: Category) -> Self {
        Self {
            path: path.to_string(),
            category,
        }
    }
}

/// Mirrors the media provider's own URI matcher.
pub fn default_uri_table() -> Vec<UriTableEntry> {
    use Category::*;
    vec![
        UriTableEntry::new("images/media", Images),
        UriTableEntry::new("images/media/#", Images),
        UriTableEntry::new("images/thumbnails", Images),
        UriTableEntry::new("images/thumbnails/#", Images),
        UriTableEntry::new("video/media", Video),
        UriTableEntry::new("video/media/#", Video),
        UriTableEntry::new("video/thumbnails", Video),
        UriTableEntry::new("video/thumbnails/#", Video),
        UriTableEntry::new("audio/media", Audio),
        UriTableEntry::new("audio/media/#", Audio),
        UriTableEntry::new("audio/albums", Audio),
        UriTableEntry::new("audio/albums/#", Audio),
        UriTableEntry::new("audio/artists", Audio),
        UriTableEntry::new("audio/artists/#", Audio),
        UriTableEntry::new("audio/genres", Audio),
        UriTableEntry::new("audio/genres/#", Audio),
        UriTableEntry::new("audio/playlists", Audio),
        UriTableEntry::new("audio/playlists/#", Audio),
        UriTableEntry::new("audio/playlists/#/members", Audio),
        UriTableEntry::new("downloads", Downloads),
        UriTableEntry::new("downloads/#", Downloads),
        UriTableEntry::new("file", Files),
        UriTableEntry::new("file/#", Files),
        UriTableEntry::new("media_scanner", MediaScanner),
    ]
}

/// Column view of a provider call.
pub trait Columns {
    fn column(&self, name: &str) -> Option<&str>;
}

/// Column values supplied with an insert or update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentValues(BTreeMap<String, String>);

impl ContentValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ContentValues {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl Columns for ContentValues {
    fn column(&self, name: &str) -> Option<&str> {
        self.get(name)
    }
}

/// Selection clause and bound arguments of a query or delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub clause: String,
    pub args: Vec<String>,
}

impl Selection {
    pub fn new(clause: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            clause: clause.into(),
            args,
        }
    }

    /// Column equality constraints as `(column, arg index)` pairs.
    ///
    /// Only `col = ? [AND col = ?]...` is understood; anything else yields
    /// no constraints at all rather than a partial reading.
    pub fn equalities(&self) -> Vec<(String, usize)> {
        let and = AND_REGEX.get_or_init(|| Regex::new(r"(?i)\s+and\s+").expect("Invalid Regex pattern"));
        let term = EQ_TERM_REGEX.get_or_init(|| {
            Regex::new(r#"^"?([A-Za-z_][A-Za-z0-9_]*)"?\s*=\s*\?$"#).expect("Invalid Regex pattern")
        });

        let clause = self.clause.trim();
        if clause.is_empty() {
            return Vec::new();
        }

        let mut pairs = Vec::new();
        for (index, raw) in and.split(clause).enumerate() {
            let mut part = raw.trim();
            while let Some(inner) = part.strip_prefix('(').and_then(|p| p.strip_suffix(')')) {
                part = inner.trim();
            }
            let Some(caps) = term.captures(part) else {
                return Vec::new();
            };
            if index >= self.args.len() {
                return Vec::new();
            }
            pairs.push((caps[1].to_string(), index));
        }
        pairs
    }

    pub fn columns(&self) -> SelectionColumns<'_> {
        SelectionColumns {
            pairs: self.equalities(),
            args: &self.args,
        }
    }
}

pub struct SelectionColumns<'a> {
    pairs: Vec<(String, usize)>,
    args: &'a [String],
}

impl SelectionColumns<'_> {
    pub fn arg_index(&self, name: &str) -> Option<usize> {
        self.pairs
            .iter()
            .find(|(column, _)| column.eq_ignore_ascii_case(name))
            .map(|(_, index)| *index)
    }
}

impl Columns for SelectionColumns<'_> {
    fn column(&self, name: &str) -> Option<&str> {
        self.arg_index(name)
            .and_then(|i| self.args.get(i))
            .map(String::as_str)
    }
}

/// Which columns produced the canonical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSource {
    RelativePath {
        relative_path: String,
        display_name: String,
    },
    Data {
        data: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedCall {
    pub uri: String,
    pub operation: OperationKind,
    pub calling_package: String,
    pub category: Category,
    pub raw_path: String,
    pub source: PathSource,
    pub mime_type: Option<String>,
}

struct CompiledEntry {
    segments: Vec<String>,
    category: Category,
}

impl CompiledEntry {
    fn matches(&self, segments: &[&str]) -> bool {
        self.segments.len() == segments.len()
            && self.segments.iter().zip(segments).all(|(pat, seg)| match pat.as_str() {
                "#" => !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()),
                "*" => true,
                lit => lit == *seg,
            })
    }
}

pub struct Classifier {
    layout: StorageLayout,
    table: Vec<CompiledEntry>,
}

impl Classifier {
    pub fn new(layout: StorageLayout, table: &[UriTableEntry]) -> Self {
        let table = table
            .iter()
            .map(|e| CompiledEntry {
                segments: e
                    .path
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                category: e.category,
            })
            .filter(|e| !e.segments.is_empty())
            .collect();
        Self { layout, table }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Category of a `content://media/<volume>/<table...>` URI.
    pub fn category(&self, uri: &str) -> Category {
        let Some(rest) = uri.strip_prefix("content://") else {
            return Category::Generic;
        };
        let rest = rest.split(['?', '#']).next().unwrap_or_default();
        let mut parts = rest.split('/').filter(|s| !s.is_empty());
        if parts.next() != Some(defs::MEDIA_AUTHORITY) {
            return Category::Generic;
        }
        // volume name: external, external_primary, internal, none, ...
        if parts.next().is_none() {
            return Category::Generic;
        }
        let segments: Vec<&str> = parts.collect();
        self.table
            .iter()
            .find(|e| e.matches(&segments))
            .map(|e| e.category)
            .unwrap_or(Category::Generic)
    }

    pub fn classify(
        &self,
        operation: OperationKind,
        uri: &str,
        calling_package: &str,
        columns: &dyn Columns,
    ) -> Result<ClassifiedCall, ClassifyError> {
        let category = self.category(uri);
        if category == Category::MediaScanner {
            return Err(ClassifyError::ScannerCall);
        }

        let (raw_path, source) = match (
            columns.column(defs::COLUMN_RELATIVE_PATH),
            columns.column(defs::COLUMN_DISPLAY_NAME),
        ) {
            (Some(relative_path), Some(display_name)) => (
                paths::join(
                    self.layout.root(),
                    &format!("{}/{}", relative_path, display_name),
                ),
                PathSource::RelativePath {
                    relative_path: relative_path.to_string(),
                    display_name: display_name.to_string(),
                },
            ),
            _ => {
                let data = columns
                    .column(defs::COLUMN_DATA)
                    .ok_or(ClassifyError::UnresolvedPath)?;
                (
                    self.layout.canonicalize(data),
                    PathSource::Data {
                        data: data.to_string(),
                    },
                )
            }
        };

        Ok(ClassifiedCall {
            uri: uri.to_string(),
            operation,
            calling_package: calling_package.to_string(),
            category,
            raw_path: raw_path.ok_or(ClassifyError::UnresolvedPath)?,
            source,
            mime_type: columns.column(defs::COLUMN_MIME_TYPE).map(str::to_string),
        })
    }
}
