// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-package redirection rules.
//!
//! A [`RuleSet`] is immutable once compiled. [`RuleEngine`] holds the current
//! one behind an `Arc`; readers clone the `Arc` and evaluate without holding
//! any lock, writers swap in a freshly compiled set.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    core::paths::{self, StorageLayout},
    error::ServiceError,
    utils,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Allow,
    Redirect { target: String },
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispositionKind {
    Allow,
    Redirect,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub package: String,
    pub pattern: String,
    pub disposition: DispositionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRule {
    pub pattern: String,
    pub disposition: DispositionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_target: Option<String>,
}

/// Named group of rules applied to several packages at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub label: String,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub rules: Vec<TemplateRule>,
}

/// Document stored under the settings consumer.
///
/// Keys other than `rules` and `templates` belong to the UI and are kept
/// as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsDocument {
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
    #[serde(default)]
    pub templates: Vec<Template>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SettingsDocument {
    pub fn parse(blob: &str) -> Result<Self, ServiceError> {
        if blob.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(blob).map_err(|e| ServiceError::MalformedConfig(e.to_string()))
    }

    /// Explicit rules first, then template rules in document order.
    fn expanded(&self) -> impl Iterator<Item = RuleEntry> + '_ {
        let from_templates = self.templates.iter().flat_map(|t| {
            t.packages.iter().flat_map(move |package| {
                t.rules.iter().map(move |r| RuleEntry {
                    package: package.clone(),
                    pattern: r.pattern.clone(),
                    disposition: r.disposition,
                    redirect_target: r.redirect_target.clone(),
                })
            })
        });
        self.rules.iter().cloned().chain(from_templates)
    }
}

enum Matcher {
    Prefix(String),
    Glob(Regex),
}

struct CompiledRule {
    pattern_len: usize,
    matcher: Matcher,
    disposition: Disposition,
}

impl CompiledRule {
    fn matches(&self, path: &str) -> bool {
        match &self.matcher {
            Matcher::Prefix(prefix) => paths::starts_with(prefix, path),
            Matcher::Glob(re) => re.is_match(path),
        }
    }
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// `*` stays inside one segment, `**` crosses segments, `?` is one char.
/// The glob also matches anything below a matching directory.
fn glob_to_regex(glob: &str) -> Result<Regex, regex_lite::Error> {
    let mut body = String::with_capacity(glob.len() * 2);
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                body.push_str(".*");
            }
            '*' => body.push_str("[^/]*"),
            '?' => body.push_str("[^/]"),
            other => body.push_str(&regex_lite::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    Regex::new(&format!("(?i)^{}(?:/.*)?$", body))
}

fn compile_entry(entry: &RuleEntry, layout: &StorageLayout) -> Result<CompiledRule, ServiceError> {
    let malformed = |msg: String| ServiceError::MalformedConfig(msg);

    utils::validate_package_name(&entry.package).map_err(|e| malformed(e.to_string()))?;

    let pattern = layout
        .canonicalize(entry.pattern.trim())
        .ok_or_else(|| malformed(format!("pattern must be an absolute path: {:?}", entry.pattern)))?;

    let disposition = match (entry.disposition, &entry.redirect_target) {
        (DispositionKind::Allow, None) => Disposition::Allow,
        (DispositionKind::Deny, None) => Disposition::Deny,
        (DispositionKind::Redirect, Some(target)) => {
            if is_glob(target) {
                return Err(malformed(format!("redirect target must be a plain path: {:?}", target)));
            }
            let target = layout
                .canonicalize(target.trim())
                .ok_or_else(|| malformed(format!("redirect target must be absolute: {:?}", target)))?;
            Disposition::Redirect { target }
        }
        (DispositionKind::Redirect, None) => {
            return Err(malformed(format!("redirect rule for {} has no target", entry.package)));
        }
        (kind, Some(_)) => {
            return Err(malformed(format!("{:?} rule must not carry a redirect target", kind)));
        }
    };

    let matcher = if is_glob(&pattern) {
        Matcher::Glob(
            glob_to_regex(&pattern).map_err(|e| malformed(format!("bad glob {:?}: {}", pattern, e)))?,
        )
    } else {
        Matcher::Prefix(pattern.clone())
    };

    Ok(CompiledRule {
        pattern_len: pattern.chars().count(),
        matcher,
        disposition,
    })
}

/// Immutable, compiled rule snapshot.
#[derive(Default)]
pub struct RuleSet {
    by_package: HashMap<String, Vec<CompiledRule>>,
    len: usize,
}

impl RuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compiles every rule of `doc`; one invalid rule rejects the document.
    pub fn compile(doc: &SettingsDocument, layout: &StorageLayout) -> Result<Self, ServiceError> {
        let mut set = Self::default();
        for entry in doc.expanded() {
            let rule = compile_entry(&entry, layout)?;
            set.by_package.entry(entry.package).or_default().push(rule);
            set.len += 1;
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Longest matching pattern wins; among equal lengths the earliest rule.
    pub fn evaluate(&self, package: &str, canonical_path: &str) -> Disposition {
        let Some(rules) = self.by_package.get(package) else {
            return Disposition::Allow;
        };
        let mut best: Option<&CompiledRule> = None;
        for rule in rules {
            if rule.matches(canonical_path) && best.is_none_or(|b| rule.pattern_len > b.pattern_len) {
                best = Some(rule);
            }
        }
        best.map(|r| r.disposition.clone())
            .unwrap_or(Disposition::Allow)
    }
}

pub struct RuleEngine {
    current: RwLock<Arc<RuleSet>>,
}

impl RuleEngine {
    pub fn new(initial: RuleSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.current.read().clone()
    }

    pub fn install(&self, rules: RuleSet) {
        let rules = Arc::new(rules);
        log::info!("installing rule set with {} rules", rules.len());
        *self.current.write() = rules;
    }

    pub fn evaluate(&self, package: &str, canonical_path: &str) -> Disposition {
        self.snapshot().evaluate(package, canonical_path)
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(RuleSet::empty())
    }
}
