// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Before/after interception of media provider calls.
//!
//! The host hooking mechanism is reached only through [`MethodHook`]; the
//! platform glue calls `before_call` ahead of the provider method and
//! `after_call` on its result, which is what [`HookAdapter`] models.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    core::{
        classifier::{Category, ClassifiedCall, Classifier, ContentValues, PathSource, Selection},
        paths::{self, StorageLayout},
        records::{OperationKind, RecordStore, UsageRecord},
        rules::{Disposition, RuleEngine},
    },
    defs,
    error::{ClassifyError, HookError},
    ipc::protocol::ChannelDescriptor,
};

/// Identity of the process issuing a provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub package: String,
    pub uid: u32,
    pub signing_digest: Option<String>,
}

impl CallerIdentity {
    pub fn new(package: impl Into<String>, uid: u32) -> Self {
        Self {
            package: package.into(),
            uid,
            signing_digest: None,
        }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.signing_digest = Some(digest.into());
        self
    }
}

/// Arguments of an intercepted call. `before_call` may rewrite them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub operation: OperationKind,
    pub uri: String,
    pub caller: CallerIdentity,
    pub values: ContentValues,
    pub selection: Option<Selection>,
    pub projection: Vec<String>,
}

impl CallContext {
    pub fn insert(uri: impl Into<String>, caller: CallerIdentity, values: ContentValues) -> Self {
        Self {
            operation: OperationKind::Insert,
            uri: uri.into(),
            caller,
            values,
            selection: None,
            projection: Vec::new(),
        }
    }

    pub fn query(
        uri: impl Into<String>,
        caller: CallerIdentity,
        projection: Vec<String>,
        selection: Option<Selection>,
    ) -> Self {
        Self {
            operation: OperationKind::Query,
            uri: uri.into(),
            caller,
            values: ContentValues::new(),
            selection,
            projection,
        }
    }

    pub fn delete(uri: impl Into<String>, caller: CallerIdentity, selection: Option<Selection>) -> Self {
        Self {
            operation: OperationKind::Delete,
            uri: uri.into(),
            caller,
            values: ContentValues::new(),
            selection,
            projection: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    Reject(HookError),
}

/// Result rows of a query plus the out-of-band extras bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    pub extras: BTreeMap<String, String>,
}

impl Cursor {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self {
            columns,
            rows,
            extras: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderResult {
    Cursor(Option<Cursor>),
    Inserted(Option<String>),
    Deleted(u64),
}

pub trait MethodHook: Send + Sync {
    fn before_call(&self, ctx: &mut CallContext) -> Decision;

    fn after_call(&self, ctx: &CallContext, result: ProviderResult) -> ProviderResult;
}

/// Drives a hook around the original provider method.
pub struct HookAdapter<H: ?Sized> {
    hook: Arc<H>,
}

impl<H: MethodHook + ?Sized> HookAdapter<H> {
    pub fn new(hook: Arc<H>) -> Self {
        Self { hook }
    }

    /// Runs `original` only when the hook lets the call proceed.
    pub fn invoke<F>(&self, mut ctx: CallContext, original: F) -> Result<ProviderResult, HookError>
    where
        F: FnOnce(&CallContext) -> ProviderResult,
    {
        match self.hook.before_call(&mut ctx) {
            Decision::Reject(err) => Err(err),
            Decision::Proceed => {
                let result = original(&ctx);
                Ok(self.hook.after_call(&ctx, result))
            }
        }
    }
}

static MISSING_DIGEST_WARNED: AtomicBool = AtomicBool::new(false);

/// Build-time identity of the settings UI. Without a certificate digest
/// nothing matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerIdentity {
    package: String,
    cert_digest: Option<String>,
}

impl Default for ManagerIdentity {
    fn default() -> Self {
        Self::new(defs::MANAGER_PACKAGE_NAME, defs::MANAGER_CERT_DIGEST)
    }
}

impl ManagerIdentity {
    pub fn new(package: &str, cert_digest: Option<&str>) -> Self {
        Self {
            package: package.to_string(),
            cert_digest: cert_digest.map(|d| d.replace(':', "").to_ascii_lowercase()),
        }
    }

    pub fn matches(&self, caller: &CallerIdentity) -> bool {
        if caller.package != self.package {
            return false;
        }
        match &self.cert_digest {
            None => {
                if !MISSING_DIGEST_WARNED.swap(true, Ordering::Relaxed) {
                    log::warn!(
                        "no manager certificate digest configured, channel descriptor withheld from {}",
                        self.package
                    );
                }
                false
            }
            Some(expected) => caller
                .signing_digest
                .as_deref()
                .is_some_and(|d| d.replace(':', "").eq_ignore_ascii_case(expected)),
        }
    }
}

pub struct Dispatcher {
    classifier: Classifier,
    rules: Arc<RuleEngine>,
    records: RecordStore,
    manager: ManagerIdentity,
    channel: RwLock<Option<String>>,
}

impl Dispatcher {
    pub fn new(classifier: Classifier, rules: Arc<RuleEngine>, records: RecordStore) -> Self {
        Self {
            classifier,
            rules,
            records,
            manager: ManagerIdentity::default(),
            channel: RwLock::new(None),
        }
    }

    pub fn with_manager(mut self, manager: ManagerIdentity) -> Self {
        self.manager = manager;
        self
    }

    /// Sets the descriptor handed to the manager on its next query.
    pub fn publish_channel(&self, descriptor: &ChannelDescriptor) {
        match serde_json::to_string(descriptor) {
            Ok(encoded) => *self.channel.write() = Some(encoded),
            Err(e) => log::error!("failed to encode channel descriptor: {}", e),
        }
    }

    fn classify(&self, ctx: &CallContext) -> Result<ClassifiedCall, ClassifyError> {
        let package = &ctx.caller.package;
        match (ctx.operation, &ctx.selection) {
            (OperationKind::Insert, _) => {
                self.classifier
                    .classify(ctx.operation, &ctx.uri, package, &ctx.values)
            }
            (_, Some(selection)) => {
                self.classifier
                    .classify(ctx.operation, &ctx.uri, package, &selection.columns())
            }
            (_, None) => match self.classifier.category(&ctx.uri) {
                Category::MediaScanner => Err(ClassifyError::ScannerCall),
                _ => Err(ClassifyError::UnresolvedPath),
            },
        }
    }

    fn redirect(&self, ctx: &mut CallContext, call: &ClassifiedCall, target: &str) {
        let layout = self.classifier.layout();
        let rewritten = match ctx.operation {
            OperationKind::Insert => rewrite_values(layout, &mut ctx.values, &call.source, target),
            _ => match ctx.selection.as_mut() {
                Some(selection) => rewrite_selection(layout, selection, &call.source, target),
                None => false,
            },
        };
        if rewritten {
            log::info!(
                "redirected {} of {} by {} to {}",
                call.operation,
                call.raw_path,
                call.calling_package,
                target
            );
        } else {
            log::warn!(
                "cannot redirect {} of {} by {} to {}, allowing unchanged",
                call.operation,
                call.raw_path,
                call.calling_package,
                target
            );
        }
    }
}

/// Points the path-bearing columns of an insert at `target`, keeping the
/// file name.
fn rewrite_values(
    layout: &StorageLayout,
    values: &mut ContentValues,
    source: &PathSource,
    target: &str,
) -> bool {
    match source {
        PathSource::RelativePath { display_name, .. } => {
            let Some(data) = paths::join(target, display_name) else {
                return false;
            };
            match layout.relative_to_root(target).filter(|rel| !rel.is_empty()) {
                Some(rel) => {
                    values.put(defs::COLUMN_RELATIVE_PATH, format!("{}/", rel));
                    // the provider prefers _data over relative_path
                    if values.contains_key(defs::COLUMN_DATA) {
                        values.put(defs::COLUMN_DATA, data);
                    }
                }
                None => {
                    values.remove(defs::COLUMN_RELATIVE_PATH);
                    values.put(defs::COLUMN_DATA, data);
                }
            }
            true
        }
        PathSource::Data { data } => {
            match paths::file_name(data).and_then(|name| paths::join(target, name)) {
                Some(redirected) => {
                    values.put(defs::COLUMN_DATA, redirected);
                    true
                }
                None => false,
            }
        }
    }
}

/// Rewrites the bound selection args of a query or delete.
fn rewrite_selection(
    layout: &StorageLayout,
    selection: &mut Selection,
    source: &PathSource,
    target: &str,
) -> bool {
    let columns = selection.columns();
    let (index, value) = match source {
        PathSource::RelativePath { .. } => {
            let Some(rel) = layout.relative_to_root(target).filter(|rel| !rel.is_empty()) else {
                return false;
            };
            (columns.arg_index(defs::COLUMN_RELATIVE_PATH), format!("{}/", rel))
        }
        PathSource::Data { data } => {
            let Some(redirected) = paths::file_name(data).and_then(|name| paths::join(target, name))
            else {
                return false;
            };
            (columns.arg_index(defs::COLUMN_DATA), redirected)
        }
    };
    match index.and_then(|i| selection.args.get_mut(i)) {
        Some(arg) => {
            *arg = value;
            true
        }
        None => false,
    }
}

impl MethodHook for Dispatcher {
    fn before_call(&self, ctx: &mut CallContext) -> Decision {
        let call = match self.classify(ctx) {
            Ok(call) => call,
            Err(ClassifyError::ScannerCall) => return Decision::Proceed,
            Err(ClassifyError::UnresolvedPath) => {
                log::debug!(
                    "unresolved {} on {} by {}",
                    ctx.operation,
                    ctx.uri,
                    ctx.caller.package
                );
                self.records.append(UsageRecord::new(
                    ctx.operation,
                    ctx.caller.package.clone(),
                    None,
                    ctx.values.get(defs::COLUMN_MIME_TYPE).map(str::to_string),
                ));
                return Decision::Proceed;
            }
        };

        let disposition = self.rules.evaluate(&call.calling_package, &call.raw_path);
        self.records.append(UsageRecord::new(
            call.operation,
            call.calling_package.clone(),
            Some(call.raw_path.clone()),
            call.mime_type.clone(),
        ));

        match disposition {
            Disposition::Allow => Decision::Proceed,
            Disposition::Deny => {
                log::info!(
                    "denied {} of {} by {}",
                    call.operation,
                    call.raw_path,
                    call.calling_package
                );
                Decision::Reject(HookError::PermissionDenied {
                    package: call.calling_package,
                    operation: call.operation,
                    path: call.raw_path,
                })
            }
            Disposition::Redirect { target } => {
                self.redirect(ctx, &call, &target);
                Decision::Proceed
            }
        }
    }

    fn after_call(&self, ctx: &CallContext, result: ProviderResult) -> ProviderResult {
        if ctx.operation != OperationKind::Query || !self.manager.matches(&ctx.caller) {
            return result;
        }
        let Some(channel) = self.channel.read().clone() else {
            return result;
        };
        match result {
            ProviderResult::Cursor(Some(mut cursor)) => {
                cursor.extras.insert(defs::CHANNEL_EXTRA_KEY.to_string(), channel);
                ProviderResult::Cursor(Some(cursor))
            }
            ProviderResult::Cursor(None) => {
                let mut cursor = Cursor::new(vec![defs::CHANNEL_PLACEHOLDER_COLUMN.to_string()], Vec::new());
                cursor.extras.insert(defs::CHANNEL_EXTRA_KEY.to_string(), channel);
                ProviderResult::Cursor(Some(cursor))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, thread};

    use super::*;
    use crate::core::{
        classifier::default_uri_table,
        records::{RecordWriter, SqliteBackend},
        rules::{DispositionKind, RuleEntry, RuleSet, SettingsDocument},
    };

    const IMAGES: &str = "content://media/external_primary/images/media";

    struct Fixture {
        dispatcher: Arc<Dispatcher>,
        adapter: HookAdapter<Dispatcher>,
        records: RecordStore,
        _writer: RecordWriter,
    }

    fn fixture(rules: Vec<(&str, &str, DispositionKind, Option<&str>)>) -> Fixture {
        let layout = StorageLayout::new("/sdcard", Vec::<String>::new());
        let doc = SettingsDocument {
            rules: rules
                .into_iter()
                .map(|(package, pattern, disposition, target)| RuleEntry {
                    package: package.into(),
                    pattern: pattern.into(),
                    disposition,
                    redirect_target: target.map(str::to_string),
                })
                .collect(),
            ..Default::default()
        };
        let engine = Arc::new(RuleEngine::new(RuleSet::compile(&doc, &layout).unwrap()));
        let (records, writer) =
            RecordStore::spawn(SqliteBackend::open_in_memory().unwrap(), 64, 8).unwrap();
        let dispatcher = Arc::new(
            Dispatcher::new(Classifier::new(layout, &default_uri_table()), engine, records.clone())
                .with_manager(ManagerIdentity::new("io.manager", Some("AB:CD"))),
        );
        Fixture {
            adapter: HookAdapter::new(dispatcher.clone()),
            dispatcher,
            records,
            _writer: writer,
        }
    }

    fn count(records: &RecordStore, kind: OperationKind, package: &str) -> u64 {
        records.flush().unwrap();
        records.usage_counts(kind, vec![package.to_string()]).unwrap()[package]
    }

    fn picture(relative_path: &str, name: &str) -> ContentValues {
        [
            (defs::COLUMN_RELATIVE_PATH, relative_path),
            (defs::COLUMN_DISPLAY_NAME, name),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn redirect_rewrites_relative_path_under_root() {
        let f = fixture(vec![(
            "com.a",
            "/sdcard/Pictures",
            DispositionKind::Redirect,
            Some("/sdcard/Hidden"),
        )]);
        let ctx = CallContext::insert(IMAGES, CallerIdentity::new("com.a", 10100), picture("Pictures", "x.jpg"));

        let mut seen = None;
        let result = f.adapter.invoke(ctx, |ctx| {
            seen = Some(ctx.values.clone());
            ProviderResult::Inserted(Some(format!("{}/1", IMAGES)))
        });
        assert!(matches!(result, Ok(ProviderResult::Inserted(Some(_)))));

        let values = seen.unwrap();
        assert_eq!(values.get(defs::COLUMN_RELATIVE_PATH), Some("Hidden/"));
        assert_eq!(values.get(defs::COLUMN_DISPLAY_NAME), Some("x.jpg"));
        let reclassified = f
            .dispatcher
            .classifier
            .classify(OperationKind::Insert, IMAGES, "com.a", &values)
            .unwrap();
        assert_eq!(reclassified.raw_path, "/sdcard/Hidden/x.jpg");
        assert_eq!(count(&f.records, OperationKind::Insert, "com.a"), 1);
    }

    #[test]
    fn redirect_outside_root_moves_to_data_column() {
        let f = fixture(vec![(
            "com.a",
            "/sdcard/DCIM",
            DispositionKind::Redirect,
            Some("/data/media/quarantine"),
        )]);
        let mut ctx = CallContext::insert(IMAGES, CallerIdentity::new("com.a", 10100), picture("DCIM/", "y.png"));
        assert_eq!(f.dispatcher.before_call(&mut ctx), Decision::Proceed);
        assert!(!ctx.values.contains_key(defs::COLUMN_RELATIVE_PATH));
        assert_eq!(ctx.values.get(defs::COLUMN_DATA), Some("/data/media/quarantine/y.png"));
    }

    #[test]
    fn redirect_keeps_file_name_of_data_column() {
        let f = fixture(vec![(
            "com.a",
            "/sdcard/Download",
            DispositionKind::Redirect,
            Some("/sdcard/Inbox"),
        )]);
        let values = [(defs::COLUMN_DATA, "/sdcard/Download/report.pdf")].into_iter().collect();
        let mut ctx = CallContext::insert("content://media/external/file", CallerIdentity::new("com.a", 1), values);
        assert_eq!(f.dispatcher.before_call(&mut ctx), Decision::Proceed);
        assert_eq!(ctx.values.get(defs::COLUMN_DATA), Some("/sdcard/Inbox/report.pdf"));
    }

    #[test]
    fn redirect_under_root_also_moves_data_column() {
        let f = fixture(vec![(
            "com.a",
            "/sdcard/Pictures",
            DispositionKind::Redirect,
            Some("/sdcard/Hidden"),
        )]);
        let values = [
            (defs::COLUMN_RELATIVE_PATH, "Pictures"),
            (defs::COLUMN_DISPLAY_NAME, "x.jpg"),
            (defs::COLUMN_DATA, "/sdcard/Pictures/x.jpg"),
        ]
        .into_iter()
        .collect();
        let mut ctx = CallContext::insert(IMAGES, CallerIdentity::new("com.a", 10100), values);
        assert_eq!(f.dispatcher.before_call(&mut ctx), Decision::Proceed);
        assert_eq!(ctx.values.get(defs::COLUMN_RELATIVE_PATH), Some("Hidden/"));
        assert_eq!(ctx.values.get(defs::COLUMN_DATA), Some("/sdcard/Hidden/x.jpg"));
        assert_eq!(ctx.values.get(defs::COLUMN_DISPLAY_NAME), Some("x.jpg"));
    }

    #[test]
    fn deny_rejects_without_calling_provider() {
        let f = fixture(vec![("com.a", "/sdcard/DCIM", DispositionKind::Deny, None)]);
        let ctx = CallContext::insert(IMAGES, CallerIdentity::new("com.a", 10100), picture("DCIM/Camera", "z.jpg"));

        let mut called = false;
        let result = f.adapter.invoke(ctx, |_| {
            called = true;
            ProviderResult::Inserted(None)
        });
        assert!(!called);
        assert_eq!(
            result,
            Err(HookError::PermissionDenied {
                package: "com.a".into(),
                operation: OperationKind::Insert,
                path: "/sdcard/DCIM/Camera/z.jpg".into(),
            })
        );
        assert_eq!(count(&f.records, OperationKind::Insert, "com.a"), 1);
    }

    #[test]
    fn unresolved_calls_are_allowed_and_recorded_without_path() {
        let f = fixture(vec![("com.a", "/sdcard", DispositionKind::Deny, None)]);
        let values = [(defs::COLUMN_DISPLAY_NAME, "x.jpg")].into_iter().collect();
        let mut ctx = CallContext::insert(IMAGES, CallerIdentity::new("com.a", 1), values);
        assert_eq!(f.dispatcher.before_call(&mut ctx), Decision::Proceed);

        let mut query = CallContext::query(IMAGES, CallerIdentity::new("com.a", 1), Vec::new(), None);
        assert_eq!(f.dispatcher.before_call(&mut query), Decision::Proceed);

        assert_eq!(count(&f.records, OperationKind::Insert, "com.a"), 1);
        assert_eq!(count(&f.records, OperationKind::Query, "com.a"), 1);
    }

    #[test]
    fn scanner_calls_are_not_recorded() {
        let f = fixture(vec![("com.a", "/sdcard", DispositionKind::Deny, None)]);
        let values = [(defs::COLUMN_DATA, "/sdcard/a.jpg")].into_iter().collect();
        let mut ctx = CallContext::insert("content://media/none/media_scanner", CallerIdentity::new("com.a", 1), values);
        assert_eq!(f.dispatcher.before_call(&mut ctx), Decision::Proceed);
        assert_eq!(count(&f.records, OperationKind::Insert, "com.a"), 0);
    }

    #[test]
    fn selection_args_are_redirected() {
        let f = fixture(vec![
            ("com.a", "/sdcard/DCIM", DispositionKind::Redirect, Some("/sdcard/Hidden")),
            ("com.b", "/sdcard/DCIM", DispositionKind::Redirect, Some("/outside")),
        ]);
        let selection = Selection::new(
            "relative_path = ? AND _display_name = ?",
            vec!["DCIM/".into(), "a.jpg".into()],
        );

        let mut ctx = CallContext::delete(IMAGES, CallerIdentity::new("com.a", 1), Some(selection.clone()));
        assert_eq!(f.dispatcher.before_call(&mut ctx), Decision::Proceed);
        assert_eq!(ctx.selection.unwrap().args, vec!["Hidden/".to_string(), "a.jpg".to_string()]);

        let mut ctx = CallContext::delete(IMAGES, CallerIdentity::new("com.b", 1), Some(selection.clone()));
        assert_eq!(f.dispatcher.before_call(&mut ctx), Decision::Proceed);
        assert_eq!(ctx.selection, Some(selection));

        assert_eq!(count(&f.records, OperationKind::Delete, "com.a"), 1);
    }

    #[test]
    fn manager_query_receives_channel_descriptor() {
        let f = fixture(Vec::new());
        let descriptor = ChannelDescriptor {
            socket_path: PathBuf::from("/dev/mpm/manager.sock"),
            token: "t0k3n".into(),
        };
        f.dispatcher.publish_channel(&descriptor);
        let manager = CallerIdentity::new("io.manager", 10200).with_digest("abcd");

        let ctx = CallContext::query(IMAGES, manager.clone(), Vec::new(), None);
        let result = f.adapter.invoke(ctx, |_| ProviderResult::Cursor(None)).unwrap();
        let ProviderResult::Cursor(Some(cursor)) = result else {
            panic!("expected placeholder cursor");
        };
        assert_eq!(cursor.columns, vec![defs::CHANNEL_PLACEHOLDER_COLUMN.to_string()]);
        assert!(cursor.rows.is_empty());
        let decoded: ChannelDescriptor =
            serde_json::from_str(&cursor.extras[defs::CHANNEL_EXTRA_KEY]).unwrap();
        assert_eq!(decoded, descriptor);

        let rows = Cursor::new(vec!["_id".into()], vec![vec![Some("7".into())]]);
        let ctx = CallContext::query(IMAGES, manager, Vec::new(), None);
        let result = f.adapter.invoke(ctx, |_| ProviderResult::Cursor(Some(rows.clone()))).unwrap();
        let ProviderResult::Cursor(Some(cursor)) = result else {
            panic!("expected cursor");
        };
        assert_eq!(cursor.rows, rows.rows);
        assert_eq!(cursor.columns, rows.columns);
        assert!(cursor.extras.contains_key(defs::CHANNEL_EXTRA_KEY));
    }

    #[test]
    fn other_callers_never_see_the_descriptor() {
        let f = fixture(Vec::new());
        f.dispatcher.publish_channel(&ChannelDescriptor {
            socket_path: PathBuf::from("/s"),
            token: "t".into(),
        });
        let callers = [
            CallerIdentity::new("com.other", 1),
            CallerIdentity::new("io.manager", 1),
            CallerIdentity::new("io.manager", 1).with_digest("ffff"),
        ];
        for caller in callers {
            let ctx = CallContext::query(IMAGES, caller, Vec::new(), None);
            let result = f.adapter.invoke(ctx, |_| ProviderResult::Cursor(None)).unwrap();
            assert_eq!(result, ProviderResult::Cursor(None));
        }
    }

    #[test]
    fn manager_without_digest_never_matches() {
        let identity = ManagerIdentity::new("io.manager", None);
        assert!(!identity.matches(&CallerIdentity::new("io.manager", 10999)));
        assert!(!identity.matches(&CallerIdentity::new("io.manager", 10999).with_digest("abcd")));

        let pinned = ManagerIdentity::new("io.manager", Some("AB:CD"));
        assert!(pinned.matches(&CallerIdentity::new("io.manager", 10999).with_digest("ab:cd")));
        assert!(!pinned.matches(&CallerIdentity::new("io.manager", 10999)));
    }

    #[test]
    fn concurrent_dispatch_records_every_call() {
        let f = fixture(vec![("com.a", "/sdcard/Secret", DispositionKind::Deny, None)]);
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let dispatcher = f.dispatcher.clone();
                thread::spawn(move || {
                    let adapter = HookAdapter::new(dispatcher);
                    let mut denied = 0;
                    for n in 0..10 {
                        let dir = if n % 2 == 0 { "Secret" } else { "Public" };
                        let ctx = CallContext::insert(
                            IMAGES,
                            CallerIdentity::new("com.a", 1),
                            picture(dir, &format!("{i}-{n}.jpg")),
                        );
                        if adapter.invoke(ctx, |_| ProviderResult::Inserted(None)).is_err() {
                            denied += 1;
                        }
                    }
                    denied
                })
            })
            .collect();
        let denied: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(denied, 20);
        assert_eq!(count(&f.records, OperationKind::Insert, "com.a"), 40);
    }
}
