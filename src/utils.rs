// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs::{self, OpenOptions, create_dir_all},
    io::Write,
    os::unix::fs::OpenOptionsExt,
    path::Path,
    sync::{
        OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result, bail};
use regex_lite::Regex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

static PACKAGE_NAME_REGEX: OnceLock<Regex> = OnceLock::new();
static LOGGING_READY: AtomicBool = AtomicBool::new(false);

const MAX_PACKAGE_NAME_LEN: usize = 255;

/// Installs the global subscriber. Later calls are no-ops.
///
/// The returned guard flushes the file writer on drop and must outlive the
/// service.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    if LOGGING_READY.swap(true, Ordering::SeqCst) {
        return Ok(None);
    }

    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            ensure_dir_exists(dir)?;
            let name = path
                .file_name()
                .with_context(|| format!("log file path has no file name: {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(file_layer);

    #[cfg(target_os = "android")]
    let registry = registry.with(tracing_android::layer("mpm").context("Failed to open logcat layer")?);

    tracing::subscriber::set_global_default(registry).context("Failed to install tracing subscriber")?;
    tracing_log::LogTracer::init().context("Failed to bridge log records into tracing")?;
    Ok(guard)
}

/// Atomically replaces `path` with `content` (owner read/write only).
pub fn atomic_write<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, content: C) -> Result<()> {
    let path = path.as_ref();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let temp_name = format!(
        ".mpm_tmp_{}_{}.tmp",
        std::process::id(),
        SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos()
    );
    let temp_file = dir.join(temp_name);

    // removes the temp file if anything below fails
    struct CleanupGuard<'a>(&'a Path);
    impl Drop for CleanupGuard<'_> {
        fn drop(&mut self) {
            let _ = fs::remove_file(self.0);
        }
    }
    let guard = CleanupGuard(&temp_file);

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&temp_file)
            .context("Failed to create temporary file for atomic write")?;
        file.write_all(content.as_ref())?;
        file.sync_all()?;
    }

    fs::rename(&temp_file, path).context("Failed to rename atomic temporary file")?;
    std::mem::forget(guard);
    Ok(())
}

pub fn ensure_dir_exists<T: AsRef<Path>>(dir: T) -> Result<()> {
    if !dir.as_ref().exists() {
        create_dir_all(&dir)?;
    }
    Ok(())
}

pub fn set_mode<P: AsRef<Path>>(path: P, mode: u32) -> Result<()> {
    rustix::fs::chmod(path.as_ref(), rustix::fs::Mode::from_raw_mode(mode))
        .with_context(|| format!("Failed to chmod {:o} {}", mode, path.as_ref().display()))
}

pub fn is_root() -> bool {
    rustix::process::geteuid().is_root()
}

pub fn validate_package_name(name: &str) -> Result<()> {
    let re = PACKAGE_NAME_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*(\.[a-zA-Z0-9_]+)*$").expect("Invalid Regex pattern")
    });
    if name.len() <= MAX_PACKAGE_NAME_LEN && re.is_match(name) {
        Ok(())
    } else {
        bail!("Invalid package name: '{name}'")
    }
}

/// Per-start token for the manager channel handshake, 128 bits from the
/// kernel CSPRNG.
pub fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 16];
    let mut filled = 0;
    while filled < bytes.len() {
        filled += rustix::rand::getrandom(&mut bytes[filled..], rustix::rand::GetRandomFlags::empty())
            .context("Failed to read random bytes for session token")?;
    }
    Ok(bytes.iter().map(|b| format!("{:02x}", b)).collect())
}

pub trait WarnErr {
    fn warn_on_err(self);
}

impl<T, E: std::fmt::Display> WarnErr for Result<T, E> {
    fn warn_on_err(self) {
        if let Err(e) = self {
            log::warn!("Suppressed error: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[test]
    fn package_names() {
        for ok in ["android", "com.example.app", "io.github.a_b.c9", "com.x.1"] {
            assert!(validate_package_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", "1com.a", "com..a", "com.a.", "com a", "../etc", "a".repeat(256).as_str()] {
            assert!(validate_package_name(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn atomic_write_replaces_content_privately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.json");
        atomic_write(&path, "first").unwrap();
        atomic_write(&path, "second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn tokens_differ() {
        let a = generate_session_token().unwrap();
        let b = generate_session_token().unwrap();
        assert_eq!(a.len(), 32);
        assert!(a.bytes().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
