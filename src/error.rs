// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::records::OperationKind;

/// Errors raised while resolving a provider call to a storage path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("no path-bearing column in call")]
    UnresolvedPath,
    #[error("media scanner call")]
    ScannerCall,
}

/// Errors surfaced to the intercepted caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HookError {
    #[error("{package} is not allowed to {operation} {path}")]
    PermissionDenied {
        package: String,
        operation: OperationKind,
        path: String,
    },
}

/// Record storage failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record store db error: {0}")]
    Db(String),
    #[error("record writer is not running")]
    WriterGone,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Db(e.to_string())
    }
}

/// Errors returned by the manager service to UI-originated calls.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("unknown config consumer: {0}")]
    UnknownConsumer(i32),
    #[error("unknown record table: {0:?}")]
    UnknownTable(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("malformed config: {0}")]
    MalformedConfig(String),
    #[error("config blob too large: {actual_bytes} bytes (max {max_bytes})")]
    ConfigTooLarge { max_bytes: usize, actual_bytes: usize },
    #[error("package manager failure: {0}")]
    PackageManager(String),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        ServiceError::StorageUnavailable(e.to_string())
    }
}

/// Stable wire identifier of an error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    StorageUnavailable,
    UnknownConsumer,
    UnknownTable,
    InvalidArgument,
    MalformedConfig,
    ConfigTooLarge,
    PackageManager,
    MalformedRequest,
    Unauthorized,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            ServiceError::UnknownConsumer(_) => ErrorKind::UnknownConsumer,
            ServiceError::UnknownTable(_) => ErrorKind::UnknownTable,
            ServiceError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ServiceError::MalformedConfig(_) => ErrorKind::MalformedConfig,
            ServiceError::ConfigTooLarge { .. } => ErrorKind::ConfigTooLarge,
            ServiceError::PackageManager(_) => ErrorKind::PackageManager,
        }
    }
}

/// Client-side failures of a manager channel call.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("channel i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),
    #[error("{kind:?}: {message}")]
    Remote { kind: ErrorKind, message: String },
}

impl RpcError {
    pub fn remote_kind(&self) -> Option<ErrorKind> {
        match self {
            RpcError::Remote { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
