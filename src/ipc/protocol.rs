// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Newline-delimited JSON frames of the manager channel.

use std::{
    io::{self, BufRead, Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    defs,
    error::{ErrorKind, ServiceError},
    utils,
};

/// Where and how to reach the manager channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub socket_path: PathBuf,
    pub token: String,
}

impl ChannelDescriptor {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read channel file {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse channel file")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        utils::atomic_write(path, serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Must be the first frame of every connection.
    Hello { token: String },
    GetModuleVersion,
    GetInstalledPackages {
        user_id: i32,
    },
    GetPackageInfo {
        package_name: String,
        #[serde(default)]
        flags: i32,
        user_id: i32,
    },
    ReadConfig {
        who: i32,
    },
    WriteConfig {
        who: i32,
        blob: String,
    },
    ClearAllTables,
    PackageUsageTimes {
        table: String,
        package_names: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WireError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&ServiceError> for WireError {
    fn from(e: &ServiceError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok(Value),
    Err(WireError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    pub result: Outcome,
}

impl ResponseFrame {
    pub fn error(id: u64, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id,
            result: Outcome::Err(WireError::new(kind, message)),
        }
    }
}

pub enum Frame {
    Line(String),
    TooLarge,
    Eof,
}

/// Reads one frame without buffering more than the frame limit.
pub fn read_frame<R: BufRead>(reader: &mut R) -> io::Result<Frame> {
    let mut buf = Vec::new();
    let limit = defs::MAX_RPC_FRAME_BYTES as u64 + 1;
    let read = reader.by_ref().take(limit).read_until(b'\n', &mut buf)?;
    if read == 0 {
        return Ok(Frame::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.len() > defs::MAX_RPC_FRAME_BYTES {
        return Ok(Frame::TooLarge);
    }
    Ok(Frame::Line(String::from_utf8_lossy(&buf).into_owned()))
}

pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, frame: &T) -> io::Result<()> {
    let mut payload = serde_json::to_vec(frame).map_err(io::Error::from)?;
    payload.push(b'\n');
    writer.write_all(&payload)?;
    writer.flush()
}

/// Best-effort id of a frame that failed to parse, so the error can be paired.
pub fn salvage_id(line: &str) -> u64 {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|v| v.get("id")?.as_u64())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn wire_shapes() {
        let frame = RequestFrame {
            id: 7,
            request: Request::PackageUsageTimes {
                table: "query".into(),
                package_names: vec!["com.a".into()],
            },
        };
        let encoded = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            encoded,
            serde_json::json!({
                "id": 7,
                "request": {"type": "package_usage_times", "table": "query", "package_names": ["com.a"]}
            })
        );

        let err = ResponseFrame::error(7, ErrorKind::UnknownTable, "nope");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!({"id": 7, "result": {"err": {"kind": "unknown_table", "message": "nope"}}})
        );
        let ok: ResponseFrame = serde_json::from_str(r#"{"id":1,"result":{"ok":140}}"#).unwrap();
        assert_eq!(ok.result, Outcome::Ok(serde_json::json!(140)));
    }

    #[test]
    fn frames_are_split_on_newlines_and_bounded() {
        let mut input = Cursor::new(b"{\"a\":1}\n\n{\"b\":2}".to_vec());
        assert!(matches!(read_frame(&mut input).unwrap(), Frame::Line(l) if l == "{\"a\":1}"));
        assert!(matches!(read_frame(&mut input).unwrap(), Frame::Line(l) if l.is_empty()));
        assert!(matches!(read_frame(&mut input).unwrap(), Frame::Line(l) if l == "{\"b\":2}"));
        assert!(matches!(read_frame(&mut input).unwrap(), Frame::Eof));

        let mut huge = Cursor::new(vec![b'x'; defs::MAX_RPC_FRAME_BYTES + 10]);
        assert!(matches!(read_frame(&mut huge).unwrap(), Frame::TooLarge));

        let mut exact = vec![b'x'; defs::MAX_RPC_FRAME_BYTES];
        exact.push(b'\n');
        assert!(matches!(read_frame(&mut Cursor::new(exact)).unwrap(), Frame::Line(_)));
    }

    #[test]
    fn ids_are_salvaged_from_bad_frames() {
        assert_eq!(salvage_id(r#"{"id": 42, "request": {"type": "bogus"}}"#), 42);
        assert_eq!(salvage_id("garbage"), 0);
    }

    #[test]
    fn descriptor_file_round_trip_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channel.json");
        let descriptor = ChannelDescriptor {
            socket_path: dir.path().join("manager.sock"),
            token: "abc".into(),
        };
        descriptor.save(&path).unwrap();
        assert_eq!(ChannelDescriptor::load(&path).unwrap(), descriptor);
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
