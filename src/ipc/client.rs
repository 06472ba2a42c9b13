// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    collections::HashMap,
    io::BufReader,
    os::unix::net::UnixStream,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    core::packages::PackageDescriptor,
    error::RpcError,
    ipc::protocol::{ChannelDescriptor, Frame, Outcome, Request, RequestFrame, ResponseFrame, read_frame, write_frame},
};

const IO_TIMEOUT: Duration = Duration::from_secs(30);

type Bootstrap = Box<dyn FnMut() -> Result<ChannelDescriptor, RpcError> + Send>;

struct Connection {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

/// Manager channel client; reconnects through `bootstrap` when the
/// connection drops.
pub struct RpcClient {
    bootstrap: Bootstrap,
    conn: Option<Connection>,
    next_id: u64,
}

impl RpcClient {
    pub fn new<F>(bootstrap: F) -> Self
    where
        F: FnMut() -> Result<ChannelDescriptor, RpcError> + Send + 'static,
    {
        Self {
            bootstrap: Box::new(bootstrap),
            conn: None,
            next_id: 1,
        }
    }

    /// Bootstraps from the descriptor file the service writes at startup.
    pub fn from_channel_file(path: &Path) -> Self {
        let path: PathBuf = path.to_path_buf();
        Self::new(move || {
            ChannelDescriptor::load(&path).map_err(|e| RpcError::Bootstrap(format!("{:#}", e)))
        })
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    fn connect(&mut self) -> Result<Connection, RpcError> {
        let descriptor = (self.bootstrap)()?;
        let writer = UnixStream::connect(&descriptor.socket_path)?;
        writer.set_read_timeout(Some(IO_TIMEOUT))?;
        writer.set_write_timeout(Some(IO_TIMEOUT))?;
        let mut conn = Connection {
            reader: BufReader::new(writer.try_clone()?),
            writer,
        };
        let id = self.take_id();
        roundtrip(
            &mut conn,
            RequestFrame {
                id,
                request: Request::Hello {
                    token: descriptor.token,
                },
            },
        )?;
        log::debug!("connected to {}", descriptor.socket_path.display());
        Ok(conn)
    }

    fn try_call(&mut self, request: &Request) -> Result<Value, RpcError> {
        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => self.connect()?,
        };
        let frame = RequestFrame {
            id: self.take_id(),
            request: request.clone(),
        };
        let result = roundtrip(&mut conn, frame);
        if !matches!(result, Err(RpcError::Io(_)) | Err(RpcError::Protocol(_))) {
            self.conn = Some(conn);
        }
        result
    }

    /// Sends `request`, retrying once on a fresh connection if the transport fails.
    pub fn call(&mut self, request: Request) -> Result<Value, RpcError> {
        match self.try_call(&request) {
            Err(RpcError::Io(e)) => {
                log::warn!("manager channel dropped ({}), reconnecting", e);
                self.try_call(&request)
            }
            other => other,
        }
    }

    fn call_as<T: DeserializeOwned>(&mut self, request: Request) -> Result<T, RpcError> {
        let value = self.call(request)?;
        serde_json::from_value(value).map_err(|e| RpcError::Protocol(e.to_string()))
    }

    pub fn module_version(&mut self) -> Result<i32, RpcError> {
        self.call_as(Request::GetModuleVersion)
    }

    pub fn installed_packages(&mut self, user_id: i32) -> Result<Vec<PackageDescriptor>, RpcError> {
        self.call_as(Request::GetInstalledPackages { user_id })
    }

    pub fn package_info(
        &mut self,
        package_name: &str,
        flags: i32,
        user_id: i32,
    ) -> Result<Option<PackageDescriptor>, RpcError> {
        self.call_as(Request::GetPackageInfo {
            package_name: package_name.to_string(),
            flags,
            user_id,
        })
    }

    pub fn read_config(&mut self, who: i32) -> Result<Option<String>, RpcError> {
        self.call_as(Request::ReadConfig { who })
    }

    pub fn write_config(&mut self, who: i32, blob: &str) -> Result<(), RpcError> {
        self.call(Request::WriteConfig {
            who,
            blob: blob.to_string(),
        })
        .map(|_| ())
    }

    pub fn clear_all_tables(&mut self) -> Result<(), RpcError> {
        self.call(Request::ClearAllTables).map(|_| ())
    }

    pub fn package_usage_times(
        &mut self,
        table: &str,
        package_names: Vec<String>,
    ) -> Result<HashMap<String, u64>, RpcError> {
        self.call_as(Request::PackageUsageTimes {
            table: table.to_string(),
            package_names,
        })
    }
}

fn roundtrip(conn: &mut Connection, frame: RequestFrame) -> Result<Value, RpcError> {
    write_frame(&mut conn.writer, &frame)?;
    let line = match read_frame(&mut conn.reader)? {
        Frame::Line(line) => line,
        Frame::Eof => {
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "manager channel closed",
            )));
        }
        Frame::TooLarge => return Err(RpcError::Protocol("response frame too large".into())),
    };
    let response: ResponseFrame =
        serde_json::from_str(&line).map_err(|e| RpcError::Protocol(e.to_string()))?;
    if response.id != frame.id {
        return Err(RpcError::Protocol(format!(
            "response id {} does not match request id {}",
            response.id, frame.id
        )));
    }
    match response.result {
        Outcome::Ok(value) => Ok(value),
        Outcome::Err(e) => Err(RpcError::Remote {
            kind: e.kind,
            message: e.message,
        }),
    }
}
