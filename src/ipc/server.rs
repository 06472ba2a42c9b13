// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    io::BufReader,
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::{
    core::service::ManagerService,
    error::{ErrorKind, ServiceError},
    ipc::protocol::{
        ChannelDescriptor, Frame, Outcome, Request, RequestFrame, ResponseFrame, WireError, read_frame,
        salvage_id, write_frame,
    },
    utils::{self, WarnErr},
};

const SOCKET_MODE: u32 = 0o660;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
    token: Arc<str>,
    service: Arc<ManagerService>,
    handshake_timeout: Duration,
}

/// Running accept loop.
pub struct ServerHandle {
    socket_path: PathBuf,
    shutdown: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl ServerHandle {
    /// Stops accepting; connections already open run to completion.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // wake the blocking accept
        let _ = UnixStream::connect(&self.socket_path);
        if self.thread.join().is_err() {
            log::error!("rpc accept thread panicked");
        }
        std::fs::remove_file(&self.socket_path).warn_on_err();
    }

    pub fn join(self) {
        if self.thread.join().is_err() {
            log::error!("rpc accept thread panicked");
        }
    }
}

impl RpcServer {
    pub fn bind(socket_path: &Path, token: &str, service: Arc<ManagerService>) -> Result<Self> {
        if let Some(dir) = socket_path.parent() {
            utils::ensure_dir_exists(dir)?;
        }
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .with_context(|| format!("Failed to remove stale socket {}", socket_path.display()))?;
        }
        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("Failed to bind {}", socket_path.display()))?;
        utils::set_mode(socket_path, SOCKET_MODE)?;
        log::info!("manager channel listening at {}", socket_path.display());

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
            token: Arc::from(token),
            service,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        })
    }

    /// How long a new connection may take to send its `hello`.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn descriptor(&self) -> ChannelDescriptor {
        ChannelDescriptor {
            socket_path: self.socket_path.clone(),
            token: self.token.to_string(),
        }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let socket_path = self.socket_path.clone();
        let flag = shutdown.clone();
        let thread = thread::Builder::new()
            .name("mpm-rpc".into())
            .spawn(move || self.accept_loop(&flag))
            .context("Failed to spawn rpc accept thread")?;
        Ok(ServerHandle {
            socket_path,
            shutdown,
            thread,
        })
    }

    fn accept_loop(self, shutdown: &AtomicBool) {
        for stream in self.listener.incoming() {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("rpc accept error: {}", e);
                    continue;
                }
            };
            let service = self.service.clone();
            let token = self.token.clone();
            let timeout = self.handshake_timeout;
            let spawned = thread::Builder::new()
                .name("mpm-rpc-conn".into())
                .spawn(move || {
                    if let Err(e) = serve_connection(&stream, &token, &service, timeout) {
                        log::debug!("rpc connection ended: {}", e);
                    }
                });
            if let Err(e) = spawned {
                log::error!("failed to spawn rpc connection thread: {}", e);
            }
        }
        log::info!("manager channel closed");
    }
}

fn serve_connection(
    stream: &UnixStream,
    token: &str,
    service: &ManagerService,
    handshake_timeout: Duration,
) -> std::io::Result<()> {
    stream.set_read_timeout(Some(handshake_timeout))?;
    let mut reader = BufReader::new(stream);
    let mut writer = stream;
    let mut authenticated = false;

    loop {
        let line = match read_frame(&mut reader)? {
            Frame::Eof => return Ok(()),
            Frame::TooLarge => {
                log::warn!("rpc frame over limit, closing connection");
                return write_frame(
                    &mut writer,
                    &ResponseFrame::error(0, ErrorKind::MalformedRequest, "frame too large"),
                );
            }
            Frame::Line(line) => line,
        };
        if line.trim().is_empty() {
            continue;
        }

        let frame: RequestFrame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                write_frame(
                    &mut writer,
                    &ResponseFrame::error(salvage_id(&line), ErrorKind::MalformedRequest, e.to_string()),
                )?;
                continue;
            }
        };

        if !authenticated {
            match &frame.request {
                Request::Hello { token: offered } if offered == token => {
                    authenticated = true;
                    stream.set_read_timeout(None)?;
                }
                _ => {
                    log::warn!("rejecting unauthenticated rpc connection");
                    return write_frame(
                        &mut writer,
                        &ResponseFrame::error(frame.id, ErrorKind::Unauthorized, "bad or missing hello"),
                    );
                }
            }
        }

        let response = ResponseFrame {
            id: frame.id,
            result: handle_request(service, frame.request),
        };
        write_frame(&mut writer, &response)?;
    }
}

fn encode<T: Serialize>(result: Result<T, ServiceError>) -> Outcome {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(value) => Outcome::Ok(value),
            Err(e) => Outcome::Err(WireError::new(ErrorKind::MalformedRequest, e.to_string())),
        },
        Err(e) => {
            log::debug!("rpc call failed: {}", e);
            Outcome::Err(WireError::from(&e))
        }
    }
}

fn handle_request(service: &ManagerService, request: Request) -> Outcome {
    match request {
        Request::Hello { .. } => Outcome::Ok(Value::Null),
        Request::GetModuleVersion => encode(Ok(service.module_version())),
        Request::GetInstalledPackages { user_id } => encode(service.installed_packages(user_id)),
        Request::GetPackageInfo {
            package_name,
            flags,
            user_id,
        } => encode(service.package_info(&package_name, flags, user_id)),
        Request::ReadConfig { who } => encode(service.read_config(who)),
        Request::WriteConfig { who, blob } => encode(service.write_config(who, &blob)),
        Request::ClearAllTables => encode(service.clear_all_tables()),
        Request::PackageUsageTimes {
            table,
            package_names,
        } => encode(service.usage_counts(&table, package_names)),
    }
}
