// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

pub const MODULE_ID: &str = "media-provider-manager";
pub const MODULE_VERSION_CODE: i32 = 140;

pub const BASE_DIR: &str = "/data/adb/media-provider-manager";
pub const CONFIG_FILE_DEFAULT: &str = "/data/adb/media-provider-manager/config.toml";
pub const DAEMON_LOG_FILE: &str = "/data/adb/media-provider-manager/daemon.log";
pub const RUN_DIR: &str = "/dev/media-provider-manager/run";

pub const DATABASE_FILE_NAME: &str = "media_provider.db";
pub const CONFIG_BLOB_DIR_NAME: &str = "config";
pub const SOCKET_FILE_NAME: &str = "manager.sock";
pub const CHANNEL_FILE_NAME: &str = "channel.json";

pub const PACKAGES_LIST_FILE: &str = "/data/system/packages.list";

pub const EXTERNAL_STORAGE_ROOT: &str = "/storage/emulated/0";
pub const EXTERNAL_STORAGE_ALIASES: &[&str] = &["/sdcard", "/storage/self/primary", "/mnt/sdcard"];

pub const MEDIA_AUTHORITY: &str = "media";

// MediaStore column names
pub const COLUMN_RELATIVE_PATH: &str = "relative_path";
pub const COLUMN_DISPLAY_NAME: &str = "_display_name";
pub const COLUMN_DATA: &str = "_data";
pub const COLUMN_MIME_TYPE: &str = "mime_type";

/// Package of the settings UI allowed to receive the channel descriptor.
pub const MANAGER_PACKAGE_NAME: &str = "io.github.mediaprovider.manager";
/// SHA-256 of the UI signing certificate, fixed at build time. Unset means
/// the channel descriptor is never handed out through the provider.
pub const MANAGER_CERT_DIGEST: Option<&str> = option_env!("MPM_MANAGER_CERT_SHA256");

/// Cursor extras key carrying the serialized channel descriptor.
pub const CHANNEL_EXTRA_KEY: &str = "io.github.mediaprovider.manager.extra.CHANNEL";
/// Column of the placeholder cursor produced when the provider returned none.
pub const CHANNEL_PLACEHOLDER_COLUMN: &str = "binder";

pub const MAX_CONFIG_BLOB_BYTES: usize = 1024 * 1024;
pub const MAX_RPC_FRAME_BYTES: usize = 2 * 1024 * 1024;
pub const MAX_USAGE_QUERY_PACKAGES: usize = 4096;
pub const MAX_USER_ID: i32 = 9999;

pub const DEFAULT_WRITER_QUEUE_CAPACITY: usize = 4096;
pub const DEFAULT_WRITER_BATCH_SIZE: usize = 64;
