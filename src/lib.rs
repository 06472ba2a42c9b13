// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod conf;
pub mod core;
pub mod defs;
pub mod error;
pub mod ipc;
pub mod utils;
