// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Local-socket channel between the settings UI and the manager service.

pub mod client;
pub mod protocol;
pub mod server;
