// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

pub mod commands;
pub mod config;
pub mod debounce;
pub mod discovery;
pub mod editor;
pub mod logging;
pub mod protocol;
pub mod reconciler;
pub mod registry;
pub mod retry;
pub mod session;
pub mod types;
