// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Data structures and helper methods around influencing the configuration of the application.
use crate::retry::RetryPolicy;
use crate::session::{SessionConfig, DEFAULT_HOST};
use crate::types::Role;
use anyhow::{Context, Result};
use ini::Ini;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::time::Duration;
use tracing::debug;

pub const CONFIG_DIR: &str = ".tandem";
pub const CONFIG_FILE: &str = "config";

/// Settings from the command line or the config file. Unset fields fall back to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use]
pub struct AppConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub role: Option<Role>,
    pub debounce_ms: Option<u64>,
    pub command_timeout_ms: Option<u64>,
    pub connect_attempts: Option<u32>,
    pub ready_timeout_ms: Option<u64>,
    /// Address of the peer a secondary should link to.
    pub peer: Option<String>,
}

#[must_use]
pub fn config_file(base_dir: &Path) -> PathBuf {
    base_dir.join(CONFIG_DIR).join(CONFIG_FILE)
}

impl AppConfig {
    /// Returns `Ok(None)` if there is no config file.
    pub fn from_config_file(config_file: &Path) -> Result<Option<Self>> {
        if !config_file.exists() {
            return Ok(None);
        }
        let conf = Ini::load_from_file(config_file).with_context(|| {
            format!("Could not read config file '{}'", config_file.display())
        })?;
        let general_section = conf.general_section();
        let get = |key: &str| general_section.get(key);

        debug!("Loaded configuration from '{}'", config_file.display());
        Ok(Some(Self {
            host: get("host").map(ToString::to_string),
            port: parse_parameter(get("port"), "port")?,
            role: parse_parameter(get("role"), "role")?,
            debounce_ms: parse_parameter(get("debounce_ms"), "debounce_ms")?,
            command_timeout_ms: parse_parameter(get("command_timeout_ms"), "command_timeout_ms")?,
            connect_attempts: parse_parameter(get("connect_attempts"), "connect_attempts")?,
            ready_timeout_ms: parse_parameter(get("ready_timeout_ms"), "ready_timeout_ms")?,
            peer: get("peer").map(ToString::to_string),
        }))
    }

    pub fn from_directory(base_dir: &Path) -> Result<Option<Self>> {
        Self::from_config_file(&config_file(base_dir))
    }

    /// Layers `self` over `other`: every field set in `self` wins.
    pub fn merge(self, other: Option<Self>) -> Self {
        match other {
            None => self,
            Some(other) => Self {
                host: self.host.or(other.host),
                port: self.port.or(other.port),
                role: self.role.or(other.role),
                debounce_ms: self.debounce_ms.or(other.debounce_ms),
                command_timeout_ms: self.command_timeout_ms.or(other.command_timeout_ms),
                connect_attempts: self.connect_attempts.or(other.connect_attempts),
                ready_timeout_ms: self.ready_timeout_ms.or(other.ready_timeout_ms),
                peer: self.peer.or(other.peer),
            },
        }
    }

    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            host: self.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(defaults.port),
            role: self.role.unwrap_or(defaults.role),
            debounce: self
                .debounce_ms
                .map_or(defaults.debounce, Duration::from_millis),
            command_timeout: self
                .command_timeout_ms
                .map_or(defaults.command_timeout, Duration::from_millis),
            readiness: RetryPolicy {
                deadline: self
                    .ready_timeout_ms
                    .map(Duration::from_millis)
                    .or(defaults.readiness.deadline),
                ..defaults.readiness
            },
        }
    }

    /// The policy for connecting to a peer.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.connect_attempts.unwrap_or(defaults.max_attempts),
            ..defaults
        }
    }
}

fn parse_parameter<T>(value: Option<&str>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|value| {
            value.trim().parse::<T>().map_err(|err| {
                anyhow::anyhow!("Failed to parse config parameter `{name}` ('{value}'): {err}")
            })
        })
        .transpose()
}
