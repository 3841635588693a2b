// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! How a secondary editor finds the session it should link to.
//!
//! A primary advertises its address in a small JSON "session book". A secondary takes an explicit
//! address if it has one, then the environment variable, and falls back to the book.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

pub const ADDRESS_ENV_VAR: &str = "TANDEM_ADDRESS";

const BOOK_FILE: &str = "sessions.json";
const PROBE_TIMEOUT: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub host: String,
    pub port: u16,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub cwd: PathBuf,
}

impl SessionRecord {
    #[must_use]
    pub fn new(addr: SocketAddr, cwd: &Path) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since| since.as_secs());
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
            timestamp,
            cwd: cwd.to_path_buf(),
        }
    }

    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn same_address(&self, host: &str, port: u16) -> bool {
        self.host == host && self.port == port
    }
}

/// Splits `host:port`, rejecting anything without a valid port.
pub fn parse_address(address: &str) -> Result<(String, u16)> {
    let Some((host, port)) = address.trim().rsplit_once(':') else {
        bail!("Address '{address}' is missing a port, expected host:port");
    };
    if host.is_empty() {
        bail!("Address '{address}' is missing a host, expected host:port");
    }
    let port = port
        .parse()
        .with_context(|| format!("Address '{address}' has an invalid port"))?;
    Ok((host.to_string(), port))
}

/// Reads the peer address from [`ADDRESS_ENV_VAR`], if set.
pub fn address_from_env() -> Result<Option<String>> {
    parse_env_value(std::env::var(ADDRESS_ENV_VAR).ok())
}

fn parse_env_value(value: Option<String>) -> Result<Option<String>> {
    match value {
        Some(value) if !value.trim().is_empty() => {
            parse_address(&value).with_context(|| format!("Invalid ${ADDRESS_ENV_VAR}"))?;
            Ok(Some(value.trim().to_string()))
        }
        _ => Ok(None),
    }
}

/// A JSON file listing the sessions that are (or were) running on this machine.
#[derive(Debug, Clone)]
pub struct SessionBook {
    path: PathBuf,
}

impl SessionBook {
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `$XDG_RUNTIME_DIR/tandem/sessions.json`, or a private directory in the temp dir.
    pub fn default_location() -> Result<Self> {
        let dir = match std::env::var("XDG_RUNTIME_DIR") {
            Ok(runtime_dir) if !runtime_dir.is_empty() => Path::new(&runtime_dir).join("tandem"),
            _ => fallback_dir()?,
        };
        Ok(Self::new(dir.join(BOOK_FILE)))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> Result<Vec<SessionRecord>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session book '{}'", self.path.display()))?;
        match serde_json::from_str(&content) {
            Ok(records) => Ok(records),
            Err(err) => {
                warn!(
                    "Session book '{}' is corrupt, ignoring it: {err}",
                    self.path.display()
                );
                Ok(vec![])
            }
        }
    }

    /// Adds `record`, replacing an earlier one for the same address.
    pub fn advertise(&self, record: SessionRecord) -> Result<()> {
        let mut records = self.records()?;
        records.retain(|existing| !existing.same_address(&record.host, record.port));
        info!("Advertising session {} in '{}'", record.address(), self.path.display());
        records.push(record);
        self.write(&records)
    }

    /// Returns whether there was a record to remove.
    pub fn withdraw(&self, host: &str, port: u16) -> Result<bool> {
        let mut records = self.records()?;
        let before = records.len();
        records.retain(|existing| !existing.same_address(host, port));
        if records.len() == before {
            return Ok(false);
        }
        self.write(&records)?;
        Ok(true)
    }

    /// Returns the records whose port still accepts connections, and forgets the others.
    pub async fn live_records(&self) -> Result<Vec<SessionRecord>> {
        let records = self.records()?;
        let mut live = Vec::with_capacity(records.len());
        for record in &records {
            if accepts_connections(&record.address()).await {
                live.push(record.clone());
            } else {
                debug!("Pruning stale session {}", record.address());
            }
        }
        if live.len() != records.len() {
            self.write(&live)?;
        }
        Ok(live)
    }

    /// The newest live session started in `cwd`, or else the newest live session.
    pub async fn discover(&self, cwd: &Path) -> Result<Option<SessionRecord>> {
        let live = self.live_records().await?;
        let newest_for_cwd = live
            .iter()
            .filter(|record| record.cwd == cwd)
            .max_by_key(|record| record.timestamp);
        Ok(newest_for_cwd
            .or_else(|| live.iter().max_by_key(|record| record.timestamp))
            .cloned())
    }

    fn write(&self, records: &[SessionRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create '{}'", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(records)?;
        let temporary = self.path.with_extension("json.tmp");
        fs::write(&temporary, content)
            .with_context(|| format!("Failed to write '{}'", temporary.display()))?;
        fs::rename(&temporary, &self.path)
            .with_context(|| format!("Failed to replace '{}'", self.path.display()))
    }
}

/// Connects and hangs up again at once, without sending anything.
async fn accepts_connections(address: &str) -> bool {
    match timeout(PROBE_TIMEOUT, TcpStream::connect(address)).await {
        Ok(Ok(mut stream)) => {
            let _ = stream.shutdown().await;
            true
        }
        _ => false,
    }
}

fn fallback_dir() -> Result<PathBuf> {
    let user = std::env::var("USER").unwrap_or_else(|_| "default".to_string());
    let dir = std::env::temp_dir().join(format!("tandem-{user}"));
    if !dir.exists() {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create '{}'", dir.display()))?;
        #[cfg(unix)]
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))
            .context("Failed to restrict permissions of the session directory")?;
    }
    Ok(dir)
}

/// Picks the peer address: `explicit` if given, else [`ADDRESS_ENV_VAR`], else the session book.
pub async fn resolve_peer_address(
    explicit: Option<&str>,
    book: &SessionBook,
    cwd: &Path,
) -> Result<String> {
    resolve_peer_address_with_env(explicit, address_from_env()?, book, cwd).await
}

async fn resolve_peer_address_with_env(
    explicit: Option<&str>,
    from_env: Option<String>,
    book: &SessionBook,
    cwd: &Path,
) -> Result<String> {
    if let Some(address) = explicit {
        parse_address(address)?;
        return Ok(address.to_string());
    }
    if let Some(address) = from_env {
        debug!("Using peer address from ${ADDRESS_ENV_VAR}");
        return Ok(address);
    }
    match book.discover(cwd).await? {
        Some(record) => {
            info!("Found session {} in '{}'", record.address(), record.cwd.display());
            Ok(record.address())
        }
        None => bail!("No running session found. Pass an address, or set ${ADDRESS_ENV_VAR}"),
    }
}
