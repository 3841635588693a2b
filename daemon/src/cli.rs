// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tandem::config::AppConfig;
use tandem::types::Role;

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    /// The directory whose .tandem/config is used. Defaults to current directory.
    #[arg(long, global = true, env = "TANDEM_DIRECTORY")]
    pub directory: Option<PathBuf>,
    /// Enable verbose debug output.
    #[arg(short, long, global = true, action)]
    pub debug: bool,
}

#[derive(Args)]
pub struct SessionArgs {
    /// Interface to listen on [default: 127.0.0.1].
    #[arg(long)]
    pub host: Option<String>,
    /// Port to listen on [default: assigned by OS].
    #[arg(long)]
    pub port: Option<u16>,
    /// Which side of the link this is, `local` or `remote`.
    #[arg(long)]
    pub role: Option<Role>,
    /// How long to wait for a command's response, in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

impl SessionArgs {
    pub fn to_config(&self, role: Role, peer: Option<String>) -> AppConfig {
        AppConfig {
            host: self.host.clone(),
            port: self.port,
            role: Some(self.role.unwrap_or(role)),
            command_timeout_ms: self.timeout_ms,
            peer,
            ..AppConfig::default()
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a headless primary session, advertise its address and wait for Ctrl-C.
    Serve {
        /// Don't list this session in the session book.
        #[arg(long)]
        no_advertise: bool,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Run a headless secondary session linked to a peer.
    Connect {
        /// The peer's host:port. Otherwise, use $TANDEM_ADDRESS or the newest advertised session.
        address: Option<String>,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Run a command in a peer's editor and print its JSON result.
    Call {
        /// The peer's host:port. Otherwise, use $TANDEM_ADDRESS or the newest advertised session.
        #[arg(long)]
        address: Option<String>,
        #[command(flatten)]
        session: SessionArgs,
        command: String,
        args: Vec<String>,
    },
    /// List the live sessions advertised on this machine.
    Sessions,
}

#[test]
fn verify() {
    use clap::CommandFactory as _;
    Cli::command().debug_assert();
}
