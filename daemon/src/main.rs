// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tandem::config::AppConfig;
use tandem::discovery::{self, SessionBook, SessionRecord};
use tandem::editor::InMemoryEditor;
use tandem::logging;
use tandem::session::Orchestrator;
use tandem::types::Role;
use tokio::signal;
use tracing::info;

mod cli;

use cli::{Cli, Commands};

fn get_directory(directory: Option<PathBuf>) -> Result<PathBuf> {
    let directory = match directory {
        Some(directory) => directory,
        None => std::env::current_dir().context("Could not access current directory")?,
    };
    directory
        .canonicalize()
        .with_context(|| format!("Could not access directory '{}'", directory.display()))
}

fn load_config(cli_config: AppConfig, directory: &Path) -> Result<AppConfig> {
    let file_config = AppConfig::from_directory(directory)?;
    if file_config.is_none() {
        info!("No config file found, using command line options and defaults");
    }
    Ok(cli_config.merge(file_config))
}

async fn wait_for_ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        eprintln!("Unable to listen for shutdown signal: {err}");
        // still shut down.
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    let cli = Cli::parse();

    logging::initialize(cli.debug)?;

    let directory = get_directory(cli.directory)?;

    match cli.command {
        Commands::Serve {
            no_advertise,
            session,
        } => {
            let config = load_config(session.to_config(Role::Local, None), &directory)?;
            serve(&config, &directory, !no_advertise).await?;
        }
        Commands::Connect { address, session } => {
            let config = load_config(session.to_config(Role::Remote, address), &directory)?;
            connect(&config, &directory).await?;
        }
        Commands::Call {
            address,
            session,
            command,
            args,
        } => {
            let config = load_config(session.to_config(Role::Remote, address), &directory)?;
            let result = call(&config, &directory, &command, args).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Sessions => {
            let book = SessionBook::default_location()?;
            let records = book.live_records().await?;
            if records.is_empty() {
                info!("No running sessions.");
            }
            for record in records {
                println!("{}\t{}", record.address(), record.cwd.display());
            }
        }
    }
    Ok(())
}

async fn serve(config: &AppConfig, directory: &Path, advertise: bool) -> Result<()> {
    let mut orchestrator = Orchestrator::new(config.session_config());
    orchestrator.start(InMemoryEditor::new()).await?;
    let local_addr = orchestrator
        .local_addr()
        .context("A running session should have an address")?;
    info!("Session for {} is listening on {local_addr}", directory.display());

    let book = SessionBook::default_location()?;
    if advertise {
        book.advertise(SessionRecord::new(local_addr, directory))?;
    }

    wait_for_ctrl_c().await;

    if advertise {
        book.withdraw(&local_addr.ip().to_string(), local_addr.port())?;
    }
    orchestrator.stop().await;
    Ok(())
}

async fn peer_address(config: &AppConfig, directory: &Path) -> Result<String> {
    let book = SessionBook::default_location()?;
    discovery::resolve_peer_address(config.peer.as_deref(), &book, directory).await
}

async fn connect(config: &AppConfig, directory: &Path) -> Result<()> {
    let address = peer_address(config, directory).await?;
    let mut orchestrator = Orchestrator::new(config.session_config());
    let handle = orchestrator.start(InMemoryEditor::new()).await?;
    handle.connect(&address, &config.retry_policy()).await?;

    wait_for_ctrl_c().await;

    orchestrator.stop().await;
    Ok(())
}

async fn call(
    config: &AppConfig,
    directory: &Path,
    command: &str,
    args: Vec<String>,
) -> Result<serde_json::Value> {
    let address = peer_address(config, directory).await?;
    let mut orchestrator = Orchestrator::new(config.session_config());
    let handle = orchestrator.start(InMemoryEditor::new()).await?;
    handle.connect(&address, &config.retry_policy()).await?;

    let result = handle.call(command, args, None).await;
    orchestrator.stop().await;
    result.with_context(|| format!("Calling '{command}' on {address} failed"))
}
