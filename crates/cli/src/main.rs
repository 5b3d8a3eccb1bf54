//! rekindle - hot reload coordination host

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rekindle_core::Config;
use server::{ChangeWatcher, HostServer};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod backend;
mod logging;

use backend::CommandBackend;

#[derive(Parser)]
#[command(name = "rekindle")]
#[command(about = "Serve live code deltas to a running program")]
#[command(after_help = "\
QUICK START:
  rekindle serve --target my-app      # Watch . and serve hot reload
  RUST_LOG=debug rekindle serve ...   # Verbose protocol logging

The build command and candidate ports come from rekindle.toml in the
project root (falling back to ~/.config/rekindle/config.toml).")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Watch a project and serve deltas to connecting targets
  Serve {
    /// Build target name clients announce in their handshake
    #[arg(short, long)]
    target: String,
    /// Project root to watch (default: current directory)
    #[arg(long)]
    project_root: Option<PathBuf>,
    /// Explicit config file (default: layered project/user config)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Log to a rolling file instead of the console
    #[arg(long)]
    background: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  match cli.command {
    Commands::Serve {
      target,
      project_root,
      config,
      background,
    } => cmd_serve(target, project_root, config, background).await,
  }
}

async fn cmd_serve(target: String, project_root: Option<PathBuf>, config: Option<PathBuf>, background: bool) -> Result<()> {
  let root = match project_root {
    Some(root) => root,
    None => std::env::current_dir().context("cannot determine current directory")?,
  };

  let config = match config {
    Some(path) => Config::load_from(&path)?,
    None => Config::load_for_project(&root),
  };

  let _guard = logging::init(&config.service, background);

  info!(target = %target, root = %root.display(), "starting rekindle service");
  if config.build.command.is_empty() {
    warn!("no [build] command configured; every rebuild will fail until one is set");
  }

  let server = Arc::new(HostServer::new(config.discovery.clone()));
  let backend = Arc::new(CommandBackend::new(root.clone(), config.build.clone()));
  server.register_target(&target, backend);

  let cancel = CancellationToken::new();

  ChangeWatcher::spawn(
    root,
    config.watcher.clone(),
    Arc::clone(&server),
    &target,
    cancel.child_token(),
  )
  .context("failed to start file watcher")?;

  // Handle ctrl-c gracefully
  let cancel_for_signal = cancel.clone();
  tokio::spawn(async move {
    if let Err(e) = signal::ctrl_c().await {
      warn!("failed to listen for ctrl-c: {}", e);
      return;
    }
    info!("received ctrl-c, shutting down...");
    cancel_for_signal.cancel();
  });

  // A bind failure means hot reload is unavailable, not a crash
  if let Err(e) = server.run(cancel.child_token()).await {
    error!(error = %e, "hot reload server stopped");
  }

  cancel.cancel();
  info!("rekindle service shut down");
  Ok(())
}
