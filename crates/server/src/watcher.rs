//! File watcher feeding the coordinator's change queues.
//!
//! Bridges notify's sync callbacks into the async world via a channel, then
//! debounces bursts so one save (or one branch switch) becomes one trigger:
//! settled paths are reported with `notify_changed` and a single `trigger`
//! arms the wake signal of the target's sessions.
//!
//! Filtering: directories, gitignored paths, and extensions outside the
//! configured set are dropped at the event stage.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::Arc,
  time::Instant,
};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use rekindle_core::{UnitId, WatcherConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::server::HostServer;

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
  #[error("failed to initialize watcher: {0}")]
  Init(#[source] notify::Error),

  #[error("failed to watch path: {0}")]
  Watch(#[source] notify::Error),

  #[error("failed to build gitignore: {0}")]
  Gitignore(#[source] ignore::Error),
}

/// Watches a project root and feeds settled changes into the coordinator.
pub struct ChangeWatcher {
  root: PathBuf,
  config: WatcherConfig,
  server: Arc<HostServer>,
  target: String,
  cancel: CancellationToken,
  // The notify watcher must be held to keep it alive
  _watcher: RecommendedWatcher,
  // Channel receiving events from notify's sync callback
  event_rx: mpsc::Receiver<Result<Event, notify::Error>>,
  gitignore: Option<Gitignore>,
}

impl ChangeWatcher {
  pub fn new(
    root: PathBuf,
    config: WatcherConfig,
    server: Arc<HostServer>,
    target: impl Into<String>,
    cancel: CancellationToken,
  ) -> Result<Self, WatcherError> {
    let target = target.into();
    info!(root = %root.display(), target = %target, "initializing change watcher");

    let gitignore = build_gitignore(&root)?;

    // notify's callback runs on its own thread - bridge with blocking_send;
    // a full channel just drops the event
    let (event_tx, event_rx) = mpsc::channel::<Result<Event, notify::Error>>(256);
    let mut watcher = RecommendedWatcher::new(
      move |res| {
        let _ = event_tx.blocking_send(res);
      },
      NotifyConfig::default(),
    )
    .map_err(WatcherError::Init)?;

    watcher.watch(&root, RecursiveMode::Recursive).map_err(WatcherError::Watch)?;

    Ok(Self {
      root,
      config,
      server,
      target,
      cancel,
      _watcher: watcher,
      event_rx,
      gitignore,
    })
  }

  /// Convenience: construct and spawn in one go.
  pub fn spawn(
    root: PathBuf,
    config: WatcherConfig,
    server: Arc<HostServer>,
    target: impl Into<String>,
    cancel: CancellationToken,
  ) -> Result<tokio::task::JoinHandle<()>, WatcherError> {
    let watcher = Self::new(root, config, server, target, cancel)?;
    Ok(tokio::spawn(watcher.run()))
  }

  /// Run until cancelled or the event channel closes.
  pub async fn run(mut self) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
    let mut debounce_interval = tokio::time::interval(self.config.debounce());

    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          debug!("change watcher shutting down (cancelled)");
          break;
        }

        event = self.event_rx.recv() => {
          match event {
            Some(Ok(event)) => self.process_event(&mut pending, event),
            Some(Err(e)) => warn!(error = %e, "watcher error"),
            None => {
              debug!("change watcher shutting down (channel closed)");
              break;
            }
          }
        }

        _ = debounce_interval.tick() => {
          self.flush_settled(&mut pending);
        }
      }
    }
  }

  fn process_event(&self, pending: &mut HashMap<PathBuf, Instant>, event: Event) {
    match event.kind {
      EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
      EventKind::Access(_) | EventKind::Any | EventKind::Other => return,
    }

    for path in event.paths {
      if path.is_dir() {
        continue;
      }
      if !self.config.matches_extension(&path) {
        trace!(path = %path.display(), "skipping by extension");
        continue;
      }
      if self.is_ignored(&path) {
        trace!(path = %path.display(), "skipping ignored file");
        continue;
      }

      trace!(path = %path.display(), "change observed");
      pending.insert(path, Instant::now());
    }
  }

  /// Report paths whose debounce window has passed, then trigger once.
  fn flush_settled(&self, pending: &mut HashMap<PathBuf, Instant>) {
    let now = Instant::now();
    let debounce = self.config.debounce();

    let settled: Vec<PathBuf> = pending
      .iter()
      .filter(|(_, seen)| now.duration_since(**seen) >= debounce)
      .map(|(path, _)| path.clone())
      .collect();

    if settled.is_empty() {
      return;
    }

    debug!(count = settled.len(), target = %self.target, "flushing settled changes");
    for path in settled {
      pending.remove(&path);
      self.server.notify_changed(&self.target, self.unit_id_for(&path));
    }
    self.server.trigger(&self.target);
  }

  fn is_ignored(&self, path: &Path) -> bool {
    match &self.gitignore {
      Some(gitignore) => gitignore.matched(path, false).is_ignore(),
      None => false,
    }
  }

  /// Changed units are named by their root-relative path.
  fn unit_id_for(&self, path: &Path) -> UnitId {
    let relative = path.strip_prefix(&self.root).unwrap_or(path);
    UnitId::new(relative.to_string_lossy())
  }
}

/// Build a gitignore matcher for the project root, always excluding the
/// usual build droppings even without a .gitignore file.
fn build_gitignore(root: &Path) -> Result<Option<Gitignore>, WatcherError> {
  let mut builder = GitignoreBuilder::new(root);

  let gitignore_path = root.join(".gitignore");
  if gitignore_path.exists()
    && let Some(err) = builder.add(&gitignore_path)
  {
    warn!(error = %err, "error parsing .gitignore, continuing with partial rules");
  }

  let _ = builder.add_line(None, ".git/");
  let _ = builder.add_line(None, "target/");
  let _ = builder.add_line(None, "node_modules/");

  let gitignore = builder.build().map_err(WatcherError::Gitignore)?;
  Ok(Some(gitignore))
}
