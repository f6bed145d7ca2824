//! Working-tree and commit watcher.
//!
//! Filesystem events under each registered root are debounced per
//! repository; VCS head movement is polled. Both produce sync requests the
//! index manager consumes. Stopping the watcher quiesces within one
//! debounce window.

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::types::{RepoId, Repository};
use crate::vcs;

/// Why a sync was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReason {
    FileChange,
    CommitAdvance,
}

/// One unit of work for the index manager.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub repo_id: RepoId,
    pub reason: SyncReason,
}

/// Interval at which the debounce loop inspects pending events. Kept well
/// under the debounce window so `stop` can quiesce inside one window.
const TICK: Duration = Duration::from_millis(100);

/// Running watcher; drop or call `stop` to shut down.
pub struct WatcherHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    // Keeps the OS watches alive for the lifetime of the handle.
    _fs_watcher: RecommendedWatcher,
}

impl WatcherHandle {
    /// Signal shutdown and wait for the loops to finish.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("watcher task ended abnormally: {e}");
            }
        }
        info!("watcher stopped");
    }
}

/// Start watching the given repositories, emitting sync requests on
/// `requests`.
pub fn spawn(
    repos: Vec<Repository>,
    config: &EngineConfig,
    requests: mpsc::Sender<SyncRequest>,
) -> Result<WatcherHandle> {
    let debounce = Duration::from_millis(config.watcher_debounce_ms);
    let poll_interval = Duration::from_millis(config.watcher_commit_poll_ms);
    let ignored_dirs = config.ignored_dirs.clone();

    let roots: Vec<(RepoId, PathBuf)> = repos
        .iter()
        .map(|r| (r.repo_id.clone(), r.root_path.clone()))
        .collect();

    // Raw filesystem events cross from notify's thread into the async
    // debouncer over an unbounded channel; volume is capped by the OS.
    let (raw_tx, raw_rx) = mpsc::unbounded_channel::<PathBuf>();
    let mut fs_watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        if let Ok(event) = result {
            if !matters(&event.kind) {
                return;
            }
            for path in event.paths {
                let _ = raw_tx.send(path);
            }
        }
    })
    .context("failed to create filesystem watcher")?;

    for (_, root) in &roots {
        fs_watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", root.display()))?;
    }

    let (shutdown, shutdown_rx) = watch::channel(false);

    let debounce_task = tokio::spawn(debounce_loop(
        raw_rx,
        roots.clone(),
        ignored_dirs,
        debounce,
        requests.clone(),
        shutdown_rx.clone(),
    ));
    let poll_task = tokio::spawn(commit_poll_loop(
        roots,
        poll_interval,
        requests,
        shutdown_rx,
    ));

    Ok(WatcherHandle {
        shutdown,
        tasks: vec![debounce_task, poll_task],
        _fs_watcher: fs_watcher,
    })
}

/// Creations, writes, deletions, and renames matter; metadata-only churn
/// does not.
fn matters(kind: &notify::EventKind) -> bool {
    use notify::event::ModifyKind;
    use notify::EventKind;
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

async fn debounce_loop(
    mut raw_rx: mpsc::UnboundedReceiver<PathBuf>,
    roots: Vec<(RepoId, PathBuf)>,
    ignored_dirs: Vec<String>,
    debounce: Duration,
    requests: mpsc::Sender<SyncRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    // repo -> instant of the most recent event under it.
    let mut pending: HashMap<RepoId, Instant> = HashMap::new();
    let mut tick = tokio::time::interval(TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("debounce loop shutting down");
                    return;
                }
            }
            maybe_path = raw_rx.recv() => {
                let Some(path) = maybe_path else { return };
                if is_suppressed(&path, &ignored_dirs) {
                    continue;
                }
                if let Some(repo_id) = repo_for_path(&roots, &path) {
                    pending.insert(repo_id, Instant::now());
                }
            }
            _ = tick.tick() => {
                let now = Instant::now();
                let ready: Vec<RepoId> = pending
                    .iter()
                    .filter(|(_, last)| now.duration_since(**last) >= debounce)
                    .map(|(repo_id, _)| repo_id.clone())
                    .collect();
                for repo_id in ready {
                    pending.remove(&repo_id);
                    debug!("debounced file change for {repo_id}");
                    let _ = requests
                        .send(SyncRequest { repo_id, reason: SyncReason::FileChange })
                        .await;
                }
            }
        }
    }
}

async fn commit_poll_loop(
    roots: Vec<(RepoId, PathBuf)>,
    poll_interval: Duration,
    requests: mpsc::Sender<SyncRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut heads: HashMap<RepoId, Option<String>> = roots
        .iter()
        .map(|(repo_id, root)| (repo_id.clone(), vcs::head_commit(root)))
        .collect();
    let mut tick = tokio::time::interval(poll_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tick.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("commit poll loop shutting down");
                    return;
                }
            }
            _ = tick.tick() => {
                for (repo_id, root) in &roots {
                    let head = vcs::head_commit(root);
                    let known = heads.get(repo_id).cloned().flatten();
                    if head != known && head.is_some() {
                        heads.insert(repo_id.clone(), head);
                        debug!("commit advance in {repo_id}");
                        let _ = requests
                            .send(SyncRequest {
                                repo_id: repo_id.clone(),
                                reason: SyncReason::CommitAdvance,
                            })
                            .await;
                    }
                }
            }
        }
    }
}

/// The repository whose root contains `path`, preferring the longest root
/// when trees nest.
fn repo_for_path(roots: &[(RepoId, PathBuf)], path: &PathBuf) -> Option<RepoId> {
    roots
        .iter()
        .filter(|(_, root)| path.starts_with(root))
        .max_by_key(|(_, root)| root.as_os_str().len())
        .map(|(repo_id, _)| repo_id.clone())
}

/// Churn under build and output directories is suppressed.
fn is_suppressed(path: &PathBuf, ignored_dirs: &[String]) -> bool {
    path.components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .map(|name| ignored_dirs.iter().any(|ignored| ignored == name))
            .unwrap_or(false)
    })
}
