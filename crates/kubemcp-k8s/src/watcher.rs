//! Kubeconfig change detection
//!
//! Polls the modification time of each watched file on a fixed interval.
//! When any file changes, every registered cache is flushed and the external
//! callbacks run before polling resumes. Each poll step runs on tokio's
//! blocking pool, so a slow callback delays the next poll but never stalls
//! an async worker.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ClientFactory;
use crate::config::DEFAULT_WATCH_INTERVAL;
use crate::crd::{CrdCache, CrdProbe};
use crate::resolver::ClientResolver;

/// How long `stop()` waits for the poll task to exit
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// External hook run after a kubeconfig change
pub type ChangeCallback = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Shared list of callbacks, appendable while the watcher runs
pub type CallbackList = Arc<RwLock<Vec<ChangeCallback>>>;

/// A cache the watcher flushes when kubeconfig changes
pub trait Invalidate: Send + Sync {
    fn invalidate_all(&self);
}

impl<F: ClientFactory> Invalidate for ClientResolver<F> {
    fn invalidate_all(&self) {
        self.invalidate();
    }
}

impl<P: CrdProbe> Invalidate for CrdCache<P> {
    fn invalidate_all(&self) {
        self.clear();
    }
}

type MtimeTable = HashMap<PathBuf, Option<SystemTime>>;

struct Running {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

/// Background poller over kubeconfig files
pub struct ConfigChangeWatcher {
    paths: Vec<PathBuf>,
    interval: Duration,
    targets: Vec<Arc<dyn Invalidate>>,
    callbacks: CallbackList,
    watched: Arc<Mutex<MtimeTable>>,
    running: Option<Running>,
}

impl ConfigChangeWatcher {
    /// A zero `interval` is replaced with `DEFAULT_WATCH_INTERVAL`
    pub fn new(paths: Vec<PathBuf>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            warn!(
                default_secs = DEFAULT_WATCH_INTERVAL.as_secs(),
                "Kubeconfig watch interval must be non-zero, using default"
            );
            DEFAULT_WATCH_INTERVAL
        } else {
            interval
        };

        Self {
            paths,
            interval,
            targets: Vec::new(),
            callbacks: Arc::new(RwLock::new(Vec::new())),
            watched: Arc::new(Mutex::new(HashMap::new())),
            running: None,
        }
    }

    /// Flush this cache on every change
    pub fn invalidates(mut self, target: Arc<dyn Invalidate>) -> Self {
        self.targets.push(target);
        self
    }

    /// Share an externally owned callback list
    pub fn with_callbacks(mut self, callbacks: CallbackList) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Register a callback run after every change
    ///
    /// Callbacks run synchronously on a blocking-pool thread, one after another.
    pub fn on_change(&self, callback: ChangeCallback) {
        self.callbacks.write().push(callback);
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Watched files and their last recorded modification time
    pub fn watched_files(&self) -> Vec<(PathBuf, Option<SystemTime>)> {
        let mut files: Vec<_> = self
            .watched
            .lock()
            .iter()
            .map(|(path, mtime)| (path.clone(), *mtime))
            .collect();
        files.sort();
        files
    }

    /// Start polling; a no-op if already running
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        if self.is_running() {
            debug!("Kubeconfig watcher already running");
            return;
        }

        {
            let mut watched = self.watched.lock();
            watched.clear();
            for path in &self.paths {
                watched.insert(path.clone(), modified(path));
            }
        }

        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            let interval = self.interval;
            let watched = Arc::clone(&self.watched);
            let targets = self.targets.clone();
            let callbacks = Arc::clone(&self.callbacks);

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick completes immediately
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,

                        _ = ticker.tick() => {
                            let watched = Arc::clone(&watched);
                            let targets = targets.clone();
                            let callbacks = Arc::clone(&callbacks);

                            let step = tokio::task::spawn_blocking(move || {
                                let changed = poll_changes(&watched);
                                if !changed.is_empty() {
                                    fire_change(&changed, &targets, &callbacks);
                                }
                            });
                            if let Err(e) = step.await {
                                warn!(error = %e, "Kubeconfig poll step failed");
                            }
                        }
                    }
                }

                debug!("Kubeconfig watcher loop exited");
            })
        };

        info!(
            files = ?self.paths,
            interval_ms = self.interval.as_millis() as u64,
            "Started kubeconfig watcher"
        );
        self.running = Some(Running { cancel, task });
    }

    /// Signal the poll task to exit and wait for it, at most `STOP_TIMEOUT`
    ///
    /// Returns even if the task has not exited in time; in that case the task
    /// is left to observe cancellation on its own.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.cancel.cancel();
        match tokio::time::timeout(STOP_TIMEOUT, running.task).await {
            Ok(_) => info!("Stopped kubeconfig watcher"),
            Err(_) => warn!(
                timeout_secs = STOP_TIMEOUT.as_secs(),
                "Kubeconfig watcher did not stop in time"
            ),
        }
    }
}

impl Drop for ConfigChangeWatcher {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Stat every watched file, record new mtimes, and return the files that changed
fn poll_changes(watched: &Mutex<MtimeTable>) -> Vec<PathBuf> {
    let mut watched = watched.lock();
    let mut changed = Vec::new();

    for (path, last) in watched.iter_mut() {
        let current = modified(path);
        if current != *last {
            *last = current;
            changed.push(path.clone());
        }
    }

    changed
}

fn fire_change(changed: &[PathBuf], targets: &[Arc<dyn Invalidate>], callbacks: &CallbackList) {
    info!(files = ?changed, "Kubeconfig changed, invalidating cached clients");

    for target in targets {
        target.invalidate_all();
    }

    let callbacks: Vec<ChangeCallback> = callbacks.read().clone();
    for callback in callbacks {
        match catch_unwind(AssertUnwindSafe(|| callback())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Config change callback failed"),
            Err(_) => warn!("Config change callback panicked"),
        }
    }
}
