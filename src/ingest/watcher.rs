//! Live recordings watcher.
//!
//! Lifecycle: `Idle → Scanning → Watching → Stopped`.
//!
//! The watcher subscribes to file-creation events recursively under the
//! recordings root before the catch-up scan runs, so nothing written during
//! the scan is missed. When the session-dir conversation layout is enabled
//! the subscription moves up to the root's parent, where those
//! `<caller>_<session>/full_conversation.wav` files are written; outside the
//! root only such files are admitted. Each admitted event gets its own task that sleeps for
//! the settle delay and then runs the reconcile pipeline, so a slow file
//! never holds up unrelated ones. Per-event failures are logged and counted;
//! only a stop request (or losing the event stream) ends the loop, and
//! events already admitted are always finished before [`WatchHandle::stop`]
//! returns.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};

use super::locator::{ArtifactLocator, ConversationLayout};
use super::reconciler::{IngestError, ReconcileOutcome, Reconciler};
use super::scanner::{ScanReport, Scanner};
use crate::domain::artifact::CONVERSATION_FILENAME;
use crate::domain::ArtifactKind;

/// Errors that can occur with the watcher
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Watch directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("Watcher task failed: {0}")]
    Task(#[from] JoinError),
}

/// What to do when the recordings root is missing at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingRootPolicy {
    /// Give up with an error
    Fail,

    /// Log a warning and poll until the directory appears
    Wait,
}

impl std::str::FromStr for MissingRootPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "wait" => Ok(Self::Wait),
            other => Err(format!("Unknown missing-root policy: {other} (expected fail or wait)")),
        }
    }
}

/// Poll until `root` is a directory
pub async fn wait_for_root(root: &Path, poll: Duration) {
    while !root.is_dir() {
        tokio::time::sleep(poll).await;
    }
}

/// Lifecycle state of a [`LiveWatcher`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherState {
    Idle,
    Scanning,
    Watching,
    Stopped,
}

/// Configuration for the watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Wait after a creation event before reading the file
    pub settle_delay: Duration,

    /// Run a catch-up scan before watching
    pub initial_scan: bool,

    /// Restrict the catch-up scan to registered callers' folders
    pub scan_registered_only: bool,

    /// Behavior when the root does not exist yet
    pub missing_root: MissingRootPolicy,

    /// Poll interval while waiting for the root
    pub root_poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(1),
            initial_scan: true,
            scan_registered_only: false,
            missing_root: MissingRootPolicy::Wait,
            root_poll_interval: Duration::from_secs(5),
        }
    }
}

/// Emitted for every artifact the watcher reconciled successfully
#[derive(Debug, Clone)]
pub struct IngestEvent {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub session_id: String,
    pub created: bool,
}

/// Totals reported when the watcher stops
#[derive(Debug, Clone, Default)]
pub struct WatchSummary {
    /// Catch-up scan, if one ran
    pub initial_scan: Option<ScanReport>,

    /// Live events, counted like a scan
    pub events: ScanReport,
}

/// Live watcher over the reconciler's recordings root
pub struct LiveWatcher {
    reconciler: Arc<Reconciler>,
    config: WatcherConfig,
}

impl LiveWatcher {
    pub fn new(reconciler: Arc<Reconciler>, config: WatcherConfig) -> Self {
        Self { reconciler, config }
    }

    /// Start the watcher task.
    ///
    /// Returns a stream of successful ingests and a handle to stop the
    /// watcher. Dropping the handle also stops it.
    pub fn start(self) -> (mpsc::UnboundedReceiver<IngestEvent>, WatchHandle) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
        let (state_tx, state_rx) = watch::channel(WatcherState::Idle);

        let task = tokio::spawn(async move {
            let result = run_watcher(self.reconciler, self.config, &state_tx, stop_rx, event_tx).await;
            state_tx.send_replace(WatcherState::Stopped);
            if let Err(e) = &result {
                tracing::error!("Watcher error: {}", e);
            }
            result
        });

        (
            event_rx,
            WatchHandle {
                stop_tx,
                state_rx,
                task,
            },
        )
    }
}

/// Handle to control the watcher
pub struct WatchHandle {
    stop_tx: mpsc::Sender<()>,
    state_rx: watch::Receiver<WatcherState>,
    task: tokio::task::JoinHandle<Result<WatchSummary, WatcherError>>,
}

impl WatchHandle {
    /// Current lifecycle state
    pub fn state(&self) -> WatcherState {
        *self.state_rx.borrow()
    }

    /// Wait until the watcher reaches `target` (or stops)
    pub async fn wait_for(&mut self, target: WatcherState) -> WatcherState {
        match self
            .state_rx
            .wait_for(|s| *s == target || *s == WatcherState::Stopped)
            .await
        {
            Ok(state) => *state,
            Err(_) => WatcherState::Stopped,
        }
    }

    /// Stop the watcher and wait for in-flight events to finish
    pub async fn stop(self) -> Result<WatchSummary, WatcherError> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?
    }
}

/// Internal watcher loop
async fn run_watcher(
    reconciler: Arc<Reconciler>,
    config: WatcherConfig,
    state_tx: &watch::Sender<WatcherState>,
    mut stop_rx: mpsc::Receiver<()>,
    ingest_tx: mpsc::UnboundedSender<IngestEvent>,
) -> Result<WatchSummary, WatcherError> {
    let root = reconciler.root().to_path_buf();
    let mut summary = WatchSummary::default();

    if !root.is_dir() {
        match config.missing_root {
            MissingRootPolicy::Fail => return Err(WatcherError::DirectoryNotFound(root)),
            MissingRootPolicy::Wait => {
                tracing::warn!("Path {} does not exist. Waiting...", root.display());
                tokio::select! {
                    _ = stop_rx.recv() => return Ok(summary),
                    _ = wait_for_root(&root, config.root_poll_interval) => {}
                }
            }
        }
    }

    let (fs_tx, mut fs_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = fs_tx.send(res);
    })?;

    let mut scope = WatchScope::new(reconciler.locator());
    if let Err(e) = watcher.watch(scope.watch_dir(), RecursiveMode::Recursive) {
        if scope.sessions_parent.is_none() {
            return Err(e.into());
        }
        tracing::warn!(
            "Cannot watch {} for session directories ({}); watching {} only",
            scope.watch_dir().display(),
            e,
            root.display()
        );
        scope.sessions_parent = None;
        watcher.watch(&root, RecursiveMode::Recursive)?;
    }

    if config.initial_scan {
        state_tx.send_replace(WatcherState::Scanning);
        tracing::info!("Performing initial scan of {}...", root.display());
        summary.initial_scan = initial_scan(&reconciler, config.scan_registered_only).await;
    }

    state_tx.send_replace(WatcherState::Watching);
    tracing::info!("Watching {} for call recordings", root.display());

    let mut in_flight: JoinSet<EventResult> = JoinSet::new();

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                tracing::info!("Watcher stopping...");
                break;
            }
            received = fs_rx.recv() => match received {
                Some(Ok(event)) => {
                    for arrival in admitted_paths(&event, &scope) {
                        match &arrival {
                            Arrival::File(path) => tracing::info!("Detected new file: {}", path.display()),
                            Arrival::SessionDir(dir) => tracing::info!("Detected session directory: {}", dir.display()),
                        }
                        in_flight.spawn(settle_and_reconcile(
                            Arc::clone(&reconciler),
                            arrival,
                            config.settle_delay,
                        ));
                    }
                }
                Some(Err(e)) => tracing::warn!("Watcher error: {:?}", e),
                None => {
                    tracing::error!("Watcher channel disconnected");
                    break;
                }
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                finish_event(joined, &mut summary.events, &ingest_tx);
            }
        }
    }

    // Unsubscribe first, then finish everything already admitted.
    drop(watcher);
    while let Some(joined) = in_flight.join_next().await {
        finish_event(joined, &mut summary.events, &ingest_tx);
    }

    Ok(summary)
}

async fn initial_scan(reconciler: &Arc<Reconciler>, registered_only: bool) -> Option<ScanReport> {
    let filter = if registered_only {
        match reconciler.store().registered_caller_ids() {
            Ok(ids) => Some(ids),
            Err(e) => {
                tracing::warn!("Could not load registered callers, scanning everything: {}", e);
                None
            }
        }
    } else {
        None
    };

    let scanner = Scanner::new(Arc::clone(reconciler));
    match tokio::task::spawn_blocking(move || scanner.scan(filter.as_deref())).await {
        Ok(Ok(report)) => {
            tracing::info!("Initial scan complete.");
            Some(report)
        }
        Ok(Err(e)) => {
            tracing::warn!("Initial scan skipped: {}", e);
            None
        }
        Err(e) => {
            tracing::error!("Initial scan task failed: {}", e);
            None
        }
    }
}

/// What the watcher subscribes to and which paths it admits
#[derive(Debug, Clone)]
struct WatchScope {
    root: PathBuf,

    /// Parent of the root, when session-dir conversation recordings are
    /// expected there
    sessions_parent: Option<PathBuf>,
}

impl WatchScope {
    fn new(locator: &ArtifactLocator) -> Self {
        let root = locator.root().to_path_buf();
        let sessions_parent = if locator.layouts().contains(&ConversationLayout::SessionDir) {
            root.parent().map(Path::to_path_buf)
        } else {
            None
        };
        Self {
            root,
            sessions_parent,
        }
    }

    fn watch_dir(&self) -> &Path {
        self.sessions_parent.as_deref().unwrap_or(&self.root)
    }

    /// A `<caller>_<session>` directory directly beside the root
    fn is_session_dir(&self, dir: &Path) -> bool {
        let Some(parent) = &self.sessions_parent else {
            return false;
        };
        dir != self.root
            && dir.parent() == Some(parent.as_path())
            && dir
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains('_'))
    }

    fn admits(&self, path: &Path) -> bool {
        if path.starts_with(&self.root) {
            return is_artifact_path(path);
        }
        path.file_name().and_then(|n| n.to_str()) == Some(CONVERSATION_FILENAME)
            && path.parent().is_some_and(|dir| self.is_session_dir(dir))
            && !path.is_dir()
    }
}

/// Something a notify event announced that may need reconciling
#[derive(Debug, Clone, PartialEq, Eq)]
enum Arrival {
    /// A recognized artifact file
    File(PathBuf),

    /// A new session directory; its conversation recording may already be
    /// inside or still on its way
    SessionDir(PathBuf),
}

/// Arrivals from a notify event that should be reconciled
fn admitted_paths(event: &Event, scope: &WatchScope) -> Vec<Arrival> {
    let arrived = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    );
    if !arrived {
        return Vec::new();
    }

    let mut admitted = Vec::new();
    for path in &event.paths {
        if scope.admits(path) {
            admitted.push(Arrival::File(path.clone()));
        } else if scope.is_session_dir(path) && path.is_dir() {
            admitted.push(Arrival::SessionDir(path.clone()));
        }
    }
    admitted
}

fn is_artifact_path(path: &Path) -> bool {
    if path.is_dir() {
        return false;
    }
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(ArtifactKind::from_file_name)
        .is_some()
}

type EventResult = Option<(PathBuf, Result<ReconcileOutcome, IngestError>)>;

async fn settle_and_reconcile(
    reconciler: Arc<Reconciler>,
    arrival: Arrival,
    settle_delay: Duration,
) -> EventResult {
    tokio::time::sleep(settle_delay).await;

    let path = match arrival {
        Arrival::File(path) => path,
        Arrival::SessionDir(dir) => {
            let path = dir.join(CONVERSATION_FILENAME);
            if !path.is_file() {
                tracing::debug!("No conversation recording in {} yet", dir.display());
                return None;
            }
            path
        }
    };

    let target = path.clone();
    let result = match tokio::task::spawn_blocking(move || reconciler.reconcile_path(&target)).await {
        Ok(result) => result,
        Err(e) => Err(IngestError::Io {
            path: path.clone(),
            source: std::io::Error::other(e.to_string()),
        }),
    };
    Some((path, result))
}

fn finish_event(
    joined: Result<EventResult, JoinError>,
    report: &mut ScanReport,
    ingest_tx: &mpsc::UnboundedSender<IngestEvent>,
) {
    let (path, result) = match joined {
        Ok(Some(pair)) => pair,
        Ok(None) => return,
        Err(e) => {
            tracing::error!("Event task failed: {}", e);
            report.failed += 1;
            return;
        }
    };

    if let Ok(outcome) = &result {
        let record = outcome.record();
        tracing::info!("Processed call {} for caller {}", record.session_id, record.caller_id);
        let kind = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(ArtifactKind::from_file_name)
            .unwrap_or(ArtifactKind::PrimaryRecording);
        let _ = ingest_tx.send(IngestEvent {
            path: path.clone(),
            kind,
            session_id: record.session_id.clone(),
            created: outcome.was_created(),
        });
    }

    report.record(&path, result);
}
