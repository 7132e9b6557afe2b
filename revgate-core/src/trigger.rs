//! Lifecycle-event driven background analysis.
//!
//! Events are handed to a fixed pool of worker threads over a crossbeam
//! channel, so the caller never waits on the model. Each worker drives its
//! async job with `Handle::block_on`.
//!
//! Events for one scope run strictly one at a time and in submission order:
//! the first event for an idle scope is queued on the channel, later ones wait
//! in that scope's backlog and are drained by the worker that owns the scope.
//! A job that panics is logged and skipped; its worker moves on to the next.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::analysis::Analyzer;
use crate::db::SuggestionStore;
use crate::error::DiffError;
use crate::types::{AnalysisOptions, AnalysisRequest, FileDiff, Scope};

/// The change request an event refers to, plus the refs to diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestRef {
    pub change_request_id: i64,
    pub repository_id: i64,
    #[serde(default)]
    pub project_key: String,
    #[serde(default)]
    pub repo_slug: String,
    /// Source branch head.
    pub from_ref: String,
    /// Target branch the change would merge into.
    pub to_ref: String,
}

impl PullRequestRef {
    pub fn scope(&self) -> Scope {
        Scope::new(self.change_request_id, self.repository_id)
    }
}

/// Wire form: `{"event": "opened" | "updated", "pullRequest": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "pullRequest", rename_all = "lowercase")]
pub enum LifecycleEvent {
    Opened(PullRequestRef),
    /// New commits were pushed; stored suggestions are stale.
    Updated(PullRequestRef),
}

impl LifecycleEvent {
    pub fn pull_request(&self) -> &PullRequestRef {
        match self {
            LifecycleEvent::Opened(pr) | LifecycleEvent::Updated(pr) => pr,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::Opened(_) => "opened",
            LifecycleEvent::Updated(_) => "updated",
        }
    }
}

/// Produces the file diffs of a change request.
///
/// Called on a worker thread, never on the thread that submitted the event.
pub trait DiffSource: Send + Sync {
    fn file_diffs(&self, pull_request: &PullRequestRef) -> Result<Vec<FileDiff>, DiffError>;
}

struct Shared {
    analyzer: Analyzer,
    store: SuggestionStore,
    diffs: Arc<dyn DiffSource>,
    /// Scopes with a job queued or running, each with the events still waiting behind it.
    backlog: Mutex<HashMap<Scope, VecDeque<LifecycleEvent>>>,
}

impl Shared {
    fn backlog(&self) -> MutexGuard<'_, HashMap<Scope, VecDeque<LifecycleEvent>>> {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next waiting event for `scope`, releasing the scope when there is none.
    fn next_for(&self, scope: Scope) -> Option<LifecycleEvent> {
        let mut backlog = self.backlog();
        let next = backlog.get_mut(&scope).and_then(VecDeque::pop_front);
        if next.is_none() {
            backlog.remove(&scope);
        }
        next
    }

    async fn run(&self, event: &LifecycleEvent) {
        let pr = event.pull_request();
        let scope = pr.scope();
        info!(%scope, event = event.kind(), "analysis job started");

        if let LifecycleEvent::Updated(_) = event {
            if let Err(e) = self.store.delete_all(scope).await {
                warn!(%scope, error = %e, "could not clear stale suggestions, skipping re-analysis");
                return;
            }
        }

        let file_diffs = match self.diffs.file_diffs(pr) {
            Ok(diffs) => diffs,
            Err(e) => {
                warn!(%scope, error = %e, "diff extraction failed");
                return;
            }
        };

        let request = AnalysisRequest {
            change_request_id: pr.change_request_id,
            repository_id: pr.repository_id,
            project_key: pr.project_key.clone(),
            repo_slug: pr.repo_slug.clone(),
            file_diffs,
            options: AnalysisOptions::default(),
        };

        match self.analyzer.analyze_and_save(&self.store, &request).await {
            Ok(response) if response.success => {
                info!(%scope, saved = response.suggestions.len(), elapsed_ms = response.elapsed_ms, "analysis job finished");
            }
            Ok(response) => {
                warn!(%scope, error = response.error.as_deref().unwrap_or(""), "analysis rejected");
            }
            Err(e) => warn!(%scope, error = %e, "saving suggestions failed"),
        }
    }
}

fn worker_loop(shared: Arc<Shared>, rx: Receiver<LifecycleEvent>, handle: Handle) {
    for first in rx {
        let scope = first.pull_request().scope();
        let mut current = Some(first);
        while let Some(event) = current {
            // A panicked job still releases its scope through `next_for`.
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| handle.block_on(shared.run(&event))));
            if let Err(payload) = outcome {
                error!(
                    %scope,
                    event = event.kind(),
                    panic = panic_message(&*payload),
                    "analysis job panicked"
                );
            }
            current = shared.next_for(scope);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Owns the worker pool. Dropping it without [`shutdown`](Self::shutdown)
/// stops intake but does not wait for queued jobs.
pub struct ReanalysisTrigger {
    auto_enabled: bool,
    shared: Arc<Shared>,
    tx: Option<Sender<LifecycleEvent>>,
    workers: Vec<JoinHandle<()>>,
}

impl ReanalysisTrigger {
    /// Spawns `workers` threads (at least one) that run jobs on `handle`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a worker thread cannot be spawned.
    pub fn start(
        handle: Handle,
        workers: usize,
        auto_enabled: bool,
        analyzer: Analyzer,
        store: SuggestionStore,
        diffs: Arc<dyn DiffSource>,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            analyzer,
            store,
            diffs,
            backlog: Mutex::new(HashMap::new()),
        });
        let (tx, rx) = crossbeam_channel::unbounded();

        let mut threads = Vec::with_capacity(workers.max(1));
        for i in 0..workers.max(1) {
            let shared = Arc::clone(&shared);
            let rx = rx.clone();
            let handle = handle.clone();
            threads.push(
                std::thread::Builder::new()
                    .name(format!("revgate-worker-{i}"))
                    .spawn(move || worker_loop(shared, rx, handle))?,
            );
        }

        Ok(Self { auto_enabled, shared, tx: Some(tx), workers: threads })
    }

    /// Queues `event` and returns immediately.
    ///
    /// Returns `false` when the event was dropped: automatic analysis is off
    /// or the pool is shutting down.
    pub fn submit(&self, event: LifecycleEvent) -> bool {
        let scope = event.pull_request().scope();
        if !self.auto_enabled {
            debug!(%scope, event = event.kind(), "automatic analysis disabled, ignoring event");
            return false;
        }
        let Some(tx) = &self.tx else {
            return false;
        };

        let mut backlog = self.shared.backlog();
        if let Some(waiting) = backlog.get_mut(&scope) {
            waiting.push_back(event);
            debug!(%scope, waiting = waiting.len(), "scope busy, event deferred");
            return true;
        }

        backlog.insert(scope, VecDeque::new());
        if let Err(e) = tx.send(event) {
            backlog.remove(&scope);
            warn!(%scope, error = %e, "worker pool gone, event dropped");
            return false;
        }
        true
    }

    /// Stops intake and blocks until every queued and deferred job has run.
    ///
    /// Blocking: from async code call it through `spawn_blocking`.
    pub fn shutdown(mut self) {
        drop(self.tx.take());
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("analysis worker panicked");
            }
        }
        info!("analysis pool drained");
    }
}
