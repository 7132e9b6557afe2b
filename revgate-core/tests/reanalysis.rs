//! Background re-analysis: worker pool, delete-then-save, per-scope ordering.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use revgate_core::analysis::Analyzer;
use revgate_core::config::AnalysisSettings;
use revgate_core::db::SuggestionStore;
use revgate_core::error::{DiffError, LlmError};
use revgate_core::llm::{ChatModel, ChatRequest};
use revgate_core::trigger::{DiffSource, LifecycleEvent, PullRequestRef, ReanalysisTrigger};
use revgate_core::types::{Category, FileDiff, Scope, Severity, Suggestion};

/// Numbers every call so tests can tell analysis passes apart.
#[derive(Default)]
struct CountingModel {
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl ChatModel for CountingModel {
    async fn chat(&self, _request: ChatRequest) -> Result<String, LlmError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        // Worker threads are dedicated, so blocking here only holds this job.
        std::thread::sleep(self.delay);
        let pass = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(format!(
            r#"[{{"severity":"WARNING","category":"BUG_RISK","confidence":0.9,"explanation":"pass-{pass}"}}]"#
        ))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Panics on its first call, then answers like a healthy model.
#[derive(Default)]
struct FlakyModel {
    calls: AtomicUsize,
}

#[async_trait]
impl ChatModel for FlakyModel {
    async fn chat(&self, _request: ChatRequest) -> Result<String, LlmError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("model client crashed");
        }
        Ok(r#"[{"severity":"INFO","category":"CODE_STYLE","confidence":0.8,"explanation":"recovered"}]"#.to_string())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// One Java file per change request; ids listed in `broken` fail extraction.
#[derive(Default)]
struct FakeDiffs {
    broken: HashSet<i64>,
    requested: Mutex<Vec<i64>>,
}

impl DiffSource for FakeDiffs {
    fn file_diffs(&self, pr: &PullRequestRef) -> Result<Vec<FileDiff>, DiffError> {
        self.requested.lock().unwrap().push(pr.change_request_id);
        if self.broken.contains(&pr.change_request_id) {
            return Err(DiffError::Source("unknown revision".into()));
        }
        Ok(vec![FileDiff::new("src/Service.java", "+call();")])
    }
}

fn pr(id: i64) -> PullRequestRef {
    PullRequestRef {
        change_request_id: id,
        repository_id: 1,
        project_key: "P".into(),
        repo_slug: "r".into(),
        from_ref: "feature".into(),
        to_ref: "main".into(),
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    store: SuggestionStore,
    model: Arc<CountingModel>,
    diffs: Arc<FakeDiffs>,
}

impl Harness {
    async fn new(model: CountingModel, diffs: FakeDiffs) -> Self {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("reanalysis.db").to_string_lossy().to_string();
        let store = SuggestionStore::open(&path).await.unwrap();
        Self { _dir: dir, store, model: Arc::new(model), diffs: Arc::new(diffs) }
    }

    fn trigger(&self, workers: usize, auto_enabled: bool) -> ReanalysisTrigger {
        let analyzer = Analyzer::new(self.model.clone(), &AnalysisSettings::default());
        ReanalysisTrigger::start(
            tokio::runtime::Handle::current(),
            workers,
            auto_enabled,
            analyzer,
            self.store.clone(),
            self.diffs.clone(),
        )
        .unwrap()
    }
}

async fn drain(trigger: ReanalysisTrigger) {
    tokio::task::spawn_blocking(move || trigger.shutdown()).await.unwrap();
}

async fn explanations(store: &SuggestionStore, scope: Scope) -> Vec<String> {
    store.list(scope).await.unwrap().into_iter().map(|s| s.explanation).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn opened_event_analyzes_and_saves() {
    let h = Harness::new(CountingModel::default(), FakeDiffs::default()).await;
    let trigger = h.trigger(2, true);

    assert!(trigger.submit(LifecycleEvent::Opened(pr(1))));
    drain(trigger).await;

    let saved = h.store.list(pr(1).scope()).await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].file_path, "src/Service.java");
    assert!(saved[0].id.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn updated_event_replaces_stale_suggestions() {
    let h = Harness::new(CountingModel::default(), FakeDiffs::default()).await;
    let scope = pr(2).scope();
    let mut stale = Suggestion::pending("src/Old.java", Severity::Critical, Category::Security);
    stale.explanation = "stale".into();
    h.store.save(scope, vec![stale]).await.unwrap();

    let trigger = h.trigger(2, true);
    assert!(trigger.submit(LifecycleEvent::Updated(pr(2))));
    drain(trigger).await;

    assert_eq!(explanations(&h.store, scope).await, vec!["pass-1"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn back_to_back_events_leave_only_the_latest_pass() {
    let model = CountingModel { delay: Duration::from_millis(30), ..CountingModel::default() };
    let h = Harness::new(model, FakeDiffs::default()).await;
    let trigger = h.trigger(3, true);

    assert!(trigger.submit(LifecycleEvent::Opened(pr(3))));
    assert!(trigger.submit(LifecycleEvent::Updated(pr(3))));
    assert!(trigger.submit(LifecycleEvent::Updated(pr(3))));
    drain(trigger).await;

    assert_eq!(h.model.calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.model.peak.load(Ordering::SeqCst), 1, "one scope never runs twice at once");
    assert_eq!(explanations(&h.store, pr(3).scope()).await, vec!["pass-3"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pool_size_bounds_concurrent_model_calls() {
    let model = CountingModel { delay: Duration::from_millis(25), ..CountingModel::default() };
    let h = Harness::new(model, FakeDiffs::default()).await;
    let trigger = h.trigger(2, true);

    for id in 10..16 {
        assert!(trigger.submit(LifecycleEvent::Opened(pr(id))));
    }
    drain(trigger).await;

    assert_eq!(h.model.calls.load(Ordering::SeqCst), 6);
    assert!(h.model.peak.load(Ordering::SeqCst) <= 2);
    for id in 10..16 {
        assert_eq!(h.store.list(pr(id).scope()).await.unwrap().len(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disabled_auto_analysis_ignores_events() {
    let h = Harness::new(CountingModel::default(), FakeDiffs::default()).await;
    let trigger = h.trigger(1, false);

    assert!(!trigger.submit(LifecycleEvent::Opened(pr(4))));
    assert!(!trigger.submit(LifecycleEvent::Updated(pr(4))));
    drain(trigger).await;

    assert!(h.diffs.requested.lock().unwrap().is_empty());
    assert!(h.store.list(pr(4).scope()).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn extraction_failure_is_contained_to_its_job() {
    let diffs = FakeDiffs { broken: HashSet::from([5]), ..FakeDiffs::default() };
    let h = Harness::new(CountingModel::default(), diffs).await;
    let trigger = h.trigger(1, true);

    assert!(trigger.submit(LifecycleEvent::Opened(pr(5))));
    assert!(trigger.submit(LifecycleEvent::Opened(pr(6))));
    drain(trigger).await;

    assert!(h.store.list(pr(5).scope()).await.unwrap().is_empty());
    assert_eq!(h.store.list(pr(6).scope()).await.unwrap().len(), 1);
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_job_releases_its_scope_and_worker() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("panic.db").to_string_lossy().to_string();
    let store = SuggestionStore::open(&path).await.unwrap();
    let model = Arc::new(FlakyModel::default());
    let analyzer = Analyzer::new(model.clone(), &AnalysisSettings::default());
    let trigger = ReanalysisTrigger::start(
        tokio::runtime::Handle::current(),
        1,
        true,
        analyzer,
        store.clone(),
        Arc::new(FakeDiffs::default()),
    )
    .unwrap();

    // The update waits in the backlog behind the job that panics.
    assert!(trigger.submit(LifecycleEvent::Opened(pr(7))));
    assert!(trigger.submit(LifecycleEvent::Updated(pr(7))));
    // Only one worker: this runs only if it survived the panic.
    assert!(trigger.submit(LifecycleEvent::Opened(pr(8))));
    drain(trigger).await;

    assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    assert_eq!(explanations(&store, pr(7).scope()).await, vec!["recovered"]);
    assert_eq!(explanations(&store, pr(8).scope()).await, vec!["recovered"]);
}

#[test]
fn lifecycle_event_wire_format() {
    let raw = r#"{"event":"updated","pullRequest":{"changeRequestId":9,"repositoryId":2,
                 "fromRef":"refs/heads/feature","toRef":"refs/heads/main"}}"#;
    let event: LifecycleEvent = serde_json::from_str(raw).unwrap();
    let LifecycleEvent::Updated(pr) = event else {
        panic!("expected updated");
    };
    assert_eq!(pr.scope(), Scope::new(9, 2));
    assert_eq!(pr.project_key, "");
}
