//! Merge gate decisions against a real store.

use revgate_core::db::SuggestionStore;
use revgate_core::gate::{GateDecision, MergeGate};
use revgate_core::types::{Category, ResolutionStatus, Scope, Severity, Suggestion};

async fn store_with_one_critical() -> (tempfile::TempDir, SuggestionStore, Scope, String) {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("gate.db").to_string_lossy().to_string();
    let store = SuggestionStore::open(&path).await.unwrap();
    let scope = Scope::new(12, 4);

    let mut critical = Suggestion::pending("src/Auth.java", Severity::Critical, Category::Security);
    critical.confidence = 0.95;
    let warning = Suggestion::pending("src/Auth.java", Severity::Warning, Category::BugRisk);
    let saved = store.save(scope, vec![critical, warning]).await.unwrap();
    let id = saved
        .iter()
        .find(|s| s.severity == Severity::Critical)
        .and_then(|s| s.id.clone())
        .unwrap();
    (dir, store, scope, id)
}

#[tokio::test]
async fn threshold_zero_denies_one_unresolved_critical() {
    let (_dir, store, scope, _) = store_with_one_critical().await;
    let decision = MergeGate::new(true, 0).check(&store, scope).await.unwrap();

    match decision {
        GateDecision::Deny { critical_count, threshold, reason } => {
            assert_eq!(critical_count, 1);
            assert_eq!(threshold, 0);
            assert!(reason.contains('1') && reason.contains('0'), "{reason}");
        }
        other => panic!("expected deny, got {other:?}"),
    }
}

#[tokio::test]
async fn threshold_one_allows_one_unresolved_critical() {
    let (_dir, store, scope, _) = store_with_one_critical().await;
    let decision = MergeGate::new(true, 1).check(&store, scope).await.unwrap();

    let GateDecision::Allow { stats: Some(stats) } = decision else {
        panic!("expected allow with stats, got {decision:?}");
    };
    assert_eq!(stats.total, 2);
    assert_eq!(stats.critical, 1);
    assert_eq!(stats.pending, 2);
}

#[tokio::test]
async fn resolved_critical_does_not_block() {
    let (_dir, store, scope, id) = store_with_one_critical().await;
    store.update_status(&id, ResolutionStatus::Accepted, "reviewer").await.unwrap();

    assert!(MergeGate::new(true, 1).check(&store, scope).await.unwrap().is_allowed());
    assert!(MergeGate::new(true, 0).check(&store, scope).await.unwrap().is_allowed());
}

#[tokio::test]
async fn disabled_gate_allows_without_reading() {
    let (_dir, store, scope, _) = store_with_one_critical().await;
    let decision = MergeGate::new(false, 0).check(&store, scope).await.unwrap();
    assert_eq!(decision, GateDecision::Allow { stats: None });
}

#[tokio::test]
async fn every_check_reads_current_state() {
    let (_dir, store, scope, _) = store_with_one_critical().await;
    let gate = MergeGate::new(true, 0);
    assert!(!gate.check(&store, scope).await.unwrap().is_allowed());

    store.delete_all(scope).await.unwrap();
    assert!(gate.check(&store, scope).await.unwrap().is_allowed());
}

#[test]
fn decision_serializes_with_tag() {
    let deny = GateDecision::Deny { critical_count: 2, threshold: 0, reason: "no".into() };
    let json = serde_json::to_value(&deny).unwrap();
    assert_eq!(json["decision"], "deny");
    assert_eq!(json["criticalCount"], 2);
}
