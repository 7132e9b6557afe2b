//! Merge gate: allow or deny a merge from the current unresolved-critical count.
//!
//! Stateless. Every check re-reads the store.

use serde::Serialize;
use tracing::info;

use crate::config::MergeCheckSettings;
use crate::db::SuggestionStore;
use crate::error::StoreError;
use crate::types::{Scope, SuggestionStats};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "camelCase")]
pub enum GateDecision {
    /// `stats` is `None` when the gate is disabled and nothing was read.
    Allow { stats: Option<SuggestionStats> },
    #[serde(rename_all = "camelCase")]
    Deny { critical_count: usize, threshold: usize, reason: String },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeGate {
    enabled: bool,
    max_critical: usize,
}

impl MergeGate {
    pub fn new(enabled: bool, max_critical: usize) -> Self {
        Self { enabled, max_critical }
    }

    pub fn from_settings(settings: &MergeCheckSettings) -> Self {
        Self::new(settings.enabled, settings.max_critical)
    }

    /// # Errors
    ///
    /// Returns `StoreError` if the critical count or stats cannot be read.
    pub async fn check(
        &self,
        store: &SuggestionStore,
        scope: Scope,
    ) -> Result<GateDecision, StoreError> {
        if !self.enabled {
            return Ok(GateDecision::Allow { stats: None });
        }

        let critical_count = store.count_critical(scope).await?;
        if critical_count > self.max_critical {
            let reason = format!(
                "{critical_count} unresolved critical suggestion(s) exceed the allowed maximum of {}. \
                 Resolve them before merging.",
                self.max_critical
            );
            info!(%scope, critical_count, threshold = self.max_critical, "merge denied");
            return Ok(GateDecision::Deny {
                critical_count,
                threshold: self.max_critical,
                reason,
            });
        }

        let stats = store.stats(scope).await?;
        info!(
            %scope,
            total = stats.total,
            pending = stats.pending,
            critical = stats.critical,
            "merge allowed"
        );
        Ok(GateDecision::Allow { stats: Some(stats) })
    }
}
