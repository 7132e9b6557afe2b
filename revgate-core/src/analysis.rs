//! The analysis orchestrator.
//!
//! `analyze` runs select -> (detect, prompt, chat, parse) per file ->
//! options filter -> confidence filter -> rank -> summarize. Files are
//! processed one after another; a file whose pipeline fails contributes
//! nothing and the batch carries on.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::AnalysisSettings;
use crate::db::SuggestionStore;
use crate::error::{AnalysisError, LlmError, StoreError};
use crate::language;
use crate::llm::{ChatMessage, ChatModel, ChatRequest};
use crate::parse::parse_suggestions;
use crate::prompt::{SYSTEM_PROMPT, build_user_prompt};
use crate::rank;
use crate::select::FileSelector;
use crate::types::{AnalysisRequest, AnalysisResponse, FileDiff, Suggestion};

impl AnalysisRequest {
    /// Checks the request before any file is touched.
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::InvalidRequest` for a non-positive id or an
    /// options `min_confidence` outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.change_request_id <= 0 {
            return Err(AnalysisError::InvalidRequest(format!(
                "changeRequestId must be positive, got {}",
                self.change_request_id
            )));
        }
        if self.repository_id <= 0 {
            return Err(AnalysisError::InvalidRequest(format!(
                "repositoryId must be positive, got {}",
                self.repository_id
            )));
        }
        if let Some(min) = self.options.min_confidence {
            if !(0.0..=1.0).contains(&min) {
                return Err(AnalysisError::InvalidRequest(format!(
                    "options.minConfidence must be within [0, 1], got {min}"
                )));
            }
        }
        Ok(())
    }
}

pub struct Analyzer {
    model: Arc<dyn ChatModel>,
    selector: FileSelector,
    min_confidence: f64,
    max_file_size_bytes: usize,
}

impl Analyzer {
    pub fn new(model: Arc<dyn ChatModel>, settings: &AnalysisSettings) -> Self {
        Self {
            model,
            selector: FileSelector::from_settings(settings),
            min_confidence: settings.min_confidence,
            max_file_size_bytes: settings.max_file_size_bytes(),
        }
    }

    /// Analyses every selected file of `request` and returns the ranked,
    /// summarised batch. Nothing is persisted.
    ///
    /// `success` is false only when the request fails validation; per-file
    /// failures are logged and leave `success` untouched.
    pub async fn analyze(&self, request: &AnalysisRequest) -> AnalysisResponse {
        let started = Instant::now();
        let scope = request.scope();

        if let Err(e) = request.validate() {
            warn!(%scope, error = %e, "analysis request rejected");
            return AnalysisResponse {
                change_request_id: request.change_request_id,
                repository_id: request.repository_id,
                error: Some(e.to_string()),
                elapsed_ms: elapsed_ms(started),
                ..AnalysisResponse::default()
            };
        }

        let selected = self.selector.select(request.file_diffs.clone());
        debug!(%scope, offered = request.file_diffs.len(), selected = selected.len(), "files selected");

        let mut collected = Vec::new();
        for file in &selected {
            let Some(file) = self.fit_to_size_limit(file) else {
                continue;
            };
            let language = file
                .language
                .clone()
                .unwrap_or_else(|| language::detect(&file.file_path).to_owned());

            match self.run_file(&file, &language).await {
                Ok(found) => collected.extend(found),
                Err(e) => warn!(%scope, file = %file.file_path, error = %e, "file analysis failed"),
            }
        }

        collected.retain(|s| request.options.allows(s.category));
        for s in &mut collected {
            s.change_request_id = scope.change_request_id;
            s.repository_id = scope.repository_id;
        }

        let min_confidence = request.options.min_confidence.unwrap_or(self.min_confidence);
        let mut suggestions = rank::filter_by_confidence(collected, min_confidence);
        rank::rank(&mut suggestions);
        let summary = rank::summarize(selected.len(), &suggestions);

        info!(
            %scope,
            files = summary.total_files,
            suggestions = summary.total_suggestions,
            critical = summary.critical_count,
            score = summary.overall_score,
            "analysis complete"
        );

        AnalysisResponse {
            success: true,
            change_request_id: request.change_request_id,
            repository_id: request.repository_id,
            suggestions,
            summary: Some(summary),
            error: None,
            elapsed_ms: elapsed_ms(started),
        }
    }

    /// Single-file pipeline with no selection, filtering or ranking.
    ///
    /// A model failure comes back as `success = false` with the error text.
    pub async fn analyze_file(&self, file: &FileDiff, language: &str) -> AnalysisResponse {
        let started = Instant::now();
        match self.run_file(file, language).await {
            Ok(suggestions) => AnalysisResponse {
                success: true,
                suggestions,
                elapsed_ms: elapsed_ms(started),
                ..AnalysisResponse::default()
            },
            Err(e) => {
                warn!(file = %file.file_path, error = %e, "file analysis failed");
                AnalysisResponse {
                    error: Some(e.to_string()),
                    elapsed_ms: elapsed_ms(started),
                    ..AnalysisResponse::default()
                }
            }
        }
    }

    /// Runs [`analyze`](Self::analyze) and, on success, saves the batch.
    ///
    /// The returned response carries the stored suggestions (with ids); an
    /// item the store refused is missing from it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the save transaction fails as a whole.
    pub async fn analyze_and_save(
        &self,
        store: &SuggestionStore,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResponse, StoreError> {
        let mut response = self.analyze(request).await;
        if response.success {
            let batch = std::mem::take(&mut response.suggestions);
            response.suggestions = store.save(request.scope(), batch).await?;
        }
        Ok(response)
    }

    async fn run_file(&self, file: &FileDiff, language: &str) -> Result<Vec<Suggestion>, LlmError> {
        let request = ChatRequest::new(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(build_user_prompt(file, language)),
        ]);
        let reply = self.model.chat(request).await?;
        let suggestions = parse_suggestions(&reply, &file.file_path);
        debug!(file = %file.file_path, language, found = suggestions.len(), "file analysed");
        Ok(suggestions)
    }

    /// `None` when the diff alone is over the limit. When only the full-file
    /// context pushes it over, the context is dropped.
    fn fit_to_size_limit<'a>(&self, file: &'a FileDiff) -> Option<Cow<'a, FileDiff>> {
        let diff_len = file.diff_text.len();
        if diff_len > self.max_file_size_bytes {
            warn!(
                file = %file.file_path,
                bytes = diff_len,
                limit = self.max_file_size_bytes,
                "diff exceeds size limit, skipping file"
            );
            return None;
        }
        let context_len = file.full_content.as_ref().map_or(0, String::len);
        if diff_len + context_len > self.max_file_size_bytes {
            debug!(file = %file.file_path, "dropping full-file context to stay under size limit");
            return Some(Cow::Owned(FileDiff { full_content: None, ..file.clone() }));
        }
        Some(Cow::Borrowed(file))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
