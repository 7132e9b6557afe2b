use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StatusParseError;

/// The `(change request, repository)` pair every stored suggestion is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub change_request_id: i64,
    pub repository_id: i64,
}

impl Scope {
    pub fn new(change_request_id: i64, repository_id: i64) -> Self {
        Self { change_request_id, repository_id }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PR #{} (repo={})", self.change_request_id, self.repository_id)
    }
}

/// How serious a finding is.
///
/// Variant order is the ranking order: `Critical` sorts first. Anything the
/// model sends that is not one of the four names becomes `Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    Warning,
    Info,
    Hint,
}

impl Severity {
    pub const ALL: [Severity; 4] =
        [Severity::Critical, Severity::Warning, Severity::Info, Severity::Hint];

    /// Case-insensitive lookup that falls back to `Info` on anything unknown.
    pub fn parse_or_default(raw: &str) -> Self {
        let upper = raw.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|s| s.as_str() == upper)
            .unwrap_or(Severity::Info)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
            Severity::Hint => "HINT",
        }
    }
}

/// What kind of problem a finding describes.
///
/// Unknown names from the model become `BestPractice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Security,
    Performance,
    BugRisk,
    CodeStyle,
    BestPractice,
    Duplication,
    Complexity,
    ErrorHandling,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Security,
        Category::Performance,
        Category::BugRisk,
        Category::CodeStyle,
        Category::BestPractice,
        Category::Duplication,
        Category::Complexity,
        Category::ErrorHandling,
    ];

    /// Case-insensitive lookup that falls back to `BestPractice` on anything unknown.
    pub fn parse_or_default(raw: &str) -> Self {
        let upper = raw.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == upper)
            .unwrap_or(Category::BestPractice)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Security => "SECURITY",
            Category::Performance => "PERFORMANCE",
            Category::BugRisk => "BUG_RISK",
            Category::CodeStyle => "CODE_STYLE",
            Category::BestPractice => "BEST_PRACTICE",
            Category::Duplication => "DUPLICATION",
            Category::Complexity => "COMPLEXITY",
            Category::ErrorHandling => "ERROR_HANDLING",
        }
    }
}

/// Lifecycle state of a stored suggestion. Every suggestion starts `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuggestionStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
    Dismissed,
}

impl SuggestionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SuggestionStatus::Pending => "PENDING",
            SuggestionStatus::Accepted => "ACCEPTED",
            SuggestionStatus::Rejected => "REJECTED",
            SuggestionStatus::Dismissed => "DISMISSED",
        }
    }

    /// Maps a stored column value back to a status. The schema's CHECK
    /// constraint keeps the column inside the four names.
    pub(crate) fn from_column(raw: &str) -> Self {
        match raw {
            "ACCEPTED" => SuggestionStatus::Accepted,
            "REJECTED" => SuggestionStatus::Rejected,
            "DISMISSED" => SuggestionStatus::Dismissed,
            _ => SuggestionStatus::Pending,
        }
    }
}

/// The subset of statuses a caller may move a suggestion into.
///
/// `Pending` is deliberately absent: resolution is one-way through the
/// status-update command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStatus {
    Accepted,
    Rejected,
    Dismissed,
}

impl From<ResolutionStatus> for SuggestionStatus {
    fn from(status: ResolutionStatus) -> Self {
        match status {
            ResolutionStatus::Accepted => SuggestionStatus::Accepted,
            ResolutionStatus::Rejected => SuggestionStatus::Rejected,
            ResolutionStatus::Dismissed => SuggestionStatus::Dismissed,
        }
    }
}

impl FromStr for ResolutionStatus {
    type Err = StatusParseError;

    /// Accepts `accepted`, `rejected` or `dismissed` in any letter case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ACCEPTED" => Ok(ResolutionStatus::Accepted),
            "REJECTED" => Ok(ResolutionStatus::Rejected),
            "DISMISSED" => Ok(ResolutionStatus::Dismissed),
            _ => Err(StatusParseError(s.to_owned())),
        }
    }
}

/// Who resolved a suggestion and when. Both halves always travel together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub resolved_by: String,
    pub resolved_at: i64,     // Unix timestamp seconds
}

/// One structured finding about a range of lines in a changed file.
///
/// `id` and `created_at` are `None` until the store persists the suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub id: Option<String>,   // UUID v4 text
    pub change_request_id: i64,
    pub repository_id: i64,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub original_code: String,
    pub suggested_code: String,
    pub explanation: String,
    pub severity: Severity,
    pub category: Category,
    pub confidence: f64,      // always within [0.0, 1.0]
    pub status: SuggestionStatus,
    pub created_at: Option<i64>,
    #[serde(flatten)]
    pub resolution: Option<Resolution>,
}

impl Suggestion {
    /// A fresh, unscoped, pending suggestion for `file_path`.
    pub fn pending(file_path: impl Into<String>, severity: Severity, category: Category) -> Self {
        Self {
            id: None,
            change_request_id: 0,
            repository_id: 0,
            file_path: file_path.into(),
            start_line: 0,
            end_line: 0,
            original_code: String::new(),
            suggested_code: String::new(),
            explanation: String::new(),
            severity,
            category,
            confidence: 0.5,
            status: SuggestionStatus::Pending,
            created_at: None,
            resolution: None,
        }
    }
}

/// A new-file line range touched by one diff hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HunkRange {
    pub start_line: u32,
    pub end_line: u32,
}

/// The changed lines of one file, as handed to a single analysis pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDiff {
    pub file_path: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(alias = "diff")]
    pub diff_text: String,
    #[serde(default)]
    pub full_content: Option<String>,
    #[serde(default)]
    pub hunks: Vec<HunkRange>,
}

impl FileDiff {
    pub fn new(file_path: impl Into<String>, diff_text: impl Into<String>) -> Self {
        Self { file_path: file_path.into(), diff_text: diff_text.into(), ..Self::default() }
    }

    pub fn with_full_content(mut self, content: impl Into<String>) -> Self {
        self.full_content = Some(content.into());
        self
    }
}

/// Per-request switches. Every check is on unless the caller turns it off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisOptions {
    pub check_security: bool,
    pub check_performance: bool,
    pub check_style: bool,
    pub check_best_practice: bool,
    pub check_error_handling: bool,
    /// Overrides the configured minimum confidence for this request only.
    pub min_confidence: Option<f64>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            check_security: true,
            check_performance: true,
            check_style: true,
            check_best_practice: true,
            check_error_handling: true,
            min_confidence: None,
        }
    }
}

impl AnalysisOptions {
    /// Whether findings of `category` survive this request's switches.
    /// Bug risk, duplication and complexity have no switch and always pass.
    pub fn allows(&self, category: Category) -> bool {
        match category {
            Category::Security => self.check_security,
            Category::Performance => self.check_performance,
            Category::CodeStyle => self.check_style,
            Category::BestPractice => self.check_best_practice,
            Category::ErrorHandling => self.check_error_handling,
            Category::BugRisk | Category::Duplication | Category::Complexity => true,
        }
    }
}

/// Everything one `analyze` call needs. Built per invocation, never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub change_request_id: i64,
    pub repository_id: i64,
    #[serde(default)]
    pub project_key: String,
    #[serde(default)]
    pub repo_slug: String,
    #[serde(default)]
    pub file_diffs: Vec<FileDiff>,
    #[serde(default)]
    pub options: AnalysisOptions,
}

impl AnalysisRequest {
    pub fn scope(&self) -> Scope {
        Scope::new(self.change_request_id, self.repository_id)
    }
}

/// Aggregate view over one ranked suggestion batch. Always recomputed, never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub total_files: usize,
    pub total_suggestions: usize,
    pub critical_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
    pub hint_count: usize,
    pub category_breakdown: BTreeMap<Category, usize>,
    pub overall_score: f64,   // 0-100, higher is cleaner
}

/// Result of `analyze` or `analyze_file`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub success: bool,
    pub change_request_id: i64,
    pub repository_id: i64,
    pub suggestions: Vec<Suggestion>,
    pub summary: Option<AnalysisSummary>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Tallies over the stored suggestions of one scope, computed on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionStats {
    pub total: usize,
    pub pending: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub dismissed: usize,
    pub critical: usize,
    pub warning: usize,
}
