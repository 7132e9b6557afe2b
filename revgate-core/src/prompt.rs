//! Prompt text sent to the model.
//!
//! The system instruction is a fixed constant; only the user prompt varies,
//! and it is a pure function of the file diff and language tag.

use std::fmt::Write as _;

use crate::types::FileDiff;

pub const SYSTEM_PROMPT: &str = r#"You are an expert code reviewer. Analyse the given code diff and reply with improvement suggestions as a JSON array.

Every suggestion must be an object of this shape:
{
  "filePath": "path of the file",
  "startLine": first line number,
  "endLine": last line number,
  "originalCode": "the code as written",
  "suggestedCode": "the improved code",
  "explanation": "why the change is an improvement",
  "severity": "CRITICAL|WARNING|INFO|HINT",
  "category": "SECURITY|PERFORMANCE|BUG_RISK|CODE_STYLE|BEST_PRACTICE|DUPLICATION|COMPLEXITY|ERROR_HANDLING",
  "confidence": number between 0.0 and 1.0
}

Categories:
1. SECURITY: injection, XSS, path traversal, hard-coded secrets.
2. PERFORMANCE: N+1 queries, redundant loops, leaks, inefficient algorithms.
3. BUG_RISK: null dereference, races, resource leaks, wrong logic.
4. CODE_STYLE: naming, formatting, consistency.
5. BEST_PRACTICE: design patterns, SOLID, idiomatic APIs.
6. DUPLICATION: repeated code, extractable helpers.
7. COMPLEXITY: cyclomatic complexity, nesting depth, long functions.
8. ERROR_HANDLING: missing handling, over-broad catches, swallowed errors.

Rules:
- Only review lines that appear in the diff.
- Lower the confidence when unsure.
- Higher severity should come with higher confidence.
- Suggested code must be runnable as written.
- Respond with a JSON array only, no other text."#;

/// Renders the per-file user prompt.
///
/// The full file content is appended as reference context only when present
/// and non-empty.
pub fn build_user_prompt(file: &FileDiff, language: &str) -> String {
    let mut out = String::with_capacity(file.diff_text.len() + 256);

    out.push_str("## File under review\n\n");
    let _ = writeln!(out, "- **Path**: {}", file.file_path);
    let _ = writeln!(out, "- **Language**: {language}\n");

    out.push_str("## Diff\n\n```diff\n");
    out.push_str(&file.diff_text);
    out.push_str("\n```\n\n");

    if let Some(content) = file.full_content.as_deref().filter(|c| !c.is_empty()) {
        let _ = writeln!(out, "## Full file (context only)\n\n```{language}");
        out.push_str(content);
        out.push_str("\n```\n\n");
    }

    out.push_str("Review the change above and return your suggestions as a JSON array.");
    out
}
