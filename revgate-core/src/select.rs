//! Chooses which changed files an analysis pass looks at.
//!
//! Three rules, applied in order: drop excluded paths, drop unsupported
//! languages, keep the first `max_files` survivors. Input order is never
//! changed, so the same batch always selects the same files.

use crate::config::AnalysisSettings;
use crate::language;
use crate::types::FileDiff;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSelector {
    excluded_patterns: Vec<String>,
    supported_languages: Vec<String>,
    max_files: usize,
}

impl FileSelector {
    pub fn new(
        excluded_patterns: Vec<String>,
        supported_languages: Vec<String>,
        max_files: usize,
    ) -> Self {
        Self { excluded_patterns, supported_languages, max_files }
    }

    pub fn from_settings(settings: &AnalysisSettings) -> Self {
        Self::new(
            settings.excluded_patterns(),
            settings.supported_languages(),
            settings.max_files,
        )
    }

    pub fn select(&self, file_diffs: Vec<FileDiff>) -> Vec<FileDiff> {
        file_diffs
            .into_iter()
            .filter(|f| !self.is_excluded(&f.file_path))
            .filter(|f| self.is_supported(f))
            .take(self.max_files)
            .collect()
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded_patterns.iter().any(|p| pattern_matches(p, path))
    }

    /// Substring match of the file's language against the comma-joined
    /// supported list, ignoring case. An explicit `FileDiff::language` wins
    /// over extension detection.
    pub fn is_supported(&self, file: &FileDiff) -> bool {
        let language = file
            .language
            .as_deref()
            .unwrap_or_else(|| language::detect(&file.file_path))
            .to_lowercase();
        self.supported_languages.join(",").to_lowercase().contains(&language)
    }
}

/// `*.ext` patterns match by suffix (everything after the `*`); any other
/// pattern matches by suffix or substring.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return false;
    }
    match pattern.strip_prefix('*') {
        Some(suffix) if suffix.starts_with('.') => path.ends_with(suffix),
        _ => path.ends_with(pattern) || path.contains(pattern),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(diffs: &[FileDiff]) -> Vec<&str> {
        diffs.iter().map(|d| d.file_path.as_str()).collect()
    }

    fn batch(names: &[&str]) -> Vec<FileDiff> {
        names.iter().map(|n| FileDiff::new(*n, "+x")).collect()
    }

    fn selector(patterns: &[&str], max_files: usize) -> FileSelector {
        FileSelector::new(
            patterns.iter().map(|s| s.to_string()).collect(),
            vec!["java".into(), "javascript".into(), "typescript".into(), "python".into()],
            max_files,
        )
    }

    #[test]
    fn wildcard_patterns_match_by_suffix() {
        let picked = selector(&["*.min.js", "*.map"], 50)
            .select(batch(&["a.min.js", "a.js.map", "b.js"]));
        assert_eq!(paths(&picked), vec!["b.js"]);
    }

    #[test]
    fn plain_patterns_match_by_substring() {
        let picked = selector(&["vendor/", "package-lock.json"], 50).select(batch(&[
            "vendor/lib/x.js",
            "web/package-lock.json",
            "src/App.java",
        ]));
        assert_eq!(paths(&picked), vec!["src/App.java"]);
    }

    #[test]
    fn unsupported_languages_are_dropped() {
        let picked = selector(&[], 50).select(batch(&["main.go", "Main.java", "notes.txt"]));
        assert_eq!(paths(&picked), vec!["Main.java"]);
    }

    #[test]
    fn explicit_language_overrides_detection() {
        let mut diff = FileDiff::new("scripts/build", "+x");
        diff.language = Some("Python".into());
        let picked = selector(&[], 50).select(vec![diff]);
        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn cap_keeps_first_files_in_input_order() {
        let picked =
            selector(&[], 2).select(batch(&["c.py", "a.py", "b.py", "d.py"]));
        assert_eq!(paths(&picked), vec!["c.py", "a.py"]);
    }

    #[test]
    fn exclusion_runs_before_the_cap() {
        let picked = selector(&["*.min.js"], 2)
            .select(batch(&["x.min.js", "y.min.js", "a.js", "b.js", "c.js"]));
        assert_eq!(paths(&picked), vec!["a.js", "b.js"]);
    }

    #[test]
    fn identical_input_gives_identical_output() {
        let s = selector(&["*.map"], 3);
        let input = batch(&["a.ts", "b.map", "c.py", "d.java", "e.js"]);
        assert_eq!(s.select(input.clone()), s.select(input));
    }
}
