//! Tree-to-tree diffs rendered as reviewable text.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use git2::{Delta, Diff, DiffOptions, Oid, Repository, Tree};
use revgate_core::error::DiffError;
use revgate_core::trigger::{DiffSource, PullRequestRef};
use revgate_core::types::{FileDiff, HunkRange};
use tracing::{debug, warn};

fn source_error(e: git2::Error) -> DiffError {
    DiffError::Source(Box::new(e))
}

/// Reads diffs from the repository at `repo_path`.
#[derive(Debug, Clone)]
pub struct GitDiffSource {
    repo_path: PathBuf,
    include_full_content: bool,
    max_content_bytes: usize,
}

impl GitDiffSource {
    pub fn new(repo_path: impl Into<PathBuf>, include_full_content: bool, max_content_bytes: usize) -> Self {
        Self { repo_path: repo_path.into(), include_full_content, max_content_bytes }
    }

    /// Diffs `to_ref` (base) against `from_ref` (head).
    ///
    /// # Errors
    ///
    /// Returns `DiffError` if the repository cannot be opened, either ref does
    /// not resolve to a commit, or the diff cannot be walked.
    pub fn diff_refs(&self, from_ref: &str, to_ref: &str) -> Result<Vec<FileDiff>, DiffError> {
        let repo = Repository::open(&self.repo_path).map_err(source_error)?;
        let base = resolve_tree(&repo, to_ref).map_err(source_error)?;
        let head = resolve_tree(&repo, from_ref).map_err(source_error)?;

        let mut opts = DiffOptions::new();
        let diff = repo
            .diff_tree_to_tree(Some(&base), Some(&head), Some(&mut opts))
            .map_err(source_error)?;

        let mut out = Vec::new();
        for file in render_files(&diff).map_err(source_error)? {
            if file.text.is_empty() {
                debug!(file = %file.path, "no textual changes, skipping");
                continue;
            }
            let mut file_diff = FileDiff::new(file.path, file.text);
            file_diff.hunks = file.hunks;
            if self.include_full_content {
                match self.read_content(&repo, file.new_id) {
                    Ok(content) => file_diff.full_content = content,
                    Err(e) => {
                        warn!(file = %file_diff.file_path, error = %e, "could not read file content, skipping file");
                        continue;
                    }
                }
            }
            out.push(file_diff);
        }
        Ok(out)
    }

    /// New-side blob as text; `None` when it is not UTF-8 or over the size limit.
    fn read_content(&self, repo: &Repository, id: Oid) -> Result<Option<String>, git2::Error> {
        let blob = repo.find_blob(id)?;
        if blob.size() > self.max_content_bytes {
            return Ok(None);
        }
        Ok(std::str::from_utf8(blob.content()).ok().map(str::to_owned))
    }
}

impl DiffSource for GitDiffSource {
    fn file_diffs(&self, pull_request: &PullRequestRef) -> Result<Vec<FileDiff>, DiffError> {
        self.diff_refs(&pull_request.from_ref, &pull_request.to_ref)
    }
}

fn resolve_tree<'r>(repo: &'r Repository, rev: &str) -> Result<Tree<'r>, git2::Error> {
    repo.revparse_single(rev)?.peel_to_commit()?.tree()
}

/// One changed file as collected from the diff callbacks.
struct RenderedFile {
    path: String,
    new_id: Oid,
    text: String,
    hunks: Vec<HunkRange>,
}

/// Walks every delta, hunk and line, rendering each line with its
/// `+`/`-`/` ` origin prefix. Deleted files are left out.
///
/// The callbacks run sequentially on this thread, so a `RefCell` is enough
/// to share the accumulator between them.
fn render_files(diff: &Diff<'_>) -> Result<Vec<RenderedFile>, git2::Error> {
    let files: RefCell<Vec<RenderedFile>> = RefCell::new(Vec::new());
    // False while inside a deleted file, whose hunks and lines are ignored.
    let current_kept = RefCell::new(false);

    diff.foreach(
        &mut |delta, _progress| {
            let keep = delta.status() != Delta::Deleted;
            *current_kept.borrow_mut() = keep;
            if keep {
                let path = delta
                    .new_file()
                    .path()
                    .unwrap_or(Path::new("unknown"))
                    .to_string_lossy()
                    .into_owned();
                files.borrow_mut().push(RenderedFile {
                    path,
                    new_id: delta.new_file().id(),
                    text: String::new(),
                    hunks: Vec::new(),
                });
            }
            true
        },
        None,
        Some(&mut |_delta, hunk| {
            if *current_kept.borrow() {
                if let Some(f) = files.borrow_mut().last_mut() {
                    let start = hunk.new_start();
                    let end = start + hunk.new_lines().saturating_sub(1);
                    f.hunks.push(HunkRange { start_line: start, end_line: end });
                }
            }
            true
        }),
        Some(&mut |_delta, _hunk, line| {
            if !*current_kept.borrow() {
                return true;
            }
            let origin = line.origin();
            if !matches!(origin, '+' | '-' | ' ') {
                return true;
            }
            if let Some(f) = files.borrow_mut().last_mut() {
                f.text.push(origin);
                f.text.push_str(&String::from_utf8_lossy(line.content()));
                if !f.text.ends_with('\n') {
                    f.text.push('\n');
                }
            }
            true
        }),
    )?;

    let mut files = files.into_inner();
    for f in &mut files {
        let trimmed = f.text.trim_end_matches('\n').len();
        f.text.truncate(trimmed);
    }
    Ok(files)
}
