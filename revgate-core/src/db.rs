//! The suggestion store: persistence and lifecycle for [`Suggestion`]s.
//!
//! Every operation except the id-keyed ones is scoped by a [`Scope`]. Each
//! call is atomic on its own; nothing here spans an analyze-and-save sequence.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{OptionalExtension, Row};
use tokio_rusqlite::Connection;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::types::{
    Category, Resolution, ResolutionStatus, Scope, Severity, Suggestion, SuggestionStats,
    SuggestionStatus,
};

const COLUMNS: &str = "id, change_request_id, repository_id, file_path, start_line, end_line,
     original_code, suggested_code, explanation, severity, category, confidence,
     status, created_at, resolved_by, resolved_at";

/// Severity rank as SQL, matching `Severity`'s `Ord`.
const SEVERITY_RANK: &str = "CASE severity
         WHEN 'CRITICAL' THEN 0
         WHEN 'WARNING'  THEN 1
         WHEN 'INFO'     THEN 2
         ELSE 3
     END";

/// Opens (or creates) the SQLite database at `path`, configures WAL mode,
/// and applies schema migrations via the `schema_version` table.
///
/// `busy_timeout` is set through the `Connection` method rather than a PRAGMA
/// string so it takes effect regardless of pragma caching.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the file cannot be opened, WAL configuration
/// fails, or schema DDL fails.
pub async fn open_db(path: &str) -> Result<Connection, tokio_rusqlite::Error> {
    let conn = Connection::open(path).await?;

    conn.call(|db| {
        db.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;
        db.busy_timeout(Duration::from_secs(5))?;
        // Fold any WAL left behind by a killed process back into the main file.
        db.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        crate::schema::migrate(db)?;
        Ok::<_, rusqlite::Error>(())
    })
    .await?;

    Ok(conn)
}

/// Returns the current Unix timestamp in seconds.
fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn suggestion_from_row(r: &Row<'_>) -> rusqlite::Result<Suggestion> {
    let severity: String = r.get(9)?;
    let category: String = r.get(10)?;
    let status: String = r.get(12)?;
    let resolved_by: Option<String> = r.get(14)?;
    let resolved_at: Option<i64> = r.get(15)?;

    Ok(Suggestion {
        id: Some(r.get(0)?),
        change_request_id: r.get(1)?,
        repository_id: r.get(2)?,
        file_path: r.get(3)?,
        start_line: r.get(4)?,
        end_line: r.get(5)?,
        original_code: r.get(6)?,
        suggested_code: r.get(7)?,
        explanation: r.get(8)?,
        severity: Severity::parse_or_default(&severity),
        category: Category::parse_or_default(&category),
        confidence: r.get(11)?,
        status: SuggestionStatus::from_column(&status),
        created_at: Some(r.get(13)?),
        resolution: match (resolved_by, resolved_at) {
            (Some(resolved_by), Some(resolved_at)) => Some(Resolution { resolved_by, resolved_at }),
            _ => None,
        },
    })
}

/// Async handle over the `suggestions` table.
///
/// Cloning is cheap; clones share the one background connection thread.
#[derive(Clone)]
pub struct SuggestionStore {
    conn: Connection,
}

impl SuggestionStore {
    /// Opens the database at `path` via [`open_db`].
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if opening or migrating fails.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        Ok(Self { conn: open_db(path).await? })
    }

    /// Persists `suggestions` under `scope` and returns the rows that made it.
    ///
    /// Each saved suggestion gets a fresh UUID, `created_at = now` and
    /// `Pending` status, whatever it carried before. An insert that fails
    /// (for example a confidence the schema rejects) is logged and left out
    /// of the result; the rest of the batch still commits.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the transaction itself cannot be
    /// opened or committed.
    pub async fn save(
        &self,
        scope: Scope,
        suggestions: Vec<Suggestion>,
    ) -> Result<Vec<Suggestion>, StoreError> {
        let offered = suggestions.len();

        let saved = self
            .conn
            .call(move |db| {
                let now = now_secs();
                let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                let mut saved = Vec::with_capacity(suggestions.len());
                {
                    let mut stmt = tx.prepare(&format!(
                        "INSERT INTO suggestions ({COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, NULL, NULL)"
                    ))?;
                    for mut s in suggestions {
                        let id = uuid::Uuid::new_v4().to_string();
                        let inserted = stmt.execute(rusqlite::params![
                            &id,
                            scope.change_request_id,
                            scope.repository_id,
                            &s.file_path,
                            s.start_line,
                            s.end_line,
                            &s.original_code,
                            &s.suggested_code,
                            &s.explanation,
                            s.severity.as_str(),
                            s.category.as_str(),
                            s.confidence,
                            SuggestionStatus::Pending.as_str(),
                            now,
                        ]);
                        match inserted {
                            Ok(_) => {
                                s.id = Some(id);
                                s.change_request_id = scope.change_request_id;
                                s.repository_id = scope.repository_id;
                                s.status = SuggestionStatus::Pending;
                                s.created_at = Some(now);
                                s.resolution = None;
                                saved.push(s);
                            }
                            Err(e) => {
                                warn!(%scope, file = %s.file_path, error = %e, "failed to save suggestion");
                            }
                        }
                    }
                }
                tx.commit()?;
                Ok::<_, rusqlite::Error>(saved)
            })
            .await?;

        info!(%scope, saved = saved.len(), offered, "suggestions saved");
        Ok(saved)
    }

    /// All suggestions for `scope`, most severe first, then most confident.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the query fails.
    pub async fn list(&self, scope: Scope) -> Result<Vec<Suggestion>, StoreError> {
        let rows = self
            .conn
            .call(move |db| {
                let mut stmt = db.prepare(&format!(
                    "SELECT {COLUMNS} FROM suggestions
                     WHERE change_request_id = ?1 AND repository_id = ?2
                     ORDER BY {SEVERITY_RANK}, confidence DESC, rowid"
                ))?;
                let rows = stmt
                    .query_map(
                        rusqlite::params![scope.change_request_id, scope.repository_id],
                        suggestion_from_row,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok::<_, rusqlite::Error>(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Suggestions for one file of `scope`, in line order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the query fails.
    pub async fn list_for_file(
        &self,
        scope: Scope,
        file_path: &str,
    ) -> Result<Vec<Suggestion>, StoreError> {
        let file_path = file_path.to_owned();

        let rows = self
            .conn
            .call(move |db| {
                let mut stmt = db.prepare(&format!(
                    "SELECT {COLUMNS} FROM suggestions
                     WHERE change_request_id = ?1 AND repository_id = ?2 AND file_path = ?3
                     ORDER BY start_line ASC, rowid"
                ))?;
                let rows = stmt
                    .query_map(
                        rusqlite::params![scope.change_request_id, scope.repository_id, &file_path],
                        suggestion_from_row,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok::<_, rusqlite::Error>(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Looks up one suggestion by id, in any scope.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the query fails.
    pub async fn get(&self, id: &str) -> Result<Option<Suggestion>, StoreError> {
        let id = id.to_owned();
        let row = self
            .conn
            .call(move |db| {
                let row = db
                    .query_row(
                        &format!("SELECT {COLUMNS} FROM suggestions WHERE id = ?1"),
                        rusqlite::params![&id],
                        suggestion_from_row,
                    )
                    .optional()?;
                Ok::<_, rusqlite::Error>(row)
            })
            .await?;
        Ok(row)
    }

    /// Resolves suggestion `id`, stamping `resolved_by` and `resolved_at = now`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no suggestion has this id (nothing is
    /// written), or `StoreError::Database` if the transaction fails.
    pub async fn update_status(
        &self,
        id: &str,
        status: ResolutionStatus,
        resolved_by: &str,
    ) -> Result<Suggestion, StoreError> {
        let id = id.to_owned();
        let resolved_by = resolved_by.to_owned();
        let status = SuggestionStatus::from(status);
        let lookup = id.clone();

        let updated = self
            .conn
            .call(move |db| -> rusqlite::Result<Option<Suggestion>> {
                let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                let changed = tx.execute(
                    "UPDATE suggestions
                     SET status = ?1, resolved_by = ?2, resolved_at = ?3
                     WHERE id = ?4",
                    rusqlite::params![status.as_str(), &resolved_by, now_secs(), &id],
                )?;
                if changed == 0 {
                    return Ok(None);
                }
                let row = tx.query_row(
                    &format!("SELECT {COLUMNS} FROM suggestions WHERE id = ?1"),
                    rusqlite::params![&id],
                    suggestion_from_row,
                )?;
                tx.commit()?;
                Ok(Some(row))
            })
            .await?;

        match updated {
            Some(s) => {
                info!(id = %lookup, status = status.as_str(), "suggestion resolved");
                Ok(s)
            }
            None => Err(StoreError::NotFound(lookup)),
        }
    }

    /// Removes every suggestion of `scope`; returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the transaction fails.
    pub async fn delete_all(&self, scope: Scope) -> Result<usize, StoreError> {
        let deleted = self
            .conn
            .call(move |db| {
                let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                let n = tx.execute(
                    "DELETE FROM suggestions WHERE change_request_id = ?1 AND repository_id = ?2",
                    rusqlite::params![scope.change_request_id, scope.repository_id],
                )?;
                tx.commit()?;
                Ok::<_, rusqlite::Error>(n)
            })
            .await?;
        info!(%scope, deleted, "suggestions cleared");
        Ok(deleted)
    }

    /// Unresolved criticals: `severity = CRITICAL AND status = PENDING`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the query fails.
    pub async fn count_critical(&self, scope: Scope) -> Result<usize, StoreError> {
        let count = self
            .conn
            .call(move |db| {
                let n: i64 = db.query_row(
                    "SELECT COUNT(*) FROM suggestions
                     WHERE change_request_id = ?1 AND repository_id = ?2
                       AND severity = 'CRITICAL' AND status = 'PENDING'",
                    rusqlite::params![scope.change_request_id, scope.repository_id],
                    |r| r.get(0),
                )?;
                Ok::<_, rusqlite::Error>(n)
            })
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Tallies the scope's stored suggestions from a fresh listing.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the listing fails.
    pub async fn stats(&self, scope: Scope) -> Result<SuggestionStats, StoreError> {
        let suggestions = self.list(scope).await?;
        let mut stats = SuggestionStats { total: suggestions.len(), ..SuggestionStats::default() };
        for s in &suggestions {
            match s.status {
                SuggestionStatus::Pending => stats.pending += 1,
                SuggestionStatus::Accepted => stats.accepted += 1,
                SuggestionStatus::Rejected => stats.rejected += 1,
                SuggestionStatus::Dismissed => stats.dismissed += 1,
            }
            match s.severity {
                Severity::Critical => stats.critical += 1,
                Severity::Warning => stats.warning += 1,
                Severity::Info | Severity::Hint => {}
            }
        }
        Ok(stats)
    }
}
