/// DDL to create the schema_version tracking table.
///
/// Applied unconditionally on every DB open (before checking the version),
/// using `IF NOT EXISTS` so it is safe to run multiple times.
pub const SCHEMA_VERSION_DDL: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    ) STRICT;
";

/// DDL for the v1 schema.
///
/// One table, `suggestions`, keyed by UUID v4 text. Every row belongs to a
/// `(change_request_id, repository_id)` scope; both indexes lead with that
/// pair because every read is scoped.
///
/// `severity`, `category` and `status` are pinned to their enumerations by
/// CHECK constraints so a stored row can never hold free text.
/// `resolved_by` and `resolved_at` are either both NULL or both set.
pub const SCHEMA_V1_SQL: &str = "
    CREATE TABLE IF NOT EXISTS suggestions (
        id                TEXT    PRIMARY KEY,
        change_request_id INTEGER NOT NULL,
        repository_id     INTEGER NOT NULL,
        file_path         TEXT    NOT NULL,
        start_line        INTEGER NOT NULL DEFAULT 0,
        end_line          INTEGER NOT NULL DEFAULT 0,
        original_code     TEXT    NOT NULL DEFAULT '',
        suggested_code    TEXT    NOT NULL DEFAULT '',
        explanation       TEXT    NOT NULL DEFAULT '',
        severity          TEXT    NOT NULL
                                  CHECK(severity IN ('CRITICAL','WARNING','INFO','HINT')),
        category          TEXT    NOT NULL
                                  CHECK(category IN
                                        ('SECURITY','PERFORMANCE','BUG_RISK','CODE_STYLE',
                                         'BEST_PRACTICE','DUPLICATION','COMPLEXITY',
                                         'ERROR_HANDLING')),
        confidence        REAL    NOT NULL CHECK(confidence >= 0.0 AND confidence <= 1.0),
        status            TEXT    NOT NULL DEFAULT 'PENDING'
                                  CHECK(status IN ('PENDING','ACCEPTED','REJECTED','DISMISSED')),
        created_at        INTEGER NOT NULL,
        resolved_by       TEXT,
        resolved_at       INTEGER,
        CHECK((resolved_by IS NULL) = (resolved_at IS NULL))
    ) STRICT;

    CREATE INDEX IF NOT EXISTS idx_suggestions_scope
        ON suggestions (change_request_id, repository_id);

    CREATE INDEX IF NOT EXISTS idx_suggestions_scope_file
        ON suggestions (change_request_id, repository_id, file_path);
";

/// Ordered `(version, ddl)` steps. Append new steps; never edit shipped ones.
const MIGRATIONS: &[(i64, &str)] = &[(1, SCHEMA_V1_SQL)];

/// Brings the database up to the newest entry in `MIGRATIONS`.
///
/// Idempotent: reads `MAX(version)` (0 on an empty table) and applies only
/// the steps above it, each inside its own `BEGIN IMMEDIATE` transaction
/// together with its `schema_version` row.
///
/// # Errors
///
/// Returns `rusqlite::Error` if a DDL step fails or the version row cannot be read.
pub fn migrate(db: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    db.execute_batch(SCHEMA_VERSION_DDL)?;

    let current: i64 =
        db.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    for &(version, ddl) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute_batch(ddl)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
        tx.commit()?;
    }

    Ok(())
}

/// The newest schema version this build knows how to create.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|(v, _)| *v).unwrap_or(0)
}
