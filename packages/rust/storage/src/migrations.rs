//! SQL migration definitions for the research cache.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: content_research documents",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One research document per feature. Indexed columns mirror the JSON.
CREATE TABLE IF NOT EXISTS content_research (
    feature_id     TEXT PRIMARY KEY,
    status         TEXT NOT NULL,
    research_depth TEXT NOT NULL,
    cycle          INTEGER NOT NULL DEFAULT 0,
    schema_version INTEGER NOT NULL,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    document_json  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_research_status ON content_research(status);
CREATE INDEX IF NOT EXISTS idx_research_updated ON content_research(updated_at);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
