//! SQL migration definitions for the Postforge database.
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
    vec![
        Migration {
            version: 1,
            description: "Initial schema: articles, runs, generation_cache",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Articles previously published to a site
CREATE TABLE IF NOT EXISTS articles (
    id           TEXT PRIMARY KEY,
    site         TEXT NOT NULL,
    url          TEXT NOT NULL,
    title        TEXT NOT NULL,
    keyword      TEXT NOT NULL,
    excerpt      TEXT NOT NULL DEFAULT '',
    published_at TEXT NOT NULL,
    UNIQUE(site, url)
);

CREATE INDEX IF NOT EXISTS idx_articles_site_published ON articles(site, published_at);

-- Pipeline run history
CREATE TABLE IF NOT EXISTS runs (
    id           TEXT PRIMARY KEY,
    keyword      TEXT NOT NULL,
    title        TEXT NOT NULL,
    status       TEXT NOT NULL,
    failed_stage INTEGER,
    error        TEXT,
    started_at   TEXT NOT NULL,
    finished_at  TEXT,
    state_json   TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_started ON runs(started_at);

-- Generative model response cache
CREATE TABLE IF NOT EXISTS generation_cache (
    id          TEXT PRIMARY KEY,
    task_type   TEXT NOT NULL,
    prompt_hash TEXT NOT NULL,
    model_id    TEXT NOT NULL,
    result_json TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE(task_type, prompt_hash, model_id)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
    ]
}
