//! Turso Embedded / libSQL storage layer (offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding previously
//! published articles, pipeline run history and the generation cache.
//!
//! **Access rules:**
//! - pipeline runs: read-write via [`Storage::open`]
//! - history listing and resume lookup: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use postforge_shared::{PostforgeError, PriorArticle, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// One row of run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub keyword: String,
    pub title: String,
    /// `completed`, `failed` or `paused`.
    pub status: String,
    pub failed_stage: Option<u8>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Serialized pipeline state, kept for paused runs.
    pub state_json: Option<String>,
}

fn storage_err(e: impl std::fmt::Display) -> PostforgeError {
    PostforgeError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PostforgeError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PostforgeError::Storage(format!(
                "database not found: {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        PostforgeError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(PostforgeError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Article operations
    // -----------------------------------------------------------------------

    /// Record a published article (insert or update on conflict by `site + url`).
    pub async fn upsert_article(&self, site: &str, article: &PriorArticle) -> Result<()> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        self.conn
            .execute(
                "INSERT INTO articles (id, site, url, title, keyword, excerpt, published_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(site, url) DO UPDATE SET
                   title = excluded.title,
                   keyword = excluded.keyword,
                   excerpt = excluded.excerpt,
                   published_at = excluded.published_at",
                params![
                    id.as_str(),
                    site,
                    article.url.as_str(),
                    article.title.as_str(),
                    article.keyword.as_str(),
                    article.excerpt.as_str(),
                    article.published_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Most recently published articles for a site, newest first.
    pub async fn recent_articles(&self, site: &str, limit: u32) -> Result<Vec<PriorArticle>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url, title, keyword, excerpt, published_at
                 FROM articles WHERE site = ?1
                 ORDER BY published_at DESC
                 LIMIT ?2",
                params![site, limit],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_article(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Insert or replace a run record by ID.
    pub async fn record_run(&self, run: &RunRecord) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO runs (id, keyword, title, status, failed_stage, error, started_at, finished_at, state_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                   status = excluded.status,
                   failed_stage = excluded.failed_stage,
                   error = excluded.error,
                   finished_at = excluded.finished_at,
                   state_json = excluded.state_json",
                params![
                    run.id.as_str(),
                    run.keyword.as_str(),
                    run.title.as_str(),
                    run.status.as_str(),
                    run.failed_stage.map(i64::from),
                    run.error.as_deref(),
                    run.started_at.to_rfc3339(),
                    run.finished_at.map(|t| t.to_rfc3339()),
                    run.state_json.as_deref(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Get a run by ID.
    pub async fn get_run(&self, id: &str) -> Result<Option<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, keyword, title, status, failed_stage, error, started_at, finished_at, state_json
                 FROM runs WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_run(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Most recent runs, newest first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, keyword, title, status, failed_stage, error, started_at, finished_at, state_json
                 FROM runs ORDER BY started_at DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_run(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Generation cache operations
    // -----------------------------------------------------------------------

    /// Get a cached generation result.
    pub async fn get_generation_cache(
        &self,
        task_type: &str,
        prompt_hash: &str,
        model_id: &str,
    ) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT result_json FROM generation_cache
                 WHERE task_type = ?1 AND prompt_hash = ?2 AND model_id = ?3",
                params![task_type, prompt_hash, model_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let result: String = row.get(0).map_err(storage_err)?;
                Ok(Some(result))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Store a generation result in the cache (upserts).
    pub async fn set_generation_cache(
        &self,
        task_type: &str,
        prompt_hash: &str,
        model_id: &str,
        result_json: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO generation_cache (id, task_type, prompt_hash, model_id, result_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(task_type, prompt_hash, model_id) DO UPDATE SET
                   result_json = excluded.result_json,
                   created_at = excluded.created_at",
                params![id.as_str(), task_type, prompt_hash, model_id, result_json, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Drop every cached generation result. Returns the number removed.
    pub async fn clear_generation_cache(&self) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM generation_cache", params![])
            .await
            .map_err(storage_err)
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PostforgeError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`PriorArticle`].
fn row_to_article(row: &libsql::Row) -> Result<PriorArticle> {
    let published_at: String = row.get(4).map_err(storage_err)?;
    Ok(PriorArticle {
        url: row.get::<String>(0).map_err(storage_err)?,
        title: row.get::<String>(1).map_err(storage_err)?,
        keyword: row.get::<String>(2).map_err(storage_err)?,
        excerpt: row.get::<String>(3).unwrap_or_default(),
        published_at: parse_timestamp(&published_at)?,
    })
}

/// Convert a database row to a [`RunRecord`].
fn row_to_run(row: &libsql::Row) -> Result<RunRecord> {
    let started_at: String = row.get(6).map_err(storage_err)?;
    let finished_at = match row.get::<String>(7).ok() {
        Some(s) => Some(parse_timestamp(&s)?),
        None => None,
    };
    Ok(RunRecord {
        id: row.get::<String>(0).map_err(storage_err)?,
        keyword: row.get::<String>(1).map_err(storage_err)?,
        title: row.get::<String>(2).map_err(storage_err)?,
        status: row.get::<String>(3).map_err(storage_err)?,
        failed_stage: row.get::<i64>(4).ok().map(|v| v as u8),
        error: row.get::<String>(5).ok(),
        started_at: parse_timestamp(&started_at)?,
        finished_at,
        state_json: row.get::<String>(8).ok(),
    })
}
