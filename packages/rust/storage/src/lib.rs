//! Cache/Store for research documents.
//!
//! [`ResearchStore`] is the seam the orchestrator writes through. Two
//! implementations ship here:
//! - [`Storage`]: Turso Embedded / libSQL file database (offline mode)
//! - [`MemoryStore`]: process-local map for tests and embedded callers
//!
//! **Access rules:**
//! - `featurelens research` / `invalidate`: read-write via [`Storage::open`]
//! - `featurelens show`: read-only via [`Storage::open_readonly`]

mod memory;
mod migrations;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use libsql::{Connection, Database, params};
use tracing::{debug, info};

use featurelens_shared::{ContentResearch, FeatureLensError, ResearchStatus, Result};

pub use memory::MemoryStore;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Persistence contract for [`ContentResearch`] documents keyed by feature id.
///
/// Writes are last-writer-wins per feature id.
#[async_trait]
pub trait ResearchStore: Send + Sync {
    async fn get(&self, feature_id: &str) -> Result<Option<ContentResearch>>;

    async fn upsert(&self, feature_id: &str, research: &ContentResearch) -> Result<()>;

    /// Every stored document, most recently updated first.
    async fn list(&self) -> Result<Vec<ContentResearch>>;

    /// Move `completed` documents last updated before `now - max_age` back
    /// to `pending`. Returns how many were invalidated.
    async fn invalidate_stale(&self, max_age: Duration) -> Result<usize>;
}

/// Mark a stale completed document as pending without touching its content.
pub(crate) fn mark_stale(research: &mut ContentResearch, cutoff: DateTime<Utc>) -> bool {
    if research.status == ResearchStatus::Completed && research.updated_at < cutoff {
        research.status = ResearchStatus::Pending;
        true
    } else {
        false
    }
}

// ---------------------------------------------------------------------------
// libSQL storage
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FeatureLensError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| FeatureLensError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| FeatureLensError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| FeatureLensError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| FeatureLensError::Storage(e.to_string()))?;

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
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        FeatureLensError::Storage(format!(
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
            return Err(FeatureLensError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    /// Raw document JSON for `feature_id`, as stored.
    pub async fn get_document_json(&self, feature_id: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT document_json FROM content_research WHERE feature_id = ?1",
                params![feature_id],
            )
            .await
            .map_err(|e| FeatureLensError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let json: String = row
                    .get(0)
                    .map_err(|e| FeatureLensError::Storage(e.to_string()))?;
                Ok(Some(json))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(FeatureLensError::Storage(e.to_string())),
        }
    }

    /// Every stored document (alias used by `show --all`).
    pub async fn list_research(&self) -> Result<Vec<ContentResearch>> {
        self.list().await
    }

    async fn write(&self, feature_id: &str, research: &ContentResearch) -> Result<()> {
        let json = serde_json::to_string(research)
            .map_err(|e| FeatureLensError::Storage(format!("serialize research: {e}")))?;

        self.conn
            .execute(
                "INSERT INTO content_research
                   (feature_id, status, research_depth, cycle, schema_version, created_at, updated_at, document_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(feature_id) DO UPDATE SET
                   status = excluded.status,
                   research_depth = excluded.research_depth,
                   cycle = excluded.cycle,
                   schema_version = excluded.schema_version,
                   updated_at = excluded.updated_at,
                   document_json = excluded.document_json",
                params![
                    feature_id,
                    research.status.as_str(),
                    research.research_depth.as_str(),
                    i64::from(research.cycle),
                    i64::from(research.schema_version),
                    timestamp(research.created_at),
                    timestamp(research.updated_at),
                    json
                ],
            )
            .await
            .map_err(|e| FeatureLensError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ResearchStore for Storage {
    async fn get(&self, feature_id: &str) -> Result<Option<ContentResearch>> {
        self.get_document_json(feature_id)
            .await?
            .map(|json| parse_document(feature_id, &json))
            .transpose()
    }

    async fn upsert(&self, feature_id: &str, research: &ContentResearch) -> Result<()> {
        self.check_writable()?;
        self.write(feature_id, research).await?;
        debug!(feature_id, status = %research.status, "research stored");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ContentResearch>> {
        let mut rows = self
            .conn
            .query(
                "SELECT feature_id, document_json FROM content_research ORDER BY updated_at DESC",
                params![],
            )
            .await
            .map_err(|e| FeatureLensError::Storage(e.to_string()))?;

        let mut docs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| FeatureLensError::Storage(e.to_string()))?
        {
            let feature_id: String = row
                .get(0)
                .map_err(|e| FeatureLensError::Storage(e.to_string()))?;
            let json: String = row
                .get(1)
                .map_err(|e| FeatureLensError::Storage(e.to_string()))?;
            docs.push(parse_document(&feature_id, &json)?);
        }
        Ok(docs)
    }

    async fn invalidate_stale(&self, max_age: Duration) -> Result<usize> {
        self.check_writable()?;
        let cutoff = Utc::now() - max_age;

        let mut rows = self
            .conn
            .query(
                "SELECT feature_id, document_json FROM content_research
                 WHERE status = ?1 AND updated_at < ?2",
                params![ResearchStatus::Completed.as_str(), timestamp(cutoff)],
            )
            .await
            .map_err(|e| FeatureLensError::Storage(e.to_string()))?;

        let mut stale = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| FeatureLensError::Storage(e.to_string()))?
        {
            let feature_id: String = row
                .get(0)
                .map_err(|e| FeatureLensError::Storage(e.to_string()))?;
            let json: String = row
                .get(1)
                .map_err(|e| FeatureLensError::Storage(e.to_string()))?;
            stale.push(parse_document(&feature_id, &json)?);
        }

        let mut count = 0;
        for mut research in stale {
            if mark_stale(&mut research, cutoff) {
                let feature_id = research.feature_id.clone();
                self.write(&feature_id, &research).await?;
                count += 1;
            }
        }

        info!(count, max_age_hours = max_age.num_hours(), "stale research invalidated");
        Ok(count)
    }
}

/// Fixed-width UTC timestamps so text comparison orders correctly.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_document(feature_id: &str, json: &str) -> Result<ContentResearch> {
    serde_json::from_str(json).map_err(|e| {
        FeatureLensError::Storage(format!("corrupt research document for {feature_id}: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use featurelens_shared::{ResearchDepth, SourceContent, SourceKind};
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("fl_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn completed(feature_id: &str, age: Duration) -> ContentResearch {
        let mut research = ContentResearch::new(feature_id, ResearchDepth::Standard);
        research.transition(ResearchStatus::InProgress).unwrap();
        research
            .primary_sources
            .push(SourceContent::failed("https://example.com/a", SourceKind::Primary, "HTTP 404"));
        research.transition(ResearchStatus::Completed).unwrap();
        research.updated_at = Utc::now() - age;
        research
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("fl_test_{}.db", Uuid::now_v7()));
        let first = Storage::open(&tmp).await.unwrap();
        drop(first);
        let second = Storage::open(&tmp).await.expect("reopen");
        assert_eq!(second.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn upsert_and_get_roundtrip() {
        let storage = test_storage().await;
        assert!(storage.get("feat-1").await.unwrap().is_none());

        let research = completed("feat-1", Duration::zero());
        storage.upsert("feat-1", &research).await.expect("upsert");

        let found = storage.get("feat-1").await.unwrap().expect("stored");
        assert_eq!(found, research);
        assert_eq!(found.primary_sources.len(), 1);
    }

    #[tokio::test]
    async fn upsert_is_last_writer_wins() {
        let storage = test_storage().await;
        let mut research = ContentResearch::new("feat-1", ResearchDepth::Standard);
        storage.upsert("feat-1", &research).await.unwrap();

        research.transition(ResearchStatus::InProgress).unwrap();
        research.cycle = 1;
        storage.upsert("feat-1", &research).await.unwrap();

        let found = storage.get("feat-1").await.unwrap().unwrap();
        assert_eq!(found.status, ResearchStatus::InProgress);
        assert_eq!(found.cycle, 1);
        assert_eq!(storage.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalidate_stale_only_touches_old_completed() {
        let storage = test_storage().await;
        storage
            .upsert("old", &completed("old", Duration::hours(200)))
            .await
            .unwrap();
        storage
            .upsert("fresh", &completed("fresh", Duration::hours(1)))
            .await
            .unwrap();
        let pending = ContentResearch::new("pending", ResearchDepth::Standard);
        storage.upsert("pending", &pending).await.unwrap();

        let count = storage.invalidate_stale(Duration::hours(168)).await.unwrap();
        assert_eq!(count, 1);

        let old = storage.get("old").await.unwrap().unwrap();
        assert_eq!(old.status, ResearchStatus::Pending);
        assert_eq!(old.primary_sources.len(), 1);

        let fresh = storage.get("fresh").await.unwrap().unwrap();
        assert_eq!(fresh.status, ResearchStatus::Completed);
    }

    #[tokio::test]
    async fn list_orders_by_recency() {
        let storage = test_storage().await;
        storage
            .upsert("older", &completed("older", Duration::hours(5)))
            .await
            .unwrap();
        storage
            .upsert("newer", &completed("newer", Duration::hours(1)))
            .await
            .unwrap();

        let ids: Vec<String> = storage
            .list_research()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.feature_id)
            .collect();
        assert_eq!(ids, vec!["newer", "older"]);
    }

    #[tokio::test]
    async fn list_fails_on_unreadable_row_instead_of_truncating() {
        let storage = test_storage().await;
        storage
            .upsert("good", &completed("good", Duration::hours(1)))
            .await
            .unwrap();
        storage
            .conn
            .execute(
                "INSERT INTO content_research
                   (feature_id, status, research_depth, cycle, schema_version, created_at, updated_at, document_json)
                 VALUES ('broken', 'completed', 'standard', 1, 1, '2000-01-01T00:00:00Z', '2000-01-01T00:00:00Z', '{not json')",
                params![],
            )
            .await
            .unwrap();

        let err = storage.list().await.unwrap_err();
        assert!(err.to_string().contains("broken"));

        let stale = storage.invalidate_stale(Duration::hours(24)).await;
        assert!(stale.is_err());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("fl_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.upsert("feat-1", &ContentResearch::new("feat-1", ResearchDepth::Standard))
            .await
            .unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert!(ro.get("feat-1").await.unwrap().is_some());

        let result = ro
            .upsert("feat-2", &ContentResearch::new("feat-2", ResearchDepth::Standard))
            .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
