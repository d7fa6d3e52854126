//! libSQL storage adapter for company dossiers.
//!
//! The [`Storage`] struct wraps one libSQL database holding the `companies`
//! table. The backend (local file, in-process memory, or remote libSQL server)
//! is chosen by [`StorageConfig`]; the upsert/query contract is the same for all.
//!
//! **Access rules:**
//! - Writes are serialized by a single-writer guard, one transaction per upsert.
//! - Reads share the connection, so they wait on the same guard and never see
//!   a transaction in flight.
//! - Case-insensitive matching folds Unicode in Rust; SQLite's `lower()` only
//!   folds ASCII.
//! - [`Storage::upsert`] and [`Storage::query`] report failures as data so the
//!   pipeline can hand them to the completion service as tool output.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use dossier_shared::{
    CompanyRecord, DossierError, Result, StorageBackend, StorageConfig, UpsertAction,
    resolve_secret,
};
use libsql::{Connection, Database, params};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

const MEMORY_PATH: &str = ":memory:";

fn storage_err(e: impl std::fmt::Display) -> DossierError {
    DossierError::Storage(e.to_string())
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertStatus {
    Success,
    Error,
}

/// Outcome of [`Storage::upsert`], shaped for tool output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertReport {
    pub status: UpsertStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<UpsertAction>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome of [`Storage::query`]. An empty `Found` list is not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryReport {
    Found(Vec<CompanyRecord>),
    Error { error: String },
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Company store handle. Share it across runs behind an `Arc`.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Mutex<Option<Connection>>,
    access_guard: Mutex<()>,
    backend: StorageBackend,
}

impl Storage {
    /// Open the backend selected by `config`. Call [`initialize`](Self::initialize)
    /// before the first upsert or query.
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        match config.backend {
            StorageBackend::Local => Self::open_local(&config.resolved_path()?).await,
            StorageBackend::Memory => Self::open_memory().await,
            StorageBackend::Remote => {
                let url = config.url.as_deref().ok_or_else(|| {
                    DossierError::config("storage.url is required for the remote backend")
                })?;
                let token = resolve_secret(&config.auth_token_env)?;
                let db = libsql::Builder::new_remote(url.to_string(), token)
                    .build()
                    .await
                    .map_err(storage_err)?;
                Self::from_database(db, StorageBackend::Remote)
            }
        }
    }

    /// Open or create a database file at `path`.
    pub async fn open_local(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DossierError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        Self::from_database(db, StorageBackend::Local)
    }

    /// Open a private in-process database, discarded on shutdown.
    pub async fn open_memory() -> Result<Self> {
        let db = libsql::Builder::new_local(MEMORY_PATH)
            .build()
            .await
            .map_err(storage_err)?;
        Self::from_database(db, StorageBackend::Memory)
    }

    fn from_database(db: Database, backend: StorageBackend) -> Result<Self> {
        let conn = db.connect().map_err(storage_err)?;
        debug!(?backend, "storage opened");
        Ok(Self {
            db,
            conn: Mutex::new(Some(conn)),
            access_guard: Mutex::new(()),
            backend,
        })
    }

    pub fn backend(&self) -> StorageBackend {
        self.backend
    }

    /// Apply pending schema migrations. Safe to call more than once.
    pub async fn initialize(&self) -> Result<()> {
        let conn = self.connection().await?;
        let current_version = schema_version(&conn).await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                conn.execute_batch(migration.sql).await.map_err(|e| {
                    DossierError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Release the connection. Later calls fail; calling again is a no-op.
    pub async fn shutdown(&self) {
        if self.conn.lock().await.take().is_some() {
            info!(backend = ?self.backend, "storage shut down");
        }
    }

    async fn connection(&self) -> Result<Connection> {
        self.conn
            .lock()
            .await
            .clone()
            .ok_or_else(|| DossierError::Storage("storage is shut down".into()))
    }

    // -----------------------------------------------------------------------
    // Company operations
    // -----------------------------------------------------------------------

    /// Insert or overwrite the company called `name` (exact, case-sensitive).
    #[instrument(skip_all, fields(name = %name))]
    pub async fn try_upsert(
        &self,
        name: &str,
        industry: &str,
        data: &serde_json::Value,
    ) -> Result<UpsertAction> {
        if name.trim().is_empty() {
            return Err(DossierError::validation("company name must not be empty"));
        }

        let conn = self.connection().await?;
        let payload = serde_json::to_string(data).map_err(storage_err)?;
        let now = Utc::now().to_rfc3339();

        let _guard = self.access_guard.lock().await;
        let tx = conn.transaction().await.map_err(storage_err)?;

        match write_company(&tx, name, industry, &payload, &now).await {
            Ok(action) => {
                tx.commit().await.map_err(storage_err)?;
                debug!(?action, "company stored");
                Ok(action)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// [`try_upsert`](Self::try_upsert) with failures reported as data.
    pub async fn upsert(
        &self,
        name: &str,
        industry: &str,
        data: &serde_json::Value,
    ) -> UpsertReport {
        match self.try_upsert(name, industry, data).await {
            Ok(action) => UpsertReport {
                status: UpsertStatus::Success,
                action: Some(action),
                name: name.to_string(),
                message: None,
            },
            Err(e) => {
                warn!(name, error = %e, "upsert failed");
                UpsertReport {
                    status: UpsertStatus::Error,
                    action: None,
                    name: name.to_string(),
                    message: Some(e.to_string()),
                }
            }
        }
    }

    /// Companies whose name or industry contains `needle`, ignoring case,
    /// in insertion order.
    #[instrument(skip_all, fields(needle = %needle))]
    pub async fn try_query(&self, needle: &str) -> Result<Vec<CompanyRecord>> {
        let conn = self.connection().await?;
        let needle = needle.to_lowercase();

        let _guard = self.access_guard.lock().await;
        let mut rows = conn
            .query(
                "SELECT name, industry, data, last_updated FROM companies ORDER BY id",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let name: String = row.get(0).map_err(storage_err)?;
            let industry: String = row.get(1).map_err(storage_err)?;
            if name.to_lowercase().contains(&needle) || industry.to_lowercase().contains(&needle) {
                results.push(row_to_company(&row)?);
            }
        }
        debug!(matches = results.len(), "query complete");
        Ok(results)
    }

    /// [`try_query`](Self::try_query) with failures reported as data.
    pub async fn query(&self, needle: &str) -> QueryReport {
        match self.try_query(needle).await {
            Ok(records) => QueryReport::Found(records),
            Err(e) => {
                warn!(needle, error = %e, "query failed");
                QueryReport::Error {
                    error: e.to_string(),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Get the current schema version, or 0 if no migrations have been applied.
async fn schema_version(conn: &Connection) -> u32 {
    match conn
        .query("SELECT MAX(version) FROM schema_migrations", params![])
        .await
    {
        Ok(mut rows) => match rows.next().await {
            Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
            _ => 0,
        },
        Err(_) => 0, // Table doesn't exist yet
    }
}

async fn write_company(
    conn: &Connection,
    name: &str,
    industry: &str,
    payload: &str,
    now: &str,
) -> Result<UpsertAction> {
    let mut existing = conn
        .query("SELECT 1 FROM companies WHERE name = ?1", params![name])
        .await
        .map_err(storage_err)?;
    let action = match existing.next().await.map_err(storage_err)? {
        Some(_) => UpsertAction::Updated,
        None => UpsertAction::Inserted,
    };

    conn.execute(
        "INSERT INTO companies (name, industry, data, last_updated)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(name) DO UPDATE SET
           industry = excluded.industry,
           data = excluded.data,
           last_updated = excluded.last_updated",
        params![name, industry, payload, now],
    )
    .await
    .map_err(storage_err)?;

    Ok(action)
}

fn row_to_company(row: &libsql::Row) -> Result<CompanyRecord> {
    let data: String = row.get(2).map_err(storage_err)?;
    let last_updated: String = row.get(3).map_err(storage_err)?;

    Ok(CompanyRecord {
        name: row.get(0).map_err(storage_err)?,
        industry: row.get(1).map_err(storage_err)?,
        data: serde_json::from_str(&data)
            .map_err(|e| DossierError::Storage(format!("invalid stored data: {e}")))?,
        last_updated: DateTime::parse_from_rfc3339(&last_updated)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| DossierError::Storage(format!("invalid date: {e}")))?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("dossier_test_{}.db", Uuid::now_v7()));
        let storage = Storage::open_local(&tmp).await.expect("open test db");
        storage.initialize().await.expect("initialize");
        storage
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let tmp = std::env::temp_dir().join(format!("dossier_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open_local(&tmp).await.expect("first open");
        s1.initialize().await.expect("first initialize");
        s1.initialize().await.expect("second initialize");
        s1.shutdown().await;

        let s2 = Storage::open_local(&tmp).await.expect("second open");
        s2.initialize().await.expect("initialize after reopen");
        let conn = s2.connection().await.unwrap();
        assert_eq!(schema_version(&conn).await, 1);
    }

    #[tokio::test]
    async fn upsert_inserts_then_updates() {
        let storage = test_storage().await;

        let first = storage
            .upsert("OpenAI", "Technology", &json!({"v": 1}))
            .await;
        assert_eq!(first.status, UpsertStatus::Success);
        assert_eq!(first.action, Some(UpsertAction::Inserted));
        assert_eq!(first.name, "OpenAI");

        let second = storage
            .upsert("OpenAI", "Technology", &json!({"v": 2}))
            .await;
        assert_eq!(second.action, Some(UpsertAction::Updated));

        let found = storage.try_query("OpenAI").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].data, json!({"v": 2}));
    }

    #[tokio::test]
    async fn names_are_case_sensitive_keys() {
        let storage = test_storage().await;
        storage.try_upsert("Acme", "Retail", &json!({})).await.unwrap();
        let action = storage.try_upsert("ACME", "Retail", &json!({})).await.unwrap();
        assert_eq!(action, UpsertAction::Inserted);
        assert_eq!(storage.try_query("acme").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn query_matches_name_or_industry_ignoring_case() {
        let storage = test_storage().await;
        storage
            .try_upsert("OpenAI", "Technology", &json!({}))
            .await
            .unwrap();
        storage
            .try_upsert("Globex", "Energy", &json!({}))
            .await
            .unwrap();

        let by_name = storage.try_query("open").await.unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].name, "OpenAI");

        let by_industry = storage.try_query("TECH").await.unwrap();
        assert_eq!(by_industry.len(), 1);

        assert_eq!(storage.query("xyz").await, QueryReport::Found(vec![]));
    }

    #[tokio::test]
    async fn query_folds_non_ascii_case() {
        let storage = test_storage().await;
        storage
            .try_upsert("Énergie Verte", "Énergie", &json!({}))
            .await
            .unwrap();

        assert_eq!(storage.try_query("énergie verte").await.unwrap().len(), 1);
        assert_eq!(storage.try_query("ÉNERGIE").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_upsert_leaves_previous_row_intact() {
        let storage = test_storage().await;
        storage
            .try_upsert("Acme Corp", "Technology", &json!({"v": 1}))
            .await
            .unwrap();

        let conn = storage.connection().await.unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_update BEFORE UPDATE ON companies
             BEGIN SELECT RAISE(ABORT, 'update rejected'); END;",
        )
        .await
        .unwrap();

        let report = storage
            .upsert("Acme Corp", "Finance", &json!({"v": 2}))
            .await;
        assert_eq!(report.status, UpsertStatus::Error);
        assert!(report.message.unwrap().contains("update rejected"));

        let rows = storage.try_query("Acme").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].industry, "Technology");
        assert_eq!(rows[0].data, json!({"v": 1}));

        // The failed transaction was released: later writes go through.
        conn.execute_batch("DROP TRIGGER reject_update;").await.unwrap();
        let action = storage
            .try_upsert("Acme Corp", "Finance", &json!({"v": 3}))
            .await
            .unwrap();
        assert_eq!(action, UpsertAction::Updated);
        assert_eq!(storage.try_query("acme").await.unwrap()[0].data, json!({"v": 3}));
    }

    #[tokio::test]
    async fn query_keeps_insertion_order_across_updates() {
        let storage = test_storage().await;
        for name in ["Alpha Co", "Beta Co", "Gamma Co"] {
            storage.try_upsert(name, "Finance", &json!({})).await.unwrap();
        }
        storage
            .try_upsert("Alpha Co", "Finance", &json!({"again": true}))
            .await
            .unwrap();

        let names: Vec<_> = storage
            .try_query("co")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, ["Alpha Co", "Beta Co", "Gamma Co"]);
    }

    #[tokio::test]
    async fn concurrent_same_name_upserts_leave_one_complete_row() {
        let storage = Arc::new(test_storage().await);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let storage = Arc::clone(&storage);
                tokio::spawn(async move {
                    storage
                        .try_upsert("Initech", "Technology", &json!({"writer": i, "full": true}))
                        .await
                })
            })
            .collect();

        let mut inserted = 0;
        for task in tasks {
            if task.await.unwrap().unwrap() == UpsertAction::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);

        let rows = storage.try_query("Initech").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data["full"], json!(true));
    }

    #[tokio::test]
    async fn concurrent_different_name_upserts_all_land() {
        let storage = Arc::new(test_storage().await);

        let tasks: Vec<_> = (0..6)
            .map(|i| {
                let storage = Arc::clone(&storage);
                tokio::spawn(async move {
                    storage
                        .upsert(&format!("Company {i}"), "Retail", &json!({"i": i}))
                        .await
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().status, UpsertStatus::Success);
        }

        assert_eq!(storage.try_query("company").await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn empty_name_is_reported_as_error() {
        let storage = test_storage().await;
        let report = storage.upsert("  ", "Retail", &json!({})).await;
        assert_eq!(report.status, UpsertStatus::Error);
        assert!(report.action.is_none());
        assert!(report.message.unwrap().contains("must not be empty"));
    }

    #[tokio::test]
    async fn memory_backend_works_and_shutdown_is_idempotent() {
        let storage = Storage::open(&StorageConfig {
            backend: StorageBackend::Memory,
            ..Default::default()
        })
        .await
        .unwrap();
        assert_eq!(storage.backend(), StorageBackend::Memory);
        storage.initialize().await.unwrap();

        storage.try_upsert("Acme Corp", "Technology", &json!({})).await.unwrap();
        assert_eq!(storage.try_query("acme").await.unwrap().len(), 1);

        storage.shutdown().await;
        storage.shutdown().await;

        match storage.query("acme").await {
            QueryReport::Error { error } => assert!(error.contains("shut down")),
            QueryReport::Found(_) => panic!("expected error after shutdown"),
        }
    }

    #[tokio::test]
    async fn remote_backend_requires_url() {
        let result = Storage::open(&StorageConfig {
            backend: StorageBackend::Remote,
            url: None,
            ..Default::default()
        })
        .await;
        let err = result.err().expect("missing url must fail");
        assert!(err.to_string().contains("storage.url"));
    }

    #[test]
    fn reports_serialize_for_tool_output() {
        let report = UpsertReport {
            status: UpsertStatus::Success,
            action: Some(UpsertAction::Updated),
            name: "Acme".into(),
            message: None,
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({"status": "success", "action": "updated", "name": "Acme"})
        );

        let err = QueryReport::Error {
            error: "boom".into(),
        };
        assert_eq!(serde_json::to_value(&err).unwrap(), json!({"error": "boom"}));
    }
}
