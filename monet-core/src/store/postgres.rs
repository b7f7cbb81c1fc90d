use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use monet_model::RecordId;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use super::backend::{DocumentBackend, StoredDocument};
use super::projection::Projection;
use crate::config::PostgresConfig;
use crate::error::{CatalogError, Result};

/// `file_records` table accessed through a sqlx pool.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresBackend")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresBackend {
    /// Connect and bring the schema up to date.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .test_before_acquire(true)
            .connect(&config.url)
            .await
            .map_err(|e| {
                CatalogError::StoreConnection(format!("Database connection failed: {e}").into())
            })?;

        info!(
            target: "catalog::store",
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "database pool initialized"
        );

        let backend = Self { pool };
        backend.initialize_schema().await?;
        Ok(backend)
    }

    /// Wrap an existing pool. The schema must already be migrated.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn initialize_schema(&self) -> Result<()> {
        crate::MIGRATOR.run(&self.pool).await.map_err(|e| {
            CatalogError::StoreConnection(format!("Migration failed: {e}").into())
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// `document #- $2 #- $3 ...`, one jsonb path deletion per exclusion.
fn projected_select(projection: &Projection) -> String {
    let mut expr = String::from("document");
    for index in 0..projection.excluded().len() {
        expr.push_str(&format!(" #- ${}::text[]", index + 2));
    }
    format!("SELECT id, {expr} AS document FROM file_records WHERE current_path = $1")
}

fn like_prefix(root: &str) -> String {
    let mut escaped = String::with_capacity(root.len() + 2);
    for ch in root.trim_end_matches('/').chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push_str("/%");
    escaped
}

#[async_trait]
impl DocumentBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn find_one(
        &self,
        path: &str,
        projection: &Projection,
    ) -> Result<Option<StoredDocument>> {
        let sql = projected_select(projection);
        let mut query = sqlx::query(&sql).bind(path);
        for segments in projection.excluded_segments() {
            let segments: Vec<String> = segments.into_iter().map(str::to_string).collect();
            query = query.bind(segments);
        }

        let Some(row) = query.fetch_optional(&self.pool).await? else {
            return Ok(None);
        };
        let id: Uuid = row.try_get("id")?;
        let document: Value = row.try_get("document")?;
        Ok(Some(StoredDocument {
            id: RecordId::from(id),
            document,
        }))
    }

    async fn find_id(&self, path: &str) -> Result<Option<RecordId>> {
        let id: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM file_records WHERE current_path = $1")
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id.map(RecordId::from))
    }

    async fn count(&self, path: &str, limit: u64) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM (
                SELECT 1 FROM file_records WHERE current_path = $1 LIMIT $2
            ) AS matched
            "#,
        )
        .bind(path)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn insert_one(&self, path: &str, document: Value) -> Result<RecordId> {
        let id = RecordId::new();
        sqlx::query(
            r#"
            INSERT INTO file_records (id, current_path, document)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(id.to_uuid())
        .bind(path)
        .bind(&document)
        .execute(&self.pool)
        .await
        .map_err(|e| match CatalogError::from(e) {
            CatalogError::DuplicatePath(_) => CatalogError::DuplicatePath(path.to_string()),
            other => other,
        })?;
        Ok(id)
    }

    async fn update_one(&self, id: RecordId, path: &str, document: Value) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE file_records
            SET current_path = $2, document = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.to_uuid())
        .bind(path)
        .bind(&document)
        .execute(&self.pool)
        .await
        .map_err(|e| match CatalogError::from(e) {
            CatalogError::DuplicatePath(_) => CatalogError::DuplicatePath(path.to_string()),
            other => other,
        })?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_paths(&self, root: &str) -> Result<Vec<String>> {
        let paths: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT current_path FROM file_records
            WHERE current_path = $1 OR current_path LIKE $2 ESCAPE '\'
            ORDER BY current_path
            "#,
        )
        .bind(root)
        .bind(like_prefix(root))
        .fetch_all(&self.pool)
        .await?;
        Ok(paths)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
