use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{Link, LinkOutcome, LinkRegistry};
use crate::base::{EntityId, StorageId, StorageKind};
use crate::prelude::*;
use crate::utils::db::{ensure_schema_from_search_path, sanitize_identifier};

pub const DEFAULT_TABLE_NAME: &str = "docsync_links";

#[derive(sqlx::FromRow)]
struct LinkRow {
    storage_kind: String,
    storage_id: i64,
    entity_id: i64,
    key: String,
    created_at: DateTime<Utc>,
}

impl From<LinkRow> for Link {
    fn from(row: LinkRow) -> Self {
        Link {
            kind: StorageKind::from_tag(row.storage_kind),
            storage_id: row.storage_id,
            entity_id: row.entity_id,
            key: row.key,
            created_at: row.created_at,
        }
    }
}

/// Link registry backed by one Postgres table shared by every storage kind.
pub struct PostgresLinkRegistry {
    pool: PgPool,
    table_name: String,
}

impl PostgresLinkRegistry {
    pub fn new(pool: PgPool, table_name: &str) -> Self {
        Self {
            pool,
            table_name: sanitize_identifier(table_name),
        }
    }

    pub async fn connect(url: &str, table_name: &str) -> Result<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::new(pool, table_name))
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Creates the links table and its indexes if missing.
    pub async fn setup(&self) -> Result<()> {
        ensure_schema_from_search_path(&self.pool).await?;
        for query in setup_queries(&self.table_name) {
            sqlx::query(&query).execute(&self.pool).await?;
        }
        debug!("Link table `{}` is ready", self.table_name);
        Ok(())
    }
}

fn setup_queries(table_name: &str) -> [String; 2] {
    [
        format!(
            "CREATE TABLE IF NOT EXISTS {table_name} (
                storage_kind TEXT NOT NULL,
                storage_id BIGINT NOT NULL,
                entity_id BIGINT NOT NULL,
                key TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),

                PRIMARY KEY (storage_kind, storage_id, entity_id)
            )"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {table_name}__key_idx
                ON {table_name} (storage_kind, storage_id, key)"
        ),
    ]
}

#[async_trait]
impl LinkRegistry for PostgresLinkRegistry {
    async fn create(
        &self,
        kind: &StorageKind,
        storage_id: StorageId,
        entity_id: EntityId,
        key: &str,
    ) -> Result<LinkOutcome> {
        let query = format!(
            "INSERT INTO {} (storage_kind, storage_id, entity_id, key, created_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (storage_kind, storage_id, entity_id) DO NOTHING
             RETURNING created_at",
            self.table_name
        );
        let created_at: Option<DateTime<Utc>> = sqlx::query_scalar(&query)
            .bind(kind.as_str())
            .bind(storage_id)
            .bind(entity_id)
            .bind(key)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;
        Ok(match created_at {
            Some(created_at) => LinkOutcome::Created(Link {
                kind: kind.clone(),
                storage_id,
                entity_id,
                key: key.to_string(),
                created_at,
            }),
            None => LinkOutcome::AlreadyLinked,
        })
    }

    async fn linked_keys(
        &self,
        kind: &StorageKind,
        storage_id: StorageId,
    ) -> Result<HashSet<String>> {
        let query = format!(
            "SELECT key FROM {} WHERE storage_kind = $1 AND storage_id = $2",
            self.table_name
        );
        let keys: Vec<String> = sqlx::query_scalar(&query)
            .bind(kind.as_str())
            .bind(storage_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(keys.into_iter().collect())
    }

    async fn list(&self, kind: &StorageKind, storage_id: StorageId) -> Result<Vec<Link>> {
        let query = format!(
            "SELECT storage_kind, storage_id, entity_id, key, created_at FROM {}
             WHERE storage_kind = $1 AND storage_id = $2
             ORDER BY created_at, entity_id",
            self.table_name
        );
        let rows: Vec<LinkRow> = sqlx::query_as(&query)
            .bind(kind.as_str())
            .bind(storage_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Link::from).collect())
    }

    async fn delete_for_storage(&self, kind: &StorageKind, storage_id: StorageId) -> Result<u64> {
        let query = format!(
            "DELETE FROM {} WHERE storage_kind = $1 AND storage_id = $2",
            self.table_name
        );
        let result = sqlx::query(&query)
            .bind(kind.as_str())
            .bind(storage_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_for_entity(&self, entity_id: EntityId) -> Result<u64> {
        let query = format!("DELETE FROM {} WHERE entity_id = $1", self.table_name);
        let result = sqlx::query(&query)
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn max_storage_id(&self) -> Result<Option<StorageId>> {
        let query = format!("SELECT MAX(storage_id) FROM {}", self.table_name);
        let max: Option<i64> = sqlx::query_scalar(&query).fetch_one(&self.pool).await?;
        Ok(max)
    }
}
