use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::{AllocationRow, LogEntry, OrderRow, ResourceRow, Store};

pub const ENV_DB_PATH: &str = "CKD_DATABASE_PATH";

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_resources_table: bool,
}

/// SQLite-backed [`Store`].
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database file at `path`.
    pub async fn connect(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open sqlite db {}", path.display()))?;

        tracing::debug!(path = %path.display(), "sqlite store opened");
        Ok(Self { pool })
    }

    /// Connect using `CKD_DATABASE_PATH`.
    pub async fn connect_from_env() -> Result<Self> {
        let path = std::env::var(ENV_DB_PATH)
            .with_context(|| format!("missing env var {ENV_DB_PATH}"))?;
        Self::connect(Path::new(&path)).await
    }

    /// Run embedded SQLx migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("db migrate failed")?;
        Ok(())
    }

    /// Connectivity + schema presence.
    pub async fn status(&self) -> Result<DbStatus> {
        let (one,): (i64,) = sqlx::query_as::<_, (i64,)>("select 1")
            .fetch_one(&self.pool)
            .await
            .context("status connectivity query failed")?;

        let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
            "select count(*) from sqlite_master where type = 'table' and name = 'resources'",
        )
        .fetch_one(&self.pool)
        .await
        .context("status table-exists query failed")?;

        Ok(DbStatus {
            ok: one == 1,
            has_resources_table: n > 0,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn load_resources(&self) -> Result<Vec<ResourceRow>> {
        let rows = sqlx::query_as::<_, (String, i64, i64)>(
            "select resource_name, total, available from resources order by resource_name",
        )
        .fetch_all(&self.pool)
        .await
        .context("load_resources failed")?;

        Ok(rows
            .into_iter()
            .map(|(resource_name, total, available)| ResourceRow {
                resource_name,
                total,
                available,
            })
            .collect())
    }

    async fn upsert_resource(
        &self,
        resource_name: &str,
        total: i64,
        available: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            insert into resources (resource_name, total, available)
            values (?1, ?2, ?3)
            on conflict(resource_name) do update set
                total = excluded.total,
                available = excluded.available
            "#,
        )
        .bind(resource_name)
        .bind(total)
        .bind(available)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upsert_resource failed for {resource_name}"))?;
        Ok(())
    }

    async fn load_orders(&self) -> Result<Vec<OrderRow>> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            "select order_id, status, priority from orders order by order_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("load_orders failed")?;

        Ok(rows
            .into_iter()
            .map(|(order_id, status, priority)| OrderRow {
                order_id,
                status,
                priority,
            })
            .collect())
    }

    async fn upsert_order(&self, order_id: &str, status: &str, priority: i64) -> Result<()> {
        sqlx::query(
            r#"
            insert into orders (order_id, status, priority)
            values (?1, ?2, ?3)
            on conflict(order_id) do update set
                status = excluded.status,
                priority = excluded.priority
            "#,
        )
        .bind(order_id)
        .bind(status)
        .bind(priority)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upsert_order failed for {order_id}"))?;
        Ok(())
    }

    async fn delete_order(&self, order_id: &str) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("delete_order begin failed")?;

        sqlx::query("delete from allocations where order_id = ?1")
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .context("delete_order allocations failed")?;
        sqlx::query("delete from orders where order_id = ?1")
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .context("delete_order failed")?;

        tx.commit().await.context("delete_order commit failed")?;
        Ok(())
    }

    async fn load_allocations(&self) -> Result<Vec<AllocationRow>> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            "select order_id, resource_name, quantity from allocations order by order_id, resource_name",
        )
        .fetch_all(&self.pool)
        .await
        .context("load_allocations failed")?;

        Ok(rows
            .into_iter()
            .map(|(order_id, resource_name, quantity)| AllocationRow {
                order_id,
                resource_name,
                quantity,
            })
            .collect())
    }

    async fn upsert_allocation(
        &self,
        order_id: &str,
        resource_name: &str,
        quantity: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            insert into allocations (order_id, resource_name, quantity)
            values (?1, ?2, ?3)
            on conflict(order_id, resource_name) do update set
                quantity = excluded.quantity
            "#,
        )
        .bind(order_id)
        .bind(resource_name)
        .bind(quantity)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upsert_allocation failed for {order_id}/{resource_name}"))?;
        Ok(())
    }

    async fn delete_allocations_for_order(&self, order_id: &str) -> Result<()> {
        sqlx::query("delete from allocations where order_id = ?1")
            .bind(order_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("delete_allocations_for_order failed for {order_id}"))?;
        Ok(())
    }

    async fn append_log_entry(&self, ts_utc: DateTime<Utc>, event: &str) -> Result<()> {
        sqlx::query("insert into logs (timestamp, event) values (?1, ?2)")
            .bind(ts_utc)
            .bind(event)
            .execute(&self.pool)
            .await
            .context("append_log_entry failed")?;
        Ok(())
    }

    async fn recent_log_entries(&self, limit: i64) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query_as::<_, (DateTime<Utc>, String)>(
            "select timestamp, event from logs order by id desc limit ?1",
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .context("recent_log_entries failed")?;

        Ok(rows
            .into_iter()
            .map(|(ts_utc, event)| LogEntry { ts_utc, event })
            .collect())
    }
}
