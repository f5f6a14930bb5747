//! PostgreSQL request-log store (sqlx).

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::audit::event::RequestLogRecord;
use crate::audit::store::{Page, RequestLogFilter, RequestLogStore, StoreError};
use crate::config::DatabaseConfig;

const COLUMNS: &str = "id, method, path, query, client_address, headers, status_code, error, \
                       duration_ms, request_body, response_body, resource_id, created_at";

const SCHEMA: [&str; 4] = [
    r"CREATE TABLE IF NOT EXISTS request_logs (
        id UUID PRIMARY KEY,
        method TEXT NOT NULL,
        path TEXT NOT NULL,
        query TEXT,
        client_address TEXT NOT NULL,
        headers JSONB NOT NULL DEFAULT '{}'::jsonb,
        status_code INTEGER NOT NULL,
        error TEXT,
        duration_ms BIGINT NOT NULL,
        request_body JSONB,
        response_body JSONB,
        resource_id TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    // Widen columns created by earlier schema versions.
    "ALTER TABLE request_logs ALTER COLUMN method TYPE TEXT, ALTER COLUMN client_address TYPE TEXT",
    "CREATE INDEX IF NOT EXISTS idx_request_logs_created_at ON request_logs (created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_request_logs_resource_id ON request_logs (resource_id)",
];

pub struct PgRequestLogStore {
    pool: PgPool,
}

impl PgRequestLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool from configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| StoreError::Unavailable("database.url is not set".into()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(url)
            .await?;

        tracing::info!(max_connections = config.max_connections, "Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Create the `request_logs` table and its indexes if missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &RequestLogFilter) {
    builder.push(" WHERE TRUE");
    if let Some(method) = &filter.method {
        builder.push(" AND UPPER(method) = ").push_bind(method.to_uppercase());
    }
    if let Some(status) = filter.status_code {
        builder.push(" AND status_code = ").push_bind(status);
    }
    if let Some(path) = &filter.path {
        builder
            .push(" AND path ILIKE ")
            .push_bind(format!("%{}%", escape_like(path)));
    }
    if let Some(ip) = &filter.ip {
        builder.push(" AND client_address = ").push_bind(ip.clone());
    }
    if let Some(start) = filter.start_date {
        builder.push(" AND created_at >= ").push_bind(start);
    }
    if let Some(end) = filter.end_date {
        builder.push(" AND created_at <= ").push_bind(end);
    }
}

fn push_page(builder: &mut QueryBuilder<'_, Postgres>, page: Page) {
    builder
        .push(" ORDER BY created_at DESC OFFSET ")
        .push_bind(page.skip as i64)
        .push(" LIMIT ")
        .push_bind(page.limit as i64);
}

#[async_trait]
impl RequestLogStore for PgRequestLogStore {
    async fn insert(&self, record: RequestLogRecord) -> Result<RequestLogRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r"INSERT INTO request_logs (
                id, method, path, query, client_address, headers, status_code, error,
                duration_ms, request_body, response_body, resource_id, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(record.id)
        .bind(&record.method)
        .bind(&record.path)
        .bind(&record.query)
        .bind(&record.client_address)
        .bind(&record.headers)
        .bind(record.status_code)
        .bind(&record.error)
        .bind(record.duration_ms)
        .bind(&record.request_body)
        .bind(&record.response_body)
        .bind(&record.resource_id)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = result {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback after failed insert also failed");
            }
            return Err(e.into());
        }

        tx.commit().await?;
        Ok(record)
    }

    async fn list(
        &self,
        filter: &RequestLogFilter,
        page: Page,
    ) -> Result<Vec<RequestLogRecord>, StoreError> {
        let mut builder = QueryBuilder::new(format!("SELECT {} FROM request_logs", COLUMNS));
        push_filters(&mut builder, filter);
        push_page(&mut builder, page);

        let rows = builder
            .build_query_as::<RequestLogRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn count(&self, filter: &RequestLogFilter) -> Result<u64, StoreError> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM request_logs");
        push_filters(&mut builder, filter);

        let count: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn get(&self, id: Uuid) -> Result<Option<RequestLogRecord>, StoreError> {
        let row = sqlx::query_as::<_, RequestLogRecord>(&format!(
            "SELECT {} FROM request_logs WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_by_resource(
        &self,
        resource_id: &str,
        page: Page,
    ) -> Result<Vec<RequestLogRecord>, StoreError> {
        let mut builder = QueryBuilder::new(format!("SELECT {} FROM request_logs", COLUMNS));
        builder
            .push(" WHERE resource_id = ")
            .push_bind(resource_id.to_string());
        push_page(&mut builder, page);

        let rows = builder
            .build_query_as::<RequestLogRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM request_logs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
