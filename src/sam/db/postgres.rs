//! PostgreSQL backend for production use.
//!
//! Pooling is delegated to `deadpool-postgres`. A dialect shim lets the
//! rest of the crate keep writing SQLite-style SQL: `?` placeholders are
//! rewritten to `$1, $2, …`, `PRAGMA` statements become no-ops, and a
//! leading `REPLACE INTO` is rewritten to `INSERT INTO` at a best-effort
//! level — complex upserts should be written native (the in-tree memory
//! subsystem does exactly that).

use async_trait::async_trait;
use bytes::BytesMut;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use log::{info, warn};
use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::NoTls;

use super::{
    sanitize_connection_string, DatabaseBackend, DbConnection, DbError, DbRow, DbValue, PoolStats,
};

/// Translate SQLite-style SQL to PostgreSQL.
///
/// Returns `None` for statements that have no Postgres counterpart
/// (`PRAGMA`), which callers treat as a successful no-op.
pub(crate) fn translate_sql(sql: &str) -> Option<String> {
    let trimmed = sql.trim_start();
    if trimmed.len() >= 6 && trimmed[..6].eq_ignore_ascii_case("pragma") {
        return None;
    }

    let mut translated = String::with_capacity(sql.len() + 8);
    let mut param_count = 0usize;
    for ch in sql.chars() {
        if ch == '?' {
            param_count += 1;
            translated.push('$');
            translated.push_str(&param_count.to_string());
        } else {
            translated.push(ch);
        }
    }

    // Best-effort REPLACE INTO rewrite; the conflict action is left to the
    // caller, matching upserts must be written native.
    let trimmed = translated.trim_start();
    if trimmed.len() >= 12 && trimmed[..12].eq_ignore_ascii_case("replace into") {
        let offset = translated.len() - trimmed.len();
        let mut rewritten = translated[..offset].to_string();
        rewritten.push_str("INSERT INTO");
        rewritten.push_str(&trimmed[12..]);
        return Some(rewritten);
    }

    Some(translated)
}

impl ToSql for DbValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            DbValue::Null => Ok(IsNull::Yes),
            DbValue::Integer(v) => {
                if *ty == Type::INT2 {
                    (*v as i16).to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    (*v as i32).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            DbValue::Real(v) => {
                if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            DbValue::Text(s) => s.to_sql(ty, out),
            DbValue::Blob(b) => b.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn query_err<E: std::fmt::Display>(e: E) -> DbError {
    DbError::Query(e.to_string())
}

fn pg_params(params: &[DbValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

fn row_to_values(row: &tokio_postgres::Row) -> DbRow {
    let mut out = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::BOOL {
            row.get::<_, Option<bool>>(i)
                .map(|b| DbValue::Integer(b as i64))
        } else if *ty == Type::INT2 {
            row.get::<_, Option<i16>>(i).map(|v| DbValue::Integer(v as i64))
        } else if *ty == Type::INT4 {
            row.get::<_, Option<i32>>(i).map(|v| DbValue::Integer(v as i64))
        } else if *ty == Type::INT8 {
            row.get::<_, Option<i64>>(i).map(DbValue::Integer)
        } else if *ty == Type::FLOAT4 {
            row.get::<_, Option<f32>>(i).map(|v| DbValue::Real(v as f64))
        } else if *ty == Type::FLOAT8 {
            row.get::<_, Option<f64>>(i).map(DbValue::Real)
        } else if *ty == Type::BYTEA {
            row.get::<_, Option<Vec<u8>>>(i).map(DbValue::Blob)
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            row.get::<_, Option<serde_json::Value>>(i)
                .map(|v| DbValue::Text(v.to_string()))
        } else if *ty == Type::TIMESTAMPTZ {
            row.get::<_, Option<chrono::DateTime<chrono::Utc>>>(i)
                .map(|t| DbValue::Text(t.to_rfc3339()))
        } else {
            // TEXT, VARCHAR, NAME and anything else textual.
            row.get::<_, Option<String>>(i).map(DbValue::Text)
        };
        out.push(value.unwrap_or(DbValue::Null));
    }
    out
}

/// Pooled Postgres connection with dialect translation.
pub struct PostgresConnection {
    client: Object,
}

#[async_trait]
impl DbConnection for PostgresConnection {
    async fn execute(&mut self, sql: &str, params: &[DbValue]) -> Result<u64, DbError> {
        let Some(translated) = translate_sql(sql) else {
            return Ok(0); // PRAGMA: no-op
        };
        if params.is_empty() {
            // Simple protocol: handles BEGIN/COMMIT/DDL without preparing.
            self.client
                .batch_execute(&translated)
                .await
                .map_err(query_err)?;
            Ok(0)
        } else {
            self.client
                .execute(translated.as_str(), &pg_params(params))
                .await
                .map_err(query_err)
        }
    }

    async fn fetch_one(
        &mut self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<Option<DbRow>, DbError> {
        let Some(translated) = translate_sql(sql) else {
            return Ok(None);
        };
        let row = self
            .client
            .query_opt(translated.as_str(), &pg_params(params))
            .await
            .map_err(query_err)?;
        Ok(row.as_ref().map(row_to_values))
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, DbError> {
        let Some(translated) = translate_sql(sql) else {
            return Ok(Vec::new());
        };
        let rows = self
            .client
            .query(translated.as_str(), &pg_params(params))
            .await
            .map_err(query_err)?;
        Ok(rows.iter().map(row_to_values).collect())
    }
}

/// PostgreSQL backend using deadpool for connection pooling.
pub struct PostgresBackend {
    connection_string: String,
    min_pool_size: usize,
    max_pool_size: usize,
    pool: Mutex<Option<Pool>>,
    total_connections: AtomicU64,
    total_queries: AtomicU64,
}

impl PostgresBackend {
    /// Create a backend for the given `postgresql://` connection string.
    pub fn new(connection_string: impl Into<String>, min_pool_size: usize, max_pool_size: usize) -> Self {
        Self {
            connection_string: connection_string.into(),
            min_pool_size,
            max_pool_size,
            pool: Mutex::new(None),
            total_connections: AtomicU64::new(0),
            total_queries: AtomicU64::new(0),
        }
    }

    async fn pool(&self) -> Result<Pool, DbError> {
        let guard = self.pool.lock().await;
        guard.clone().ok_or(DbError::Closed)
    }

    async fn acquire(&self) -> Result<Object, DbError> {
        let pool = self.pool().await?;
        let client = pool.get().await.map_err(|e| DbError::Pool(e.to_string()))?;
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        Ok(client)
    }
}

#[async_trait]
impl DatabaseBackend for PostgresBackend {
    async fn initialize(&self) -> Result<(), DbError> {
        info!(
            "Initializing PostgreSQL pool: {} (min: {}, max: {})",
            sanitize_connection_string(&self.connection_string),
            self.min_pool_size,
            self.max_pool_size
        );

        let config: tokio_postgres::Config = self
            .connection_string
            .parse()
            .map_err(|e: tokio_postgres::Error| DbError::Config(e.to_string()))?;

        let manager = Manager::from_config(
            config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(self.max_pool_size)
            .build()
            .map_err(|e| DbError::Pool(e.to_string()))?;

        // Pre-warm to the minimum size.
        let mut warmers = Vec::with_capacity(self.min_pool_size);
        for _ in 0..self.min_pool_size {
            match pool.get().await {
                Ok(obj) => warmers.push(obj),
                Err(e) => {
                    warn!("Failed to pre-warm PostgreSQL connection: {}", e);
                    break;
                }
            }
        }
        drop(warmers);

        *self.pool.lock().await = Some(pool);
        info!("PostgreSQL pool initialized successfully");
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.take() {
            pool.close();
            info!("PostgreSQL pool closed");
        }
        Ok(())
    }

    async fn connection(&self) -> Result<Box<dyn DbConnection>, DbError> {
        let client = self.acquire().await?;
        Ok(Box::new(PostgresConnection { client }))
    }

    async fn execute(&self, sql: &str, params: &[DbValue]) -> Result<u64, DbError> {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        self.connection().await?.execute(sql, params).await
    }

    async fn fetch_one(&self, sql: &str, params: &[DbValue]) -> Result<Option<DbRow>, DbError> {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        self.connection().await?.fetch_one(sql, params).await
    }

    async fn fetch_all(&self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, DbError> {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        self.connection().await?.fetch_all(sql, params).await
    }

    async fn stats(&self) -> PoolStats {
        let status = {
            let guard = self.pool.lock().await;
            guard.as_ref().map(|p| p.status())
        };
        let (size, available) = status.map(|s| (s.size, s.available)).unwrap_or((0, 0));
        PoolStats {
            pool_size: size,
            min_pool_size: self.min_pool_size,
            max_pool_size: self.max_pool_size,
            active_connections: size.saturating_sub(available),
            idle_connections: available,
            total_connections_created: self.total_connections.load(Ordering::Relaxed),
            total_queries_executed: self.total_queries.load(Ordering::Relaxed),
            backend_type: "postgresql",
            connection_string: sanitize_connection_string(&self.connection_string),
        }
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    async fn table_exists(&self, table_name: &str) -> Result<bool, DbError> {
        let row = self
            .fetch_one(
                "SELECT EXISTS (SELECT FROM information_schema.tables WHERE table_schema = 'public' AND table_name = ?)",
                &[DbValue::from(table_name)],
            )
            .await?;
        Ok(row
            .and_then(|r| r.first().and_then(DbValue::as_i64))
            .unwrap_or(0)
            != 0)
    }
}
