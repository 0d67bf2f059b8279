//! SQLite backend for development and small deployments.
//!
//! The pool is a queue of long-lived connections. Every newly created
//! connection is tuned for concurrent readers with one writer:
//! WAL journaling, relaxed synchronous mode, a larger page cache, and a
//! busy timeout so writers queue instead of failing. Connections returned
//! to a full pool are closed rather than kept.

use async_trait::async_trait;
use log::{error, info};
use rusqlite::types::{ToSqlOutput, Value as SqliteValue, ValueRef};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use super::{DatabaseBackend, DbConnection, DbError, DbRow, DbValue, PoolStats};

/// Applied to every new connection before it enters the pool.
const CONNECTION_PRAGMAS: &str = "PRAGMA journal_mode=WAL;\nPRAGMA synchronous=NORMAL;\nPRAGMA cache_size=10000;\nPRAGMA temp_store=memory;\nPRAGMA busy_timeout=5000;\nPRAGMA wal_autocheckpoint=1000;";

impl rusqlite::types::ToSql for DbValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            DbValue::Null => ToSqlOutput::Owned(SqliteValue::Null),
            DbValue::Integer(v) => ToSqlOutput::Owned(SqliteValue::Integer(*v)),
            DbValue::Real(v) => ToSqlOutput::Owned(SqliteValue::Real(*v)),
            DbValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            DbValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

fn query_err<E: std::fmt::Display>(e: E) -> DbError {
    DbError::Query(e.to_string())
}

fn row_to_values(row: &rusqlite::Row<'_>, columns: usize) -> Result<DbRow, DbError> {
    let mut out = Vec::with_capacity(columns);
    for i in 0..columns {
        let value = match row.get_ref(i).map_err(query_err)? {
            ValueRef::Null => DbValue::Null,
            ValueRef::Integer(v) => DbValue::Integer(v),
            ValueRef::Real(v) => DbValue::Real(v),
            ValueRef::Text(t) => DbValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => DbValue::Blob(b.to_vec()),
        };
        out.push(value);
    }
    Ok(out)
}

struct PoolInner {
    path: String,
    min_pool_size: usize,
    max_pool_size: usize,
    idle: StdMutex<VecDeque<rusqlite::Connection>>,
    closed: AtomicBool,
    total_connections: AtomicU64,
    total_queries: AtomicU64,
}

impl PoolInner {
    fn create_connection(&self) -> Result<rusqlite::Connection, DbError> {
        let conn = if self.path == ":memory:" {
            rusqlite::Connection::open_in_memory().map_err(|e| DbError::Pool(e.to_string()))?
        } else {
            rusqlite::Connection::open(&self.path).map_err(|e| DbError::Pool(e.to_string()))?
        };
        conn.execute_batch(CONNECTION_PRAGMAS)
            .map_err(|e| DbError::Pool(e.to_string()))?;
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    fn acquire(&self) -> Result<rusqlite::Connection, DbError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }
        let reused = {
            let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
            idle.pop_front()
        };
        match reused {
            Some(conn) => Ok(conn),
            None => self.create_connection(),
        }
    }

    fn release(&self, conn: rusqlite::Connection) {
        if self.closed.load(Ordering::SeqCst) {
            return; // dropped, which closes it
        }
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() < self.max_pool_size {
            idle.push_back(conn);
        }
        // Overflow connections are closed by dropping them here.
    }
}

/// Pooled SQLite connection; returns to the pool on drop.
pub struct SqliteConnection {
    conn: Option<rusqlite::Connection>,
    pool: Arc<PoolInner>,
}

impl SqliteConnection {
    fn conn(&self) -> Result<&rusqlite::Connection, DbError> {
        self.conn.as_ref().ok_or(DbError::Closed)
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[async_trait]
impl DbConnection for SqliteConnection {
    async fn execute(&mut self, sql: &str, params: &[DbValue]) -> Result<u64, DbError> {
        let changed = self
            .conn()?
            .execute(sql, rusqlite::params_from_iter(params.iter()))
            .map_err(query_err)?;
        Ok(changed as u64)
    }

    async fn fetch_one(
        &mut self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<Option<DbRow>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(query_err)?;
        let columns = stmt.column_count();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter()))
            .map_err(query_err)?;
        match rows.next().map_err(query_err)? {
            Some(row) => Ok(Some(row_to_values(row, columns)?)),
            None => Ok(None),
        }
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(query_err)?;
        let columns = stmt.column_count();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter()))
            .map_err(query_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(query_err)? {
            out.push(row_to_values(row, columns)?);
        }
        Ok(out)
    }
}

/// SQLite backend holding the connection pool.
pub struct SqliteBackend {
    pool: Arc<PoolInner>,
}

impl SqliteBackend {
    /// Create a backend for the given path (or `":memory:"`). The parent
    /// directory is created if missing.
    pub fn new(db_path: impl Into<String>, min_pool_size: usize, max_pool_size: usize) -> Self {
        let path = db_path.into();
        Self {
            pool: Arc::new(PoolInner {
                path,
                min_pool_size,
                max_pool_size,
                idle: StdMutex::new(VecDeque::new()),
                closed: AtomicBool::new(false),
                total_connections: AtomicU64::new(0),
                total_queries: AtomicU64::new(0),
            }),
        }
    }
}

#[async_trait]
impl DatabaseBackend for SqliteBackend {
    async fn initialize(&self) -> Result<(), DbError> {
        info!(
            "Initializing SQLite backend: {} (min: {}, max: {})",
            self.pool.path, self.pool.min_pool_size, self.pool.max_pool_size
        );

        if self.pool.path != ":memory:" {
            if let Some(parent) = Path::new(&self.pool.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| DbError::Config(format!("cannot create {:?}: {}", parent, e)))?;
                }
            }
        }

        for _ in 0..self.pool.min_pool_size {
            let conn = self.pool.create_connection()?;
            self.pool.release(conn);
        }

        info!("SQLite backend initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        self.pool.closed.store(true, Ordering::SeqCst);
        let drained: Vec<rusqlite::Connection> = {
            let mut idle = self.pool.idle.lock().unwrap_or_else(|e| e.into_inner());
            idle.drain(..).collect()
        };
        for conn in drained {
            if let Err((_, e)) = conn.close() {
                error!("Error closing connection: {}", e);
            }
        }
        info!("SQLite backend closed");
        Ok(())
    }

    async fn connection(&self) -> Result<Box<dyn DbConnection>, DbError> {
        let conn = self.pool.acquire()?;
        Ok(Box::new(SqliteConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.pool),
        }))
    }

    async fn execute(&self, sql: &str, params: &[DbValue]) -> Result<u64, DbError> {
        self.pool.total_queries.fetch_add(1, Ordering::Relaxed);
        self.connection().await?.execute(sql, params).await
    }

    async fn fetch_one(&self, sql: &str, params: &[DbValue]) -> Result<Option<DbRow>, DbError> {
        self.pool.total_queries.fetch_add(1, Ordering::Relaxed);
        self.connection().await?.fetch_one(sql, params).await
    }

    async fn fetch_all(&self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, DbError> {
        self.pool.total_queries.fetch_add(1, Ordering::Relaxed);
        self.connection().await?.fetch_all(sql, params).await
    }

    async fn stats(&self) -> PoolStats {
        let idle = {
            let idle = self.pool.idle.lock().unwrap_or_else(|e| e.into_inner());
            idle.len()
        };
        PoolStats {
            pool_size: idle,
            min_pool_size: self.pool.min_pool_size,
            max_pool_size: self.pool.max_pool_size,
            active_connections: self.pool.max_pool_size.saturating_sub(idle),
            idle_connections: idle,
            total_connections_created: self.pool.total_connections.load(Ordering::Relaxed),
            total_queries_executed: self.pool.total_queries.load(Ordering::Relaxed),
            backend_type: "sqlite",
            connection_string: format!("sqlite:///{}", self.pool.path),
        }
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    async fn table_exists(&self, table_name: &str) -> Result<bool, DbError> {
        let row = self
            .fetch_one(
                "SELECT name FROM sqlite_master WHERE type='table' AND name=?",
                &[DbValue::from(table_name)],
            )
            .await?;
        Ok(row.is_some())
    }
}
