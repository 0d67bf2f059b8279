//! Session memory.
//!
//! A session is an ordered message history keyed by `session_id`. Messages
//! are appended by the orchestrator and never rewritten; resuming a
//! session replays them back into the provider request. The store speaks
//! SQLite-style SQL with `?` placeholders and relies on the
//! [`DatabaseEngine`](crate::db::engine::DatabaseEngine)'s dialect shim on
//! Postgres; ordering uses an explicit per-session sequence number so both
//! backends behave identically.

use std::sync::Arc;

use crate::db::engine::DatabaseEngine;
use crate::db::{DbConnection, DbError, DbValue, Migration, TxFn};
use crate::provider::{Message, Role, ToolCall};

fn create_sessions_table(conn: &mut dyn DbConnection) -> TxFn<'_, ()> {
    Box::pin(async move {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (\n                session_id TEXT PRIMARY KEY,\n                created_at TEXT NOT NULL,\n                updated_at TEXT NOT NULL\n            )",
            &[],
        )
        .await?;
        Ok(())
    })
}

fn create_messages_table(conn: &mut dyn DbConnection) -> TxFn<'_, ()> {
    Box::pin(async move {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS session_messages (\n                session_id TEXT NOT NULL,\n                seq INTEGER NOT NULL,\n                role TEXT NOT NULL,\n                content TEXT NOT NULL,\n                tool_calls TEXT,\n                tool_call_id TEXT,\n                created_at TEXT NOT NULL,\n                PRIMARY KEY (session_id, seq)\n            )",
            &[],
        )
        .await?;
        Ok(())
    })
}

/// Schema migrations owned by the memory subsystem.
pub fn memory_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "create_sessions",
            up: create_sessions_table,
        },
        Migration {
            version: 2,
            name: "create_session_messages",
            up: create_messages_table,
        },
    ]
}

/// Summary row for session listings.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: String,
    pub updated_at: String,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn encode_tool_calls(tool_calls: &[ToolCall]) -> Result<DbValue, DbError> {
    if tool_calls.is_empty() {
        return Ok(DbValue::Null);
    }
    serde_json::to_string(tool_calls)
        .map(DbValue::Text)
        .map_err(|e| DbError::Query(format!("cannot encode tool_calls: {}", e)))
}

fn decode_tool_calls(cell: &DbValue) -> Vec<ToolCall> {
    match cell.as_str() {
        Some(raw) => serde_json::from_str(raw).unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Persisted conversation history over the shared database engine.
pub struct MemoryStore {
    db: Arc<DatabaseEngine>,
}

impl MemoryStore {
    /// Wrap the shared engine.
    pub fn new(db: Arc<DatabaseEngine>) -> Self {
        Self { db }
    }

    /// Apply the memory schema migrations.
    pub async fn initialize(&self) -> Result<(), DbError> {
        self.db.run_migrations(&memory_migrations()).await
    }

    /// Create a session row if it does not exist yet.
    pub async fn create_session(&self, session_id: &str) -> Result<(), DbError> {
        let ts = now();
        self.db
            .execute(
                "INSERT INTO sessions (session_id, created_at, updated_at)\n                 SELECT ?, ?, ?\n                 WHERE NOT EXISTS (SELECT 1 FROM sessions WHERE session_id = ?)",
                &[
                    DbValue::from(session_id),
                    DbValue::Text(ts.clone()),
                    DbValue::Text(ts),
                    DbValue::from(session_id),
                ],
            )
            .await?;
        Ok(())
    }

    /// Load a session's messages in append order. An unknown session is an
    /// empty history, not an error.
    pub async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>, DbError> {
        let rows = self
            .db
            .fetch_all(
                "SELECT role, content, tool_calls, tool_call_id\n                 FROM session_messages WHERE session_id = ? ORDER BY seq",
                &[DbValue::from(session_id)],
            )
            .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let role = row
                .first()
                .and_then(DbValue::as_str)
                .and_then(Role::parse)
                .ok_or_else(|| DbError::Query("corrupt role column".into()))?;
            let content = row
                .get(1)
                .and_then(DbValue::as_str)
                .unwrap_or_default()
                .to_string();
            let tool_calls = row.get(2).map(decode_tool_calls).unwrap_or_default();
            let tool_call_id = row
                .get(3)
                .and_then(DbValue::as_str)
                .map(String::from);
            messages.push(Message {
                role,
                content,
                tool_calls,
                tool_call_id,
            });
        }
        Ok(messages)
    }

    /// Append messages to a session inside one transaction, creating the
    /// session row when missing and touching its `updated_at`.
    pub async fn append_messages(
        &self,
        session_id: &str,
        messages: &[Message],
    ) -> Result<(), DbError> {
        if messages.is_empty() {
            return Ok(());
        }

        // Encode outside the transaction so a bad message cannot leave a
        // half-written batch behind.
        let mut encoded: Vec<(String, String, DbValue, DbValue)> =
            Vec::with_capacity(messages.len());
        for message in messages {
            encoded.push((
                message.role.to_string(),
                message.content.clone(),
                encode_tool_calls(&message.tool_calls)?,
                DbValue::from(message.tool_call_id.clone()),
            ));
        }

        let session_id = session_id.to_string();
        self.db
            .transaction(move |conn: &mut dyn DbConnection| {
                Box::pin(async move {
                    let ts = now();
                    conn.execute(
                        "INSERT INTO sessions (session_id, created_at, updated_at)\n                         SELECT ?, ?, ?\n                         WHERE NOT EXISTS (SELECT 1 FROM sessions WHERE session_id = ?)",
                        &[
                            DbValue::Text(session_id.clone()),
                            DbValue::Text(ts.clone()),
                            DbValue::Text(ts.clone()),
                            DbValue::Text(session_id.clone()),
                        ],
                    )
                    .await?;

                    let row = conn
                        .fetch_one(
                            "SELECT COALESCE(MAX(seq), 0) FROM session_messages WHERE session_id = ?",
                            &[DbValue::Text(session_id.clone())],
                        )
                        .await?;
                    let mut seq = row
                        .and_then(|r| r.first().and_then(DbValue::as_i64))
                        .unwrap_or(0);

                    for (role, content, tool_calls, tool_call_id) in encoded {
                        seq += 1;
                        conn.execute(
                            "INSERT INTO session_messages\n                             (session_id, seq, role, content, tool_calls, tool_call_id, created_at)\n                             VALUES (?, ?, ?, ?, ?, ?, ?)",
                            &[
                                DbValue::Text(session_id.clone()),
                                DbValue::Integer(seq),
                                DbValue::Text(role),
                                DbValue::Text(content),
                                tool_calls,
                                tool_call_id,
                                DbValue::Text(ts.clone()),
                            ],
                        )
                        .await?;
                    }

                    conn.execute(
                        "UPDATE sessions SET updated_at = ? WHERE session_id = ?",
                        &[DbValue::Text(ts), DbValue::Text(session_id)],
                    )
                    .await?;
                    Ok(())
                })
            })
            .await
    }

    /// Most recently updated sessions, newest first.
    pub async fn list_sessions(&self, limit: i64) -> Result<Vec<SessionInfo>, DbError> {
        let rows = self
            .db
            .fetch_all(
                "SELECT session_id, created_at, updated_at FROM sessions\n                 ORDER BY updated_at DESC LIMIT ?",
                &[DbValue::Integer(limit)],
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                Some(SessionInfo {
                    session_id: row.first()?.as_str()?.to_string(),
                    created_at: row.get(1)?.as_str()?.to_string(),
                    updated_at: row.get(2)?.as_str()?.to_string(),
                })
            })
            .collect())
    }

    /// The most recently updated session, if any.
    pub async fn latest_session(&self) -> Result<Option<SessionInfo>, DbError> {
        Ok(self.list_sessions(1).await?.into_iter().next())
    }

    /// Delete every session and message; returns the deleted session
    /// count.
    pub async fn clear_all_sessions(&self) -> Result<u64, DbError> {
        self.db.execute("DELETE FROM session_messages", &[]).await?;
        self.db.execute("DELETE FROM sessions", &[]).await
    }

    /// Session-stats snapshot as JSON (for events and health endpoints).
    pub async fn session_count(&self) -> Result<i64, DbError> {
        let row = self
            .db
            .fetch_one("SELECT COUNT(*) FROM sessions", &[])
            .await?;
        Ok(row
            .and_then(|r| r.first().and_then(DbValue::as_i64))
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> (tempfile::TempDir, MemoryStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite:///{}", dir.path().join("m.db").to_string_lossy());
        let store = MemoryStore::new(Arc::new(DatabaseEngine::new(url)));
        store.initialize().await.expect("migrations");
        (dir, store)
    }

    #[tokio::test]
    async fn test_empty_session_loads_empty() {
        let (_dir, store) = store().await;
        assert!(store.load_messages("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_and_load_round_trip() {
        let (_dir, store) = store().await;

        let tool_call = ToolCall {
            id: "c1".into(),
            name: "echo".into(),
            arguments: json!({"x": 1}),
        };
        let history = vec![
            Message::new(Role::System, "You are SAM."),
            Message::new(Role::User, "hello"),
            Message::assistant_with_tool_calls("", vec![tool_call.clone()]),
            Message::tool_result("c1", "{\"x\":1}"),
            Message::new(Role::Assistant, "done"),
        ];
        store.append_messages("s1", &history).await.unwrap();

        let loaded = store.load_messages("s1").await.unwrap();
        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded[0].role, Role::System);
        assert_eq!(loaded[2].tool_calls, vec![tool_call]);
        assert_eq!(loaded[3].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(loaded[4].content, "done");
    }

    #[tokio::test]
    async fn test_appends_preserve_order_across_batches() {
        let (_dir, store) = store().await;
        store
            .append_messages("s1", &[Message::new(Role::User, "one")])
            .await
            .unwrap();
        store
            .append_messages("s1", &[Message::new(Role::Assistant, "two")])
            .await
            .unwrap();

        let loaded = store.load_messages("s1").await.unwrap();
        assert_eq!(loaded[0].content, "one");
        assert_eq!(loaded[1].content, "two");
    }

    #[tokio::test]
    async fn test_list_and_clear_sessions() {
        let (_dir, store) = store().await;
        store.create_session("a").await.unwrap();
        store
            .append_messages("b", &[Message::new(Role::User, "hi")])
            .await
            .unwrap();

        let sessions = store.list_sessions(10).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(store.session_count().await.unwrap(), 2);

        store.clear_all_sessions().await.unwrap();
        assert_eq!(store.session_count().await.unwrap(), 0);
        assert!(store.load_messages("b").await.unwrap().is_empty());
    }
}
