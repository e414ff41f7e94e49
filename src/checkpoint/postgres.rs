//! Postgres-backed checkpoint store
//!
//! One row per (session_id, namespace). The version column doubles as the
//! optimistic lock: updates are guarded by `WHERE version = $expected`.

use crate::checkpoint::CheckpointStore;
use crate::error::OrchestrationError;
use crate::models::{Checkpoint, ConversationState};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub struct PostgresCheckpointStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresCheckpointStore {
    /// The pool is owned by the caller, which closes it at shutdown.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS conversation_checkpoints (
                      session_id TEXT NOT NULL,
                      namespace TEXT NOT NULL,
                      version BIGINT NOT NULL,
                      messages JSONB NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      PRIMARY KEY (session_id, namespace)
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                info!("Checkpoint schema ready");
                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!(
                    "Failed to initialize checkpoint schema: {}",
                    e
                ))
            })?;

        Ok(())
    }

    async fn current_version(&self, session_id: &str, namespace: &str) -> Result<u64> {
        let version: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM conversation_checkpoints WHERE session_id = $1 AND namespace = $2",
        )
        .bind(session_id)
        .bind(namespace)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            OrchestrationError::DatabaseError(format!("Failed to read checkpoint version: {}", e))
        })?;

        Ok(version.unwrap_or(0).max(0) as u64)
    }
}

#[async_trait::async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    async fn load(&self, session_id: &str, namespace: &str) -> Result<Checkpoint> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            SELECT version, messages, updated_at
            FROM conversation_checkpoints
            WHERE session_id = $1 AND namespace = $2
            "#,
        )
        .bind(session_id)
        .bind(namespace)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            OrchestrationError::DatabaseError(format!("Failed to load checkpoint: {}", e))
        })?;

        let Some(row) = row else {
            return Ok(Checkpoint::empty(session_id, namespace));
        };

        let version: i64 = row.try_get("version").map_err(|e| {
            OrchestrationError::DatabaseError(format!("Corrupt checkpoint version: {}", e))
        })?;
        let Json(state): Json<ConversationState> = row.try_get("messages").map_err(|e| {
            OrchestrationError::DatabaseError(format!("Corrupt checkpoint messages: {}", e))
        })?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at").unwrap_or_else(|_| Utc::now());

        Ok(Checkpoint {
            session_id: session_id.to_string(),
            namespace: namespace.to_string(),
            version: version.max(0) as u64,
            state,
            updated_at,
        })
    }

    async fn save(
        &self,
        session_id: &str,
        namespace: &str,
        state: &ConversationState,
        expected_version: u64,
    ) -> Result<u64> {
        self.ensure_schema().await?;

        let next_version = expected_version + 1;

        let result = if expected_version == 0 {
            sqlx::query(
                r#"
                INSERT INTO conversation_checkpoints (session_id, namespace, version, messages, updated_at)
                VALUES ($1, $2, 1, $3, NOW())
                ON CONFLICT (session_id, namespace) DO NOTHING
                "#,
            )
            .bind(session_id)
            .bind(namespace)
            .bind(Json(state))
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                UPDATE conversation_checkpoints
                SET version = $4, messages = $3, updated_at = NOW()
                WHERE session_id = $1 AND namespace = $2 AND version = $5
                "#,
            )
            .bind(session_id)
            .bind(namespace)
            .bind(Json(state))
            .bind(next_version as i64)
            .bind(expected_version as i64)
            .execute(&self.pool)
            .await
        }
        .map_err(|e| {
            OrchestrationError::DatabaseError(format!("Failed to save checkpoint: {}", e))
        })?;

        if result.rows_affected() == 0 {
            let actual = self.current_version(session_id, namespace).await?;
            return Err(OrchestrationError::VersionConflict {
                session_id: session_id.to_string(),
                expected: expected_version,
                actual,
            });
        }

        debug!(session_id, namespace, version = next_version, "Checkpoint committed");
        Ok(next_version)
    }
}
