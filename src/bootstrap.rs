//! Process wiring shared by the binaries.

use crate::agent::Orchestrator;
use crate::checkpoint::{CheckpointStore, InMemoryCheckpointStore, PostgresCheckpointStore};
use crate::config::AppConfig;
use crate::error::OrchestrationError;
use crate::llm::OpenAiChatModel;
use crate::tools::{create_default_registry, InMemoryLedger, LedgerStore, PostgresLedger};
use crate::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct Runtime {
    pub orchestrator: Arc<Orchestrator>,
    pool: Option<PgPool>,
}

impl Runtime {
    /// Open shared connections and assemble the orchestrator. Without a
    /// database URL, checkpoints and the ledger live in memory.
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let pool = match config.database_url.as_deref() {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(10)
                    .acquire_timeout(Duration::from_secs(10))
                    .connect(url)
                    .await
                    .map_err(|e| {
                        OrchestrationError::DatabaseError(format!(
                            "Failed to connect to Postgres: {}",
                            e
                        ))
                    })?;
                info!("Connected to Postgres");
                Some(pool)
            }
            None => {
                warn!("No database URL set; conversations and expenses are kept in memory");
                None
            }
        };

        let (checkpoints, ledger) = match &pool {
            Some(pool) => (
                Arc::new(PostgresCheckpointStore::new(pool.clone())) as Arc<dyn CheckpointStore>,
                Arc::new(PostgresLedger::new(pool.clone())) as Arc<dyn LedgerStore>,
            ),
            None => (
                Arc::new(InMemoryCheckpointStore::new()) as Arc<dyn CheckpointStore>,
                Arc::new(InMemoryLedger::new()) as Arc<dyn LedgerStore>,
            ),
        };

        let registry = create_default_registry(ledger, &config.tools)?;
        info!(tools = ?registry.list(), "Tool registry ready");

        let model = OpenAiChatModel::new(&config.model)?;

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(model),
            Arc::new(registry),
            checkpoints,
            config.turn.clone(),
        ));

        Ok(Self { orchestrator, pool })
    }

    /// Close the database pool, if any.
    pub async fn shutdown(self) {
        if let Some(pool) = self.pool {
            pool.close().await;
            info!("Database pool closed");
        }
    }
}
