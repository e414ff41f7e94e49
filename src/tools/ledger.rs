//! Expense and goal ledger
//!
//! Writes carry the dispatcher's idempotency key; a repeated key returns the
//! row recorded the first time instead of inserting again.

use crate::error::OrchestrationError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpenseRecord {
    pub expense_id: Uuid,
    pub user_id: String,
    pub amount: f64,
    pub category: String,
    pub description: Option<String>,
    pub spent_at: DateTime<Utc>,
    #[serde(skip)]
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GoalRecord {
    pub goal_id: Uuid,
    pub user_id: String,
    pub goal_text: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub idempotency_key: String,
}

/// Outcome of an idempotent insert.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded<T> {
    New(T),
    Duplicate(T),
}

impl<T> Recorded<T> {
    pub fn into_inner(self) -> T {
        match self {
            Recorded::New(record) | Recorded::Duplicate(record) => record,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Recorded::Duplicate(_))
    }
}

/// Trait for ledger persistence
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_expense(&self, record: ExpenseRecord) -> Result<Recorded<ExpenseRecord>>;

    /// Expenses of `user_id` at or after `since`, newest first.
    async fn expenses_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        category: Option<&str>,
    ) -> Result<Vec<ExpenseRecord>>;

    async fn insert_goal(&self, record: GoalRecord) -> Result<Recorded<GoalRecord>>;
}

//
// ================= In-memory =================
//

#[derive(Default)]
struct LedgerTables {
    expenses: Vec<ExpenseRecord>,
    goals: Vec<GoalRecord>,
    keys: HashMap<String, usize>,
}

/// In-memory ledger for development and tests
pub struct InMemoryLedger {
    tables: Arc<RwLock<LedgerTables>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(LedgerTables::default())),
        }
    }

    pub async fn expense_count(&self) -> usize {
        self.tables.read().await.expenses.len()
    }

    pub async fn goal_count(&self) -> usize {
        self.tables.read().await.goals.len()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedger {
    async fn insert_expense(&self, record: ExpenseRecord) -> Result<Recorded<ExpenseRecord>> {
        let mut tables = self.tables.write().await;

        if let Some(&index) = tables.keys.get(&record.idempotency_key) {
            if let Some(existing) = tables.expenses.get(index) {
                if existing.idempotency_key == record.idempotency_key {
                    return Ok(Recorded::Duplicate(existing.clone()));
                }
            }
        }

        let index = tables.expenses.len();
        tables.keys.insert(record.idempotency_key.clone(), index);
        tables.expenses.push(record.clone());
        Ok(Recorded::New(record))
    }

    async fn expenses_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        category: Option<&str>,
    ) -> Result<Vec<ExpenseRecord>> {
        let tables = self.tables.read().await;

        let mut rows: Vec<ExpenseRecord> = tables
            .expenses
            .iter()
            .filter(|e| e.user_id == user_id && e.spent_at >= since)
            .filter(|e| category.map_or(true, |c| e.category == c))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.spent_at.cmp(&a.spent_at));
        Ok(rows)
    }

    async fn insert_goal(&self, record: GoalRecord) -> Result<Recorded<GoalRecord>> {
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables
            .goals
            .iter()
            .find(|g| g.idempotency_key == record.idempotency_key)
        {
            return Ok(Recorded::Duplicate(existing.clone()));
        }

        tables.goals.push(record.clone());
        Ok(Recorded::New(record))
    }
}

//
// ================= Postgres =================
//

pub struct PostgresLedger {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresLedger {
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
                    CREATE TABLE IF NOT EXISTS expenses (
                      expense_id UUID PRIMARY KEY,
                      user_id TEXT NOT NULL,
                      amount DOUBLE PRECISION NOT NULL,
                      category TEXT NOT NULL,
                      description TEXT,
                      spent_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      idempotency_key TEXT NOT NULL UNIQUE
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS expenses_user_spent_idx ON expenses (user_id, spent_at DESC);",
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS goals (
                      goal_id UUID PRIMARY KEY,
                      user_id TEXT NOT NULL,
                      goal_text TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      idempotency_key TEXT NOT NULL UNIQUE
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                info!("Ledger schema ready");
                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!(
                    "Failed to initialize ledger schema: {}",
                    e
                ))
            })?;

        Ok(())
    }

    fn expense_from_row(row: &sqlx::postgres::PgRow) -> Result<ExpenseRecord> {
        let decode = |e: sqlx::Error| {
            OrchestrationError::DatabaseError(format!("Corrupt expense row: {}", e))
        };

        Ok(ExpenseRecord {
            expense_id: row.try_get("expense_id").map_err(decode)?,
            user_id: row.try_get("user_id").map_err(decode)?,
            amount: row.try_get("amount").map_err(decode)?,
            category: row.try_get("category").map_err(decode)?,
            description: row.try_get("description").map_err(decode)?,
            spent_at: row.try_get("spent_at").map_err(decode)?,
            idempotency_key: row.try_get("idempotency_key").map_err(decode)?,
        })
    }
}

#[async_trait::async_trait]
impl LedgerStore for PostgresLedger {
    async fn insert_expense(&self, record: ExpenseRecord) -> Result<Recorded<ExpenseRecord>> {
        self.ensure_schema().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO expenses (expense_id, user_id, amount, category, description, spent_at, idempotency_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(record.expense_id)
        .bind(&record.user_id)
        .bind(record.amount)
        .bind(&record.category)
        .bind(&record.description)
        .bind(record.spent_at)
        .bind(&record.idempotency_key)
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestrationError::DatabaseError(format!("Failed to insert expense: {}", e)))?;

        if inserted.rows_affected() == 1 {
            return Ok(Recorded::New(record));
        }

        let row = sqlx::query(
            r#"
            SELECT expense_id, user_id, amount, category, description, spent_at, idempotency_key
            FROM expenses
            WHERE idempotency_key = $1
            "#,
        )
        .bind(&record.idempotency_key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            OrchestrationError::DatabaseError(format!("Failed to read recorded expense: {}", e))
        })?;

        debug!(user_id = %record.user_id, "Expense already recorded for this call");
        Ok(Recorded::Duplicate(Self::expense_from_row(&row)?))
    }

    async fn expenses_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        category: Option<&str>,
    ) -> Result<Vec<ExpenseRecord>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT expense_id, user_id, amount, category, description, spent_at, idempotency_key
            FROM expenses
            WHERE user_id = $1
              AND spent_at >= $2
              AND ($3::TEXT IS NULL OR category = $3)
            ORDER BY spent_at DESC
            "#,
        )
        .bind(user_id)
        .bind(since)
        .bind(category)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OrchestrationError::DatabaseError(format!("Failed to query expenses: {}", e)))?;

        rows.iter().map(Self::expense_from_row).collect()
    }

    async fn insert_goal(&self, record: GoalRecord) -> Result<Recorded<GoalRecord>> {
        self.ensure_schema().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO goals (goal_id, user_id, goal_text, created_at, idempotency_key)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(record.goal_id)
        .bind(&record.user_id)
        .bind(&record.goal_text)
        .bind(record.created_at)
        .bind(&record.idempotency_key)
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestrationError::DatabaseError(format!("Failed to insert goal: {}", e)))?;

        if inserted.rows_affected() == 1 {
            return Ok(Recorded::New(record));
        }

        let row = sqlx::query(
            "SELECT goal_id, user_id, goal_text, created_at, idempotency_key FROM goals WHERE idempotency_key = $1",
        )
        .bind(&record.idempotency_key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            OrchestrationError::DatabaseError(format!("Failed to read recorded goal: {}", e))
        })?;

        let decode =
            |e: sqlx::Error| OrchestrationError::DatabaseError(format!("Corrupt goal row: {}", e));

        Ok(Recorded::Duplicate(GoalRecord {
            goal_id: row.try_get("goal_id").map_err(decode)?,
            user_id: row.try_get("user_id").map_err(decode)?,
            goal_text: row.try_get("goal_text").map_err(decode)?,
            created_at: row.try_get("created_at").map_err(decode)?,
            idempotency_key: row.try_get("idempotency_key").map_err(decode)?,
        }))
    }
}
