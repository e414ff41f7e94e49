//! Bookkeeping capabilities: expenses and savings goals.

use super::feedback::{format_inr, spending_feedback};
use super::ledger::{ExpenseRecord, GoalRecord, LedgerStore};
use super::{Tool, ToolContext};
use crate::error::OrchestrationError;
use crate::models::ToolEnvelope;
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const DEFAULT_PERIOD_DAYS: i64 = 30;

const MAX_PERIOD_DAYS: i64 = 3650;

fn default_period() -> i64 {
    DEFAULT_PERIOD_DAYS
}

/// Start of a lookback window, or `None` when the window is out of range.
fn window_start(period_days: i64) -> Option<DateTime<Utc>> {
    if !(1..=MAX_PERIOD_DAYS).contains(&period_days) {
        return None;
    }
    Duration::try_days(period_days).and_then(|window| Utc::now().checked_sub_signed(window))
}

fn period_out_of_range(period_days: i64) -> ToolEnvelope {
    ToolEnvelope::error(format!(
        "period_days must be between 1 and {}, got {}.",
        MAX_PERIOD_DAYS, period_days
    ))
}

fn parse_args<T: for<'de> Deserialize<'de>>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| OrchestrationError::InvalidToolInput(e.to_string()))
}

//
// ================= add_expense =================
//

#[derive(Debug, Deserialize)]
struct AddExpenseArgs {
    user_id: String,
    amount: f64,
    category: String,
    #[serde(default)]
    description: Option<String>,
}

pub struct AddExpenseTool {
    ledger: Arc<dyn LedgerStore>,
}

impl AddExpenseTool {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }
}

#[async_trait::async_trait]
impl Tool for AddExpenseTool {
    fn name(&self) -> &'static str {
        "add_expense"
    }

    fn description(&self) -> &'static str {
        "Record an expense for the user. Amounts are in Indian Rupees (₹)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" },
                "amount": { "type": "number", "description": "The expense amount in Indian Rupees (₹)" },
                "category": { "type": "string", "description": "Category of the expense (food, travel, rent, etc.)" },
                "description": { "type": "string", "description": "Optional description of the expense" },
            },
            "required": ["user_id", "amount", "category"],
        })
    }

    fn identity_field(&self) -> Option<&'static str> {
        Some("user_id")
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<ToolEnvelope> {
        let args: AddExpenseArgs = parse_args(args)?;

        if args.amount <= 0.0 {
            return Ok(ToolEnvelope::error(format!(
                "Failed to add expense: Amount must be positive. Received {}.",
                format_inr(args.amount)
            )));
        }

        let category = args.category.trim().to_lowercase();
        if category.is_empty() {
            return Ok(ToolEnvelope::error("Failed to add expense: Category is required."));
        }

        let record = ExpenseRecord {
            expense_id: Uuid::new_v4(),
            user_id: args.user_id,
            amount: args.amount,
            category,
            description: args.description.filter(|d| !d.trim().is_empty()),
            spent_at: Utc::now(),
            idempotency_key: ctx.idempotency_key.clone(),
        };

        let recorded = self.ledger.insert_expense(record).await?;
        let replayed = recorded.is_duplicate();
        let record = recorded.into_inner();

        info!(
            session_id = %ctx.session_id,
            call_id = %ctx.call_id,
            replayed,
            "Expense recorded"
        );

        Ok(ToolEnvelope::success(
            json!({
                "expense_id": record.expense_id,
                "amount": record.amount,
                "currency": "INR (₹)",
                "category": record.category,
                "description": record.description,
            }),
            format!(
                "Successfully added expense of {} for '{}'.",
                format_inr(record.amount),
                record.category
            ),
        ))
    }
}

//
// ================= query_expenses =================
//

#[derive(Debug, Deserialize)]
struct QueryExpensesArgs {
    user_id: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default = "default_period")]
    period_days: i64,
}

pub struct QueryExpensesTool {
    ledger: Arc<dyn LedgerStore>,
}

impl QueryExpensesTool {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }
}

#[async_trait::async_trait]
impl Tool for QueryExpensesTool {
    fn name(&self) -> &'static str {
        "query_expenses"
    }

    fn description(&self) -> &'static str {
        "Fetch the user's expenses, optionally filtered by category, for the last N days."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" },
                "category": { "type": "string", "description": "Filter by category if provided" },
                "period_days": { "type": "integer", "minimum": 1, "maximum": MAX_PERIOD_DAYS, "description": "Time window in days (default 30)" },
            },
            "required": ["user_id"],
        })
    }

    fn identity_field(&self) -> Option<&'static str> {
        Some("user_id")
    }

    async fn invoke(&self, args: Value, _ctx: &ToolContext) -> Result<ToolEnvelope> {
        let args: QueryExpensesArgs = parse_args(args)?;
        let category = args
            .category
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty());

        let Some(since) = window_start(args.period_days) else {
            return Ok(period_out_of_range(args.period_days));
        };
        let expenses = self
            .ledger
            .expenses_since(&args.user_id, since, category.as_deref())
            .await?;

        let total: f64 = expenses.iter().map(|e| e.amount).sum();

        Ok(ToolEnvelope::success(
            json!({
                "expenses": expenses,
                "count": expenses.len(),
                "total_amount": total,
                "currency": "INR (₹)",
                "period_days": args.period_days,
                "category_filter": category,
            }),
            format!(
                "Found {} expenses totaling {} for the last {} days.",
                expenses.len(),
                format_inr(total),
                args.period_days
            ),
        ))
    }
}

//
// ================= expense_summary =================
//

#[derive(Debug, Deserialize)]
struct SummaryArgs {
    user_id: String,
    #[serde(default = "default_period")]
    period_days: i64,
}

pub struct ExpenseSummaryTool {
    ledger: Arc<dyn LedgerStore>,
}

impl ExpenseSummaryTool {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }
}

#[async_trait::async_trait]
impl Tool for ExpenseSummaryTool {
    fn name(&self) -> &'static str {
        "expense_summary"
    }

    fn description(&self) -> &'static str {
        "Summarize the user's spending by category with personalized feedback. Amounts are in Indian Rupees (₹)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" },
                "period_days": { "type": "integer", "minimum": 1, "maximum": MAX_PERIOD_DAYS, "description": "Time window in days to summarize (e.g., 7, 30, 90)" },
            },
            "required": ["user_id"],
        })
    }

    fn identity_field(&self) -> Option<&'static str> {
        Some("user_id")
    }

    async fn invoke(&self, args: Value, _ctx: &ToolContext) -> Result<ToolEnvelope> {
        let args: SummaryArgs = parse_args(args)?;
        let Some(since) = window_start(args.period_days) else {
            return Ok(period_out_of_range(args.period_days));
        };
        let expenses = self.ledger.expenses_since(&args.user_id, since, None).await?;

        if expenses.is_empty() {
            return Ok(ToolEnvelope::success(
                json!({ "transaction_count": 0, "period_days": args.period_days }),
                format!(
                    "You haven't recorded any expenses in the last {} days.",
                    args.period_days
                ),
            ));
        }

        let mut by_category: BTreeMap<String, f64> = BTreeMap::new();
        for expense in &expenses {
            *by_category.entry(expense.category.clone()).or_insert(0.0) += expense.amount;
        }

        let total: f64 = by_category.values().sum();
        let percentages: BTreeMap<String, f64> = by_category
            .iter()
            .map(|(category, amount)| (category.clone(), amount / total * 100.0))
            .collect();
        let average_daily = total / args.period_days as f64;

        let feedback = spending_feedback(total, &by_category, &percentages, args.period_days);

        Ok(ToolEnvelope::success(
            json!({
                "period": format!("last {} days", args.period_days),
                "total_spent": total,
                "currency": "INR (₹)",
                "average_daily_spend": average_daily,
                "spending_by_category": by_category,
                "category_percentages": percentages,
                "transaction_count": expenses.len(),
                "feedback": feedback,
                "period_days": args.period_days,
            }),
            feedback,
        ))
    }
}

//
// ================= add_goal =================
//

#[derive(Debug, Deserialize)]
struct AddGoalArgs {
    user_id: String,
    goal_text: String,
}

pub struct AddGoalTool {
    ledger: Arc<dyn LedgerStore>,
}

impl AddGoalTool {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }
}

#[async_trait::async_trait]
impl Tool for AddGoalTool {
    fn name(&self) -> &'static str {
        "add_goal"
    }

    fn description(&self) -> &'static str {
        "Save a financial goal for the user."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" },
                "goal_text": { "type": "string", "description": "The goal in the user's words" },
            },
            "required": ["user_id", "goal_text"],
        })
    }

    fn identity_field(&self) -> Option<&'static str> {
        Some("user_id")
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<ToolEnvelope> {
        let args: AddGoalArgs = parse_args(args)?;
        let goal_text = args.goal_text.trim().to_string();

        if goal_text.is_empty() {
            return Ok(ToolEnvelope::error("Failed to add goal: The goal text is empty."));
        }

        let record = self
            .ledger
            .insert_goal(GoalRecord {
                goal_id: Uuid::new_v4(),
                user_id: args.user_id,
                goal_text,
                created_at: Utc::now(),
                idempotency_key: ctx.idempotency_key.clone(),
            })
            .await?
            .into_inner();

        Ok(ToolEnvelope::success(
            json!({ "goal_id": record.goal_id, "goal_text": record.goal_text }),
            format!("Goal '{}' added successfully!", record.goal_text),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ToolStatus;
    use crate::tools::InMemoryLedger;

    fn ctx(call_id: &str) -> ToolContext {
        ToolContext::new("u1", call_id)
    }

    #[tokio::test]
    async fn test_add_expense_normalizes_category() {
        let ledger = Arc::new(InMemoryLedger::new());
        let tool = AddExpenseTool::new(ledger.clone());

        let envelope = tool
            .invoke(
                json!({"user_id": "u1", "amount": 200, "category": "  Groceries "}),
                &ctx("call_1"),
            )
            .await
            .unwrap();

        assert_eq!(envelope.status, ToolStatus::Success);
        assert_eq!(envelope.data.as_ref().unwrap()["category"], "groceries");
        assert_eq!(envelope.message, "Successfully added expense of ₹200.00 for 'groceries'.");
        assert_eq!(ledger.expense_count().await, 1);
    }

    #[tokio::test]
    async fn test_add_expense_rejects_non_positive_amount() {
        let ledger = Arc::new(InMemoryLedger::new());
        let tool = AddExpenseTool::new(ledger.clone());

        let envelope = tool
            .invoke(json!({"user_id": "u1", "amount": -5, "category": "food"}), &ctx("c"))
            .await
            .unwrap();

        assert_eq!(envelope.status, ToolStatus::Error);
        assert!(envelope.message.contains("Amount must be positive"));
        assert_eq!(ledger.expense_count().await, 0);
    }

    #[tokio::test]
    async fn test_replayed_call_does_not_duplicate() {
        let ledger = Arc::new(InMemoryLedger::new());
        let tool = AddExpenseTool::new(ledger.clone());
        let args = json!({"user_id": "u1", "amount": 120.5, "category": "transport"});

        let first = tool.invoke(args.clone(), &ctx("call_7")).await.unwrap();
        let second = tool.invoke(args, &ctx("call_7")).await.unwrap();

        assert_eq!(second.status, ToolStatus::Success);
        assert_eq!(
            first.data.unwrap()["expense_id"],
            second.data.unwrap()["expense_id"]
        );
        assert_eq!(ledger.expense_count().await, 1);
    }

    #[tokio::test]
    async fn test_query_and_summary() {
        let ledger = Arc::new(InMemoryLedger::new());
        let add = AddExpenseTool::new(ledger.clone());
        for (i, (amount, category)) in [(300.0, "food"), (100.0, "transport"), (100.0, "food")]
            .iter()
            .enumerate()
        {
            add.invoke(
                json!({"user_id": "u1", "amount": amount, "category": category}),
                &ctx(&format!("call_{}", i)),
            )
            .await
            .unwrap();
        }

        let query = QueryExpensesTool::new(ledger.clone());
        let found = query
            .invoke(json!({"user_id": "u1", "category": "Food"}), &ctx("q"))
            .await
            .unwrap();
        let data = found.data.unwrap();
        assert_eq!(data["count"], 2);
        assert_eq!(data["total_amount"], 400.0);

        let summary = ExpenseSummaryTool::new(ledger);
        let envelope = summary
            .invoke(json!({"user_id": "u1", "period_days": 10}), &ctx("s"))
            .await
            .unwrap();
        let data = envelope.data.unwrap();
        assert_eq!(data["total_spent"], 500.0);
        assert_eq!(data["transaction_count"], 3);
        assert_eq!(data["spending_by_category"]["food"], 400.0);
        assert_eq!(data["average_daily_spend"], 50.0);
        assert!(envelope.message.contains("you spent ₹500.00 across 2 categories"));
    }

    #[tokio::test]
    async fn test_summary_without_expenses() {
        let summary = ExpenseSummaryTool::new(Arc::new(InMemoryLedger::new()));
        let envelope = summary
            .invoke(json!({"user_id": "nobody"}), &ctx("s"))
            .await
            .unwrap();

        assert_eq!(envelope.status, ToolStatus::Success);
        assert!(envelope.message.contains("last 30 days"));
    }

    #[tokio::test]
    async fn test_oversized_period_is_an_error_envelope() {
        let ledger: Arc<dyn LedgerStore> = Arc::new(InMemoryLedger::new());
        let summary = ExpenseSummaryTool::new(ledger.clone());
        let query = QueryExpensesTool::new(ledger);

        for tool in [&summary as &dyn Tool, &query as &dyn Tool] {
            let envelope = tool
                .invoke(json!({"user_id": "u1", "period_days": 1_000_000_000}), &ctx("p"))
                .await
                .unwrap();
            assert_eq!(envelope.status, ToolStatus::Error);
            assert!(envelope.message.contains("between 1 and 3650"));
        }

        let envelope = summary
            .invoke(json!({"user_id": "u1", "period_days": 0}), &ctx("z"))
            .await
            .unwrap();
        assert_eq!(envelope.status, ToolStatus::Error);
    }

    #[tokio::test]
    async fn test_add_goal() {
        let ledger = Arc::new(InMemoryLedger::new());
        let tool = AddGoalTool::new(ledger.clone());

        let envelope = tool
            .invoke(json!({"user_id": "u1", "goal_text": "Save for a bike"}), &ctx("g"))
            .await
            .unwrap();

        assert_eq!(envelope.status, ToolStatus::Success);
        assert_eq!(ledger.goal_count().await, 1);
    }
}
