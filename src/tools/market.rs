//! Market data and live web search capabilities.

use super::{Tool, ToolContext};
use crate::error::OrchestrationError;
use crate::models::ToolEnvelope;
use crate::Result;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

const ALPHA_VANTAGE_URL: &str = "https://www.alphavantage.co";
const SERPER_URL: &str = "https://google.serper.dev";
const MAX_ORGANIC_RESULTS: usize = 5;

//
// ================= get_stock_price =================
//

#[derive(Debug, Deserialize)]
struct StockArgs {
    symbol: String,
}

pub struct StockPriceTool {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl StockPriceTool {
    pub fn new(client: Client, api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            client,
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: base_url
                .unwrap_or_else(|| ALPHA_VANTAGE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for StockPriceTool {
    fn name(&self) -> &'static str {
        "get_stock_price"
    }

    fn description(&self) -> &'static str {
        "Fetch the latest stock price for a ticker symbol (e.g. 'AAPL', 'TSLA', 'RELIANCE.BSE')."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": { "type": "string", "description": "Ticker symbol" },
            },
            "required": ["symbol"],
        })
    }

    async fn invoke(&self, args: Value, _ctx: &ToolContext) -> Result<ToolEnvelope> {
        let args: StockArgs = serde_json::from_value(args)
            .map_err(|e| OrchestrationError::InvalidToolInput(e.to_string()))?;
        let symbol = args.symbol.trim().to_uppercase();

        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(ToolEnvelope::error(
                "Stock prices are unavailable: no market data API key is configured.",
            ));
        };

        let url = format!("{}/query", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol.as_str()),
                ("apikey", api_key),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Market data request failed");
            return Ok(ToolEnvelope::error(format!(
                "Could not fetch the price for {}: market data service returned {}.",
                symbol,
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        let quote = body.get("Global Quote").filter(|q| {
            q.as_object().map_or(false, |o| !o.is_empty())
        });

        let Some(quote) = quote else {
            debug!(symbol = %symbol, "No quote in market data response");
            return Ok(ToolEnvelope::error(format!(
                "No price data found for '{}'. Check the symbol and try again.",
                symbol
            )));
        };

        let price: f64 = quote_field(quote, "05. price").parse().unwrap_or(0.0);
        let change = quote_field(quote, "09. change");
        let change_percent = quote_field(quote, "10. change percent");
        let trading_day = quote_field(quote, "07. latest trading day");

        Ok(ToolEnvelope::success(
            json!({
                "symbol": symbol,
                "price": price,
                "change": change,
                "change_percent": change_percent,
                "latest_trading_day": trading_day,
            }),
            format!(
                "{} last traded at {:.2} ({} / {}) on {}.",
                symbol, price, change, change_percent, trading_day
            ),
        ))
    }
}

fn quote_field<'a>(quote: &'a Value, key: &str) -> &'a str {
    quote.get(key).and_then(Value::as_str).unwrap_or_default()
}

//
// ================= web_search =================
//

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(rename = "answerBox", default)]
    answer_box: Option<AnswerBox>,
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct AnswerBox {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

pub struct WebSearchTool {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl WebSearchTool {
    pub fn new(client: Client, api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            client,
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: base_url
                .unwrap_or_else(|| SERPER_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> &'static str {
        "Live Google search for recent news, market updates and facts not in the user's records."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
            },
            "required": ["query"],
        })
    }

    async fn invoke(&self, args: Value, _ctx: &ToolContext) -> Result<ToolEnvelope> {
        let args: SearchArgs = serde_json::from_value(args)
            .map_err(|e| OrchestrationError::InvalidToolInput(e.to_string()))?;

        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(ToolEnvelope::error(
                "Web search is unavailable: no search API key is configured.",
            ));
        };

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .header("X-API-KEY", api_key)
            .json(&json!({ "q": args.query }))
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Search request failed");
            return Ok(ToolEnvelope::error(format!(
                "Search failed: service returned {}.",
                response.status()
            )));
        }

        let body: SerperResponse = response.json().await?;

        let mut lines = Vec::new();
        if let Some(answer) = body
            .answer_box
            .as_ref()
            .and_then(|b| b.answer.clone().or_else(|| b.snippet.clone()))
        {
            lines.push(answer);
        }

        let results: Vec<Value> = body
            .organic
            .iter()
            .take(MAX_ORGANIC_RESULTS)
            .map(|r| json!({ "title": r.title, "link": r.link, "snippet": r.snippet }))
            .collect();

        lines.extend(
            body.organic
                .iter()
                .take(MAX_ORGANIC_RESULTS)
                .filter(|r| !r.snippet.is_empty())
                .map(|r| format!("{}: {}", r.title, r.snippet)),
        );

        if lines.is_empty() {
            return Ok(ToolEnvelope::success(
                json!({ "results": results }),
                format!("No results found for '{}'.", args.query),
            ));
        }

        Ok(ToolEnvelope::success(
            json!({ "results": results }),
            lines.join("\n"),
        ))
    }
}
