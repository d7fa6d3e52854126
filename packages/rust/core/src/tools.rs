//! Tools that tool-calling stages can invoke mid-turn.
//!
//! Each tool wraps one collaborator: the search provider, the extraction
//! engine, or the company store. Storage and extraction problems come back as
//! data in the tool output; only malformed arguments and provider failures are
//! errors.

use std::sync::Arc;

use async_trait::async_trait;
use dossier_extraction as extraction;
use dossier_search::SearchProvider;
use dossier_shared::{DossierError, Result};
use dossier_storage::Storage;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::completion::ToolSpec;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema of the arguments object.
    fn parameters(&self) -> Value;
    async fn call(&self, arguments: Value) -> Result<Value>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T> {
    serde_json::from_value(arguments)
        .map_err(|e| DossierError::validation(format!("invalid arguments for `{tool}`: {e}")))
}

fn to_output<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| DossierError::validation(e.to_string()))
}

// ---------------------------------------------------------------------------
// Web search
// ---------------------------------------------------------------------------

pub struct WebSearchTool {
    provider: Arc<dyn SearchProvider>,
    max_results: u32,
}

impl WebSearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>, max_results: u32) -> Self {
        Self {
            provider,
            max_results,
        }
    }
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for recent information about companies and industries."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"}
            },
            "required": ["query"]
        })
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let args: SearchArgs = parse_args(self.name(), arguments)?;
        let hits = self.provider.search(&args.query, self.max_results).await?;
        debug!(query = %args.query, hits = hits.len(), "web search tool");
        Ok(json!({"query": args.query, "results": hits}))
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

pub struct FormatWebDataTool;

#[derive(Deserialize)]
struct FormatArgs {
    raw_data: Value,
}

#[async_trait]
impl Tool for FormatWebDataTool {
    fn name(&self) -> &str {
        "format_web_data"
    }

    fn description(&self) -> &str {
        "Turn raw web search results into a structured company dossier with a completeness score."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "raw_data": {
                    "description": "Search output: a JSON document with a `results` array, or plain text"
                }
            },
            "required": ["raw_data"]
        })
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let args: FormatArgs = parse_args(self.name(), arguments)?;
        let extracted = match &args.raw_data {
            Value::String(raw) => extraction::extract_raw(raw),
            other => extraction::extract_value(other),
        };
        to_output(&extracted)
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

pub struct StoreCompanyTool {
    storage: Arc<Storage>,
}

impl StoreCompanyTool {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[derive(Deserialize)]
struct StoreArgs {
    company: String,
    #[serde(default)]
    industry: String,
    data: Value,
}

#[async_trait]
impl Tool for StoreCompanyTool {
    fn name(&self) -> &str {
        "store_company"
    }

    fn description(&self) -> &str {
        "Insert or update a company dossier keyed by exact company name."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "company": {"type": "string", "description": "Company name"},
                "industry": {"type": "string", "description": "Industry label"},
                "data": {"description": "Structured dossier to persist"}
            },
            "required": ["company", "data"]
        })
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let args: StoreArgs = parse_args(self.name(), arguments)?;
        // Models often pass the dossier as a JSON string.
        let data = match args.data {
            Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
            other => other,
        };
        let report = self.storage.upsert(&args.company, &args.industry, &data).await;
        to_output(&report)
    }
}

pub struct QueryCompaniesTool {
    storage: Arc<Storage>,
}

impl QueryCompaniesTool {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Tool for QueryCompaniesTool {
    fn name(&self) -> &str {
        "query_companies"
    }

    fn description(&self) -> &str {
        "Look up stored companies whose name or industry contains the query, ignoring case."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Substring of a company name or industry"}
            },
            "required": ["query"]
        })
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let args: SearchArgs = parse_args(self.name(), arguments)?;
        to_output(&self.storage.query(&args.query).await)
    }
}
