//! Tools the agent can call.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                     ToolRegistry                      │
//! │  vector_search  sensor_live_data  predict_failure     │
//! │  sql_query      (+ custom Rust tools via register)    │
//! └──────────────┬────────────────────────────────────────┘
//!                ▼
//!          ToolContext ─▶ DocumentAssistant, SensorSource,
//!                         FailurePredictor, operational SQL DB
//! ```
//!
//! Each tool advertises an OpenAI function-calling schema and returns a
//! JSON value that the agent hands back to the model as the tool result.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::llm::ToolSpec;
use crate::models::SensorReadings;
use crate::predict::FailurePredictor;
use crate::rag::DocumentAssistant;
use crate::sensors::SensorSource;
use crate::sql;

/// Text returned by `vector_search` when nothing has been ingested.
pub const NO_DOCUMENTS_MARKER: &str = "(no documents ingested yet)";

/// A callable capability exposed to the agent.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores, as the model will call it.
    fn name(&self) -> &str;

    /// One-line description the model uses to pick a tool.
    fn description(&self) -> &str;

    /// OpenAI function-calling JSON Schema for the arguments object.
    fn parameters_schema(&self) -> Value;

    /// Run with the decoded arguments object.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// What tools can reach.
#[derive(Clone)]
pub struct ToolContext {
    pub assistant: Arc<DocumentAssistant>,
    pub sensors: Arc<dyn SensorSource>,
    pub predictor: Arc<dyn FailurePredictor>,
    /// Operational database URL for `sql_query`.
    pub sql_url: String,
    pub max_rows: usize,
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in tools
// ═══════════════════════════════════════════════════════════════════════

pub struct VectorSearchTool;

#[async_trait]
impl Tool for VectorSearchTool {
    fn name(&self) -> &str {
        "vector_search"
    }

    fn description(&self) -> &str {
        "Search building document chunks relevant to a question."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to look for" },
                "k": { "type": "integer", "description": "Number of chunks", "default": 4 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("");
        if query.trim().is_empty() {
            bail!("query must not be empty");
        }
        let k = ctx
            .assistant
            .effective_k(params["k"].as_u64().map(|k| k as usize));

        let hits = ctx.assistant.similarity_search(query, k).await?;
        if hits.is_empty() {
            return Ok(json!([NO_DOCUMENTS_MARKER]));
        }
        Ok(Value::Array(
            hits.into_iter().map(|h| Value::String(h.chunk.text)).collect(),
        ))
    }
}

pub struct SensorLiveDataTool;

#[async_trait]
impl Tool for SensorLiveDataTool {
    fn name(&self) -> &str {
        "sensor_live_data"
    }

    fn description(&self) -> &str {
        "Get latest sensor readings for a piece of equipment."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "equipment_id": { "type": "string", "description": "Equipment identifier, e.g. HVAC-01" }
            },
            "required": ["equipment_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let Some(equipment_id) = params["equipment_id"].as_str() else {
            bail!("equipment_id is required");
        };
        let readings = ctx.sensors.fetch(equipment_id).await?.unwrap_or_default();
        Ok(serde_json::to_value(readings)?)
    }
}

pub struct PredictFailureTool;

/// Numeric readings from `{"sensors": {...}}`, or from the arguments
/// object itself when the model passes the readings flat.
fn readings_from_params(params: &Value) -> Result<SensorReadings> {
    let obj = params
        .get("sensors")
        .unwrap_or(params)
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("sensors must be an object of numeric readings"))?;

    Ok(obj
        .iter()
        .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
        .collect())
}

#[async_trait]
impl Tool for PredictFailureTool {
    fn name(&self) -> &str {
        "predict_failure"
    }

    fn description(&self) -> &str {
        "Predict probability of equipment failure (0-1) from sensor readings."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sensors": {
                    "type": "object",
                    "description": "Sensor readings, e.g. {\"temperature\": 72, \"vibration\": 0.21}",
                    "additionalProperties": { "type": "number" }
                }
            },
            "required": ["sensors"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let readings = readings_from_params(&params)?;
        Ok(json!(ctx.predictor.predict(&readings)))
    }
}

pub struct SqlQueryTool;

#[async_trait]
impl Tool for SqlQueryTool {
    fn name(&self) -> &str {
        "sql_query"
    }

    fn description(&self) -> &str {
        "Run a read-only SQL query against the building DB (table sensor_history)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sql": { "type": "string", "description": "A single SELECT statement" }
            },
            "required": ["sql"]
        })
    }

    /// Failures are returned as `SQL error: ...` text for the model to read.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["sql"].as_str().unwrap_or("");
        let text = match sql::run_read_only(&ctx.sql_url, query, ctx.max_rows).await {
            Ok(output) => output.render(),
            Err(e) => format!("SQL error: {}", e),
        };
        Ok(Value::String(text))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Ordered set of tools, looked up by name.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// The four built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(VectorSearchTool));
        registry.register(Box::new(SensorLiveDataTool));
        registry.register(Box::new(PredictFailureTool));
        registry.register(Box::new(SqlQueryTool));
        registry
    }

    /// Register a tool. Lookups return the first tool registered under a name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Function specs to advertise to the model.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
