//! Wiring: builds the shared components from a [`Config`].
//!
//! Construction never fails on an unavailable collaborator. A missing API
//! key, an unreachable database or a broken model artifact degrades to a
//! stand-in (logged at `warn`), matching how the service is expected to
//! keep answering health checks while misconfigured.

use anyhow::Result;
use std::sync::Arc;

use crate::agent::Agent;
use crate::config::Config;
use crate::db::SqlDatabase;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::llm::{create_chat_model, ChatModel};
use crate::predict::{load_predictor, FailurePredictor};
use crate::rag::DocumentAssistant;
use crate::sensors::{HistorySensorSource, MockSensorSource, SensorSource};
use crate::store::open_index;
use crate::tools::{ToolContext, ToolRegistry};

#[derive(Clone)]
pub struct Services {
    pub assistant: Arc<DocumentAssistant>,
    pub llm: Arc<dyn ChatModel>,
    pub sensors: Arc<dyn SensorSource>,
    pub predictor: Arc<dyn FailurePredictor>,
    pub tools: Arc<ToolRegistry>,
    pub sql_url: String,
    pub max_rows: usize,
    pub max_iterations: usize,
}

impl Services {
    /// Build from config. Fails only when the embedding provider is
    /// misconfigured (e.g. `ollama` without a model).
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);
        let index = open_index(config, embedder.as_ref()).await;

        let assistant = Arc::new(DocumentAssistant::new(
            embedder,
            index,
            config.chunking.clone(),
            config.retrieval.clone(),
            config.embedding.batch_size,
        ));

        Ok(Self {
            assistant,
            llm: create_chat_model(&config.llm),
            sensors: sensor_source(config).await,
            predictor: load_predictor(&config.predictor),
            tools: Arc::new(ToolRegistry::with_builtins()),
            sql_url: config.sql.url.clone(),
            max_rows: config.sql.max_rows,
            max_iterations: config.agent.max_iterations,
        })
    }

    pub fn tool_context(&self) -> ToolContext {
        ToolContext {
            assistant: self.assistant.clone(),
            sensors: self.sensors.clone(),
            predictor: self.predictor.clone(),
            sql_url: self.sql_url.clone(),
            max_rows: self.max_rows,
        }
    }

    pub fn agent(&self) -> Agent {
        Agent::new(
            self.llm.clone(),
            self.tools.clone(),
            self.tool_context(),
            self.max_iterations,
        )
    }
}

async fn sensor_source(config: &Config) -> Arc<dyn SensorSource> {
    let mock = MockSensorSource::from_config(&config.sensors);
    if config.sensors.source != "history" {
        return Arc::new(mock);
    }
    match SqlDatabase::connect(&config.sql.url, false).await {
        Ok(db) => Arc::new(HistorySensorSource::new(db, mock)),
        Err(e) => {
            tracing::warn!(error = %e, "sensor history database unavailable, using mock readings");
            Arc::new(mock)
        }
    }
}
