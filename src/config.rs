use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::SensorReadings;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
    #[serde(default)]
    pub sensors: SensorsConfig,
    #[serde(default)]
    pub sql: SqlConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `sqlite` (local index directory) or `postgres` (pgvector).
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            index_dir: default_index_dir(),
            postgres_url: None,
            collection: default_collection(),
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_index_dir() -> PathBuf {
    PathBuf::from("./indexes")
}
fn default_collection() -> String {
    "docs".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    150
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_max_k")]
    pub max_k: usize,
    /// Queries with fewer words than this get the greeting, not an answer.
    #[serde(default = "default_greeting_min_words")]
    pub greeting_min_words: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            max_k: default_max_k(),
            greeting_min_words: default_greeting_min_words(),
        }
    }
}

fn default_k() -> usize {
    4
}
fn default_max_k() -> usize {
    50
}
fn default_greeting_min_words() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_embedding_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            temperature: default_temperature(),
            base_url: default_llm_base_url(),
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_retries() -> u32 {
    3
}
fn default_llm_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_max_iterations() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct PredictorConfig {
    /// Serialized classifier artifact. Missing file → heuristic strategy.
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
        }
    }
}

fn default_model_path() -> PathBuf {
    PathBuf::from("./model/equipment_failure.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SensorsConfig {
    /// `mock` (lookup table) or `history` (latest `sensor_history` row).
    #[serde(default = "default_sensor_source")]
    pub source: String,
    /// Replaces the built-in lookup table when non-empty.
    #[serde(default)]
    pub equipment: BTreeMap<String, SensorReadings>,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            source: default_sensor_source(),
            equipment: BTreeMap::new(),
        }
    }
}

fn default_sensor_source() -> String {
    "mock".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SqlConfig {
    /// `sqlite:<path>` or `postgres://...`. Target of `sql_query` and the
    /// sensor history table.
    #[serde(default = "default_sql_url")]
    pub url: String,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            url: default_sql_url(),
            max_rows: default_max_rows(),
        }
    }
}

fn default_sql_url() -> String {
    "sqlite:./data/building.sqlite".to_string()
}
fn default_max_rows() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Permissive CORS for local dashboard development.
    #[serde(default)]
    pub cors: bool,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors: false,
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_max_upload_mb() -> usize {
    50
}

impl Config {
    /// All defaults plus environment overrides; used when no config file exists.
    pub fn minimal() -> Self {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        config
    }
}

/// Load the config file if it exists, otherwise fall back to [`Config::minimal`].
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        let config = Config::minimal();
        validate(&config)?;
        Ok(config)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;

    Ok(config)
}

/// `USE_PGVECTOR`, `PG_CONN`, `LOCAL_MODE` and `PORT` override the file.
fn apply_env_overrides(config: &mut Config, env: impl Fn(&str) -> Option<String>) {
    if env("USE_PGVECTOR").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
        config.store.backend = "postgres".to_string();
    }
    if let Some(conn) = env("PG_CONN") {
        config.store.postgres_url = Some(conn.clone());
        config.sql.url = conn;
    }
    if env("LOCAL_MODE").is_some_and(|v| !v.is_empty() && v != "false") {
        config.server.cors = true;
    }
    if let Some(port) = env("PORT") {
        let host = config
            .server
            .bind
            .rsplit_once(':')
            .map(|(h, _)| h.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        config.server.bind = format!("{}:{}", host, port);
    }
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap_chars must be smaller than chunking.max_chars");
    }

    // Validate retrieval
    if config.retrieval.default_k == 0 || config.retrieval.max_k == 0 {
        anyhow::bail!("retrieval.default_k and retrieval.max_k must be >= 1");
    }

    if config.agent.max_iterations == 0 {
        anyhow::bail!("agent.max_iterations must be >= 1");
    }

    // Validate embedding
    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "hash" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, hash, or local.",
            other
        ),
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    match config.store.backend.as_str() {
        "sqlite" | "memory" => {}
        "postgres" => {
            if config.store.postgres_url.is_none() {
                anyhow::bail!("store.postgres_url (or PG_CONN) is required for the postgres backend");
            }
        }
        other => anyhow::bail!(
            "Unknown store backend: '{}'. Must be sqlite, memory, or postgres.",
            other
        ),
    }

    match config.sensors.source.as_str() {
        "mock" | "history" => {}
        other => anyhow::bail!(
            "Unknown sensor source: '{}'. Must be mock or history.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(toml_str: &str) -> Config {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = parse("");
        assert_eq!(cfg.chunking.max_chars, 1000);
        assert_eq!(cfg.chunking.overlap_chars, 150);
        assert_eq!(cfg.retrieval.default_k, 4);
        assert_eq!(cfg.agent.max_iterations, 10);
        assert_eq!(cfg.llm.model, "gpt-3.5-turbo");
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let cfg = parse("[chunking]\nmax_chars = 100\noverlap_chars = 100\n");
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("overlap_chars"));
    }

    #[test]
    fn unknown_embedding_provider_rejected() {
        let cfg = parse("[embedding]\nprovider = \"magic\"\n");
        assert!(validate(&cfg)
            .unwrap_err()
            .to_string()
            .contains("Unknown embedding provider"));
    }

    #[test]
    fn sensor_table_from_toml() {
        let cfg = parse(
            "[sensors.equipment.AHU-7]\ntemperature = 80.0\nvibration = 0.4\n",
        );
        let ahu = &cfg.sensors.equipment["AHU-7"];
        assert_eq!(ahu["temperature"], 80.0);
        assert_eq!(ahu["vibration"], 0.4);
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("USE_PGVECTOR", "true"),
            ("PG_CONN", "postgres://u:p@db:5432/building"),
            ("LOCAL_MODE", "1"),
            ("PORT", "9100"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.store.backend, "postgres");
        assert_eq!(
            cfg.store.postgres_url.as_deref(),
            Some("postgres://u:p@db:5432/building")
        );
        assert_eq!(cfg.sql.url, "postgres://u:p@db:5432/building");
        assert!(cfg.server.cors);
        assert_eq!(cfg.server.bind, "0.0.0.0:9100");
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn example_config_is_valid() {
        let cfg = parse(include_str!("../config/bldg.example.toml"));
        assert_eq!(cfg.server.bind, "0.0.0.0:8000");
        assert_eq!(cfg.retrieval.greeting_min_words, 3);
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn postgres_backend_requires_url() {
        let cfg = parse("[store]\nbackend = \"postgres\"\n");
        assert!(validate(&cfg).is_err());
    }
}
