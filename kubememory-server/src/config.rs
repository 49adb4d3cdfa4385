// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use anyhow::Result;
use kubememory_memory::MemoryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// KubeMemory configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OllamaConfig {
    /// Ollama base URL (e.g., "http://localhost:11434")
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    /// Chat model tried first
    #[serde(default = "default_model")]
    pub preferred_model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Tried in order when the preferred model is not pulled
    #[serde(default = "default_fallback_models")]
    pub fallback_models: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_analysis_timeout")]
    pub analysis_secs: u64,
    #[serde(default = "default_runbook_timeout")]
    pub runbook_secs: u64,
    #[serde(default = "default_chat_timeout")]
    pub chat_secs: u64,
    #[serde(default = "default_model_list_timeout")]
    pub model_list_secs: u64,
    #[serde(default = "default_store_timeout")]
    pub store_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphBackend {
    #[default]
    Memory,
    Neo4j,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraphConfig {
    #[serde(default)]
    pub backend: GraphBackend,
    #[serde(default = "default_neo4j_url")]
    pub neo4j_url: String,
    #[serde(default = "default_neo4j_database")]
    pub neo4j_database: String,
    #[serde(default = "default_neo4j_user")]
    pub neo4j_user: String,
    #[serde(default)]
    pub neo4j_password: String,
    #[serde(default = "default_blast_window")]
    pub blast_radius_window_secs: i64,
    #[serde(default = "default_deploy_window")]
    pub deploy_link_window_secs: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Memory,
    Chroma,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorConfig {
    #[serde(default)]
    pub backend: VectorBackend,
    #[serde(default = "default_chroma_url")]
    pub chroma_url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Incident records, fixes, patterns and the in-memory graph snapshot
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatConfig {
    /// Inference round-trips per user turn
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

// Default values
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "mistral:7b".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_fallback_models() -> Vec<String> {
    ["qwen2.5:0.5b", "phi3:mini", "llama3.2:3b", "llama3.2:1b", "mistral:7b"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_analysis_timeout() -> u64 {
    60
}

fn default_runbook_timeout() -> u64 {
    90
}

fn default_chat_timeout() -> u64 {
    120
}

fn default_model_list_timeout() -> u64 {
    5
}

fn default_store_timeout() -> u64 {
    5
}

fn default_neo4j_url() -> String {
    "http://localhost:7474".to_string()
}

fn default_neo4j_database() -> String {
    "neo4j".to_string()
}

fn default_neo4j_user() -> String {
    "neo4j".to_string()
}

fn default_blast_window() -> i64 {
    300
}

fn default_deploy_window() -> i64 {
    7200
}

fn default_chroma_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_collection() -> String {
    "kubememory_incidents".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kubememory")
}

fn default_max_rounds() -> usize {
    10
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            preferred_model: default_model(),
            embedding_model: default_embedding_model(),
            fallback_models: default_fallback_models(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            analysis_secs: default_analysis_timeout(),
            runbook_secs: default_runbook_timeout(),
            chat_secs: default_chat_timeout(),
            model_list_secs: default_model_list_timeout(),
            store_secs: default_store_timeout(),
        }
    }
}

impl TimeoutConfig {
    pub fn analysis(&self) -> Duration {
        Duration::from_secs(self.analysis_secs)
    }

    pub fn runbook(&self) -> Duration {
        Duration::from_secs(self.runbook_secs)
    }

    pub fn chat(&self) -> Duration {
        Duration::from_secs(self.chat_secs)
    }

    pub fn model_list(&self) -> Duration {
        Duration::from_secs(self.model_list_secs)
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: GraphBackend::default(),
            neo4j_url: default_neo4j_url(),
            neo4j_database: default_neo4j_database(),
            neo4j_user: default_neo4j_user(),
            neo4j_password: String::new(),
            blast_radius_window_secs: default_blast_window(),
            deploy_link_window_secs: default_deploy_window(),
        }
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::default(),
            chroma_url: default_chroma_url(),
            collection: default_collection(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl ServerConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with priority: env > file > defaults
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        Ok(Self::merge_with_env(config))
    }

    /// Apply `KUBEMEMORY_*` overrides that are explicitly set
    ///
    /// Supported environment variables:
    /// - KUBEMEMORY_OLLAMA_URL: Ollama base URL
    /// - KUBEMEMORY_MODEL: preferred chat model
    /// - KUBEMEMORY_EMBEDDING_MODEL: embedding model
    /// - KUBEMEMORY_GRAPH_BACKEND: `memory` or `neo4j`
    /// - KUBEMEMORY_NEO4J_URL / KUBEMEMORY_NEO4J_USER / KUBEMEMORY_NEO4J_PASSWORD
    /// - KUBEMEMORY_VECTOR_BACKEND: `memory` or `chroma`
    /// - KUBEMEMORY_CHROMA_URL / KUBEMEMORY_CHROMA_COLLECTION
    /// - KUBEMEMORY_DATA_DIR: data directory
    /// - KUBEMEMORY_CHAT_MAX_ROUNDS: chat round limit
    pub fn merge_with_env(mut config: Self) -> Self {
        if let Ok(url) = std::env::var("KUBEMEMORY_OLLAMA_URL") {
            config.ollama.base_url = url;
        }
        if let Ok(model) = std::env::var("KUBEMEMORY_MODEL") {
            config.ollama.preferred_model = model;
        }
        if let Ok(model) = std::env::var("KUBEMEMORY_EMBEDDING_MODEL") {
            config.ollama.embedding_model = model;
        }

        match std::env::var("KUBEMEMORY_GRAPH_BACKEND").as_deref() {
            Ok("neo4j") => config.graph.backend = GraphBackend::Neo4j,
            Ok("memory") => config.graph.backend = GraphBackend::Memory,
            _ => {}
        }
        if let Ok(url) = std::env::var("KUBEMEMORY_NEO4J_URL") {
            config.graph.neo4j_url = url;
        }
        if let Ok(user) = std::env::var("KUBEMEMORY_NEO4J_USER") {
            config.graph.neo4j_user = user;
        }
        if let Ok(password) = std::env::var("KUBEMEMORY_NEO4J_PASSWORD") {
            config.graph.neo4j_password = password;
        }

        match std::env::var("KUBEMEMORY_VECTOR_BACKEND").as_deref() {
            Ok("chroma") => config.vector.backend = VectorBackend::Chroma,
            Ok("memory") => config.vector.backend = VectorBackend::Memory,
            _ => {}
        }
        if let Ok(url) = std::env::var("KUBEMEMORY_CHROMA_URL") {
            config.vector.chroma_url = url;
        }
        if let Ok(collection) = std::env::var("KUBEMEMORY_CHROMA_COLLECTION") {
            config.vector.collection = collection;
        }

        if let Ok(data_dir) = std::env::var("KUBEMEMORY_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(data_dir);
        }
        if let Some(rounds) = env_parse("KUBEMEMORY_CHAT_MAX_ROUNDS") {
            config.chat.max_rounds = rounds;
        }

        config
    }

    /// Memory-layer settings derived from this configuration
    pub fn memory(&self) -> MemoryConfig {
        MemoryConfig {
            data_dir: self.storage.data_dir.clone(),
            blast_radius_window_secs: self.graph.blast_radius_window_secs,
            deploy_link_window_secs: self.graph.deploy_link_window_secs,
            store_timeout_secs: self.timeouts.store_secs,
            ..MemoryConfig::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.chat.max_rounds == 0 {
            anyhow::bail!("chat.max_rounds must be at least 1");
        }
        if self.graph.blast_radius_window_secs <= 0 || self.graph.deploy_link_window_secs <= 0 {
            anyhow::bail!("graph windows must be positive");
        }
        let timeouts = &self.timeouts;
        if [
            timeouts.analysis_secs,
            timeouts.runbook_secs,
            timeouts.chat_secs,
            timeouts.model_list_secs,
            timeouts.store_secs,
        ]
        .contains(&0)
        {
            anyhow::bail!("timeouts must be non-zero");
        }
        if self.graph.backend == GraphBackend::Neo4j && self.graph.neo4j_url.is_empty() {
            anyhow::bail!("graph.backend = neo4j requires graph.neo4j_url");
        }

        // Validate data directory is writable
        if !self.storage.data_dir.exists() {
            std::fs::create_dir_all(&self.storage.data_dir)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.ollama.preferred_model, "mistral:7b");
        assert_eq!(config.ollama.fallback_models.len(), 5);
        assert_eq!(config.timeouts.analysis_secs, 60);
        assert_eq!(config.chat.max_rounds, 10);
        assert_eq!(config.graph.backend, GraphBackend::Memory);
        assert_eq!(config.memory().blast_radius_window_secs, 300);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [graph]
            backend = "neo4j"
            neo4j_password = "secret"

            [chat]
            max_rounds = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.graph.backend, GraphBackend::Neo4j);
        assert_eq!(config.graph.deploy_link_window_secs, 7200);
        assert_eq!(config.chat.max_rounds, 4);
        assert_eq!(config.vector.collection, "kubememory_incidents");
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("KUBEMEMORY_MODEL", "llama3.2:3b");
        std::env::set_var("KUBEMEMORY_VECTOR_BACKEND", "chroma");

        let config = ServerConfig::merge_with_env(ServerConfig::default());
        assert_eq!(config.ollama.preferred_model, "llama3.2:3b");
        assert_eq!(config.vector.backend, VectorBackend::Chroma);

        std::env::remove_var("KUBEMEMORY_MODEL");
        std::env::remove_var("KUBEMEMORY_VECTOR_BACKEND");
    }

    #[test]
    fn test_validate_rejects_zero_rounds() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.storage.data_dir = dir.path().to_path_buf();
        assert!(config.validate().is_ok());

        config.chat.max_rounds = 0;
        assert!(config.validate().is_err());
    }
}
