//! Settings of the `agentgraph` binary
//!
//! Every field has a default. A `--config` file (YAML or JSON) replaces
//! the fields it names, then `AGENTGRAPH_*` variables override single
//! fields, e.g. `AGENTGRAPH_MODEL=ollama:llama3.1` or
//! `AGENTGRAPH_RESEARCH_MAX_CONCURRENT_UNITS=3`.

use agentgraph_agents::agents::rag::RagOptions;
use agentgraph_agents::agents::ResearchOptions;
use agentgraph_core::{ExhaustionPolicy, DEFAULT_RECURSION_LIMIT};
use llm::{InitOptions, ModelSpec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use utils::{
    env_key, get_env_bool, get_env_opt, get_env_parse_opt, load_config_file, require_non_zero, FromEnv, Result,
    UtilsError, ValidateConfig,
};

pub const ENV_PREFIX: &str = "AGENTGRAPH";

/// Limits of the deep researcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub max_researcher_iterations: u32,
    pub max_react_tool_calls: u32,
    pub max_concurrent_units: usize,
    pub allow_clarification: bool,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        let defaults = ResearchOptions::default();
        Self {
            max_researcher_iterations: defaults.max_researcher_iterations,
            max_react_tool_calls: defaults.max_react_tool_calls,
            max_concurrent_units: defaults.max_concurrent_research_units,
            allow_clarification: defaults.allow_clarification,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `provider:model`
    pub model: String,
    pub temperature: Option<f32>,
    /// Chinook SQLite file used by the SQL and music store agents
    pub database: PathBuf,
    /// `.md` and `.txt` files indexed for the RAG agents
    pub documents: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Variable holding the Tavily API key
    pub tavily_key_env: String,
    /// Verified customer the music store swarm answers invoice questions for
    pub customer_id: Option<String>,
    pub recursion_limit: usize,
    /// Generations allowed per hallucination loop
    pub max_attempts: u32,
    pub top_k: usize,
    pub exhaustion: ExhaustionPolicy,
    pub research: ResearchConfig,
    /// Filter used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let rag = RagOptions::default();
        Self {
            model: "openai:gpt-4o-mini".to_string(),
            temperature: Some(0.0),
            database: PathBuf::from("Chinook.db"),
            documents: PathBuf::from("docs"),
            chunk_size: 1000,
            chunk_overlap: 200,
            tavily_key_env: "TAVILY_API_KEY".to_string(),
            customer_id: None,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            max_attempts: rag.max_attempts,
            top_k: rag.top_k,
            exhaustion: ExhaustionPolicy::FailClosed,
            research: ResearchConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults, then `path` when given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => load_config_file(path)?,
            None => Self::default(),
        };
        base.merge_env(ENV_PREFIX)
    }

    pub fn model_spec(&self) -> Result<ModelSpec> {
        self.model
            .parse()
            .map_err(|e: llm::LlmError| UtilsError::Validation(format!("model: {}", e)))
    }

    pub fn init_options(&self) -> InitOptions {
        InitOptions {
            temperature: self.temperature,
            ..InitOptions::default()
        }
    }

    pub fn rag_options(&self) -> RagOptions {
        RagOptions {
            max_attempts: self.max_attempts,
            exhaustion: self.exhaustion,
            top_k: self.top_k,
            ..RagOptions::default()
        }
    }

    pub fn research_options(&self) -> ResearchOptions {
        ResearchOptions {
            max_researcher_iterations: self.research.max_researcher_iterations,
            max_react_tool_calls: self.research.max_react_tool_calls,
            max_concurrent_research_units: self.research.max_concurrent_units,
            allow_clarification: self.research.allow_clarification,
        }
    }
}

fn parse_exhaustion(key: &str, raw: &str) -> Result<ExhaustionPolicy> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_ascii_lowercase())).map_err(|_| {
        UtilsError::InvalidEnv {
            key: key.to_string(),
            reason: format!("{:?} is not one of fail, degrade", raw),
        }
    })
}

impl FromEnv for AppConfig {
    fn merge_env(mut self, prefix: &str) -> Result<Self> {
        let key = |field: &str| env_key(prefix, field);

        if let Some(model) = get_env_opt(&key("model")) {
            self.model = model;
        }
        if let Some(temperature) = get_env_parse_opt(&key("temperature"))? {
            self.temperature = Some(temperature);
        }
        if let Some(database) = get_env_opt(&key("database")) {
            self.database = PathBuf::from(database);
        }
        if let Some(documents) = get_env_opt(&key("documents")) {
            self.documents = PathBuf::from(documents);
        }
        if let Some(size) = get_env_parse_opt(&key("chunk_size"))? {
            self.chunk_size = size;
        }
        if let Some(overlap) = get_env_parse_opt(&key("chunk_overlap"))? {
            self.chunk_overlap = overlap;
        }
        if let Some(name) = get_env_opt(&key("tavily_key_env")) {
            self.tavily_key_env = name;
        }
        if let Some(id) = get_env_opt(&key("customer_id")) {
            self.customer_id = Some(id);
        }
        if let Some(limit) = get_env_parse_opt(&key("recursion_limit"))? {
            self.recursion_limit = limit;
        }
        if let Some(attempts) = get_env_parse_opt(&key("max_attempts"))? {
            self.max_attempts = attempts;
        }
        if let Some(top_k) = get_env_parse_opt(&key("top_k"))? {
            self.top_k = top_k;
        }
        if let Some(raw) = get_env_opt(&key("exhaustion")) {
            self.exhaustion = parse_exhaustion(&key("exhaustion"), &raw)?;
        }
        if let Some(level) = get_env_opt(&key("log_level")) {
            self.log_level = level;
        }

        let research = &mut self.research;
        if let Some(n) = get_env_parse_opt(&key("research_max_iterations"))? {
            research.max_researcher_iterations = n;
        }
        if let Some(n) = get_env_parse_opt(&key("research_max_tool_calls"))? {
            research.max_react_tool_calls = n;
        }
        if let Some(n) = get_env_parse_opt(&key("research_max_concurrent_units"))? {
            research.max_concurrent_units = n;
        }
        if get_env_opt(&key("research_allow_clarification")).is_some() {
            research.allow_clarification = get_env_bool(&key("research_allow_clarification"))?;
        }
        Ok(self)
    }
}

impl ValidateConfig for AppConfig {
    fn validate(&self) -> Result<()> {
        self.model_spec()?;
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(UtilsError::Validation(format!("temperature {} is outside 0.0..=2.0", t)));
            }
        }
        require_non_zero("recursion_limit", self.recursion_limit)?;
        require_non_zero("max_attempts", self.max_attempts as usize)?;
        let needed = self.rag_options().recursion_limit();
        if self.recursion_limit < needed {
            return Err(UtilsError::Validation(format!(
                "recursion_limit ({}) cannot cover max_attempts ({}); it must be at least {}",
                self.recursion_limit, self.max_attempts, needed
            )));
        }
        require_non_zero("top_k", self.top_k)?;
        require_non_zero("chunk_size", self.chunk_size)?;
        if self.chunk_overlap >= self.chunk_size {
            return Err(UtilsError::Validation(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        require_non_zero("research.max_researcher_iterations", self.research.max_researcher_iterations as usize)?;
        require_non_zero("research.max_react_tool_calls", self.research.max_react_tool_calls as usize)?;
        require_non_zero("research.max_concurrent_units", self.research.max_concurrent_units)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.model_spec().unwrap().model, "gpt-4o-mini");
        assert_eq!(config.rag_options().max_attempts, 3);
        assert_eq!(config.research_options(), ResearchOptions::default());
    }

    #[test]
    fn test_file_then_env() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agentgraph.yaml");
        std::fs::write(&path, "model: ollama:llama3.1\ntop_k: 8\nexhaustion: degrade\nresearch:\n  max_concurrent_units: 2\n")
            .unwrap();

        std::env::set_var("CLITEST_TOP_K", "4");
        std::env::set_var("CLITEST_RESEARCH_ALLOW_CLARIFICATION", "false");
        std::env::set_var("CLITEST_CUSTOMER_ID", "7");
        let config = load_config_file::<AppConfig>(&path).unwrap().merge_env("CLITEST").unwrap();
        std::env::remove_var("CLITEST_TOP_K");
        std::env::remove_var("CLITEST_RESEARCH_ALLOW_CLARIFICATION");
        std::env::remove_var("CLITEST_CUSTOMER_ID");

        assert_eq!(config.model, "ollama:llama3.1");
        assert_eq!(config.top_k, 4);
        assert_eq!(config.exhaustion, ExhaustionPolicy::Degrade);
        assert_eq!(config.research.max_concurrent_units, 2);
        assert_eq!(config.research.max_researcher_iterations, 3);
        assert!(!config.research.allow_clarification);
        assert_eq!(config.recursion_limit, DEFAULT_RECURSION_LIMIT);
        assert_eq!(config.customer_id.as_deref(), Some("7"));
    }

    #[test]
    fn test_exhaustion_spellings() {
        assert_eq!(parse_exhaustion("K", "fail").unwrap(), ExhaustionPolicy::FailClosed);
        assert_eq!(parse_exhaustion("K", "Degrade").unwrap(), ExhaustionPolicy::Degrade);
        assert!(parse_exhaustion("K", "retry").is_err());
    }

    #[test]
    fn test_validation_rejects() {
        let unknown = AppConfig {
            model: "palm:bison".to_string(),
            ..AppConfig::default()
        };
        assert!(unknown.validate().is_err());

        let zero = AppConfig {
            max_attempts: 0,
            ..AppConfig::default()
        };
        assert!(zero.validate().is_err());

        let overlap = AppConfig {
            chunk_overlap: 1000,
            ..AppConfig::default()
        };
        assert!(overlap.validate().is_err());
    }

    #[test]
    fn test_recursion_limit_must_cover_attempts() {
        let short = AppConfig {
            max_attempts: 12,
            ..AppConfig::default()
        };
        let err = short.validate().unwrap_err();
        assert!(err.to_string().contains("at least 30"), "{err}");

        let covered = AppConfig {
            max_attempts: 12,
            recursion_limit: 30,
            ..AppConfig::default()
        };
        covered.validate().unwrap();
    }
}
