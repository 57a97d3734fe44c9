//! `provider:model` model initialisation.
//!
//! Agents take an `Arc<dyn ChatModel>`; the binary builds it once from a
//! spec string such as `openai:gpt-4o-mini` or `ollama:llama3.1`.
//!
//! | Provider | Aliases | Key variable | Client |
//! |----------|---------|--------------|--------|
//! | `openai` | | `OPENAI_API_KEY` | [`OpenAiClient`](crate::remote::OpenAiClient) |
//! | `anthropic` | `claude` | `ANTHROPIC_API_KEY` | [`ClaudeClient`](crate::remote::ClaudeClient) |
//! | `deepseek` | | `DEEPSEEK_API_KEY` | OpenAI-compatible |
//! | `openrouter` | | `OPENROUTER_API_KEY` | OpenAI-compatible |
//! | `ollama` | | none | [`OllamaClient`](crate::local::OllamaClient) |
//!
//! Without a prefix the provider is inferred from the model name: `gpt-*`,
//! `o1*`, `o3*` and `o4*` are OpenAI, `claude*` is Anthropic.

use crate::error::{LlmError, Result};
use agentgraph_core::llm::ChatModel;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Known model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Deepseek,
    OpenRouter,
    Ollama,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::Deepseek,
        Provider::OpenRouter,
        Provider::Ollama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Deepseek => "deepseek",
            Provider::OpenRouter => "openrouter",
            Provider::Ollama => "ollama",
        }
    }

    /// Environment variable holding the API key, if one is needed.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::Deepseek => Some("DEEPSEEK_API_KEY"),
            Provider::OpenRouter => Some("OPENROUTER_API_KEY"),
            Provider::Ollama => None,
        }
    }

    fn infer(model: &str) -> Option<Self> {
        let model = model.to_ascii_lowercase();
        if model.starts_with("gpt-")
            || ["o1", "o3", "o4"].iter().any(|prefix| model.starts_with(prefix))
        {
            Some(Provider::OpenAi)
        } else if model.starts_with("claude") {
            Some(Provider::Anthropic)
        } else if model.starts_with("deepseek") {
            Some(Provider::Deepseek)
        } else {
            None
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "deepseek" => Ok(Provider::Deepseek),
            "openrouter" => Ok(Provider::OpenRouter),
            "ollama" => Ok(Provider::Ollama),
            other => Err(LlmError::UnknownProvider(other.to_string())),
        }
    }
}

/// A parsed `provider:model` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub provider: Provider,
    pub model: String,
}

impl FromStr for ModelSpec {
    type Err = LlmError;

    fn from_str(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let (provider, model) = match spec.split_once(':') {
            Some((provider, model)) => (provider.parse::<Provider>()?, model.trim()),
            None => (
                Provider::infer(spec).ok_or_else(|| {
                    LlmError::UnknownProvider(format!(
                        "cannot infer provider for '{}', use 'provider:model'",
                        spec
                    ))
                })?,
                spec,
            ),
        };
        if model.is_empty() {
            return Err(LlmError::ConfigError(format!("model name missing in '{}'", spec)));
        }
        Ok(Self {
            provider,
            model: model.to_string(),
        })
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// Client options shared by every provider.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Default temperature for requests that do not set one.
    pub temperature: Option<f32>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
}

/// Build a chat model from a `provider:model` spec.
///
/// API keys come from the environment; a missing key fails here rather
/// than on the first request.
pub fn init_chat_model(spec: &str, options: &InitOptions) -> Result<Arc<dyn ChatModel>> {
    let spec: ModelSpec = spec.parse()?;
    tracing::info!(provider = %spec.provider, model = %spec.model, "initialising chat model");
    build(spec, options)
}

#[cfg(all(feature = "remote", feature = "local"))]
fn build(spec: ModelSpec, options: &InitOptions) -> Result<Arc<dyn ChatModel>> {
    use crate::config::{LocalLlmConfig, RemoteLlmConfig};
    use crate::local::OllamaClient;
    use crate::remote::{ClaudeClient, OpenAiClient};

    let remote = |key_env: &str, base_url: String| -> Result<RemoteLlmConfig> {
        let mut config = RemoteLlmConfig::from_env(key_env, base_url, spec.model.clone())?;
        config.temperature = options.temperature;
        if let Some(timeout) = options.timeout {
            config.timeout = timeout;
        }
        if let Some(max_retries) = options.max_retries {
            config.max_retries = max_retries;
        }
        Ok(config)
    };

    let model: Arc<dyn ChatModel> = match spec.provider {
        Provider::OpenAi => {
            let base_url = std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| crate::remote::openai::DEFAULT_BASE_URL.to_string());
            Arc::new(OpenAiClient::new(remote("OPENAI_API_KEY", base_url)?)?)
        }
        Provider::Deepseek => Arc::new(OpenAiClient::new(remote(
            "DEEPSEEK_API_KEY",
            "https://api.deepseek.com".to_string(),
        )?)?),
        Provider::OpenRouter => Arc::new(OpenAiClient::new(remote(
            "OPENROUTER_API_KEY",
            "https://openrouter.ai/api/v1".to_string(),
        )?)?),
        Provider::Anthropic => Arc::new(ClaudeClient::new(remote(
            "ANTHROPIC_API_KEY",
            crate::remote::claude::DEFAULT_BASE_URL.to_string(),
        )?)?),
        Provider::Ollama => {
            let mut config = LocalLlmConfig::ollama_from_env(spec.model.clone());
            config.temperature = options.temperature;
            if let Some(timeout) = options.timeout {
                config.timeout = timeout;
            }
            if let Some(max_retries) = options.max_retries {
                config.max_retries = max_retries;
            }
            Arc::new(OllamaClient::new(config)?)
        }
    };
    Ok(model)
}

#[cfg(not(all(feature = "remote", feature = "local")))]
fn build(spec: ModelSpec, _options: &InitOptions) -> Result<Arc<dyn ChatModel>> {
    Err(LlmError::ConfigError(format!(
        "provider '{}' is not compiled in; enable the `local` and `remote` features",
        spec.provider
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_explicit_provider() {
        let spec: ModelSpec = "openai:gpt-4o-mini".parse().unwrap();
        assert_eq!(spec.provider, Provider::OpenAi);
        assert_eq!(spec.model, "gpt-4o-mini");

        let spec: ModelSpec = "claude:claude-3-5-sonnet-latest".parse().unwrap();
        assert_eq!(spec.provider, Provider::Anthropic);
        assert_eq!(spec.to_string(), "anthropic:claude-3-5-sonnet-latest");
    }

    #[test]
    fn test_model_with_colon_in_tag() {
        let spec: ModelSpec = "ollama:llama3.1:8b".parse().unwrap();
        assert_eq!(spec.provider, Provider::Ollama);
        assert_eq!(spec.model, "llama3.1:8b");
    }

    #[test]
    fn test_infer_provider() {
        assert_eq!("gpt-4o".parse::<ModelSpec>().unwrap().provider, Provider::OpenAi);
        assert_eq!("o3-mini".parse::<ModelSpec>().unwrap().provider, Provider::OpenAi);
        assert_eq!(
            "claude-3-5-haiku-latest".parse::<ModelSpec>().unwrap().provider,
            Provider::Anthropic
        );
        assert!(matches!(
            "mystery-model".parse::<ModelSpec>(),
            Err(LlmError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_provider_and_empty_model() {
        assert!(matches!("bard:gemini".parse::<ModelSpec>(), Err(LlmError::UnknownProvider(_))));
        assert!(matches!("openai:".parse::<ModelSpec>(), Err(LlmError::ConfigError(_))));
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let model = init_chat_model("ollama:llama3.1", &InitOptions::default()).unwrap();
        assert_eq!(model.model_name(), "llama3.1");
    }

    #[test]
    fn test_every_provider_round_trips() {
        for provider in Provider::ALL {
            assert_eq!(provider.as_str().parse::<Provider>().unwrap(), provider);
        }
        assert!(Provider::Ollama.api_key_env().is_none());
    }
}
