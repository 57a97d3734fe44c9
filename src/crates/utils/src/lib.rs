//! Configuration helpers for agentgraph.
//!
//! # Config (`config`)
//!
//! Environment variable access with typed parsing, YAML/JSON config file
//! loading, and the [`FromEnv`] / [`ValidateConfig`] traits the binary's
//! settings implement:
//!
//! ```rust,ignore
//! use utils::config::{get_env_parse_or, load_config_file};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct AppConfig {
//!     model: String,
//!     recursion_limit: usize,
//! }
//!
//! let limit = get_env_parse_or("AGENTGRAPH_RECURSION_LIMIT", 25usize);
//! let config: AppConfig = load_config_file("agentgraph.yaml")?;
//! ```

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{
    env_key, get_env, get_env_bool, get_env_bool_or, get_env_opt, get_env_or, get_env_parse,
    get_env_parse_opt, get_env_parse_or, load_config_file, load_json_config, load_yaml_config,
    require_non_zero, FromEnv, ValidateConfig,
};
pub use error::{Result, UtilsError};
