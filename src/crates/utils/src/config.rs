//! Configuration loading from the environment and from files.
//!
//! Configuration is layered:
//!
//! ```text
//!   defaults  ──▶  --config file (YAML or JSON)  ──▶  PREFIX_* environment  ──▶  validate()
//! ```
//!
//! Types opt in by implementing [`FromEnv`] (apply environment overrides
//! on top of an existing value) and [`ValidateConfig`].
//!
//! Environment keys are built with [`env_key`]: `env_key("AGENTGRAPH",
//! "recursion_limit")` is `AGENTGRAPH_RECURSION_LIMIT`.

use crate::error::{Result, UtilsError};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::str::FromStr;

/// `PREFIX_FIELD` in upper case.
pub fn env_key(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_ascii_uppercase()
    } else {
        format!("{}_{}", prefix, field).to_ascii_uppercase()
    }
}

/// Value of a set, non-empty environment variable.
pub fn get_env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Get a required environment variable.
pub fn get_env(key: &str) -> Result<String> {
    get_env_opt(key).ok_or_else(|| UtilsError::MissingEnv { key: key.to_string() })
}

/// Get an environment variable with a default value.
pub fn get_env_or(key: &str, default: &str) -> String {
    get_env_opt(key).unwrap_or_else(|| default.to_string())
}

/// Parse an environment variable if it is set.
///
/// Unset is `Ok(None)`; set but unparseable is an error, never a silent
/// fallback.
pub fn get_env_parse_opt<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_opt(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| UtilsError::InvalidEnv {
                key: key.to_string(),
                reason: format!("{:?}: {}", raw, e),
            })
        })
        .transpose()
}

/// Parse a required environment variable.
pub fn get_env_parse<T>(key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_parse_opt(key)?.ok_or_else(|| UtilsError::MissingEnv { key: key.to_string() })
}

/// Parse an environment variable, falling back to `default` when it is
/// unset or invalid.
pub fn get_env_parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_env_parse_opt(key) {
        Ok(Some(value)) => value,
        Ok(None) => default,
        Err(err) => {
            tracing::warn!(error = %err, "ignoring environment override");
            default
        }
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(UtilsError::InvalidEnv {
            key: key.to_string(),
            reason: format!("{:?} is not a boolean", raw),
        }),
    }
}

/// Get a boolean environment variable (`true/false`, `1/0`, `yes/no`,
/// `on/off`).
pub fn get_env_bool(key: &str) -> Result<bool> {
    parse_bool(key, &get_env(key)?)
}

/// Get a boolean environment variable with a default.
pub fn get_env_bool_or(key: &str, default: bool) -> bool {
    get_env_opt(key)
        .and_then(|raw| parse_bool(key, &raw).ok())
        .unwrap_or(default)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| UtilsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load configuration from a YAML file.
pub fn load_yaml_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    serde_yaml::from_str(&read(path)?).map_err(|e| UtilsError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Load configuration from a JSON file.
pub fn load_json_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    serde_json::from_str(&read(path)?).map_err(|e| UtilsError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Load configuration from a file, choosing the format by extension
/// (`.yaml`, `.yml`, `.json`).
pub fn load_config_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| UtilsError::ConfigError(format!("no file extension on {:?}", path)))?;

    tracing::debug!(path = %path.display(), format = %extension, "loading config file");
    match extension.as_str() {
        "yaml" | "yml" => load_yaml_config(path),
        "json" => load_json_config(path),
        other => Err(UtilsError::ConfigError(format!(
            "unsupported config file extension '{}' (expected yaml, yml or json)",
            other
        ))),
    }
}

/// Types whose fields can be overridden from `PREFIX_*` variables.
pub trait FromEnv: Sized {
    /// Apply every set variable on top of `self`.
    fn merge_env(self, prefix: &str) -> Result<Self>;

    /// Defaults with environment overrides.
    fn from_env(prefix: &str) -> Result<Self>
    where
        Self: Default,
    {
        Self::default().merge_env(prefix)
    }
}

/// Trait for validating configuration.
pub trait ValidateConfig {
    /// Validate the configuration, returning an error if invalid.
    fn validate(&self) -> Result<()>;
}

/// Reject a zero limit.
pub fn require_non_zero(field: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(UtilsError::Validation(format!("{} must be greater than zero", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct LimitsConfig {
        name: String,
        recursion_limit: usize,
        verbose: bool,
    }

    impl FromEnv for LimitsConfig {
        fn merge_env(mut self, prefix: &str) -> Result<Self> {
            if let Some(name) = get_env_opt(&env_key(prefix, "name")) {
                self.name = name;
            }
            if let Some(limit) = get_env_parse_opt(&env_key(prefix, "recursion_limit"))? {
                self.recursion_limit = limit;
            }
            if let Some(raw) = get_env_opt(&env_key(prefix, "verbose")) {
                self.verbose = parse_bool(&env_key(prefix, "verbose"), &raw)?;
            }
            Ok(self)
        }
    }

    impl ValidateConfig for LimitsConfig {
        fn validate(&self) -> Result<()> {
            require_non_zero("recursion_limit", self.recursion_limit)
        }
    }

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_env_key() {
        assert_eq!(env_key("AGENTGRAPH", "recursion_limit"), "AGENTGRAPH_RECURSION_LIMIT");
        assert_eq!(env_key("", "rust_log"), "RUST_LOG");
    }

    #[test]
    fn test_missing_and_empty_vars() {
        assert!(matches!(
            get_env("UTILS_TEST_NEVER_SET_1"),
            Err(UtilsError::MissingEnv { .. })
        ));
        std::env::set_var("UTILS_TEST_EMPTY", "  ");
        assert_eq!(get_env_or("UTILS_TEST_EMPTY", "fallback"), "fallback");
        std::env::remove_var("UTILS_TEST_EMPTY");
    }

    #[test]
    fn test_parse_opt_distinguishes_unset_from_invalid() {
        assert_eq!(get_env_parse_opt::<u32>("UTILS_TEST_NEVER_SET_2").unwrap(), None);

        std::env::set_var("UTILS_TEST_BAD_INT", "many");
        assert!(matches!(
            get_env_parse_opt::<u32>("UTILS_TEST_BAD_INT"),
            Err(UtilsError::InvalidEnv { .. })
        ));
        assert_eq!(get_env_parse_or("UTILS_TEST_BAD_INT", 7u32), 7);
        std::env::remove_var("UTILS_TEST_BAD_INT");

        std::env::set_var("UTILS_TEST_FLOAT", " 0.25 ");
        assert_eq!(get_env_parse::<f32>("UTILS_TEST_FLOAT").unwrap(), 0.25);
        std::env::remove_var("UTILS_TEST_FLOAT");
    }

    #[test]
    fn test_bool_spellings() {
        for (raw, expected) in [("TRUE", true), ("1", true), ("on", true), ("No", false), ("off", false)] {
            assert_eq!(parse_bool("K", raw).unwrap(), expected, "{}", raw);
        }
        assert!(parse_bool("K", "maybe").is_err());
        assert!(get_env_bool_or("UTILS_TEST_NEVER_SET_3", true));
    }

    #[test]
    fn test_load_by_extension() {
        let dir = TempDir::new().unwrap();
        let yaml = write(&dir, "agent.YML", "name: sql\nrecursion_limit: 40\n");
        let json = write(&dir, "agent.json", r#"{"name": "rag", "verbose": true}"#);

        let from_yaml: LimitsConfig = load_config_file(&yaml).unwrap();
        assert_eq!(from_yaml.name, "sql");
        assert_eq!(from_yaml.recursion_limit, 40);

        let from_json: LimitsConfig = load_config_file(&json).unwrap();
        assert_eq!(from_json.name, "rag");
        assert!(from_json.verbose);
        assert_eq!(from_json.recursion_limit, 0);
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        let toml = write(&dir, "agent.toml", "name = 'x'");
        let bare = write(&dir, "agent", "{}");
        let broken = write(&dir, "broken.yaml", "recursion_limit: [unclosed");

        assert!(matches!(load_config_file::<LimitsConfig>(&toml), Err(UtilsError::ConfigError(_))));
        assert!(matches!(load_config_file::<LimitsConfig>(&bare), Err(UtilsError::ConfigError(_))));
        assert!(matches!(load_config_file::<LimitsConfig>(&broken), Err(UtilsError::Parse { .. })));
        assert!(matches!(
            load_json_config::<LimitsConfig>(dir.path().join("missing.json")),
            Err(UtilsError::Io { .. })
        ));
    }

    #[test]
    fn test_env_overrides_file_then_validates() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "limits.yaml", "name: file\nrecursion_limit: 10\n");

        std::env::set_var("UTILSTEST_RECURSION_LIMIT", "0");
        std::env::set_var("UTILSTEST_VERBOSE", "yes");
        let config = load_config_file::<LimitsConfig>(&path)
            .unwrap()
            .merge_env("UTILSTEST")
            .unwrap();
        std::env::remove_var("UTILSTEST_RECURSION_LIMIT");
        std::env::remove_var("UTILSTEST_VERBOSE");

        assert_eq!(config.name, "file");
        assert!(config.verbose);
        assert!(matches!(config.validate(), Err(UtilsError::Validation(_))));
    }

    #[test]
    fn test_from_env_starts_from_defaults() {
        let config = LimitsConfig::from_env("UTILS_UNUSED_PREFIX").unwrap();
        assert_eq!(config, LimitsConfig::default());
    }
}
