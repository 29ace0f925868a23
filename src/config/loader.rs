//! Configuration loading from disk and environment.

use std::path::Path;
use std::fs;
use crate::config::schema::{ExecutionMode, OrchestratorConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Forces sequential execution when set to a truthy value.
pub const ENV_FORCE_SEQUENTIAL: &str = "DECK_FORCE_SEQUENTIAL";
/// Overrides `concurrency.execution_mode`.
pub const ENV_EXECUTION_MODE: &str = "DECK_EXECUTION_MODE";
/// Overrides `concurrency.max_concurrency`.
pub const ENV_MAX_CONCURRENCY: &str = "DECK_MAX_CONCURRENCY";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Env { var: &'static str, value: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env { var, value } => write!(f, "Invalid value '{}' for {}", value, var),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load configuration from a TOML file, apply environment overrides and validate.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let mut config: OrchestratorConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply `DECK_*` overrides using the given variable lookup.
pub fn apply_env_overrides<F>(config: &mut OrchestratorConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_FORCE_SEQUENTIAL) {
        config.concurrency.force_sequential = parse_bool(&value);
    }

    if let Some(value) = lookup(ENV_EXECUTION_MODE) {
        config.concurrency.execution_mode = value
            .parse::<ExecutionMode>()
            .map_err(|_| ConfigError::Env { var: ENV_EXECUTION_MODE, value: value.clone() })?;
    }

    if let Some(value) = lookup(ENV_MAX_CONCURRENCY) {
        config.concurrency.max_concurrency = value
            .trim()
            .parse::<usize>()
            .map_err(|_| ConfigError::Env { var: ENV_MAX_CONCURRENCY, value: value.clone() })?;
    }

    Ok(())
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on" | "enabled"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[concurrency]\nmax_concurrency = 3\n\n[circuit_breaker]\nfailure_threshold = 5\ncooldown_ms = 100"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.concurrency.max_concurrency, 3);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.cooldown_ms, 100);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pool]\nsize = 0").unwrap();

        match load_config(file.path()) {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 1),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_env_kill_switch() {
        let mut config = OrchestratorConfig::default();
        apply_env_overrides(&mut config, lookup(&[(ENV_FORCE_SEQUENTIAL, "Yes")])).unwrap();
        assert!(config.concurrency.force_sequential);

        apply_env_overrides(&mut config, lookup(&[(ENV_FORCE_SEQUENTIAL, "off")])).unwrap();
        assert!(!config.concurrency.force_sequential);
    }

    #[test]
    fn test_env_mode_and_concurrency() {
        let mut config = OrchestratorConfig::default();
        apply_env_overrides(
            &mut config,
            lookup(&[(ENV_EXECUTION_MODE, "concurrent"), (ENV_MAX_CONCURRENCY, "4")]),
        )
        .unwrap();
        assert_eq!(config.concurrency.execution_mode, ExecutionMode::Concurrent);
        assert_eq!(config.concurrency.max_concurrency, 4);
    }

    #[test]
    fn test_env_invalid_value() {
        let mut config = OrchestratorConfig::default();
        let err = apply_env_overrides(&mut config, lookup(&[(ENV_MAX_CONCURRENCY, "many")])).unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_CONCURRENCY));
    }
}
