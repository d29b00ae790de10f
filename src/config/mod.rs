//! Configuration loading.
//!
//! Sources, lowest priority first: built-in defaults, a YAML file (explicit
//! path, else `graphwalk.yaml` in the platform config directory), then
//! `GRAPHWALK_*` environment variables.

pub mod schema;

use std::path::{Path, PathBuf};

use crate::error::{GraphWalkError, Result};
use schema::EngineConfig;

/// File name looked up in the platform config directory.
pub const CONFIG_FILE_NAME: &str = "graphwalk.yaml";

/// Platform config file location, if a home directory can be determined.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "graphwalk")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// Parse a config from YAML text.
pub fn parse_config(yaml: &str) -> Result<EngineConfig> {
    let config: EngineConfig =
        serde_yaml::from_str(yaml).map_err(|e| GraphWalkError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path` (or the platform default), then apply env overrides.
///
/// A missing default file is not an error; a missing explicit file is.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(p) => read_file(p)?,
        None => match default_config_path() {
            Some(p) if p.exists() => read_file(&p)?,
            _ => EngineConfig::default(),
        },
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn read_file(path: &Path) -> Result<EngineConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| GraphWalkError::Config(format!("cannot read {}: {e}", path.display())))?;
    let config = parse_config(&text)?;
    tracing::debug!(path = %path.display(), "loaded graphwalk config");
    Ok(config)
}

/// Apply `GRAPHWALK_*` overrides read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut EngineConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
        raw.trim()
            .parse()
            .map_err(|_| GraphWalkError::Config(format!("{key}: cannot parse '{raw}'")))
    }

    if let Some(v) = lookup("GRAPHWALK_MAX_DEPTH") {
        config.limits.max_depth = parsed("GRAPHWALK_MAX_DEPTH", v)?;
    }
    if let Some(v) = lookup("GRAPHWALK_MAX_NODES") {
        config.limits.max_nodes = parsed("GRAPHWALK_MAX_NODES", v)?;
    }
    if let Some(v) = lookup("GRAPHWALK_QUERY_TIMEOUT_MS") {
        config.limits.query_timeout_ms = parsed("GRAPHWALK_QUERY_TIMEOUT_MS", v)?;
    }
    if let Some(v) = lookup("GRAPHWALK_CALL_TIMEOUT_MS") {
        config.limits.call_timeout_ms = parsed("GRAPHWALK_CALL_TIMEOUT_MS", v)?;
    }
    if let Some(v) = lookup("GRAPHWALK_PROBE_DEPTH") {
        config.estimation.probe_depth = parsed("GRAPHWALK_PROBE_DEPTH", v)?;
    }
    if let Some(v) = lookup("GRAPHWALK_HUB_THRESHOLD") {
        config.estimation.hub_threshold = parsed("GRAPHWALK_HUB_THRESHOLD", v)?;
    }
    if let Some(v) = lookup("GRAPHWALK_RELAXED_LIMITS") {
        config.estimation.allow_relaxed_limits = parsed("GRAPHWALK_RELAXED_LIMITS", v)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_win_over_file_values() {
        let mut config = parse_config("limits:\n  max_nodes: 100\n").unwrap();
        let env: HashMap<&str, &str> = [
            ("GRAPHWALK_MAX_NODES", "250"),
            ("GRAPHWALK_PROBE_DEPTH", "3"),
            ("GRAPHWALK_RELAXED_LIMITS", "true"),
        ]
        .into_iter()
        .collect();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.limits.max_nodes, 250);
        assert_eq!(config.estimation.probe_depth, 3);
        assert!(config.estimation.allow_relaxed_limits);
    }

    #[test]
    fn env_override_with_garbage_is_config_error() {
        let mut config = EngineConfig::default();
        let err = apply_env_overrides(&mut config, |k| {
            (k == "GRAPHWALK_MAX_DEPTH").then(|| "deep".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, GraphWalkError::Config(_)));
    }

    #[test]
    fn load_config_reads_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "estimation:\n  hub_threshold: 20\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.estimation.hub_threshold, 20.0);
    }

    #[test]
    fn load_config_missing_explicit_file_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = load_config(Some(&dir.path().join("nope.yaml"))).unwrap_err();
        assert!(matches!(err, GraphWalkError::Config(_)));
    }

    #[test]
    fn parse_config_validates() {
        assert!(parse_config("estimation:\n  probe_depth: 0\n").is_err());
        assert!(parse_config("estimation:\n  relaxed_limit_factor: .nan\n").is_err());
        assert!(parse_config("estimation:\n  safety_margin: .nan\n").is_err());
    }
}
