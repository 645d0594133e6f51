use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Engine settings, usually deserialized from the host application's
/// configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Directory template names are resolved against.
    pub template_dir: PathBuf,
    /// Reuse compiled artifacts when the template is unchanged.
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,
    /// Where compiled artifacts go; `<template_dir>/compiled` when unset.
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,
}

fn default_cache_enabled() -> bool {
    true
}

impl EngineConfig {
    pub fn new(template_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_dir: template_dir.into(),
            cache_enabled: default_cache_enabled(),
            artifact_dir: None,
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    pub fn resolved_artifact_dir(&self) -> PathBuf {
        self.artifact_dir
            .clone()
            .unwrap_or_else(|| self.template_dir.join("compiled"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = EngineConfig::from_json(r#"{ "template_dir": "views" }"#).unwrap();
        assert_eq!(config, EngineConfig::new("views"));
        assert!(config.cache_enabled);
        assert_eq!(config.resolved_artifact_dir(), PathBuf::from("views").join("compiled"));
    }

    #[test]
    fn explicit_fields_win() {
        let config = EngineConfig::from_json(
            r#"{ "template_dir": "views", "cache_enabled": false, "artifact_dir": "/tmp/out" }"#,
        )
        .unwrap();
        assert!(!config.cache_enabled);
        assert_eq!(config.resolved_artifact_dir(), PathBuf::from("/tmp/out"));
    }

    #[test]
    fn template_dir_is_required() {
        assert!(EngineConfig::from_json(r#"{ "cache_enabled": true }"#).is_err());
    }

    #[test]
    fn builder_methods() {
        let config = EngineConfig::new("t").with_cache(false).with_artifact_dir("a");
        assert!(!config.cache_enabled);
        assert_eq!(config.artifact_dir, Some(PathBuf::from("a")));
    }
}
