//! Engine configuration, loaded from a YAML file via `serde-saphyr`.
//! Holds the fields that govern the engine at runtime: the default
//! resource-matching threshold, per-provider embedded-accessor
//! registrations to compile at startup, and the log level for the
//! `env_logger` initializer below.

use std::collections::BTreeMap;

use log::LevelFilter;
use serde::Deserialize;

/// A single embedded-accessor registration loaded from config: the
/// resource type and path it applies to, plus the accessor's
/// `(type, config)` pair.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddedAccessorConfig {
    pub resource_type: String,
    pub path: String,
    pub accessor_type: String,
    pub accessor_config: String,
}

fn default_match_threshold() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    /// Ceiling on the per-unit resource-matching score above which a
    /// modified document is treated as a new resource rather than a
    /// match.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,

    /// Embedded-accessor registrations to compile and cache during
    /// provider construction.
    #[serde(default)]
    pub embedded_accessors: Vec<EmbeddedAccessorConfig>,

    /// `env_logger` level filter string (`"error"`, `"warn"`, `"info"`,
    /// `"debug"`, `"trace"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            match_threshold: default_match_threshold(),
            embedded_accessors: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

impl Configuration {
    pub fn log_level_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::Info)
    }

    /// Group accessor registrations by resource type, for providers
    /// that register them in one pass at construction time.
    pub fn accessors_by_resource_type(&self) -> BTreeMap<String, Vec<&EmbeddedAccessorConfig>> {
        let mut out: BTreeMap<String, Vec<&EmbeddedAccessorConfig>> = BTreeMap::new();
        for accessor in &self.embedded_accessors {
            out.entry(accessor.resource_type.clone()).or_default().push(accessor);
        }
        out
    }
}

/// Load configuration from `cfgcore.config.yaml` in the current
/// directory, falling back to defaults when the file is absent or
/// fails to parse.
pub fn config_from_env() -> Configuration {
    let Ok(raw) = std::fs::read_to_string("cfgcore.config.yaml") else {
        return Configuration::default();
    };
    serde_saphyr::from_str(&raw)
        .inspect_err(|err| log::warn!("failed to deserialize cfgcore.config.yaml: {err:?}"))
        .unwrap_or_default()
}

/// Install an `env_logger` subscriber at the configured level. Safe to
/// call multiple times; only the first call takes effect.
pub fn init_logging(config: &Configuration) {
    let _ = env_logger::Builder::from_default_env().filter_level(config.log_level_filter()).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configuration_has_sane_threshold_and_log_level() {
        let config = Configuration::default();
        assert_eq!(config.match_threshold, 1.0);
        assert_eq!(config.log_level_filter(), LevelFilter::Info);
        assert!(config.embedded_accessors.is_empty());
    }

    #[test]
    fn accessors_group_by_resource_type() {
        let config = Configuration {
            embedded_accessors: vec![
                EmbeddedAccessorConfig {
                    resource_type: "ConfigMap".to_string(),
                    path: "data.conn".to_string(),
                    accessor_type: "regex".to_string(),
                    accessor_config: r"host=(?P<host>\S+)".to_string(),
                },
                EmbeddedAccessorConfig {
                    resource_type: "ConfigMap".to_string(),
                    path: "data.other".to_string(),
                    accessor_type: "regex".to_string(),
                    accessor_config: r"(?P<x>\d+)".to_string(),
                },
            ],
            ..Configuration::default()
        };
        let grouped = config.accessors_by_resource_type();
        assert_eq!(grouped.get("ConfigMap").map(Vec::len), Some(2));
    }
}
