//! Configuration for the floe writer.

use serde::{Deserialize, Serialize};
use std::path::Path;

use floe_core::{ConfigError, RetryPolicy, load_yaml, parse_yaml};

use crate::encode::EncodeOptions;
use crate::stream::{SessionOptions, StreamMode};
use crate::table::TableRef;

/// Append stream settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    /// Offset assignment mode.
    #[serde(default)]
    pub mode: StreamMode,
    /// Records per append batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Batches allowed in flight per session.
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
    /// Retry budget for transient transport failures.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_batch_size() -> usize {
    500
}

fn default_max_inflight() -> usize {
    8
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            mode: StreamMode::default(),
            batch_size: default_batch_size(),
            max_inflight: default_max_inflight(),
            retry: RetryPolicy::default(),
        }
    }
}

impl StreamConfig {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            mode: self.mode,
            max_inflight: self.max_inflight,
            retry: self.retry,
        }
    }
}

/// Per-record failure handling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorHandlingConfig {
    /// Maximum failed records before aborting the run (0 = unlimited, default: 0).
    #[serde(default)]
    pub max_failures: usize,
    /// Directory for the NDJSON failure file.
    #[serde(default)]
    pub dlq_path: Option<String>,
}

/// Main configuration for floe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Destination table.
    pub table: TableRef,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub encoding: EncodeOptions,
    #[serde(default)]
    pub error_handling: ErrorHandlingConfig,
}

impl Config {
    /// A configuration with defaults for everything but the table.
    pub fn for_table(table: TableRef) -> Self {
        Self {
            table,
            stream: StreamConfig::default(),
            encoding: EncodeOptions::default(),
            error_handling: ErrorHandlingConfig::default(),
        }
    }

    /// Load configuration from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Config = load_yaml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = parse_yaml(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.table.validate()?;
        if self.stream.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stream.batch_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.stream.max_inflight == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stream.max_inflight".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if let Some(path) = &self.error_handling.dlq_path
            && path.is_empty()
        {
            return Err(ConfigError::EmptyField {
                field: "error_handling.dlq_path".to_string(),
            });
        }
        self.stream.retry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::parse(
            r#"
table:
  project: p
  dataset: d
  table: events
"#,
        )
        .unwrap();

        assert_eq!(config.table, TableRef::new("p", "d", "events"));
        assert_eq!(config.stream.mode, StreamMode::Default);
        assert_eq!(config.stream.batch_size, 500);
        assert_eq!(config.stream.max_inflight, 8);
        assert_eq!(config.stream.retry, RetryPolicy::default());
        assert!(!config.encoding.ignore_unknown_fields);
        assert_eq!(config.error_handling.max_failures, 0);
    }

    #[test]
    fn test_full_config() {
        let config = Config::parse(
            r#"
table: { project: p, dataset: d, table: events }
stream:
  mode: committed_explicit
  batch_size: 100
  max_inflight: 2
  retry:
    max_attempts: 3
    initial_backoff_ms: 10
    max_backoff_ms: 50
encoding:
  ignore_unknown_fields: true
error_handling:
  max_failures: 10
  dlq_path: /tmp/floe-dlq
"#,
        )
        .unwrap();

        assert_eq!(config.stream.mode, StreamMode::CommittedExplicit);
        assert_eq!(config.stream.batch_size, 100);
        let options = config.stream.session_options();
        assert_eq!(options.max_inflight, 2);
        assert_eq!(options.retry.max_attempts, 3);
        assert!(config.encoding.ignore_unknown_fields);
        assert_eq!(config.error_handling.dlq_path.as_deref(), Some("/tmp/floe-dlq"));
    }

    #[test]
    fn test_env_interpolation_in_table() {
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("FLOE_CONFIG_TEST_DATASET", "analytics") };
        let config = Config::parse(
            "table: { project: p, dataset: ${FLOE_CONFIG_TEST_DATASET}, table: events }\n",
        )
        .unwrap();
        assert_eq!(config.table.dataset, "analytics");
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let err = Config::parse(
            "table: { project: p, dataset: d, table: t }\nstream: { batch_size: 0 }\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "stream.batch_size"));
    }

    #[test]
    fn test_rejects_empty_table_part() {
        let err = Config::parse("table: { project: p, dataset: '', table: t }\n").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyField { .. }));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let err = Config::parse(
            "table: { project: p, dataset: d, table: t }\nstream: { mode: default, parallelism: 4 }\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::YamlParse { .. }));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "table: {{ project: p, dataset: d, table: t }}").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.table.table, "t");
    }
}
