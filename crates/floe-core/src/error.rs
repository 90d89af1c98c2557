//! Common error types shared by the floe crates.

use snafu::prelude::*;

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// A required value is empty.
    #[snafu(display("Configuration field '{field}' cannot be empty"))]
    EmptyField { field: String },

    /// A numeric value is out of its allowed range.
    #[snafu(display("Configuration field '{field}' is invalid: {message}"))]
    InvalidValue { field: String, message: String },
}
