//! Configuration loading shared by the floe crates.
//!
//! Files are read, environment variables are interpolated, and the result is
//! deserialized from YAML. Validation of the typed document is left to the
//! owning crate.

mod vars;

pub use vars::{InterpolationResult, interpolate};

use std::path::Path;

use serde::de::DeserializeOwned;
use snafu::prelude::*;

use crate::error::{ConfigError, ReadFileSnafu, YamlParseSnafu};

/// Interpolate environment variables in `contents` and parse it as YAML.
pub fn parse_yaml<T: DeserializeOwned>(contents: &str) -> Result<T, ConfigError> {
    let result = interpolate(contents);
    if !result.is_ok() {
        return Err(ConfigError::EnvInterpolation {
            message: result.errors.join("\n"),
        });
    }

    serde_yaml::from_str(&result.text).context(YamlParseSnafu)
}

/// Read a YAML file, interpolate environment variables, and deserialize it.
pub fn load_yaml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
    parse_yaml(&contents)
}
