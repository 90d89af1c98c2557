//! Command line interface and local input loading.

use clap::Parser;
use serde_json::Value;
use snafu::prelude::*;
use std::path::{Path, PathBuf};

use crate::error::{ParseInputSnafu, ParseSchemaSnafu, PipelineError, ReadInputSnafu};
use crate::schema::RemoteTableSchema;

/// Encode NDJSON records against a table schema and append them in order.
#[derive(Parser, Debug)]
#[command(version)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// NDJSON file with one record per line
    #[arg(short, long)]
    pub input: PathBuf,

    /// Table schema JSON (`{"fields": [...]}`) served by the local store
    #[arg(short, long)]
    pub schema: PathBuf,
}

/// Read one JSON document per non-blank line, in file order.
pub async fn read_records(path: &Path) -> Result<Vec<Value>, PipelineError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .context(ReadInputSnafu {
            path: path.display().to_string(),
        })?;
    parse_records(&contents)
}

/// Parse NDJSON text. Line numbers in errors are 1-based.
pub fn parse_records(contents: &str) -> Result<Vec<Value>, PipelineError> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| serde_json::from_str(line).context(ParseInputSnafu { line: i + 1 }))
        .collect()
}

/// Read a table schema document.
pub async fn read_schema(path: &Path) -> Result<RemoteTableSchema, PipelineError> {
    let display = path.display().to_string();
    let contents = tokio::fs::read_to_string(path)
        .await
        .context(ReadInputSnafu {
            path: display.as_str(),
        })?;
    serde_json::from_str(&contents).context(ParseSchemaSnafu { path: display })
}
