//! floe CLI: append NDJSON records to a table through the local store.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use floe::cli::{read_records, read_schema};
use floe::{CliArgs, Config, MemoryStore, Pipeline, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();

    let config = match Config::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let schema = match read_schema(&args.schema).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to load schema: {e}");
            return ExitCode::FAILURE;
        }
    };

    let records = match read_records(&args.input).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to load input: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        "Appending {} record(s) to {} ({} mode)",
        records.len(),
        config.table,
        config.stream.mode.as_str()
    );

    let store = MemoryStore::new();
    store.register_table(config.table.clone(), schema);
    let pipeline = Pipeline::new(config, Arc::new(store));

    match pipeline.run(&records).await {
        Ok(report) => {
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("Failed to render report: {e}"),
            }
            if report.is_complete() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Err(e) => {
            eprintln!("Run failed: {e}");
            ExitCode::FAILURE
        }
    }
}
