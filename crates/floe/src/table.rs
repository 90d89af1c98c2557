//! Destination table identity.

use serde::{Deserialize, Serialize};
use std::fmt;

use floe_core::ConfigError;

/// Three-part reference locating a destination table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Resource path of the table, e.g. `projects/p/datasets/d/tables/t`.
    pub fn path(&self) -> String {
        format!(
            "projects/{}/datasets/{}/tables/{}",
            self.project, self.dataset, self.table
        )
    }

    /// Short dotted identifier used as a metrics and log label.
    pub fn label(&self) -> String {
        format!("{}.{}.{}", self.project, self.dataset, self.table)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("table.project", &self.project),
            ("table.dataset", &self.dataset),
            ("table.table", &self.table),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyField {
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}
