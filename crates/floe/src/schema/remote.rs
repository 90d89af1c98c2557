//! The store's own schema representation.

use serde::{Deserialize, Serialize};

/// Table schema as returned by a schema fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTableSchema {
    pub fields: Vec<RemoteField>,
}

/// One column of a [`RemoteTableSchema`].
///
/// `type` and `mode` are kept as the store's strings so an unknown value
/// surfaces as a resolution error naming it, not as a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    /// Missing means NULLABLE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Children of a RECORD/STRUCT column.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<RemoteField>,
}

impl RemoteField {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>, mode: &str) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            mode: Some(mode.to_string()),
            fields: Vec::new(),
        }
    }

    pub fn record(name: impl Into<String>, mode: &str, fields: Vec<RemoteField>) -> Self {
        Self {
            name: name.into(),
            field_type: "RECORD".to_string(),
            mode: Some(mode.to_string()),
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_schema_json() {
        let json = r#"{
            "fields": [
                {"name": "id", "type": "INTEGER", "mode": "REQUIRED"},
                {"name": "profile", "type": "RECORD", "fields": [
                    {"name": "a", "type": "INT64", "mode": "REQUIRED"}
                ]}
            ]
        }"#;
        let schema: RemoteTableSchema = serde_json::from_str(json).unwrap();

        assert_eq!(schema.fields.len(), 2);
        assert_eq!(schema.fields[0].mode.as_deref(), Some("REQUIRED"));
        assert_eq!(schema.fields[1].mode, None);
        assert_eq!(schema.fields[1].fields[0].name, "a");
    }
}
