//! Field-tree descriptors.

use std::collections::HashSet;
use std::sync::Arc;

use snafu::prelude::*;

use super::handshake::SchemaHandshake;
use super::remote::{RemoteField, RemoteTableSchema};
use crate::error::{
    DuplicateFieldSnafu, EmptySchemaSnafu, EmptyStructSnafu, SchemaError, UnsupportedModeSnafu,
    UnsupportedTypeSnafu,
};
use crate::table::TableRef;

/// Scalar column types the encoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Int64,
    Float64,
    Bool,
    String,
    Bytes,
    Timestamp,
}

impl ScalarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarKind::Int64 => "INT64",
            ScalarKind::Float64 => "FLOAT64",
            ScalarKind::Bool => "BOOL",
            ScalarKind::String => "STRING",
            ScalarKind::Bytes => "BYTES",
            ScalarKind::Timestamp => "TIMESTAMP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldMode {
    Required,
    Nullable,
    Repeated,
}

impl FieldMode {
    fn parse(mode: Option<&str>) -> Option<Self> {
        match mode.map(str::to_ascii_uppercase).as_deref() {
            None | Some("NULLABLE") => Some(FieldMode::Nullable),
            Some("REQUIRED") => Some(FieldMode::Required),
            Some("REPEATED") => Some(FieldMode::Repeated),
            Some(_) => None,
        }
    }
}

/// What a field holds: a scalar or a nested message.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Scalar(ScalarKind),
    Struct(MessageDescriptor),
}

impl FieldType {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldType::Scalar(kind) => kind.as_str(),
            FieldType::Struct(_) => "STRUCT",
        }
    }
}

/// One schema node. `number` is the wire tag.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub number: u32,
    pub mode: FieldMode,
    pub field_type: FieldType,
}

/// Ordered fields of a table or of a STRUCT column.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDescriptor {
    /// Message type name used in the handshake descriptor.
    pub name: String,
    /// Sorted by `number`, which is declaration order starting at 1.
    pub fields: Vec<FieldDescriptor>,
}

impl MessageDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_by_number(&self, number: u32) -> Option<&FieldDescriptor> {
        // Numbers are dense and 1-based.
        let index = usize::try_from(number).ok()?.checked_sub(1)?;
        self.fields.get(index).filter(|f| f.number == number)
    }
}

/// Resolved schema of one table, fixed for the lifetime of a session.
#[derive(Debug, Clone)]
pub struct TableSchema {
    table: TableRef,
    root: MessageDescriptor,
    handshake: Arc<SchemaHandshake>,
}

/// Name of the root message in the handshake descriptor.
pub(crate) const ROOT_MESSAGE: &str = "root";

impl TableSchema {
    /// Convert the store's field tree into a descriptor tree.
    pub fn from_remote(table: TableRef, remote: &RemoteTableSchema) -> Result<Self, SchemaError> {
        ensure!(
            !remote.fields.is_empty(),
            EmptySchemaSnafu {
                table: table.to_string()
            }
        );

        let root = convert_message(ROOT_MESSAGE, "", &remote.fields)?;
        let handshake = Arc::new(SchemaHandshake::from_descriptor(&root));

        Ok(Self {
            table,
            root,
            handshake,
        })
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn root(&self) -> &MessageDescriptor {
        &self.root
    }

    pub fn handshake(&self) -> &Arc<SchemaHandshake> {
        &self.handshake
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn convert_message(
    name: &str,
    prefix: &str,
    fields: &[RemoteField],
) -> Result<MessageDescriptor, SchemaError> {
    let mut seen = HashSet::with_capacity(fields.len());
    let mut converted = Vec::with_capacity(fields.len());

    for (index, field) in fields.iter().enumerate() {
        let path = join_path(prefix, &field.name);
        ensure!(
            seen.insert(field.name.as_str()),
            DuplicateFieldSnafu { path: path.clone() }
        );

        let mode = FieldMode::parse(field.mode.as_deref()).context(UnsupportedModeSnafu {
            path: path.clone(),
            mode: field.mode.clone().unwrap_or_default(),
        })?;

        let field_type = match field.field_type.to_ascii_uppercase().as_str() {
            "INT64" | "INTEGER" => FieldType::Scalar(ScalarKind::Int64),
            "FLOAT64" | "FLOAT" => FieldType::Scalar(ScalarKind::Float64),
            "BOOL" | "BOOLEAN" => FieldType::Scalar(ScalarKind::Bool),
            "STRING" => FieldType::Scalar(ScalarKind::String),
            "BYTES" => FieldType::Scalar(ScalarKind::Bytes),
            "TIMESTAMP" => FieldType::Scalar(ScalarKind::Timestamp),
            "STRUCT" | "RECORD" => {
                ensure!(
                    !field.fields.is_empty(),
                    EmptyStructSnafu { path: path.clone() }
                );
                // Named by field number: names may contain `__` and collide.
                let nested_name = format!("{name}__f{}", index + 1);
                FieldType::Struct(convert_message(&nested_name, &path, &field.fields)?)
            }
            _ => {
                return UnsupportedTypeSnafu {
                    path,
                    type_name: field.field_type.clone(),
                }
                .fail();
            }
        };

        converted.push(FieldDescriptor {
            name: field.name.clone(),
            number: u32::try_from(index + 1).unwrap_or(u32::MAX),
            mode,
            field_type,
        });
    }

    Ok(MessageDescriptor {
        name: name.to_string(),
        fields: converted,
    })
}
