//! Serialized schema descriptor sent when an append connection starts.
//!
//! The descriptor is a self-contained proto2 message: every STRUCT becomes a
//! nested type of the root message, so the store can resolve the whole row
//! layout from this one artifact.

use bytes::Bytes;
use prost::Message;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto};

use super::descriptor::{FieldMode, FieldType, MessageDescriptor, ScalarKind};

/// Normalized descriptor and its canonical encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaHandshake {
    descriptor: DescriptorProto,
    bytes: Bytes,
}

impl SchemaHandshake {
    pub fn from_descriptor(root: &MessageDescriptor) -> Self {
        let mut nested = Vec::new();
        let mut descriptor = message_proto(root, &mut nested);
        descriptor.nested_type = nested;
        let bytes = Bytes::from(descriptor.encode_to_vec());

        Self { descriptor, bytes }
    }

    pub fn descriptor(&self) -> &DescriptorProto {
        &self.descriptor
    }

    /// Canonical serialized form, identical for identical schemas.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

/// Build the proto for `message`, appending every nested STRUCT to `nested`
/// in depth-first declaration order.
fn message_proto(message: &MessageDescriptor, nested: &mut Vec<DescriptorProto>) -> DescriptorProto {
    let field = message
        .fields
        .iter()
        .map(|field| {
            let label = match field.mode {
                FieldMode::Required => Label::Required,
                FieldMode::Nullable => Label::Optional,
                FieldMode::Repeated => Label::Repeated,
            };
            let (proto_type, type_name) = match &field.field_type {
                FieldType::Scalar(kind) => (scalar_type(*kind), None),
                FieldType::Struct(child) => {
                    let child_proto = message_proto(child, nested);
                    nested.push(child_proto);
                    (Type::Message, Some(child.name.clone()))
                }
            };

            FieldDescriptorProto {
                name: Some(field.name.clone()),
                number: Some(i32::try_from(field.number).unwrap_or(i32::MAX)),
                label: Some(label as i32),
                r#type: Some(proto_type as i32),
                type_name,
                ..Default::default()
            }
        })
        .collect();

    DescriptorProto {
        name: Some(message.name.clone()),
        field,
        ..Default::default()
    }
}

fn scalar_type(kind: ScalarKind) -> Type {
    match kind {
        ScalarKind::Int64 => Type::Int64,
        ScalarKind::Float64 => Type::Double,
        ScalarKind::Bool => Type::Bool,
        ScalarKind::String => Type::String,
        ScalarKind::Bytes => Type::Bytes,
        // Microseconds since the Unix epoch.
        ScalarKind::Timestamp => Type::Int64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RemoteField, RemoteTableSchema, TableSchema};
    use crate::table::TableRef;

    fn schema() -> TableSchema {
        TableSchema::from_remote(
            TableRef::new("p", "d", "t"),
            &RemoteTableSchema {
                fields: vec![
                    RemoteField::new("id", "INT64", "REQUIRED"),
                    RemoteField::new("tags", "STRING", "REPEATED"),
                    RemoteField::record(
                        "profile",
                        "NULLABLE",
                        vec![
                            RemoteField::new("a", "INT64", "REQUIRED"),
                            RemoteField::record(
                                "inner",
                                "REPEATED",
                                vec![RemoteField::new("at", "TIMESTAMP", "NULLABLE")],
                            ),
                        ],
                    ),
                ],
            },
        )
        .unwrap()
    }

    #[test]
    fn test_handshake_flattens_nested_types_into_root() {
        let schema = schema();
        let descriptor = schema.handshake().descriptor();

        assert_eq!(descriptor.name(), "root");
        assert_eq!(descriptor.field.len(), 3);
        let nested: Vec<_> = descriptor.nested_type.iter().map(|d| d.name()).collect();
        assert_eq!(nested, vec!["root__f3__f2", "root__f3"]);

        let profile = &descriptor.field[2];
        assert_eq!(profile.r#type(), Type::Message);
        assert_eq!(profile.type_name(), "root__f3");
        assert_eq!(profile.label(), Label::Optional);
    }

    #[test]
    fn test_handshake_labels_and_types() {
        let schema = schema();
        let descriptor = schema.handshake().descriptor();

        assert_eq!(descriptor.field[0].label(), Label::Required);
        assert_eq!(descriptor.field[0].r#type(), Type::Int64);
        assert_eq!(descriptor.field[0].number(), 1);
        assert_eq!(descriptor.field[1].label(), Label::Repeated);
        assert_eq!(descriptor.field[1].r#type(), Type::String);

        let inner = &descriptor.nested_type[0];
        assert_eq!(inner.field[0].r#type(), Type::Int64);
    }

    #[test]
    fn test_nested_type_names_are_unique_for_lookalike_paths() {
        // `a__b` at the root and `a.b` would share a name if paths were joined.
        let schema = TableSchema::from_remote(
            TableRef::new("p", "d", "t"),
            &RemoteTableSchema {
                fields: vec![
                    RemoteField::record(
                        "a__b",
                        "NULLABLE",
                        vec![RemoteField::new("x", "INT64", "NULLABLE")],
                    ),
                    RemoteField::record(
                        "a",
                        "NULLABLE",
                        vec![RemoteField::record(
                            "b",
                            "NULLABLE",
                            vec![RemoteField::new("y", "STRING", "NULLABLE")],
                        )],
                    ),
                ],
            },
        )
        .unwrap();
        let descriptor = schema.handshake().descriptor();

        let mut names: Vec<_> = descriptor.nested_type.iter().map(|d| d.name()).collect();
        assert_eq!(names.len(), 3);
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 3);

        let lookalike = &descriptor.field[0];
        let nested_b = descriptor
            .nested_type
            .iter()
            .find(|d| d.name() == "root__f2")
            .unwrap();
        assert_eq!(lookalike.type_name(), "root__f1");
        assert_eq!(nested_b.field[0].type_name(), "root__f2__f1");
        assert_ne!(lookalike.type_name(), nested_b.field[0].type_name());
    }

    #[test]
    fn test_handshake_bytes_decode_back() {
        let schema = schema();
        let decoded = DescriptorProto::decode(schema.handshake().bytes().clone()).unwrap();
        assert_eq!(&decoded, schema.handshake().descriptor());
    }
}
