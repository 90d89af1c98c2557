//! Dynamic, schema-driven record encoding.
//!
//! [`Encoder::encode`] walks a [`TableSchema`] in field-number order and
//! writes each value found in the record under its field number, producing a
//! protobuf message the store can validate against the session handshake.
//! Output depends only on the schema and the record, never on key order in
//! the input document.
//!
//! Coercion is strict:
//! - INT64 takes integral numbers only (`42` or `42.0`, never `4.2`)
//! - FLOAT64 takes any number exactly representable as `f64`
//! - BOOL takes `true`/`false`, STRING takes strings
//! - BYTES takes a standard base64 string
//! - TIMESTAMP takes an RFC 3339 string and is sent as microseconds since the epoch
//!
//! An absent or null NULLABLE field is omitted from the payload. An absent or
//! null REPEATED field encodes as no entries.

mod decode;
mod wire;

pub use decode::decode;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use snafu::prelude::*;

use crate::error::{
    EncodeError, InvalidBase64Snafu, InvalidTimestampSnafu, MissingFieldSnafu, TypeMismatchSnafu,
    UnknownFieldSnafu,
};
use crate::schema::{FieldDescriptor, FieldMode, FieldType, MessageDescriptor, ScalarKind, TableSchema};
use wire::{int64_to_wire, put_bytes_field, put_double_field, put_varint_field};

/// Path used for the record itself in error messages.
pub const ROOT_PATH: &str = "$";

/// Encoder switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncodeOptions {
    /// Skip record keys the schema does not declare instead of failing.
    #[serde(default)]
    pub ignore_unknown_fields: bool,
}

/// A wire payload paired with the position of its source record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    pub payload: Bytes,
    /// Index of the originating record in the input sequence.
    pub index: usize,
}

/// Stateless record encoder; safe to share across workers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Encoder {
    options: EncodeOptions,
}

impl Encoder {
    pub fn new(options: EncodeOptions) -> Self {
        Self { options }
    }

    /// Encode one record. Errors are scoped to this record.
    pub fn encode(
        &self,
        schema: &TableSchema,
        record: &Value,
        index: usize,
    ) -> Result<EncodedRecord, EncodeError> {
        let payload = self.encode_value(schema.root(), record)?;
        Ok(EncodedRecord {
            payload: Bytes::from(payload),
            index,
        })
    }

    /// Encode every record, keeping one result per input in input order.
    pub fn encode_all<'a>(
        &self,
        schema: &TableSchema,
        records: impl IntoIterator<Item = &'a Value>,
    ) -> Vec<Result<EncodedRecord, EncodeError>> {
        records
            .into_iter()
            .enumerate()
            .map(|(index, record)| self.encode(schema, record, index))
            .collect()
    }

    /// Encode `value` as an instance of `message`.
    pub fn encode_value(
        &self,
        message: &MessageDescriptor,
        value: &Value,
    ) -> Result<Vec<u8>, EncodeError> {
        let object = as_object(value, ROOT_PATH)?;
        let mut buf = Vec::new();
        self.encode_message(message, object, "", &mut buf)?;
        Ok(buf)
    }

    fn encode_message(
        &self,
        message: &MessageDescriptor,
        object: &Map<String, Value>,
        prefix: &str,
        buf: &mut Vec<u8>,
    ) -> Result<(), EncodeError> {
        if !self.options.ignore_unknown_fields
            && let Some(unknown) = object.keys().find(|key| message.field(key).is_none())
        {
            return UnknownFieldSnafu {
                path: join_path(prefix, unknown),
            }
            .fail();
        }

        for field in &message.fields {
            let path = join_path(prefix, &field.name);
            let value = object.get(&field.name).filter(|v| !v.is_null());

            match (field.mode, value) {
                (FieldMode::Required, None) => return MissingFieldSnafu { path }.fail(),
                (FieldMode::Nullable, None) | (FieldMode::Repeated, None) => {}
                (FieldMode::Repeated, Some(Value::Array(items))) => {
                    for (i, item) in items.iter().enumerate() {
                        let item_path = format!("{path}[{i}]");
                        if item.is_null() {
                            return TypeMismatchSnafu {
                                path: item_path,
                                expected: field.field_type.type_name(),
                                found: json_type_name(item),
                            }
                            .fail();
                        }
                        self.encode_field(field, item, &item_path, buf)?;
                    }
                }
                (FieldMode::Repeated, Some(other)) => {
                    return TypeMismatchSnafu {
                        path,
                        expected: "ARRAY",
                        found: json_type_name(other),
                    }
                    .fail();
                }
                (FieldMode::Required | FieldMode::Nullable, Some(value)) => {
                    self.encode_field(field, value, &path, buf)?;
                }
            }
        }

        Ok(())
    }

    /// Write one wire entry for a non-null `value` of `field`.
    fn encode_field(
        &self,
        field: &FieldDescriptor,
        value: &Value,
        path: &str,
        buf: &mut Vec<u8>,
    ) -> Result<(), EncodeError> {
        match &field.field_type {
            FieldType::Struct(child) => {
                let object = as_object(value, path)?;
                let mut nested = Vec::new();
                self.encode_message(child, object, path, &mut nested)?;
                put_bytes_field(field.number, &nested, buf);
            }
            FieldType::Scalar(kind) => encode_scalar(*kind, field.number, value, path, buf)?,
        }
        Ok(())
    }
}

fn encode_scalar(
    kind: ScalarKind,
    number: u32,
    value: &Value,
    path: &str,
    buf: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    let mismatch = || {
        TypeMismatchSnafu {
            path,
            expected: kind.as_str(),
            found: json_type_name(value),
        }
        .build()
    };

    match (kind, value) {
        (ScalarKind::Int64, Value::Number(n)) => {
            let int = exact_i64(n).ok_or_else(mismatch)?;
            put_varint_field(number, int64_to_wire(int), buf);
        }
        (ScalarKind::Float64, Value::Number(n)) => {
            let float = exact_f64(n).ok_or_else(mismatch)?;
            put_double_field(number, float, buf);
        }
        (ScalarKind::Bool, Value::Bool(b)) => put_varint_field(number, u64::from(*b), buf),
        (ScalarKind::String, Value::String(s)) => put_bytes_field(number, s.as_bytes(), buf),
        (ScalarKind::Bytes, Value::String(s)) => {
            let bytes = STANDARD.decode(s).context(InvalidBase64Snafu { path })?;
            put_bytes_field(number, &bytes, buf);
        }
        (ScalarKind::Timestamp, Value::String(s)) => {
            let parsed = DateTime::parse_from_rfc3339(s).context(InvalidTimestampSnafu {
                path,
                value: s.as_str(),
            })?;
            put_varint_field(number, int64_to_wire(parsed.timestamp_micros()), buf);
        }
        _ => return Err(mismatch()),
    }
    Ok(())
}

/// Integral value of `n`, if it has one that fits in `i64`.
fn exact_i64(n: &Number) -> Option<i64> {
    if let Some(int) = n.as_i64() {
        return Some(int);
    }
    if n.is_u64() {
        // Above i64::MAX
        return None;
    }
    let float = n.as_f64()?;
    // -2^63 is exact as f64; 2^63 is not representable as i64.
    let in_range = float >= -9_223_372_036_854_775_808.0 && float < 9_223_372_036_854_775_808.0;
    (float.fract() == 0.0 && in_range).then_some(float as i64)
}

/// `f64` value of `n`, if the conversion loses nothing.
fn exact_f64(n: &Number) -> Option<f64> {
    const MAX_EXACT: u64 = 1 << f64::MANTISSA_DIGITS;

    if let Some(int) = n.as_i64() {
        return (int.unsigned_abs() <= MAX_EXACT).then_some(int as f64);
    }
    if let Some(uint) = n.as_u64() {
        return (uint <= MAX_EXACT).then_some(uint as f64);
    }
    n.as_f64()
}

fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, EncodeError> {
    value.as_object().context(TypeMismatchSnafu {
        path,
        expected: "STRUCT",
        found: json_type_name(value),
    })
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RemoteField, RemoteTableSchema};
    use crate::table::TableRef;
    use serde_json::json;

    fn schema(fields: Vec<RemoteField>) -> TableSchema {
        TableSchema::from_remote(TableRef::new("p", "d", "t"), &RemoteTableSchema { fields })
            .unwrap()
    }

    fn id_tags() -> TableSchema {
        schema(vec![
            RemoteField::new("id", "INT64", "REQUIRED"),
            RemoteField::new("tags", "STRING", "REPEATED"),
        ])
    }

    fn profile_schema() -> TableSchema {
        schema(vec![RemoteField::record(
            "profile",
            "REQUIRED",
            vec![
                RemoteField::new("a", "INT64", "REQUIRED"),
                RemoteField::new("b", "STRING", "NULLABLE"),
            ],
        )])
    }

    fn encode(schema: &TableSchema, record: Value) -> Result<EncodedRecord, EncodeError> {
        Encoder::default().encode(schema, &record, 0)
    }

    #[test]
    fn test_id_and_tags_wire_layout() {
        let encoded = encode(&id_tags(), json!({"id": 42, "tags": ["x", "y"]})).unwrap();

        // id: key 0x08, 42; tags: one length-delimited entry per element
        assert_eq!(
            encoded.payload.as_ref(),
            &[0x08, 42, 0x12, 1, b'x', 0x12, 1, b'y']
        );
    }

    #[test]
    fn test_nullable_absent_is_omitted_on_wire() {
        let with_b = encode(&profile_schema(), json!({"profile": {"a": 1, "b": "z"}})).unwrap();
        let without_b = encode(&profile_schema(), json!({"profile": {"a": 1}})).unwrap();
        let null_b = encode(&profile_schema(), json!({"profile": {"a": 1, "b": null}})).unwrap();

        // profile { a: 1 } only
        assert_eq!(without_b.payload.as_ref(), &[0x0a, 2, 0x08, 1]);
        assert_eq!(without_b, null_b);
        assert!(with_b.payload.len() > without_b.payload.len());
    }

    #[test]
    fn test_nested_required_missing() {
        let err = encode(&profile_schema(), json!({"profile": {}})).unwrap_err();
        match err {
            EncodeError::MissingField { path } => assert_eq!(path, "profile.a"),
            other => panic!("Expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn test_top_level_required_missing_or_null() {
        let missing = encode(&id_tags(), json!({"tags": []})).unwrap_err();
        assert!(matches!(missing, EncodeError::MissingField { ref path } if path == "id"));

        let null = encode(&id_tags(), json!({"id": null})).unwrap_err();
        assert_eq!(null.reason(), "missing_field");
    }

    #[test]
    fn test_fractional_int64_is_mismatch() {
        let err = encode(&id_tags(), json!({"id": 4.2})).unwrap_err();
        match err {
            EncodeError::TypeMismatch { path, expected, found } => {
                assert_eq!(path, "id");
                assert_eq!(expected, "INT64");
                assert_eq!(found, "number");
            }
            other => panic!("Expected TypeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_integral_float_accepted_for_int64() {
        let from_float = encode(&id_tags(), json!({"id": 42.0})).unwrap();
        let from_int = encode(&id_tags(), json!({"id": 42})).unwrap();
        assert_eq!(from_float.payload, from_int.payload);
    }

    #[test]
    fn test_out_of_range_int64_is_mismatch() {
        let err = encode(&id_tags(), json!({"id": u64::MAX})).unwrap_err();
        assert_eq!(err.reason(), "type_mismatch");
    }

    #[test]
    fn test_no_cross_type_coercion() {
        let numeric_string = encode(&id_tags(), json!({"id": "42"})).unwrap_err();
        assert!(matches!(numeric_string, EncodeError::TypeMismatch { found: "string", .. }));

        let flags = schema(vec![RemoteField::new("ok", "BOOL", "REQUIRED")]);
        let int_bool = encode(&flags, json!({"ok": 1})).unwrap_err();
        assert!(matches!(int_bool, EncodeError::TypeMismatch { expected: "BOOL", .. }));
    }

    #[test]
    fn test_repeated_requires_array() {
        let err = encode(&id_tags(), json!({"id": 1, "tags": "x"})).unwrap_err();
        assert!(matches!(err, EncodeError::TypeMismatch { expected: "ARRAY", .. }));
    }

    #[test]
    fn test_repeated_null_element_is_mismatch() {
        let err = encode(&id_tags(), json!({"id": 1, "tags": ["x", null]})).unwrap_err();
        match err {
            EncodeError::TypeMismatch { path, .. } => assert_eq!(path, "tags[1]"),
            other => panic!("Expected TypeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_and_absent_repeated_are_identical() {
        let empty = encode(&id_tags(), json!({"id": 1, "tags": []})).unwrap();
        let absent = encode(&id_tags(), json!({"id": 1})).unwrap();
        assert_eq!(empty.payload, absent.payload);
    }

    #[test]
    fn test_struct_requires_object() {
        let err = encode(&profile_schema(), json!({"profile": [1]})).unwrap_err();
        assert!(matches!(err, EncodeError::TypeMismatch { expected: "STRUCT", found: "array", .. }));

        let root = encode(&profile_schema(), json!([1, 2])).unwrap_err();
        assert!(matches!(root, EncodeError::TypeMismatch { ref path, .. } if path == ROOT_PATH));
    }

    #[test]
    fn test_unknown_field_rejected_unless_ignored() {
        let record = json!({"id": 1, "extra": true});

        let err = encode(&id_tags(), record.clone()).unwrap_err();
        assert!(matches!(err, EncodeError::UnknownField { ref path } if path == "extra"));

        let lenient = Encoder::new(EncodeOptions {
            ignore_unknown_fields: true,
        });
        let encoded = lenient.encode(&id_tags(), &record, 0).unwrap();
        assert_eq!(encoded, encode(&id_tags(), json!({"id": 1})).unwrap());
    }

    #[test]
    fn test_bytes_expects_base64() {
        let blobs = schema(vec![RemoteField::new("blob", "BYTES", "REQUIRED")]);

        let encoded = encode(&blobs, json!({"blob": "AAEC"})).unwrap();
        assert_eq!(encoded.payload.as_ref(), &[0x0a, 3, 0, 1, 2]);

        let err = encode(&blobs, json!({"blob": "not base64!"})).unwrap_err();
        assert!(matches!(err, EncodeError::InvalidBase64 { .. }));
    }

    #[test]
    fn test_timestamp_rfc3339_to_micros() {
        let events = schema(vec![RemoteField::new("at", "TIMESTAMP", "REQUIRED")]);

        let encoded = encode(&events, json!({"at": "1970-01-01T00:00:01.5Z"})).unwrap();
        // 1_500_000 micros = 0xe0 0xc6 0x5b
        assert_eq!(encoded.payload.as_ref(), &[0x08, 0xe0, 0xc6, 0x5b]);

        let numeric = encode(&events, json!({"at": 1_500_000})).unwrap_err();
        assert!(matches!(numeric, EncodeError::TypeMismatch { .. }));

        let garbage = encode(&events, json!({"at": "yesterday"})).unwrap_err();
        assert!(matches!(garbage, EncodeError::InvalidTimestamp { .. }));
    }

    #[test]
    fn test_float64_exactness() {
        let scores = schema(vec![RemoteField::new("score", "FLOAT64", "REQUIRED")]);

        assert!(encode(&scores, json!({"score": 1.25})).is_ok());
        assert!(encode(&scores, json!({"score": 7})).is_ok());
        let err = encode(&scores, json!({"score": i64::MAX})).unwrap_err();
        assert!(matches!(err, EncodeError::TypeMismatch { expected: "FLOAT64", .. }));
    }

    #[test]
    fn test_encoding_is_deterministic_across_key_order() {
        let schema = schema(vec![
            RemoteField::new("a", "INT64", "REQUIRED"),
            RemoteField::new("b", "STRING", "REQUIRED"),
            RemoteField::new("c", "BOOL", "NULLABLE"),
        ]);
        let first: Value = serde_json::from_str(r#"{"c": true, "b": "x", "a": 1}"#).unwrap();
        let second: Value = serde_json::from_str(r#"{"a": 1, "b": "x", "c": true}"#).unwrap();

        let one = encode(&schema, first.clone()).unwrap();
        let two = encode(&schema, first).unwrap();
        let three = encode(&schema, second).unwrap();
        assert_eq!(one.payload, two.payload);
        assert_eq!(one.payload, three.payload);
    }

    #[test]
    fn test_encode_all_isolates_failures() {
        let records = vec![json!({"id": 1}), json!({"tags": ["x"]}), json!({"id": 3})];
        let results = Encoder::default().encode_all(&id_tags(), &records);

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().index, 0);
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().index, 2);
    }
}
