//! Payload decoding, the inverse of the encoder.
//!
//! Absent NULLABLE fields and empty REPEATED fields both decode to a missing
//! key: the wire format does not distinguish them.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Buf;
use chrono::{DateTime, SecondsFormat, Utc};
use prost::encoding::{WireType, decode_key, decode_varint};
use serde_json::{Map, Number, Value};
use snafu::prelude::*;

use super::wire::int64_from_wire;
use super::{ROOT_PATH, join_path};
use crate::error::{
    DecodeError, InvalidUtf8Snafu, MissingRequiredSnafu, TruncatedSnafu, UnknownFieldNumberSnafu,
    UnrepresentableSnafu, WireSnafu, WireTypeMismatchSnafu,
};
use crate::schema::{FieldDescriptor, FieldMode, FieldType, MessageDescriptor, ScalarKind};

/// Decode `payload` as an instance of `message` into a JSON document.
pub fn decode(message: &MessageDescriptor, payload: &[u8]) -> Result<Value, DecodeError> {
    decode_message(message, payload, "")
}

fn decode_message(
    message: &MessageDescriptor,
    mut buf: &[u8],
    prefix: &str,
) -> Result<Value, DecodeError> {
    let mut slots: Vec<Option<Value>> = vec![None; message.fields.len()];

    while buf.has_remaining() {
        let (number, wire_type) = decode_key(&mut buf).context(WireSnafu)?;
        let field = message
            .field_by_number(number)
            .context(UnknownFieldNumberSnafu {
                path: if prefix.is_empty() { ROOT_PATH } else { prefix },
                number,
            })?;
        let path = join_path(prefix, &field.name);
        let value = decode_field(field, wire_type, &mut buf, &path)?;

        // field_by_number only returns fields[number - 1]
        let slot = &mut slots[number as usize - 1];
        match (field.mode, slot.as_mut()) {
            (FieldMode::Repeated, Some(Value::Array(items))) => items.push(value),
            (FieldMode::Repeated, _) => *slot = Some(Value::Array(vec![value])),
            // Last occurrence wins for singular fields.
            _ => *slot = Some(value),
        }
    }

    let mut object = Map::new();
    for (field, slot) in message.fields.iter().zip(slots) {
        match slot {
            Some(value) => {
                object.insert(field.name.clone(), value);
            }
            None if field.mode == FieldMode::Required => {
                return MissingRequiredSnafu {
                    path: join_path(prefix, &field.name),
                }
                .fail();
            }
            None => {}
        }
    }

    Ok(Value::Object(object))
}

fn decode_field(
    field: &FieldDescriptor,
    wire_type: WireType,
    buf: &mut &[u8],
    path: &str,
) -> Result<Value, DecodeError> {
    let expected = match &field.field_type {
        FieldType::Scalar(ScalarKind::Int64 | ScalarKind::Bool | ScalarKind::Timestamp) => {
            WireType::Varint
        }
        FieldType::Scalar(ScalarKind::Float64) => WireType::SixtyFourBit,
        FieldType::Scalar(ScalarKind::String | ScalarKind::Bytes) | FieldType::Struct(_) => {
            WireType::LengthDelimited
        }
    };
    ensure!(wire_type == expected, WireTypeMismatchSnafu { path });

    let value = match &field.field_type {
        FieldType::Scalar(ScalarKind::Int64) => {
            Value::from(int64_from_wire(decode_varint(buf).context(WireSnafu)?))
        }
        FieldType::Scalar(ScalarKind::Bool) => Value::Bool(decode_varint(buf).context(WireSnafu)? != 0),
        FieldType::Scalar(ScalarKind::Timestamp) => {
            let micros = int64_from_wire(decode_varint(buf).context(WireSnafu)?);
            let at = DateTime::from_timestamp_micros(micros).context(UnrepresentableSnafu { path })?;
            Value::String(format_timestamp(&at))
        }
        FieldType::Scalar(ScalarKind::Float64) => {
            ensure!(buf.remaining() >= 8, TruncatedSnafu { path });
            let number = Number::from_f64(buf.get_f64_le()).context(UnrepresentableSnafu { path })?;
            Value::Number(number)
        }
        FieldType::Scalar(ScalarKind::String) => {
            let bytes = take_delimited(buf, path)?;
            let text = std::str::from_utf8(bytes).ok().context(InvalidUtf8Snafu { path })?;
            Value::String(text.to_string())
        }
        FieldType::Scalar(ScalarKind::Bytes) => Value::String(STANDARD.encode(take_delimited(buf, path)?)),
        FieldType::Struct(child) => decode_message(child, take_delimited(buf, path)?, path)?,
    };

    Ok(value)
}

fn take_delimited<'a>(buf: &mut &'a [u8], path: &str) -> Result<&'a [u8], DecodeError> {
    let len = decode_varint(buf).context(WireSnafu)?;
    let len = usize::try_from(len)
        .ok()
        .filter(|len| *len <= buf.len())
        .context(TruncatedSnafu { path })?;
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

/// RFC 3339 in UTC with the shortest fraction that keeps every microsecond.
fn format_timestamp(at: &DateTime<Utc>) -> String {
    let full = at.to_rfc3339_opts(SecondsFormat::Micros, true);
    let Some(stamp) = full.strip_suffix('Z') else {
        return full;
    };
    let trimmed = stamp.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed}Z")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::Encoder;
    use crate::schema::{RemoteField, RemoteTableSchema, TableSchema};
    use crate::table::TableRef;
    use serde_json::json;

    fn schema(fields: Vec<RemoteField>) -> TableSchema {
        TableSchema::from_remote(TableRef::new("p", "d", "t"), &RemoteTableSchema { fields })
            .unwrap()
    }

    fn round_trip(schema: &TableSchema, record: &Value) -> Value {
        let encoded = Encoder::default().encode(schema, record, 0).unwrap();
        decode(schema.root(), &encoded.payload).unwrap()
    }

    #[test]
    fn test_round_trip_id_and_tags() {
        let schema = schema(vec![
            RemoteField::new("id", "INT64", "REQUIRED"),
            RemoteField::new("tags", "STRING", "REPEATED"),
        ]);
        let record = json!({"id": 42, "tags": ["x", "y"]});

        assert_eq!(round_trip(&schema, &record), record);
    }

    #[test]
    fn test_round_trip_every_type() {
        let schema = schema(vec![
            RemoteField::new("i", "INT64", "REQUIRED"),
            RemoteField::new("neg", "INT64", "REQUIRED"),
            RemoteField::new("f", "FLOAT64", "REQUIRED"),
            RemoteField::new("b", "BOOL", "REQUIRED"),
            RemoteField::new("s", "STRING", "REQUIRED"),
            RemoteField::new("raw", "BYTES", "REQUIRED"),
            RemoteField::new("at", "TIMESTAMP", "REQUIRED"),
            RemoteField::record(
                "nested",
                "REPEATED",
                vec![
                    RemoteField::new("k", "STRING", "REQUIRED"),
                    RemoteField::new("v", "FLOAT64", "NULLABLE"),
                ],
            ),
        ]);
        let record = json!({
            "i": 9_007_199_254_740_993i64,
            "neg": -5,
            "f": -0.125,
            "b": false,
            "s": "héllo",
            "raw": "AAEC/w==",
            "at": "2024-01-15T10:30:00.123456Z",
            "nested": [{"k": "a", "v": 1.5}, {"k": "b"}]
        });

        assert_eq!(round_trip(&schema, &record), record);
    }

    #[test]
    fn test_timestamp_fraction_is_shortest_exact() {
        let schema = schema(vec![RemoteField::new("at", "TIMESTAMP", "REQUIRED")]);

        let cases = [
            ("2024-01-15T10:30:00.5Z", "2024-01-15T10:30:00.5Z"),
            ("2024-01-15T10:30:00.120Z", "2024-01-15T10:30:00.12Z"),
            ("2024-01-15T10:30:00Z", "2024-01-15T10:30:00Z"),
            ("2024-01-15T10:30:10.000001Z", "2024-01-15T10:30:10.000001Z"),
            // Offsets are normalized to UTC.
            ("2024-01-15T12:30:00.25+02:00", "2024-01-15T10:30:00.25Z"),
        ];
        for (input, expected) in cases {
            let decoded = round_trip(&schema, &json!({ "at": input }));
            assert_eq!(decoded["at"], json!(expected), "input {input}");
        }
    }

    #[test]
    fn test_absent_nullable_and_empty_repeated_decode_alike() {
        let schema = schema(vec![
            RemoteField::new("id", "INT64", "REQUIRED"),
            RemoteField::new("note", "STRING", "NULLABLE"),
            RemoteField::new("tags", "STRING", "REPEATED"),
        ]);

        let decoded = round_trip(&schema, &json!({"id": 1, "note": null, "tags": []}));
        assert_eq!(decoded, json!({"id": 1}));
    }

    #[test]
    fn test_missing_required_detected() {
        let schema = schema(vec![
            RemoteField::new("id", "INT64", "REQUIRED"),
            RemoteField::new("note", "STRING", "NULLABLE"),
        ]);
        // Only field 2 present.
        let err = decode(schema.root(), &[0x12, 1, b'x']).unwrap_err();
        assert!(matches!(err, DecodeError::MissingRequired { ref path } if path == "id"));
    }

    #[test]
    fn test_unknown_number_and_truncation() {
        let schema = schema(vec![RemoteField::new("note", "STRING", "NULLABLE")]);

        let unknown = decode(schema.root(), &[0x18, 1]).unwrap_err();
        assert!(matches!(unknown, DecodeError::UnknownFieldNumber { number: 3, .. }));

        let truncated = decode(schema.root(), &[0x0a, 5, b'x']).unwrap_err();
        assert!(matches!(truncated, DecodeError::Truncated { .. }));

        let wrong_wire = decode(schema.root(), &[0x08, 1]).unwrap_err();
        assert!(matches!(wrong_wire, DecodeError::WireTypeMismatch { .. }));
    }
}
