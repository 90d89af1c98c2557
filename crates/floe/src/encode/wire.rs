//! Protobuf wire primitives used by the encoder and decoder.

use bytes::BufMut;
use prost::encoding::{WireType, encode_key, encode_varint};

pub(crate) fn put_varint_field(number: u32, value: u64, buf: &mut Vec<u8>) {
    encode_key(number, WireType::Varint, buf);
    encode_varint(value, buf);
}

pub(crate) fn put_double_field(number: u32, value: f64, buf: &mut Vec<u8>) {
    encode_key(number, WireType::SixtyFourBit, buf);
    buf.put_f64_le(value);
}

pub(crate) fn put_bytes_field(number: u32, value: &[u8], buf: &mut Vec<u8>) {
    encode_key(number, WireType::LengthDelimited, buf);
    encode_varint(value.len() as u64, buf);
    buf.put_slice(value);
}

/// Two's complement reinterpretation, as protobuf `int64` does.
pub(crate) fn int64_to_wire(value: i64) -> u64 {
    value as u64
}

pub(crate) fn int64_from_wire(value: u64) -> i64 {
    value as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_field_layout() {
        let mut buf = Vec::new();
        put_varint_field(1, 150, &mut buf);
        // Field 1, varint: key 0x08, value 150 = 0x96 0x01
        assert_eq!(buf, vec![0x08, 0x96, 0x01]);
    }

    #[test]
    fn test_negative_int64_uses_ten_bytes() {
        let mut buf = Vec::new();
        put_varint_field(1, int64_to_wire(-1), &mut buf);
        assert_eq!(buf.len(), 11);
        assert_eq!(int64_from_wire(int64_to_wire(-1)), -1);
    }

    #[test]
    fn test_bytes_field_layout() {
        let mut buf = Vec::new();
        put_bytes_field(2, b"hi", &mut buf);
        // Field 2, length-delimited: key 0x12, len 2
        assert_eq!(buf, vec![0x12, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_double_field_layout() {
        let mut buf = Vec::new();
        put_double_field(3, 1.5, &mut buf);
        assert_eq!(buf[0], 0x19);
        assert_eq!(&buf[1..], &1.5f64.to_le_bytes());
    }
}
