// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

//! Type-tagged binary codec for heterogeneous annotation payloads.
//!
//! Every supported value shape has a fixed one-byte type code. The code is
//! derived from the value itself via [`AnnotationValue::type_code`], never
//! declared by the caller, so encode and decode always agree on the layout.
//!
//! Encoding is deterministic: big-endian fixed-width integers, u32-prefixed
//! UTF-8 strings and byte arrays, composite fields in declared order. For
//! every defined type code `decode(code, encode(v)) == v` holds exactly,
//! including full-range 64-bit integers. The one deliberate exception is
//! [`AnnotationValue::stringify`], which flattens an arbitrary displayable
//! value to its string form; the original value is not recoverable.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::buf::{put_byte_array, put_string, ByteReader};
use crate::CodecError;

pub const CODE_NULL: u8 = 0x00;
pub const CODE_STRING: u8 = 0x01;
pub const CODE_BYTES: u8 = 0x02;
pub const CODE_BOOL: u8 = 0x03;
pub const CODE_BYTE: u8 = 0x04;
pub const CODE_INT: u8 = 0x05;
pub const CODE_LONG: u8 = 0x06;
pub const CODE_FLOAT: u8 = 0x07;
pub const CODE_DOUBLE: u8 = 0x08;
pub const CODE_INT_STRING: u8 = 0x20;
pub const CODE_INT_BOOL_INT_BOOL: u8 = 0x21;
pub const CODE_LONG_INT_INT_BYTE_BYTE_STRING: u8 = 0x22;
pub const CODE_BYTES_STRING_STRING: u8 = 0x23;

/// A decoded annotation value: one scalar or one of the closed set of
/// composite tuples.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationValue {
    Null,
    String(String),
    Bytes(Vec<u8>),
    Bool(bool),
    Byte(i8),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    IntString(i32, String),
    IntBoolIntBool(i32, bool, i32, bool),
    LongIntIntByteByteString(i64, i32, i32, i8, i8, String),
    BytesStringString(Vec<u8>, String, String),
}

impl AnnotationValue {
    /// Fallback for values outside the supported shapes: store the value's
    /// string form. Lossy on purpose; decode yields the string, not the
    /// original value.
    pub fn stringify(value: impl fmt::Display) -> AnnotationValue {
        AnnotationValue::String(value.to_string())
    }

    /// The one-byte type code for this value's shape.
    pub fn type_code(&self) -> u8 {
        match self {
            AnnotationValue::Null => CODE_NULL,
            AnnotationValue::String(_) => CODE_STRING,
            AnnotationValue::Bytes(_) => CODE_BYTES,
            AnnotationValue::Bool(_) => CODE_BOOL,
            AnnotationValue::Byte(_) => CODE_BYTE,
            AnnotationValue::Int(_) => CODE_INT,
            AnnotationValue::Long(_) => CODE_LONG,
            AnnotationValue::Float(_) => CODE_FLOAT,
            AnnotationValue::Double(_) => CODE_DOUBLE,
            AnnotationValue::IntString(..) => CODE_INT_STRING,
            AnnotationValue::IntBoolIntBool(..) => CODE_INT_BOOL_INT_BOOL,
            AnnotationValue::LongIntIntByteByteString(..) => CODE_LONG_INT_INT_BYTE_BYTE_STRING,
            AnnotationValue::BytesStringString(..) => CODE_BYTES_STRING_STRING,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub(crate) fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            AnnotationValue::Null => {}
            AnnotationValue::String(s) => put_string(buf, s),
            AnnotationValue::Bytes(b) => put_byte_array(buf, b),
            AnnotationValue::Bool(v) => buf.put_u8(u8::from(*v)),
            AnnotationValue::Byte(v) => buf.put_i8(*v),
            AnnotationValue::Int(v) => buf.put_i32(*v),
            AnnotationValue::Long(v) => buf.put_i64(*v),
            AnnotationValue::Float(v) => buf.put_f32(*v),
            AnnotationValue::Double(v) => buf.put_f64(*v),
            AnnotationValue::IntString(i, s) => {
                buf.put_i32(*i);
                put_string(buf, s);
            }
            AnnotationValue::IntBoolIntBool(i1, b1, i2, b2) => {
                buf.put_i32(*i1);
                buf.put_u8(u8::from(*b1));
                buf.put_i32(*i2);
                buf.put_u8(u8::from(*b2));
            }
            AnnotationValue::LongIntIntByteByteString(l, i1, i2, by1, by2, s) => {
                buf.put_i64(*l);
                buf.put_i32(*i1);
                buf.put_i32(*i2);
                buf.put_i8(*by1);
                buf.put_i8(*by2);
                put_string(buf, s);
            }
            AnnotationValue::BytesStringString(b, s1, s2) => {
                put_byte_array(buf, b);
                put_string(buf, s1);
                put_string(buf, s2);
            }
        }
    }

    pub fn decode(type_code: u8, bytes: &[u8]) -> Result<AnnotationValue, CodecError> {
        let mut r = ByteReader::new(bytes);
        let value = match type_code {
            CODE_NULL => AnnotationValue::Null,
            CODE_STRING => AnnotationValue::String(r.string("annotation.string")?),
            CODE_BYTES => AnnotationValue::Bytes(r.byte_array("annotation.bytes")?),
            CODE_BOOL => AnnotationValue::Bool(r.bool("annotation.bool")?),
            CODE_BYTE => AnnotationValue::Byte(r.i8("annotation.byte")?),
            CODE_INT => AnnotationValue::Int(r.i32("annotation.int")?),
            CODE_LONG => AnnotationValue::Long(r.i64("annotation.long")?),
            CODE_FLOAT => AnnotationValue::Float(r.f32("annotation.float")?),
            CODE_DOUBLE => AnnotationValue::Double(r.f64("annotation.double")?),
            CODE_INT_STRING => AnnotationValue::IntString(
                r.i32("annotation.int_string.int")?,
                r.string("annotation.int_string.string")?,
            ),
            CODE_INT_BOOL_INT_BOOL => AnnotationValue::IntBoolIntBool(
                r.i32("annotation.ibib.int1")?,
                r.bool("annotation.ibib.bool1")?,
                r.i32("annotation.ibib.int2")?,
                r.bool("annotation.ibib.bool2")?,
            ),
            CODE_LONG_INT_INT_BYTE_BYTE_STRING => AnnotationValue::LongIntIntByteByteString(
                r.i64("annotation.liibbs.long")?,
                r.i32("annotation.liibbs.int1")?,
                r.i32("annotation.liibbs.int2")?,
                r.i8("annotation.liibbs.byte1")?,
                r.i8("annotation.liibbs.byte2")?,
                r.string("annotation.liibbs.string")?,
            ),
            CODE_BYTES_STRING_STRING => AnnotationValue::BytesStringString(
                r.byte_array("annotation.bss.bytes")?,
                r.string("annotation.bss.string1")?,
                r.string("annotation.bss.string2")?,
            ),
            unknown => return Err(CodecError::UnknownTypeCode(unknown)),
        };
        Ok(value)
    }
}

/// A keyed annotation as attached to a span event.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub key: i32,
    pub value: AnnotationValue,
}

impl Annotation {
    pub fn new(key: i32, value: AnnotationValue) -> Self {
        Annotation { key, value }
    }

    pub(crate) fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_i32(self.key);
        buf.put_u8(self.value.type_code());
        let mut body = BytesMut::new();
        self.value.encode_into(&mut body);
        put_byte_array(buf, &body);
    }

    pub(crate) fn decode_from(r: &mut ByteReader<'_>) -> Result<Annotation, CodecError> {
        let key = r.i32("annotation.key")?;
        let type_code = r.u8("annotation.type_code")?;
        let body = r.byte_array("annotation.body")?;
        let value = AnnotationValue::decode(type_code, &body)?;
        Ok(Annotation { key, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip(value: AnnotationValue) {
        let code = value.type_code();
        let bytes = value.encode();
        let decoded = AnnotationValue::decode(code, &bytes).expect("decode failed");
        assert_eq!(value, decoded);
    }

    #[test]
    fn test_scalar_round_trips() {
        round_trip(AnnotationValue::String("test".into()));
        round_trip(AnnotationValue::String(String::new()));
        round_trip(AnnotationValue::String("adfesdfsesdfsdfserfsdfsdfe".into()));

        round_trip(AnnotationValue::Int(1));
        round_trip(AnnotationValue::Int(0));
        round_trip(AnnotationValue::Int(-1212));

        round_trip(AnnotationValue::Long(2));
        round_trip(AnnotationValue::Long(-22342342));
        round_trip(AnnotationValue::Long(268435455));
        round_trip(AnnotationValue::Long(268435456));
        round_trip(AnnotationValue::Long(34359738367));
        round_trip(AnnotationValue::Long(34359738368));
        round_trip(AnnotationValue::Long(i64::MAX));
        round_trip(AnnotationValue::Long(i64::MIN));
        round_trip(AnnotationValue::Long(-1));

        round_trip(AnnotationValue::Float(3.0));
        round_trip(AnnotationValue::Float(123.3));

        round_trip(AnnotationValue::Double(4.0));
        round_trip(AnnotationValue::Double(-124.0));

        round_trip(AnnotationValue::Byte(4));
        round_trip(AnnotationValue::Byte(-14));

        round_trip(AnnotationValue::Bool(true));
        round_trip(AnnotationValue::Bool(false));

        round_trip(AnnotationValue::Null);

        round_trip(AnnotationValue::Bytes(vec![12, 3, 4, 1, 23, 4, 1, 2, 3, 4, 4]));
        round_trip(AnnotationValue::Bytes(Vec::new()));
    }

    #[test]
    fn test_int_string_round_trips() {
        round_trip(AnnotationValue::IntString(-1, String::new()));
        round_trip(AnnotationValue::IntString(0, String::new()));
        round_trip(AnnotationValue::IntString(1, String::new()));
        round_trip(AnnotationValue::IntString(i32::MAX, "test".into()));
        round_trip(AnnotationValue::IntString(i32::MIN, "test".into()));
    }

    #[test]
    fn test_int_bool_int_bool_round_trip() {
        let value = AnnotationValue::IntBoolIntBool(10, false, 5000, true);
        let bytes = value.encode();
        let decoded =
            AnnotationValue::decode(CODE_INT_BOOL_INT_BOOL, &bytes).expect("decode failed");
        assert_eq!(value, decoded);
    }

    #[test]
    fn test_long_int_int_byte_byte_string_round_trip() {
        let value = AnnotationValue::LongIntIntByteByteString(999999, 0, 123, 99, 1, "app7".into());
        let bytes = value.encode();
        let decoded = AnnotationValue::decode(CODE_LONG_INT_INT_BYTE_BYTE_STRING, &bytes)
            .expect("decode failed");
        match &decoded {
            AnnotationValue::LongIntIntByteByteString(l, i1, i2, b1, b2, s) => {
                assert_eq!(*l, 999999);
                assert_eq!(*i1, 0);
                assert_eq!(*i2, 123);
                assert_eq!(*b1, 99);
                assert_eq!(*b2, 1);
                assert_eq!(s, "app7");
            }
            other => panic!("wrong shape: {other:?}"),
        }
        assert_eq!(value, decoded);
    }

    #[test]
    fn test_bytes_string_string_round_trip() {
        round_trip(AnnotationValue::BytesStringString(
            vec![1, 2, 3, 4, 5],
            "string1".into(),
            "string2".into(),
        ));
    }

    #[test]
    fn test_stringify_fallback_is_lossy_but_decodable() {
        struct Opaque;
        impl std::fmt::Display for Opaque {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "Opaque{{}}")
            }
        }

        let value = AnnotationValue::stringify(Opaque);
        assert_eq!(value.type_code(), CODE_STRING);
        let decoded = AnnotationValue::decode(CODE_STRING, &value.encode()).expect("decode failed");
        assert_eq!(decoded, AnnotationValue::String("Opaque{}".into()));
    }

    #[test]
    fn test_unknown_type_code_is_an_error() {
        let err = AnnotationValue::decode(0x7f, &[]).unwrap_err();
        assert!(matches!(err, CodecError::UnknownTypeCode(0x7f)));
    }

    #[test]
    fn test_truncated_payload_is_an_error() {
        let err = AnnotationValue::decode(CODE_LONG, &[0, 1, 2]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated(_)));
    }

    #[test]
    fn test_corrupt_string_length_is_an_error() {
        // Declared length far past the end of the buffer.
        let bytes = [0xff, 0xff, 0xff, 0xff, b'a'];
        let err = AnnotationValue::decode(CODE_STRING, &bytes).unwrap_err();
        assert!(matches!(err, CodecError::BadLength { .. }));
    }

    #[test]
    fn test_keyed_annotation_round_trip() {
        let ann = Annotation::new(42, AnnotationValue::IntString(7, "select 1".into()));
        let mut buf = bytes::BytesMut::new();
        ann.encode_into(&mut buf);
        let mut r = crate::buf::ByteReader::new(&buf);
        let decoded = Annotation::decode_from(&mut r).expect("decode failed");
        assert_eq!(ann, decoded);
        assert_eq!(r.remaining(), 0);
    }

    proptest! {
        #[test]
        fn prop_long_round_trips(v in any::<i64>()) {
            let value = AnnotationValue::Long(v);
            let decoded = AnnotationValue::decode(CODE_LONG, &value.encode()).unwrap();
            prop_assert_eq!(value, decoded);
        }

        #[test]
        fn prop_string_round_trips(s in ".*") {
            let value = AnnotationValue::String(s);
            let decoded = AnnotationValue::decode(CODE_STRING, &value.encode()).unwrap();
            prop_assert_eq!(value, decoded);
        }
    }
}
